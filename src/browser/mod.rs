//! Mail client abstraction and its Chrome DevTools implementation.

pub mod chromium;
pub mod selectors;

use async_trait::async_trait;

use crate::dom::{Document, NodeId};
use crate::error::{CaptureError, InteractionError};
use crate::resolve::AttachmentEntry;

pub use chromium::ChromiumMailClient;

/// A conversation row in the open folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// Outlook's `data-convid`.
    pub id: String,
    /// Zero-based display position.
    pub position: usize,
}

// ── Mail client trait ───────────────────────────────────────────────

/// Every UI operation the workflow performs against the webmail.
///
/// Each call is bounded by a timeout and leaves the UI in a state the next
/// call can start from. Implementations hold the single browser session and
/// are never driven concurrently.
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Conversations in the open folder, in display order.
    async fn list_conversations(&self) -> Result<Vec<Conversation>, InteractionError>;

    /// Close any menu or popup left open by a previous step.
    async fn dismiss_menus(&self) -> Result<(), InteractionError>;

    /// Open a conversation in the reading pane and return its subject.
    async fn select_conversation(&self, conversation: &Conversation) -> Result<String, InteractionError>;

    /// Click "See more messages" once. `false` when the control is absent.
    async fn expand_thread_step(&self) -> Result<bool, InteractionError>;

    /// Snapshot of the reading pane.
    async fn reading_pane(&self) -> Result<Document, InteractionError>;

    /// Expand the message headed by `anchor` so its attachments render.
    async fn expand_message(&self, pane: &Document, anchor: NodeId) -> Result<(), InteractionError>;

    /// Bytes of one attachment entry of the current reading pane.
    async fn capture_attachment(&self, entry: &AttachmentEntry) -> Result<Vec<u8>, CaptureError>;

    /// Select the conversation and open a reply to its latest message.
    async fn open_reply(&self, conversation_id: &str) -> Result<(), InteractionError>;

    async fn add_cc(&self, recipients: &[String]) -> Result<(), InteractionError>;

    /// Attach `bytes` to the open reply under `filename`.
    async fn attach_file(&self, filename: &str, bytes: &[u8]) -> Result<(), InteractionError>;

    async fn type_message(&self, body: &str) -> Result<(), InteractionError>;

    async fn save_draft(&self) -> Result<(), InteractionError>;

    /// Close the compose form, discarding nothing that was saved.
    async fn close_compose(&self) -> Result<(), InteractionError>;

    async fn move_to_folder(&self, conversation_id: &str, folder: &str) -> Result<(), InteractionError>;
}
