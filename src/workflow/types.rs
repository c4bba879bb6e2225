//! Workflow state and progress types.

use serde::{Deserialize, Serialize};

/// A signed attachment waiting for its reply draft.
#[derive(Clone, PartialEq, Eq)]
pub struct WorkflowItem {
    pub conversation_id: String,
    pub subject: String,
    pub sender_last_name: String,
    pub sender_email: Option<String>,
    pub signed_bytes: Vec<u8>,
    pub filename: String,
}

impl std::fmt::Debug for WorkflowItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowItem")
            .field("conversation_id", &self.conversation_id)
            .field("subject", &self.subject)
            .field("sender_last_name", &self.sender_last_name)
            .field("sender_email", &self.sender_email)
            .field("signed_bytes", &format_args!("{} bytes", self.signed_bytes.len()))
            .field("filename", &self.filename)
            .finish()
    }
}

/// How far collection got for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStage {
    Idle,
    Selected,
    ThreadExpanded,
    SenderResolved,
    AttachmentsResolved,
    Captured,
    Signed,
    Skipped,
}

impl std::fmt::Display for ConversationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Selected => "selected",
            Self::ThreadExpanded => "thread_expanded",
            Self::SenderResolved => "sender_resolved",
            Self::AttachmentsResolved => "attachments_resolved",
            Self::Captured => "captured",
            Self::Signed => "signed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Why a conversation produced no items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Every message is the operator's own, or none could be read.
    NoExternalSender,
    NoAttachments,
    NoPdfAttachments,
    /// A UI step failed before resolution finished.
    Interaction { stage: ConversationStage, error: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoExternalSender => write!(f, "no message from another sender"),
            Self::NoAttachments => write!(f, "no attachments"),
            Self::NoPdfAttachments => write!(f, "no PDF attachments"),
            Self::Interaction { stage, error } => write!(f, "failed after {stage}: {error}"),
        }
    }
}

/// Drafting steps for one item, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStep {
    OpenReply,
    SetRecipients,
    AttachFile,
    TypeMessage,
    SaveDraft,
    MoveToFolder,
}

impl DraftStep {
    /// Short tag used in diagnostics labels.
    pub fn label(&self) -> &'static str {
        match self {
            Self::OpenReply => "reply",
            Self::SetRecipients => "cc",
            Self::AttachFile => "attach",
            Self::TypeMessage => "type",
            Self::SaveDraft => "save",
            Self::MoveToFolder => "move",
        }
    }
}

impl std::fmt::Display for DraftStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::OpenReply => "open_reply",
            Self::SetRecipients => "set_recipients",
            Self::AttachFile => "attach_file",
            Self::TypeMessage => "type_message",
            Self::SaveDraft => "save_draft",
            Self::MoveToFolder => "move_to_folder",
        };
        write!(f, "{s}")
    }
}

/// A drafting step that failed, with its cause.
#[derive(Debug, thiserror::Error)]
#[error("{step} failed: {source}")]
pub struct StepFailure {
    pub step: DraftStep,
    #[source]
    pub source: crate::error::InteractionError,
}

/// One failed drafting item in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub index: usize,
    pub filename: String,
    pub step: DraftStep,
    pub error: String,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub conversations: usize,
    pub skipped: usize,
    /// Entries whose capture or signing failed.
    pub capture_failures: usize,
    /// Drafts saved and moved along with their conversation.
    pub processed: usize,
    pub total: usize,
    pub failures: Vec<ItemFailure>,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.processed, self.total)
    }
}

/// Progress notifications, broadcast while a run is going.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    ConversationStarted {
        index: usize,
        total: usize,
        conversation_id: String,
    },
    ConversationSkipped {
        index: usize,
        conversation_id: String,
        reason: SkipReason,
    },
    ItemCollected {
        conversation_id: String,
        filename: String,
    },
    CaptureFailed {
        conversation_id: String,
        entry: String,
        error: String,
    },
    DraftStarted {
        index: usize,
        total: usize,
        subject: String,
        filename: String,
    },
    DraftDone {
        index: usize,
    },
    DraftFailed {
        index: usize,
        step: DraftStep,
        error: String,
    },
    Finished {
        processed: usize,
        total: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_displays_tally() {
        let summary = RunSummary {
            processed: 2,
            total: 3,
            ..RunSummary::default()
        };
        assert_eq!(summary.to_string(), "2/3");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = WorkflowEvent::DraftFailed {
            index: 1,
            step: DraftStep::AttachFile,
            error: "timeout".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "draft_failed");
        assert_eq!(json["step"], "attach_file");
    }

    #[test]
    fn step_labels_are_short() {
        assert_eq!(DraftStep::OpenReply.label(), "reply");
        assert_eq!(DraftStep::MoveToFolder.to_string(), "move_to_folder");
    }
}
