//! Message and attachment resolution over reading-pane snapshots.
//!
//! Everything here is a pure function of a [`Document`](crate::dom::Document),
//! so each heuristic can be tested against hand-built trees.

pub mod attachments;
pub mod sender;

pub use attachments::{AttachmentEntry, AttachmentLocator, pdf_entries};
pub use sender::{ResolvedSender, SenderResolver, extract_email, extract_last_name};
