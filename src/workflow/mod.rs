//! The two-phase signing run: collect and sign, then draft replies.

pub mod naming;
pub mod orchestrator;
pub mod types;

pub use naming::{attachment_filename, target_period};
pub use orchestrator::Orchestrator;
pub use types::{
    ConversationStage, DraftStep, ItemFailure, RunSummary, SkipReason, StepFailure, WorkflowEvent,
    WorkflowItem,
};
