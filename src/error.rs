//! Error types for mailsign.

use std::time::Duration;

/// Top-level error type for a run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Interaction error: {0}")]
    Interaction(#[from] InteractionError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Signing error: {0}")]
    Sign(#[from] SignError),
}

/// Configuration-related errors. Always fatal at run start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Signature image not found: {0}")]
    SignatureNotFound(String),

    #[error("Unsupported signature format: \"{0}\". Only .png, .jpg, .jpeg are supported.")]
    UnsupportedSignatureFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Browser session errors. Fatal: no conversation can be processed.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Login was not completed within {0:?}")]
    LoginTimeout(Duration),

    #[error("Folder \"{0}\" not found")]
    FolderNotFound(String),

    #[error("Browser protocol error: {0}")]
    Protocol(String),
}

/// A UI interaction that did not complete. Aborts the current step only.
#[derive(Debug, thiserror::Error)]
pub enum InteractionError {
    #[error("Timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    #[error("Element not found: {0}")]
    NotFound(String),

    #[error("Conversation {0} not found in list")]
    ConversationNotFound(String),

    #[error("Browser protocol error: {0}")]
    Protocol(String),

    #[error("Snapshot could not be decoded: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to obtain the bytes of one attachment entry. Never fatal.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("No captured content for key {0}")]
    UnknownKey(String),

    #[error("No reply for {what} within {timeout:?}")]
    Timeout { what: String, timeout: Duration },

    #[error("Capture agent reported: {0}")]
    Agent(String),

    #[error("Correlation id {0} already has a pending request")]
    DuplicateRequest(String),

    #[error("Bridge closed")]
    Closed,

    #[error("Download control not found for {0}")]
    NoDownloadControl(String),

    #[error("Attachment request failed: {0}")]
    Http(String),

    #[error("Undecodable payload: {0}")]
    Decode(String),

    #[error("Interaction failed during capture: {0}")]
    Interaction(#[from] InteractionError),
}

/// Errors from the PDF signing collaborator.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("PDF has no pages")]
    NoPages,

    #[error("Malformed PDF: {0}")]
    Malformed(String),

    #[error("Invalid signature image: {0}")]
    Image(String),
}

/// Result type alias for a run.
pub type Result<T> = std::result::Result<T, Error>;
