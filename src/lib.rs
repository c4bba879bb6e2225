//! mailsign: signs PDF attachments received in Outlook Web and prepares
//! reply drafts carrying the signed copies.

pub mod browser;
pub mod capture;
pub mod config;
pub mod diagnostics;
pub mod dom;
pub mod error;
pub mod resolve;
pub mod signing;
pub mod workflow;
