//! Owned snapshot of the live document.
//!
//! The page serializes a subtree with [`SNAPSHOT_SCRIPT`]; every element is
//! stamped with a `data-mailsign-id` so that a [`Node::handle`] can later be
//! turned back into a live element with [`handle_selector`].

pub mod document;

pub use document::{Document, Node, NodeId, SnapshotNode};

/// Attribute the snapshot script stamps on every element it visits.
pub const HANDLE_ATTR: &str = "data-mailsign-id";

/// Page-side serializer. Evaluates to a function taking a CSS selector and
/// returning the JSON of the first matching subtree, or `null`.
pub const SNAPSHOT_SCRIPT: &str = include_str!("snapshot.js");

/// CSS selector addressing the live element behind a snapshot handle.
pub fn handle_selector(handle: &str) -> String {
    format!("[{HANDLE_ATTR}=\"{handle}\"]")
}

/// Expression evaluating the snapshot of `root_selector` to a JSON string.
pub fn snapshot_expression(root_selector: &str) -> String {
    // serde_json string output is a valid JS string literal.
    let selector = serde_json::Value::String(root_selector.to_string());
    format!("({SNAPSHOT_SCRIPT})({selector})")
}
