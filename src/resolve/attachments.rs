//! Locates a message's attachment collection and its PDF entries.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::config::ResolutionConfig;
use crate::dom::{Document, NodeId};
use crate::resolve::sender::is_author_indicator;

/// Ancestor levels searched for a collection following the anchor.
pub const MAX_SUCCESSOR_DEPTH: usize = 10;

/// Ancestor levels searched for a draft marker above a collection.
pub const MAX_DRAFT_DEPTH: usize = 8;

const FALLBACK_NAME: &str = "attachment.pdf";

static PDF_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(.+\.pdf)").expect("valid regex"));

/// One attachment in a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentEntry {
    pub node: NodeId,
    /// Live element handle, for the capture step.
    pub handle: Option<String>,
    pub name: String,
    /// Lowercase extension of `name`, without the dot.
    pub extension: Option<String>,
    pub collection: NodeId,
}

/// `role="listbox"` labelled as attachments.
pub fn is_attachment_collection(doc: &Document, id: NodeId) -> bool {
    let node = doc.node(id);
    node.has_role("listbox")
        && node
            .attr("aria-label")
            .is_some_and(|l| l.to_lowercase().contains("attachment"))
}

/// Entries of `collection` whose text mentions `.pdf`, in display order.
pub fn pdf_entries(doc: &Document, collection: NodeId) -> Vec<AttachmentEntry> {
    doc.find_all(collection, |d, id| {
        d.node(id).has_role("option") && d.text_content(id).to_lowercase().contains(".pdf")
    })
    .into_iter()
    .map(|id| {
        let name = entry_name(&doc.visible_text(id));
        AttachmentEntry {
            node: id,
            handle: doc.handle(id).map(str::to_string),
            extension: name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()),
            name,
            collection,
        }
    })
    .collect()
}

/// Filename an entry displays, which Outlook follows with the size.
pub fn entry_name(text: &str) -> String {
    PDF_NAME_RE
        .captures(text.trim())
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

#[derive(Debug, Clone)]
pub struct AttachmentLocator {
    draft_markers: Vec<String>,
}

impl AttachmentLocator {
    pub fn new(config: &ResolutionConfig) -> Self {
        Self {
            draft_markers: config
                .draft_markers
                .iter()
                .filter(|m| !m.is_empty())
                .cloned()
                .collect(),
        }
    }

    /// Collection for the message headed by `anchor`: the structural
    /// successor if there is one, else the last non-draft collection in the
    /// pane.
    pub fn locate(&self, doc: &Document, pane: NodeId, anchor: NodeId) -> Option<NodeId> {
        if let Some(found) = self.structural_successor(doc, anchor) {
            debug!(strategy = "successor", "Attachment collection located");
            return Some(found);
        }
        let found = self.fallback_scan(doc, pane);
        if found.is_some() {
            debug!(strategy = "fallback", "Attachment collection located");
        }
        found
    }

    /// First non-draft collection after `anchor` inside its nearest
    /// ancestor that has one, stopping before the next message header.
    pub fn structural_successor(&self, doc: &Document, anchor: NodeId) -> Option<NodeId> {
        let root = doc.ancestors(anchor).last().unwrap_or(anchor);
        let boundary = doc
            .descendants(root)
            .find(|id| doc.follows(anchor, *id) && is_author_indicator(doc, *id));

        doc.ancestors(anchor)
            .take(MAX_SUCCESSOR_DEPTH)
            .find_map(|ancestor| {
                doc.descendants(ancestor)
                    .filter(|id| doc.follows(anchor, *id))
                    .take_while(|id| boundary.is_none_or(|b| *id < b))
                    .find(|id| is_attachment_collection(doc, *id) && !self.is_draft(doc, *id))
            })
    }

    /// Collections under `pane` from last to first; first non-draft wins.
    pub fn fallback_scan(&self, doc: &Document, pane: NodeId) -> Option<NodeId> {
        doc.find_all(pane, is_attachment_collection)
            .into_iter()
            .rev()
            .find(|id| !self.is_draft(doc, *id))
    }

    /// Whether a draft marker appears in the own text of any element below
    /// one of the collection's nearest ancestors.
    pub fn is_draft(&self, doc: &Document, collection: NodeId) -> bool {
        // Descendant sets of nested ancestors nest, so the highest one covers all.
        let Some(top) = doc.ancestors(collection).take(MAX_DRAFT_DEPTH).last() else {
            return false;
        };
        doc.descendants(top).any(|id| {
            let text = &doc.node(id).text;
            self.draft_markers.iter().any(|m| text.contains(m.as_str()))
        })
    }
}
