use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Serialized element tree as produced by the page-side snapshot script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    /// Direct text children only, concatenated.
    #[serde(default)]
    pub text: String,
    /// Computed `cursor: pointer`.
    #[serde(default)]
    pub clickable: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub children: Vec<SnapshotNode>,
}

impl SnapshotNode {
    pub fn element(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn role(self, role: &str) -> Self {
        self.attr("role", role)
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text.push_str(text);
        self
    }

    pub fn child(mut self, child: SnapshotNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = SnapshotNode>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn clickable(mut self) -> Self {
        self.clickable = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn checked(mut self) -> Self {
        self.checked = true;
        self
    }

    pub fn handle(mut self, handle: &str) -> Self {
        self.handle = Some(handle.to_string());
        self
    }
}

/// Index of a node in a [`Document`]. Ordering follows document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub text: String,
    pub clickable: bool,
    pub hidden: bool,
    pub checked: bool,
    pub handle: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// One past the last descendant's index.
    end: usize,
}

impl Node {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn role(&self) -> Option<&str> {
        self.attr("role")
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role() == Some(role)
    }

    /// `<button>` or an explicit `role="button"`.
    pub fn is_button(&self) -> bool {
        self.tag == "button" || self.has_role("button")
    }
}

/// Flattened element tree stored in preorder.
///
/// Because nodes are stored in preorder, a node's descendants occupy the
/// contiguous index range right after it, and "follows in document order
/// and is not a descendant" is a single comparison.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub fn from_snapshot(root: SnapshotNode) -> Self {
        let mut nodes = Vec::new();
        Self::push(&mut nodes, root, None);
        Self { nodes }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let root: SnapshotNode = serde_json::from_str(json)?;
        Ok(Self::from_snapshot(root))
    }

    fn push(nodes: &mut Vec<Node>, snap: SnapshotNode, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(nodes.len());
        nodes.push(Node {
            tag: snap.tag,
            attrs: snap.attrs,
            text: snap.text,
            clickable: snap.clickable,
            hidden: snap.hidden,
            checked: snap.checked,
            handle: snap.handle,
            parent,
            children: Vec::with_capacity(snap.children.len()),
            end: id.0 + 1,
        });
        for child in snap.children {
            let child_id = Self::push(nodes, child, Some(id));
            nodes[id.0].children.push(child_id);
        }
        nodes[id.0].end = nodes.len();
        id
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Ancestors from nearest to the root, excluding `id` itself.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), |n| self.parent(*n))
    }

    /// Descendants in document order, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> impl DoubleEndedIterator<Item = NodeId> + use<> {
        (id.0 + 1..self.node(id).end).map(NodeId)
    }

    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        node.0 > ancestor.0 && node.0 < self.node(ancestor).end
    }

    /// True when `node` comes after `anchor` in document order and is not
    /// inside it (the XPath `following` axis).
    pub fn follows(&self, anchor: NodeId, node: NodeId) -> bool {
        node.0 >= self.node(anchor).end
    }

    /// Concatenated text of the node and all descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        let end = self.node(id).end;
        self.nodes[id.0..end]
            .iter()
            .map(|n| n.text.as_str())
            .collect()
    }

    /// Trimmed [`text_content`](Self::text_content).
    pub fn visible_text(&self, id: NodeId) -> String {
        self.text_content(id).trim().to_string()
    }

    /// Loose accessible-name match: case-insensitive substring of the
    /// `aria-label`, the text content, or the `name` attribute.
    pub fn matches_name(&self, id: NodeId, needle: &str) -> bool {
        let node = self.node(id);
        let needle = needle.to_lowercase();
        let hay = [
            node.attr("aria-label").unwrap_or_default().to_string(),
            self.text_content(id),
            node.attr("name").unwrap_or_default().to_string(),
        ]
        .join(" ")
        .to_lowercase();
        hay.contains(&needle)
    }

    /// First descendant of `scope` (excluding `scope`) satisfying `pred`.
    pub fn find_first(
        &self,
        scope: NodeId,
        mut pred: impl FnMut(&Self, NodeId) -> bool,
    ) -> Option<NodeId> {
        self.descendants(scope).find(|id| pred(self, *id))
    }

    /// All descendants of `scope` satisfying `pred`, in document order.
    pub fn find_all(
        &self,
        scope: NodeId,
        mut pred: impl FnMut(&Self, NodeId) -> bool,
    ) -> Vec<NodeId> {
        self.descendants(scope).filter(|id| pred(self, *id)).collect()
    }

    /// Last descendant of `scope` satisfying `pred`.
    pub fn find_last(
        &self,
        scope: NodeId,
        mut pred: impl FnMut(&Self, NodeId) -> bool,
    ) -> Option<NodeId> {
        self.descendants(scope).rev().find(|id| pred(self, *id))
    }

    /// Visible element with `role` whose accessible name contains `name`.
    pub fn find_by_role(&self, scope: NodeId, role: &str, name: &str) -> Option<NodeId> {
        self.find_first(scope, |doc, id| {
            let node = doc.node(id);
            !node.hidden && node.has_role(role) && doc.matches_name(id, name)
        })
    }

    /// Visible button (by tag or role) whose accessible name contains `name`.
    pub fn find_button(&self, scope: NodeId, name: &str) -> Option<NodeId> {
        self.find_first(scope, |doc, id| {
            let node = doc.node(id);
            !node.hidden && node.is_button() && doc.matches_name(id, name)
        })
    }

    pub fn handle(&self, id: NodeId) -> Option<&str> {
        self.node(id).handle.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        // div
        //   p "a"
        //     span "b"
        //   ul
        //     li "c"
        //   button[aria-label="Reply"]
        Document::from_snapshot(
            SnapshotNode::element("div")
                .child(SnapshotNode::element("p").text("a").child(SnapshotNode::element("span").text("b")))
                .child(SnapshotNode::element("ul").child(SnapshotNode::element("li").text("c")))
                .child(SnapshotNode::element("button").attr("aria-label", "Reply").handle("7")),
        )
    }

    #[test]
    fn preorder_layout() {
        let doc = sample();
        assert_eq!(doc.len(), 6);
        let tags: Vec<_> = (0..doc.len()).map(|i| doc.node(NodeId(i)).tag.as_str()).collect();
        assert_eq!(tags, ["div", "p", "span", "ul", "li", "button"]);
        assert_eq!(doc.children(doc.root()), &[NodeId(1), NodeId(3), NodeId(5)]);
        assert_eq!(doc.parent(NodeId(2)), Some(NodeId(1)));
    }

    #[test]
    fn ancestors_nearest_first() {
        let doc = sample();
        let chain: Vec<_> = doc.ancestors(NodeId(2)).collect();
        assert_eq!(chain, [NodeId(1), NodeId(0)]);
        assert_eq!(doc.ancestors(doc.root()).count(), 0);
    }

    #[test]
    fn following_excludes_descendants() {
        let doc = sample();
        let p = NodeId(1);
        assert!(!doc.follows(p, NodeId(2)));
        assert!(doc.follows(p, NodeId(3)));
        assert!(doc.follows(p, NodeId(4)));
        assert!(!doc.follows(NodeId(3), p));
        assert!(doc.contains(p, NodeId(2)));
        assert!(!doc.contains(p, NodeId(3)));
    }

    #[test]
    fn text_content_includes_descendants() {
        let doc = sample();
        assert_eq!(doc.text_content(NodeId(1)), "ab");
        assert_eq!(doc.text_content(doc.root()), "abc");
    }

    #[test]
    fn name_matching_is_loose() {
        let doc = sample();
        let button = doc.find_button(doc.root(), "reply").unwrap();
        assert_eq!(doc.handle(button), Some("7"));
        assert!(doc.find_button(doc.root(), "forward").is_none());
    }

    #[test]
    fn decodes_script_json() {
        let json = r#"{"tag":"div","attrs":{"role":"main"},"text":"","clickable":false,
            "hidden":false,"checked":false,"handle":"1",
            "children":[{"tag":"span","attrs":{},"text":"hi","handle":"2","children":[]}]}"#;
        let doc = Document::from_json(json).unwrap();
        assert!(doc.node(doc.root()).has_role("main"));
        assert_eq!(doc.visible_text(doc.root()), "hi");
        assert_eq!(doc.handle(NodeId(1)), Some("2"));
    }
}
