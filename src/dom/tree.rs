//! Arena-backed element tree and selector map
//!
//! Built from the raw extraction map with an explicit work list: nodes are
//! instantiated in pre-order, parent/child links wired as ids are reached,
//! and highlight indices collected into the selector map. Parent links are
//! non-owning arena indices used only for upward queries.

use std::collections::BTreeMap;

use crate::dom::raw::{RawDomMap, RawNode};
use crate::errors::BrowserError;

/// Index of a node inside its tree's arena.
pub type NodeId = usize;

/// Node payload: a text leaf or an element.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Text {
        text: String,
    },
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
        highlight_index: Option<u32>,
        /// Tri-state: `None` until diffed against the previous snapshot.
        is_new: Option<bool>,
    },
}

/// One node in the arena.
#[derive(Debug, Clone)]
pub struct DomNode {
    pub kind: NodeKind,
    pub visible: bool,
    pub interactive: bool,
    pub in_viewport: bool,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl DomNode {
    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            NodeKind::Text { .. } => None,
        }
    }

    pub fn highlight_index(&self) -> Option<u32> {
        match &self.kind {
            NodeKind::Element {
                highlight_index, ..
            } => *highlight_index,
            NodeKind::Text { .. } => None,
        }
    }

    pub fn attributes(&self) -> Option<&BTreeMap<String, String>> {
        match &self.kind {
            NodeKind::Element { attributes, .. } => Some(attributes),
            NodeKind::Text { .. } => None,
        }
    }

    pub fn is_new(&self) -> Option<bool> {
        match &self.kind {
            NodeKind::Element { is_new, .. } => *is_new,
            NodeKind::Text { .. } => None,
        }
    }
}

/// Element tree for one page snapshot.
///
/// The selector map (highlight index → node) is only valid for the snapshot
/// this tree was built from; indices must never be reused across
/// navigations.
#[derive(Debug, Clone)]
pub struct DomTree {
    nodes: Vec<DomNode>,
    root: NodeId,
    selector_map: BTreeMap<u32, NodeId>,
}

impl DomTree {
    /// Build a tree from a raw extraction map.
    pub fn from_raw(raw: &RawDomMap) -> Result<Self, BrowserError> {
        let mut tree = Self {
            nodes: Vec::with_capacity(raw.nodes.len()),
            root: 0,
            selector_map: BTreeMap::new(),
        };
        tree.root = tree.build_subtree(raw, &raw.root_id, None)?;
        Ok(tree)
    }

    /// Graft a scoped second-pass extraction under an existing node.
    /// Used when the first pass reported a failed iframe.
    pub fn graft(&mut self, raw: &RawDomMap, at: NodeId) -> Result<(), BrowserError> {
        self.build_subtree(raw, &raw.root_id, Some(at))?;
        Ok(())
    }

    /// Instantiate and wire one raw subtree in a single pre-order walk off
    /// an explicit work list. The raw map comes from the live page, so no
    /// recursion (arbitrarily deep trees) and no trust in its shape: a raw
    /// id reached twice is rejected as a cycle.
    fn build_subtree(
        &mut self,
        raw: &RawDomMap,
        root_raw_id: &str,
        parent: Option<NodeId>,
    ) -> Result<NodeId, BrowserError> {
        let root_arena_id = self.nodes.len();
        let mut visited: std::collections::HashSet<&str> = std::collections::HashSet::new();
        let mut work: Vec<(&str, Option<NodeId>)> = vec![(root_raw_id, parent)];

        while let Some((raw_id, parent)) = work.pop() {
            if !visited.insert(raw_id) {
                return Err(BrowserError::Extraction(format!(
                    "cycle in raw node map at id {raw_id}"
                )));
            }
            let raw_node = raw
                .nodes
                .get(raw_id)
                .ok_or_else(|| BrowserError::Extraction(format!("missing raw node id {raw_id}")))?;

            let id = self.nodes.len();
            if let Some(parent) = parent {
                self.nodes[parent].children.push(id);
            }
            match raw_node {
                RawNode::Text { text, is_visible } => {
                    self.nodes.push(DomNode {
                        kind: NodeKind::Text { text: text.clone() },
                        visible: *is_visible,
                        interactive: false,
                        in_viewport: false,
                        parent,
                        children: Vec::new(),
                    });
                }
                RawNode::Element {
                    tag_name,
                    attributes,
                    children,
                    is_visible,
                    is_interactive,
                    is_in_viewport,
                    highlight_index,
                    ..
                } => {
                    self.nodes.push(DomNode {
                        kind: NodeKind::Element {
                            tag: tag_name.clone(),
                            attributes: attributes.clone(),
                            highlight_index: *highlight_index,
                            is_new: None,
                        },
                        visible: *is_visible,
                        interactive: *is_interactive,
                        in_viewport: *is_in_viewport,
                        parent,
                        children: Vec::new(),
                    });
                    if let Some(index) = highlight_index {
                        self.selector_map.insert(*index, id);
                    }
                    // Reverse push keeps pre-order arena allocation, which
                    // scoped-graft position lookup replays.
                    for child_raw in children.iter().rev() {
                        work.push((child_raw, Some(id)));
                    }
                }
            }
        }
        Ok(root_arena_id)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &DomNode {
        &self.nodes[id]
    }

    pub fn selector_map(&self) -> &BTreeMap<u32, NodeId> {
        &self.selector_map
    }

    /// Resolve a highlight index against this snapshot's selector map.
    pub fn element_by_index(&self, index: u32) -> Option<NodeId> {
        self.selector_map.get(&index).copied()
    }

    /// Tag-name chain from the tree root down to (and including) this node.
    pub fn ancestor_tags(&self, id: NodeId) -> Vec<String> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if let Some(tag) = self.nodes[current].tag() {
                chain.push(tag.to_string());
            }
            cursor = self.nodes[current].parent;
        }
        chain.reverse();
        chain
    }

    /// Structural path string: per level, the tag plus its position among
    /// same-tag element siblings, e.g. `html[0]/div[1]/a[0]`.
    pub fn structural_path(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if let Some(tag) = self.nodes[current].tag() {
                let position = match self.nodes[current].parent {
                    Some(parent) => self.nodes[parent]
                        .children
                        .iter()
                        .filter(|&&sibling| self.nodes[sibling].tag() == Some(tag))
                        .position(|&sibling| sibling == current)
                        .unwrap_or(0),
                    None => 0,
                };
                segments.push(format!("{tag}[{position}]"));
            }
            cursor = self.nodes[current].parent;
        }
        segments.reverse();
        segments.join("/")
    }

    /// Ids of visible clickable elements, in document order.
    ///
    /// Iterative traversal with an explicit stack: deep trees must not
    /// exhaust the call stack.
    pub fn clickable_elements(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if node.visible && node.highlight_index().is_some() {
                out.push(id);
            }
            // Reverse push keeps document order on pop.
            for &child in node.children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Visible text under a node, stopping before any nested clickable
    /// element (its text belongs to that element's own entry).
    pub fn text_until_next_clickable(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[id].children.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            let node = &self.nodes[current];
            if node.highlight_index().is_some() {
                continue;
            }
            if let NodeKind::Text { text } = &node.kind
                && node.visible
            {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
            for &child in node.children.iter().rev() {
                stack.push(child);
            }
        }
        parts.join(" ")
    }

    pub(crate) fn set_is_new(&mut self, id: NodeId, value: bool) {
        if let NodeKind::Element { is_new, .. } = &mut self.nodes[id].kind {
            *is_new = Some(value);
        }
    }

    /// Render the indexed element list shown to the navigator, one line per
    /// selector-map entry. New elements get a `*` prefix.
    pub fn render_clickable_elements(&self) -> String {
        let mut lines = Vec::with_capacity(self.selector_map.len());
        for (&index, &id) in &self.selector_map {
            let node = &self.nodes[id];
            let tag = node.tag().unwrap_or("unknown");
            let mut attrs = String::new();
            if let Some(map) = node.attributes() {
                for key in ["role", "type", "name", "placeholder", "aria-label", "href"] {
                    if let Some(value) = map.get(key) {
                        attrs.push_str(&format!(" {key}={value:?}"));
                    }
                }
            }
            let text = self.text_until_next_clickable(id);
            let marker = if node.is_new() == Some(true) { "*" } else { "" };
            lines.push(format!("{marker}[{index}]<{tag}{attrs}>{text}</{tag}>"));
        }
        lines.join("\n")
    }
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::simple_page;
    use super::*;

    #[test]
    fn builds_tree_and_selector_map() {
        let tree = DomTree::from_raw(&simple_page()).unwrap();
        assert_eq!(tree.selector_map().len(), 2);
        let a = tree.element_by_index(0).unwrap();
        assert_eq!(tree.node(a).tag(), Some("a"));
        assert_eq!(tree.node(a).parent, Some(tree.root()));
    }

    #[test]
    fn structural_path_counts_same_tag_siblings() {
        let tree = DomTree::from_raw(&simple_page()).unwrap();
        let button = tree.element_by_index(1).unwrap();
        assert_eq!(tree.structural_path(button), "body[0]/div[0]/button[0]");
    }

    #[test]
    fn clickable_traversal_is_document_ordered() {
        let tree = DomTree::from_raw(&simple_page()).unwrap();
        let clickable = tree.clickable_elements();
        let indices: Vec<u32> = clickable
            .iter()
            .map(|&id| tree.node(id).highlight_index().unwrap())
            .collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn text_collection_stops_at_nested_clickables() {
        let tree = DomTree::from_raw(&simple_page()).unwrap();
        let button = tree.element_by_index(1).unwrap();
        assert_eq!(tree.text_until_next_clickable(button), "Send");

        let rendered = tree.render_clickable_elements();
        assert!(rendered.contains("[0]<a"));
        assert!(rendered.contains("Home"));
        assert!(rendered.contains("[1]<button"));
    }

    #[test]
    fn missing_child_id_is_an_extraction_error() {
        let mut raw = simple_page();
        raw.nodes.remove("bt");
        let err = DomTree::from_raw(&raw).unwrap_err();
        assert!(matches!(err, BrowserError::Extraction(_)));
    }

    #[test]
    fn deep_nesting_does_not_exhaust_the_stack() {
        let depth = 200_000;
        let mut nodes = std::collections::HashMap::with_capacity(depth);
        for i in 0..depth {
            let children = if i + 1 < depth {
                vec![(i + 1).to_string()]
            } else {
                vec![]
            };
            nodes.insert(
                i.to_string(),
                RawNode::Element {
                    tag_name: "div".into(),
                    attributes: BTreeMap::new(),
                    children,
                    is_visible: true,
                    is_interactive: false,
                    is_in_viewport: false,
                    highlight_index: None,
                    iframe_failed: false,
                },
            );
        }
        let raw = RawDomMap {
            root_id: "0".into(),
            nodes,
        };
        let tree = DomTree::from_raw(&raw).unwrap();
        assert_eq!(tree.len(), depth);
    }

    #[test]
    fn cyclic_raw_map_is_an_extraction_error() {
        let mut raw = simple_page();
        // Point the button's child back at the body.
        if let Some(RawNode::Element { children, .. }) = raw.nodes.get_mut("b") {
            *children = vec!["r".into()];
        }
        let err = DomTree::from_raw(&raw).unwrap_err();
        assert!(matches!(err, BrowserError::Extraction(ref m) if m.contains("cycle")));
    }
}
