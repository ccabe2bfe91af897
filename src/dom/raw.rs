//! Raw page-extraction output
//!
//! The page extractor runs inside the live page and hands back a flat map of
//! nodes plus a root id. The engine never trusts this shape beyond what
//! deserializes cleanly here.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Flat node map produced by one extraction pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDomMap {
    pub root_id: String,
    pub nodes: HashMap<String, RawNode>,
}

/// One raw node: a text leaf or an element.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawNode {
    Text {
        text: String,
        #[serde(default)]
        is_visible: bool,
    },
    Element {
        tag_name: String,
        /// Attribute order matters for fingerprinting, so this is an
        /// ordered map.
        #[serde(default)]
        attributes: BTreeMap<String, String>,
        #[serde(default)]
        children: Vec<String>,
        #[serde(default)]
        is_visible: bool,
        #[serde(default)]
        is_interactive: bool,
        #[serde(default)]
        is_in_viewport: bool,
        #[serde(default)]
        highlight_index: Option<u32>,
        /// Set by the extractor when it could not reach into this iframe;
        /// the engine must request a second, scoped pass for it.
        #[serde(default)]
        iframe_failed: bool,
    },
}

impl RawDomMap {
    /// Ids of element nodes flagged as failed iframe extractions.
    pub fn failed_iframes(&self) -> Vec<String> {
        let mut failed: Vec<String> = self
            .nodes
            .iter()
            .filter_map(|(id, node)| match node {
                RawNode::Element { iframe_failed, .. } if *iframe_failed => Some(id.clone()),
                _ => None,
            })
            .collect();
        failed.sort();
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_extraction() {
        let json = serde_json::json!({
            "root_id": "0",
            "nodes": {
                "0": {"type": "element", "tag_name": "body", "children": ["1"], "is_visible": true},
                "1": {"type": "text", "text": "hello", "is_visible": true}
            }
        });
        let map: RawDomMap = serde_json::from_value(json).unwrap();
        assert_eq!(map.root_id, "0");
        assert_eq!(map.nodes.len(), 2);
        assert!(map.failed_iframes().is_empty());
    }
}
