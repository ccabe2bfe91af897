//! Structural element fingerprints and snapshot diffing
//!
//! A fingerprint identifies "the same element across steps" structurally:
//! ancestor tag chain, own attributes, and structural path. Content never
//! participates, so counters and timestamps cannot defeat identity.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

use crate::dom::tree::{DomTree, NodeId};

fn sha_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Per-snapshot fingerprint memo. The same node's fingerprint is queried by
/// multiple consumers within one step; it must be computed once. The cache
/// is owned by the snapshot and dies with it.
#[derive(Debug, Default)]
pub struct FingerprintCache {
    by_node: HashMap<NodeId, String>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint of one element node, memoized.
    ///
    /// Hash of three independently hashed parts, concatenated: ancestor tag
    /// chain (root→node), attribute set as `key=value` in map order, and the
    /// structural path string.
    pub fn fingerprint(&mut self, tree: &DomTree, id: NodeId) -> String {
        if let Some(cached) = self.by_node.get(&id) {
            return cached.clone();
        }

        let chain = tree.ancestor_tags(id).join(">");
        let attributes = tree
            .node(id)
            .attributes()
            .map(|map| {
                map.iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let path = tree.structural_path(id);

        let combined = format!(
            "{}-{}-{}",
            sha_hex(&chain),
            sha_hex(&attributes),
            sha_hex(&path)
        );
        let fingerprint = sha_hex(&combined);
        self.by_node.insert(id, fingerprint.clone());
        fingerprint
    }
}

/// Fingerprints of every visible clickable element in the tree.
pub fn clickable_fingerprints(tree: &DomTree, cache: &mut FingerprintCache) -> HashSet<String> {
    tree.clickable_elements()
        .into_iter()
        .map(|id| cache.fingerprint(tree, id))
        .collect()
}

/// Mark every clickable element of the new tree with `is_new`, diffed
/// against the previous step's fingerprint set. `None` for the previous set
/// (first snapshot) marks everything as not-new. Linear in visible-element
/// count.
pub fn mark_new_elements(
    tree: &mut DomTree,
    previous: Option<&HashSet<String>>,
    cache: &mut FingerprintCache,
) {
    for id in tree.clickable_elements() {
        let is_new = match previous {
            Some(set) => !set.contains(&cache.fingerprint(tree, id)),
            None => false,
        };
        tree.set_is_new(id, is_new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::raw::RawDomMap;
    use crate::dom::tree::test_fixtures::simple_page;

    fn with_extra_link() -> RawDomMap {
        let mut raw = simple_page();
        // Insert a second link as a new sibling under body.
        raw.nodes.insert(
            "a2".to_string(),
            serde_json::from_value(serde_json::json!({
                "type": "element", "tag_name": "a",
                "attributes": {"href": "/about"},
                "children": [], "is_visible": true, "is_interactive": true,
                "is_in_viewport": true, "highlight_index": 2
            }))
            .unwrap(),
        );
        if let crate::dom::raw::RawNode::Element { children, .. } =
            raw.nodes.get_mut("r").unwrap()
        {
            children.push("a2".to_string());
        }
        raw
    }

    #[test]
    fn unchanged_page_yields_identical_fingerprints() {
        let tree_a = DomTree::from_raw(&simple_page()).unwrap();
        let tree_b = DomTree::from_raw(&simple_page()).unwrap();
        let mut cache_a = FingerprintCache::new();
        let mut cache_b = FingerprintCache::new();

        assert_eq!(
            clickable_fingerprints(&tree_a, &mut cache_a),
            clickable_fingerprints(&tree_b, &mut cache_b)
        );
    }

    #[test]
    fn fingerprint_is_cached_per_node() {
        let tree = DomTree::from_raw(&simple_page()).unwrap();
        let mut cache = FingerprintCache::new();
        let id = tree.element_by_index(0).unwrap();
        let first = cache.fingerprint(&tree, id);
        let second = cache.fingerprint(&tree, id);
        assert_eq!(first, second);
    }

    #[test]
    fn only_inserted_sibling_is_marked_new() {
        let old_tree = DomTree::from_raw(&simple_page()).unwrap();
        let mut old_cache = FingerprintCache::new();
        let previous = clickable_fingerprints(&old_tree, &mut old_cache);

        let mut new_tree = DomTree::from_raw(&with_extra_link()).unwrap();
        let mut new_cache = FingerprintCache::new();
        mark_new_elements(&mut new_tree, Some(&previous), &mut new_cache);

        let by_index = |i: u32| {
            let id = new_tree.element_by_index(i).unwrap();
            new_tree.node(id).is_new()
        };
        assert_eq!(by_index(0), Some(false));
        assert_eq!(by_index(1), Some(false));
        assert_eq!(by_index(2), Some(true));
    }

    #[test]
    fn first_snapshot_marks_nothing_new() {
        let mut tree = DomTree::from_raw(&simple_page()).unwrap();
        let mut cache = FingerprintCache::new();
        mark_new_elements(&mut tree, None, &mut cache);
        for (_, &id) in tree.selector_map() {
            assert_eq!(tree.node(id).is_new(), Some(false));
        }
    }
}
