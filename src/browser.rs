//! Browser driver and page extractor collaborator contracts
//!
//! The engine never touches a real browser: everything behind these traits
//! is an external collaborator. The driver must raise
//! `BrowserError::NavigationNotAllowed` when a URL fails its allow/deny
//! policy; the engine treats that as fatal and never retries it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dom::{
    DomTree, FingerprintCache, RawDomMap,
};
use crate::errors::{BrowserError, BrowserResult};

/// One open tab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: i64,
    pub url: String,
    pub title: String,
}

/// Scroll position of the current page.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScrollInfo {
    pub pixels_above: u64,
    pub pixels_below: u64,
}

/// Reference to a concrete element, resolved from the current snapshot's
/// selector map. Only valid against the snapshot it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementRef {
    pub highlight_index: u32,
    pub tag: String,
    pub structural_path: String,
}

/// Immutable state of the page at one instant: the element tree, its
/// selector map, and the fingerprint cache that must die with it.
pub struct PageSnapshot {
    pub tree: DomTree,
    pub url: String,
    pub title: String,
    pub tabs: Vec<TabInfo>,
    pub scroll: ScrollInfo,
    /// Base64 screenshot, present when vision was requested.
    pub screenshot: Option<String>,
    pub fingerprints: FingerprintCache,
}

impl PageSnapshot {
    /// Resolve a highlight index to an element reference, rejecting stale
    /// or unknown indices.
    pub fn resolve(&self, index: u32) -> Option<ElementRef> {
        let id = self.tree.element_by_index(index)?;
        Some(ElementRef {
            highlight_index: index,
            tag: self.tree.node(id).tag().unwrap_or("unknown").to_string(),
            structural_path: self.tree.structural_path(id),
        })
    }
}

/// Options for one extraction pass.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub viewport_only: bool,
    /// When set, extraction is scoped to the iframe identified by this raw
    /// node id (second pass after an iframe failure marker).
    pub frame_scope: Option<String>,
}

/// Black-box routine running inside the live page, returning a flat node
/// map plus root id.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn extract(&self, options: &ExtractOptions) -> BrowserResult<RawDomMap>;
}

/// Build an element tree from one extraction pass, requesting a scoped
/// second pass for every iframe the first pass failed on. Second-pass
/// failures are logged and skipped; one broken frame must not sink the
/// snapshot.
pub async fn extract_tree(
    extractor: &dyn PageExtractor,
    options: &ExtractOptions,
) -> Result<DomTree, BrowserError> {
    let raw = extractor.extract(options).await?;
    let mut tree = DomTree::from_raw(&raw)?;

    for frame_id in raw.failed_iframes() {
        let scoped = ExtractOptions {
            viewport_only: options.viewport_only,
            frame_scope: Some(frame_id.clone()),
        };
        match extractor.extract(&scoped).await {
            Ok(frame_raw) => {
                // The failed marker node keeps its arena position; the
                // scoped subtree is grafted underneath it.
                if let Some(at) = find_raw_position(&raw, &tree, &frame_id) {
                    tree.graft(&frame_raw, at)?;
                }
            }
            Err(e) => {
                tracing::warn!(frame = %frame_id, error = %e, "scoped iframe extraction failed");
            }
        }
    }
    Ok(tree)
}

/// Locate the arena node built from a given raw id by replaying the build
/// order (depth-first over children lists, same order as `from_raw`).
fn find_raw_position(raw: &RawDomMap, tree: &DomTree, target: &str) -> Option<usize> {
    let mut order = Vec::new();
    let mut stack = vec![raw.root_id.as_str()];
    // Depth-first pre-order matches arena allocation order.
    while let Some(id) = stack.pop() {
        order.push(id);
        if let Some(crate::dom::RawNode::Element { children, .. }) = raw.nodes.get(id) {
            for child in children.iter().rev() {
                stack.push(child.as_str());
            }
        }
    }
    order
        .iter()
        .position(|&id| id == target)
        .filter(|&pos| pos < tree.len())
}

/// Abstract browser driver: tab lifecycle, navigation and element
/// interaction. Implementations own all network and process concerns.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate_to(&self, url: &str) -> BrowserResult<()>;

    /// Take a fresh page snapshot. The previous snapshot's selector map and
    /// fingerprint cache must be discarded by the caller.
    async fn get_state(&self, use_vision: bool) -> BrowserResult<PageSnapshot>;

    async fn click(&self, element: &ElementRef) -> BrowserResult<()>;

    async fn input_text(&self, element: &ElementRef, text: &str) -> BrowserResult<()>;

    /// Scroll vertically by `delta_y` pixels (negative scrolls up).
    async fn scroll(&self, delta_y: i64) -> BrowserResult<()>;

    async fn get_dropdown_options(&self, element: &ElementRef) -> BrowserResult<Vec<String>>;

    async fn select_dropdown_option(&self, element: &ElementRef, text: &str) -> BrowserResult<()>;

    async fn list_tabs(&self) -> BrowserResult<Vec<TabInfo>>;

    async fn switch_tab(&self, tab_id: i64) -> BrowserResult<()>;

    async fn open_tab(&self, url: &str) -> BrowserResult<()>;

    async fn close_tab(&self, tab_id: i64) -> BrowserResult<()>;
}
