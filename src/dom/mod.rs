//! Element identity engine: raw extraction map → arena tree, selector map,
//! and structural fingerprints diffed across snapshots.

mod fingerprint;
mod raw;
mod tree;

pub use fingerprint::{FingerprintCache, clickable_fingerprints, mark_new_elements};
pub use raw::{RawDomMap, RawNode};
pub use tree::{DomNode, DomTree, NodeId, NodeKind};
