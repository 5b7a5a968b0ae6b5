//! Descent from root to leaf, recording the full path so callers (split,
//! delete, cursors) can walk back up to rewrite parent pointers.

use crate::access::PageReader;
use crate::btree::comparator::compare_keys;
use crate::error::{Error, Result};
use crate::geometry::TreeFlags;
use crate::node::NodeAccessor;
use crate::page::{self, PageKind};
use std::cmp::Ordering;
use std::convert::TryInto;

#[derive(Debug, Clone, Copy)]
pub struct PathEntry {
    pub page_id: u64,
    pub index: usize,
}

/// Descends from `root` to the leaf that would contain `key`, recording
/// every `(page_id, child_index)` step taken. Returns the path (root...leaf,
/// inclusive) and whether the final leaf slot is an exact match.
pub fn descend<R: PageReader>(
    pages: &R,
    flags: TreeFlags,
    root: u64,
    key: &[u8],
) -> Result<(Vec<PathEntry>, bool)> {
    let mut path = Vec::new();
    let mut page_id = root;
    loop {
        let bytes = pages.read(page_id)?;
        let header = page::read_header(&bytes)?;
        match header.kind {
            PageKind::Branch => {
                let idx = branch_child_index(&bytes, flags, key);
                let child = child_page_id(&bytes, idx);
                path.push(PathEntry { page_id, index: idx });
                page_id = child;
            }
            PageKind::Leaf | PageKind::SubTreeLeaf => {
                let (idx, exact) = leaf_search(&bytes, flags, key);
                path.push(PathEntry { page_id, index: idx });
                return Ok((path, exact));
            }
            other => return Err(Error::Corrupt(format!("unexpected page kind {other:?} while descending"))),
        }
    }
}

/// Binary search over a branch page's separator keys. Node 0's key is a
/// placeholder (its child covers every key less than node 1's separator);
/// returns the index of the node whose child subtree should be descended
/// into.
pub fn branch_child_index(bytes: &[u8], flags: TreeFlags, key: &[u8]) -> usize {
    let count = crate::node::slot_count(bytes);
    if count <= 1 {
        return 0;
    }
    let mut lo = 1usize;
    let mut hi = count;
    while lo < hi {
        let mid = (lo + hi) / 2;
        let node_key = NodeAccessor::at_slot(bytes, mid).key().to_vec();
        if compare_keys(flags, &node_key, key) != Ordering::Greater {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo - 1
}

pub fn child_page_id(bytes: &[u8], index: usize) -> u64 {
    let acc = NodeAccessor::at_slot(bytes, index);
    u64::from_le_bytes(acc.raw_value().try_into().unwrap())
}

/// Binary search over a leaf page's keys. Returns the insertion index and
/// whether that index is an exact match.
pub fn leaf_search(bytes: &[u8], flags: TreeFlags, key: &[u8]) -> (usize, bool) {
    let count = crate::node::slot_count(bytes);
    let mut lo = 0usize;
    let mut hi = count;
    while lo < hi {
        let mid = (lo + hi) / 2;
        let node_key = NodeAccessor::at_slot(bytes, mid).key().to_vec();
        if compare_keys(flags, &node_key, key) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    let exact = lo < count && {
        let node_key = NodeAccessor::at_slot(bytes, lo).key().to_vec();
        compare_keys(flags, &node_key, key) == Ordering::Equal
    };
    (lo, exact)
}
