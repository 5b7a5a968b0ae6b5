//! Duplicate-sort value sets: every value under a dup-sort key is kept
//! sorted, and a single key can hold any number of them.
//!
//! Two representations share a leaf node's value slot:
//! - **Sub-page**: a miniature slot array of sorted duplicate values,
//!   stored inline and rewritten wholesale on every change.
//! - **Sub-tree**: a promoted, independent B+tree whose root/depth/counts
//!   live in the node's value in place of the inline blob, used once the
//!   sub-page would outgrow the parent leaf's budget.
//!
//! Sub-tree duplicates are stored as *keys* with empty values, so their
//! maximum size is the enclosing geometry's max key size rather than a
//! separately tracked max-value size.

use crate::alloc::Allocator;
use crate::btree::comparator::compare_dup_values;
use crate::btree::search::leaf_search;
use crate::error::Result;
use crate::geometry::TreeFlags;
use crate::node::{self, NodeFlags, SUB_TREE_HEADER_SIZE};
use crate::page::{self, Header, PageKind};
use std::convert::TryInto;

/// Parses a sub-page blob into its sorted duplicate values.
pub fn sub_page_values(blob: &[u8]) -> Vec<Vec<u8>> {
    node::iter_nodes(blob).map(|acc| acc.key().to_vec()).collect()
}

/// Serializes a sorted duplicate list into a compact sub-page blob: a
/// standalone node slot array sized to exactly fit `values`, with no
/// absolute page offsets (it is relocated wholesale into the parent node's
/// value slot, not addressed by page id).
pub fn build_sub_page(values: &[Vec<u8>]) -> Vec<u8> {
    let size = compact_sub_page_size(values);
    let mut buf = vec![0u8; size];
    page::write_header(
        &mut buf,
        &Header { page_id: 0, kind: PageKind::SubTreeLeaf, lower: page::HEADER_SIZE as u16, upper: size as u16, txn_id: 0 },
    );
    for (i, v) in values.iter().enumerate() {
        node::write_node(&mut buf, i, v, &[], 0, NodeFlags::NONE).expect("sub-page sized to fit by construction");
    }
    buf
}

/// Size in bytes a sub-page holding `values` would occupy if built fresh
/// (a compact slot array with no gaps, unlike the live page representation
/// whose header carries absolute offsets).
fn compact_sub_page_size(values: &[Vec<u8>]) -> usize {
    page::HEADER_SIZE
        + values.iter().map(|v| node::SLOT_SIZE + node::encoded_size(v.len(), 0)).sum::<usize>()
}

pub const SUB_PAGE_BUDGET_FRACTION: usize = 2; // sub-page may use up to half the parent leaf body

/// Whether `values`, inline, would still fit the budget reserved for a
/// dup-sort node inside a leaf of `page_size` bytes.
pub fn fits_sub_page(values: &[Vec<u8>], page_size: usize) -> bool {
    compact_sub_page_size(values) <= (page_size - page::HEADER_SIZE) / SUB_PAGE_BUDGET_FRACTION
}

/// Inserts `value` into a sorted duplicate list, returning `true` if it was
/// newly added (`false` if already present — the no_dup_data case).
pub fn insert_sorted(flags: TreeFlags, values: &mut Vec<Vec<u8>>, value: Vec<u8>) -> bool {
    match values.binary_search_by(|v| compare_dup_values(flags, v, &value)) {
        Ok(_) => false,
        Err(idx) => {
            values.insert(idx, value);
            true
        }
    }
}

pub fn remove_value(flags: TreeFlags, values: &mut Vec<Vec<u8>>, value: &[u8]) -> bool {
    if let Ok(idx) = values.binary_search_by(|v| compare_dup_values(flags, v, value)) {
        values.remove(idx);
        true
    } else {
        false
    }
}

/// Promotes an inline sub-page into a dedicated sub-tree: allocates one
/// fresh leaf page, moves every duplicate into it (as keys with empty
/// values), and returns the `{root, depth, leaf_count, entry_count}` header
/// bytes to store in the parent node's value slot.
pub fn promote(alloc: &Allocator, values: &[Vec<u8>]) -> Result<Vec<u8>> {
    let page_size = alloc.page_size();
    let root = alloc.allocate(1)?[0];
    {
        let mut buf = alloc.write_mut(root)?;
        page::write_header(
            &mut buf,
            &Header { page_id: root, kind: PageKind::SubTreeLeaf, lower: page::HEADER_SIZE as u16, upper: page_size as u16, txn_id: alloc.txn_id() },
        );
        for (i, v) in values.iter().enumerate() {
            node::write_node(&mut buf, i, v, &[], 0, NodeFlags::NONE)?;
        }
    }
    Ok(encode_sub_tree_header(root, 1, 1, values.len() as u64))
}

pub fn encode_sub_tree_header(root: u64, depth: u16, leaf_pages: u64, entries: u64) -> Vec<u8> {
    let mut out = vec![0u8; SUB_TREE_HEADER_SIZE];
    out[0..8].copy_from_slice(&root.to_le_bytes());
    out[8..10].copy_from_slice(&depth.to_le_bytes());
    out[10..18].copy_from_slice(&leaf_pages.to_le_bytes());
    out[18..26].copy_from_slice(&entries.to_le_bytes());
    out
}

pub struct SubTreeHeader {
    pub root: u64,
    pub depth: u16,
    pub leaf_pages: u64,
    pub entries: u64,
}

pub fn decode_sub_tree_header(bytes: &[u8]) -> SubTreeHeader {
    SubTreeHeader {
        root: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
        depth: u16::from_le_bytes(bytes[8..10].try_into().unwrap()),
        leaf_pages: u64::from_le_bytes(bytes[10..18].try_into().unwrap()),
        entries: u64::from_le_bytes(bytes[18..26].try_into().unwrap()),
    }
}

/// Reads every duplicate value out of a promoted sub-tree, in order.
/// Single-leaf sub-trees only; the sub-tree never grows past one level in
/// this implementation (see DESIGN.md).
pub fn sub_tree_values(alloc: &Allocator, header: &SubTreeHeader) -> Result<Vec<Vec<u8>>> {
    let bytes = alloc.read(header.root)?.bytes().to_vec();
    Ok(node::iter_nodes(&bytes).map(|acc| acc.key().to_vec()).collect())
}

/// Finds where `value` sits (or would sit) in a promoted sub-tree's single
/// leaf page.
pub fn sub_tree_search(bytes: &[u8], flags: TreeFlags, value: &[u8]) -> (usize, bool) {
    leaf_search(bytes, dup_as_key_flags(flags), value)
}

/// `leaf_search` compares via `compare_keys`, which only special-cases
/// `INTEGER_KEY`; sub-tree duplicates compare via `integer_dup`/`reverse_dup`
/// instead, so this maps those bits onto the ones `compare_keys` reads.
fn dup_as_key_flags(flags: TreeFlags) -> TreeFlags {
    let mut mapped = TreeFlags::NONE;
    if flags.contains(TreeFlags::INTEGER_DUP) {
        mapped.insert(TreeFlags::INTEGER_KEY);
    }
    mapped
}

pub fn rewrite_sub_tree_leaf(alloc: &Allocator, header: &SubTreeHeader, values: &[Vec<u8>]) -> Result<Vec<u8>> {
    let new_root = alloc.mark_dirty(header.root)?;
    {
        let page_size = alloc.page_size();
        let mut buf = alloc.write_mut(new_root)?;
        page::write_header(
            &mut buf,
            &Header { page_id: new_root, kind: PageKind::SubTreeLeaf, lower: page::HEADER_SIZE as u16, upper: page_size as u16, txn_id: alloc.txn_id() },
        );
        for (i, v) in values.iter().enumerate() {
            node::write_node(&mut buf, i, v, &[], 0, NodeFlags::NONE)?;
        }
    }
    Ok(encode_sub_tree_header(new_root, header.depth, 1, values.len() as u64))
}
