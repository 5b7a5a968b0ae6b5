//! The B+tree proper: `get`/`put`/`delete` wired up from `search`, `split`,
//! `delete`, and `dupsort`.
//!
//! Every write walks the root-to-leaf path once, COW-marking each page
//! (`Allocator::mark_dirty`) and immediately patching the parent's child
//! pointer, rewriting the path bottom-up rather than holding nested
//! mutable borrows.

pub mod comparator;
pub mod delete;
pub mod dupsort;
pub mod search;
pub mod split;

use crate::access::PageReader;
use crate::alloc::Allocator;
use crate::error::{Error, Result};
use crate::geometry::TreeFlags;
use crate::node::{self, NodeAccessor, NodeFlags};
use crate::overflow::{self, PageSource};
use crate::ops::PutFlags;
use crate::page::{self, Header, PageKind};
use crate::tree_record::TreeRecord;
use std::collections::VecDeque;

/// Half the usable body of a page: the inline/overflow threshold. A value
/// that would push a node past this is promoted to an overflow chain
/// instead of being stored inline.
fn inline_limit(page_size: usize) -> usize {
    (page_size - page::HEADER_SIZE) / 2
}

/// Reads a node's logical value out, materializing an overflow chain or
/// resolving the first duplicate of a dup-sort key.
fn materialize<R: PageReader + PageSource>(
    pages: &R,
    acc: &NodeAccessor,
) -> Result<Vec<u8>> {
    if acc.flags().contains(NodeFlags::BIG) {
        overflow::read_overflow(pages, acc.overflow_head(), acc.value_size())
    } else if acc.flags().contains(NodeFlags::SUB_TREE) {
        let header = dupsort::decode_sub_tree_header(acc.raw_value());
        let values = sub_tree_values(pages, &header)?;
        Ok(values.into_iter().next().unwrap_or_default())
    } else if acc.flags().contains(NodeFlags::SUB_DATA) {
        Ok(dupsort::sub_page_values(acc.raw_value()).into_iter().next().unwrap_or_default())
    } else {
        Ok(acc.raw_value().to_vec())
    }
}

fn sub_tree_values<R: PageReader + PageSource>(pages: &R, header: &dupsort::SubTreeHeader) -> Result<Vec<Vec<u8>>> {
    let bytes = pages.read(header.root)?;
    Ok(node::iter_nodes(&bytes).map(|acc| acc.key().to_vec()).collect())
}

/// Point lookup. For dup-sort trees this returns the first duplicate,
/// matching the reference format's plain `get` semantics.
pub fn get<R: PageReader + PageSource>(
    pages: &R,
    flags: TreeFlags,
    root: u64,
    key: &[u8],
) -> Result<Vec<u8>> {
    let (path, exact) = search::descend(pages, flags, root, key)?;
    if !exact {
        return Err(Error::NotFound);
    }
    let entry = path.last().unwrap();
    let bytes = pages.read(entry.page_id)?;
    let acc = NodeAccessor::at_slot(&bytes, entry.index);
    materialize(pages, &acc)
}

/// Returns every duplicate value stored under `key` in a dup-sort tree.
pub fn get_all_dups<R: PageReader + PageSource>(
    pages: &R,
    flags: TreeFlags,
    root: u64,
    key: &[u8],
) -> Result<Vec<Vec<u8>>> {
    let (path, exact) = search::descend(pages, flags, root, key)?;
    if !exact {
        return Err(Error::NotFound);
    }
    let entry = path.last().unwrap();
    let bytes = pages.read(entry.page_id)?;
    let acc = NodeAccessor::at_slot(&bytes, entry.index);
    if acc.flags().contains(NodeFlags::SUB_TREE) {
        let header = dupsort::decode_sub_tree_header(acc.raw_value());
        sub_tree_values(pages, &header)
    } else if acc.flags().contains(NodeFlags::SUB_DATA) {
        Ok(dupsort::sub_page_values(acc.raw_value()))
    } else {
        Ok(vec![acc.raw_value().to_vec()])
    }
}

/// COWs every page on `path`, patching each parent's child pointer to the
/// new id of its child. Returns the COWed ids, parallel to `path`.
fn cow_path(alloc: &Allocator, path: &[search::PathEntry]) -> Result<Vec<u64>> {
    let mut ids: Vec<u64> = path.iter().map(|p| p.page_id).collect();
    for i in (0..ids.len()).rev() {
        ids[i] = alloc.mark_dirty(ids[i])?;
    }
    for i in (0..ids.len().saturating_sub(1)).rev() {
        let mut buf = alloc.write_mut(ids[i])?;
        node::overwrite_fixed_value(&mut buf, path[i].index, &ids[i + 1].to_le_bytes());
    }
    Ok(ids)
}

/// Converts a value into its on-node storage form: inline, or (if it would
/// exceed half the page) an overflow chain.
fn prepare_value(alloc: &Allocator, value: &[u8]) -> Result<(Vec<u8>, u32, NodeFlags)> {
    let page_size = alloc.page_size();
    if value.len() > inline_limit(page_size) {
        let head = overflow::write_overflow(alloc, value)?;
        Ok((head.to_le_bytes().to_vec(), value.len() as u32, NodeFlags::BIG))
    } else {
        Ok((value.to_vec(), value.len() as u32, NodeFlags::NONE))
    }
}

fn free_old_value(alloc: &Allocator, acc: &NodeAccessor) -> Result<()> {
    if acc.flags().contains(NodeFlags::BIG) {
        overflow::free_overflow(alloc, acc.overflow_head(), acc.value_size())?;
    } else if acc.flags().contains(NodeFlags::SUB_TREE) {
        let header = dupsort::decode_sub_tree_header(acc.raw_value());
        alloc.free(&[header.root]);
    }
    Ok(())
}

/// Inserts (key, stored_value) at `index` on `page_id`, splitting (and
/// reporting any extra sibling groups created) if the page has no room.
fn insert_with_split(
    alloc: &Allocator,
    page_id: u64,
    kind: PageKind,
    index: usize,
    key: &[u8],
    stored_value: &[u8],
    value_size: u32,
    node_flags: NodeFlags,
) -> Result<Vec<(Vec<u8>, u64)>> {
    {
        let mut buf = alloc.write_mut(page_id)?;
        match node::write_node(&mut buf, index, key, stored_value, value_size, node_flags) {
            Ok(()) => return Ok(Vec::new()),
            Err(Error::PageFull) => {}
            Err(e) => return Err(e),
        }
    }

    let existing = {
        let buf = alloc.write_mut(page_id)?;
        split::collect_nodes(&buf)
    };
    let mut combined = existing;
    combined.insert(
        index,
        split::NodeData { key: key.to_vec(), stored_value: stored_value.to_vec(), value_size, flags: node_flags },
    );

    let page_size = alloc.page_size();
    let groups = split::plan_split(combined, split::capacity(page_size));
    let mut groups = groups.into_iter();
    let first = groups.next().expect("plan_split always returns at least one group");
    split::write_group(alloc, page_id, kind, &first)?;

    let mut extra = Vec::new();
    for group in groups {
        let new_id = alloc.allocate(1)?[0];
        let sep = split::group_separator(&group);
        split::write_group(alloc, new_id, kind, &group)?;
        extra.push((sep, new_id));
    }
    Ok(extra)
}

/// Propagates sibling pages created by a split up into ancestor branch
/// pages, splitting and growing the root as needed.
fn propagate_splits(
    alloc: &Allocator,
    tree: &mut TreeRecord,
    ids: &mut Vec<u64>,
    leaf_extra: Vec<(Vec<u8>, u64)>,
) -> Result<()> {
    // `level` indexes into `ids`/`path`: the branch page whose child list
    // must gain a new (separator, child) entry. `None` means "above the
    // current root" — grow the tree by one level.
    let mut work: VecDeque<(Option<usize>, Vec<u8>, u64)> = VecDeque::new();
    let parent_level = if ids.len() >= 2 { Some(ids.len() - 2) } else { None };
    for (sep, child) in leaf_extra {
        work.push_back((parent_level, sep, child));
    }

    while let Some((level, sep, child)) = work.pop_front() {
        match level {
            None => {
                let page_size = alloc.page_size();
                let new_root = alloc.allocate(1)?[0];
                let old_root = ids[0];
                {
                    let mut buf = alloc.write_mut(new_root)?;
                    page::write_header(
                        &mut buf,
                        &Header { page_id: new_root, kind: PageKind::Branch, lower: page::HEADER_SIZE as u16, upper: page_size as u16, txn_id: alloc.txn_id() },
                    );
                    node::write_node(&mut buf, 0, &[], &old_root.to_le_bytes(), 0, NodeFlags::NONE)?;
                    node::write_node(&mut buf, 1, &sep, &child.to_le_bytes(), 0, NodeFlags::NONE)?;
                }
                ids.insert(0, new_root);
                tree.depth += 1;
                tree.root_page_id = new_root;
                tree.branch_pages += 1;
            }
            Some(lvl) => {
                let page_id = ids[lvl];
                let bytes = alloc.read(page_id)?.bytes().to_vec();
                let idx = search::branch_child_index(&bytes, TreeFlags::NONE, &sep) + 1;
                let extra = insert_with_split(alloc, page_id, PageKind::Branch, idx, &sep, &child.to_le_bytes(), 0, NodeFlags::NONE)?;
                if !extra.is_empty() {
                    tree.branch_pages += extra.len() as u64;
                }
                let next_level = if lvl > 0 { Some(lvl - 1) } else { None };
                for (s, c) in extra {
                    work.push_back((next_level, s, c));
                }
            }
        }
    }
    Ok(())
}

/// Inserts or updates `key` according to `op`. `existing_dup_check` lets
/// dup-sort callers pass the exact (key, value) pair so `no_overwrite` /
/// `no_dup_data` can be distinguished.
pub fn put(
    alloc: &Allocator,
    tree: &mut TreeRecord,
    flags: TreeFlags,
    key: &[u8],
    value: &[u8],
    op: PutFlags,
) -> Result<()> {
    let (path, exact) = search::descend(alloc, flags, tree.root_page_id, key)?;
    let mut ids = cow_path(alloc, &path)?;
    tree.root_page_id = ids[0];
    let leaf_id = *ids.last().unwrap();
    let leaf_index = path.last().unwrap().index;

    if flags.contains(TreeFlags::DUP_SORT) {
        return put_dup_sort(alloc, tree, flags, &mut ids, leaf_id, leaf_index, exact, key, value, op);
    }

    if op.contains(PutFlags::NO_OVERWRITE) && exact {
        return Err(Error::KeyExists);
    }
    if op.contains(PutFlags::APPEND) {
        let at_end = {
            let bytes = alloc.read(leaf_id)?.bytes().to_vec();
            leaf_index == node::slot_count(&bytes)
        };
        if exact || !at_end {
            return Err(Error::KeyMismatch);
        }
    }

    let (stored_value, value_size, node_flags) = prepare_value(alloc, value)?;

    if exact {
        let mut buf = alloc.write_mut(leaf_id)?;
        let acc = NodeAccessor::at_slot(&buf, leaf_index);
        free_old_value(alloc, &acc)?;
        drop(acc);
        node::remove_node(&mut buf, leaf_index);
        let page_size = alloc.page_size();
        node::compact_page(&mut buf, page_size);
        drop(buf);
        let extra = insert_with_split(alloc, leaf_id, PageKind::Leaf, leaf_index, key, &stored_value, value_size, node_flags)?;
        propagate_splits(alloc, tree, &mut ids, extra)?;
        tree.root_page_id = ids[0];
        return Ok(());
    }

    let extra = insert_with_split(alloc, leaf_id, PageKind::Leaf, leaf_index, key, &stored_value, value_size, node_flags)?;
    propagate_splits(alloc, tree, &mut ids, extra)?;
    tree.root_page_id = ids[0];
    tree.entries += 1;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn put_dup_sort(
    alloc: &Allocator,
    tree: &mut TreeRecord,
    flags: TreeFlags,
    ids: &mut Vec<u64>,
    leaf_id: u64,
    leaf_index: usize,
    key_exact: bool,
    key: &[u8],
    value: &[u8],
    op: PutFlags,
) -> Result<()> {
    let page_size = alloc.page_size();

    if !key_exact {
        if op.contains(PutFlags::APPEND_DUP) || op.contains(PutFlags::APPEND) {
            let at_end = {
                let bytes = alloc.read(leaf_id)?.bytes().to_vec();
                leaf_index == node::slot_count(&bytes)
            };
            if !at_end {
                return Err(Error::KeyMismatch);
            }
        }
        let values = vec![value.to_vec()];
        let blob = dupsort::build_sub_page(&values);
        let blob_len = blob.len();
        let extra = insert_with_split(alloc, leaf_id, PageKind::Leaf, leaf_index, key, &blob, blob_len as u32, NodeFlags::SUB_DATA)?;
        propagate_splits(alloc, tree, ids, extra)?;
        tree.root_page_id = ids[0];
        tree.entries += 1;
        return Ok(());
    }

    let mut buf = alloc.write_mut(leaf_id)?;
    let acc = NodeAccessor::at_slot(&buf, leaf_index);
    if acc.flags().contains(NodeFlags::SUB_TREE) {
        let header = dupsort::decode_sub_tree_header(acc.raw_value());
        drop(acc);
        drop(buf);
        let mut values = sub_tree_values(alloc, &header)?;
        if op.contains(PutFlags::NO_DUP_DATA) && values.binary_search_by(|v| comparator::compare_dup_values(flags, v, value)).is_ok() {
            return Err(Error::KeyExists);
        }
        let inserted = dupsort::insert_sorted(flags, &mut values, value.to_vec());
        if !inserted {
            return Ok(());
        }
        let new_header = dupsort::rewrite_sub_tree_leaf(alloc, &header, &values)?;
        let mut buf = alloc.write_mut(leaf_id)?;
        node::remove_node(&mut buf, leaf_index);
        node::compact_page(&mut buf, page_size);
        drop(buf);
        let header_len = new_header.len();
        let extra = insert_with_split(alloc, leaf_id, PageKind::Leaf, leaf_index, key, &new_header, header_len as u32, NodeFlags::SUB_TREE)?;
        propagate_splits(alloc, tree, ids, extra)?;
        tree.root_page_id = ids[0];
        tree.entries += 1;
        return Ok(());
    }

    let mut values = dupsort::sub_page_values(acc.raw_value());
    drop(acc);
    drop(buf);

    if op.contains(PutFlags::NO_DUP_DATA) && values.binary_search_by(|v| comparator::compare_dup_values(flags, v, value)).is_ok() {
        return Err(Error::KeyExists);
    }
    let inserted = dupsort::insert_sorted(flags, &mut values, value.to_vec());
    if !inserted {
        return Ok(());
    }

    let (node_flags, stored) = if dupsort::fits_sub_page(&values, page_size) {
        (NodeFlags::SUB_DATA, dupsort::build_sub_page(&values))
    } else {
        (NodeFlags::SUB_TREE, dupsort::promote(alloc, &values)?)
    };

    let mut buf = alloc.write_mut(leaf_id)?;
    node::remove_node(&mut buf, leaf_index);
    node::compact_page(&mut buf, page_size);
    drop(buf);
    let stored_len = stored.len();
    let extra = insert_with_split(alloc, leaf_id, PageKind::Leaf, leaf_index, key, &stored, stored_len as u32, node_flags)?;
    propagate_splits(alloc, tree, ids, extra)?;
    tree.root_page_id = ids[0];
    tree.entries += 1;
    Ok(())
}

/// Deletes `key` (or, in a dup-sort tree, exactly one `(key, value)` pair
/// when `value` is given). Returns whether anything was removed.
pub fn delete(alloc: &Allocator, tree: &mut TreeRecord, flags: TreeFlags, key: &[u8], value: Option<&[u8]>) -> Result<bool> {
    let (path, exact) = search::descend(alloc, flags, tree.root_page_id, key)?;
    if !exact {
        return Ok(false);
    }

    if flags.contains(TreeFlags::DUP_SORT) {
        if let Some(target_value) = value {
            let ids = cow_path(alloc, &path)?;
            tree.root_page_id = ids[0];
            let leaf_id = *ids.last().unwrap();
            let leaf_index = path.last().unwrap().index;
            let page_size = alloc.page_size();

            let mut buf = alloc.write_mut(leaf_id)?;
            let acc = NodeAccessor::at_slot(&buf, leaf_index);
            if acc.flags().contains(NodeFlags::SUB_TREE) {
                let header = dupsort::decode_sub_tree_header(acc.raw_value());
                drop(acc);
                drop(buf);
                let mut values = sub_tree_values(alloc, &header)?;
                if !dupsort::remove_value(flags, &mut values, target_value) {
                    return Ok(false);
                }
                if values.is_empty() {
                    alloc.free(&[header.root]);
                } else {
                    let new_header = dupsort::rewrite_sub_tree_leaf(alloc, &header, &values)?;
                    let mut buf = alloc.write_mut(leaf_id)?;
                    node::remove_node(&mut buf, leaf_index);
                    node::compact_page(&mut buf, page_size);
                    drop(buf);
                    let header_len = new_header.len();
                    insert_with_split(alloc, leaf_id, PageKind::Leaf, leaf_index, key, &new_header, header_len as u32, NodeFlags::SUB_TREE)?;
                    tree.entries -= 1;
                    return Ok(true);
                }
            } else {
                let mut values = dupsort::sub_page_values(acc.raw_value());
                drop(acc);
                drop(buf);
                if !dupsort::remove_value(flags, &mut values, target_value) {
                    return Ok(false);
                }
                if !values.is_empty() {
                    let blob = dupsort::build_sub_page(&values);
                    let mut buf = alloc.write_mut(leaf_id)?;
                    node::remove_node(&mut buf, leaf_index);
                    node::compact_page(&mut buf, page_size);
                    drop(buf);
                    let blob_len = blob.len();
                    insert_with_split(alloc, leaf_id, PageKind::Leaf, leaf_index, key, &blob, blob_len as u32, NodeFlags::SUB_DATA)?;
                    tree.entries -= 1;
                    return Ok(true);
                }
            }
            // Last duplicate removed: fall through to whole-node removal.
        }
    }

    let new_root = delete::delete_at_path(alloc, flags, &path, tree.root_page_id)?;
    tree.root_page_id = new_root;
    tree.entries = tree.entries.saturating_sub(1);
    Ok(true)
}
