//! Delete, merge, and rebalance.
//!
//! The merge/rotate pair here works the same way classic in-memory B-tree
//! rebalancing does on `Vec`-backed nodes, generalized to page-backed
//! leaves and branches reached through an `Allocator`.

use crate::alloc::Allocator;
use crate::btree::search::PathEntry;
use crate::error::Result;
use crate::geometry::TreeFlags;
use crate::node::{self, NodeAccessor, NodeFlags};
use crate::page::{self, Header, PageKind};
use std::convert::TryInto;

/// Minimum number of body bytes a non-root leaf/branch must retain.
pub fn min_fill(page_size: usize) -> usize {
    (page_size - page::HEADER_SIZE) / 4
}

fn child_ids(bytes: &[u8]) -> Vec<u64> {
    node::iter_nodes(bytes)
        .map(|acc| u64::from_le_bytes(acc.raw_value().try_into().unwrap()))
        .collect()
}

fn first_key(bytes: &[u8]) -> Vec<u8> {
    NodeAccessor::at_slot(bytes, 0).key().to_vec()
}

/// Removes the node at `path.last()` and rebalances back up to the root.
/// Returns the (possibly unchanged) new root page id.
pub fn delete_at_path(
    alloc: &Allocator,
    flags: TreeFlags,
    path: &[PathEntry],
    root: u64,
) -> Result<u64> {
    let page_size = alloc.page_size();
    let mut new_ids: Vec<u64> = path.iter().map(|p| p.page_id).collect();

    // COW every page on the path, bottom-up, and remove the target leaf node.
    let leaf_new_id = alloc.mark_dirty(path.last().unwrap().page_id)?;
    *new_ids.last_mut().unwrap() = leaf_new_id;
    {
        let mut buf = alloc.write_mut(leaf_new_id)?;
        let idx = path.last().unwrap().index;
        let acc = NodeAccessor::at_slot(&buf, idx);
        if acc.flags().contains(NodeFlags::BIG) {
            let head = acc.overflow_head();
            let value_size = acc.value_size();
            drop(acc);
            crate::overflow::free_overflow(alloc, head, value_size)?;
        }
        node::remove_node(&mut buf, idx);
        node::compact_page(&mut buf, page_size);
    }

    for i in (0..path.len() - 1).rev() {
        let parent_old = path[i].page_id;
        let parent_new = alloc.mark_dirty(parent_old)?;
        new_ids[i] = parent_new;
        let child_index = path[i].index;
        let child_new_id = new_ids[i + 1];
        {
            let mut buf = alloc.write_mut(parent_new)?;
            node::overwrite_fixed_value(&mut buf, child_index, &child_new_id.to_le_bytes());
        }
    }

    let root = rebalance_up(alloc, flags, &mut new_ids, root)?;
    Ok(root)
}

/// Walks the COWed path bottom-up, merging or rebalancing any page that
/// fell under `min_fill`, and collapses the root if it is left with a
/// single child.
fn rebalance_up(alloc: &Allocator, flags: TreeFlags, ids: &mut [u64], mut root: u64) -> Result<u64> {
    let page_size = alloc.page_size();
    let floor = min_fill(page_size);

    for depth in (0..ids.len()).rev() {
        let id = ids[depth];
        let bytes = alloc.read(id)?.bytes().to_vec();
        let header = page::read_header(&bytes)?;
        let is_root = depth == 0;
        let used = node::used_space(&bytes, page_size);

        if is_root {
            if header.kind == PageKind::Branch && node::slot_count(&bytes) == 1 {
                let only_child = child_ids(&bytes)[0];
                root = only_child;
            }
            continue;
        }

        if used >= floor || node::slot_count(&bytes) == 0 && header.kind == PageKind::Leaf {
            if used >= floor {
                continue;
            }
        }
        if used >= floor {
            continue;
        }

        let parent_id = ids[depth - 1];
        let parent_bytes = alloc.read(parent_id)?.bytes().to_vec();
        let children = child_ids(&parent_bytes);
        let my_index = children.iter().position(|&c| c == id).unwrap();

        let sibling_index = if my_index + 1 < children.len() { my_index + 1 } else { my_index - 1 };
        let prefer_right = sibling_index == my_index + 1;
        let sibling_id = children[sibling_index];
        let sibling_bytes = alloc.read(sibling_id)?.bytes().to_vec();
        let sibling_used = node::used_space(&sibling_bytes, page_size);

        let (left_id, right_id, left_bytes, right_bytes) = if prefer_right {
            (id, sibling_id, bytes.clone(), sibling_bytes.clone())
        } else {
            (sibling_id, id, sibling_bytes.clone(), bytes.clone())
        };

        let combined = used + sibling_used + page::HEADER_SIZE;
        if combined <= page_size {
            // Merge: move every node of the right page into the left page,
            // free the right page, remove its separator from the parent.
            let left_new = alloc.mark_dirty(left_id)?;
            {
                let mut buf = alloc.write_mut(left_new)?;
                for acc in node::iter_nodes(&right_bytes) {
                    let at = node::slot_count(&buf);
                    node::write_node(&mut buf, at, acc.key(), acc.raw_value(), acc.value_size() as u32, acc.flags())?;
                }
            }
            alloc.free(&[right_id]);

            let parent_new = alloc.mark_dirty(parent_id)?;
            let remove_index = if prefer_right { my_index + 1 } else { my_index };
            {
                let mut buf = alloc.write_mut(parent_new)?;
                node::remove_node(&mut buf, remove_index);
                node::compact_page(&mut buf, page_size);
                let surviving_index = if prefer_right { my_index } else { my_index - 1 };
                node::overwrite_fixed_value(&mut buf, surviving_index, &left_new.to_le_bytes());
            }
            ids[depth] = left_new;
            ids[depth - 1] = parent_new;
        } else {
            // Rebalance: move one node across from the fuller sibling.
            let (donor_bytes, donor_id, receiver_id, moving_to_left_end) = if prefer_right {
                (right_bytes.clone(), right_id, left_id, true)
            } else {
                (left_bytes.clone(), left_id, right_id, false)
            };
            let donor_count = node::slot_count(&donor_bytes);
            let take_index = if moving_to_left_end { 0 } else { donor_count - 1 };
            let moved = NodeAccessor::at_slot(&donor_bytes, take_index);
            let moved_key = moved.key().to_vec();
            let moved_value = moved.raw_value().to_vec();
            let moved_size = moved.value_size() as u32;
            let moved_flags = moved.flags();

            let donor_new = alloc.mark_dirty(donor_id)?;
            {
                let mut buf = alloc.write_mut(donor_new)?;
                node::remove_node(&mut buf, take_index);
                node::compact_page(&mut buf, page_size);
            }
            let receiver_new = alloc.mark_dirty(receiver_id)?;
            {
                let mut buf = alloc.write_mut(receiver_new)?;
                let insert_at = if moving_to_left_end { node::slot_count(&buf) } else { 0 };
                node::write_node(&mut buf, insert_at, &moved_key, &moved_value, moved_size, moved_flags)?;
            }

            let (new_left, new_right) = if prefer_right { (receiver_new, donor_new) } else { (donor_new, receiver_new) };
            ids[depth] = if id == left_id { new_left } else { new_right };

            let parent_new = alloc.mark_dirty(parent_id)?;
            {
                let mut buf = alloc.write_mut(parent_new)?;
                let (left_slot, right_slot) = if prefer_right { (my_index, my_index + 1) } else { (my_index - 1, my_index) };
                node::overwrite_fixed_value(&mut buf, left_slot, &new_left.to_le_bytes());
                node::overwrite_fixed_value(&mut buf, right_slot, &new_right.to_le_bytes());
                let right_bytes_now = alloc.read(new_right)?.bytes().to_vec();
                let new_sep = first_key(&right_bytes_now);
                rewrite_separator_key(&mut buf, right_slot, &new_sep)?;
            }
            ids[depth - 1] = parent_new;
        }
    }
    Ok(root)
}

/// Branch separator keys can change width when a node moves across a
/// rebalance boundary; since `write_node` never reorders other slots when
/// the replacement is a different size, separators are rewritten via
/// remove+insert rather than `overwrite_fixed_value`.
fn rewrite_separator_key(buf: &mut [u8], index: usize, new_key: &[u8]) -> Result<()> {
    let (old_value, value_size, flags) = {
        let acc = NodeAccessor::at_slot(buf, index);
        (acc.raw_value().to_vec(), acc.value_size() as u32, acc.flags())
    };
    node::remove_node(buf, index);
    let page_size = buf.len();
    node::compact_page(buf, page_size);
    node::write_node(buf, index, new_key, &old_value, value_size, flags)
}

/// Writes a fresh page containing a single branch node pointing at `child`,
/// used when collapsing is not possible and a placeholder root must exist
/// (empty tree).
pub fn write_empty_leaf(alloc: &Allocator) -> Result<u64> {
    let id = alloc.allocate(1)?[0];
    let page_size = alloc.page_size();
    let mut buf = alloc.write_mut(id)?;
    page::write_header(
        &mut buf,
        &Header { page_id: id, kind: PageKind::Leaf, lower: page::HEADER_SIZE as u16, upper: page_size as u16, txn_id: alloc.txn_id() },
    );
    Ok(id)
}
