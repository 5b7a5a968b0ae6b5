//! Cursor state machine: a path stack from root to the current leaf, plus
//! (for dup-sort trees) an index into the current key's duplicate set.
//!
//! A write-transaction cursor shares its tree's `Rc<RefCell<TreeRecord>>`
//! with every other cursor opened on the same dbi and with `txn.put`/
//! `txn.del`, so a root change from any of them is visible to the others
//! immediately. `ensure_fresh` detects a root page id change since this
//! cursor's path was last built and re-resolves by walking from the root
//! using the last key it pointed at, rather than maintaining a separate
//! invalidation broadcast to every live cursor.

use crate::access::PageReader;
use crate::alloc::Allocator;
use crate::btree::comparator::compare_dup_values;
use crate::btree::dupsort;
use crate::btree::search::{self, PathEntry};
use crate::error::{Error, Result};
use crate::geometry::TreeFlags;
use crate::node::{self, NodeAccessor, NodeFlags};
use crate::ops::PutFlags;
use crate::overflow::{self, PageSource};
use crate::page::{self, PageKind};
use crate::tree_record::TreeRecord;
use std::cell::RefCell;
use std::rc::Rc;

/// Where a cursor's root page id comes from: fixed for a read-only
/// transaction's snapshot, or shared with sibling cursors/the owning
/// transaction for a write transaction's live tree.
pub enum RootSource {
    Fixed(u64),
    Shared(Rc<RefCell<TreeRecord>>),
}

impl RootSource {
    fn get(&self) -> u64 {
        match self {
            RootSource::Fixed(id) => *id,
            RootSource::Shared(cell) => cell.borrow().root_page_id,
        }
    }
}

pub struct Cursor<'a, R> {
    pages: &'a R,
    flags: TreeFlags,
    root: RootSource,
    path: Vec<PathEntry>,
    dup_index: Option<usize>,
    initialized: bool,
    last_key: Option<Vec<u8>>,
    /// Set by `del`: the cursor already knows which element follows the one
    /// it just removed, but reports nothing there until the caller
    /// explicitly moves with `next`.
    deleted_pending: bool,
}

impl<'a, R: PageReader + PageSource> Cursor<'a, R> {
    pub fn new(pages: &'a R, flags: TreeFlags, root: RootSource) -> Self {
        Cursor { pages, flags, root, path: Vec::new(), dup_index: None, initialized: false, last_key: None, deleted_pending: false }
    }

    fn is_dup_sort(&self) -> bool {
        self.flags.contains(TreeFlags::DUP_SORT)
    }

    /// Re-resolves the path if the tree has been rewritten since this
    /// cursor last positioned (root page id changed underneath it).
    fn ensure_fresh(&mut self) -> Result<()> {
        if self.path.is_empty() {
            return Ok(());
        }
        if self.path[0].page_id != self.root.get() {
            if let Some(key) = self.last_key.clone() {
                let _ = self.set_range(&key);
            } else {
                self.path.clear();
                self.initialized = false;
            }
        }
        Ok(())
    }

    fn leaf_bytes(&self) -> Result<Vec<u8>> {
        let entry = self.path.last().ok_or(Error::NotInitialized)?;
        self.pages.read(entry.page_id)
    }

    fn leaf_count(&self) -> Result<usize> {
        Ok(node::slot_count(&self.leaf_bytes()?))
    }

    fn current_node_key(&self) -> Result<Vec<u8>> {
        let bytes = self.leaf_bytes()?;
        let idx = self.path.last().unwrap().index;
        Ok(NodeAccessor::at_slot(&bytes, idx).key().to_vec())
    }

    fn current_dups(&self) -> Result<Vec<Vec<u8>>> {
        let bytes = self.leaf_bytes()?;
        let idx = self.path.last().unwrap().index;
        let acc = NodeAccessor::at_slot(&bytes, idx);
        if acc.flags().contains(NodeFlags::SUB_TREE) {
            let header = dupsort::decode_sub_tree_header(acc.raw_value());
            let leaf = self.pages.read(header.root)?;
            Ok(node::iter_nodes(&leaf).map(|a| a.key().to_vec()).collect())
        } else if acc.flags().contains(NodeFlags::SUB_DATA) {
            Ok(dupsort::sub_page_values(acc.raw_value()))
        } else {
            Ok(vec![acc.raw_value().to_vec()])
        }
    }

    /// Materializes the node at the cursor's current leaf position
    /// (resolving the dup-sort sub-position too), and records its key as
    /// the re-resolution anchor for `ensure_fresh`.
    fn materialize_current_node(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let bytes = self.leaf_bytes()?;
        let idx = self.path.last().unwrap().index;
        let acc = NodeAccessor::at_slot(&bytes, idx);
        let key = acc.key().to_vec();
        let value = if acc.flags().contains(NodeFlags::BIG) {
            overflow::read_overflow(self.pages, acc.overflow_head(), acc.value_size())?
        } else if self.is_dup_sort() {
            let dup_idx = self.dup_index.unwrap_or(0);
            drop(acc);
            self.current_dups()?.into_iter().nth(dup_idx).ok_or(Error::NotFound)?
        } else {
            acc.raw_value().to_vec()
        };
        self.last_key = Some(key.clone());
        Ok((key, value))
    }

    pub fn get_current(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        if self.deleted_pending {
            return Err(Error::NotFound);
        }
        self.ensure_fresh()?;
        self.materialize_current_node()
    }

    fn descend_leftmost(&self, start: u64) -> Result<Vec<PathEntry>> {
        let mut path = Vec::new();
        let mut page_id = start;
        loop {
            let bytes = self.pages.read(page_id)?;
            let header = page::read_header(&bytes)?;
            match header.kind {
                PageKind::Branch => {
                    path.push(PathEntry { page_id, index: 0 });
                    page_id = search::child_page_id(&bytes, 0);
                }
                PageKind::Leaf | PageKind::SubTreeLeaf => {
                    path.push(PathEntry { page_id, index: 0 });
                    return Ok(path);
                }
                other => return Err(Error::Corrupt(format!("unexpected page kind {other:?}"))),
            }
        }
    }

    fn descend_rightmost(&self, start: u64) -> Result<Vec<PathEntry>> {
        let mut path = Vec::new();
        let mut page_id = start;
        loop {
            let bytes = self.pages.read(page_id)?;
            let header = page::read_header(&bytes)?;
            let count = node::slot_count(&bytes);
            match header.kind {
                PageKind::Branch => {
                    let idx = count.saturating_sub(1);
                    path.push(PathEntry { page_id, index: idx });
                    page_id = search::child_page_id(&bytes, idx);
                }
                PageKind::Leaf | PageKind::SubTreeLeaf => {
                    path.push(PathEntry { page_id, index: count.saturating_sub(1) });
                    return Ok(path);
                }
                other => return Err(Error::Corrupt(format!("unexpected page kind {other:?}"))),
            }
        }
    }

    pub fn first(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        self.deleted_pending = false;
        let root = self.root.get();
        self.path = self.descend_leftmost(root)?;
        if self.leaf_count()? == 0 {
            self.initialized = true;
            return Err(Error::NotFound);
        }
        self.dup_index = Some(0);
        self.initialized = true;
        self.materialize_current_node()
    }

    pub fn last(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        self.deleted_pending = false;
        let root = self.root.get();
        self.path = self.descend_rightmost(root)?;
        if self.leaf_count()? == 0 {
            self.initialized = true;
            return Err(Error::NotFound);
        }
        let dups = self.current_dups()?;
        self.dup_index = Some(dups.len().saturating_sub(1));
        self.initialized = true;
        self.materialize_current_node()
    }

    /// Moves the path to the next leaf's first node, or returns `false` if
    /// `self.path` was already on the last leaf.
    fn step_to_next_leaf(&mut self) -> Result<bool> {
        let mut i = self.path.len();
        while i > 1 {
            i -= 1;
            let parent_idx = i - 1;
            let parent_id = self.path[parent_idx].page_id;
            let parent_bytes = self.pages.read(parent_id)?;
            let count = node::slot_count(&parent_bytes);
            if self.path[parent_idx].index + 1 < count {
                let next_index = self.path[parent_idx].index + 1;
                self.path.truncate(parent_idx + 1);
                self.path[parent_idx].index = next_index;
                let child = search::child_page_id(&parent_bytes, next_index);
                let mut rest = self.descend_leftmost(child)?;
                self.path.append(&mut rest);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn step_to_prev_leaf(&mut self) -> Result<bool> {
        let mut i = self.path.len();
        while i > 1 {
            i -= 1;
            let parent_idx = i - 1;
            let parent_id = self.path[parent_idx].page_id;
            if self.path[parent_idx].index > 0 {
                let prev_index = self.path[parent_idx].index - 1;
                let parent_bytes = self.pages.read(parent_id)?;
                self.path.truncate(parent_idx + 1);
                self.path[parent_idx].index = prev_index;
                let child = search::child_page_id(&parent_bytes, prev_index);
                let mut rest = self.descend_rightmost(child)?;
                self.path.append(&mut rest);
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn next(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        if !self.initialized {
            return self.first();
        }
        if self.deleted_pending {
            self.deleted_pending = false;
            self.ensure_fresh()?;
            if self.leaf_count()? == 0 {
                return Err(Error::NotFound);
            }
            return self.materialize_current_node();
        }
        self.ensure_fresh()?;
        if self.is_dup_sort() {
            let dups = self.current_dups()?;
            let idx = self.dup_index.unwrap_or(0);
            if idx + 1 < dups.len() {
                self.dup_index = Some(idx + 1);
                return self.materialize_current_node();
            }
        }
        self.next_no_dup()
    }

    /// Advances past any remaining duplicates of the current key, to the
    /// first duplicate of the next key.
    pub fn next_no_dup(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        self.deleted_pending = false;
        self.ensure_fresh()?;
        let count = self.leaf_count()?;
        let idx = self.path.last().unwrap().index;
        if idx + 1 < count {
            self.path.last_mut().unwrap().index += 1;
        } else if !self.step_to_next_leaf()? {
            return Err(Error::NotFound);
        }
        self.dup_index = Some(0);
        self.materialize_current_node()
    }

    pub fn prev(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        if !self.initialized {
            return self.last();
        }
        self.deleted_pending = false;
        self.ensure_fresh()?;
        if self.is_dup_sort() {
            let idx = self.dup_index.unwrap_or(0);
            if idx > 0 {
                self.dup_index = Some(idx - 1);
                return self.materialize_current_node();
            }
        }
        let idx = self.path.last().unwrap().index;
        if idx > 0 {
            self.path.last_mut().unwrap().index -= 1;
        } else if !self.step_to_prev_leaf()? {
            return Err(Error::NotFound);
        }
        let dups = self.current_dups()?;
        self.dup_index = Some(dups.len().saturating_sub(1));
        self.materialize_current_node()
    }

    pub fn first_dup(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        self.deleted_pending = false;
        self.ensure_fresh()?;
        self.dup_index = Some(0);
        self.materialize_current_node()
    }

    pub fn last_dup(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        self.deleted_pending = false;
        self.ensure_fresh()?;
        let dups = self.current_dups()?;
        self.dup_index = Some(dups.len().saturating_sub(1));
        self.materialize_current_node()
    }

    pub fn next_dup(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        self.deleted_pending = false;
        self.ensure_fresh()?;
        let dups = self.current_dups()?;
        let idx = self.dup_index.unwrap_or(0);
        if idx + 1 >= dups.len() {
            return Err(Error::NotFound);
        }
        self.dup_index = Some(idx + 1);
        self.materialize_current_node()
    }

    pub fn prev_dup(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        self.deleted_pending = false;
        self.ensure_fresh()?;
        let idx = self.dup_index.unwrap_or(0);
        if idx == 0 {
            return Err(Error::NotFound);
        }
        self.dup_index = Some(idx - 1);
        self.materialize_current_node()
    }

    pub fn set(&mut self, key: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        self.deleted_pending = false;
        let root = self.root.get();
        let (path, exact) = search::descend(self.pages, self.flags, root, key)?;
        self.path = path;
        self.initialized = true;
        if !exact {
            return Err(Error::NotFound);
        }
        self.dup_index = Some(0);
        self.materialize_current_node()
    }

    pub fn set_key(&mut self, key: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        self.set(key)
    }

    pub fn set_range(&mut self, key: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        self.deleted_pending = false;
        let root = self.root.get();
        let (path, exact) = search::descend(self.pages, self.flags, root, key)?;
        self.path = path;
        self.initialized = true;
        let count = self.leaf_count()?;
        if !exact && self.path.last().unwrap().index >= count && !self.step_to_next_leaf()? {
            return Err(Error::NotFound);
        }
        self.dup_index = Some(0);
        self.materialize_current_node()
    }

    pub fn get_both(&mut self, key: &[u8], value: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        self.set(key)?;
        let dups = self.current_dups()?;
        match dups.binary_search_by(|v| compare_dup_values(self.flags, v, value)) {
            Ok(idx) => {
                self.dup_index = Some(idx);
                self.materialize_current_node()
            }
            Err(_) => Err(Error::NotFound),
        }
    }

    pub fn get_both_range(&mut self, key: &[u8], value: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        self.set(key)?;
        let dups = self.current_dups()?;
        let idx = match dups.binary_search_by(|v| compare_dup_values(self.flags, v, value)) {
            Ok(idx) => idx,
            Err(idx) => idx,
        };
        if idx >= dups.len() {
            return Err(Error::NotFound);
        }
        self.dup_index = Some(idx);
        self.materialize_current_node()
    }
}

impl<'a, 'env> Cursor<'a, Allocator<'env>> {
    fn tree_cell(&self) -> Result<Rc<RefCell<TreeRecord>>> {
        match &self.root {
            RootSource::Shared(cell) => Ok(cell.clone()),
            RootSource::Fixed(_) => Err(Error::Invalid("cursor is read-only".into())),
        }
    }

    /// Writes `(key, value)` through the cursor, then re-resolves its own
    /// position via `set`.
    pub fn put(&mut self, key: &[u8], value: &[u8], op: PutFlags) -> Result<()> {
        let cell = self.tree_cell()?;
        {
            let mut tree = cell.borrow_mut();
            crate::btree::put(self.pages, &mut tree, self.flags, key, value, op)?;
        }
        let _ = self.set(key);
        Ok(())
    }

    /// Deletes the current `(key, value)`. The cursor already resolves the
    /// element that follows it, but reports no data at the deleted position
    /// until the caller explicitly moves with `next`.
    pub fn del(&mut self) -> Result<()> {
        let (key, value) = self.get_current()?;
        let old_dup_index = self.dup_index;
        let cell = self.tree_cell()?;
        let removed = {
            let mut tree = cell.borrow_mut();
            if self.is_dup_sort() {
                crate::btree::delete(self.pages, &mut tree, self.flags, &key, Some(&value))?
            } else {
                crate::btree::delete(self.pages, &mut tree, self.flags, &key, None)?
            }
        };
        if !removed {
            return Err(Error::NotFound);
        }
        match self.set_range(&key) {
            Ok(_) => {
                // set_range always lands on dup_index 0, which is only correct
                // when the key's slot itself was removed (no duplicates left).
                // If the key still has a slot, the duplicate that used to sit
                // right after the deleted one shifted down into its old
                // index, so that's where the cursor needs to end up; if the
                // deleted duplicate was the last one, there's no such survivor
                // under this key and the cursor must fall through to the next
                // key's first duplicate instead.
                if self.is_dup_sort() {
                    if let Some(old_idx) = old_dup_index {
                        if self.current_node_key()? == key {
                            let dups = self.current_dups()?;
                            if old_idx < dups.len() {
                                self.dup_index = Some(old_idx);
                            } else {
                                let _ = self.next_no_dup();
                            }
                        }
                    }
                }
            }
            Err(Error::NotFound) => {
                self.initialized = true;
            }
            Err(e) => return Err(e),
        }
        self.deleted_pending = true;
        Ok(())
    }
}
