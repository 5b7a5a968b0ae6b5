//! Per-write-transaction page allocator: dirty-page map, freed-id set, and
//! the copy-on-write primitive.
//!
//! Pages are handed out from the GC tree's reclaimed list first, then by
//! growing the file. The dirty map tracks every page this transaction has
//! copied-on-write so far, so a second write to the same page id within the
//! same transaction reuses the existing copy instead of allocating another.

use crate::error::{Error, Result};
use crate::page::{self, Header, PageKind, HEADER_SIZE};
use crate::pagemanager::PageManager;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{HashMap, VecDeque};

pub enum PageRef<'a> {
    Dirty(Ref<'a, [u8]>),
    Clean(crate::pagemanager::Page<'a>),
}

impl<'a> PageRef<'a> {
    pub fn bytes(&self) -> &[u8] {
        match self {
            PageRef::Dirty(r) => r,
            PageRef::Clean(p) => p.memory(),
        }
    }
}

pub struct Allocator<'env> {
    pm: &'env PageManager,
    txn_id: u64,
    dirty: RefCell<HashMap<u64, Vec<u8>>>,
    freed: RefCell<Vec<u64>>,
    reclaimed: RefCell<VecDeque<u64>>,
    next_tail_page: std::cell::Cell<u64>,
}

impl<'env> Allocator<'env> {
    pub fn new(pm: &'env PageManager, txn_id: u64, reclaimed: Vec<u64>) -> Self {
        Allocator {
            pm,
            txn_id,
            dirty: RefCell::new(HashMap::new()),
            freed: RefCell::new(Vec::new()),
            reclaimed: RefCell::new(reclaimed.into()),
            next_tail_page: std::cell::Cell::new(pm.page_count()),
        }
    }

    pub fn page_size(&self) -> usize {
        self.pm.page_size()
    }

    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }

    pub fn read(&self, id: u64) -> Result<PageRef> {
        if self.dirty.borrow().contains_key(&id) {
            Ok(PageRef::Dirty(Ref::map(self.dirty.borrow(), |m| m.get(&id).unwrap().as_slice())))
        } else {
            Ok(PageRef::Clean(self.pm.get_page(id)?))
        }
    }

    /// Mutable access to a page that is already dirty in this txn. Callers
    /// must `mark_dirty` (or `allocate`) first; this never performs COW
    /// itself, keeping the COW primitive separate from plain mutation of an
    /// already-owned copy.
    pub fn write_mut(&self, id: u64) -> Result<RefMut<[u8]>> {
        if !self.dirty.borrow().contains_key(&id) {
            return Err(Error::Panic(format!("page {id} mutated without mark_dirty")));
        }
        Ok(RefMut::map(self.dirty.borrow_mut(), |m| m.get_mut(&id).unwrap().as_mut_slice()))
    }

    /// Allocates `count` fresh pages, zeroed, stamped with this txn's id.
    /// Reclaimable GC pages are used first, then the file tail is grown.
    pub fn allocate(&self, count: usize) -> Result<Vec<u64>> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id = if let Some(id) = self.reclaimed.borrow_mut().pop_front() {
                id
            } else {
                let id = self.next_tail_page.get();
                self.pm.grow_to(id + 1)?;
                self.next_tail_page.set(id + 1);
                id
            };
            let page_size = self.pm.page_size();
            let mut buf = vec![0u8; page_size];
            page::write_header(
                &mut buf,
                &Header { page_id: id, kind: PageKind::Leaf, lower: HEADER_SIZE as u16, upper: page_size as u16, txn_id: self.txn_id },
            );
            self.dirty.borrow_mut().insert(id, buf);
            ids.push(id);
        }
        log::trace!("allocator: allocated {:?} for txn {}", ids, self.txn_id);
        Ok(ids)
    }

    /// Appends to the freed set. The caller must not touch `ids` again in
    /// this txn.
    pub fn free(&self, ids: &[u64]) {
        self.freed.borrow_mut().extend_from_slice(ids);
    }

    /// The copy-on-write primitive: if `id` is already dirty, returns it
    /// unchanged; otherwise allocates a new page, copies `id`'s contents
    /// into it restamped with this txn's id, frees `id`, and returns the
    /// new page id. Callers walking a tree path must rewrite whatever
    /// pointer referenced `id` to point at the returned id instead.
    pub fn mark_dirty(&self, id: u64) -> Result<u64> {
        if self.dirty.borrow().contains_key(&id) {
            return Ok(id);
        }
        let old_bytes = self.pm.get_page(id)?.memory().to_vec();
        let new_id = self.allocate(1)?[0];
        {
            let mut dirty = self.dirty.borrow_mut();
            let buf = dirty.get_mut(&new_id).unwrap();
            buf.copy_from_slice(&old_bytes);
            let old_header = page::read_header(&old_bytes)?;
            page::write_header(
                buf,
                &Header { page_id: new_id, kind: old_header.kind, lower: old_header.lower, upper: old_header.upper, txn_id: self.txn_id },
            );
        }
        self.free(&[id]);
        log::trace!("allocator: COW page {} -> {}", id, new_id);
        Ok(new_id)
    }

    /// Feeds additional reclaimed GC pages into this allocator's pool after
    /// construction, so that pages freed by earlier transactions and pulled
    /// out of the GC tree at the start of this one become available to
    /// `allocate` within the same transaction.
    pub fn push_reclaimed(&self, ids: Vec<u64>) {
        self.reclaimed.borrow_mut().extend(ids);
    }

    pub fn dirty_ids(&self) -> Vec<u64> {
        self.dirty.borrow().keys().copied().collect()
    }

    pub fn freed_ids(&self) -> Vec<u64> {
        let mut v = self.freed.borrow().clone();
        v.sort_unstable();
        v.dedup();
        v
    }

    /// Consumes the allocator, handing the dirty pages and freed ids to
    /// the committing transaction.
    pub fn into_parts(self) -> (HashMap<u64, Vec<u8>>, Vec<u64>) {
        let freed = self.freed_ids();
        (self.dirty.into_inner(), freed)
    }
}
