//! Transaction handles: a read transaction is an immutable snapshot of the
//! meta page plus a reader-table registration; the one live write
//! transaction holds the write-serialization lock for its whole lifetime
//! and commits through the meta-swap protocol.

use crate::alloc::Allocator;
use crate::btree;
use crate::cursor::{Cursor, RootSource};
use crate::dbi::Dbi;
use crate::env::Env;
use crate::error::{Error, Result};
use crate::gc;
use crate::geometry::{OpenFlags, TreeFlags};
use crate::meta::{self, Meta};
use crate::ops::PutFlags;
use crate::reader_table::ReaderHandle;
use crate::tree_record::{TreeRecord, TREE_RECORD_SIZE};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::MutexGuard;

/// A read-only transaction: a fixed snapshot, isolated from any concurrent
/// writer by copy-on-write. A reader that began before a writer's commit
/// keeps seeing the pre-commit state for its entire lifetime, since commit
/// never overwrites a page still reachable from an older meta snapshot.
pub struct ReadOnlyTxn<'env> {
    env: &'env Env,
    snapshot: Meta,
    reader_handle: Option<ReaderHandle>,
}

impl<'env> ReadOnlyTxn<'env> {
    pub(crate) fn new(env: &'env Env, snapshot: Meta, reader_handle: ReaderHandle) -> Self {
        ReadOnlyTxn { env, snapshot, reader_handle: Some(reader_handle) }
    }

    fn tree_record(&self, dbi: &Dbi) -> Result<TreeRecord> {
        match &dbi.name {
            None => Ok(self.snapshot.main_tree),
            Some(name) => {
                let bytes = btree::get(&self.env.pm, TreeFlags::NONE, self.snapshot.main_tree.root_page_id, name.as_bytes())?;
                Ok(TreeRecord::read(&bytes))
            }
        }
    }

    /// Looks up a dbi by name against this transaction's snapshot. `None`
    /// is always the main tree itself.
    pub fn open_dbi(&self, name: Option<&str>) -> Result<Dbi> {
        match name {
            None => Ok(Dbi { name: None, flags: self.snapshot.main_tree.flags }),
            Some(n) => {
                let bytes = btree::get(&self.env.pm, TreeFlags::NONE, self.snapshot.main_tree.root_page_id, n.as_bytes())
                    .map_err(|_| Error::BadDbi)?;
                let record = TreeRecord::read(&bytes);
                Ok(Dbi { name: Some(n.to_string()), flags: record.flags })
            }
        }
    }

    pub fn get(&self, dbi: &Dbi, key: &[u8]) -> Result<Vec<u8>> {
        let record = self.tree_record(dbi)?;
        btree::get(&self.env.pm, dbi.flags, record.root_page_id, key)
    }

    pub fn get_all_dups(&self, dbi: &Dbi, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let record = self.tree_record(dbi)?;
        btree::get_all_dups(&self.env.pm, dbi.flags, record.root_page_id, key)
    }

    pub fn open_cursor(&self, dbi: &Dbi) -> Result<Cursor<'_, crate::pagemanager::PageManager>> {
        let record = self.tree_record(dbi)?;
        Ok(Cursor::new(&self.env.pm, dbi.flags, RootSource::Fixed(record.root_page_id)))
    }

    /// Explicit abort, identical to dropping the transaction. Named for
    /// symmetry with `WriteTxn::abort`.
    pub fn abort(self) {}
}

impl<'env> Drop for ReadOnlyTxn<'env> {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_handle.take() {
            self.env.reader_table.release(handle);
        }
    }
}

/// The single live write transaction. Holds the environment's write lock
/// for its entire lifetime, so a second concurrent `Env::begin_write` call
/// blocks until this one commits or aborts.
pub struct WriteTxn<'env> {
    env: &'env Env,
    alloc: Allocator<'env>,
    txn_id: u64,
    main_tree: Rc<RefCell<TreeRecord>>,
    gc_tree: RefCell<TreeRecord>,
    dbis: RefCell<HashMap<Option<String>, Rc<RefCell<TreeRecord>>>>,
    poisoned: Cell<bool>,
    _guard: MutexGuard<'env, ()>,
}

impl<'env> WriteTxn<'env> {
    pub(crate) fn new(env: &'env Env, guard: MutexGuard<'env, ()>, txn_id: u64, snapshot: Meta) -> Result<Self> {
        let alloc = Allocator::new(&env.pm, txn_id, Vec::new());
        let oldest = env.oldest_live_reader_snapshot(txn_id);
        let mut gc_tree = snapshot.gc_tree;
        let reclaimed = gc::reclaim_all(&alloc, &mut gc_tree, oldest)?;
        alloc.push_reclaimed(reclaimed);

        let main_tree = Rc::new(RefCell::new(snapshot.main_tree));
        let mut dbis = HashMap::new();
        dbis.insert(None, main_tree.clone());

        Ok(WriteTxn {
            env,
            alloc,
            txn_id,
            main_tree,
            gc_tree: RefCell::new(gc_tree),
            dbis: RefCell::new(dbis),
            poisoned: Cell::new(false),
            _guard: guard,
        })
    }

    fn check_alive(&self) -> Result<()> {
        if self.poisoned.get() {
            Err(Error::BadTxn)
        } else {
            Ok(())
        }
    }

    /// *Corrupt*, *panic*, and *page-not-found* poison the transaction —
    /// every later operation fails with *bad-txn* until it is aborted. Other
    /// failures leave the transaction usable for further operations.
    fn poison_on_err<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            if matches!(e, Error::Corrupt(_) | Error::Panic(_) | Error::PageNotFound(_) | Error::Io(_)) {
                self.poisoned.set(true);
            }
        }
        result
    }

    fn tree_cell(&self, dbi: &Dbi) -> Result<Rc<RefCell<TreeRecord>>> {
        self.dbis.borrow().get(&dbi.name).cloned().ok_or(Error::BadDbi)
    }

    /// Opens (and, if `flags` carries `CREATE` and it does not yet exist,
    /// creates) a named dbi. `name: None` is always the main tree.
    pub fn open_dbi(&self, name: Option<&str>, flags: TreeFlags) -> Result<Dbi> {
        self.check_alive()?;
        let Some(name) = name else {
            return Ok(Dbi { name: None, flags: self.main_tree.borrow().flags });
        };
        let key = Some(name.to_string());
        if let Some(cell) = self.dbis.borrow().get(&key) {
            return Ok(Dbi { name: Some(name.to_string()), flags: cell.borrow().flags });
        }

        let main_root = self.main_tree.borrow().root_page_id;
        let existing = btree::get(&self.alloc, TreeFlags::NONE, main_root, name.as_bytes());
        let record = match existing {
            Ok(bytes) => TreeRecord::read(&bytes),
            Err(Error::NotFound) => {
                if !flags.contains(TreeFlags::CREATE) {
                    return Err(Error::NotFound);
                }
                if self.dbis.borrow().len().saturating_sub(1) >= self.env.max_dbis() {
                    return Err(Error::DbsFull);
                }
                let root_id = self.alloc.allocate(1)?[0];
                TreeRecord::empty(flags, root_id)
            }
            Err(e) => return self.poison_on_err(Err(e)),
        };
        let cell = Rc::new(RefCell::new(record));
        self.dbis.borrow_mut().insert(key, cell);
        Ok(Dbi { name: Some(name.to_string()), flags: record.flags })
    }

    pub fn get(&self, dbi: &Dbi, key: &[u8]) -> Result<Vec<u8>> {
        self.check_alive()?;
        let cell = self.tree_cell(dbi)?;
        let root = cell.borrow().root_page_id;
        self.poison_on_err(btree::get(&self.alloc, dbi.flags, root, key))
    }

    pub fn get_all_dups(&self, dbi: &Dbi, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.check_alive()?;
        let cell = self.tree_cell(dbi)?;
        let root = cell.borrow().root_page_id;
        self.poison_on_err(btree::get_all_dups(&self.alloc, dbi.flags, root, key))
    }

    pub fn put(&self, dbi: &Dbi, key: &[u8], value: &[u8], op: PutFlags) -> Result<()> {
        self.check_alive()?;
        let cell = self.tree_cell(dbi)?;
        let mut tree = cell.borrow_mut();
        let result = btree::put(&self.alloc, &mut tree, dbi.flags, key, value, op);
        drop(tree);
        self.poison_on_err(result)
    }

    pub fn del(&self, dbi: &Dbi, key: &[u8], value: Option<&[u8]>) -> Result<bool> {
        self.check_alive()?;
        let cell = self.tree_cell(dbi)?;
        let mut tree = cell.borrow_mut();
        let result = btree::delete(&self.alloc, &mut tree, dbi.flags, key, value);
        drop(tree);
        self.poison_on_err(result)
    }

    pub fn open_cursor(&self, dbi: &Dbi) -> Result<Cursor<'_, Allocator<'env>>> {
        self.check_alive()?;
        let cell = self.tree_cell(dbi)?;
        Ok(Cursor::new(&self.alloc, dbi.flags, RootSource::Shared(cell)))
    }

    /// Commits in four steps: flush the GC tree to a fixed point, write
    /// dirty pages, write meta to the *other* slot, then publish it as
    /// active. A poisoned transaction cannot commit.
    pub fn commit(self) -> Result<()> {
        self.check_alive()?;

        let dbi_records: Vec<(String, TreeRecord)> = {
            let dbis = self.dbis.borrow();
            let mut records: Vec<(String, TreeRecord)> =
                dbis.iter().filter_map(|(name, cell)| name.as_ref().map(|n| (n.clone(), *cell.borrow()))).collect();
            records.sort_by(|a, b| a.0.cmp(&b.0));
            records
        };
        for (name, record) in dbi_records {
            let mut buf = vec![0u8; TREE_RECORD_SIZE];
            record.write(&mut buf);
            let mut main = self.main_tree.borrow_mut();
            let result = btree::put(&self.alloc, &mut main, TreeFlags::NONE, name.as_bytes(), &buf, PutFlags::upsert());
            drop(main);
            self.poison_on_err(result)?;
        }

        {
            let mut gc_tree = self.gc_tree.borrow_mut();
            let result = gc::record_free_all(&self.alloc, &mut gc_tree, self.txn_id);
            self.poison_on_err(result)?;
        }

        let main_tree = *self.main_tree.borrow();
        let gc_tree = *self.gc_tree.borrow();
        let new_meta = Meta { geometry: self.env.geometry(), main_tree, gc_tree, last_txn_id: self.txn_id };

        let page_size = new_meta.geometry.page_size;
        let (dirty, _freed) = self.alloc.into_parts();
        {
            let mut raw = self.env.pm.raw_mut();
            for (id, bytes) in &dirty {
                let start = *id as usize * page_size;
                raw[start..start + page_size].copy_from_slice(bytes);
            }
        }
        if !self.env.open_flags().contains(OpenFlags::NO_SYNC) {
            self.env.pm.flush()?;
        }

        let next_slot = 1 - self.env.active_slot();
        {
            let mut raw = self.env.pm.raw_mut();
            let start = next_slot as usize * page_size;
            meta::write_meta(&mut raw[start..start + page_size], next_slot, &new_meta);
        }
        if !self.env.open_flags().contains(OpenFlags::NO_META_SYNC) {
            self.env.pm.flush()?;
        }

        self.env.publish(next_slot, new_meta);
        Ok(())
    }

    /// Discards every dirty page and freed-id record this transaction
    /// accumulated. The write lock releases when `self` drops.
    pub fn abort(self) {}
}

#[cfg(test)]
mod tests {
    use crate::env::Env;
    use crate::error::Error;
    use crate::geometry::{Geometry, OpenFlags, TreeFlags};
    use crate::ops::PutFlags;
    use tempfile::NamedTempFile;

    fn small_geometry() -> Geometry {
        let page_size = Geometry::default().page_size;
        Geometry::new(page_size, (page_size * 16) as u64, (page_size * 64) as u64, (page_size * 4096) as u64, (page_size * 64) as u64, 0)
    }

    #[test]
    fn abort_discards_uncommitted_writes() {
        let tmpfile = NamedTempFile::new().unwrap();
        let env = Env::create_or_open(tmpfile.path(), small_geometry(), OpenFlags::NONE, 8).unwrap();
        let txn = env.begin_write().unwrap();
        let dbi = txn.open_dbi(None, TreeFlags::NONE).unwrap();
        txn.put(&dbi, b"k", b"v", PutFlags::upsert()).unwrap();
        txn.abort();

        let read = env.begin_read().unwrap();
        let dbi = read.open_dbi(None).unwrap();
        assert!(matches!(read.get(&dbi, b"k"), Err(Error::NotFound)));
    }

    #[test]
    fn max_dbis_is_enforced() {
        let tmpfile = NamedTempFile::new().unwrap();
        let env = Env::create_or_open(tmpfile.path(), small_geometry(), OpenFlags::NONE, 1).unwrap();
        let txn = env.begin_write().unwrap();
        txn.open_dbi(Some("first"), TreeFlags::CREATE).unwrap();
        let result = txn.open_dbi(Some("second"), TreeFlags::CREATE);
        assert!(matches!(result, Err(Error::DbsFull)));
    }

    #[test]
    fn second_write_txn_waits_for_first_to_drop() {
        let tmpfile = NamedTempFile::new().unwrap();
        let env = Env::create_or_open(tmpfile.path(), small_geometry(), OpenFlags::NONE, 8).unwrap();
        let txn = env.begin_write().unwrap();
        drop(txn);
        // The write lock is released on drop; a second transaction must be
        // obtainable without blocking forever.
        let txn2 = env.begin_write().unwrap();
        txn2.abort();
    }
}
