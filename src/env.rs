//! Environment: owns the memory map, the write-serialization lock, and the
//! reader lock table.
//!
//! One `PageManager`-backed mapping, opened once and shared by every
//! transaction. The active meta slot is tracked under an `RwLock` so read
//! transactions never block on a writer choosing the other slot at commit.

use crate::error::{Error, Result};
use crate::geometry::{Geometry, OpenFlags, TreeFlags};
use crate::meta::{self, Meta};
use crate::page::{self, Header, HEADER_SIZE};
use crate::pagemanager::PageManager;
use crate::reader_table::ReaderTable;
use crate::tree_record::TreeRecord;
use crate::txn::{ReadOnlyTxn, WriteTxn};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Mutex, RwLock};

/// Fixed root page ids for the two trees the meta page references directly.
/// Every other tree (named dbi) is reachable only through an entry in the
/// main tree (see `crate::dbi`).
pub const MAIN_TREE_ROOT: u64 = 2;
pub const GC_TREE_ROOT: u64 = 3;

const DEFAULT_MAX_READERS: usize = 126;

pub struct Env {
    pub(crate) pm: PageManager,
    pub(crate) reader_table: ReaderTable,
    write_lock: Mutex<()>,
    meta: RwLock<(u64, Meta)>,
    max_dbis: usize,
    open_flags: OpenFlags,
}

impl Env {
    /// Opens `path`, creating and initializing it if empty. `geometry` is
    /// the caller's expected sizing; for an existing file its `page_size`
    /// must match what the file was created with or this fails with
    /// `Incompatible`.
    pub fn create_or_open(path: &Path, geometry: Geometry, open_flags: OpenFlags, max_dbis: usize) -> Result<Env> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let existing_len = file.metadata()?.len();
        let page_size = geometry.page_size;

        if existing_len == 0 {
            let mut sized = geometry;
            let minimum = (page_size * 4) as u64;
            if sized.now < minimum {
                sized.now = minimum;
            }
            file.set_len(sized.now)?;
            let mut mmap = unsafe { MmapMut::map_mut(&file)? };
            let meta = init_fresh(&mut mmap, &sized);
            mmap.flush()?;
            let pm = PageManager::new(file, mmap, sized);
            return Ok(Env {
                pm,
                reader_table: ReaderTable::new(DEFAULT_MAX_READERS),
                write_lock: Mutex::new(()),
                meta: RwLock::new((0, meta)),
                max_dbis,
                open_flags,
            });
        }

        if existing_len < (page_size * 2) as u64 {
            return Err(Error::Corrupt("file too short to hold both meta pages".into()));
        }
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let (slot, meta) = {
            let slot0 = &mmap[0..page_size];
            let slot1 = &mmap[page_size..page_size * 2];
            meta::select_active(slot0, slot1)?
        };
        if meta.geometry.page_size != page_size {
            return Err(Error::Incompatible);
        }
        let pm = PageManager::new(file, mmap, meta.geometry);
        Ok(Env {
            pm,
            reader_table: ReaderTable::new(DEFAULT_MAX_READERS),
            write_lock: Mutex::new(()),
            meta: RwLock::new((slot, meta)),
            max_dbis,
            open_flags,
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.pm.geometry()
    }

    pub fn open_flags(&self) -> OpenFlags {
        self.open_flags
    }

    pub fn max_dbis(&self) -> usize {
        self.max_dbis
    }

    pub fn snapshot(&self) -> Meta {
        self.meta.read().unwrap().1
    }

    pub(crate) fn active_slot(&self) -> u64 {
        self.meta.read().unwrap().0
    }

    /// Installs the newly committed meta as the active snapshot. Called
    /// only from `WriteTxn::commit`, after the new meta page has already
    /// been durably written to the other slot.
    pub(crate) fn publish(&self, slot: u64, meta: Meta) {
        *self.meta.write().unwrap() = (slot, meta);
    }

    pub fn begin_read(&self) -> Result<ReadOnlyTxn> {
        let snapshot = self.snapshot();
        let handle = self.reader_table.register(snapshot.last_txn_id)?;
        Ok(ReadOnlyTxn::new(self, snapshot, handle))
    }

    /// Blocks until any other live write transaction commits or aborts,
    /// enforcing the single-writer rule.
    pub fn begin_write(&self) -> Result<WriteTxn> {
        let guard = self.write_lock.lock().map_err(|_| Error::Panic("write lock poisoned".into()))?;
        let snapshot = self.snapshot();
        let new_txn_id = snapshot.last_txn_id + 1;
        WriteTxn::new(self, guard, new_txn_id, snapshot)
    }

    /// The lowest txn id any live reader still depends on, or `fallback`
    /// (normally the new write txn's own id) if no reader is registered —
    /// everything older than the new txn is then reclaimable.
    pub fn oldest_live_reader_snapshot(&self, fallback: u64) -> u64 {
        self.reader_table.oldest_live_snapshot().unwrap_or(fallback)
    }
}

/// Fluent construction for `Env`, collapsing the reference format's
/// `env_create` / `env_set_geometry` / `env_set_maxdbs` / `env_open` call
/// sequence into one chained builder.
pub struct EnvBuilder {
    geometry: Geometry,
    open_flags: OpenFlags,
    max_dbis: usize,
}

impl Default for EnvBuilder {
    fn default() -> Self {
        EnvBuilder { geometry: Geometry::default(), open_flags: OpenFlags::NONE, max_dbis: 128 }
    }
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn open_flags(mut self, flags: OpenFlags) -> Self {
        self.open_flags = flags;
        self
    }

    pub fn max_dbis(mut self, max_dbis: usize) -> Self {
        self.max_dbis = max_dbis;
        self
    }

    pub fn open(self, path: &Path) -> Result<Env> {
        Env::create_or_open(path, self.geometry, self.open_flags, self.max_dbis)
    }
}


fn init_fresh(mmap: &mut MmapMut, geometry: &Geometry) -> Meta {
    let page_size = geometry.page_size;
    for id in [MAIN_TREE_ROOT, GC_TREE_ROOT] {
        let start = id as usize * page_size;
        let buf = &mut mmap[start..start + page_size];
        page::write_header(
            buf,
            &Header { page_id: id, kind: crate::page::PageKind::Leaf, lower: HEADER_SIZE as u16, upper: page_size as u16, txn_id: 0 },
        );
    }
    let meta = Meta {
        geometry: *geometry,
        main_tree: TreeRecord::empty(TreeFlags::NONE, MAIN_TREE_ROOT),
        gc_tree: TreeRecord::empty(TreeFlags::NONE, GC_TREE_ROOT),
        last_txn_id: 0,
    };
    for slot in meta::META_PAGE_IDS {
        let start = slot as usize * page_size;
        meta::write_meta(&mut mmap[start..start + page_size], slot, &meta);
    }
    meta
}
