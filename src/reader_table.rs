//! Reader lock table: the registry of live read-transaction snapshots the
//! writer consults to compute the oldest snapshot still being read, before
//! reclaiming GC-tree entries.
//!
//! Formats like this one typically share such a table across processes via
//! a memory-mapped lock file. This implementation keeps the same
//! `{pid, txn_id, active}` slot contents but holds them in an in-process
//! `Mutex<Vec<ReaderSlot>>` rather than a second mmap, since every `Env` in
//! this crate lives in one process (see DESIGN.md).

use crate::error::{Error, Result};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct ReaderSlot {
    pub pid: u32,
    pub txn_id: u64,
    pub active: bool,
}

pub struct ReaderTable {
    slots: Mutex<Vec<ReaderSlot>>,
    max_readers: usize,
}

/// A registered reader's slot index. Dropping this without calling
/// `ReaderTable::release` leaks the slot for the process lifetime, same as
/// a crashed reader process under the reference design — recoverable only
/// by restarting with a fresh table.
pub struct ReaderHandle(pub usize);

impl ReaderTable {
    pub fn new(max_readers: usize) -> Self {
        ReaderTable { slots: Mutex::new(Vec::new()), max_readers }
    }

    pub fn register(&self, txn_id: u64) -> Result<ReaderHandle> {
        let mut slots = self.slots.lock().unwrap();
        if let Some((idx, slot)) = slots.iter_mut().enumerate().find(|(_, s)| !s.active) {
            slot.active = true;
            slot.txn_id = txn_id;
            slot.pid = std::process::id();
            return Ok(ReaderHandle(idx));
        }
        if slots.len() >= self.max_readers {
            return Err(Error::ReadersFull);
        }
        slots.push(ReaderSlot { pid: std::process::id(), txn_id, active: true });
        Ok(ReaderHandle(slots.len() - 1))
    }

    pub fn release(&self, handle: ReaderHandle) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(handle.0) {
            slot.active = false;
        }
    }

    /// The lowest txn id among currently-registered readers, or `None` if
    /// no reader is live.
    pub fn oldest_live_snapshot(&self) -> Option<u64> {
        self.slots.lock().unwrap().iter().filter(|s| s.active).map(|s| s.txn_id).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_snapshot_tracks_lowest_active_reader() {
        let table = ReaderTable::new(8);
        let a = table.register(5).unwrap();
        let b = table.register(3).unwrap();
        assert_eq!(table.oldest_live_snapshot(), Some(3));
        table.release(b);
        assert_eq!(table.oldest_live_snapshot(), Some(5));
        table.release(a);
        assert_eq!(table.oldest_live_snapshot(), None);
    }

    #[test]
    fn released_slot_is_reused_before_growing() {
        let table = ReaderTable::new(8);
        let a = table.register(1).unwrap();
        table.release(a);
        let b = table.register(2).unwrap();
        assert_eq!(b.0, a.0);
    }

    #[test]
    fn registering_past_capacity_fails() {
        let table = ReaderTable::new(1);
        let _a = table.register(1).unwrap();
        assert!(matches!(table.register(2), Err(Error::ReadersFull)));
    }
}
