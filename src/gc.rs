//! Free-list / GC tree: a B+tree keyed by the 8-byte big-endian txn id that
//! freed a batch of pages, whose value is that batch's sorted page-id list.
//!
//! The GC tree is itself an ordinary `btree` instance running over the same
//! `Allocator` as every other tree in the environment, which makes
//! recording and reclaiming its own freed pages a fixed-point problem:
//! writing an entry into the GC tree COWs the GC tree's own pages, which
//! frees more pages that must themselves be recorded.

use crate::alloc::Allocator;
use crate::btree;
use crate::error::Result;
use crate::geometry::TreeFlags;
use crate::node::NodeFlags;
use crate::ops::PutFlags;
use crate::overflow;
use crate::tree_record::TreeRecord;

const MAX_FIXED_POINT_ITERATIONS: usize = 3;

fn encode_key(txn_id: u64) -> [u8; 8] {
    txn_id.to_be_bytes()
}

fn encode_value(page_ids: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(page_ids.len() * 8);
    for id in page_ids {
        out.extend_from_slice(&id.to_be_bytes());
    }
    out
}

fn decode_value(bytes: &[u8]) -> Vec<u64> {
    bytes.chunks_exact(8).map(|c| u64::from_be_bytes(c.try_into().unwrap())).collect()
}

/// Records one transaction's freed-page batch, keyed by its txn id.
/// `page_ids` must already be sorted and deduplicated. A second call for
/// the same `txn_id` replaces the prior entry outright rather than merging
/// with it, so callers must always pass the full accumulated batch.
pub fn record_free(alloc: &Allocator, gc_tree: &mut TreeRecord, txn_id: u64, page_ids: &[u64]) -> Result<()> {
    if page_ids.is_empty() {
        return Ok(());
    }
    let key = encode_key(txn_id);
    let value = encode_value(page_ids);
    btree::put(alloc, gc_tree, TreeFlags::INTEGER_KEY, &key, &value, PutFlags::upsert())
}

/// Removes and returns the lowest-txn entry strictly older than
/// `oldest_live_reader_snapshot`, if any.
pub fn reclaim(alloc: &Allocator, gc_tree: &mut TreeRecord, oldest_live_reader_snapshot: u64) -> Result<Option<(u64, Vec<u64>)>> {
    let (path, _) = btree::search::descend(alloc, TreeFlags::INTEGER_KEY, gc_tree.root_page_id, &[0u8; 8])?;
    let entry = match path.last() {
        Some(e) => e,
        None => return Ok(None),
    };
    let bytes = alloc.read(entry.page_id)?.bytes().to_vec();
    if crate::node::slot_count(&bytes) == 0 {
        return Ok(None);
    }
    let first = crate::node::NodeAccessor::at_slot(&bytes, 0);
    let key_bytes = first.key();
    let txn_id = u64::from_be_bytes(key_bytes.try_into().unwrap());
    if txn_id >= oldest_live_reader_snapshot {
        return Ok(None);
    }
    let page_ids = if first.flags().contains(NodeFlags::BIG) {
        let head = first.overflow_head();
        let len = first.value_size();
        drop(first);
        decode_value(&overflow::read_overflow(alloc, head, len)?)
    } else {
        let v = decode_value(first.raw_value());
        drop(first);
        v
    };

    let key = encode_key(txn_id);
    btree::delete(alloc, gc_tree, TreeFlags::INTEGER_KEY, &key, None)?;
    Ok(Some((txn_id, page_ids)))
}

/// Records a transaction's full freed set, re-checking after each write
/// since the GC tree's own COW mutations can free further pages that must
/// also be recorded. Each pass re-records the *entire* accumulated set
/// under `txn_id` (never just the newly-seen delta): `record_free`
/// replaces rather than merges, so writing only a delta on a later pass
/// would silently drop whatever an earlier pass already recorded.
pub fn record_free_all(alloc: &Allocator, gc_tree: &mut TreeRecord, txn_id: u64) -> Result<()> {
    let mut last_count = 0;
    for _ in 0..MAX_FIXED_POINT_ITERATIONS {
        let freed = alloc.freed_ids();
        if freed.is_empty() || freed.len() == last_count {
            break;
        }
        last_count = freed.len();
        record_free(alloc, gc_tree, txn_id, &freed)?;
    }
    Ok(())
}

/// Drains every GC-tree entry older than `oldest_live_reader_snapshot` into
/// the allocator's reclaimable pool, re-running until the GC tree stops
/// shrinking (its own mutations can free more of its own pages) or the
/// iteration bound is hit.
pub fn reclaim_all(alloc: &Allocator, gc_tree: &mut TreeRecord, oldest_live_reader_snapshot: u64) -> Result<Vec<u64>> {
    let mut reclaimed = Vec::new();
    for _ in 0..MAX_FIXED_POINT_ITERATIONS {
        let mut made_progress = false;
        while let Some((_, ids)) = reclaim(alloc, gc_tree, oldest_live_reader_snapshot)? {
            reclaimed.extend(ids);
            made_progress = true;
        }
        if !made_progress {
            break;
        }
    }
    Ok(reclaimed)
}
