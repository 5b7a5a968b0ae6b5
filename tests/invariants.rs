//! Cross-cutting correctness invariants (ordering, isolation, round-trip
//! fidelity) exercised as integration tests rather than full property-based
//! generators (the crate's dev-dependency set carries `rand` for the
//! randomized portions).

use pagekv::{Error, EnvBuilder, Geometry, PutFlags, TreeFlags};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::tempdir;

fn env(dir: &tempfile::TempDir) -> pagekv::Env {
    let page_size = Geometry::default().page_size;
    let geometry = Geometry::new(page_size, (page_size * 16) as u64, (page_size * 64) as u64, (page_size * 4096) as u64, (page_size * 64) as u64, 0);
    EnvBuilder::new().geometry(geometry).max_dbis(8).open(&dir.path().join("data.pagekv")).unwrap()
}

/// Round-trip: puts and deletes interleaved within one committed txn, then a
/// read reflects exactly the last write per key.
#[test]
fn round_trip_interleaved_put_delete() {
    let dir = tempdir().unwrap();
    let env = env(&dir);

    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let mut keys: Vec<u32> = (0..300).collect();
    keys.shuffle(&mut rng);

    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(None, TreeFlags::NONE).unwrap();
    let mut expected = std::collections::HashMap::new();
    for &k in &keys {
        let key = format!("k{k:05}");
        let value = format!("v{k:05}-a");
        txn.put(&dbi, key.as_bytes(), value.as_bytes(), PutFlags::upsert()).unwrap();
        expected.insert(key.clone(), Some(value));
        if k % 3 == 0 {
            txn.del(&dbi, key.as_bytes(), None).unwrap();
            expected.insert(key, None);
        }
    }
    txn.commit().unwrap();

    let read = env.begin_read().unwrap();
    let dbi = read.open_dbi(None).unwrap();
    for (key, want) in expected {
        match want {
            Some(v) => assert_eq!(read.get(&dbi, key.as_bytes()).unwrap(), v.as_bytes()),
            None => assert!(matches!(read.get(&dbi, key.as_bytes()), Err(Error::NotFound))),
        }
    }
}

/// Reader isolation: a read txn begun before a writer's commit must keep
/// seeing the pre-commit state for its entire lifetime.
#[test]
fn reader_isolation_across_concurrent_commit() {
    let dir = tempdir().unwrap();
    let env = env(&dir);

    {
        let txn = env.begin_write().unwrap();
        let dbi = txn.open_dbi(None, TreeFlags::NONE).unwrap();
        txn.put(&dbi, b"a", b"before", PutFlags::upsert()).unwrap();
        txn.commit().unwrap();
    }

    let reader = env.begin_read().unwrap();
    let reader_dbi = reader.open_dbi(None).unwrap();

    {
        let txn = env.begin_write().unwrap();
        let dbi = txn.open_dbi(None, TreeFlags::NONE).unwrap();
        txn.put(&dbi, b"a", b"after", PutFlags::upsert()).unwrap();
        txn.put(&dbi, b"b", b"new", PutFlags::upsert()).unwrap();
        txn.commit().unwrap();
    }

    assert_eq!(reader.get(&reader_dbi, b"a").unwrap(), b"before");
    assert!(matches!(reader.get(&reader_dbi, b"b"), Err(Error::NotFound)));

    let fresh = env.begin_read().unwrap();
    let fresh_dbi = fresh.open_dbi(None).unwrap();
    assert_eq!(fresh.get(&fresh_dbi, b"a").unwrap(), b"after");
    assert_eq!(fresh.get(&fresh_dbi, b"b").unwrap(), b"new");
}

/// Key order: cursor iteration over an unsorted insertion order always
/// yields ascending keys.
#[test]
fn key_order_ascending_via_cursor() {
    let dir = tempdir().unwrap();
    let env = env(&dir);

    let mut rng = rand::rngs::StdRng::seed_from_u64(11);
    let mut keys: Vec<u32> = (0..500).collect();
    keys.shuffle(&mut rng);

    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(None, TreeFlags::NONE).unwrap();
    for &k in &keys {
        txn.put(&dbi, format!("k{k:05}").as_bytes(), b"v", PutFlags::upsert()).unwrap();
    }
    txn.commit().unwrap();

    let read = env.begin_read().unwrap();
    let dbi = read.open_dbi(None).unwrap();
    let mut cursor = read.open_cursor(&dbi).unwrap();
    let mut seen = Vec::new();
    let mut res = cursor.first();
    while let Ok((k, _)) = res {
        seen.push(k);
        res = cursor.next();
    }
    assert_eq!(seen.len(), 500);
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted);
}

/// Cursor consistency: after writes through one live cursor, a fresh cursor
/// positioned via `set`/`set_range` agrees with the live cursor's
/// `get_current`.
#[test]
fn cursor_consistency_after_writes() {
    let dir = tempdir().unwrap();
    let env = env(&dir);

    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(None, TreeFlags::NONE).unwrap();
    for i in 0..20u32 {
        txn.put(&dbi, format!("k{i:04}").as_bytes(), format!("v{i:04}").as_bytes(), PutFlags::upsert()).unwrap();
    }

    let mut writer_cursor = txn.open_cursor(&dbi).unwrap();
    writer_cursor.put(b"k0015-x", b"inserted", PutFlags::upsert()).unwrap();
    let live = writer_cursor.get_current().unwrap();

    let mut fresh_cursor = txn.open_cursor(&dbi).unwrap();
    let via_set = fresh_cursor.set(b"k0015-x").unwrap();
    assert_eq!(live, via_set);

    let via_set_range = fresh_cursor.set_range(b"k0015-x").unwrap();
    assert_eq!(live, via_set_range);
}

/// Delete until empty: the tree and its cursor both handle the resulting
/// empty-tree case without panicking or returning the wrong kind of error.
#[test]
fn delete_until_empty() {
    let dir = tempdir().unwrap();
    let env = env(&dir);

    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(None, TreeFlags::NONE).unwrap();
    for i in 0..10u32 {
        txn.put(&dbi, format!("k{i:02}").as_bytes(), b"v", PutFlags::upsert()).unwrap();
    }
    for i in 0..10u32 {
        assert!(txn.del(&dbi, format!("k{i:02}").as_bytes(), None).unwrap());
    }
    txn.commit().unwrap();

    let read = env.begin_read().unwrap();
    let dbi = read.open_dbi(None).unwrap();
    let mut cursor = read.open_cursor(&dbi).unwrap();
    assert!(matches!(cursor.first(), Err(Error::NotFound)));
    assert!(matches!(read.get(&dbi, b"k00"), Err(Error::NotFound)));
}
