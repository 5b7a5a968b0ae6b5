//! Integration tests for concrete end-to-end scenarios: basic put/get,
//! dup-sort traversal and deletion, range deletion, persistence across
//! reopen, split edge cases, and concurrent reader/writer load.

use pagekv::{Env, EnvBuilder, Error, Geometry, OpenFlags, PutFlags, TreeFlags};
use tempfile::tempdir;

fn small_geometry() -> Geometry {
    let page_size = Geometry::default().page_size;
    Geometry::new(page_size, (page_size * 16) as u64, (page_size * 64) as u64, (page_size * 4096) as u64, (page_size * 64) as u64, 0)
}

fn open_env() -> (tempfile::TempDir, Env) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.pagekv");
    let env = EnvBuilder::new().geometry(small_geometry()).open_flags(OpenFlags::NONE).max_dbis(16).open(&path).unwrap();
    (dir, env)
}

/// S1. Basic put/get, distinct keys.
#[test]
fn s1_basic_put_get_distinct_keys() {
    let (_dir, env) = open_env();
    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(None, TreeFlags::NONE).unwrap();
    for i in 0..100u32 {
        let key = format!("key-{i:05}");
        let value = format!("value-{i:05}");
        txn.put(&dbi, key.as_bytes(), value.as_bytes(), PutFlags::upsert()).unwrap();
    }
    txn.commit().unwrap();

    let read = env.begin_read().unwrap();
    let dbi = read.open_dbi(None).unwrap();
    for i in 0..100u32 {
        let key = format!("key-{i:05}");
        let value = format!("value-{i:05}");
        assert_eq!(read.get(&dbi, key.as_bytes()).unwrap(), value.as_bytes());
    }

    let mut cursor = read.open_cursor(&dbi).unwrap();
    let mut count = 0;
    let mut res = cursor.first();
    while res.is_ok() {
        count += 1;
        res = cursor.next();
    }
    assert_eq!(count, 100);
}

/// S2. Dup-sort FirstDup/NextDup.
#[test]
fn s2_dup_sort_first_next_dup() {
    let (_dir, env) = open_env();
    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(Some("dups"), TreeFlags::CREATE | TreeFlags::DUP_SORT).unwrap();

    txn.put(&dbi, b"key2", b"value1.1", PutFlags::upsert()).unwrap();
    txn.put(&dbi, b"key2", b"value1.2", PutFlags::upsert()).unwrap();
    txn.put(&dbi, b"key3", b"value1.6", PutFlags::upsert()).unwrap();
    txn.put(&dbi, b"key", b"value1.7", PutFlags::upsert()).unwrap();

    {
        let mut cursor = txn.open_cursor(&dbi).unwrap();
        cursor.put(b"key2", b"value1.2", PutFlags::upsert()).unwrap();
        cursor.put(b"key3", b"value1.6", PutFlags::upsert()).unwrap();
        cursor.put(b"key", b"value1.7", PutFlags::upsert()).unwrap();

        let current = cursor.get_current().unwrap();
        assert_eq!(current, (b"key".to_vec(), b"value1.7".to_vec()));

        let mut keys = Vec::new();
        let mut values = Vec::new();
        let (k, v) = cursor.get_current().unwrap();
        keys.push(k);
        values.push(v);
        while let Ok((k, v)) = cursor.next() {
            keys.push(k);
            values.push(v);
        }
        assert_eq!(keys, vec![b"key".to_vec(), b"key2".to_vec(), b"key2".to_vec(), b"key3".to_vec()]);
        assert_eq!(values, vec![b"value1.7".to_vec(), b"value1.1".to_vec(), b"value1.2".to_vec(), b"value1.6".to_vec()]);
    }
    txn.commit().unwrap();
}

/// S3. DeleteExact on dup-sort.
#[test]
fn s3_delete_exact_on_dup_sort() {
    let (_dir, env) = open_env();
    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(Some("dups"), TreeFlags::CREATE | TreeFlags::DUP_SORT).unwrap();

    let pairs: [(&[u8], &[u8]); 4] =
        [(b"key1", b"value1.1"), (b"key1", b"value1.3"), (b"key3", b"value3.1"), (b"key3", b"value3.3")];
    for (k, v) in pairs {
        txn.put(&dbi, k, v, PutFlags::upsert()).unwrap();
    }

    {
        let mut cursor = txn.open_cursor(&dbi).unwrap();
        for (k, v) in pairs {
            cursor.get_both(k, v).unwrap();
            cursor.del().unwrap();
        }
    }

    {
        let mut cursor = txn.open_cursor(&dbi).unwrap();
        assert!(matches!(cursor.first(), Err(Error::NotFound)));
    }
    txn.commit().unwrap();

    let read = env.begin_read().unwrap();
    let dbi = read.open_dbi(Some("dups")).unwrap();
    let mut cursor = read.open_cursor(&dbi).unwrap();
    assert!(matches!(cursor.first(), Err(Error::NotFound)));
}

/// S4. Delete-range preserving out-of-range entries.
#[test]
fn s4_delete_range_preserves_out_of_range() {
    let (_dir, env) = open_env();
    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(Some("ints"), TreeFlags::CREATE | TreeFlags::INTEGER_KEY).unwrap();

    let values: Vec<(u64, Vec<u8>)> = (0u64..4).map(|i| (i, vec![i as u8; 507])).collect();
    for (k, v) in &values {
        txn.put(&dbi, &k.to_be_bytes(), v, PutFlags::upsert()).unwrap();
    }

    {
        let mut cursor = txn.open_cursor(&dbi).unwrap();
        let key3 = 3u64.to_be_bytes();
        let mut pos = cursor.set_range(&1u64.to_be_bytes());
        loop {
            let (k, _) = match pos {
                Ok(kv) => kv,
                Err(_) => break,
            };
            if k.as_slice() >= key3.as_slice() {
                break;
            }
            cursor.del().unwrap();
            pos = cursor.next();
        }
    }
    txn.commit().unwrap();

    let read = env.begin_read().unwrap();
    let dbi = read.open_dbi(Some("ints")).unwrap();
    assert_eq!(read.get(&dbi, &0u64.to_be_bytes()).unwrap(), values[0].1);
    assert_eq!(read.get(&dbi, &3u64.to_be_bytes()).unwrap(), values[3].1);
    assert!(matches!(read.get(&dbi, &1u64.to_be_bytes()), Err(Error::NotFound)));
    assert!(matches!(read.get(&dbi, &2u64.to_be_bytes()), Err(Error::NotFound)));
}

/// S5. A close-then-reopen round trip over the same on-disk file, which
/// exercises the same meta-swap/page-codec path a true cross-engine reader
/// would depend on (DESIGN.md "Known simplifications").
#[test]
fn s5_persistence_round_trip_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.pagekv");
    let geometry = small_geometry();

    {
        let env = EnvBuilder::new().geometry(geometry).max_dbis(8).open(&path).unwrap();
        let txn = env.begin_write().unwrap();
        let dbi = txn.open_dbi(Some("dups"), TreeFlags::CREATE | TreeFlags::DUP_SORT).unwrap();
        for i in 0..200u32 {
            txn.put(&dbi, b"k", format!("v{i:04}").as_bytes(), PutFlags::upsert()).unwrap();
        }
        txn.commit().unwrap();
    }

    {
        let env = EnvBuilder::new().geometry(geometry).max_dbis(8).open(&path).unwrap();
        let read = env.begin_read().unwrap();
        let dbi = read.open_dbi(Some("dups")).unwrap();
        let all = read.get_all_dups(&dbi, b"k").unwrap();
        assert_eq!(all.len(), 200);
        for (i, v) in all.iter().enumerate() {
            assert_eq!(v.as_slice(), format!("v{i:04}").as_bytes());
        }
    }

    {
        let env = EnvBuilder::new().geometry(geometry).max_dbis(8).open(&path).unwrap();
        let txn = env.begin_write().unwrap();
        let dbi = txn.open_dbi(Some("dups"), TreeFlags::NONE).unwrap();
        for i in (0..200u32).step_by(2) {
            txn.del(&dbi, b"k", Some(format!("v{i:04}").as_bytes())).unwrap();
        }
        txn.commit().unwrap();
    }

    {
        let env = EnvBuilder::new().geometry(geometry).max_dbis(8).open(&path).unwrap();
        let read = env.begin_read().unwrap();
        let dbi = read.open_dbi(Some("dups")).unwrap();
        let all = read.get_all_dups(&dbi, b"k").unwrap();
        assert_eq!(all.len(), 100);
        for (i, v) in all.iter().enumerate() {
            assert_eq!(v.as_slice(), format!("v{:04}", i * 2 + 1).as_bytes());
        }
    }
}

/// S6. Split edge case (split_idx = 0): two large nodes occupying most of a
/// page, then a third node inserted between them at the maximum inline size.
#[test]
fn s6_split_edge_case() {
    let (_dir, env) = open_env();
    let page_size = env.geometry().page_size;
    let big = page_size / 2 - 64;

    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(None, TreeFlags::NONE).unwrap();
    txn.put(&dbi, b"key-a", &vec![1u8; big], PutFlags::upsert()).unwrap();
    txn.put(&dbi, b"key-c", &vec![3u8; big], PutFlags::upsert()).unwrap();
    let max_inline = page_size / 2 - 8 - 2;
    txn.put(&dbi, b"key-b", &vec![2u8; max_inline], PutFlags::upsert()).unwrap();
    txn.commit().unwrap();

    let read = env.begin_read().unwrap();
    let dbi = read.open_dbi(None).unwrap();
    assert_eq!(read.get(&dbi, b"key-a").unwrap(), vec![1u8; big]);
    assert_eq!(read.get(&dbi, b"key-b").unwrap(), vec![2u8; max_inline]);
    assert_eq!(read.get(&dbi, b"key-c").unwrap(), vec![3u8; big]);
}

/// S7. Concurrent readers with writer growth: error rates for reads and
/// writes must each stay under 1%, and no hard error (corrupt/panic) may
/// ever occur.
#[test]
fn s7_concurrent_readers_with_writer_growth() {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    let dir = tempdir().unwrap();
    let path = dir.path().join("data.pagekv");
    let page_size = Geometry::default().page_size;
    let geometry = Geometry::new(page_size, (page_size * 10) as u64, (page_size * 10) as u64, (page_size * 8192) as u64, (page_size * 16) as u64, 0);
    let env = Arc::new(EnvBuilder::new().geometry(geometry).max_dbis(4).open(&path).unwrap());

    {
        let txn = env.begin_write().unwrap();
        let dbi = txn.open_dbi(None, TreeFlags::NONE).unwrap();
        for i in 0..50u32 {
            txn.put(&dbi, format!("seed-{i:04}").as_bytes(), b"v", PutFlags::upsert()).unwrap();
        }
        txn.commit().unwrap();
    }

    let read_errors = Arc::new(AtomicU64::new(0));
    let read_ops = Arc::new(AtomicU64::new(0));
    let write_errors = Arc::new(AtomicU64::new(0));
    let write_ops = Arc::new(AtomicU64::new(0));
    let hard_errors = Arc::new(AtomicU64::new(0));
    let deadline = Instant::now() + Duration::from_secs(3);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let env = env.clone();
        let read_errors = read_errors.clone();
        let read_ops = read_ops.clone();
        let hard_errors = hard_errors.clone();
        handles.push(std::thread::spawn(move || {
            while Instant::now() < deadline {
                match env.begin_read() {
                    Ok(txn) => {
                        let dbi = txn.open_dbi(None).unwrap();
                        for i in 0..50u32 {
                            read_ops.fetch_add(1, Ordering::Relaxed);
                            match txn.get(&dbi, format!("seed-{i:04}").as_bytes()) {
                                Ok(_) | Err(Error::NotFound) => {}
                                Err(Error::Corrupt(_)) | Err(Error::Panic(_)) => {
                                    hard_errors.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(_) => {
                                    read_errors.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }
                    }
                    Err(_) => {
                        read_errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));
    }
    for writer_id in 0..2 {
        let env = env.clone();
        let write_errors = write_errors.clone();
        let write_ops = write_ops.clone();
        let hard_errors = hard_errors.clone();
        handles.push(std::thread::spawn(move || {
            let mut growth = 16usize;
            while Instant::now() < deadline {
                let txn = match env.begin_write() {
                    Ok(t) => t,
                    Err(_) => {
                        write_errors.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                };
                let dbi = match txn.open_dbi(None, TreeFlags::NONE) {
                    Ok(d) => d,
                    Err(_) => {
                        write_errors.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                };
                for i in 0..20u32 {
                    write_ops.fetch_add(1, Ordering::Relaxed);
                    let key = format!("w{writer_id}-{i:04}");
                    let value = vec![writer_id as u8; growth];
                    match txn.put(&dbi, key.as_bytes(), &value, PutFlags::upsert()) {
                        Ok(()) => {}
                        Err(Error::Corrupt(_)) | Err(Error::Panic(_)) => {
                            hard_errors.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            write_errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                let _ = txn.commit();
                growth += 8;
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(hard_errors.load(Ordering::Relaxed), 0);
    let r_ops = read_ops.load(Ordering::Relaxed).max(1);
    let w_ops = write_ops.load(Ordering::Relaxed).max(1);
    assert!((read_errors.load(Ordering::Relaxed) as f64 / r_ops as f64) < 0.01);
    assert!((write_errors.load(Ordering::Relaxed) as f64 / w_ops as f64) < 0.01);
}
