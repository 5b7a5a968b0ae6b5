//! Cursor edge cases covering positioning around boundaries and deletes.

use pagekv::{Error, EnvBuilder, Geometry, PutFlags, TreeFlags};
use tempfile::tempdir;

fn env(dir: &tempfile::TempDir) -> pagekv::Env {
    EnvBuilder::new().geometry(Geometry::default()).max_dbis(8).open(&dir.path().join("data.pagekv")).unwrap()
}

#[test]
fn prev_dup_at_first_duplicate_is_not_found() {
    let dir = tempdir().unwrap();
    let env = env(&dir);
    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(Some("d"), TreeFlags::CREATE | TreeFlags::DUP_SORT).unwrap();
    txn.put(&dbi, b"k", b"v1", PutFlags::upsert()).unwrap();
    txn.put(&dbi, b"k", b"v2", PutFlags::upsert()).unwrap();

    let mut cursor = txn.open_cursor(&dbi).unwrap();
    cursor.first_dup().unwrap();
    assert!(matches!(cursor.prev_dup(), Err(Error::NotFound)));
}

#[test]
fn next_dup_at_last_duplicate_is_not_found() {
    let dir = tempdir().unwrap();
    let env = env(&dir);
    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(Some("d"), TreeFlags::CREATE | TreeFlags::DUP_SORT).unwrap();
    txn.put(&dbi, b"k", b"v1", PutFlags::upsert()).unwrap();
    txn.put(&dbi, b"k", b"v2", PutFlags::upsert()).unwrap();

    let mut cursor = txn.open_cursor(&dbi).unwrap();
    cursor.last_dup().unwrap();
    assert!(matches!(cursor.next_dup(), Err(Error::NotFound)));
}

#[test]
fn get_both_range_with_no_value_at_or_above_is_not_found() {
    let dir = tempdir().unwrap();
    let env = env(&dir);
    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(Some("d"), TreeFlags::CREATE | TreeFlags::DUP_SORT).unwrap();
    txn.put(&dbi, b"k", b"v1", PutFlags::upsert()).unwrap();
    txn.put(&dbi, b"k", b"v2", PutFlags::upsert()).unwrap();

    let mut cursor = txn.open_cursor(&dbi).unwrap();
    assert!(matches!(cursor.get_both_range(b"k", b"v9"), Err(Error::NotFound)));
}

#[test]
fn set_range_beyond_last_key_is_not_found() {
    let dir = tempdir().unwrap();
    let env = env(&dir);
    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(None, TreeFlags::NONE).unwrap();
    txn.put(&dbi, b"a", b"1", PutFlags::upsert()).unwrap();
    txn.put(&dbi, b"b", b"2", PutFlags::upsert()).unwrap();

    let mut cursor = txn.open_cursor(&dbi).unwrap();
    assert!(matches!(cursor.set_range(b"z"), Err(Error::NotFound)));
}

#[test]
fn get_current_on_uninitialized_cursor_is_not_initialized() {
    let dir = tempdir().unwrap();
    let env = env(&dir);
    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(None, TreeFlags::NONE).unwrap();
    txn.put(&dbi, b"a", b"1", PutFlags::upsert()).unwrap();

    let mut cursor = txn.open_cursor(&dbi).unwrap();
    assert!(matches!(cursor.get_current(), Err(Error::NotInitialized)));
}

/// "next after reaching end" must leave the cursor positioned so that a
/// subsequent `prev` returns the last element, not unmoored.
#[test]
fn next_past_end_then_prev_returns_last_element() {
    let dir = tempdir().unwrap();
    let env = env(&dir);
    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(None, TreeFlags::NONE).unwrap();
    txn.put(&dbi, b"a", b"1", PutFlags::upsert()).unwrap();
    txn.put(&dbi, b"b", b"2", PutFlags::upsert()).unwrap();
    txn.put(&dbi, b"c", b"3", PutFlags::upsert()).unwrap();

    let mut cursor = txn.open_cursor(&dbi).unwrap();
    cursor.first().unwrap();
    cursor.next().unwrap();
    cursor.next().unwrap();
    assert!(matches!(cursor.next(), Err(Error::NotFound)));
    let (k, v) = cursor.prev().unwrap();
    assert_eq!((k.as_slice(), v.as_slice()), (b"c".as_slice(), b"3".as_slice()));
}

/// Delete-then-get_current returns no-data at the deleted position;
/// delete-then-next advances to the element that follows, without
/// skipping it.
#[test]
fn delete_then_next_advances_to_following_element() {
    let dir = tempdir().unwrap();
    let env = env(&dir);
    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(None, TreeFlags::NONE).unwrap();
    txn.put(&dbi, b"a", b"1", PutFlags::upsert()).unwrap();
    txn.put(&dbi, b"b", b"2", PutFlags::upsert()).unwrap();
    txn.put(&dbi, b"c", b"3", PutFlags::upsert()).unwrap();

    let mut cursor = txn.open_cursor(&dbi).unwrap();
    cursor.set(b"b").unwrap();
    cursor.del().unwrap();
    assert!(matches!(cursor.get_current(), Err(Error::NotFound)));
    let (k, v) = cursor.next().unwrap();
    assert_eq!((k.as_slice(), v.as_slice()), (b"c".as_slice(), b"3".as_slice()));
}

/// Deleting the only remaining entry leaves the cursor on an empty tree;
/// `next` must report not-found rather than materializing a nonexistent
/// slot.
#[test]
fn delete_last_entry_then_next_is_not_found() {
    let dir = tempdir().unwrap();
    let env = env(&dir);
    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(None, TreeFlags::NONE).unwrap();
    txn.put(&dbi, b"only", b"1", PutFlags::upsert()).unwrap();

    let mut cursor = txn.open_cursor(&dbi).unwrap();
    cursor.set(b"only").unwrap();
    cursor.del().unwrap();
    assert!(matches!(cursor.get_current(), Err(Error::NotFound)));
    assert!(matches!(cursor.next(), Err(Error::NotFound)));
}

/// Deleting a middle duplicate must advance to the duplicate that followed
/// it, not back to the first duplicate of the same key.
#[test]
fn delete_middle_duplicate_then_next_advances_to_following_duplicate() {
    let dir = tempdir().unwrap();
    let env = env(&dir);
    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(Some("d"), TreeFlags::CREATE | TreeFlags::DUP_SORT).unwrap();
    txn.put(&dbi, b"k", b"v1", PutFlags::upsert()).unwrap();
    txn.put(&dbi, b"k", b"v2", PutFlags::upsert()).unwrap();
    txn.put(&dbi, b"k", b"v3", PutFlags::upsert()).unwrap();

    let mut cursor = txn.open_cursor(&dbi).unwrap();
    cursor.get_both(b"k", b"v2").unwrap();
    cursor.del().unwrap();
    assert!(matches!(cursor.get_current(), Err(Error::NotFound)));
    let (k, v) = cursor.next().unwrap();
    assert_eq!((k.as_slice(), v.as_slice()), (b"k".as_slice(), b"v3".as_slice()));
}

/// Deleting the last duplicate of a key must fall through to the first
/// duplicate of the next key, not reopen the exhausted key at index 0.
#[test]
fn delete_last_duplicate_then_next_advances_to_next_key() {
    let dir = tempdir().unwrap();
    let env = env(&dir);
    let txn = env.begin_write().unwrap();
    let dbi = txn.open_dbi(Some("d"), TreeFlags::CREATE | TreeFlags::DUP_SORT).unwrap();
    txn.put(&dbi, b"k1", b"v1", PutFlags::upsert()).unwrap();
    txn.put(&dbi, b"k1", b"v2", PutFlags::upsert()).unwrap();
    txn.put(&dbi, b"k2", b"v3", PutFlags::upsert()).unwrap();

    let mut cursor = txn.open_cursor(&dbi).unwrap();
    cursor.get_both(b"k1", b"v2").unwrap();
    cursor.del().unwrap();
    assert!(matches!(cursor.get_current(), Err(Error::NotFound)));
    let (k, v) = cursor.next().unwrap();
    assert_eq!((k.as_slice(), v.as_slice()), (b"k2".as_slice(), b"v3".as_slice()));
}
