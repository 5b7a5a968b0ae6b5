use thiserror::Error;

/// Error taxonomy reported to callers. Every internal failure path maps to
/// exactly one of these kinds; lookup/positioning "misses" are reported
/// through `Option`/`NotFound`, not through panics or process aborts.
#[derive(Error, Debug)]
pub enum Error {
    #[error("key not found")]
    NotFound,

    #[error("key already exists")]
    KeyExists,

    #[error("append violates ascending key order")]
    KeyMismatch,

    #[error("page {0} not found")]
    PageNotFound(u64),

    #[error("database is corrupt: {0}")]
    Corrupt(String),

    #[error("invariant violation: {0}")]
    Panic(String),

    #[error("on-disk format version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("database has reached its configured maximum size")]
    MapFull,

    #[error("maximum number of named trees (dbis) reached")]
    DbsFull,

    #[error("reader lock table is full")]
    ReadersFull,

    #[error("too many simultaneous transactions")]
    TxnFull,

    #[error("too many cursors open on this transaction")]
    CursorFull,

    #[error("page has no room for this node")]
    PageFull,

    #[error("the map was resized by another process; caller must retry")]
    MapResized,

    #[error("incompatible database flags")]
    Incompatible,

    #[error("reader slot is invalid or stale")]
    BadReaderSlot,

    #[error("transaction is no longer valid")]
    BadTxn,

    #[error("value size is invalid for this tree's configuration")]
    BadValueSize,

    #[error("unknown or closed dbi handle")]
    BadDbi,

    #[error("cursor has not been positioned")]
    NotInitialized,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
