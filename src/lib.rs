//! An embedded, ACID, copy-on-write B+tree key/value store over a single
//! memory-mapped file, bit-compatible with the reference on-disk format.
//!
//! The module layout separates low-level page access (`pagemanager`/
//! `page`/`node`), transaction state (`txn`), and the public handle types
//! (`env`/`dbi`), with a directory-of-trees design supporting any number of
//! named databases within one environment.

pub mod access;
pub mod alloc;
pub mod btree;
pub mod cursor;
pub mod dbi;
pub mod env;
pub mod error;
pub mod gc;
pub mod geometry;
pub mod meta;
pub mod node;
pub mod ops;
pub mod overflow;
pub mod page;
pub mod pagemanager;
pub mod reader_table;
pub mod tree_record;
pub mod txn;

pub use cursor::Cursor;
pub use dbi::Dbi;
pub use env::{Env, EnvBuilder};
pub use error::{Error, Result};
pub use geometry::{Geometry, OpenFlags, TreeFlags};
pub use ops::PutFlags;
pub use txn::{ReadOnlyTxn, WriteTxn};
