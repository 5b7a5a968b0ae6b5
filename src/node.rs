//! Node slot codec: the variable-length records packed into a leaf/branch
//! page body.
//!
//! Slot pointers are `u16` page offsets, stored as an array immediately
//! after the page header, growing upward as `lower` increases. Node bodies
//! are packed from `upper` downward. `NodeAccessor`/`NodeMutator` give a
//! zero-copy view over a slot without ever materializing its key/value into
//! an owned buffer unless the caller asks for one.

use crate::error::{Error, Result};
use crate::page::{self, HEADER_SIZE};
use std::convert::TryInto;

pub const NODE_PREFIX_SIZE: usize = 8; // flags:u16 + key_size:u16 + value_size:u32
pub const SLOT_SIZE: usize = 2;

bitflags_node! {
    pub struct NodeFlags: u16 {
        const BIG      = 0x01; // value lives in an overflow chain
        const SUB_DATA = 0x02; // value is an inline dup-sort sub-page
        const SUB_TREE = 0x04; // value is a promoted dup-sort sub-tree header
    }
}

macro_rules! bitflags_node {
    (pub struct $name:ident: $repr:ty { $(const $variant:ident = $value:expr;)* }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub $repr);
        impl $name {
            $(pub const $variant: $name = $name($value);)*
            pub const NONE: $name = $name(0);
            pub fn contains(&self, other: $name) -> bool { self.0 & other.0 == other.0 }
            pub fn bits(&self) -> $repr { self.0 }
        }
        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name { $name(self.0 | rhs.0) }
        }
    };
}
use bitflags_node;

/// Size in bytes of a promoted dup-sort sub-tree header value
/// (root_page_id, depth, leaf_pages, entries).
pub const SUB_TREE_HEADER_SIZE: usize = 8 + 2 + 8 + 8;

fn slot_offset(index: usize) -> usize {
    HEADER_SIZE + index * SLOT_SIZE
}

pub fn slot_count(page_bytes: &[u8]) -> usize {
    (page::lower(page_bytes) as usize - HEADER_SIZE) / SLOT_SIZE
}

fn slot_ptr(page_bytes: &[u8], index: usize) -> u16 {
    let off = slot_offset(index);
    u16::from_le_bytes(page_bytes[off..off + 2].try_into().unwrap())
}

fn set_slot_ptr(page_bytes: &mut [u8], index: usize, value: u16) {
    let off = slot_offset(index);
    page_bytes[off..off + 2].copy_from_slice(&value.to_le_bytes());
}

/// Read-only zero-copy view over one node's body, given the body's start
/// offset within the page.
pub struct NodeAccessor<'a> {
    page: &'a [u8],
    body_offset: usize,
}

impl<'a> NodeAccessor<'a> {
    pub fn at_slot(page: &'a [u8], index: usize) -> NodeAccessor<'a> {
        NodeAccessor { page, body_offset: slot_ptr(page, index) as usize }
    }

    pub fn flags(&self) -> NodeFlags {
        let bits = u16::from_le_bytes(self.page[self.body_offset..self.body_offset + 2].try_into().unwrap());
        NodeFlags(bits)
    }

    pub fn key_size(&self) -> usize {
        u16::from_le_bytes(
            self.page[self.body_offset + 2..self.body_offset + 4].try_into().unwrap(),
        ) as usize
    }

    pub fn value_size(&self) -> usize {
        u32::from_le_bytes(
            self.page[self.body_offset + 4..self.body_offset + 8].try_into().unwrap(),
        ) as usize
    }

    pub fn key(&self) -> &'a [u8] {
        let start = self.body_offset + NODE_PREFIX_SIZE;
        &self.page[start..start + self.key_size()]
    }

    /// Raw bytes stored in the value slot: full value bytes for a plain
    /// node, the 8-byte overflow head page id for `BIG`, the sub-page blob
    /// for `SUB_DATA`, or the sub-tree header for `SUB_TREE`.
    pub fn raw_value(&self) -> &'a [u8] {
        let start = self.body_offset + NODE_PREFIX_SIZE + self.key_size();
        let len = self.stored_value_len();
        &self.page[start..start + len]
    }

    fn stored_value_len(&self) -> usize {
        let flags = self.flags();
        if flags.contains(NodeFlags::BIG) {
            8
        } else if flags.contains(NodeFlags::SUB_TREE) {
            SUB_TREE_HEADER_SIZE
        } else {
            self.value_size()
        }
    }

    pub fn overflow_head(&self) -> u64 {
        debug_assert!(self.flags().contains(NodeFlags::BIG));
        u64::from_le_bytes(self.raw_value().try_into().unwrap())
    }

    pub fn node_size(&self) -> usize {
        NODE_PREFIX_SIZE + self.key_size() + self.stored_value_len()
    }

    pub fn body_offset(&self) -> usize {
        self.body_offset
    }
}

/// Computes the on-page byte cost of a node before it is written, so
/// callers can decide between inline storage, overflow, and splitting.
pub fn encoded_size(key_len: usize, stored_value_len: usize) -> usize {
    NODE_PREFIX_SIZE + key_len + stored_value_len
}

/// Inserts a new slot at `index` (shifting existing slot pointers up by one
/// slot) and appends the node body downward from `upper`. Does not reorder
/// existing slots; the caller is responsible for choosing `index` so that
/// key order is preserved.
pub fn write_node(
    page_bytes: &mut [u8],
    index: usize,
    key: &[u8],
    stored_value: &[u8],
    value_size: u32,
    flags: NodeFlags,
) -> Result<()> {
    let lower = page::lower(page_bytes) as usize;
    let upper = page::upper(page_bytes) as usize;
    let needed = SLOT_SIZE + encoded_size(key.len(), stored_value.len());

    if upper < lower || upper - lower < needed {
        return Err(Error::PageFull);
    }

    let new_upper = upper - (needed - SLOT_SIZE);
    let body = new_upper;

    page_bytes[body..body + 2].copy_from_slice(&flags.bits().to_le_bytes());
    page_bytes[body + 2..body + 4].copy_from_slice(&(key.len() as u16).to_le_bytes());
    page_bytes[body + 4..body + 8].copy_from_slice(&value_size.to_le_bytes());
    let key_start = body + NODE_PREFIX_SIZE;
    page_bytes[key_start..key_start + key.len()].copy_from_slice(key);
    let value_start = key_start + key.len();
    page_bytes[value_start..value_start + stored_value.len()].copy_from_slice(stored_value);

    let count = (lower - HEADER_SIZE) / SLOT_SIZE;
    for i in (index..count).rev() {
        let moved = slot_ptr(page_bytes, i);
        set_slot_ptr(page_bytes, i + 1, moved);
    }
    set_slot_ptr(page_bytes, index, new_upper as u16);

    page::set_lower(page_bytes, (lower + SLOT_SIZE) as u16);
    page::set_upper(page_bytes, new_upper as u16);
    Ok(())
}

/// Removes the slot at `index`, compacting the pointer array. The node
/// body bytes are left in place; `compact_page` reclaims the gap.
pub fn remove_node(page_bytes: &mut [u8], index: usize) {
    let lower = page::lower(page_bytes) as usize;
    let count = (lower - HEADER_SIZE) / SLOT_SIZE;
    for i in index..count - 1 {
        let moved = slot_ptr(page_bytes, i + 1);
        set_slot_ptr(page_bytes, i, moved);
    }
    page::set_lower(page_bytes, (lower - SLOT_SIZE) as u16);
}

/// Rewrites the body area contiguously, in slot order, recovering gaps left
/// by `remove_node`. Idempotent: running this on an already-compact page
/// produces byte-identical output.
pub fn compact_page(page_bytes: &mut [u8], page_size: usize) {
    let count = slot_count(page_bytes);
    let mut bodies: Vec<Vec<u8>> = Vec::with_capacity(count);
    for i in 0..count {
        let acc = NodeAccessor::at_slot(page_bytes, i);
        let start = acc.body_offset();
        let len = acc.node_size();
        bodies.push(page_bytes[start..start + len].to_vec());
    }

    let mut cursor = page_size;
    for (i, body) in bodies.iter().enumerate() {
        cursor -= body.len();
        page_bytes[cursor..cursor + body.len()].copy_from_slice(body);
        set_slot_ptr(page_bytes, i, cursor as u16);
    }
    page::set_upper(page_bytes, cursor as u16);
}

/// Iterates node accessors in slot (key) order.
pub fn iter_nodes<'a>(page_bytes: &'a [u8]) -> impl Iterator<Item = NodeAccessor<'a>> {
    let count = slot_count(page_bytes);
    (0..count).map(move |i| NodeAccessor::at_slot(page_bytes, i))
}

/// Free bytes available in `[lower, upper)` right now.
pub fn free_space(page_bytes: &[u8]) -> usize {
    page::upper(page_bytes) as usize - page::lower(page_bytes) as usize
}

/// Overwrites a node's stored value bytes in place, without touching slot
/// pointers or key bytes. Only valid when the replacement is exactly the
/// same length as what is already there — used for branch child pointers
/// (always 8 bytes) after a child page is COWed to a new id.
pub fn overwrite_fixed_value(page_bytes: &mut [u8], index: usize, value: &[u8]) {
    let (start, len) = {
        let acc = NodeAccessor::at_slot(page_bytes, index);
        (acc.body_offset() + NODE_PREFIX_SIZE + acc.key_size(), acc.raw_value().len())
    };
    assert_eq!(len, value.len(), "overwrite_fixed_value: length mismatch");
    page_bytes[start..start + len].copy_from_slice(value);
}

/// Total bytes used by `count` existing nodes plus their slot pointers;
/// convenience for min-fill checks.
pub fn used_space(page_bytes: &[u8], page_size: usize) -> usize {
    page_size - page::HEADER_SIZE - free_space(page_bytes)
}
