//! Overflow chains: the linked run of pages used to store a single "big"
//! value that does not fit inline in a node.
//!
//! Layout per overflow page: the standard 24-byte header (kind = Overflow),
//! an 8-byte `next` page id (`NO_NEXT` sentinel when this is the chain's
//! last page), then payload bytes filling the rest of the page.

use crate::alloc::Allocator;
use crate::error::Result;
use crate::page::{self, Header, PageKind, HEADER_SIZE};
use crate::pagemanager::PageManager;
use std::convert::TryInto;

const NEXT_FIELD_SIZE: usize = 8;
const NO_NEXT: u64 = u64::MAX;

pub trait PageSource {
    fn page_size(&self) -> usize;
    fn read_bytes(&self, id: u64) -> Result<Vec<u8>>;
}

impl PageSource for PageManager {
    fn page_size(&self) -> usize {
        PageManager::page_size(self)
    }
    fn read_bytes(&self, id: u64) -> Result<Vec<u8>> {
        Ok(self.get_page(id)?.memory().to_vec())
    }
}

impl<'env> PageSource for Allocator<'env> {
    fn page_size(&self) -> usize {
        Allocator::page_size(self)
    }
    fn read_bytes(&self, id: u64) -> Result<Vec<u8>> {
        Ok(self.read(id)?.bytes().to_vec())
    }
}

fn usable(page_size: usize) -> usize {
    page_size - HEADER_SIZE - NEXT_FIELD_SIZE
}

/// Writes `value` into a freshly allocated overflow chain and returns the
/// head page id. Always allocates a new chain rather than reusing an
/// existing same-length chain on update, trading a possible extra COW for
/// simpler bookkeeping.
pub fn write_overflow(alloc: &Allocator, value: &[u8]) -> Result<u64> {
    let page_size = alloc.page_size();
    let chunk = usable(page_size);
    let count = page::overflow_page_count(value.len(), page_size).max(1) as usize;
    let ids = alloc.allocate(count)?;

    for (i, &id) in ids.iter().enumerate() {
        let start = i * chunk;
        let end = (start + chunk).min(value.len());
        let next = if i + 1 < ids.len() { ids[i + 1] } else { NO_NEXT };
        let mut buf = alloc.write_mut(id)?;
        page::write_header(
            &mut buf,
            &Header { page_id: id, kind: PageKind::Overflow, lower: HEADER_SIZE as u16, upper: page_size as u16, txn_id: alloc.txn_id() },
        );
        buf[HEADER_SIZE..HEADER_SIZE + NEXT_FIELD_SIZE].copy_from_slice(&next.to_le_bytes());
        let payload = &mut buf[HEADER_SIZE + NEXT_FIELD_SIZE..];
        payload[..end - start].copy_from_slice(&value[start..end]);
    }

    Ok(ids[0])
}

/// Reads a big value back into a contiguous byte vector by walking the
/// chain from `head`.
pub fn read_overflow(source: &dyn PageSource, head: u64, total_len: usize) -> Result<Vec<u8>> {
    let page_size = source.page_size();
    let chunk = usable(page_size);
    let mut out = Vec::with_capacity(total_len);
    let mut id = head;
    while out.len() < total_len {
        let bytes = source.read_bytes(id)?;
        let next = u64::from_le_bytes(
            bytes[HEADER_SIZE..HEADER_SIZE + NEXT_FIELD_SIZE].try_into().unwrap(),
        );
        let remaining = total_len - out.len();
        let take = remaining.min(chunk);
        out.extend_from_slice(&bytes[HEADER_SIZE + NEXT_FIELD_SIZE..HEADER_SIZE + NEXT_FIELD_SIZE + take]);
        if next == NO_NEXT {
            break;
        }
        id = next;
    }
    Ok(out)
}

/// Frees every page in the chain headed by `head`.
pub fn free_overflow(alloc: &Allocator, head: u64, total_len: usize) -> Result<()> {
    let page_size = alloc.page_size();
    let chunk = usable(page_size);
    let mut ids = Vec::new();
    let mut id = head;
    let mut seen = 0usize;
    loop {
        ids.push(id);
        seen += chunk;
        let bytes = alloc.read(id)?.bytes().to_vec();
        let next = u64::from_le_bytes(
            bytes[HEADER_SIZE..HEADER_SIZE + NEXT_FIELD_SIZE].try_into().unwrap(),
        );
        if next == NO_NEXT || seen >= total_len {
            break;
        }
        id = next;
    }
    alloc.free(&ids);
    Ok(())
}
