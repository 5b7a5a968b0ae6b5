//! `PageReader`: the read-only page access surface shared by read-only
//! transactions (which read straight from the mmap through a
//! `PageManager`) and write transactions (which must also see their own
//! not-yet-flushed dirty pages through an `Allocator`). B+tree search code
//! is written once against this trait and works for both.

use crate::alloc::Allocator;
use crate::error::Result;
use crate::pagemanager::PageManager;

pub trait PageReader {
    fn page_size(&self) -> usize;
    fn read(&self, id: u64) -> Result<Vec<u8>>;
}

impl PageReader for PageManager {
    fn page_size(&self) -> usize {
        PageManager::page_size(self)
    }

    fn read(&self, id: u64) -> Result<Vec<u8>> {
        Ok(self.get_page(id)?.memory().to_vec())
    }
}

impl<'env> PageReader for Allocator<'env> {
    fn page_size(&self) -> usize {
        Allocator::page_size(self)
    }

    fn read(&self, id: u64) -> Result<Vec<u8>> {
        Ok(self.read(id)?.bytes().to_vec())
    }
}
