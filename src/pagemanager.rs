//! Raw mmap access by page id. Every page in the file is addressable by a
//! `u64` id, and growth is driven by the `Geometry` the environment was
//! opened with rather than an unbounded counter.

use crate::error::{Error, Result};
use crate::geometry::Geometry;
use memmap2::MmapMut;
use std::cell::{Ref, RefCell, RefMut};
use std::fs::File;

pub struct PageManager {
    mmap: RefCell<MmapMut>,
    file: File,
    geometry: RefCell<Geometry>,
}

pub struct Page<'a> {
    mem: Ref<'a, [u8]>,
}

impl<'a> Page<'a> {
    pub fn memory(&self) -> &[u8] {
        &self.mem
    }
}

pub struct PageMut<'a> {
    mem: RefMut<'a, [u8]>,
}

impl<'a> PageMut<'a> {
    pub fn memory(&self) -> &[u8] {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.mem
    }
}

impl PageManager {
    pub fn new(file: File, mmap: MmapMut, geometry: Geometry) -> Self {
        PageManager { mmap: RefCell::new(mmap), file, geometry: RefCell::new(geometry) }
    }

    pub fn geometry(&self) -> Geometry {
        *self.geometry.borrow()
    }

    pub fn page_size(&self) -> usize {
        self.geometry.borrow().page_size
    }

    pub fn page_count(&self) -> u64 {
        self.geometry.borrow().page_count()
    }

    fn bounds(&self, page_id: u64) -> Result<(usize, usize)> {
        let page_size = self.page_size();
        let start = page_id as usize * page_size;
        let end = start + page_size;
        if page_id >= self.page_count() {
            return Err(Error::PageNotFound(page_id));
        }
        Ok((start, end))
    }

    pub fn get_page(&self, page_id: u64) -> Result<Page> {
        let (start, end) = self.bounds(page_id)?;
        Ok(Page { mem: Ref::map(self.mmap.borrow(), |m| &m[start..end]) })
    }

    pub fn get_page_mut(&self, page_id: u64) -> Result<PageMut> {
        let (start, end) = self.bounds(page_id)?;
        Ok(PageMut { mem: RefMut::map(self.mmap.borrow_mut(), |m| &mut m[start..end]) })
    }

    /// Grows the mapped region to accommodate at least `min_pages` pages,
    /// in multiples of the geometry's `growth_step`, without exceeding
    /// `upper`. Extends the backing file, then re-creates the mapping; the
    /// remap happens under the write lock, so no reader ever observes a
    /// torn mapping mid-grow.
    pub fn grow_to(&self, min_pages: u64) -> Result<()> {
        let mut geometry = self.geometry.borrow_mut();
        if min_pages * geometry.page_size as u64 <= geometry.now {
            return Ok(());
        }
        let needed = min_pages * geometry.page_size as u64;
        let mut new_size = geometry.now;
        while new_size < needed {
            new_size += geometry.growth_step.max(geometry.page_size as u64);
        }
        if new_size > geometry.upper {
            if needed > geometry.upper {
                return Err(Error::MapFull);
            }
            new_size = geometry.upper;
        }

        self.mmap.borrow().flush()?;
        self.file.set_len(new_size)?;
        let new_mmap = unsafe { MmapMut::map_mut(&self.file)? };
        *self.mmap.borrow_mut() = new_mmap;
        geometry.now = new_size;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.mmap.borrow().flush()?;
        Ok(())
    }

    pub fn raw(&self) -> Ref<MmapMut> {
        self.mmap.borrow()
    }

    pub fn raw_mut(&self) -> RefMut<MmapMut> {
        self.mmap.borrow_mut()
    }
}
