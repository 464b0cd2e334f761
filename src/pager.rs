use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, trace};

use crate::constants::*;

#[derive(Debug)]
pub struct Page {
    pub buffer: [u8; PAGE_SIZE],
}

impl Page {
    fn zeroed() -> Box<Self> {
        Box::new(Page {
            buffer: [0u8; PAGE_SIZE],
        })
    }
}

struct CachedPage {
    page: Box<Page>,
    dirty: bool,
}

pub struct Pager {
    file: File,
    file_length: u64,
    num_pages: u32,
    max_pages: usize,
    pages: HashMap<u32, CachedPage>,
}

#[derive(Debug, Error)]
pub enum PagerError {
    #[error("I/O error: {0}")]
    File(#[from] std::io::Error),
    #[error("Db file is not a whole number of pages. Corrupt file.")]
    Corrupt { file_length: u64 },
    #[error("Tried to fetch page number out of bounds. {page_num} > {max_pages}")]
    PagesFull { page_num: u32, max_pages: usize },
    #[error("page capacity must be at least one page")]
    NoCapacity,
}

impl Pager {
    pub fn new<P>(filename: P, max_pages: usize) -> Result<Self, PagerError>
    where
        P: AsRef<Path>,
    {
        if max_pages == 0 {
            return Err(PagerError::NoCapacity);
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(filename)?;
        let file_length = file.seek(SeekFrom::End(0))?;

        // A partial page at the end means an earlier session died mid-write.
        if file_length % PAGE_SIZE as u64 != 0 {
            return Err(PagerError::Corrupt { file_length });
        }

        let num_pages = (file_length / PAGE_SIZE as u64) as u32;
        debug!(file_length, num_pages, max_pages, "opened pager");

        Ok(Pager {
            file,
            file_length,
            num_pages,
            max_pages,
            pages: HashMap::new(),
        })
    }

    /// Number of pages known to the pager, counting pages that exist only in
    /// the cache so far.
    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Pages are never reused, so a fresh page always goes at the end.
    pub fn unused_page_num(&self) -> u32 {
        self.num_pages
    }

    pub fn get_page(&mut self, page_num: u32) -> Result<&Page, PagerError> {
        self.load(page_num).map(|cached| &*cached.page)
    }

    /// Like `get_page`, but the page is written back on close.
    pub fn get_page_mut(&mut self, page_num: u32) -> Result<&mut Page, PagerError> {
        let cached = self.load(page_num)?;
        cached.dirty = true;
        Ok(&mut *cached.page)
    }

    fn load(&mut self, page_num: u32) -> Result<&mut CachedPage, PagerError> {
        if page_num as usize >= self.max_pages {
            return Err(PagerError::PagesFull {
                page_num,
                max_pages: self.max_pages,
            });
        }

        match self.pages.entry(page_num) {
            Entry::Occupied(o) => Ok(o.into_mut()),
            Entry::Vacant(v) => {
                let mut page = Page::zeroed();
                let pages_on_disk = self.file_length / PAGE_SIZE as u64;

                // pages past the end of the file have never been flushed; they start zeroed
                if (page_num as u64) < pages_on_disk {
                    trace!(page_num, "reading page from disk");
                    self.file
                        .seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
                    self.file.read_exact(&mut page.buffer)?;
                }

                if page_num >= self.num_pages {
                    self.num_pages = page_num + 1;
                }

                Ok(v.insert(CachedPage { page, dirty: false }))
            }
        }
    }

    pub fn flush(&mut self, page_num: u32) -> Result<(), PagerError> {
        let cached = match self.pages.get_mut(&page_num) {
            Some(cached) => cached,
            // a page that was never read cannot have been changed
            _ => return Ok(()),
        };

        self.file
            .seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
        self.file.write_all(&cached.page.buffer)?;
        cached.dirty = false;

        let end = (page_num as u64 + 1) * PAGE_SIZE as u64;
        if end > self.file_length {
            self.file_length = end;
        }
        trace!(page_num, "flushed page");
        Ok(())
    }

    /// Writes every dirty page back to the file.
    pub fn flush_all(&mut self) -> Result<(), PagerError> {
        let mut dirty: Vec<u32> = self
            .pages
            .iter()
            .filter(|(_, cached)| cached.dirty)
            .map(|(page_num, _)| *page_num)
            .collect();
        // in page order, so the file only ever grows by whole pages at its end
        dirty.sort_unstable();

        debug!(pages = dirty.len(), "flushing dirty pages");
        for page_num in dirty {
            self.flush(page_num)?;
        }
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn new_file_has_no_pages() {
        let dir = tempdir().unwrap();
        let pager = Pager::new(dir.path().join("test.db"), TABLE_MAX_PAGES).unwrap();
        assert_eq!(pager.num_pages(), 0);
        assert_eq!(pager.unused_page_num(), 0);
    }

    #[test]
    fn touching_a_page_extends_the_page_count() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::new(dir.path().join("test.db"), TABLE_MAX_PAGES).unwrap();

        pager.get_page(2).unwrap();
        assert_eq!(pager.num_pages(), 3);
        assert_eq!(pager.unused_page_num(), 3);
    }

    #[test]
    fn dirty_pages_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut pager = Pager::new(&path, TABLE_MAX_PAGES).unwrap();
            pager.get_page_mut(0).unwrap().buffer[0] = 7;
            pager.get_page_mut(1).unwrap().buffer[PAGE_SIZE - 1] = 9;
            pager.flush_all().unwrap();
        }

        let mut pager = Pager::new(&path, TABLE_MAX_PAGES).unwrap();
        assert_eq!(pager.num_pages(), 2);
        assert_eq!(pager.get_page(0).unwrap().buffer[0], 7);
        assert_eq!(pager.get_page(1).unwrap().buffer[PAGE_SIZE - 1], 9);
    }

    #[test]
    fn clean_pages_are_not_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let mut pager = Pager::new(&path, TABLE_MAX_PAGES).unwrap();
        pager.get_page(0).unwrap();
        pager.flush_all().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn partial_page_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        std::fs::write(&path, vec![0u8; PAGE_SIZE + 10]).unwrap();

        match Pager::new(&path, TABLE_MAX_PAGES) {
            Err(PagerError::Corrupt { file_length }) => {
                assert_eq!(file_length, PAGE_SIZE as u64 + 10)
            }
            Err(e) => panic!("unexpected error {:?}", e),
            Ok(_) => panic!("expected corruption error"),
        }
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Pager::new(dir.path().join("test.db"), 0),
            Err(PagerError::NoCapacity)
        ));
    }

    #[test]
    fn huge_capacity_does_not_preallocate() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::new(dir.path().join("test.db"), usize::MAX).unwrap();

        pager.get_page_mut(3).unwrap().buffer[0] = 1;
        assert_eq!(pager.pages.len(), 1);
        assert_eq!(pager.num_pages(), 4);
    }

    #[test]
    fn pages_past_capacity_are_rejected() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::new(dir.path().join("test.db"), 4).unwrap();

        assert!(pager.get_page(3).is_ok());
        assert!(matches!(
            pager.get_page(4),
            Err(PagerError::PagesFull {
                page_num: 4,
                max_pages: 4
            })
        ));
    }
}
