//! Page store: byte source abstraction and cached page reads
//!
//! The store maps a read-only byte source into logical pages. Physical
//! pages 0 and 1 hold the database header and its shadow, so logical page
//! N lives at byte offset `(N + 1) * page_size`. Decoded pages are kept in
//! a bounded cache behind a mutex; a cache hit hands out a shared `Arc`,
//! which is what lets multiple cursors scan concurrently.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::page::{Page, PageLayout};

/// Default number of decoded pages kept in the cache
pub const DEFAULT_PAGE_CACHE_SIZE: usize = 4096;

/// A read-only, byte-addressable source of database data
pub trait ByteSource: Send + Sync {
    /// Read exactly `buf.len()` bytes at `offset`
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Total length of the source in bytes
    fn len(&self) -> u64;

    /// Whether the source is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Memory-mapped file source
pub struct MmapSource {
    mmap: Mmap,
}

impl MmapSource {
    /// Map a file read-only
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::Io(e.to_string()))?;
        // Read-only map of a file we never modify
        let mmap = unsafe { Mmap::map(&file).map_err(|e| Error::Io(e.to_string()))? };
        Ok(Self { mmap })
    }
}

impl ByteSource for MmapSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.mmap.len() {
            return Err(Error::Truncated("read past end of mapped file"));
        }
        buf.copy_from_slice(&self.mmap[start..end]);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }
}

impl ByteSource for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.len() {
            return Err(Error::Truncated("read past end of buffer"));
        }
        buf.copy_from_slice(&self[start..end]);
        Ok(())
    }

    fn len(&self) -> u64 {
        Vec::len(self) as u64
    }
}

/// Bounded LRU cache of decoded pages
struct PageCache {
    entries: HashMap<u32, (Arc<Page>, u64)>,
    capacity: usize,
    tick: u64,
}

impl PageCache {
    fn new(capacity: usize) -> Self {
        Self { entries: HashMap::new(), capacity: capacity.max(1), tick: 0 }
    }

    fn get(&mut self, pgno: u32) -> Option<Arc<Page>> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(&pgno).map(|(page, used)| {
            *used = tick;
            Arc::clone(page)
        })
    }

    fn insert(&mut self, pgno: u32, page: Arc<Page>) {
        if self.entries.len() >= self.capacity {
            // Evict the least recently used entry
            if let Some(&victim) =
                self.entries.iter().min_by_key(|(_, (_, used))| *used).map(|(k, _)| k)
            {
                self.entries.remove(&victim);
            }
        }
        self.tick += 1;
        self.entries.insert(pgno, (page, self.tick));
    }
}

/// Cached, validating reader of logical pages
pub struct PageStore {
    source: Box<dyn ByteSource>,
    layout: PageLayout,
    strict: bool,
    cache: Mutex<PageCache>,
}

impl PageStore {
    /// Create a store over `source` with the layout fixed by the header
    pub fn new(
        source: Box<dyn ByteSource>,
        page_size: u32,
        strict: bool,
        cache_size: usize,
    ) -> Self {
        Self {
            source,
            layout: PageLayout::new(page_size),
            strict,
            cache: Mutex::new(PageCache::new(cache_size)),
        }
    }

    /// Page size fixed at open time
    pub fn page_size(&self) -> usize {
        self.layout.page_size
    }

    /// The resolved page layout
    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    /// Number of logical pages the source can hold
    pub fn page_count(&self) -> u32 {
        let physical = self.source.len() / self.layout.page_size as u64;
        physical.saturating_sub(2).min(u32::MAX as u64) as u32
    }

    /// Read and decode logical page `pgno`.
    ///
    /// Fails with `CorruptPage` when the page number is out of range or the
    /// page fails structural validation. Checksum mismatches on pages that
    /// carry one are advisory unless the store is strict.
    pub fn page(&self, pgno: u32) -> Result<Arc<Page>> {
        if pgno < 1 {
            return Err(Error::CorruptPage { pgno, details: "page number 0 is reserved".into() });
        }

        if let Some(page) = self.cache.lock().get(pgno) {
            return Ok(page);
        }

        let offset = (pgno as u64 + 1) * self.layout.page_size as u64;
        if offset + self.layout.page_size as u64 > self.source.len() {
            return Err(Error::CorruptPage {
                pgno,
                details: format!("page number exceeds source bounds ({} pages)", self.page_count()),
            });
        }

        let mut buf = vec![0u8; self.layout.page_size];
        self.source.read_at(offset, &mut buf)?;

        let page = Page::parse(pgno, buf, self.layout)?;
        if let Err(e) = page.verify_checksum() {
            if self.strict {
                return Err(Error::CorruptPage { pgno, details: e.to_string() });
            }
            warn!(pgno, error = %e, "page checksum mismatch");
        }

        let page = Arc::new(page);
        self.cache.lock().insert(pgno, Arc::clone(&page));
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ByteOrder, LittleEndian};

    use crate::format::PageFlags;

    fn blank_page(flags: PageFlags) -> Vec<u8> {
        let mut buf = vec![0u8; 4096];
        LittleEndian::write_u32(&mut buf[36..], flags.bits());
        buf
    }

    fn image_with_pages(pages: &[Vec<u8>]) -> Vec<u8> {
        // Two physical header pages, then logical pages from 1
        let mut image = vec![0u8; 2 * 4096];
        for page in pages {
            image.extend_from_slice(page);
        }
        image
    }

    #[test]
    fn test_page_zero_is_reserved() {
        let store = PageStore::new(Box::new(image_with_pages(&[])), 4096, false, 16);
        assert!(matches!(store.page(0), Err(Error::CorruptPage { pgno: 0, .. })));
    }

    #[test]
    fn test_out_of_range_page() {
        let image = image_with_pages(&[blank_page(PageFlags::LEAF | PageFlags::ROOT)]);
        let store = PageStore::new(Box::new(image), 4096, false, 16);
        assert!(store.page(1).is_ok());
        assert!(matches!(store.page(2), Err(Error::CorruptPage { pgno: 2, .. })));
        assert_eq!(store.page_count(), 1);
    }

    #[test]
    fn test_cache_returns_same_page() {
        let image = image_with_pages(&[blank_page(PageFlags::LEAF | PageFlags::ROOT)]);
        let store = PageStore::new(Box::new(image), 4096, false, 16);
        let a = store.page(1).unwrap();
        let b = store.page(1).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_cache_eviction_is_bounded() {
        let pages: Vec<_> =
            (0..8).map(|_| blank_page(PageFlags::LEAF | PageFlags::ROOT)).collect();
        let store = PageStore::new(Box::new(image_with_pages(&pages)), 4096, false, 2);
        for pgno in 1..=8 {
            store.page(pgno).unwrap();
        }
        let cache = store.cache.lock();
        assert!(cache.entries.len() <= 2);
    }
}
