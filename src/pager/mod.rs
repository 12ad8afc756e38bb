//! Page-level file access.
//!
//! The pager owns a single record file, serves fixed-size pages through an
//! LRU cache, and writes dirty pages back on flush or eviction. Every page
//! carries a crc32 trailer that is verified on read and refreshed on write.
//! There is no write-ahead log: the record manager obtains durability by
//! explicit [`Pager::flush`] calls (sync-on-write or batched `sync`).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::Path;

use crc32fast::hash;
use lru::LruCache;
use tracing::error;

use crate::error::{DirError, Result};

/// Fixed page size of every record file.
pub const PAGE_SIZE: usize = 8192;
/// Bytes reserved at the page tail for the crc32 trailer.
pub const PAGE_CHECKSUM_SIZE: usize = 4;
/// Usable payload bytes per page.
pub const PAGE_PAYLOAD_SIZE: usize = PAGE_SIZE - PAGE_CHECKSUM_SIZE;
/// Default page cache capacity.
pub const DEFAULT_CACHE_SIZE: usize = 10_000;

/// Page identifier; pages are numbered from zero.
pub type PageId = u32;

/// One cached page image.
#[derive(Debug)]
pub struct Page {
    /// Page number.
    pub id: PageId,
    /// Full page bytes including the checksum trailer.
    pub data: Vec<u8>,
    /// Set when the cached image differs from disk.
    pub dirty: bool,
}

impl Page {
    fn new(id: PageId) -> Self {
        Self {
            id,
            data: vec![0; PAGE_SIZE],
            dirty: false,
        }
    }
}

/// Cached, checksummed access to one page file.
pub struct Pager {
    file: File,
    cache: LruCache<PageId, Page>,
    file_len: u64,
}

impl Pager {
    /// Open or create the file at `path` with the given cache capacity.
    pub fn open(path: &Path, cache_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let file_len = file.metadata()?.len();
        if file_len % PAGE_SIZE as u64 != 0 {
            return Err(DirError::Corruption(format!(
                "file length {file_len} is not page aligned"
            )));
        }
        let cache_size = NonZeroUsize::new(cache_size).ok_or_else(|| {
            DirError::InvalidArgument("cache size must be greater than zero".into())
        })?;
        Ok(Self {
            file,
            cache: LruCache::new(cache_size),
            file_len,
        })
    }

    /// Number of pages currently backed by the file or cache.
    pub fn page_count(&self) -> usize {
        (self.file_len / PAGE_SIZE as u64) as usize
    }

    /// Count of cached pages awaiting write-back.
    pub fn dirty_page_count(&self) -> usize {
        self.cache.iter().filter(|(_, page)| page.dirty).count()
    }

    /// Append a fresh zeroed page and return its id.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let next_id = (self.file_len / PAGE_SIZE as u64) as PageId;
        let mut page = Page::new(next_id);
        page.dirty = true;
        self.push_to_cache(next_id, page)?;
        self.file_len += PAGE_SIZE as u64;
        Ok(next_id)
    }

    /// Fetch a page, reading it from disk on a cache miss.
    pub fn fetch_page(&mut self, page_id: PageId) -> Result<&mut Page> {
        if !self.cache.contains(&page_id) {
            let mut page = Page::new(page_id);
            self.read_page_from_disk(&mut page)?;
            self.push_to_cache(page_id, page)?;
        }
        self.cache
            .get_mut(&page_id)
            .ok_or_else(|| DirError::Corruption("page unexpectedly evicted".into()))
    }

    /// Run `f` over a page's bytes.
    pub fn with_page<F, T>(&mut self, page_id: PageId, mut f: F) -> Result<T>
    where
        F: FnMut(&[u8]) -> Result<T>,
    {
        let page = self.fetch_page(page_id)?;
        f(&page.data)
    }

    /// Run `f` over a page's bytes mutably and mark the page dirty.
    pub fn with_page_mut<F, T>(&mut self, page_id: PageId, mut f: F) -> Result<T>
    where
        F: FnMut(&mut [u8]) -> Result<T>,
    {
        let page = self.fetch_page(page_id)?;
        let result = f(&mut page.data)?;
        page.dirty = true;
        Ok(result)
    }

    /// Write every dirty page and sync the file.
    pub fn flush(&mut self) -> Result<()> {
        let dirty: Vec<PageId> = self
            .cache
            .iter()
            .filter_map(|(&id, page)| page.dirty.then_some(id))
            .collect();
        if dirty.is_empty() {
            return Ok(());
        }
        for page_id in dirty {
            let page = self
                .cache
                .get_mut(&page_id)
                .ok_or_else(|| DirError::Corruption("dirty page missing from cache".into()))?;
            apply_page_checksum(&mut page.data)?;
            let data = page.data.clone();
            page.dirty = false;
            write_page_image(&mut self.file, page_id, &data)?;
        }
        self.file.sync_data()?;
        Ok(())
    }

    fn push_to_cache(&mut self, page_id: PageId, page: Page) -> Result<()> {
        if let Some((evicted_id, mut evicted)) = self.cache.push(page_id, page) {
            if evicted_id != page_id && evicted.dirty {
                apply_page_checksum(&mut evicted.data)?;
                write_page_image(&mut self.file, evicted_id, &evicted.data)?;
            }
        }
        Ok(())
    }

    fn read_page_from_disk(&mut self, page: &mut Page) -> Result<()> {
        let offset = page_offset(page.id)?;
        if offset + PAGE_SIZE as u64 <= self.file_len {
            self.file.seek(SeekFrom::Start(offset))?;
            let bytes_read = self.file.read(&mut page.data)?;
            if bytes_read < page.data.len() {
                page.data[bytes_read..].fill(0);
            }
            verify_page_checksum(page.id, &page.data)?;
        } else {
            apply_page_checksum(&mut page.data)?;
        }
        Ok(())
    }
}

fn page_offset(page_id: PageId) -> Result<u64> {
    u64::from(page_id)
        .checked_mul(PAGE_SIZE as u64)
        .ok_or_else(|| DirError::InvalidArgument("page offset overflow".into()))
}

fn verify_page_checksum(page_id: PageId, data: &[u8]) -> Result<()> {
    if data.len() != PAGE_SIZE {
        return Err(DirError::Corruption(format!(
            "page {page_id} size mismatch during checksum verification"
        )));
    }
    let (payload, trailer) = data.split_at(PAGE_PAYLOAD_SIZE);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    // An all-zero image is a hole left by an allocated page that was never
    // flushed; it reads as a fresh free page.
    if stored == 0 && payload.iter().all(|&b| b == 0) {
        return Ok(());
    }
    let actual = hash(payload);
    if stored != actual {
        error!(page_id, stored, actual, "page checksum mismatch");
        return Err(DirError::Corruption(format!(
            "checksum mismatch detected on page {page_id}"
        )));
    }
    Ok(())
}

fn apply_page_checksum(data: &mut [u8]) -> Result<()> {
    if data.len() != PAGE_SIZE {
        return Err(DirError::Corruption(
            "page size mismatch during checksum application".into(),
        ));
    }
    let (payload, trailer) = data.split_at_mut(PAGE_PAYLOAD_SIZE);
    let digest = hash(payload);
    trailer.copy_from_slice(&digest.to_le_bytes());
    Ok(())
}

fn write_page_image(file: &mut File, page_id: PageId, data: &[u8]) -> Result<()> {
    if data.len() != PAGE_SIZE {
        return Err(DirError::InvalidArgument(
            "page size mismatch during flush".into(),
        ));
    }
    file.seek(SeekFrom::Start(page_offset(page_id)?))?;
    file.write_all(data)?;
    Ok(())
}
