//! Paged-file record region
//!
//! Fallback for platforms or filesystems where mapping is unavailable.
//! Pages are read lazily through positional I/O and cached; each page has
//! its own lock, so only threads touching records on the same page
//! serialize, and only for the duration of a single word access.

use super::layout::{RECORD_SIZE, WORD_SIZE};
use super::region::RecordRegion;
use fsrecords_common::config::StorageKind;
use fsrecords_common::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::debug;

/// Cached copy of one page of the records file
struct Page {
    words: Vec<i32>,
    loaded: bool,
    dirty: bool,
}

fn append_pages(pages: &mut Vec<Arc<Mutex<Page>>>, count: usize, page_words: usize) {
    for _ in 0..count {
        pages.push(Arc::new(Mutex::new(Page {
            words: vec![0; page_words],
            loaded: false,
            dirty: false,
        })));
    }
}

/// Record region over a plain file with a per-page lock
pub struct PagedRegion {
    path: PathBuf,
    file: File,
    records_per_page: usize,
    pages: RwLock<Vec<Arc<Mutex<Page>>>>,
}

impl PagedRegion {
    /// Open (or create) the records file
    pub fn open(path: impl AsRef<Path>, records_per_page: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::Storage(format!("failed to open {}: {}", path.display(), e)))?;

        let page_bytes = (records_per_page * RECORD_SIZE) as u64;
        let file_len = file.metadata()?.len();
        let page_count = file_len.div_ceil(page_bytes);
        if file_len % page_bytes != 0 {
            file.set_len(page_count * page_bytes)?;
        }

        let mut pages = Vec::new();
        append_pages(&mut pages, page_count as usize, records_per_page * RECORD_SIZE / WORD_SIZE);
        Ok(Self {
            path,
            file,
            records_per_page,
            pages: RwLock::new(pages),
        })
    }

    const fn page_words(&self) -> usize {
        self.records_per_page * RECORD_SIZE / WORD_SIZE
    }

    const fn page_bytes(&self) -> usize {
        self.records_per_page * RECORD_SIZE
    }

    fn read_page(&self, index: usize, page: &mut Page) -> Result<()> {
        let mut bytes = vec![0u8; self.page_bytes()];
        self.file
            .read_exact_at(&mut bytes, (index * self.page_bytes()) as u64)
            .map_err(|e| Error::Storage(format!("failed to read page {index} of {:?}: {e}", self.path)))?;
        for (word, raw) in page.words.iter_mut().zip(bytes.chunks_exact(WORD_SIZE)) {
            *word = i32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]);
        }
        page.loaded = true;
        Ok(())
    }

    fn with_page<R>(&self, word: usize, f: impl FnOnce(&mut Page, usize) -> R) -> Result<R> {
        let page_words = self.page_words();
        let index = word / page_words;
        let page = self.pages.read().get(index).cloned().ok_or_else(|| {
            Error::storage(format!("word {word} beyond region end (page {index})"))
        })?;
        let mut page = page.lock();
        if !page.loaded {
            self.read_page(index, &mut page)?;
        }
        Ok(f(&mut page, word % page_words))
    }
}

impl RecordRegion for PagedRegion {
    fn kind(&self) -> StorageKind {
        StorageKind::Paged
    }

    fn capacity(&self) -> usize {
        self.pages.read().len() * self.records_per_page
    }

    fn ensure_capacity(&self, slots: usize) -> Result<()> {
        let needed = slots.div_ceil(self.records_per_page);
        if self.pages.read().len() >= needed {
            return Ok(());
        }
        // File length only changes under the write lock
        let mut pages = self.pages.write();
        if pages.len() >= needed {
            return Ok(());
        }
        let required = (needed * self.page_bytes()) as u64;
        if self.file.metadata()?.len() < required {
            self.file.set_len(required)?;
        }
        debug!("growing {:?} to {} page(s)", self.path, needed);
        let missing = needed - pages.len();
        append_pages(&mut pages, missing, self.page_words());
        Ok(())
    }

    fn load(&self, word: usize, _order: Ordering) -> Result<i32> {
        self.with_page(word, |page, offset| page.words[offset])
    }

    fn store(&self, word: usize, value: i32, _order: Ordering) -> Result<()> {
        self.with_page(word, |page, offset| {
            page.words[offset] = value;
            page.dirty = true;
        })
    }

    fn compare_exchange(&self, word: usize, current: i32, new: i32) -> Result<bool> {
        self.with_page(word, |page, offset| {
            if page.words[offset] == current {
                page.words[offset] = new;
                page.dirty = true;
                true
            } else {
                false
            }
        })
    }

    fn flush(&self) -> Result<()> {
        let pages: Vec<Arc<Mutex<Page>>> = self.pages.read().clone();
        let mut written = 0usize;
        for (index, page) in pages.iter().enumerate() {
            let mut page = page.lock();
            if !page.dirty {
                continue;
            }
            let bytes: Vec<u8> = page.words.iter().flat_map(|w| w.to_ne_bytes()).collect();
            self.file
                .write_all_at(&bytes, (index * self.page_bytes()) as u64)
                .map_err(|e| Error::Storage(format!("failed to write page {index}: {e}")))?;
            page.dirty = false;
            written += 1;
        }
        self.file
            .sync_data()
            .map_err(|e| Error::Storage(format!("failed to sync {:?}: {}", self.path, e)))?;
        debug!("flushed {} dirty page(s) of {:?}", written, self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pages_written_on_flush_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.dat");

        let region = PagedRegion::open(&path, 1024).unwrap();
        region.ensure_capacity(10).unwrap();
        region.store(100, 42, Ordering::Release).unwrap();

        // Unflushed writes are invisible to a second handle.
        let other = PagedRegion::open(&path, 1024).unwrap();
        assert_eq!(other.load(100, Ordering::Acquire).unwrap(), 0);

        region.flush().unwrap();
        let reopened = PagedRegion::open(&path, 1024).unwrap();
        assert_eq!(reopened.load(100, Ordering::Acquire).unwrap(), 42);
    }

    #[test]
    fn test_reads_mapped_layout() {
        use super::super::mmap::MmapRegion;

        let dir = tempdir().unwrap();
        let path = dir.path().join("records.dat");
        {
            let mapped = MmapRegion::open(&path, 1024).unwrap();
            mapped.ensure_capacity(1500).unwrap();
            mapped.store(1400 * 11 + 3, -7, Ordering::Release).unwrap();
            mapped.flush().unwrap();
        }
        let paged = PagedRegion::open(&path, 1024).unwrap();
        assert_eq!(paged.capacity(), 2048);
        assert_eq!(paged.load(1400 * 11 + 3, Ordering::Acquire).unwrap(), -7);
    }

    #[test]
    fn test_concurrent_growth_keeps_every_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.dat");
        let region = PagedRegion::open(&path, 4).unwrap();

        for round in 1..20usize {
            std::thread::scope(|s| {
                for t in 0..4usize {
                    let region = &region;
                    s.spawn(move || region.ensure_capacity(round * 16 + t * 4).unwrap());
                }
            });
            let pages = region.pages.read().len();
            let file_len = std::fs::metadata(&path).unwrap().len();
            assert_eq!(file_len, (pages * region.page_bytes()) as u64, "round {round}");
            // Untouched last page must still be readable from the file
            let last_word = pages * region.page_words() - 1;
            assert_eq!(region.load(last_word, Ordering::Acquire).unwrap(), 0);
        }
    }
}
