//! Word-addressed storage behind the record table
//!
//! A region is a growable array of 4-byte words. Record slot `n` occupies
//! words `n * RECORD_WORDS .. (n + 1) * RECORD_WORDS`.

use super::layout::RECORD_WORDS;
use super::memory::MemoryRegion;
use super::mmap::MmapRegion;
use super::paged::PagedRegion;
use fsrecords_common::config::{StorageConfig, StorageKind};
use fsrecords_common::{Error, Result};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};

/// Storage backing a record table
///
/// Implementations must make `load`/`store`/`compare_exchange` on one word
/// atomic with respect to each other, and must not block accesses to
/// different records on each other (growth excepted).
pub trait RecordRegion: Send + Sync {
    /// Which variant this is
    fn kind(&self) -> StorageKind;

    /// Number of record slots currently backed (header slot included)
    fn capacity(&self) -> usize;

    /// Grow to back at least `slots` record slots; new words read as zero
    fn ensure_capacity(&self, slots: usize) -> Result<()>;

    /// Load one word
    fn load(&self, word: usize, order: Ordering) -> Result<i32>;

    /// Store one word
    fn store(&self, word: usize, value: i32, order: Ordering) -> Result<()>;

    /// Replace `current` with `new`; true on success
    fn compare_exchange(&self, word: usize, current: i32, new: i32) -> Result<bool>;

    /// Persist all writes made so far
    fn flush(&self) -> Result<()>;
}

/// Open the region variant selected by `config`
///
/// `path` is ignored by the in-memory variant.
pub fn open_region(path: &Path, config: &StorageConfig) -> Result<Box<dyn RecordRegion>> {
    config.validate()?;
    let region: Box<dyn RecordRegion> = match config.kind {
        StorageKind::MemoryMapped => Box::new(MmapRegion::open(path, config.records_per_chunk)?),
        StorageKind::Paged => Box::new(PagedRegion::open(path, config.records_per_chunk)?),
        StorageKind::InMemory => Box::new(MemoryRegion::new(config.records_per_chunk)),
    };
    Ok(region)
}

/// A fixed-size run of atomic words
pub(crate) trait WordChunk: Send + Sync {
    fn words(&self) -> &[AtomicI32];
}

impl WordChunk for Box<[AtomicI32]> {
    fn words(&self) -> &[AtomicI32] {
        self
    }
}

/// Chunk table shared by the atomic-word regions (mapped and in-memory)
///
/// Chunks are only ever appended, so a read lock is held just long enough
/// to reach the word.
pub(crate) struct ChunkedWords<C> {
    chunks: RwLock<Vec<C>>,
    records_per_chunk: usize,
}

impl<C: WordChunk> ChunkedWords<C> {
    pub(crate) fn new(records_per_chunk: usize, chunks: Vec<C>) -> Self {
        Self {
            chunks: RwLock::new(chunks),
            records_per_chunk,
        }
    }

    pub(crate) const fn chunk_words(&self) -> usize {
        self.records_per_chunk * RECORD_WORDS
    }

    pub(crate) fn capacity(&self) -> usize {
        self.chunks.read().len() * self.records_per_chunk
    }

    /// Append chunks produced by `make` until `slots` slots are backed
    pub(crate) fn grow_to<F>(&self, slots: usize, mut make: F) -> Result<()>
    where
        F: FnMut(usize) -> Result<C>,
    {
        let needed = slots.div_ceil(self.records_per_chunk);
        if self.chunks.read().len() >= needed {
            return Ok(());
        }
        let mut chunks = self.chunks.write();
        while chunks.len() < needed {
            let chunk = make(chunks.len())?;
            chunks.push(chunk);
        }
        Ok(())
    }

    pub(crate) fn with_word<R>(&self, word: usize, f: impl FnOnce(&AtomicI32) -> R) -> Result<R> {
        let chunk_words = self.chunk_words();
        let chunks = self.chunks.read();
        let chunk = chunks.get(word / chunk_words).ok_or_else(|| {
            Error::storage(format!(
                "word {} beyond region end ({} chunks)",
                word,
                chunks.len()
            ))
        })?;
        Ok(f(&chunk.words()[word % chunk_words]))
    }

    pub(crate) fn for_each_chunk(&self, mut f: impl FnMut(&C) -> Result<()>) -> Result<()> {
        for chunk in self.chunks.read().iter() {
            f(chunk)?;
        }
        Ok(())
    }

    pub(crate) fn load(&self, word: usize, order: Ordering) -> Result<i32> {
        self.with_word(word, |cell| cell.load(order))
    }

    pub(crate) fn store(&self, word: usize, value: i32, order: Ordering) -> Result<()> {
        self.with_word(word, |cell| cell.store(value, order))
    }

    pub(crate) fn compare_exchange(&self, word: usize, current: i32, new: i32) -> Result<bool> {
        self.with_word(word, |cell| {
            cell.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(region: &dyn RecordRegion) {
        region.ensure_capacity(3000).unwrap();
        assert!(region.capacity() >= 3000);

        let word = 2999 * RECORD_WORDS + 4;
        assert_eq!(region.load(word, Ordering::Acquire).unwrap(), 0);
        region.store(word, 77, Ordering::Release).unwrap();
        assert_eq!(region.load(word, Ordering::Acquire).unwrap(), 77);

        assert!(region.compare_exchange(word, 77, 78).unwrap());
        assert!(!region.compare_exchange(word, 77, 79).unwrap());
        assert_eq!(region.load(word, Ordering::Acquire).unwrap(), 78);

        let past_end = region.capacity() * RECORD_WORDS;
        assert!(region.load(past_end, Ordering::Acquire).is_err());
        region.flush().unwrap();
    }

    #[test]
    fn test_all_kinds_share_contract() {
        let dir = tempdir().unwrap();
        for kind in [StorageKind::MemoryMapped, StorageKind::Paged, StorageKind::InMemory] {
            let config = StorageConfig {
                kind,
                records_per_chunk: 1024,
            };
            let path = dir.path().join(format!("{kind:?}.dat"));
            let region = open_region(&path, &config).unwrap();
            assert_eq!(region.kind(), kind);
            exercise(region.as_ref());
        }
    }

    #[test]
    fn test_invalid_chunk_size_rejected() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            kind: StorageKind::InMemory,
            records_per_chunk: 100,
        };
        assert!(open_region(&dir.path().join("x"), &config).is_err());
    }
}
