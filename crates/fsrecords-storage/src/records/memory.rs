//! Heap-only record region, used for tests and as a benchmark reference

use super::region::{ChunkedWords, RecordRegion};
use fsrecords_common::Result;
use fsrecords_common::config::StorageKind;
use std::sync::atomic::{AtomicI32, Ordering};

/// Record region held entirely in memory
pub struct MemoryRegion {
    words: ChunkedWords<Box<[AtomicI32]>>,
}

impl MemoryRegion {
    #[must_use]
    pub fn new(records_per_chunk: usize) -> Self {
        Self {
            words: ChunkedWords::new(records_per_chunk, Vec::new()),
        }
    }

    fn zeroed_chunk(words: usize) -> Box<[AtomicI32]> {
        (0..words).map(|_| AtomicI32::new(0)).collect()
    }
}

impl RecordRegion for MemoryRegion {
    fn kind(&self) -> StorageKind {
        StorageKind::InMemory
    }

    fn capacity(&self) -> usize {
        self.words.capacity()
    }

    fn ensure_capacity(&self, slots: usize) -> Result<()> {
        let chunk_words = self.words.chunk_words();
        self.words
            .grow_to(slots, |_| Ok(Self::zeroed_chunk(chunk_words)))
    }

    fn load(&self, word: usize, order: Ordering) -> Result<i32> {
        self.words.load(word, order)
    }

    fn store(&self, word: usize, value: i32, order: Ordering) -> Result<()> {
        self.words.store(word, value, order)
    }

    fn compare_exchange(&self, word: usize, current: i32, new: i32) -> Result<bool> {
        self.words.compare_exchange(word, current, new)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
