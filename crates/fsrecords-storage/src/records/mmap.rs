//! Memory-mapped record region
//!
//! The file is mapped in fixed-size chunks rather than as one mapping, so
//! growing the table maps a new chunk instead of remapping (and moving)
//! words other threads may be using.

use super::layout::RECORD_SIZE;
use super::region::{ChunkedWords, RecordRegion, WordChunk};
use fsrecords_common::config::StorageKind;
use fsrecords_common::{Error, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::debug;

/// One mapped chunk of the records file
struct MappedChunk {
    map: MmapMut,
    words: *const AtomicI32,
    len: usize,
}

// SAFETY: the mapping is owned by the chunk and only ever accessed
// through `AtomicI32` cells, which are themselves Send + Sync.
#[allow(unsafe_code)]
unsafe impl Send for MappedChunk {}
#[allow(unsafe_code)]
unsafe impl Sync for MappedChunk {}

impl MappedChunk {
    #[allow(unsafe_code)]
    fn map(file: &File, offset: u64, bytes: usize) -> Result<Self> {
        // SAFETY: the file is opened read-write by this process only and is
        // never truncated while mapped.
        let mut map = unsafe { MmapOptions::new().offset(offset).len(bytes).map_mut(file) }
            .map_err(|e| Error::Storage(format!("failed to map records at {offset}: {e}")))?;
        let ptr = map.as_mut_ptr();
        debug_assert_eq!(ptr.align_offset(std::mem::align_of::<AtomicI32>()), 0);
        Ok(Self {
            words: ptr.cast::<AtomicI32>(),
            len: bytes / std::mem::size_of::<AtomicI32>(),
            map,
        })
    }
}

impl WordChunk for MappedChunk {
    #[allow(unsafe_code)]
    fn words(&self) -> &[AtomicI32] {
        // SAFETY: `words` points at `len` page-aligned words inside `map`,
        // which lives as long as `self`. AtomicI32 has the layout of i32.
        unsafe { std::slice::from_raw_parts(self.words, self.len) }
    }
}

/// Record region over a memory-mapped file
pub struct MmapRegion {
    path: PathBuf,
    file: File,
    words: ChunkedWords<MappedChunk>,
}

impl MmapRegion {
    /// Open (or create) the records file and map its existing chunks
    pub fn open(path: impl AsRef<Path>, records_per_chunk: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::Storage(format!("failed to open {}: {}", path.display(), e)))?;

        let chunk_bytes = (records_per_chunk * RECORD_SIZE) as u64;
        let file_len = file.metadata()?.len();
        let chunk_count = file_len.div_ceil(chunk_bytes);
        if file_len % chunk_bytes != 0 {
            // Written with a different chunk size; pad to whole chunks.
            file.set_len(chunk_count * chunk_bytes)?;
        }

        let mut chunks = Vec::with_capacity(chunk_count as usize);
        for index in 0..chunk_count {
            chunks.push(MappedChunk::map(&file, index * chunk_bytes, chunk_bytes as usize)?);
        }
        debug!("mapped {} record chunk(s) from {:?}", chunks.len(), path);

        Ok(Self {
            path,
            file,
            words: ChunkedWords::new(records_per_chunk, chunks),
        })
    }

    /// Path of the records file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordRegion for MmapRegion {
    fn kind(&self) -> StorageKind {
        StorageKind::MemoryMapped
    }

    fn capacity(&self) -> usize {
        self.words.capacity()
    }

    fn ensure_capacity(&self, slots: usize) -> Result<()> {
        let chunk_bytes = self.words.chunk_words() * std::mem::size_of::<AtomicI32>();
        self.words.grow_to(slots, |index| {
            let offset = (index * chunk_bytes) as u64;
            let required = offset + chunk_bytes as u64;
            if self.file.metadata()?.len() < required {
                self.file.set_len(required)?;
            }
            debug!("mapping record chunk {} of {:?}", index, self.path);
            MappedChunk::map(&self.file, offset, chunk_bytes)
        })
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
        self.words.for_each_chunk(|chunk| {
            chunk
                .map
                .flush()
                .map_err(|e| Error::Storage(format!("msync of {:?} failed: {}", self.path, e)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_mapped_words_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.dat");

        {
            let region = MmapRegion::open(&path, 1024).unwrap();
            region.ensure_capacity(2048 + 1).unwrap();
            assert_eq!(region.capacity(), 3072);
            region.store(5, 123, Ordering::Release).unwrap();
            region.store(2048 * 11, -9, Ordering::Release).unwrap();
            region.flush().unwrap();
        }

        let region = MmapRegion::open(&path, 1024).unwrap();
        assert_eq!(region.capacity(), 3072);
        assert_eq!(region.load(5, Ordering::Acquire).unwrap(), 123);
        assert_eq!(region.load(2048 * 11, Ordering::Acquire).unwrap(), -9);
    }

    #[test]
    fn test_reopen_with_larger_chunks_pads_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.dat");
        {
            let region = MmapRegion::open(&path, 1024).unwrap();
            region.ensure_capacity(1).unwrap();
            region.store(12, 5, Ordering::Release).unwrap();
            region.flush().unwrap();
        }
        let region = MmapRegion::open(&path, 2048).unwrap();
        assert_eq!(region.capacity(), 2048);
        assert_eq!(region.load(12, Ordering::Acquire).unwrap(), 5);
    }
}
