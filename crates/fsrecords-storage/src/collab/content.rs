//! Append-only content blob file
//!
//! ```text
//! | Length 4B | CRC32C 4B | Data | Length 4B | CRC32C 4B | Data | ...
//! ```
//!
//! Content records are immutable; the `n`-th blob has id `n`. The offset
//! index is rebuilt by scanning the file on open.

use super::ContentStorage;
use fsrecords_common::{Error, Result};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use tracing::{debug, warn};

/// Content file inside a storage directory
pub const CONTENT_FILE_NAME: &str = "content.dat";

const BLOB_HEADER_SIZE: u64 = 8;

/// Content blobs in `content.dat`
pub struct BlobContentStorage {
    file: File,
    /// Offset of blob `n` at index `n - 1`, plus the end offset last
    offsets: RwLock<Vec<u64>>,
}

impl BlobContentStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::Storage(format!("failed to open content file: {}", e)))?;

        let len = file.metadata()?.len();
        let mut offsets = vec![0u64];
        let mut offset = 0u64;
        while offset + BLOB_HEADER_SIZE <= len {
            let mut header = [0u8; BLOB_HEADER_SIZE as usize];
            file.read_exact_at(&mut header, offset)?;
            let size = u64::from(u32::from_le_bytes([header[0], header[1], header[2], header[3]]));
            if offset + BLOB_HEADER_SIZE + size > len {
                break;
            }
            offset += BLOB_HEADER_SIZE + size;
            offsets.push(offset);
        }
        if offset < len {
            warn!("truncating torn content tail in {:?} at {}", path, offset);
            file.set_len(offset)?;
        }
        debug!("opened content file {:?} ({} records)", path, offsets.len() - 1);

        Ok(Self {
            file,
            offsets: RwLock::new(offsets),
        })
    }

    fn locate(&self, content_id: i32) -> Result<(u64, u64)> {
        let offsets = self.offsets.read();
        let index = usize::try_from(content_id - 1)
            .ok()
            .filter(|index| index + 1 < offsets.len())
            .ok_or(Error::ContentNotFound(content_id))?;
        Ok((offsets[index], offsets[index + 1]))
    }
}

impl ContentStorage for BlobContentStorage {
    fn store(&self, data: &[u8]) -> Result<i32> {
        let size = u32::try_from(data.len())
            .map_err(|_| Error::invalid_argument("content larger than 4 GiB"))?;
        let mut buf = Vec::with_capacity(BLOB_HEADER_SIZE as usize + data.len());
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&crc32c::crc32c(data).to_le_bytes());
        buf.extend_from_slice(data);

        let mut offsets = self.offsets.write();
        let offset = offsets.last().copied().unwrap_or(0);
        self.file
            .write_all_at(&buf, offset)
            .map_err(|e| Error::Storage(format!("content write failed: {}", e)))?;
        offsets.push(offset + buf.len() as u64);
        i32::try_from(offsets.len() - 1).map_err(|_| Error::internal("content file is full"))
    }

    fn read(&self, content_id: i32) -> Result<Vec<u8>> {
        let (start, end) = self.locate(content_id)?;
        let mut buf = vec![0u8; (end - start) as usize];
        self.file.read_exact_at(&mut buf, start)?;
        let stored = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let data = buf.split_off(BLOB_HEADER_SIZE as usize);
        let computed = crc32c::crc32c(&data);
        if stored != computed {
            return Err(Error::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }
        Ok(data)
    }

    fn check_record(&self, content_id: i32) -> Result<()> {
        self.read(content_id).map(drop)
    }

    fn records_count(&self) -> i32 {
        i32::try_from(self.offsets.read().len() - 1).unwrap_or(i32::MAX)
    }

    fn flush(&self) -> Result<()> {
        let _offsets = self.offsets.read();
        self.file.sync_data()?;
        Ok(())
    }
}
