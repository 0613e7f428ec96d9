//! Payload file for logged content and attribute bytes
//!
//! ```text
//! header:  | Magic 4B | Version 4B | Retained-from 8B |
//! payload: | Length 4B | CRC32C 4B | Data |
//! ```
//!
//! Payloads are addressed by file offset. Offsets below the retained-from
//! boundary have been released and read back as not retained.

use fsrecords_common::{Error, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

const PAYLOAD_MAGIC: u32 = 0x4650_4C44; // "FPLD"
const PAYLOAD_VERSION: u32 = 1;
const HEADER_SIZE: u64 = 16;
const RECORD_HEADER_SIZE: u64 = 8;

pub(crate) struct PayloadFile {
    file: File,
    /// Serializes appends; holds the next write offset
    tail: Mutex<u64>,
    /// Readable end, published after each append
    end: AtomicU64,
    retained_from: AtomicU64,
}

impl PayloadFile {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::Storage(format!("failed to open payload file: {}", e)))?;

        let len = file.metadata()?.len();
        let retained_from = if len < HEADER_SIZE {
            Self::write_header(&file, HEADER_SIZE)?;
            HEADER_SIZE
        } else {
            let mut header = [0u8; HEADER_SIZE as usize];
            file.read_exact_at(&mut header, 0)?;
            let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            if magic != PAYLOAD_MAGIC {
                return Err(Error::corruption("invalid payload file magic"));
            }
            if version != PAYLOAD_VERSION {
                return Err(Error::UnsupportedVersion {
                    found: version as i32,
                    expected: PAYLOAD_VERSION as i32,
                });
            }
            let mut boundary = [0u8; 8];
            boundary.copy_from_slice(&header[8..16]);
            u64::from_le_bytes(boundary)
        };

        let end = Self::scan(&file, retained_from.max(HEADER_SIZE))?;
        if end < file.metadata()?.len() {
            warn!("truncating torn payload tail at offset {}", end);
            file.set_len(end)?;
        }
        debug!(
            "opened payload file {:?} (retained {}..{})",
            path, retained_from, end
        );

        Ok(Self {
            file,
            tail: Mutex::new(end),
            end: AtomicU64::new(end),
            retained_from: AtomicU64::new(retained_from),
        })
    }

    fn write_header(file: &File, retained_from: u64) -> Result<()> {
        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..4].copy_from_slice(&PAYLOAD_MAGIC.to_le_bytes());
        header[4..8].copy_from_slice(&PAYLOAD_VERSION.to_le_bytes());
        header[8..16].copy_from_slice(&retained_from.to_le_bytes());
        file.write_all_at(&header, 0)?;
        Ok(())
    }

    /// Offset just past the last intact payload
    fn scan(file: &File, from: u64) -> Result<u64> {
        let len = file.metadata()?.len();
        let mut offset = from;
        while offset + RECORD_HEADER_SIZE <= len {
            match Self::read_record(file, offset, len) {
                Ok(data) => offset += RECORD_HEADER_SIZE + data.len() as u64,
                Err(_) => break,
            }
        }
        Ok(offset)
    }

    fn read_record(file: &File, offset: u64, end: u64) -> Result<Vec<u8>> {
        let mut header = [0u8; RECORD_HEADER_SIZE as usize];
        file.read_exact_at(&mut header, offset)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let stored = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if offset + RECORD_HEADER_SIZE + u64::from(len) > end {
            return Err(Error::corruption(format!(
                "payload at {offset} runs past the end of the file"
            )));
        }
        let mut data = vec![0u8; len as usize];
        file.read_exact_at(&mut data, offset + RECORD_HEADER_SIZE)?;
        let computed = crc32c::crc32c(&data);
        if computed != stored {
            return Err(Error::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }
        Ok(data)
    }

    /// Append `data`, returning its offset
    pub(crate) fn append(&self, data: &[u8], sync: bool) -> Result<u64> {
        let len = u32::try_from(data.len())
            .map_err(|_| Error::invalid_argument("payload larger than 4 GiB"))?;
        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE as usize + data.len());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&crc32c::crc32c(data).to_le_bytes());
        buf.extend_from_slice(data);

        let mut tail = self.tail.lock();
        let offset = *tail;
        self.file
            .write_all_at(&buf, offset)
            .map_err(|e| Error::Storage(format!("payload write failed: {}", e)))?;
        if sync {
            self.file.sync_data()?;
        }
        *tail += buf.len() as u64;
        self.end.store(*tail, Ordering::Release);
        Ok(offset)
    }

    /// Bytes of a payload; `None` once released
    pub(crate) fn read(&self, payload: u64) -> Result<Option<Vec<u8>>> {
        if payload < self.retained_from.load(Ordering::Acquire) {
            return Ok(None);
        }
        let end = self.end.load(Ordering::Acquire);
        if payload + RECORD_HEADER_SIZE > end {
            return Err(Error::InvalidLogPosition {
                position: payload,
                reason: "payload offset past the end of the payload file".into(),
            });
        }
        Self::read_record(&self.file, payload, end).map(Some)
    }

    /// Release every payload written so far
    pub(crate) fn release_all(&self) -> Result<()> {
        let tail = self.tail.lock();
        Self::write_header(&self.file, *tail)?;
        self.file.sync_data()?;
        self.retained_from.store(*tail, Ordering::Release);
        debug!("released payloads before offset {}", *tail);
        Ok(())
    }

    pub(crate) fn sync(&self) -> Result<()> {
        let _tail = self.tail.lock();
        self.file.sync_data()?;
        Ok(())
    }
}

