//! File-backed operation log
//!
//! ```text
//! +--------------------------------+---------+---------+-----
//! | Magic 4B | Version 4B | Rsv 8B | Entry 0 | Entry 1 | ...
//! +--------------------------------+---------+---------+-----
//! ```
//!
//! Appends are serialized by a mutex and published through an atomic end
//! offset; reads are positional and take no lock. A torn tail left by a
//! crash is truncated on open.

use super::entry::{self, ENTRY_SIZE, LogEntry, Operation};
use super::payloads::PayloadFile;
use super::OperationLog;
use fsrecords_common::config::OpLogConfig;
use fsrecords_common::{Error, FileId, LogPosition, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Log file name inside a storage directory
pub const LOG_FILE_NAME: &str = "oplog.dat";

/// Payload file name inside a storage directory
pub const PAYLOAD_FILE_NAME: &str = "oplog.payloads";

const LOG_MAGIC: u32 = 0x4653_4F4C; // "FSOL"
const LOG_VERSION: u32 = 1;
const LOG_HEADER_SIZE: u64 = 16;

/// Operation log stored in a storage directory
pub struct FileOperationLog {
    path: PathBuf,
    file: File,
    /// Serializes appends; holds the next write position
    tail: Mutex<u64>,
    /// End of the readable log
    end: AtomicU64,
    payloads: PayloadFile,
    config: OpLogConfig,
}

impl FileOperationLog {
    /// Open (or create) the log in `dir`
    pub fn open(dir: impl AsRef<Path>, config: &OpLogConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let path = dir.join(LOG_FILE_NAME);

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::Storage(format!("failed to open operation log: {}", e)))?;

        if file.metadata()?.len() < LOG_HEADER_SIZE {
            let mut header = [0u8; LOG_HEADER_SIZE as usize];
            header[0..4].copy_from_slice(&LOG_MAGIC.to_le_bytes());
            header[4..8].copy_from_slice(&LOG_VERSION.to_le_bytes());
            file.set_len(0)?;
            file.write_all_at(&header, 0)?;
            file.sync_data()?;
        } else {
            Self::check_header(&file)?;
        }

        let end = Self::scan_log(&file, config.scan_buffer_size)?;
        let len = file.metadata()?.len();
        if end < len {
            warn!(
                "truncating operation log {:?} from {} to {} bytes (torn tail)",
                path, len, end
            );
            file.set_len(end)?;
        }

        let payloads = PayloadFile::open(&dir.join(PAYLOAD_FILE_NAME))?;
        info!(
            "Opened operation log {:?} ({} entries)",
            path,
            (end - LOG_HEADER_SIZE) / ENTRY_SIZE as u64
        );

        Ok(Self {
            path,
            file,
            tail: Mutex::new(end),
            end: AtomicU64::new(end),
            payloads,
            config: config.clone(),
        })
    }

    fn check_header(file: &File) -> Result<()> {
        let mut header = [0u8; 8];
        file.read_exact_at(&mut header, 0)?;
        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != LOG_MAGIC {
            return Err(Error::corruption("invalid operation log magic"));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != LOG_VERSION {
            return Err(Error::UnsupportedVersion {
                found: version as i32,
                expected: LOG_VERSION as i32,
            });
        }
        Ok(())
    }

    /// Position just past the last intact entry
    fn scan_log(file: &File, buffer_size: usize) -> Result<u64> {
        let mut reader = BufReader::with_capacity(buffer_size.max(ENTRY_SIZE), file);
        let mut skipped = [0u8; LOG_HEADER_SIZE as usize];
        reader.read_exact(&mut skipped)?;

        let mut position = LOG_HEADER_SIZE;
        let mut buf = [0u8; ENTRY_SIZE];
        loop {
            match reader.read_exact(&mut buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            if entry::decode(position, &buf).is_err() {
                break;
            }
            position += ENTRY_SIZE as u64;
        }
        Ok(position)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, returning its position
    pub fn append(&self, file_id: FileId, operation: Operation) -> Result<LogPosition> {
        let buf = entry::encode(file_id, &operation);

        let mut tail = self.tail.lock();
        let position = *tail;
        self.file
            .write_all_at(&buf, position)
            .map_err(|e| Error::Storage(format!("operation log write failed: {}", e)))?;
        if self.config.sync_on_write {
            self.file
                .sync_data()
                .map_err(|e| Error::Storage(format!("operation log sync failed: {}", e)))?;
        }
        *tail += ENTRY_SIZE as u64;
        self.end.store(*tail, Ordering::Release);
        Ok(position)
    }

    /// Log new content bytes stored under `content_id`
    ///
    /// Bytes above `max_logged_payload_bytes` are not kept in the log.
    pub fn append_content(
        &self,
        file_id: FileId,
        content_id: i32,
        data: &[u8],
    ) -> Result<LogPosition> {
        let payload = self.store_payload(data)?;
        self.append(
            file_id,
            Operation::WriteContent {
                content_id,
                payload,
            },
        )
    }

    /// Log a new attribute blob
    pub fn append_attribute(
        &self,
        file_id: FileId,
        attribute_id: i32,
        data: &[u8],
    ) -> Result<LogPosition> {
        let payload = self.store_payload(data)?;
        self.append(
            file_id,
            Operation::WriteAttribute {
                attribute_id,
                payload,
            },
        )
    }

    fn store_payload(&self, data: &[u8]) -> Result<Option<u64>> {
        if data.len() > self.config.max_logged_payload_bytes {
            debug!("payload of {} bytes not logged", data.len());
            return Ok(None);
        }
        self.payloads
            .append(data, self.config.sync_on_write)
            .map(Some)
    }

    /// Drop every payload logged so far; later reads of them report
    /// them as no longer retained
    pub fn release_payloads(&self) -> Result<()> {
        self.payloads.release_all()
    }

    /// Number of entries in the log
    pub fn len(&self) -> u64 {
        (self.current_position() - LOG_HEADER_SIZE) / ENTRY_SIZE as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist everything appended so far
    pub fn flush(&self) -> Result<()> {
        {
            let _tail = self.tail.lock();
            self.file.sync_data()?;
        }
        self.payloads.sync()
    }
}

impl OperationLog for FileOperationLog {
    fn start_position(&self) -> LogPosition {
        LOG_HEADER_SIZE
    }

    fn current_position(&self) -> LogPosition {
        self.end.load(Ordering::Acquire)
    }

    fn read_at(&self, position: LogPosition) -> Result<LogEntry> {
        if position < LOG_HEADER_SIZE
            || (position - LOG_HEADER_SIZE) % ENTRY_SIZE as u64 != 0
            || position >= self.current_position()
        {
            return Err(Error::InvalidLogPosition {
                position,
                reason: format!(
                    "not an entry boundary below {}",
                    self.current_position()
                ),
            });
        }
        let mut buf = [0u8; ENTRY_SIZE];
        self.file.read_exact_at(&mut buf, position)?;
        entry::decode(position, &buf)
    }

    fn next_position(&self, position: LogPosition) -> LogPosition {
        position + ENTRY_SIZE as u64
    }

    fn prev_position(&self, position: LogPosition) -> Option<LogPosition> {
        position
            .checked_sub(ENTRY_SIZE as u64)
            .filter(|prev| *prev >= LOG_HEADER_SIZE)
    }

    fn align_down(&self, position: LogPosition) -> LogPosition {
        let clamped = position.clamp(LOG_HEADER_SIZE, self.current_position());
        clamped - (clamped - LOG_HEADER_SIZE) % ENTRY_SIZE as u64
    }

    fn payload(&self, payload: u64) -> Result<Option<Vec<u8>>> {
        self.payloads.read(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::{Direction, Field, LogCursor, LogQuery, Lookup};
    use fsrecords_common::RecordFlags;
    use std::io::Write;
    use tempfile::tempdir;

    fn id(raw: i32) -> FileId {
        FileId::new(raw)
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempdir().unwrap();
        let log = FileOperationLog::open(dir.path(), &OpLogConfig::default()).unwrap();
        assert!(log.is_empty());
        assert_eq!(log.start_position(), log.current_position());

        let p1 = log.append(id(1), Operation::AllocateRecord).unwrap();
        let p2 = log.append(id(1), Operation::SetLength(10)).unwrap();
        assert_eq!(p2 - p1, ENTRY_SIZE as u64);
        assert_eq!(log.len(), 2);

        let entry = log.read_at(p2).unwrap();
        assert_eq!(entry.operation, Operation::SetLength(10));
        assert!(log.read_at(p2 + 1).is_err());
        assert!(log.read_at(log.current_position()).is_err());
    }

    #[test]
    fn test_align_down_to_entry_boundary() {
        let dir = tempdir().unwrap();
        let log = FileOperationLog::open(dir.path(), &OpLogConfig::default()).unwrap();
        let p1 = log.append(id(1), Operation::SetLength(1)).unwrap();
        let p2 = log.append(id(1), Operation::SetLength(2)).unwrap();
        let end = log.current_position();

        assert!(log.is_entry_boundary(p1));
        assert!(log.is_entry_boundary(p2));
        assert!(log.is_entry_boundary(end));
        assert!(!log.is_entry_boundary(p2 + 5));
        assert!(!log.is_entry_boundary(end + ENTRY_SIZE as u64));

        assert_eq!(log.align_down(p2 + 5), p2);
        assert_eq!(log.align_down(end - 1), p2);
        assert_eq!(log.align_down(end + 100), end);
        assert_eq!(log.align_down(3), log.start_position());
    }

    #[test]
    fn test_cursor_walks_both_ways() {
        let dir = tempdir().unwrap();
        let log = FileOperationLog::open(dir.path(), &OpLogConfig::default()).unwrap();
        for v in 0..5 {
            log.append(id(2), Operation::SetTimestamp(v)).unwrap();
        }

        let forward: Vec<i64> = LogCursor::at_start(&log)
            .map(|e| match e.unwrap().operation {
                Operation::SetTimestamp(v) => v,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(forward, vec![0, 1, 2, 3, 4]);

        let mut cursor = LogCursor::at_end(&log);
        let mut backward = Vec::new();
        while let Some(entry) = cursor.prev_entry().unwrap() {
            backward.push(entry.position);
        }
        assert_eq!(backward.len(), 5);
        assert!(backward.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(cursor.position(), log.start_position());
    }

    #[test]
    fn test_directed_lookup() {
        let dir = tempdir().unwrap();
        let log = FileOperationLog::open(dir.path(), &OpLogConfig::default()).unwrap();
        let a = log.append(id(1), Operation::SetName(5)).unwrap();
        let b = log.append(id(2), Operation::SetName(6)).unwrap();
        let c = log.append(id(1), Operation::SetFlags(RecordFlags::IS_DIRECTORY)).unwrap();
        let d = log.append(id(1), Operation::SetName(7)).unwrap();
        let end = log.current_position();

        let name1 = LogQuery::new(id(1), Field::Name);
        let found = log.lookup(name1, b, Direction::Forward, end).unwrap();
        assert_eq!(found.entry().map(|e| e.position), Some(d));

        let found = log.lookup(name1, d, Direction::Backward, 0).unwrap();
        assert_eq!(found.entry().map(|e| e.position), Some(a));

        // Limit excludes the only later change
        let found = log.lookup(name1, b, Direction::Forward, d).unwrap();
        assert_eq!(found, Lookup::NotFound);

        let flags1 = LogQuery::new(id(1), Field::Flags);
        assert_eq!(
            log.lookup(flags1, end, Direction::Backward, c).unwrap().entry().map(|e| e.position),
            Some(c)
        );
        assert!(!log.lookup(flags1, end, Direction::Backward, d).unwrap().is_found());
    }

    #[test]
    fn test_attribute_lookup_is_per_attribute() {
        let dir = tempdir().unwrap();
        let log = FileOperationLog::open(dir.path(), &OpLogConfig::default()).unwrap();
        let start = log.current_position();
        log.append_attribute(id(3), 1, b"one").unwrap();
        log.append(id(3), Operation::DeleteAttribute { attribute_id: 2 }).unwrap();
        let end = log.current_position();

        let attr1 = LogQuery::new(id(3), Field::Attribute(1));
        let attr2 = LogQuery::new(id(3), Field::Attribute(2));
        let attr3 = LogQuery::new(id(3), Field::Attribute(3));
        assert!(log.lookup(attr1, start, Direction::Forward, end).unwrap().is_found());
        assert!(log.lookup(attr2, start, Direction::Forward, end).unwrap().is_found());
        assert!(!log.lookup(attr3, start, Direction::Forward, end).unwrap().is_found());
    }

    #[test]
    fn test_payloads_and_release() {
        let dir = tempdir().unwrap();
        let config = OpLogConfig {
            max_logged_payload_bytes: 8,
            ..OpLogConfig::default()
        };
        let log = FileOperationLog::open(dir.path(), &config).unwrap();
        let small = log.append_content(id(1), 1, b"hello").unwrap();
        let large = log.append_content(id(1), 2, b"far too large").unwrap();

        let Operation::WriteContent { payload: Some(offset), .. } = log.read_at(small).unwrap().operation
        else {
            panic!("small payload should be logged");
        };
        assert_eq!(log.payload(offset).unwrap().as_deref(), Some(&b"hello"[..]));
        assert!(matches!(
            log.read_at(large).unwrap().operation,
            Operation::WriteContent { payload: None, .. }
        ));

        log.release_payloads().unwrap();
        assert_eq!(log.payload(offset).unwrap(), None);

        let later = log.append_content(id(1), 3, b"new").unwrap();
        let Operation::WriteContent { payload: Some(offset), .. } = log.read_at(later).unwrap().operation
        else {
            panic!("payload should be logged");
        };
        assert_eq!(log.payload(offset).unwrap().as_deref(), Some(&b"new"[..]));
    }

    #[test]
    fn test_reopen_truncates_torn_tail() {
        let dir = tempdir().unwrap();
        let end = {
            let log = FileOperationLog::open(dir.path(), &OpLogConfig::default()).unwrap();
            log.append(id(1), Operation::AllocateRecord).unwrap();
            log.append(id(1), Operation::SetParent(id(0))).unwrap();
            log.flush().unwrap();
            log.current_position()
        };

        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join(LOG_FILE_NAME))
            .unwrap();
        file.write_all(&[0xAB; 10]).unwrap();
        drop(file);

        let log = FileOperationLog::open(dir.path(), &OpLogConfig::default()).unwrap();
        assert_eq!(log.current_position(), end);
        assert_eq!(log.len(), 2);
        let next = log.append(id(1), Operation::SetLength(1)).unwrap();
        assert_eq!(next, end);
    }

    #[test]
    fn test_reopen_keeps_payload_boundary() {
        let dir = tempdir().unwrap();
        let (released, kept) = {
            let log = FileOperationLog::open(dir.path(), &OpLogConfig::default()).unwrap();
            let a = log.append_attribute(id(1), 1, b"old").unwrap();
            log.release_payloads().unwrap();
            let b = log.append_attribute(id(1), 1, b"new").unwrap();
            log.flush().unwrap();
            (a, b)
        };

        let log = FileOperationLog::open(dir.path(), &OpLogConfig::default()).unwrap();
        let payload_of = |position| match log.read_at(position).unwrap().operation {
            Operation::WriteAttribute { payload: Some(p), .. } => p,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(log.payload(payload_of(released)).unwrap(), None);
        assert_eq!(
            log.payload(payload_of(kept)).unwrap().as_deref(),
            Some(&b"new"[..])
        );
    }
}
