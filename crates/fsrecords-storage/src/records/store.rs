//! Record store with per-record optimistic concurrency

use super::layout::{
    self, BODY_WORDS, ConnectionStatus, FORMAT_VERSION, FileRecord, HEADER_CONNECTION_STATUS,
    HEADER_GLOBAL_MOD_COUNT, HEADER_RECORDS_COUNT, HEADER_TIMESTAMP, HEADER_VERSION,
    MOD_COUNT_AFTER, MOD_COUNT_PRE, RECORD_WORDS, word_index,
};
use super::region::{RecordRegion, open_region};
use fsrecords_common::config::{StorageConfig, StorageKind};
use fsrecords_common::{Error, FileId, RecordFlags, Result};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering, fence};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Snapshot of the store header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreHeader {
    pub version: i32,
    pub global_mod_count: i32,
    pub timestamp: i64,
    pub connection_status: ConnectionStatus,
    pub records_count: i32,
}

/// Fixed-size file record table
pub struct RecordStore {
    region: Box<dyn RecordRegion>,
    /// Guards the header words only
    header_lock: RwLock<()>,
    /// Highest id handed out so far
    max_allocated: AtomicI32,
    /// Successful record writes, persisted into the header on flush
    global_mod_count: AtomicI32,
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl RecordStore {
    /// Open the record table at `path` with the configured storage kind
    pub fn open(path: impl AsRef<Path>, config: &StorageConfig) -> Result<Self> {
        let region = open_region(path.as_ref(), config)?;
        let store = Self::from_region(region)?;
        info!(
            "Opened record store {:?} ({:?}, {} records)",
            path.as_ref(),
            config.kind,
            store.max_allocated_id()
        );
        Ok(store)
    }

    /// Fresh in-memory store
    pub fn in_memory() -> Result<Self> {
        Self::open(
            Path::new(""),
            &StorageConfig {
                kind: StorageKind::InMemory,
                ..StorageConfig::default()
            },
        )
    }

    /// Wrap an already opened region, validating its contents
    ///
    /// Fails with [`Error::CorruptedRecords`] if any allocated record was
    /// left in the middle of a write.
    pub fn from_region(region: Box<dyn RecordRegion>) -> Result<Self> {
        region.ensure_capacity(1)?;

        let version = region.load(HEADER_VERSION, Ordering::Acquire)?;
        let records_count = region.load(HEADER_RECORDS_COUNT, Ordering::Acquire)?;
        if version == 0 && records_count == 0 {
            region.store(HEADER_VERSION, FORMAT_VERSION, Ordering::Release)?;
            let (low, high) = layout::split_i64(now_millis());
            region.store(HEADER_TIMESTAMP, low, Ordering::Relaxed)?;
            region.store(HEADER_TIMESTAMP + 1, high, Ordering::Relaxed)?;
            debug!("initialized empty record table");
        } else if version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion {
                found: version,
                expected: FORMAT_VERSION,
            });
        }

        if records_count < 0 || records_count as usize >= region.capacity() {
            return Err(Error::corruption(format!(
                "header claims {} records but storage backs only {}",
                records_count,
                region.capacity().saturating_sub(1)
            )));
        }

        let global_mod_count = region.load(HEADER_GLOBAL_MOD_COUNT, Ordering::Acquire)?;
        let store = Self {
            region,
            header_lock: RwLock::new(()),
            max_allocated: AtomicI32::new(records_count),
            global_mod_count: AtomicI32::new(global_mod_count),
        };

        store.check_settled()?;

        let status = store.connection_status()?;
        if status != ConnectionStatus::SafelyClosed {
            warn!("record store was not closed cleanly (status: {:?})", status);
        }
        store.set_connection_status(ConnectionStatus::Connected)?;
        Ok(store)
    }

    /// Every allocated record must be at rest when the store is opened
    fn check_settled(&self) -> Result<()> {
        let mut unsettled = 0usize;
        let mut first = None;
        for raw in FileId::FIRST.get()..=self.max_allocated.load(Ordering::Acquire) {
            let id = FileId::new(raw);
            let (pre, after) = self.mod_counts(id)?;
            if pre != after {
                unsettled += 1;
                first.get_or_insert(id);
            }
        }
        if let Some(first_id) = first {
            error!(
                "{} record(s) have unsettled mod-counts (first: {}); store must be rebuilt",
                unsettled, first_id
            );
            return Err(Error::CorruptedRecords {
                count: unsettled,
                first_id,
            });
        }
        Ok(())
    }

    /// Storage variant backing this store
    pub fn kind(&self) -> StorageKind {
        self.region.kind()
    }

    #[cfg(test)]
    pub(crate) fn region(&self) -> &dyn RecordRegion {
        self.region.as_ref()
    }

    /// Highest allocated id ([`FileId::NONE`] if nothing is allocated)
    pub fn max_allocated_id(&self) -> FileId {
        FileId::new(self.max_allocated.load(Ordering::Acquire))
    }

    /// True if `id` names an allocated record
    pub fn contains(&self, id: FileId) -> bool {
        id.is_valid() && id <= self.max_allocated_id()
    }

    pub(crate) fn check_id(&self, id: FileId) -> Result<()> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(Error::FileIdOutOfRange {
                id,
                max: self.max_allocated_id(),
            })
        }
    }

    /// Hand out the next id; ids are strictly increasing and never reused
    pub fn allocate_record(&self) -> Result<FileId> {
        let id = FileId::new(self.max_allocated.fetch_add(1, Ordering::AcqRel) + 1);
        self.clean_record(id)?;
        Ok(id)
    }

    /// Zero the slot of `id`, extending the logical record count to cover it
    pub fn clean_record(&self, id: FileId) -> Result<()> {
        if !id.is_valid() {
            return Err(Error::invalid_argument(format!("cannot clean record {id}")));
        }
        self.region.ensure_capacity(id.index() + 1)?;
        for field in 0..RECORD_WORDS {
            self.region.store(word_index(id, field), 0, Ordering::Relaxed)?;
        }
        fence(Ordering::Release);

        self.max_allocated.fetch_max(id.get(), Ordering::AcqRel);
        let _guard = self.header_lock.write();
        if self.region.load(HEADER_RECORDS_COUNT, Ordering::Acquire)? < id.get() {
            self.region.store(HEADER_RECORDS_COUNT, id.get(), Ordering::Release)?;
        }
        Ok(())
    }

    /// Raw `(modCountPre, modCountAfter)` of a record
    pub fn mod_counts(&self, id: FileId) -> Result<(i32, i32)> {
        let pre = self.region.load(word_index(id, MOD_COUNT_PRE), Ordering::Acquire)?;
        let after = self.region.load(word_index(id, MOD_COUNT_AFTER), Ordering::Acquire)?;
        Ok((pre, after))
    }

    /// Number of completed writes to a record
    pub fn mod_count(&self, id: FileId) -> Result<i32> {
        self.check_id(id)?;
        loop {
            let (pre, after) = self.mod_counts(id)?;
            if pre == after {
                return Ok(after);
            }
            std::hint::spin_loop();
        }
    }

    /// One optimistic read: `None` if a write overlapped it
    ///
    /// `modCountAfter` is sampled before the body and `modCountPre` after
    /// it: a writer that was active at the start leaves `pre` ahead of the
    /// sampled `after`, and one that starts meanwhile bumps `pre`.
    fn try_read(&self, id: FileId) -> Result<Option<(FileRecord, i32)>> {
        let base = word_index(id, 0);
        let after = self.region.load(base + MOD_COUNT_AFTER, Ordering::Acquire)?;
        let mut words = [0i32; BODY_WORDS];
        for (offset, word) in words.iter_mut().enumerate() {
            *word = self.region.load(base + offset, Ordering::Relaxed)?;
        }
        fence(Ordering::Acquire);
        let pre = self.region.load(base + MOD_COUNT_PRE, Ordering::Relaxed)?;
        if pre == after {
            Ok(Some((FileRecord::from_words(&words), after)))
        } else {
            Ok(None)
        }
    }

    /// Read a whole record; torn reads are retried, never returned
    pub fn read_record(&self, id: FileId) -> Result<FileRecord> {
        self.check_id(id)?;
        loop {
            if let Some((record, _)) = self.try_read(id)? {
                return Ok(record);
            }
            std::hint::spin_loop();
        }
    }

    /// Apply `mutate` to a record with the optimistic write protocol
    ///
    /// `mutate` may run several times under contention and must only
    /// touch the record it is given.
    pub fn update<F>(&self, id: FileId, mut mutate: F) -> Result<FileRecord>
    where
        F: FnMut(&mut FileRecord),
    {
        self.check_id(id)?;
        let base = word_index(id, 0);
        loop {
            let Some((mut scratch, observed)) = self.try_read(id)? else {
                std::hint::spin_loop();
                continue;
            };
            mutate(&mut scratch);

            let claimed = observed.wrapping_add(1);
            if !self
                .region
                .compare_exchange(base + MOD_COUNT_PRE, observed, claimed)?
            {
                continue;
            }
            fence(Ordering::Release);
            for (offset, word) in scratch.to_words().iter().enumerate() {
                self.region.store(base + offset, *word, Ordering::Relaxed)?;
            }
            self.region
                .store(base + MOD_COUNT_AFTER, claimed, Ordering::Release)?;
            self.global_mod_count.fetch_add(1, Ordering::Relaxed);
            return Ok(scratch);
        }
    }

    // Per-field accessors

    pub fn parent_id(&self, id: FileId) -> Result<FileId> {
        Ok(self.read_record(id)?.parent_id)
    }

    pub fn set_parent_id(&self, id: FileId, parent_id: FileId) -> Result<()> {
        self.update(id, |r| r.parent_id = parent_id).map(drop)
    }

    pub fn name_id(&self, id: FileId) -> Result<i32> {
        Ok(self.read_record(id)?.name_id)
    }

    pub fn set_name_id(&self, id: FileId, name_id: i32) -> Result<()> {
        self.update(id, |r| r.name_id = name_id).map(drop)
    }

    pub fn flags(&self, id: FileId) -> Result<RecordFlags> {
        Ok(self.read_record(id)?.flags)
    }

    pub fn set_flags(&self, id: FileId, flags: RecordFlags) -> Result<()> {
        self.update(id, |r| r.flags = flags).map(drop)
    }

    /// Set or clear `flag`, leaving other bits alone; returns the new flags
    pub fn set_flag(&self, id: FileId, flag: RecordFlags, value: bool) -> Result<RecordFlags> {
        self.update(id, |r| r.flags.set(flag, value))
            .map(|r| r.flags)
    }

    pub fn attribute_record_id(&self, id: FileId) -> Result<i32> {
        Ok(self.read_record(id)?.attribute_record_id)
    }

    pub fn set_attribute_record_id(&self, id: FileId, record_id: i32) -> Result<()> {
        self.update(id, |r| r.attribute_record_id = record_id)
            .map(drop)
    }

    pub fn content_record_id(&self, id: FileId) -> Result<i32> {
        Ok(self.read_record(id)?.content_record_id)
    }

    pub fn set_content_record_id(&self, id: FileId, record_id: i32) -> Result<()> {
        self.update(id, |r| r.content_record_id = record_id)
            .map(drop)
    }

    pub fn length(&self, id: FileId) -> Result<i64> {
        Ok(self.read_record(id)?.length)
    }

    pub fn set_length(&self, id: FileId, length: i64) -> Result<()> {
        self.update(id, |r| r.length = length).map(drop)
    }

    pub fn timestamp(&self, id: FileId) -> Result<i64> {
        Ok(self.read_record(id)?.timestamp)
    }

    pub fn set_timestamp(&self, id: FileId, timestamp: i64) -> Result<()> {
        self.update(id, |r| r.timestamp = timestamp).map(drop)
    }

    // Header

    /// Read the header under the shared lock
    pub fn header(&self) -> Result<StoreHeader> {
        let _guard = self.header_lock.read();
        let low = self.region.load(HEADER_TIMESTAMP, Ordering::Acquire)?;
        let high = self.region.load(HEADER_TIMESTAMP + 1, Ordering::Acquire)?;
        Ok(StoreHeader {
            version: self.region.load(HEADER_VERSION, Ordering::Acquire)?,
            global_mod_count: self.global_mod_count(),
            timestamp: layout::join_i64(low, high),
            connection_status: ConnectionStatus::from_raw(
                self.region.load(HEADER_CONNECTION_STATUS, Ordering::Acquire)?,
            ),
            records_count: self.region.load(HEADER_RECORDS_COUNT, Ordering::Acquire)?,
        })
    }

    pub fn version(&self) -> Result<i32> {
        let _guard = self.header_lock.read();
        self.region.load(HEADER_VERSION, Ordering::Acquire)
    }

    pub fn set_version(&self, version: i32) -> Result<()> {
        let _guard = self.header_lock.write();
        self.region.store(HEADER_VERSION, version, Ordering::Release)
    }

    /// Successful record writes since the table was created
    pub fn global_mod_count(&self) -> i32 {
        self.global_mod_count.load(Ordering::Acquire)
    }

    pub fn header_timestamp(&self) -> Result<i64> {
        Ok(self.header()?.timestamp)
    }

    pub fn set_header_timestamp(&self, timestamp: i64) -> Result<()> {
        let _guard = self.header_lock.write();
        let (low, high) = layout::split_i64(timestamp);
        self.region.store(HEADER_TIMESTAMP, low, Ordering::Relaxed)?;
        self.region.store(HEADER_TIMESTAMP + 1, high, Ordering::Release)
    }

    pub fn connection_status(&self) -> Result<ConnectionStatus> {
        let _guard = self.header_lock.read();
        Ok(ConnectionStatus::from_raw(
            self.region.load(HEADER_CONNECTION_STATUS, Ordering::Acquire)?,
        ))
    }

    pub fn set_connection_status(&self, status: ConnectionStatus) -> Result<()> {
        let _guard = self.header_lock.write();
        self.region
            .store(HEADER_CONNECTION_STATUS, status.raw(), Ordering::Release)
    }

    /// Persist the header and all record writes
    pub fn flush(&self) -> Result<()> {
        {
            let _guard = self.header_lock.write();
            self.region.store(
                HEADER_GLOBAL_MOD_COUNT,
                self.global_mod_count(),
                Ordering::Release,
            )?;
        }
        self.set_header_timestamp(now_millis())?;
        self.region.flush()
    }

    /// Mark the table safely closed and flush it
    pub fn close(&self) -> Result<()> {
        self.set_connection_status(ConnectionStatus::SafelyClosed)?;
        self.flush()?;
        debug!("record store closed ({} records)", self.max_allocated_id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::MemoryRegion;
    use rand::Rng;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use tempfile::tempdir;

    fn config(kind: StorageKind) -> StorageConfig {
        StorageConfig {
            kind,
            records_per_chunk: 1024,
        }
    }

    #[test]
    fn test_allocation_is_monotonic() {
        let store = RecordStore::in_memory().unwrap();
        assert_eq!(store.max_allocated_id(), FileId::NONE);
        let ids: Vec<FileId> = (0..5).map(|_| store.allocate_record().unwrap()).collect();
        assert_eq!(ids, (1..=5).map(FileId::new).collect::<Vec<_>>());
        assert_eq!(store.max_allocated_id(), FileId::new(5));
        assert_eq!(store.header().unwrap().records_count, 5);
    }

    #[test]
    fn test_field_accessors() {
        let store = RecordStore::in_memory().unwrap();
        let id = store.allocate_record().unwrap();

        store.set_parent_id(id, FileId::new(9)).unwrap();
        store.set_name_id(id, 4).unwrap();
        store.set_flags(id, RecordFlags::IS_DIRECTORY).unwrap();
        store.set_attribute_record_id(id, 3).unwrap();
        store.set_content_record_id(id, 8).unwrap();
        store.set_length(id, 1 << 40).unwrap();
        store.set_timestamp(id, -12).unwrap();

        assert_eq!(store.parent_id(id).unwrap(), FileId::new(9));
        assert_eq!(store.name_id(id).unwrap(), 4);
        assert!(store.flags(id).unwrap().is_directory());
        assert_eq!(store.attribute_record_id(id).unwrap(), 3);
        assert_eq!(store.content_record_id(id).unwrap(), 8);
        assert_eq!(store.length(id).unwrap(), 1 << 40);
        assert_eq!(store.timestamp(id).unwrap(), -12);
        assert_eq!(store.mod_count(id).unwrap(), 7);
        assert_eq!(store.global_mod_count(), 7);
    }

    #[test]
    fn test_out_of_range_ids_rejected() {
        let store = RecordStore::in_memory().unwrap();
        store.allocate_record().unwrap();
        assert!(store.read_record(FileId::NONE).is_err());
        assert!(matches!(
            store.read_record(FileId::new(2)),
            Err(Error::FileIdOutOfRange { .. })
        ));
        assert!(store.clean_record(FileId::NONE).is_err());
    }

    #[test]
    fn test_clean_record_extends_count() {
        let store = RecordStore::in_memory().unwrap();
        store.clean_record(FileId::new(10)).unwrap();
        assert_eq!(store.max_allocated_id(), FileId::new(10));
        assert_eq!(store.allocate_record().unwrap(), FileId::new(11));
    }

    #[test]
    fn test_reopen_preserves_records() {
        let dir = tempdir().unwrap();
        for kind in [StorageKind::MemoryMapped, StorageKind::Paged] {
            let path = dir.path().join(format!("{kind:?}.dat"));
            {
                let store = RecordStore::open(&path, &config(kind)).unwrap();
                for _ in 0..1500 {
                    store.allocate_record().unwrap();
                }
                store.set_length(FileId::new(1200), 99).unwrap();
                store.set_name_id(FileId::new(1), 5).unwrap();
                store.close().unwrap();
            }
            let store = RecordStore::open(&path, &config(kind)).unwrap();
            assert_eq!(store.max_allocated_id(), FileId::new(1500));
            assert_eq!(store.length(FileId::new(1200)).unwrap(), 99);
            assert_eq!(store.name_id(FileId::new(1)).unwrap(), 5);
            assert_eq!(store.global_mod_count(), 2);
            assert_eq!(store.allocate_record().unwrap(), FileId::new(1501));
        }
    }

    #[test]
    fn test_unclosed_store_still_opens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.dat");
        {
            let store = RecordStore::open(&path, &config(StorageKind::MemoryMapped)).unwrap();
            store.allocate_record().unwrap();
            store.flush().unwrap();
        }
        let store = RecordStore::open(&path, &config(StorageKind::MemoryMapped)).unwrap();
        assert_eq!(store.connection_status().unwrap(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_unsettled_record_fails_open_for_file_kinds() {
        let dir = tempdir().unwrap();
        for kind in [StorageKind::MemoryMapped, StorageKind::Paged] {
            let path = dir.path().join(format!("{kind:?}.dat"));
            {
                let store = RecordStore::open(&path, &config(kind)).unwrap();
                for _ in 0..3 {
                    store.allocate_record().unwrap();
                }
                // Simulate a crash between claiming record 2 and publishing it.
                let word = word_index(FileId::new(2), MOD_COUNT_PRE);
                store.region().store(word, 1, Ordering::Release).unwrap();
                store.flush().unwrap();
            }
            match RecordStore::open(&path, &config(kind)) {
                Err(Error::CorruptedRecords { count, first_id }) => {
                    assert_eq!(count, 1);
                    assert_eq!(first_id, FileId::new(2));
                }
                Err(other) => panic!("unexpected error: {other}"),
                Ok(_) => panic!("corrupted store opened"),
            }
        }
    }

    #[test]
    fn test_unsettled_record_fails_open_in_memory() {
        let region = MemoryRegion::new(1024);
        region.ensure_capacity(4).unwrap();
        region.store(HEADER_VERSION, FORMAT_VERSION, Ordering::Release).unwrap();
        region.store(HEADER_RECORDS_COUNT, 3, Ordering::Release).unwrap();
        region
            .store(word_index(FileId::new(3), MOD_COUNT_AFTER), 4, Ordering::Release)
            .unwrap();

        let err = RecordStore::from_region(Box::new(region)).err().unwrap();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_wrong_version_rejected() {
        let region = MemoryRegion::new(1024);
        region.ensure_capacity(1).unwrap();
        region.store(HEADER_VERSION, 99, Ordering::Release).unwrap();
        assert!(matches!(
            RecordStore::from_region(Box::new(region)),
            Err(Error::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[test]
    fn test_concurrent_writers_lose_nothing() {
        let store = Arc::new(RecordStore::in_memory().unwrap());
        let id = store.allocate_record().unwrap();
        let threads = 8;
        let writes_per_thread = 500;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..writes_per_thread {
                        store.update(id, |r| r.length += 1).unwrap();
                        store.update(id, |r| r.name_id = t).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let (pre, after) = store.mod_counts(id).unwrap();
        assert_eq!(pre, after);
        assert_eq!(after, threads * writes_per_thread * 2);
        assert_eq!(
            store.length(id).unwrap(),
            i64::from(threads * writes_per_thread)
        );
    }

    #[test]
    fn test_disjoint_fields_from_two_threads_both_land() {
        let store = Arc::new(RecordStore::in_memory().unwrap());
        for _ in 0..5 {
            store.allocate_record().unwrap();
        }
        let id = FileId::new(5);

        let flags_writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .set_flags(id, RecordFlags::IS_DIRECTORY | RecordFlags::IS_HIDDEN)
                    .unwrap();
            })
        };
        let length_writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.set_length(id, 4096).unwrap())
        };
        flags_writer.join().unwrap();
        length_writer.join().unwrap();

        let record = store.read_record(id).unwrap();
        assert_eq!(record.flags, RecordFlags::IS_DIRECTORY | RecordFlags::IS_HIDDEN);
        assert_eq!(record.length, 4096);
        let (pre, after) = store.mod_counts(id).unwrap();
        assert_eq!(pre, after);
        assert_eq!(after, 2);
    }

    #[test]
    fn test_readers_never_see_torn_records() {
        let store = Arc::new(RecordStore::in_memory().unwrap());
        let id = store.allocate_record().unwrap();
        let done = Arc::new(AtomicBool::new(false));

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for _ in 0..2000 {
                        let v: i32 = rng.gen_range(1..i32::MAX);
                        store
                            .update(id, |r| {
                                r.parent_id = FileId::new(v);
                                r.name_id = v;
                                r.content_record_id = v;
                                r.length = i64::from(v) << 20;
                                r.timestamp = -i64::from(v);
                            })
                            .unwrap();
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    while !done.load(Ordering::Acquire) {
                        let r = store.read_record(id).unwrap();
                        let v = r.name_id;
                        assert_eq!(r.parent_id.get(), v);
                        assert_eq!(r.content_record_id, v);
                        assert_eq!(r.length, i64::from(v) << 20);
                        assert_eq!(r.timestamp, -i64::from(v));
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::Release);
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.mod_count(id).unwrap(), 8000);
    }

    #[test]
    fn test_concurrent_allocation_hands_out_unique_ids() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            RecordStore::open(dir.path().join("r.dat"), &config(StorageKind::MemoryMapped))
                .unwrap(),
        );
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    (0..600)
                        .map(|_| store.allocate_record().unwrap().get())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<i32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (1..=2400).collect::<Vec<_>>());
        assert_eq!(store.header().unwrap().records_count, 2400);
    }

    #[test]
    fn test_header_roundtrip() {
        let store = RecordStore::in_memory().unwrap();
        store.set_header_timestamp(1234).unwrap();
        store.set_version(FORMAT_VERSION).unwrap();
        let header = store.header().unwrap();
        assert_eq!(header.timestamp, 1234);
        assert_eq!(header.version, FORMAT_VERSION);
        assert_eq!(header.connection_status, ConnectionStatus::Connected);
    }
}
