//! Snapshot oracle

use super::{Property, SnapshotContext, fields};
use crate::collab::{AttributeStorage, ContentStorage};
use crate::oplog::OperationLog;
use crate::records::RecordStore;
use crate::vfs::VfsStore;
use fsrecords_common::config::SnapshotConfig;
use fsrecords_common::{FileId, LogPosition, RecordFlags};
use tracing::debug;

/// Answers point-in-time queries against a live store
pub struct SnapshotOracle<'a> {
    log: &'a dyn OperationLog,
    records: &'a RecordStore,
    content: &'a dyn ContentStorage,
    attributes: &'a dyn AttributeStorage,
    config: SnapshotConfig,
}

impl<'a> SnapshotOracle<'a> {
    pub fn new(
        log: &'a dyn OperationLog,
        records: &'a RecordStore,
        content: &'a dyn ContentStorage,
        attributes: &'a dyn AttributeStorage,
        config: SnapshotConfig,
    ) -> Self {
        Self {
            log,
            records,
            content,
            attributes,
            config,
        }
    }

    /// Oracle over an opened storage directory
    pub fn for_store(store: &'a VfsStore) -> Self {
        Self::new(
            store.log(),
            store.records(),
            store.content(),
            store.attributes(),
            store.config().snapshot.clone(),
        )
    }

    /// Snapshot as of `point`
    ///
    /// `None` if `point` lies beyond the log end, is not an entry boundary,
    /// or is further behind the end than `max_search_distance`; no lookup
    /// is attempted in that case.
    pub fn snapshot(&self, point: LogPosition) -> Option<Snapshot<'a>> {
        let end = self.log.current_position();
        if point > end || point < self.log.start_position() {
            return None;
        }
        if !self.log.is_entry_boundary(point) {
            debug!("point {} is not an entry boundary, refusing", point);
            return None;
        }
        if end - point > self.config.max_search_distance {
            debug!(
                "point {} is {} bytes behind the log end, refusing",
                point,
                end - point
            );
            return None;
        }
        Some(Snapshot {
            ctx: SnapshotContext {
                log: self.log,
                records: self.records,
                content: self.content,
                attributes: self.attributes,
                point,
                max_distance: self.config.max_search_distance,
            },
        })
    }
}

/// Store state as of one log position
#[derive(Clone, Copy)]
pub struct Snapshot<'a> {
    ctx: SnapshotContext<'a>,
}

impl<'a> Snapshot<'a> {
    pub const fn point(&self) -> LogPosition {
        self.ctx.point
    }

    pub const fn context(&self) -> &SnapshotContext<'a> {
        &self.ctx
    }

    /// View of one file; nothing is computed until a property is asked for
    pub const fn file(&self, id: FileId) -> FileSnapshot<'a> {
        FileSnapshot { ctx: self.ctx, id }
    }
}

/// One file as of a snapshot point
///
/// Properties are not cached: the log keeps growing, so every call checks
/// the current log again.
#[derive(Clone, Copy)]
pub struct FileSnapshot<'a> {
    ctx: SnapshotContext<'a>,
    id: FileId,
}

impl FileSnapshot<'_> {
    pub const fn id(&self) -> FileId {
        self.id
    }

    pub fn name_id(&self) -> Property<i32> {
        fields::name_id(&self.ctx, self.id)
    }

    pub fn parent_id(&self) -> Property<FileId> {
        fields::parent_id(&self.ctx, self.id)
    }

    pub fn length(&self) -> Property<i64> {
        fields::length(&self.ctx, self.id)
    }

    pub fn timestamp(&self) -> Property<i64> {
        fields::timestamp(&self.ctx, self.id)
    }

    pub fn flags(&self) -> Property<RecordFlags> {
        fields::flags(&self.ctx, self.id)
    }

    pub fn content_record_id(&self) -> Property<i32> {
        fields::content_record_id(&self.ctx, self.id)
    }

    pub fn attribute_record_id(&self) -> Property<i32> {
        fields::attribute_record_id(&self.ctx, self.id)
    }

    pub fn content(&self) -> Property<Option<Vec<u8>>> {
        fields::content(&self.ctx, self.id)
    }

    pub fn attribute(&self, attribute_id: i32) -> Property<Option<Vec<u8>>> {
        fields::attribute(&self.ctx, self.id, attribute_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::NotAvailableCause;
    use fsrecords_common::Config;
    use fsrecords_common::config::SnapshotConfig;
    use tempfile::tempdir;

    fn open_with_distance(dir: &std::path::Path, max_search_distance: u64) -> VfsStore {
        let config = Config {
            snapshot: SnapshotConfig {
                max_search_distance,
            },
            ..Config::default()
        };
        VfsStore::open(dir, &config).unwrap()
    }

    #[test]
    fn test_unchanged_fields_read_through() {
        let dir = tempdir().unwrap();
        let store = open_with_distance(dir.path(), 1 << 20);
        let root = store.create_root("file:///r", "r").unwrap();
        let f = store.create_child(root, "f", RecordFlags::NONE).unwrap();
        store.set_length(f, 10).unwrap();
        store.write_content(f, b"abc").unwrap();
        let point = store.log_position();

        // Changes to other files and other fields do not matter
        store.set_timestamp(f, 99).unwrap();
        store.set_length(root, 1).unwrap();

        let oracle = SnapshotOracle::for_store(&store);
        let file = oracle.snapshot(point).unwrap().file(f);
        assert_eq!(file.parent_id(), Property::Ready(root));
        assert_eq!(file.length(), Property::Ready(3));
        assert_eq!(file.flags(), Property::Ready(RecordFlags::NONE));
        assert_eq!(file.content(), Property::Ready(Some(b"abc".to_vec())));
        assert_eq!(
            file.name_id(),
            Property::Ready(store.records().name_id(f).unwrap())
        );
        assert!(matches!(
            file.timestamp(),
            Property::NotAvailable(NotAvailableCause::ChangedSincePoint { .. })
        ));
    }

    #[test]
    fn test_properties_follow_the_growing_log() {
        let dir = tempdir().unwrap();
        let store = open_with_distance(dir.path(), 1 << 20);
        let root = store.create_root("file:///r", "r").unwrap();
        let point = store.log_position();

        let oracle = SnapshotOracle::for_store(&store);
        let snapshot = oracle.snapshot(point).unwrap();
        let file = snapshot.file(root);
        assert!(file.length().is_ready());

        // A later change invalidates a property that was ready before
        store.set_length(root, 5).unwrap();
        assert!(!file.length().is_ready());
        assert!(file.name_id().is_ready());
    }

    #[test]
    fn test_changed_content_is_not_available() {
        let dir = tempdir().unwrap();
        let store = open_with_distance(dir.path(), 1 << 20);
        let root = store.create_root("file:///r", "r").unwrap();
        let f = store.create_child(root, "f", RecordFlags::NONE).unwrap();
        store.write_content(f, b"v1").unwrap();
        let point = store.log_position();
        store.write_content(f, b"v2").unwrap();

        let oracle = SnapshotOracle::for_store(&store);
        let file = oracle.snapshot(point).unwrap().file(f);
        assert!(!file.content().is_ready());
        assert!(!file.content_record_id().is_ready());
    }

    #[test]
    fn test_attribute_changes() {
        let dir = tempdir().unwrap();
        let store = open_with_distance(dir.path(), 1 << 20);
        let root = store.create_root("file:///r", "r").unwrap();
        let a = store.register_attribute("a", 1).unwrap();
        let b = store.register_attribute("b", 1).unwrap();
        store.write_attribute(root, a, b"x").unwrap();
        store.write_attribute(root, b, b"y").unwrap();
        let point = store.log_position();
        store.write_attribute(root, b, b"z").unwrap();

        let oracle = SnapshotOracle::for_store(&store);
        let file = oracle.snapshot(point).unwrap().file(root);
        let blob = file.attribute(a).ready().flatten().unwrap();
        assert_eq!(crate::collab::split_versioned(&blob), Some((1, &b"x"[..])));
        assert!(!file.attribute(b).is_ready());
    }

    #[test]
    fn test_points_out_of_reach() {
        let dir = tempdir().unwrap();
        let store = open_with_distance(dir.path(), 100);
        let root = store.create_root("file:///r", "r").unwrap();
        let point = store.log_position();
        let oracle = SnapshotOracle::for_store(&store);
        assert!(oracle.snapshot(point).is_some());
        assert!(oracle.snapshot(point + 1).is_none());

        let snapshot = oracle.snapshot(point).unwrap();
        for ts in 0..5 {
            store.set_timestamp(root, ts).unwrap();
        }
        // 5 entries of 24 bytes put the point 120 bytes behind the end
        assert!(oracle.snapshot(point).is_none());
        assert!(matches!(
            snapshot.file(root).name_id(),
            Property::NotAvailable(NotAvailableCause::TooFarToSearch { distance: 120, limit: 100 })
        ));
    }

    #[test]
    fn test_unaligned_point_is_refused() {
        let dir = tempdir().unwrap();
        let store = open_with_distance(dir.path(), 1 << 20);
        let root = store.create_root("file:///r", "r").unwrap();
        store.set_length(root, 1).unwrap();
        store.set_length(root, 2).unwrap();
        let end = store.log_position();

        let oracle = SnapshotOracle::for_store(&store);
        assert!(oracle.snapshot(end - 5).is_none());
        assert!(oracle.snapshot(store.log().align_down(end - 5)).is_some());
    }

    #[test]
    fn test_concurrent_writes_never_surface_as_ready() {
        let dir = tempdir().unwrap();
        let store = open_with_distance(dir.path(), 1 << 20);
        let root = store.create_root("file:///r", "r").unwrap();
        let oracle = SnapshotOracle::for_store(&store);

        for trial in 1..200i64 {
            let expected = store.records().length(root).unwrap();
            let snapshot = oracle.snapshot(store.log_position()).unwrap();
            let file = snapshot.file(root);
            std::thread::scope(|s| {
                s.spawn(|| store.set_length(root, trial * 10).unwrap());
                for _ in 0..50 {
                    if let Property::Ready(length) = file.length() {
                        assert_eq!(length, expected, "trial {trial}");
                    }
                }
            });
            assert!(!file.length().is_ready());
        }
    }
}
