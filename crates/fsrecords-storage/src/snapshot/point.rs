//! Values as of a point, resolved backward first
//!
//! Recovery needs the value a field had at the point, not merely whether
//! the live value is still valid. The resolver first looks backward from
//! the point for the last logged change; if the search window holds none,
//! it falls back to the forward rule of the oracle.

use super::{NotAvailableCause, Property, SnapshotContext, fields};
use crate::collab::ChildrenTable;
use crate::oplog::{Direction, Field, LogCursor, LogEntry, LogQuery, Lookup, Operation};
use fsrecords_common::{FileId, LogPosition, RecordFlags};
use std::collections::BTreeSet;

/// Resolves field values at a fixed point
pub struct PointResolver<'a> {
    ctx: SnapshotContext<'a>,
    children: &'a ChildrenTable,
}

impl<'a> PointResolver<'a> {
    pub const fn new(ctx: SnapshotContext<'a>, children: &'a ChildrenTable) -> Self {
        Self { ctx, children }
    }

    pub const fn point(&self) -> LogPosition {
        self.ctx.point
    }

    /// Lowest position a backward search may visit
    fn window_start(&self) -> LogPosition {
        self.ctx
            .point
            .saturating_sub(self.ctx.max_distance)
            .max(self.ctx.log.start_position())
    }

    /// Last change to `field` of `id` before the point
    fn last_change(&self, id: FileId, field: Field) -> Result<Option<LogEntry>, NotAvailableCause> {
        match self.ctx.log.lookup(
            LogQuery::new(id, field),
            self.ctx.point,
            Direction::Backward,
            self.window_start(),
        ) {
            Ok(lookup) => Ok(lookup.entry()),
            Err(e) => Err(NotAvailableCause::ReadFailed(e.to_string())),
        }
    }

    fn resolve<T>(
        &self,
        id: FileId,
        field: Field,
        from_entry: impl FnOnce(&Operation) -> Option<T>,
        fallback: impl FnOnce(&SnapshotContext<'a>, FileId) -> Property<T>,
    ) -> Property<T> {
        if let Err(cause) = self.ctx.reachable_end() {
            return Property::NotAvailable(cause);
        }
        match self.last_change(id, field) {
            Ok(Some(entry)) => from_entry(&entry.operation).map_or_else(
                || {
                    Property::NotAvailable(NotAvailableCause::ReadFailed(format!(
                        "unexpected entry at {}",
                        entry.position
                    )))
                },
                Property::Ready,
            ),
            Ok(None) => fallback(&self.ctx, id),
            Err(cause) => Property::NotAvailable(cause),
        }
    }

    pub fn name_id(&self, id: FileId) -> Property<i32> {
        self.resolve(
            id,
            Field::Name,
            |op| match op {
                Operation::SetName(v) => Some(*v),
                _ => None,
            },
            fields::name_id,
        )
    }

    pub fn parent_id(&self, id: FileId) -> Property<FileId> {
        self.resolve(
            id,
            Field::Parent,
            |op| match op {
                Operation::SetParent(v) => Some(*v),
                _ => None,
            },
            fields::parent_id,
        )
    }

    pub fn length(&self, id: FileId) -> Property<i64> {
        self.resolve(
            id,
            Field::Length,
            |op| match op {
                Operation::SetLength(v) => Some(*v),
                _ => None,
            },
            fields::length,
        )
    }

    pub fn timestamp(&self, id: FileId) -> Property<i64> {
        self.resolve(
            id,
            Field::Timestamp,
            |op| match op {
                Operation::SetTimestamp(v) => Some(*v),
                _ => None,
            },
            fields::timestamp,
        )
    }

    pub fn flags(&self, id: FileId) -> Property<RecordFlags> {
        self.resolve(
            id,
            Field::Flags,
            |op| match op {
                Operation::SetFlags(v) => Some(*v),
                _ => None,
            },
            fields::flags,
        )
    }

    pub fn content_record_id(&self, id: FileId) -> Property<i32> {
        self.resolve(
            id,
            Field::ContentRef,
            |op| match op {
                Operation::SetContentRef(v) => Some(*v),
                _ => None,
            },
            fields::content_record_id,
        )
    }

    /// Content bytes at the point
    ///
    /// Content records are immutable, so the bytes of the content id in
    /// effect at the point are read from the content store; the logged
    /// payload is the fallback if that read fails.
    pub fn content(&self, id: FileId) -> Property<Option<Vec<u8>>> {
        self.content_record_id(id).and_then(|content_id| {
            if content_id == fsrecords_common::NULL_RECORD_REF {
                return Property::Ready(None);
            }
            if let Ok(data) = self.ctx.content.read(content_id) {
                return Property::Ready(Some(data));
            }
            match self.last_change(id, Field::Content) {
                Ok(Some(LogEntry {
                    operation:
                        Operation::WriteContent {
                            content_id: logged,
                            payload,
                        },
                    ..
                })) if logged == content_id => self.payload(payload).map(Some),
                Ok(_) => Property::NotAvailable(NotAvailableCause::NoLongerRetained),
                Err(cause) => Property::NotAvailable(cause),
            }
        })
    }

    fn payload(&self, payload: Option<u64>) -> Property<Vec<u8>> {
        let Some(offset) = payload else {
            return Property::NotAvailable(NotAvailableCause::NoLongerRetained);
        };
        match self.ctx.log.payload(offset) {
            Ok(Some(data)) => Property::Ready(data),
            Ok(None) => Property::NotAvailable(NotAvailableCause::NoLongerRetained),
            Err(e) => Property::NotAvailable(NotAvailableCause::ReadFailed(e.to_string())),
        }
    }

    /// Raw blob of one attribute at the point (`None` if absent)
    ///
    /// A blob written before the point is taken from its logged payload.
    pub fn attribute(&self, id: FileId, attribute_id: i32) -> Property<Option<Vec<u8>>> {
        if let Err(cause) = self.ctx.reachable_end() {
            return Property::NotAvailable(cause);
        }
        match self.last_change(id, Field::Attribute(attribute_id)) {
            Ok(Some(entry)) => match entry.operation {
                Operation::WriteAttribute { payload, .. } => self.payload(payload).map(Some),
                Operation::DeleteAttribute { .. } => Property::Ready(None),
                _ => Property::NotAvailable(NotAvailableCause::ReadFailed(format!(
                    "unexpected entry at {}",
                    entry.position
                ))),
            },
            Ok(None) => fields::attribute(&self.ctx, id, attribute_id),
            Err(cause) => Property::NotAvailable(cause),
        }
    }

    /// Attribute ids that may have had a blob at the point
    pub fn attribute_candidates(&self, id: FileId) -> Property<Vec<i32>> {
        let end = match self.ctx.reachable_end() {
            Ok(end) => end,
            Err(cause) => return Property::NotAvailable(cause),
        };
        let mut ids: BTreeSet<i32> = match self.ctx.attributes.attribute_ids(id) {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => return Property::NotAvailable(NotAvailableCause::ReadFailed(e.to_string())),
        };
        let mut cursor = LogCursor::new(self.ctx.log, self.window_start());
        while cursor.position() < end {
            match cursor.next_entry() {
                Ok(Some(entry)) if entry.file_id == id => match entry.operation {
                    Operation::WriteAttribute { attribute_id, .. }
                    | Operation::DeleteAttribute { attribute_id } => {
                        ids.insert(attribute_id);
                    }
                    _ => {}
                },
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    return Property::NotAvailable(NotAvailableCause::ReadFailed(e.to_string()));
                }
            }
        }
        Property::Ready(ids.into_iter().collect())
    }

    /// Children of `dir` at the point
    ///
    /// Starts from the live children list and undoes every logged addition
    /// and removal between the point and the log end, newest first.
    pub fn children(&self, dir: FileId) -> Property<Vec<FileId>> {
        let end = match self.ctx.reachable_end() {
            Ok(end) => end,
            Err(cause) => return Property::NotAvailable(cause),
        };
        let mut children: BTreeSet<FileId> = self.children.children(dir).into_iter().collect();
        let query = LogQuery::new(dir, Field::Children);
        let mut position = end;
        loop {
            match self
                .ctx
                .log
                .lookup(query, position, Direction::Backward, self.ctx.point)
            {
                Ok(Lookup::Found(entry)) => {
                    match entry.operation {
                        Operation::AddChild(child) => {
                            children.remove(&child);
                        }
                        Operation::RemoveChild(child) => {
                            children.insert(child);
                        }
                        _ => {}
                    }
                    position = entry.position;
                }
                Ok(Lookup::NotFound) => break,
                Err(e) => {
                    return Property::NotAvailable(NotAvailableCause::ReadFailed(e.to_string()));
                }
            }
        }
        Property::Ready(children.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::NamesEnumerator;
    use crate::snapshot::SnapshotOracle;
    use crate::vfs::VfsStore;
    use fsrecords_common::Config;
    use tempfile::tempdir;

    fn resolver_at<'a>(store: &'a VfsStore, point: LogPosition) -> PointResolver<'a> {
        let snapshot = SnapshotOracle::for_store(store).snapshot(point).unwrap();
        PointResolver::new(*snapshot.context(), store.children())
    }

    #[test]
    fn test_values_before_later_changes() {
        let dir = tempdir().unwrap();
        let store = VfsStore::open(dir.path(), &Config::default()).unwrap();
        let root = store.create_root("file:///r", "r").unwrap();
        let f = store.create_child(root, "f", RecordFlags::NONE).unwrap();
        store.set_length(f, 10).unwrap();
        store.set_timestamp(f, 100).unwrap();
        let point = store.log_position();
        store.set_length(f, 20).unwrap();
        store.set_name(f, "g").unwrap();

        let resolver = resolver_at(&store, point);
        assert_eq!(resolver.length(f), Property::Ready(10));
        assert_eq!(resolver.timestamp(f), Property::Ready(100));
        assert_eq!(resolver.parent_id(f), Property::Ready(root));
        let old_name = store.names().try_enumerate("f").unwrap().unwrap();
        assert_eq!(resolver.name_id(f), Property::Ready(old_name));
    }

    #[test]
    fn test_children_at_point() {
        let dir = tempdir().unwrap();
        let store = VfsStore::open(dir.path(), &Config::default()).unwrap();
        let root = store.create_root("file:///r", "r").unwrap();
        let a = store.create_child(root, "a", RecordFlags::NONE).unwrap();
        let b = store.create_child(root, "b", RecordFlags::IS_DIRECTORY).unwrap();
        let point = store.log_position();
        let c = store.create_child(root, "c", RecordFlags::NONE).unwrap();
        store.delete(a).unwrap();
        store.move_file(c, b).unwrap();

        assert_eq!(store.list_children(root), vec![b]);
        let resolver = resolver_at(&store, point);
        assert_eq!(resolver.children(root), Property::Ready(vec![a, b]));
        assert_eq!(resolver.children(b), Property::Ready(vec![]));
    }

    #[test]
    fn test_content_and_attributes_at_point() {
        let dir = tempdir().unwrap();
        let store = VfsStore::open(dir.path(), &Config::default()).unwrap();
        let root = store.create_root("file:///r", "r").unwrap();
        let f = store.create_child(root, "f", RecordFlags::NONE).unwrap();
        let attr = store.register_attribute("attr", 1).unwrap();
        store.write_content(f, b"old").unwrap();
        store.write_attribute(f, attr, b"a1").unwrap();
        let point = store.log_position();
        store.write_content(f, b"new").unwrap();
        store.write_attribute(f, attr, b"a2").unwrap();

        let resolver = resolver_at(&store, point);
        assert_eq!(resolver.content(f), Property::Ready(Some(b"old".to_vec())));
        let blob = resolver.attribute(f, attr).ready().flatten().unwrap();
        assert_eq!(crate::collab::split_versioned(&blob), Some((1, &b"a1"[..])));
        assert_eq!(resolver.attribute_candidates(f), Property::Ready(vec![attr]));

        store.log().release_payloads().unwrap();
        assert_eq!(
            resolver.attribute(f, attr),
            Property::NotAvailable(NotAvailableCause::NoLongerRetained)
        );
    }
}
