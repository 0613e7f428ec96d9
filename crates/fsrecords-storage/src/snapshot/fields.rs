//! Per-field property computations
//!
//! Every function re-derives its answer from the current log and store: it
//! checks the distance budget, looks forward from the point for a change to
//! the field, reads the live value, and looks forward once more. Writers log
//! before they apply, so a value written concurrently with the read is always
//! caught by the second lookup.

use super::{NotAvailableCause, Property, SnapshotContext};
use crate::oplog::{Direction, Field, LogQuery, Lookup};
use crate::records::RecordStore;
use fsrecords_common::{FileId, NULL_RECORD_REF, RecordFlags, Result};

/// Ready if `field` of `id` did not change between the point and the log end
pub fn unchanged_since_point(ctx: &SnapshotContext<'_>, id: FileId, field: Field) -> Property<()> {
    let end = match ctx.reachable_end() {
        Ok(end) => end,
        Err(cause) => return Property::NotAvailable(cause),
    };
    match ctx
        .log
        .lookup(LogQuery::new(id, field), ctx.point, Direction::Forward, end)
    {
        Ok(Lookup::NotFound) => Property::Ready(()),
        Ok(Lookup::Found(entry)) => Property::NotAvailable(NotAvailableCause::ChangedSincePoint {
            position: entry.position,
        }),
        Err(e) => Property::NotAvailable(NotAvailableCause::ReadFailed(e.to_string())),
    }
}

/// Read the live value of `fields` if none of them changed since the point,
/// both before and after the read
fn read_through<T>(
    ctx: &SnapshotContext<'_>,
    id: FileId,
    fields: &[Field],
    read: impl FnOnce() -> Result<T>,
) -> Property<T> {
    let unchanged = || {
        fields.iter().try_fold((), |(), field| {
            unchanged_since_point(ctx, id, *field).into_result()
        })
    };
    if let Err(cause) = unchanged() {
        return Property::NotAvailable(cause);
    }
    let value = match read() {
        Ok(value) => value,
        Err(e) => return Property::NotAvailable(NotAvailableCause::ReadFailed(e.to_string())),
    };
    match unchanged() {
        Ok(()) => Property::Ready(value),
        Err(cause) => Property::NotAvailable(cause),
    }
}

fn record_field<T>(
    ctx: &SnapshotContext<'_>,
    id: FileId,
    field: Field,
    read: impl FnOnce(&RecordStore, FileId) -> Result<T>,
) -> Property<T> {
    read_through(ctx, id, &[field], || read(ctx.records, id))
}

pub fn name_id(ctx: &SnapshotContext<'_>, id: FileId) -> Property<i32> {
    record_field(ctx, id, Field::Name, RecordStore::name_id)
}

pub fn parent_id(ctx: &SnapshotContext<'_>, id: FileId) -> Property<FileId> {
    record_field(ctx, id, Field::Parent, RecordStore::parent_id)
}

pub fn length(ctx: &SnapshotContext<'_>, id: FileId) -> Property<i64> {
    record_field(ctx, id, Field::Length, RecordStore::length)
}

pub fn timestamp(ctx: &SnapshotContext<'_>, id: FileId) -> Property<i64> {
    record_field(ctx, id, Field::Timestamp, RecordStore::timestamp)
}

pub fn flags(ctx: &SnapshotContext<'_>, id: FileId) -> Property<RecordFlags> {
    record_field(ctx, id, Field::Flags, RecordStore::flags)
}

pub fn content_record_id(ctx: &SnapshotContext<'_>, id: FileId) -> Property<i32> {
    record_field(ctx, id, Field::ContentRef, RecordStore::content_record_id)
}

pub fn attribute_record_id(ctx: &SnapshotContext<'_>, id: FileId) -> Property<i32> {
    record_field(ctx, id, Field::AttributeRef, RecordStore::attribute_record_id)
}

/// Cached content bytes of `id` (`None` if nothing was cached)
pub fn content(ctx: &SnapshotContext<'_>, id: FileId) -> Property<Option<Vec<u8>>> {
    content_record_id(ctx, id).and_then(|content_id| {
        if content_id == NULL_RECORD_REF {
            return unchanged_since_point(ctx, id, Field::Content).map(|()| None);
        }
        read_through(ctx, id, &[Field::ContentRef, Field::Content], || {
            ctx.content.read(content_id).map(Some)
        })
    })
}

/// Raw attribute blob of `id` (`None` if the file has none)
pub fn attribute(
    ctx: &SnapshotContext<'_>,
    id: FileId,
    attribute_id: i32,
) -> Property<Option<Vec<u8>>> {
    read_through(
        ctx,
        id,
        &[Field::AttributeRef, Field::Attribute(attribute_id)],
        || ctx.attributes.read(id, attribute_id),
    )
}
