//! Append-only operation log
//!
//! Every mutation of a record, its content, its attributes or its children
//! list is logged as one fixed-size entry. Positions are byte offsets into
//! the log file, so they grow with the amount of history written and can be
//! compared against a distance budget.
//!
//! Consumers only need the [`OperationLog`] trait: position queries,
//! traversal in both directions through a [`LogCursor`], and the per-field
//! directed [`lookup`](OperationLog::lookup).

mod entry;
mod file_log;
mod payloads;

pub use entry::{ENTRY_SIZE, LogEntry, Operation, PayloadRef};
pub use file_log::{FileOperationLog, LOG_FILE_NAME, PAYLOAD_FILE_NAME};

use fsrecords_common::{FileId, LogPosition, Result};

/// Logical field a lookup is interested in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Parent,
    Length,
    Timestamp,
    Flags,
    ContentRef,
    AttributeRef,
    /// Content bytes written for the file
    Content,
    /// Blob of one attribute (written or deleted)
    Attribute(i32),
    /// Additions to and removals from a directory's children list
    Children,
    Allocation,
}

impl Field {
    /// True if `operation` changes this field
    pub fn matches(self, operation: &Operation) -> bool {
        match (self, operation) {
            (Self::Name, Operation::SetName(_))
            | (Self::Parent, Operation::SetParent(_))
            | (Self::Length, Operation::SetLength(_))
            | (Self::Timestamp, Operation::SetTimestamp(_))
            | (Self::Flags, Operation::SetFlags(_))
            | (Self::ContentRef, Operation::SetContentRef(_))
            | (Self::AttributeRef, Operation::SetAttributeRef(_))
            | (Self::Content, Operation::WriteContent { .. })
            | (Self::Children, Operation::AddChild(_) | Operation::RemoveChild(_))
            | (Self::Allocation, Operation::AllocateRecord) => true,
            (Self::Attribute(wanted), Operation::WriteAttribute { attribute_id, .. })
            | (Self::Attribute(wanted), Operation::DeleteAttribute { attribute_id }) => {
                wanted == *attribute_id
            }
            _ => false,
        }
    }
}

/// Which field of which file to look for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogQuery {
    pub file_id: FileId,
    pub field: Field,
}

impl LogQuery {
    pub const fn new(file_id: FileId, field: Field) -> Self {
        Self { file_id, field }
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        entry.file_id.get() == self.file_id.get() && self.field.matches(&entry.operation)
    }
}

/// Traversal direction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// From `start` up to (excluding) `limit`
    Forward,
    /// From just before `start` down to (including) `limit`
    Backward,
}

/// Outcome of a directed lookup
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// The change nearest to `start` in the traversal direction
    Found(LogEntry),
    NotFound,
}

impl Lookup {
    pub const fn entry(self) -> Option<LogEntry> {
        match self {
            Self::Found(entry) => Some(entry),
            Self::NotFound => None,
        }
    }

    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Position-addressable, append-only log of field mutations
pub trait OperationLog: Send + Sync {
    /// Position of the first entry
    fn start_position(&self) -> LogPosition;

    /// Position one past the last entry (where the next append lands)
    fn current_position(&self) -> LogPosition;

    /// Read the entry at `position`
    fn read_at(&self, position: LogPosition) -> Result<LogEntry>;

    /// Position of the entry following the one at `position`
    fn next_position(&self, position: LogPosition) -> LogPosition;

    /// Position of the entry preceding `position`, if any
    fn prev_position(&self, position: LogPosition) -> Option<LogPosition>;

    /// Nearest entry boundary at or below `position`, clamped to the log bounds
    fn align_down(&self, position: LogPosition) -> LogPosition;

    fn is_entry_boundary(&self, position: LogPosition) -> bool {
        self.align_down(position) == position
    }

    /// Logged payload bytes; `None` if no longer retained
    fn payload(&self, payload: u64) -> Result<Option<Vec<u8>>>;

    /// Find the nearest change to `query` between `start` and `limit`
    fn lookup(
        &self,
        query: LogQuery,
        start: LogPosition,
        direction: Direction,
        limit: LogPosition,
    ) -> Result<Lookup> {
        match direction {
            Direction::Forward => {
                let limit = limit.min(self.current_position());
                let mut position = start.max(self.start_position());
                while position < limit {
                    let entry = self.read_at(position)?;
                    if query.matches(&entry) {
                        return Ok(Lookup::Found(entry));
                    }
                    position = self.next_position(position);
                }
            }
            Direction::Backward => {
                let mut position = start.min(self.current_position());
                while let Some(prev) = self.prev_position(position) {
                    if prev < limit {
                        break;
                    }
                    let entry = self.read_at(prev)?;
                    if query.matches(&entry) {
                        return Ok(Lookup::Found(entry));
                    }
                    position = prev;
                }
            }
        }
        Ok(Lookup::NotFound)
    }
}

/// Bidirectional cursor over a log
pub struct LogCursor<'a> {
    log: &'a dyn OperationLog,
    position: LogPosition,
}

impl<'a> LogCursor<'a> {
    /// Cursor positioned before the entry at `position`
    pub fn new(log: &'a dyn OperationLog, position: LogPosition) -> Self {
        Self { log, position }
    }

    /// Cursor at the first entry
    pub fn at_start(log: &'a dyn OperationLog) -> Self {
        Self::new(log, log.start_position())
    }

    /// Cursor at the end, for walking backward
    pub fn at_end(log: &'a dyn OperationLog) -> Self {
        Self::new(log, log.current_position())
    }

    pub const fn position(&self) -> LogPosition {
        self.position
    }

    /// Entry at the cursor, advancing past it
    pub fn next_entry(&mut self) -> Result<Option<LogEntry>> {
        if self.position >= self.log.current_position() {
            return Ok(None);
        }
        let entry = self.log.read_at(self.position)?;
        self.position = self.log.next_position(self.position);
        Ok(Some(entry))
    }

    /// Entry before the cursor, moving back onto it
    pub fn prev_entry(&mut self) -> Result<Option<LogEntry>> {
        let Some(prev) = self.log.prev_position(self.position) else {
            return Ok(None);
        };
        let entry = self.log.read_at(prev)?;
        self.position = prev;
        Ok(Some(entry))
    }
}

impl Iterator for LogCursor<'_> {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}
