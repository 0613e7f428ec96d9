//! Point-in-time queries over the live store
//!
//! A query asks for one field of one file as of a log position. The live
//! store only holds the newest values, so an answer is trusted only if the
//! log shows no change to that field between the position and the end of
//! the log. Anything else comes back as [`Property::NotAvailable`].
//!
//! Each property is computed from scratch on every call by the plain
//! functions in [`fields`], taking an explicit [`SnapshotContext`].

pub mod fields;
mod oracle;
mod point;

pub use oracle::{FileSnapshot, Snapshot, SnapshotOracle};
pub use point::PointResolver;

use crate::collab::{AttributeStorage, ContentStorage};
use crate::oplog::OperationLog;
use crate::records::RecordStore;
use fsrecords_common::LogPosition;
use std::fmt;

/// Why a property could not be determined
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotAvailableCause {
    /// The point lies further behind the log end than the search budget
    TooFarToSearch { distance: u64, limit: u64 },
    /// The logged bytes have been released
    NoLongerRetained,
    /// The field was changed by the entry at `position`, after the point
    ChangedSincePoint { position: LogPosition },
    ReadFailed(String),
}

impl fmt::Display for NotAvailableCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFarToSearch { distance, limit } => {
                write!(f, "too far to search ({distance} > {limit} bytes)")
            }
            Self::NoLongerRetained => write!(f, "no longer retained"),
            Self::ChangedSincePoint { position } => {
                write!(f, "changed since point (at {position})")
            }
            Self::ReadFailed(reason) => write!(f, "read failed: {reason}"),
        }
    }
}

/// Value of one field at a point, or why it is unknown
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Property<T> {
    Ready(T),
    NotAvailable(NotAvailableCause),
}

impl<T> Property<T> {
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::NotAvailable(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Property<U> {
        match self {
            Self::Ready(value) => Property::Ready(f(value)),
            Self::NotAvailable(cause) => Property::NotAvailable(cause),
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> Property<U>) -> Property<U> {
        match self {
            Self::Ready(value) => f(value),
            Self::NotAvailable(cause) => Property::NotAvailable(cause),
        }
    }

    pub fn into_result(self) -> std::result::Result<T, NotAvailableCause> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::NotAvailable(cause) => Err(cause),
        }
    }
}

impl<T> From<fsrecords_common::Result<T>> for Property<T> {
    fn from(result: fsrecords_common::Result<T>) -> Self {
        match result {
            Ok(value) => Self::Ready(value),
            Err(e) => Self::NotAvailable(NotAvailableCause::ReadFailed(e.to_string())),
        }
    }
}

/// Everything a property computation reads
#[derive(Clone, Copy)]
pub struct SnapshotContext<'a> {
    pub log: &'a dyn OperationLog,
    pub records: &'a RecordStore,
    pub content: &'a dyn ContentStorage,
    pub attributes: &'a dyn AttributeStorage,
    /// Log position the queries refer to
    pub point: LogPosition,
    /// Largest accepted distance between `point` and the log end
    pub max_distance: u64,
}

impl SnapshotContext<'_> {
    /// Log end as of now; `Err` if the point is out of reach
    pub fn reachable_end(&self) -> std::result::Result<LogPosition, NotAvailableCause> {
        let end = self.log.current_position();
        let distance = end.saturating_sub(self.point);
        if distance > self.max_distance {
            return Err(NotAvailableCause::TooFarToSearch {
                distance,
                limit: self.max_distance,
            });
        }
        Ok(end)
    }
}
