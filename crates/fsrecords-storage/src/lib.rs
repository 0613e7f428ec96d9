//! fsrecords Storage - Persistent file-record engine
//!
//! This crate implements the on-disk state of a virtual file system:
//! - Fixed-size file records with lock-free per-record reads and writes
//! - An append-only operation log with bidirectional traversal
//! - Names, content, attributes, roots and children tables
//! - Point-in-time queries answered from the log
//! - Consistency checking with a background scheduler
//! - Recovery of a storage directory as of a log position

pub mod collab;
pub mod health;
pub mod oplog;
pub mod records;
pub mod recovery;
pub mod snapshot;
pub mod vfs;

// Re-exports
pub use collab::{
    AttributeStorage, AttributeTypes, BlobContentStorage, ChildrenTable, ContentStorage,
    NamesEnumerator, PersistentAttributes, PersistentNames, PersistentRoots, RootsTable,
};
pub use health::{
    ActivityMonitor, HealthCheckScheduler, HealthChecker, HealthReport, ManualActivityMonitor,
    PollOutcome, SchedulerHandle,
};
pub use oplog::{FileOperationLog, LogCursor, LogEntry, LogQuery, Operation, OperationLog};
pub use records::{FileRecord, RecordStore, StoreHeader};
pub use recovery::{RecoveryEngine, RecoveryError, RecoveryResult};
pub use snapshot::{
    FileSnapshot, NotAvailableCause, PointResolver, Property, Snapshot, SnapshotOracle,
};
pub use vfs::{NewRecord, VfsStore};
