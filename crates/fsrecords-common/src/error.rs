//! Error types for fsrecords
//!
//! This module defines the common error types used throughout the system.

use crate::types::{FileId, LogPosition};
use thiserror::Error;

/// Common result type for fsrecords operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for fsrecords
#[derive(Debug, Error)]
pub enum Error {
    // Storage errors
    #[error("disk I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("data corruption detected: {0}")]
    DataCorruption(String),

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error(
        "record store is corrupted: {count} record(s) with unsettled mod-counts, first at id {first_id}"
    )]
    CorruptedRecords { count: usize, first_id: FileId },

    #[error("unsupported format version: found {found}, expected {expected}")]
    UnsupportedVersion { found: i32, expected: i32 },

    // Record errors
    #[error("file id {id} is out of range (max allocated: {max})")]
    FileIdOutOfRange { id: FileId, max: FileId },

    #[error("content record not found: {0}")]
    ContentNotFound(i32),

    #[error("attribute record not found: {0}")]
    AttributeNotFound(i32),

    // Log errors
    #[error("invalid log position {position}: {reason}")]
    InvalidLogPosition { position: LogPosition, reason: String },

    // General errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a data corruption error
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::DataCorruption(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error means persistent state can no longer be trusted
    ///
    /// Callers are expected to schedule a full rebuild on these.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::DataCorruption(_)
                | Self::ChecksumMismatch { .. }
                | Self::CorruptedRecords { .. }
                | Self::UnsupportedVersion { .. }
        )
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::FileIdOutOfRange { .. }
                | Self::ContentNotFound(_)
                | Self::AttributeNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_corruption() {
        assert!(
            Error::CorruptedRecords {
                count: 1,
                first_id: FileId::new(5)
            }
            .is_corruption()
        );
        assert!(Error::corruption("bad crc").is_corruption());
        assert!(!Error::storage("disk full").is_corruption());
    }

    #[test]
    fn test_error_not_found() {
        assert!(Error::ContentNotFound(3).is_not_found());
        assert!(
            Error::FileIdOutOfRange {
                id: FileId::new(10),
                max: FileId::new(4)
            }
            .is_not_found()
        );
        assert!(!Error::internal("x").is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = Error::CorruptedRecords {
            count: 2,
            first_id: FileId::new(5),
        };
        let msg = err.to_string();
        assert!(msg.contains("2 record(s)"));
        assert!(msg.contains("id 5"));
    }
}
