//! Recovery errors

use fsrecords_common::{FileId, LogPosition};
use std::path::PathBuf;
use thiserror::Error;

/// Why a recovery run was aborted
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("source storage {0:?} does not exist")]
    SourceMissing(PathBuf),

    #[error("target directory {0:?} is not empty")]
    TargetNotEmpty(PathBuf),

    #[error("log position {point} cannot be recovered: {reason}")]
    PointUnavailable { point: LogPosition, reason: String },

    #[error("record ids are not contiguous: expected {expected}, allocated {actual}")]
    IdAllocationGap { expected: FileId, actual: FileId },

    #[error("failed to recover root {id}: {source}")]
    Root {
        id: FileId,
        #[source]
        source: fsrecords_common::Error,
    },

    #[error("failed to relink children: {0}")]
    Relink(#[source] fsrecords_common::Error),

    #[error(transparent)]
    Storage(#[from] fsrecords_common::Error),

    #[error("disk I/O error: {0}")]
    Io(#[from] std::io::Error),
}
