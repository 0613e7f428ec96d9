//! Configuration types for fsrecords
//!
//! This module defines configuration structures used across components.
//! Every section has a `Default`, so a config file only needs to name the
//! values it overrides.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for fsrecords
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Record store configuration
    pub storage: StorageConfig,
    /// Operation log configuration
    pub oplog: OpLogConfig,
    /// Point-in-time query configuration
    pub snapshot: SnapshotConfig,
    /// Background health check configuration
    pub health: HealthCheckConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        if self.snapshot.max_search_distance == 0 {
            return Err(Error::Configuration(
                "snapshot.max_search_distance must be positive".into(),
            ));
        }
        if self.health.period_secs == 0 {
            return Err(Error::Configuration("health.period_secs must be positive".into()));
        }
        Ok(())
    }
}

/// Backing storage for the record table
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    /// Memory-mapped file, chunked mappings
    #[default]
    MemoryMapped,
    /// Plain file read through a page cache with one lock per page
    Paged,
    /// Heap only, nothing persisted
    InMemory,
}

/// Record store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Which storage variant backs the record table
    pub kind: StorageKind,
    /// Records per mapped chunk / cached page (must be a multiple of 1024)
    pub records_per_chunk: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::MemoryMapped,
            records_per_chunk: 64 * 1024,
        }
    }
}

impl StorageConfig {
    /// Chunks must map whole OS pages, which a 44-byte record only does
    /// in groups of 1024.
    pub const CHUNK_GRANULARITY: usize = 1024;

    /// Validate the storage section
    pub fn validate(&self) -> Result<()> {
        if self.records_per_chunk == 0 || self.records_per_chunk % Self::CHUNK_GRANULARITY != 0 {
            return Err(Error::Configuration(format!(
                "storage.records_per_chunk must be a positive multiple of {}, got {}",
                Self::CHUNK_GRANULARITY,
                self.records_per_chunk
            )));
        }
        Ok(())
    }
}

/// Operation log configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OpLogConfig {
    /// Fsync after every append
    pub sync_on_write: bool,
    /// Payloads (content/attribute bytes) larger than this are not logged
    pub max_logged_payload_bytes: usize,
    /// Read buffer used when scanning the log on open
    pub scan_buffer_size: usize,
}

impl Default for OpLogConfig {
    fn default() -> Self {
        Self {
            sync_on_write: false,
            max_logged_payload_bytes: 1024 * 1024, // 1MB
            scan_buffer_size: 64 * 1024,           // 64KB
        }
    }
}

/// Point-in-time query configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Queries further than this many log bytes behind the end are refused
    pub max_search_distance: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_search_distance: 8 * 1024 * 1024, // 8MB
        }
    }
}

/// Health check configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Run checks in the background at all
    pub enabled: bool,
    /// Delay before the first run after startup
    pub initial_delay_secs: u64,
    /// Interval between runs
    pub period_secs: u64,
    /// The user must have been idle this long before a run starts
    pub idle_debounce_secs: u64,
    /// Defer runs while on battery power
    pub skip_on_battery: bool,
    /// Also look for records missing from their parent's children cache
    pub check_orphans: bool,
    /// Hold the store's read guard while checking each record
    pub read_lock_per_file: bool,
    /// Identical messages logged at most this many times per run
    pub max_repeated_messages: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_secs: 10 * 60,
            period_secs: 12 * 60 * 60,
            idle_debounce_secs: 60,
            skip_on_battery: true,
            check_orphans: false,
            read_lock_per_file: true,
            max_repeated_messages: 16,
        }
    }
}

impl HealthCheckConfig {
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    #[must_use]
    pub const fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    #[must_use]
    pub const fn idle_debounce(&self) -> Duration {
        Duration::from_secs(self.idle_debounce_secs)
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
