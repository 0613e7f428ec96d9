//! Fixed-size file record table
//!
//! Records are 44-byte slots in one table; slot 0 holds the store header,
//! so the first record id is 1.
//!
//! ```text
//! +----------+----------+----------+----------+-----
//! | Header   | Record 1 | Record 2 | Record 3 | ...
//! | slot 0   | 44B      | 44B      | 44B      |
//! +----------+----------+----------+----------+-----
//! ```
//!
//! # Concurrency
//! Every record carries a `(modCountPre, modCountAfter)` pair. Writers claim
//! a record by CAS-ing `modCountPre` forward, write the body, then publish by
//! setting `modCountAfter` to the same value. Readers retry any read that
//! overlapped a write. No lock is held across a record read or write, so
//! threads working on different records never wait for each other.
//!
//! The header is a separate, coarse reader/writer-locked area.
//!
//! # Storage kinds
//! The table lives in a [`RecordRegion`], chosen at open time from
//! [`StorageKind`](fsrecords_common::config::StorageKind):
//! - memory-mapped file (default)
//! - paged file with per-page locks
//! - in-memory

mod layout;
mod memory;
mod mmap;
mod paged;
mod region;
mod store;

pub use layout::{ConnectionStatus, FORMAT_VERSION, FileRecord, RECORD_SIZE, RECORD_WORDS};
pub use memory::MemoryRegion;
pub use mmap::MmapRegion;
pub use paged::PagedRegion;
pub use region::{RecordRegion, open_region};
pub use store::{RecordStore, StoreHeader};
