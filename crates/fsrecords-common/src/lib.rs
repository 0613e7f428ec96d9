//! fsrecords Common - Shared types and utilities
//!
//! This crate provides the identifier and flag types, error definitions,
//! and configuration used across all fsrecords components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
