//! Core type definitions for fsrecords
//!
//! Identifiers and the record flag bitset shared by the record store,
//! the operation log, and everything built on top of them.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Sentinel for "no interned name"
pub const NULL_NAME_ID: i32 = 0;

/// Sentinel for "no content record" / "no attribute record"
pub const NULL_RECORD_REF: i32 = 0;

/// Position inside the operation log (byte offset of an entry)
pub type LogPosition = u64;

/// Stable identifier of one file/directory record
///
/// Valid ids start at 1; 0 doubles as "no parent" in the parent field.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[display("{_0}")]
pub struct FileId(i32);

impl FileId {
    /// No file (parent of a root)
    pub const NONE: Self = Self(0);
    /// First id ever handed out by a record store
    pub const FIRST: Self = Self(1);

    /// Wrap a raw id
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw id value
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }

    /// True for the "no file" sentinel
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// True if this can name an allocated record
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= Self::FIRST.0
    }

    /// The id following this one
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Slot index of the record in a record table
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

/// Bitset stored in the `flags` field of a file record
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordFlags(i32);

impl RecordFlags {
    pub const NONE: Self = Self(0);
    pub const CHILDREN_CACHED: Self = Self(0x01);
    pub const IS_DIRECTORY: Self = Self(0x02);
    pub const IS_READ_ONLY: Self = Self(0x04);
    pub const MUST_RELOAD_CONTENT: Self = Self(0x08);
    pub const IS_SYMLINK: Self = Self(0x10);
    pub const IS_SPECIAL: Self = Self(0x20);
    pub const IS_HIDDEN: Self = Self(0x40);
    pub const MUST_RELOAD_LENGTH: Self = Self(0x80);
    pub const CHILDREN_CASE_SENSITIVE: Self = Self(0x100);
    pub const CHILDREN_CASE_SENSITIVITY_CACHED: Self = Self(0x200);
    pub const DELETED: Self = Self(0x400);

    /// Union of every bit a record may legitimately carry
    pub const VALID_MASK: Self = Self(0x7FF);

    const NAMES: [(Self, &'static str); 11] = [
        (Self::CHILDREN_CACHED, "CHILDREN_CACHED"),
        (Self::IS_DIRECTORY, "IS_DIRECTORY"),
        (Self::IS_READ_ONLY, "IS_READ_ONLY"),
        (Self::MUST_RELOAD_CONTENT, "MUST_RELOAD_CONTENT"),
        (Self::IS_SYMLINK, "IS_SYMLINK"),
        (Self::IS_SPECIAL, "IS_SPECIAL"),
        (Self::IS_HIDDEN, "IS_HIDDEN"),
        (Self::MUST_RELOAD_LENGTH, "MUST_RELOAD_LENGTH"),
        (Self::CHILDREN_CASE_SENSITIVE, "CHILDREN_CASE_SENSITIVE"),
        (Self::CHILDREN_CASE_SENSITIVITY_CACHED, "CHILDREN_CASE_SENSITIVITY_CACHED"),
        (Self::DELETED, "DELETED"),
    ];

    /// Wrap raw bits without validation
    #[must_use]
    pub const fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    /// Raw bits
    #[must_use]
    pub const fn bits(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn set(&mut self, other: Self, value: bool) {
        *self = if value { self.with(other) } else { self.without(other) };
    }

    #[must_use]
    pub const fn is_directory(self) -> bool {
        self.contains(Self::IS_DIRECTORY)
    }

    #[must_use]
    pub const fn is_deleted(self) -> bool {
        self.contains(Self::DELETED)
    }

    /// Bits outside [`Self::VALID_MASK`]
    #[must_use]
    pub const fn unknown_bits(self) -> i32 {
        self.0 & !Self::VALID_MASK.0
    }
}

impl BitOr for RecordFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl BitOrAssign for RecordFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.with(rhs);
    }
}

impl BitAnd for RecordFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for RecordFlags {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Debug for RecordFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if self.unknown_bits() != 0 {
            write!(f, "RecordFlags({} | unknown {:#x})", names.join(" | "), self.unknown_bits())
        } else {
            write!(f, "RecordFlags({})", names.join(" | "))
        }
    }
}

impl fmt::Display for RecordFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
