//! Binary layout of records and the header
//!
//! Record format (native byte order, one 4-byte word per cell):
//! ```text
//! +----------+--------+-------+------------+------------+-----------+--------+-------------+---------------+
//! | parentId | nameId | flags | attrRecord | contentRec | timestamp | length | modCountPre | modCountAfter |
//! | 4B       | 4B     | 4B    | 4B         | 4B         | 8B        | 8B     | 4B          | 4B            |
//! +----------+--------+-------+------------+------------+-----------+--------+-------------+---------------+
//! ```
//!
//! Header format (slot 0):
//! ```text
//! +---------+----------------+-----------+------------------+--------------+
//! | version | globalModCount | timestamp | connectionStatus | recordsCount |
//! | 4B      | 4B             | 8B        | 4B               | 4B           |
//! +---------+----------------+-----------+------------------+--------------+
//! ```
//!
//! 64-bit fields are split into two words (low word first) so every cell
//! can be accessed atomically.

use fsrecords_common::{FileId, RecordFlags};

/// Current record table format version
pub const FORMAT_VERSION: i32 = 1;

/// Bytes per word
pub const WORD_SIZE: usize = 4;

/// Words per record slot
pub const RECORD_WORDS: usize = 11;

/// Bytes per record slot
pub const RECORD_SIZE: usize = RECORD_WORDS * WORD_SIZE;

/// Words holding the record body (everything except the mod-counts)
pub const BODY_WORDS: usize = 9;

// Record word offsets
pub const PARENT_ID: usize = 0;
pub const NAME_ID: usize = 1;
pub const FLAGS: usize = 2;
pub const ATTRIBUTE_RECORD_ID: usize = 3;
pub const CONTENT_RECORD_ID: usize = 4;
pub const TIMESTAMP: usize = 5;
pub const LENGTH: usize = 7;
pub const MOD_COUNT_PRE: usize = 9;
pub const MOD_COUNT_AFTER: usize = 10;

// Header word offsets (slot 0)
pub const HEADER_VERSION: usize = 0;
pub const HEADER_GLOBAL_MOD_COUNT: usize = 1;
pub const HEADER_TIMESTAMP: usize = 2;
pub const HEADER_CONNECTION_STATUS: usize = 4;
pub const HEADER_RECORDS_COUNT: usize = 5;

/// Word index of `field` in the slot of `id`
#[inline]
#[must_use]
pub const fn word_index(id: FileId, field: usize) -> usize {
    id.index() * RECORD_WORDS + field
}

#[inline]
#[must_use]
pub const fn split_i64(value: i64) -> (i32, i32) {
    (value as i32, (value >> 32) as i32)
}

#[inline]
#[must_use]
pub const fn join_i64(low: i32, high: i32) -> i64 {
    ((high as i64) << 32) | (low as u32 as i64)
}

/// Whether the last session closed the store properly
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Flushed and closed (also the state of a fresh file)
    SafelyClosed,
    /// Open, or the owning process died without closing it
    Connected,
    /// Someone flagged the contents as untrustworthy
    CorruptionMarked,
    /// Value not produced by this format version
    Unknown(i32),
}

impl ConnectionStatus {
    const SAFELY_CLOSED: i32 = 0;
    const CONNECTED: i32 = 0x0C0F_FEE1;
    const CORRUPTION_MARKED: i32 = 0x0BAD_BEEF;

    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            Self::SAFELY_CLOSED => Self::SafelyClosed,
            Self::CONNECTED => Self::Connected,
            Self::CORRUPTION_MARKED => Self::CorruptionMarked,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub const fn raw(self) -> i32 {
        match self {
            Self::SafelyClosed => Self::SAFELY_CLOSED,
            Self::Connected => Self::CONNECTED,
            Self::CorruptionMarked => Self::CORRUPTION_MARKED,
            Self::Unknown(raw) => raw,
        }
    }
}

/// One file's metadata as stored in its slot (mod-counts excluded)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileRecord {
    /// Containing directory, [`FileId::NONE`] for roots
    pub parent_id: FileId,
    /// Interned name
    pub name_id: i32,
    /// Flag bitset
    pub flags: RecordFlags,
    /// Attribute record, 0 if the file has no attributes
    pub attribute_record_id: i32,
    /// Cached content record, 0 if no content is cached
    pub content_record_id: i32,
    /// Last modification time (ms since epoch)
    pub timestamp: i64,
    /// File length in bytes
    pub length: i64,
}

impl FileRecord {
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.flags.is_deleted()
    }

    #[must_use]
    pub const fn is_directory(&self) -> bool {
        self.flags.is_directory()
    }

    pub(crate) const fn from_words(words: &[i32; BODY_WORDS]) -> Self {
        Self {
            parent_id: FileId::new(words[PARENT_ID]),
            name_id: words[NAME_ID],
            flags: RecordFlags::from_bits(words[FLAGS]),
            attribute_record_id: words[ATTRIBUTE_RECORD_ID],
            content_record_id: words[CONTENT_RECORD_ID],
            timestamp: join_i64(words[TIMESTAMP], words[TIMESTAMP + 1]),
            length: join_i64(words[LENGTH], words[LENGTH + 1]),
        }
    }

    pub(crate) const fn to_words(&self) -> [i32; BODY_WORDS] {
        let (ts_low, ts_high) = split_i64(self.timestamp);
        let (len_low, len_high) = split_i64(self.length);
        [
            self.parent_id.get(),
            self.name_id,
            self.flags.bits(),
            self.attribute_record_id,
            self.content_record_id,
            ts_low,
            ts_high,
            len_low,
            len_high,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_size_matches_layout() {
        assert_eq!(RECORD_SIZE, 44);
        assert_eq!(MOD_COUNT_AFTER + 1, RECORD_WORDS);
        assert_eq!(HEADER_RECORDS_COUNT * WORD_SIZE, 20);
    }

    #[test]
    fn test_i64_split_handles_sign() {
        for value in [0i64, 1, -1, i64::MAX, i64::MIN, 0x1_0000_0000, -0x1_0000_0001] {
            let (low, high) = split_i64(value);
            assert_eq!(join_i64(low, high), value);
        }
    }

    #[test]
    fn test_record_words() {
        let record = FileRecord {
            parent_id: FileId::new(3),
            name_id: 17,
            flags: RecordFlags::IS_DIRECTORY,
            attribute_record_id: 4,
            content_record_id: 9,
            timestamp: 1_700_000_000_000,
            length: -5,
        };
        assert_eq!(FileRecord::from_words(&record.to_words()), record);
    }

    #[test]
    fn test_connection_status_raw() {
        assert_eq!(ConnectionStatus::from_raw(0), ConnectionStatus::SafelyClosed);
        let connected = ConnectionStatus::Connected.raw();
        assert_eq!(ConnectionStatus::from_raw(connected), ConnectionStatus::Connected);
        assert_eq!(ConnectionStatus::from_raw(42), ConnectionStatus::Unknown(42));
    }
}
