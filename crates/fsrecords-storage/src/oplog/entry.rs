//! Operation-log entries
//!
//! Entry format (little-endian):
//! ```text
//! +-----+---------+-----+-------+--------+
//! | Tag | File ID | Aux | Value | CRC32C |
//! | 4B  | 4B      | 4B  | 8B    | 4B     |
//! +-----+---------+-----+-------+--------+
//! ```

use fsrecords_common::{Error, FileId, LogPosition, RecordFlags, Result};

/// Encoded entry size
pub const ENTRY_SIZE: usize = 24;

/// Offset of a payload in the payload file; `None` if the bytes were not logged
pub type PayloadRef = Option<u64>;

const NO_PAYLOAD: i64 = -1;

/// One logged field mutation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    AllocateRecord,
    SetName(i32),
    SetParent(FileId),
    SetLength(i64),
    SetTimestamp(i64),
    SetFlags(RecordFlags),
    SetContentRef(i32),
    SetAttributeRef(i32),
    /// New content bytes stored under `content_id`
    WriteContent { content_id: i32, payload: PayloadRef },
    WriteAttribute { attribute_id: i32, payload: PayloadRef },
    DeleteAttribute { attribute_id: i32 },
    AddChild(FileId),
    RemoveChild(FileId),
}

impl Operation {
    const fn tag(&self) -> u32 {
        match self {
            Self::AllocateRecord => 1,
            Self::SetName(_) => 2,
            Self::SetParent(_) => 3,
            Self::SetLength(_) => 4,
            Self::SetTimestamp(_) => 5,
            Self::SetFlags(_) => 6,
            Self::SetContentRef(_) => 7,
            Self::SetAttributeRef(_) => 8,
            Self::WriteContent { .. } => 9,
            Self::WriteAttribute { .. } => 10,
            Self::DeleteAttribute { .. } => 11,
            Self::AddChild(_) => 12,
            Self::RemoveChild(_) => 13,
        }
    }

    /// `(aux, value)` words of the encoded entry
    fn operands(&self) -> (i32, i64) {
        let payload = |p: &PayloadRef| p.map_or(NO_PAYLOAD, |offset| offset as i64);
        match self {
            Self::AllocateRecord => (0, 0),
            Self::SetName(id) | Self::SetContentRef(id) | Self::SetAttributeRef(id) => {
                (0, i64::from(*id))
            }
            Self::SetParent(id) | Self::AddChild(id) | Self::RemoveChild(id) => {
                (0, i64::from(id.get()))
            }
            Self::SetLength(v) | Self::SetTimestamp(v) => (0, *v),
            Self::SetFlags(flags) => (0, i64::from(flags.bits())),
            Self::WriteContent {
                content_id,
                payload: p,
            } => (*content_id, payload(p)),
            Self::WriteAttribute {
                attribute_id,
                payload: p,
            } => (*attribute_id, payload(p)),
            Self::DeleteAttribute { attribute_id } => (*attribute_id, 0),
        }
    }

    fn decode(tag: u32, aux: i32, value: i64) -> Option<Self> {
        let payload = if value < 0 { None } else { Some(value as u64) };
        let id32 = i32::try_from(value).ok();
        let op = match tag {
            1 => Self::AllocateRecord,
            2 => Self::SetName(id32?),
            3 => Self::SetParent(FileId::new(id32?)),
            4 => Self::SetLength(value),
            5 => Self::SetTimestamp(value),
            6 => Self::SetFlags(RecordFlags::from_bits(id32?)),
            7 => Self::SetContentRef(id32?),
            8 => Self::SetAttributeRef(id32?),
            9 => Self::WriteContent {
                content_id: aux,
                payload,
            },
            10 => Self::WriteAttribute {
                attribute_id: aux,
                payload,
            },
            11 => Self::DeleteAttribute { attribute_id: aux },
            12 => Self::AddChild(FileId::new(id32?)),
            13 => Self::RemoveChild(FileId::new(id32?)),
            _ => return None,
        };
        Some(op)
    }
}

/// Entry as read back from the log
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub position: LogPosition,
    pub file_id: FileId,
    pub operation: Operation,
}

/// Encode an entry for `file_id`
pub(crate) fn encode(file_id: FileId, operation: &Operation) -> [u8; ENTRY_SIZE] {
    let (aux, value) = operation.operands();
    let mut buf = [0u8; ENTRY_SIZE];
    buf[0..4].copy_from_slice(&operation.tag().to_le_bytes());
    buf[4..8].copy_from_slice(&file_id.get().to_le_bytes());
    buf[8..12].copy_from_slice(&aux.to_le_bytes());
    buf[12..20].copy_from_slice(&value.to_le_bytes());
    let crc = crc32c::crc32c(&buf[..20]);
    buf[20..24].copy_from_slice(&crc.to_le_bytes());
    buf
}

/// Decode the entry stored at `position`
pub(crate) fn decode(position: LogPosition, buf: &[u8; ENTRY_SIZE]) -> Result<LogEntry> {
    let word = |at: usize| [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]];

    let stored = u32::from_le_bytes(word(20));
    let computed = crc32c::crc32c(&buf[..20]);
    if stored != computed {
        return Err(Error::ChecksumMismatch {
            expected: stored,
            actual: computed,
        });
    }

    let tag = u32::from_le_bytes(word(0));
    let file_id = FileId::new(i32::from_le_bytes(word(4)));
    let aux = i32::from_le_bytes(word(8));
    let mut value = [0u8; 8];
    value.copy_from_slice(&buf[12..20]);
    let value = i64::from_le_bytes(value);

    let operation = Operation::decode(tag, aux, value).ok_or_else(|| {
        Error::corruption(format!("unknown log entry (tag {tag}) at position {position}"))
    })?;
    Ok(LogEntry {
        position,
        file_id,
        operation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_encoding() {
        let ops = [
            Operation::AllocateRecord,
            Operation::SetParent(FileId::new(7)),
            Operation::SetLength(-5),
            Operation::SetFlags(RecordFlags::IS_DIRECTORY | RecordFlags::DELETED),
            Operation::WriteContent {
                content_id: 3,
                payload: Some(1 << 33),
            },
            Operation::WriteAttribute {
                attribute_id: 2,
                payload: None,
            },
            Operation::RemoveChild(FileId::new(12)),
        ];
        for op in ops {
            let buf = encode(FileId::new(42), &op);
            let entry = decode(100, &buf).unwrap();
            assert_eq!(entry.operation, op);
            assert_eq!(entry.file_id, FileId::new(42));
            assert_eq!(entry.position, 100);
        }
    }

    #[test]
    fn test_corrupted_entry_rejected() {
        let mut buf = encode(FileId::new(1), &Operation::SetName(9));
        buf[13] ^= 0xFF;
        assert!(matches!(
            decode(16, &buf),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0..4].copy_from_slice(&99u32.to_le_bytes());
        let crc = crc32c::crc32c(&buf[..20]);
        buf[20..24].copy_from_slice(&crc.to_le_bytes());
        assert!(decode(16, &buf).unwrap_err().is_corruption());
    }
}
