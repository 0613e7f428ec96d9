//! Whole-table snapshot files
//!
//! ```text
//! +----------+------------+-------------+---------------+
//! | Magic 4B | Version 4B | CRC32C 4B   | bincode data  |
//! +----------+------------+-------------+---------------+
//! ```
//!
//! Written to a temporary file and renamed into place, so a crash leaves
//! either the previous or the new table.

use fsrecords_common::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

const SNAPSHOT_MAGIC: u32 = 0x4653_5442; // "FSTB"
const SNAPSHOT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 12;

/// Serialize `value` to `path` atomically
pub(crate) fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = bincode::serialize(value)
        .map_err(|e| Error::Serialization(format!("failed to serialize {:?}: {}", path, e)))?;

    let temp_path = path.with_extension("tmp");
    {
        let file = File::create(&temp_path)
            .map_err(|e| Error::Storage(format!("failed to create {:?}: {}", temp_path, e)))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&SNAPSHOT_MAGIC.to_le_bytes())?;
        writer.write_all(&SNAPSHOT_VERSION.to_le_bytes())?;
        writer.write_all(&crc32c::crc32c(&data).to_le_bytes())?;
        writer.write_all(&data)?;
        writer.flush()?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| Error::Storage(format!("failed to sync {:?}: {}", temp_path, e)))?;
    }

    fs::rename(&temp_path, path)
        .map_err(|e| Error::Storage(format!("failed to rename snapshot: {}", e)))?;
    Ok(())
}

/// Load a table written by [`write_snapshot`]; `None` if the file is absent
pub(crate) fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::Storage(format!("failed to open {:?}: {}", path, e)));
        }
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    if buf.len() < HEADER_SIZE {
        return Err(Error::corruption(format!("{:?} is truncated", path)));
    }

    let word = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
    if word(0) != SNAPSHOT_MAGIC {
        return Err(Error::corruption(format!("{:?} has an invalid magic", path)));
    }
    if word(4) != SNAPSHOT_VERSION {
        return Err(Error::UnsupportedVersion {
            found: word(4) as i32,
            expected: SNAPSHOT_VERSION as i32,
        });
    }
    let stored = word(8);
    let data = &buf[HEADER_SIZE..];
    let computed = crc32c::crc32c(data);
    if stored != computed {
        return Err(Error::ChecksumMismatch {
            expected: stored,
            actual: computed,
        });
    }

    bincode::deserialize(data)
        .map(Some)
        .map_err(|e| Error::Serialization(format!("failed to deserialize {:?}: {}", path, e)))
}
