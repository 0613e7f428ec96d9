//! Attribute type registry and per-file attribute blobs
//!
//! Every blob starts with the 4-byte little-endian version of its attribute
//! type, so readers can drop blobs written under an older layout.

use super::AttributeStorage;
use super::snapshot_file::{read_snapshot, write_snapshot};
use fsrecords_common::{Error, FileId, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Attribute type registry file inside a storage directory
pub const ATTRIBUTE_IDS_FILE_NAME: &str = "attribute-ids.dat";

/// Attribute blob file inside a storage directory
pub const ATTRIBUTES_FILE_NAME: &str = "attributes.dat";

/// Prefix `data` with its attribute type version
pub fn versioned(version: i32, data: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(4 + data.len());
    blob.extend_from_slice(&version.to_le_bytes());
    blob.extend_from_slice(data);
    blob
}

/// Split a blob into its version and data
pub fn split_versioned(blob: &[u8]) -> Option<(i32, &[u8])> {
    let (version, data) = blob.split_first_chunk::<4>()?;
    Some((i32::from_le_bytes(*version), data))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct AttributeType {
    name: String,
    version: i32,
}

/// Registry of attribute types: name to id, plus the current version
pub struct AttributeTypes {
    path: PathBuf,
    /// Type with id `n` lives at index `n - 1`
    types: RwLock<Vec<AttributeType>>,
}

impl AttributeTypes {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let types: Vec<AttributeType> = read_snapshot(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            types: RwLock::new(types),
        })
    }

    /// Id of attribute `name`, registering it (or bumping its version)
    pub fn register(&self, name: &str, version: i32) -> Result<i32> {
        let mut types = self.types.write();
        if let Some(index) = types.iter().position(|t| t.name == name) {
            if types[index].version != version {
                debug!(
                    "attribute {} version {} -> {}",
                    name, types[index].version, version
                );
                types[index].version = version;
                write_snapshot(&self.path, &*types)?;
            }
            return Ok(index as i32 + 1);
        }
        types.push(AttributeType {
            name: name.to_string(),
            version,
        });
        write_snapshot(&self.path, &*types)?;
        i32::try_from(types.len()).map_err(|_| Error::internal("attribute registry is full"))
    }

    pub fn id_of(&self, name: &str) -> Option<i32> {
        self.types
            .read()
            .iter()
            .position(|t| t.name == name)
            .map(|index| index as i32 + 1)
    }

    fn get(&self, id: i32) -> Option<AttributeType> {
        let index = usize::try_from(id - 1).ok()?;
        self.types.read().get(index).cloned()
    }

    pub fn name_of(&self, id: i32) -> Option<String> {
        self.get(id).map(|t| t.name)
    }

    /// Current version of attribute `id`
    pub fn version_of(&self, id: i32) -> Option<i32> {
        self.get(id).map(|t| t.version)
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
struct AttributeRecord {
    owner: FileId,
    blobs: BTreeMap<i32, Vec<u8>>,
}

#[derive(Default, Serialize, Deserialize)]
struct AttributeTable {
    /// Record with id `n` lives at index `n - 1`
    records: Vec<AttributeRecord>,
    #[serde(skip)]
    by_owner: HashMap<FileId, i32>,
}

impl AttributeTable {
    fn reindex(&mut self) {
        self.by_owner = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.owner, i as i32 + 1))
            .collect();
    }

    fn record_of(&self, file_id: FileId) -> Option<&AttributeRecord> {
        let id = *self.by_owner.get(&file_id)?;
        self.records.get(id as usize - 1)
    }
}

/// Attribute blobs snapshotted to `attributes.dat`
pub struct PersistentAttributes {
    path: PathBuf,
    table: RwLock<AttributeTable>,
    dirty: AtomicBool,
}

impl PersistentAttributes {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut table: AttributeTable = read_snapshot(&path)?.unwrap_or_default();
        table.reindex();
        Ok(Self {
            path,
            table: RwLock::new(table),
            dirty: AtomicBool::new(false),
        })
    }

    /// Attribute record id of a file, if it has one
    pub fn record_id(&self, file_id: FileId) -> Option<i32> {
        self.table.read().by_owner.get(&file_id).copied()
    }
}

impl AttributeStorage for PersistentAttributes {
    fn read(&self, file_id: FileId, attribute_id: i32) -> Result<Option<Vec<u8>>> {
        let table = self.table.read();
        Ok(table
            .record_of(file_id)
            .and_then(|r| r.blobs.get(&attribute_id))
            .cloned())
    }

    fn write(&self, file_id: FileId, attribute_id: i32, blob: &[u8]) -> Result<i32> {
        let mut table = self.table.write();
        let record_id = match table.by_owner.get(&file_id) {
            Some(id) => *id,
            None => {
                table.records.push(AttributeRecord {
                    owner: file_id,
                    blobs: BTreeMap::new(),
                });
                let id = i32::try_from(table.records.len())
                    .map_err(|_| Error::internal("attribute table is full"))?;
                table.by_owner.insert(file_id, id);
                id
            }
        };
        table.records[record_id as usize - 1]
            .blobs
            .insert(attribute_id, blob.to_vec());
        self.dirty.store(true, Ordering::Release);
        Ok(record_id)
    }

    fn delete(&self, file_id: FileId, attribute_id: i32) -> Result<bool> {
        let mut table = self.table.write();
        let Some(record_id) = table.by_owner.get(&file_id).copied() else {
            return Ok(false);
        };
        let removed = table.records[record_id as usize - 1]
            .blobs
            .remove(&attribute_id)
            .is_some();
        if removed {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(removed)
    }

    fn attribute_ids(&self, file_id: FileId) -> Result<Vec<i32>> {
        let table = self.table.read();
        Ok(table
            .record_of(file_id)
            .map(|r| r.blobs.keys().copied().collect())
            .unwrap_or_default())
    }

    fn check_record(&self, record_id: i32, owner: FileId) -> Result<()> {
        let table = self.table.read();
        let record = usize::try_from(record_id - 1)
            .ok()
            .and_then(|index| table.records.get(index))
            .ok_or(Error::AttributeNotFound(record_id))?;
        if record.owner != owner {
            return Err(Error::corruption(format!(
                "attribute record {} belongs to {}, not {}",
                record_id, record.owner, owner
            )));
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            let table = self.table.read();
            if let Err(e) = write_snapshot(&self.path, &*table) {
                self.dirty.store(true, Ordering::Release);
                return Err(e);
            }
        }
        Ok(())
    }
}
