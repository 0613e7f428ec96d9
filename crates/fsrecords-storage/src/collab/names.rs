//! Persistent name interning table

use super::NamesEnumerator;
use super::snapshot_file::{read_snapshot, write_snapshot};
use fsrecords_common::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Names file inside a storage directory
pub const NAMES_FILE_NAME: &str = "names.dat";

#[derive(Default, Serialize, Deserialize)]
struct NameTable {
    /// Name with id `n` lives at index `n - 1`
    names: Vec<String>,
    #[serde(skip)]
    ids: HashMap<String, i32>,
}

impl NameTable {
    fn reindex(&mut self) {
        self.ids = self
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i as i32 + 1))
            .collect();
    }
}

/// Name table snapshotted to `names.dat`
pub struct PersistentNames {
    path: PathBuf,
    table: RwLock<NameTable>,
    dirty: AtomicBool,
}

impl PersistentNames {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut table: NameTable = read_snapshot(&path)?.unwrap_or_default();
        table.reindex();
        debug!("loaded {} names from {:?}", table.names.len(), path);
        Ok(Self {
            path,
            table: RwLock::new(table),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn len(&self) -> usize {
        self.table.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NamesEnumerator for PersistentNames {
    fn enumerate(&self, name: &str) -> Result<i32> {
        if let Some(id) = self.table.read().ids.get(name) {
            return Ok(*id);
        }
        let mut table = self.table.write();
        if let Some(id) = table.ids.get(name) {
            return Ok(*id);
        }
        let id = i32::try_from(table.names.len() + 1)
            .map_err(|_| Error::internal("name table is full"))?;
        table.names.push(name.to_string());
        table.ids.insert(name.to_string(), id);
        self.dirty.store(true, Ordering::Release);
        Ok(id)
    }

    fn try_enumerate(&self, name: &str) -> Result<Option<i32>> {
        Ok(self.table.read().ids.get(name).copied())
    }

    fn value_of(&self, id: i32) -> Result<Option<String>> {
        let table = self.table.read();
        Ok(usize::try_from(id - 1)
            .ok()
            .and_then(|index| table.names.get(index))
            .cloned())
    }

    fn entries(&self) -> Result<Vec<(i32, String)>> {
        Ok(self
            .table
            .read()
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| (i as i32 + 1, name.clone()))
            .collect())
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

#[cfg(test)]
mod tests {
    use super::*;
    use fsrecords_common::NULL_NAME_ID;
    use tempfile::tempdir;

    #[test]
    fn test_interning() {
        let dir = tempdir().unwrap();
        let names = PersistentNames::open(dir.path().join(NAMES_FILE_NAME)).unwrap();
        let a = names.enumerate("src").unwrap();
        let b = names.enumerate("main.rs").unwrap();
        assert_ne!(a, NULL_NAME_ID);
        assert_eq!(names.enumerate("src").unwrap(), a);
        assert_eq!(names.try_enumerate("main.rs").unwrap(), Some(b));
        assert_eq!(names.try_enumerate("lib.rs").unwrap(), None);
        assert_eq!(names.value_of(b).unwrap().as_deref(), Some("main.rs"));
        assert_eq!(names.value_of(NULL_NAME_ID).unwrap(), None);
        assert_eq!(names.value_of(99).unwrap(), None);
    }

    #[test]
    fn test_persisted_across_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(NAMES_FILE_NAME);
        {
            let names = PersistentNames::open(&path).unwrap();
            names.enumerate("a").unwrap();
            names.enumerate("b").unwrap();
            names.flush().unwrap();
        }
        let names = PersistentNames::open(&path).unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names.try_enumerate("b").unwrap(), Some(2));
        assert_eq!(
            names.entries().unwrap(),
            vec![(1, "a".to_string()), (2, "b".to_string())]
        );
    }
}
