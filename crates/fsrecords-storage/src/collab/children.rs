//! Per-directory children lists

use super::snapshot_file::{read_snapshot, write_snapshot};
use fsrecords_common::{FileId, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Children file inside a storage directory
pub const CHILDREN_FILE_NAME: &str = "children.dat";

/// Sorted child ids per directory, snapshotted to `children.dat`
pub struct ChildrenTable {
    path: PathBuf,
    children: RwLock<BTreeMap<FileId, Vec<FileId>>>,
    dirty: AtomicBool,
}

impl ChildrenTable {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let children = read_snapshot(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            children: RwLock::new(children),
            dirty: AtomicBool::new(false),
        })
    }

    /// Children of `dir`, ascending
    pub fn children(&self, dir: FileId) -> Vec<FileId> {
        self.children.read().get(&dir).cloned().unwrap_or_default()
    }

    pub fn contains(&self, dir: FileId, child: FileId) -> bool {
        self.children
            .read()
            .get(&dir)
            .is_some_and(|list| list.binary_search(&child).is_ok())
    }

    /// Add `child` under `dir`; false if already listed
    pub fn add_child(&self, dir: FileId, child: FileId) -> bool {
        let mut children = self.children.write();
        let list = children.entry(dir).or_default();
        match list.binary_search(&child) {
            Ok(_) => false,
            Err(at) => {
                list.insert(at, child);
                self.dirty.store(true, Ordering::Release);
                true
            }
        }
    }

    /// Remove `child` from `dir`; false if it was not listed
    pub fn remove_child(&self, dir: FileId, child: FileId) -> bool {
        let mut children = self.children.write();
        let Some(list) = children.get_mut(&dir) else {
            return false;
        };
        let Ok(at) = list.binary_search(&child) else {
            return false;
        };
        list.remove(at);
        if list.is_empty() {
            children.remove(&dir);
        }
        self.dirty.store(true, Ordering::Release);
        true
    }

    /// Replace the whole list of `dir`
    pub fn set_children(&self, dir: FileId, mut list: Vec<FileId>) {
        list.sort_unstable();
        list.dedup();
        let mut children = self.children.write();
        if list.is_empty() {
            children.remove(&dir);
        } else {
            children.insert(dir, list);
        }
        self.dirty.store(true, Ordering::Release);
    }

    /// Directories with a non-empty list
    pub fn directories(&self) -> Vec<FileId> {
        self.children.read().keys().copied().collect()
    }

    pub fn flush(&self) -> Result<()> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            let children = self.children.read();
            if let Err(e) = write_snapshot(&self.path, &*children) {
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
    use tempfile::tempdir;

    fn ids(raw: &[i32]) -> Vec<FileId> {
        raw.iter().copied().map(FileId::new).collect()
    }

    #[test]
    fn test_add_remove_sorted() {
        let dir = tempdir().unwrap();
        let table = ChildrenTable::open(dir.path().join(CHILDREN_FILE_NAME)).unwrap();
        let d = FileId::new(1);
        assert!(table.add_child(d, FileId::new(5)));
        assert!(table.add_child(d, FileId::new(3)));
        assert!(!table.add_child(d, FileId::new(5)));
        assert_eq!(table.children(d), ids(&[3, 5]));
        assert!(table.remove_child(d, FileId::new(3)));
        assert!(!table.remove_child(d, FileId::new(3)));
        assert!(table.contains(d, FileId::new(5)));
        assert!(table.remove_child(d, FileId::new(5)));
        assert!(table.directories().is_empty());
    }

    #[test]
    fn test_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CHILDREN_FILE_NAME);
        {
            let table = ChildrenTable::open(&path).unwrap();
            table.set_children(FileId::new(2), ids(&[9, 4, 4, 7]));
            table.flush().unwrap();
        }
        let table = ChildrenTable::open(&path).unwrap();
        assert_eq!(table.children(FileId::new(2)), ids(&[4, 7, 9]));
    }
}
