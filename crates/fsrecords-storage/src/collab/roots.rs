//! Persistent roots table

use super::RootsTable;
use super::snapshot_file::{read_snapshot, write_snapshot};
use fsrecords_common::{FileId, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Roots file inside a storage directory
pub const ROOTS_FILE_NAME: &str = "roots.dat";

/// Root ids and URLs snapshotted to `roots.dat` on every change
pub struct PersistentRoots {
    path: PathBuf,
    roots: RwLock<BTreeMap<FileId, String>>,
}

impl PersistentRoots {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let roots = read_snapshot(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            roots: RwLock::new(roots),
        })
    }
}

impl RootsTable for PersistentRoots {
    fn roots(&self) -> Result<Vec<(FileId, String)>> {
        Ok(self
            .roots
            .read()
            .iter()
            .map(|(id, url)| (*id, url.clone()))
            .collect())
    }

    fn find(&self, url: &str) -> Result<Option<FileId>> {
        Ok(self
            .roots
            .read()
            .iter()
            .find(|(_, u)| u.as_str() == url)
            .map(|(id, _)| *id))
    }

    fn url_of(&self, id: FileId) -> Result<Option<String>> {
        Ok(self.roots.read().get(&id).cloned())
    }

    fn insert(&self, id: FileId, url: &str) -> Result<()> {
        let mut roots = self.roots.write();
        roots.insert(id, url.to_string());
        write_snapshot(&self.path, &*roots)
    }

    fn remove(&self, id: FileId) -> Result<bool> {
        let mut roots = self.roots.write();
        if roots.remove(&id).is_none() {
            return Ok(false);
        }
        write_snapshot(&self.path, &*roots)?;
        Ok(true)
    }

    fn contains(&self, id: FileId) -> bool {
        self.roots.read().contains_key(&id)
    }

    fn flush(&self) -> Result<()> {
        let roots = self.roots.read();
        write_snapshot(&self.path, &*roots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_roots_ordered_and_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(ROOTS_FILE_NAME);
        {
            let roots = PersistentRoots::open(&path).unwrap();
            roots.insert(FileId::new(9), "file:///b").unwrap();
            roots.insert(FileId::new(2), "file:///a").unwrap();
            roots.insert(FileId::new(5), "jar:///c.jar!/").unwrap();
            assert!(roots.remove(FileId::new(5)).unwrap());
            assert!(!roots.remove(FileId::new(5)).unwrap());
        }
        let roots = PersistentRoots::open(&path).unwrap();
        assert_eq!(
            roots.roots().unwrap(),
            vec![
                (FileId::new(2), "file:///a".to_string()),
                (FileId::new(9), "file:///b".to_string())
            ]
        );
        assert_eq!(roots.find("file:///b").unwrap(), Some(FileId::new(9)));
        assert!(roots.contains(FileId::new(2)));
        assert_eq!(roots.url_of(FileId::new(5)).unwrap(), None);
    }
}
