//! Storage directory facade
//!
//! `VfsStore` owns the record table, the operation log and the side tables
//! of one storage directory, and is the only writer of all of them. Every
//! mutation is applied and then logged, so the log describes the history of
//! the live state.
//!
//! Structural changes (creating, moving and deleting files) take the
//! structure lock exclusively; the health checker may hold it shared while
//! checking one record.

use crate::collab::{
    ATTRIBUTE_IDS_FILE_NAME, ATTRIBUTES_FILE_NAME, AttributeStorage, AttributeTypes,
    BlobContentStorage, CHILDREN_FILE_NAME, CONTENT_FILE_NAME, ChildrenTable, ContentStorage,
    NAMES_FILE_NAME, NamesEnumerator, PersistentAttributes, PersistentNames, PersistentRoots,
    ROOTS_FILE_NAME, RootsTable, split_versioned, versioned,
};
use crate::oplog::{FileOperationLog, Operation, OperationLog};
use crate::records::{FileRecord, RecordStore};
use fsrecords_common::{Config, Error, FileId, LogPosition, NULL_RECORD_REF, RecordFlags, Result};
use parking_lot::{RwLock, RwLockReadGuard};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Record table file inside a storage directory
pub const RECORDS_FILE_NAME: &str = "records.dat";

/// Values of a new record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NewRecord {
    pub parent_id: FileId,
    pub name_id: i32,
    pub flags: RecordFlags,
    pub length: i64,
    pub timestamp: i64,
}

/// One opened storage directory
pub struct VfsStore {
    dir: PathBuf,
    config: Config,
    records: RecordStore,
    log: FileOperationLog,
    names: PersistentNames,
    attribute_types: AttributeTypes,
    attributes: PersistentAttributes,
    content: BlobContentStorage,
    roots: PersistentRoots,
    children: ChildrenTable,
    structure: RwLock<()>,
}

impl VfsStore {
    /// Open (or create) the storage directory `dir`
    pub fn open(dir: impl AsRef<Path>, config: &Config) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Storage(format!("failed to create {:?}: {}", dir, e)))?;

        let records = RecordStore::open(dir.join(RECORDS_FILE_NAME), &config.storage)?;
        let log = FileOperationLog::open(&dir, &config.oplog)?;
        let store = Self {
            names: PersistentNames::open(dir.join(NAMES_FILE_NAME))?,
            attribute_types: AttributeTypes::open(dir.join(ATTRIBUTE_IDS_FILE_NAME))?,
            attributes: PersistentAttributes::open(dir.join(ATTRIBUTES_FILE_NAME))?,
            content: BlobContentStorage::open(dir.join(CONTENT_FILE_NAME))?,
            roots: PersistentRoots::open(dir.join(ROOTS_FILE_NAME))?,
            children: ChildrenTable::open(dir.join(CHILDREN_FILE_NAME))?,
            dir,
            config: config.clone(),
            records,
            log,
            structure: RwLock::new(()),
        };
        info!(
            "Opened storage {:?}: {} records, {} roots, log at {}",
            store.dir,
            store.records.max_allocated_id(),
            store.roots.roots()?.len(),
            store.log.current_position()
        );
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn records(&self) -> &RecordStore {
        &self.records
    }

    pub const fn log(&self) -> &FileOperationLog {
        &self.log
    }

    pub const fn names(&self) -> &PersistentNames {
        &self.names
    }

    pub const fn attribute_types(&self) -> &AttributeTypes {
        &self.attribute_types
    }

    pub const fn attributes(&self) -> &PersistentAttributes {
        &self.attributes
    }

    pub const fn content(&self) -> &BlobContentStorage {
        &self.content
    }

    pub const fn roots(&self) -> &PersistentRoots {
        &self.roots
    }

    pub const fn children(&self) -> &ChildrenTable {
        &self.children
    }

    /// Shared structure guard, held while checking one file
    pub fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.structure.read()
    }

    pub(crate) const fn structure_lock(&self) -> &RwLock<()> {
        &self.structure
    }

    /// Current end of the operation log
    pub fn log_position(&self) -> LogPosition {
        self.log.current_position()
    }

    /// Append a mutation to the log
    ///
    /// Every mutation is logged before it is applied, so a reader that
    /// observes the new value also finds its entry.
    fn log_op(&self, id: FileId, operation: Operation) -> Result<()> {
        self.records.check_id(id)?;
        self.log.append(id, operation).map(drop)
    }

    /// Allocate a record and fill it with `new`, logging every field
    ///
    /// Does not touch the children table.
    pub(crate) fn allocate_file(&self, new: &NewRecord) -> Result<FileId> {
        let id = self.records.allocate_record()?;
        self.log_op(id, Operation::AllocateRecord)?;
        self.log_op(id, Operation::SetParent(new.parent_id))?;
        self.log_op(id, Operation::SetName(new.name_id))?;
        self.log_op(id, Operation::SetFlags(new.flags))?;
        self.log_op(id, Operation::SetLength(new.length))?;
        self.log_op(id, Operation::SetTimestamp(new.timestamp))?;
        self.records.update(id, |r| {
            r.parent_id = new.parent_id;
            r.name_id = new.name_id;
            r.flags = new.flags;
            r.length = new.length;
            r.timestamp = new.timestamp;
        })?;
        Ok(id)
    }

    /// Register a new root directory
    pub fn create_root(&self, url: &str, name: &str) -> Result<FileId> {
        let _structure = self.structure.write();
        if let Some(existing) = self.roots.find(url)? {
            return Err(Error::invalid_argument(format!(
                "root {url} already exists as {existing}"
            )));
        }
        let id = self.allocate_file(&NewRecord {
            name_id: self.names.enumerate(name)?,
            flags: RecordFlags::IS_DIRECTORY | RecordFlags::CHILDREN_CACHED,
            ..NewRecord::default()
        })?;
        self.roots.insert(id, url)?;
        debug!("created root {} for {}", id, url);
        Ok(id)
    }

    /// Create a file or directory under `parent`
    pub fn create_child(&self, parent: FileId, name: &str, flags: RecordFlags) -> Result<FileId> {
        let _structure = self.structure.write();
        self.check_live_directory(parent)?;
        let mut flags = flags;
        if flags.is_directory() {
            flags = flags | RecordFlags::CHILDREN_CACHED;
        }
        let id = self.allocate_file(&NewRecord {
            parent_id: parent,
            name_id: self.names.enumerate(name)?,
            flags,
            ..NewRecord::default()
        })?;
        self.link_child(parent, id)?;
        Ok(id)
    }

    fn check_live_directory(&self, id: FileId) -> Result<FileRecord> {
        let record = self.records.read_record(id)?;
        if !record.is_directory() || record.is_deleted() {
            return Err(Error::invalid_argument(format!(
                "{id} is not a live directory"
            )));
        }
        Ok(record)
    }

    /// Add `child` to the children list of `dir`
    pub(crate) fn link_child(&self, dir: FileId, child: FileId) -> Result<()> {
        if !self.children.contains(dir, child) {
            self.log_op(dir, Operation::AddChild(child))?;
            self.children.add_child(dir, child);
        }
        Ok(())
    }

    fn unlink_child(&self, dir: FileId, child: FileId) -> Result<()> {
        if self.children.contains(dir, child) {
            self.log_op(dir, Operation::RemoveChild(child))?;
            self.children.remove_child(dir, child);
        }
        Ok(())
    }

    /// Move `id` under `new_parent`
    pub fn move_file(&self, id: FileId, new_parent: FileId) -> Result<()> {
        let _structure = self.structure.write();
        self.check_live_directory(new_parent)?;
        let old_parent = self.records.parent_id(id)?;
        if old_parent.is_none() {
            return Err(Error::invalid_argument(format!("cannot move root {id}")));
        }
        let mut ancestor = new_parent;
        while ancestor.is_valid() {
            if ancestor == id {
                return Err(Error::invalid_argument(format!(
                    "cannot move {id} into its own subtree"
                )));
            }
            ancestor = self.records.parent_id(ancestor)?;
        }
        self.log_op(id, Operation::SetParent(new_parent))?;
        self.records.set_parent_id(id, new_parent)?;
        self.unlink_child(old_parent, id)?;
        self.link_child(new_parent, id)
    }

    /// Mark `id` and everything below it deleted
    pub fn delete(&self, id: FileId) -> Result<()> {
        let _structure = self.structure.write();
        let parent = self.records.parent_id(id)?;
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            let flags = self.records.flags(next)? | RecordFlags::DELETED;
            self.log_op(next, Operation::SetFlags(flags))?;
            self.records.set_flags(next, flags)?;
            if flags.is_directory() {
                pending.extend(self.children.children(next));
            }
        }
        if parent.is_valid() {
            self.unlink_child(parent, id)?;
        } else {
            self.roots.remove(id)?;
        }
        debug!("deleted {}", id);
        Ok(())
    }

    pub fn set_name(&self, id: FileId, name: &str) -> Result<()> {
        let name_id = self.names.enumerate(name)?;
        self.log_op(id, Operation::SetName(name_id))?;
        self.records.set_name_id(id, name_id)
    }

    pub fn set_length(&self, id: FileId, length: i64) -> Result<()> {
        self.log_op(id, Operation::SetLength(length))?;
        self.records.set_length(id, length)
    }

    pub fn set_timestamp(&self, id: FileId, timestamp: i64) -> Result<()> {
        self.log_op(id, Operation::SetTimestamp(timestamp))?;
        self.records.set_timestamp(id, timestamp)
    }

    /// Replace all flags except DELETED, which only [`delete`](Self::delete) sets
    pub fn set_flags(&self, id: FileId, flags: RecordFlags) -> Result<()> {
        let mut flags = flags.without(RecordFlags::DELETED);
        flags.set(RecordFlags::DELETED, self.records.flags(id)?.is_deleted());
        self.log_op(id, Operation::SetFlags(flags))?;
        self.records.set_flags(id, flags)
    }

    /// Name of `id`
    pub fn name_of(&self, id: FileId) -> Result<Option<String>> {
        self.names.value_of(self.records.name_id(id)?)
    }

    /// Store new content for `id`; the length follows the content
    pub fn write_content(&self, id: FileId, data: &[u8]) -> Result<()> {
        let content_id = self.content.store(data)?;
        self.log.append_content(id, content_id, data)?;
        let length = data.len() as i64;
        self.log_op(id, Operation::SetContentRef(content_id))?;
        self.log_op(id, Operation::SetLength(length))?;
        self.records.update(id, |r| {
            r.content_record_id = content_id;
            r.length = length;
            r.flags = r
                .flags
                .without(RecordFlags::MUST_RELOAD_CONTENT | RecordFlags::MUST_RELOAD_LENGTH);
        })?;
        Ok(())
    }

    /// Cached content of `id`, if any
    pub fn read_content(&self, id: FileId) -> Result<Option<Vec<u8>>> {
        match self.records.content_record_id(id)? {
            NULL_RECORD_REF => Ok(None),
            content_id => self.content.read(content_id).map(Some),
        }
    }

    /// Register an attribute type, returning its id
    pub fn register_attribute(&self, name: &str, version: i32) -> Result<i32> {
        self.attribute_types.register(name, version)
    }

    fn attribute_version(&self, attribute_id: i32) -> Result<i32> {
        self.attribute_types
            .version_of(attribute_id)
            .ok_or_else(|| Error::invalid_argument(format!("unknown attribute {attribute_id}")))
    }

    /// Store attribute bytes under the current version of the attribute type
    pub fn write_attribute(&self, id: FileId, attribute_id: i32, data: &[u8]) -> Result<()> {
        let blob = versioned(self.attribute_version(attribute_id)?, data);
        self.write_attribute_blob(id, attribute_id, &blob)
    }

    pub(crate) fn write_attribute_blob(
        &self,
        id: FileId,
        attribute_id: i32,
        blob: &[u8],
    ) -> Result<()> {
        self.log.append_attribute(id, attribute_id, blob)?;
        let record_id = self.attributes.write(id, attribute_id, blob)?;
        if self.records.attribute_record_id(id)? != record_id {
            self.log_op(id, Operation::SetAttributeRef(record_id))?;
            self.records.set_attribute_record_id(id, record_id)?;
        }
        Ok(())
    }

    /// Attribute bytes of `id`; blobs of an older version read as absent
    pub fn read_attribute(&self, id: FileId, attribute_id: i32) -> Result<Option<Vec<u8>>> {
        let Some(blob) = self.attributes.read(id, attribute_id)? else {
            return Ok(None);
        };
        let current = self.attribute_version(attribute_id)?;
        Ok(split_versioned(&blob)
            .filter(|(version, _)| *version == current)
            .map(|(_, data)| data.to_vec()))
    }

    pub fn delete_attribute(&self, id: FileId, attribute_id: i32) -> Result<bool> {
        if self.attributes.read(id, attribute_id)?.is_none() {
            return Ok(false);
        }
        self.log_op(id, Operation::DeleteAttribute { attribute_id })?;
        self.attributes.delete(id, attribute_id)
    }

    /// Children of a directory, ascending
    pub fn list_children(&self, dir: FileId) -> Vec<FileId> {
        self.children.children(dir)
    }

    /// Replace the children list of a directory, logging the difference
    pub(crate) fn set_children(&self, dir: FileId, children: Vec<FileId>) -> Result<()> {
        let old = self.children.children(dir);
        for child in &old {
            if !children.contains(child) {
                self.log_op(dir, Operation::RemoveChild(*child))?;
            }
        }
        for child in &children {
            if !old.contains(child) {
                self.log_op(dir, Operation::AddChild(*child))?;
            }
        }
        self.children.set_children(dir, children);
        Ok(())
    }

    pub fn list_roots(&self) -> Result<Vec<(FileId, String)>> {
        self.roots.roots()
    }

    /// Persist every component
    pub fn flush(&self) -> Result<()> {
        self.log.flush()?;
        self.names.flush()?;
        self.attributes.flush()?;
        self.content.flush()?;
        self.roots.flush()?;
        self.children.flush()?;
        self.records.flush()
    }

    /// Flush and mark the record table safely closed
    pub fn close(&self) -> Result<()> {
        self.flush()?;
        self.records.close()?;
        info!("Closed storage {:?}", self.dir);
        Ok(())
    }
}
