//! Stores that live beside the record table
//!
//! Records reference these by id: names by `name_id`, content by
//! `content_record_id`, attributes by `attribute_record_id`. The checker and
//! the snapshot oracle consume them through the traits defined here; the
//! concrete types persist into the storage directory.

mod attributes;
mod children;
mod content;
mod names;
mod roots;
mod snapshot_file;

pub use attributes::{
    ATTRIBUTE_IDS_FILE_NAME, ATTRIBUTES_FILE_NAME, AttributeTypes, PersistentAttributes,
    split_versioned, versioned,
};
pub use children::{CHILDREN_FILE_NAME, ChildrenTable};
pub use content::{BlobContentStorage, CONTENT_FILE_NAME};
pub use names::{NAMES_FILE_NAME, PersistentNames};
pub use roots::{PersistentRoots, ROOTS_FILE_NAME};

use fsrecords_common::{FileId, Result};

/// Bidirectional string interning
///
/// Id [`NULL_NAME_ID`](fsrecords_common::NULL_NAME_ID) never names a string.
pub trait NamesEnumerator: Send + Sync {
    /// Id of `name`, interning it if new
    fn enumerate(&self, name: &str) -> Result<i32>;

    /// Id of `name` if already interned
    fn try_enumerate(&self, name: &str) -> Result<Option<i32>>;

    /// String interned under `id`
    fn value_of(&self, id: i32) -> Result<Option<String>>;

    /// Every `(id, name)` pair
    fn entries(&self) -> Result<Vec<(i32, String)>>;

    fn flush(&self) -> Result<()>;
}

/// Blob store keyed by content record id
pub trait ContentStorage: Send + Sync {
    /// Store a new immutable blob, returning its id
    fn store(&self, data: &[u8]) -> Result<i32>;

    fn read(&self, content_id: i32) -> Result<Vec<u8>>;

    /// Verify the record exists and its bytes are intact
    fn check_record(&self, content_id: i32) -> Result<()>;

    /// Highest content id; ids run from 1
    fn records_count(&self) -> i32;

    fn flush(&self) -> Result<()>;
}

/// Versioned attribute blobs per `(file, attribute)`
///
/// All attributes of one file share an attribute record whose id is kept
/// in the file's `attribute_record_id`.
pub trait AttributeStorage: Send + Sync {
    fn read(&self, file_id: FileId, attribute_id: i32) -> Result<Option<Vec<u8>>>;

    /// Store a blob, returning the file's attribute record id
    fn write(&self, file_id: FileId, attribute_id: i32, blob: &[u8]) -> Result<i32>;

    /// Remove a blob; true if it existed
    fn delete(&self, file_id: FileId, attribute_id: i32) -> Result<bool>;

    /// Attribute ids stored for a file
    fn attribute_ids(&self, file_id: FileId) -> Result<Vec<i32>>;

    /// Verify `record_id` exists and belongs to `owner`
    fn check_record(&self, record_id: i32, owner: FileId) -> Result<()>;

    fn flush(&self) -> Result<()>;
}

/// Ordered set of root file ids with their URLs
pub trait RootsTable: Send + Sync {
    /// Roots ordered by id
    fn roots(&self) -> Result<Vec<(FileId, String)>>;

    fn find(&self, url: &str) -> Result<Option<FileId>>;

    fn url_of(&self, id: FileId) -> Result<Option<String>>;

    fn insert(&self, id: FileId, url: &str) -> Result<()>;

    /// True if `id` was a root
    fn remove(&self, id: FileId) -> Result<bool>;

    fn contains(&self, id: FileId) -> bool;

    fn flush(&self) -> Result<()>;
}
