//! Full consistency check

use super::report::{ContentReport, HealthReport, NamesReport, RecordsReport, RootsReport};
use super::throttle::MessageThrottle;
use crate::collab::{AttributeStorage, ChildrenTable, ContentStorage, NamesEnumerator, RootsTable};
use crate::records::RecordStore;
use crate::vfs::VfsStore;
use fsrecords_common::config::HealthCheckConfig;
use fsrecords_common::{FileId, NULL_NAME_ID, NULL_RECORD_REF, RecordFlags, Result};
use parking_lot::RwLock;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Walks a store and counts every inconsistency it finds
pub struct HealthChecker<'a> {
    records: &'a RecordStore,
    names: &'a dyn NamesEnumerator,
    content: &'a dyn ContentStorage,
    attributes: &'a dyn AttributeStorage,
    roots: &'a dyn RootsTable,
    children: &'a ChildrenTable,
    structure: Option<&'a RwLock<()>>,
    config: HealthCheckConfig,
}

impl<'a> HealthChecker<'a> {
    pub fn new(
        records: &'a RecordStore,
        names: &'a dyn NamesEnumerator,
        content: &'a dyn ContentStorage,
        attributes: &'a dyn AttributeStorage,
        roots: &'a dyn RootsTable,
        children: &'a ChildrenTable,
        config: HealthCheckConfig,
    ) -> Self {
        Self {
            records,
            names,
            content,
            attributes,
            roots,
            children,
            structure: None,
            config,
        }
    }

    /// Checker over an opened storage directory, guarding each record with
    /// the store's structure lock when configured to
    pub fn for_store(store: &'a VfsStore, config: HealthCheckConfig) -> Self {
        let mut checker = Self::new(
            store.records(),
            store.names(),
            store.content(),
            store.attributes(),
            store.roots(),
            store.children(),
            config,
        );
        checker.structure = Some(store.structure_lock());
        checker
    }

    /// Run every check
    pub fn check_health(&self) -> HealthReport {
        let started = Instant::now();
        let mut throttle = MessageThrottle::new(self.config.max_repeated_messages);
        let mut report = HealthReport {
            records: self.check_records(&mut throttle),
            roots: self.check_roots(&mut throttle),
            names: self.check_names(&mut throttle),
            content: self.check_content(&mut throttle),
            elapsed_ms: 0,
        };
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        if report.is_healthy() {
            info!(
                "Health check passed: {} records in {} ms",
                report.records.file_records_checked, report.elapsed_ms
            );
        } else {
            warn!(
                "Health check found {} problem(s) in {} records",
                report.error_count(),
                report.records.file_records_checked
            );
        }
        report
    }

    /// Per-record checks for every allocated id
    pub(crate) fn check_records(&self, throttle: &mut MessageThrottle) -> RecordsReport {
        let mut report = RecordsReport::default();
        let max = self.records.max_allocated_id();
        for raw in FileId::FIRST.get()..=max.get() {
            let id = FileId::new(raw);
            let _guard = match (self.config.read_lock_per_file, self.structure) {
                (true, Some(lock)) => Some(lock.read()),
                _ => None,
            };
            if let Err(e) = self.check_record(id, &mut report, throttle) {
                report.unexpected_errors += 1;
                throttle.warn("unexpected error", || format!("checking {id}: {e}"));
            }
        }
        debug!(
            "checked {} records ({} deleted)",
            report.file_records_checked, report.file_records_deleted
        );
        report
    }

    fn check_record(
        &self,
        id: FileId,
        report: &mut RecordsReport,
        throttle: &mut MessageThrottle,
    ) -> Result<()> {
        let record = self.records.read_record(id)?;
        report.file_records_checked += 1;
        if record.is_deleted() {
            report.file_records_deleted += 1;
            return Ok(());
        }

        if record.flags.unknown_bits() != 0 {
            report.invalid_flags += 1;
            throttle.warn("invalid flags", || format!("{id}: {:?}", record.flags));
        }

        let name_resolves = record.name_id != NULL_NAME_ID
            && self.names.value_of(record.name_id).ok().flatten().is_some();
        if !name_resolves {
            report.unresolved_name_ids += 1;
            throttle.warn("unresolved name", || {
                format!("{id}: name id {}", record.name_id)
            });
        }

        if record.attribute_record_id != NULL_RECORD_REF {
            if let Err(e) = self
                .attributes
                .check_record(record.attribute_record_id, id)
            {
                report.unreadable_attribute_records += 1;
                throttle.warn("unreadable attributes", || format!("{id}: {e}"));
            }
        }

        if record.content_record_id != NULL_RECORD_REF {
            if let Err(e) = self.content.check_record(record.content_record_id) {
                report.unreadable_content_records += 1;
                throttle.warn("unreadable content", || format!("{id}: {e}"));
            }
        }

        self.check_parent(id, record.parent_id, report, throttle)?;

        let children = self.children.children(id);
        if record.is_directory() {
            for child in children {
                let consistent = self.records.contains(child)
                    && self.records.parent_id(child)? == id;
                if !consistent {
                    report.inconsistent_parent_child_relationships += 1;
                    throttle.warn("inconsistent parent/child", || {
                        format!("{child} is listed under {id} but does not point back")
                    });
                }
            }
        } else if !children.is_empty() {
            report.non_directories_with_children += 1;
            throttle.warn("non-directory with children", || {
                format!("{id} has {} children", children.len())
            });
        }
        Ok(())
    }

    fn check_parent(
        &self,
        id: FileId,
        parent: FileId,
        report: &mut RecordsReport,
        throttle: &mut MessageThrottle,
    ) -> Result<()> {
        if parent.is_none() {
            if !self.roots.contains(id) {
                report.null_parents += 1;
                throttle.warn("null parent", || format!("{id} has no parent and is not a root"));
            }
            return Ok(());
        }
        if !self.records.contains(parent) {
            report.unresolved_parents += 1;
            throttle.warn("unresolved parent", || format!("{id}: parent {parent}"));
            return Ok(());
        }

        let parent_flags = self.records.flags(parent)?;
        if !parent_flags.is_directory() {
            report.parents_not_directory += 1;
            throttle.warn("parent not directory", || format!("{id}: parent {parent}"));
        } else if self.config.check_orphans
            && parent_flags.contains(RecordFlags::CHILDREN_CACHED)
            && !self.children.contains(parent, id)
        {
            report.orphans += 1;
            throttle.warn("orphan", || format!("{id} is missing from children of {parent}"));
        }
        Ok(())
    }

    /// Roots must be allocated, parentless and live
    pub(crate) fn check_roots(&self, throttle: &mut MessageThrottle) -> RootsReport {
        let mut report = RootsReport::default();
        let roots = match self.roots.roots() {
            Ok(roots) => roots,
            Err(e) => {
                report.unexpected_errors += 1;
                throttle.warn("unexpected error", || format!("listing roots: {e}"));
                return report;
            }
        };
        for (id, url) in roots {
            report.roots_checked += 1;
            if !self.records.contains(id) {
                report.roots_out_of_range += 1;
                throttle.warn("root out of range", || format!("{id} ({url})"));
                continue;
            }
            match self.records.read_record(id) {
                Ok(record) => {
                    if record.parent_id.is_valid() {
                        report.roots_with_parent += 1;
                        throttle.warn("root with parent", || {
                            format!("{id} ({url}) has parent {}", record.parent_id)
                        });
                    }
                    if record.is_deleted() {
                        report.deleted_roots += 1;
                        throttle.warn("deleted root", || format!("{id} ({url})"));
                    }
                }
                Err(e) => {
                    report.unexpected_errors += 1;
                    throttle.warn("unexpected error", || format!("root {id}: {e}"));
                }
            }
        }
        report
    }

    /// Every interned name must round-trip in both directions
    pub(crate) fn check_names(&self, throttle: &mut MessageThrottle) -> NamesReport {
        let mut report = NamesReport::default();
        let entries = match self.names.entries() {
            Ok(entries) => entries,
            Err(e) => {
                report.unexpected_errors += 1;
                throttle.warn("unexpected error", || format!("listing names: {e}"));
                return report;
            }
        };
        for (id, name) in entries {
            report.names_checked += 1;
            match self.names.value_of(id) {
                Ok(Some(value)) if value == name => {}
                Ok(value) => {
                    report.ids_not_resolving_to_name += 1;
                    throttle.warn("name id mismatch", || {
                        format!("{id} resolves to {value:?}, expected {name:?}")
                    });
                }
                Err(e) => {
                    report.unexpected_errors += 1;
                    throttle.warn("unexpected error", || format!("name {id}: {e}"));
                }
            }
            match self.names.try_enumerate(&name) {
                Ok(Some(found)) if found == id => {}
                Ok(found) => {
                    report.names_not_resolving_to_id += 1;
                    throttle.warn("name mismatch", || {
                        format!("{name:?} enumerates to {found:?}, expected {id}")
                    });
                }
                Err(e) => {
                    report.unexpected_errors += 1;
                    throttle.warn("unexpected error", || format!("name {name:?}: {e}"));
                }
            }
        }
        report
    }

    /// Every content record must read back intact
    pub(crate) fn check_content(&self, throttle: &mut MessageThrottle) -> ContentReport {
        let mut report = ContentReport::default();
        for content_id in 1..=self.content.records_count() {
            report.content_records_checked += 1;
            if let Err(e) = self.content.check_record(content_id) {
                report.unreadable_content_records += 1;
                throttle.warn("unreadable content record", || format!("{content_id}: {e}"));
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::PersistentNames;
    use fsrecords_common::Config;
    use std::path::Path;
    use tempfile::tempdir;

    fn open(dir: &Path) -> VfsStore {
        VfsStore::open(dir, &Config::default()).unwrap()
    }

    fn check(store: &VfsStore) -> HealthReport {
        let config = HealthCheckConfig {
            check_orphans: true,
            ..HealthCheckConfig::default()
        };
        HealthChecker::for_store(store, config).check_health()
    }

    #[test]
    fn test_healthy_tree() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let root = store.create_root("file:///r", "r").unwrap();
        let src = store.create_child(root, "src", RecordFlags::IS_DIRECTORY).unwrap();
        let f = store.create_child(src, "a.rs", RecordFlags::NONE).unwrap();
        store.write_content(f, b"fn a() {}").unwrap();
        let attr = store.register_attribute("attr", 1).unwrap();
        store.write_attribute(f, attr, b"v").unwrap();

        let report = check(&store);
        assert!(report.is_healthy(), "{report}");
        assert_eq!(report.records.file_records_checked, 3);
        assert_eq!(report.roots.roots_checked, 1);
        assert_eq!(report.names.names_checked, 3);
        assert_eq!(report.content.content_records_checked, 1);
    }

    #[test]
    fn test_deleted_child_scenario() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let root = store.create_root("file:///r", "r").unwrap();
        let kept = store.create_child(root, "kept", RecordFlags::NONE).unwrap();
        let gone = store.create_child(root, "gone", RecordFlags::NONE).unwrap();
        assert_eq!((root.get(), kept.get(), gone.get()), (1, 2, 3));
        store.write_content(gone, b"stale").unwrap();
        let attr = store.register_attribute("attr", 1).unwrap();
        store.write_attribute(gone, attr, b"stale").unwrap();
        store.delete(gone).unwrap();

        let report = check(&store);
        assert_eq!(report.records.file_records_deleted, 1);
        assert!(report.records.file_records_checked >= 3);
        assert_eq!(report.records.inconsistent_parent_child_relationships, 0);
        assert_eq!(report.records.null_parents, 0);
        assert!(report.is_healthy(), "{report}");
    }

    #[test]
    fn test_repeated_checks_agree() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let root = store.create_root("file:///r", "r").unwrap();
        let f = store.create_child(root, "f", RecordFlags::NONE).unwrap();
        // Break the tree behind the facade's back
        store.records().set_parent_id(f, FileId::NONE).unwrap();
        store.records().set_flags(root, RecordFlags::from_bits(0x4000_0002)).unwrap();

        let first = check(&store);
        let second = check(&store);
        assert!(!first.is_healthy());
        assert!(first.has_same_errors(&second));
    }

    #[test]
    fn test_each_category_is_counted() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let root = store.create_root("file:///r", "r").unwrap();
        let d = store.create_child(root, "d", RecordFlags::IS_DIRECTORY).unwrap();
        let f = store.create_child(d, "f", RecordFlags::NONE).unwrap();
        let g = store.create_child(d, "g", RecordFlags::NONE).unwrap();
        let h = store.create_child(root, "h", RecordFlags::NONE).unwrap();
        let records = store.records();

        // f: claims root as parent while listed under d
        records.set_parent_id(f, root).unwrap();
        // g: parent is a plain file
        records.set_parent_id(g, h).unwrap();
        // h: has children but is not a directory
        store.children().remove_child(d, g);
        store.children().add_child(h, g);
        // stray record with no parent that is not a root
        let stray = records.allocate_record().unwrap();
        records.set_name_id(stray, 999).unwrap();
        records.set_content_record_id(stray, 42).unwrap();
        records.set_attribute_record_id(stray, 42).unwrap();

        let r = check(&store).records;
        assert_eq!(r.file_records_checked, 6);
        assert_eq!(r.inconsistent_parent_child_relationships, 1);
        assert_eq!(r.parents_not_directory, 1);
        assert_eq!(r.non_directories_with_children, 1);
        assert_eq!(r.null_parents, 1);
        assert_eq!(r.unresolved_name_ids, 1);
        assert_eq!(r.unreadable_content_records, 1);
        assert_eq!(r.unreadable_attribute_records, 1);
        // f is not in root's cached children
        assert_eq!(r.orphans, 1);
        assert_eq!(r.unresolved_parents, 0);
    }

    #[test]
    fn test_orphan_pass_is_optional() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let root = store.create_root("file:///r", "r").unwrap();
        let f = store.create_child(root, "f", RecordFlags::NONE).unwrap();
        store.children().remove_child(root, f);

        let with = check(&store);
        let without = HealthChecker::for_store(&store, HealthCheckConfig::default()).check_health();
        assert_eq!(with.records.orphans, 1);
        assert_eq!(without.records.orphans, 0);
        assert!(without.is_healthy());
    }

    #[test]
    fn test_roots_checked() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let a = store.create_root("file:///a", "a").unwrap();
        let b = store.create_root("file:///b", "b").unwrap();
        store.records().set_parent_id(b, a).unwrap();
        store.roots().insert(FileId::new(77), "file:///missing").unwrap();
        let c = store.create_root("file:///c", "c").unwrap();
        store.records().set_flag(c, RecordFlags::DELETED, true).unwrap();

        let roots = check(&store).roots;
        assert_eq!(roots.roots_checked, 4);
        assert_eq!(roots.roots_out_of_range, 1);
        assert_eq!(roots.roots_with_parent, 1);
        assert_eq!(roots.deleted_roots, 1);
    }

    /// Name table whose lookups disagree with its own entries
    struct SkewedNames(PersistentNames);

    impl NamesEnumerator for SkewedNames {
        fn enumerate(&self, name: &str) -> Result<i32> {
            self.0.enumerate(name)
        }

        fn try_enumerate(&self, name: &str) -> Result<Option<i32>> {
            Ok(self.0.try_enumerate(name)?.map(|id| id + 1))
        }

        fn value_of(&self, id: i32) -> Result<Option<String>> {
            self.0.value_of(id)
        }

        fn entries(&self) -> Result<Vec<(i32, String)>> {
            self.0.entries()
        }

        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_name_round_trip_mismatch() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        store.create_root("file:///r", "r").unwrap();
        let names = SkewedNames(PersistentNames::open(dir.path().join("skewed-names.dat")).unwrap());
        names.enumerate("one").unwrap();
        names.enumerate("two").unwrap();

        let checker = HealthChecker::new(
            store.records(),
            &names,
            store.content(),
            store.attributes(),
            store.roots(),
            store.children(),
            HealthCheckConfig::default(),
        );
        let report = checker.check_names(&mut MessageThrottle::new(4));
        assert_eq!(report.names_checked, 2);
        assert_eq!(report.names_not_resolving_to_id, 2);
        assert_eq!(report.ids_not_resolving_to_name, 0);
    }
}
