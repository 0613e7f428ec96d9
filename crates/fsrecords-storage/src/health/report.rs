//! Health report counters

use serde::Serialize;
use std::fmt;

/// Per-record findings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecordsReport {
    pub file_records_checked: u64,
    pub file_records_deleted: u64,
    pub invalid_flags: u64,
    pub unresolved_name_ids: u64,
    pub unreadable_attribute_records: u64,
    pub unreadable_content_records: u64,
    /// Non-root records without a parent
    pub null_parents: u64,
    /// Parent id outside the allocated range
    pub unresolved_parents: u64,
    pub parents_not_directory: u64,
    pub inconsistent_parent_child_relationships: u64,
    pub non_directories_with_children: u64,
    /// Records missing from their parent's cached children list
    pub orphans: u64,
    pub unexpected_errors: u64,
}

impl RecordsReport {
    fn errors(&self) -> [u64; 11] {
        [
            self.invalid_flags,
            self.unresolved_name_ids,
            self.unreadable_attribute_records,
            self.unreadable_content_records,
            self.null_parents,
            self.unresolved_parents,
            self.parents_not_directory,
            self.inconsistent_parent_child_relationships,
            self.non_directories_with_children,
            self.orphans,
            self.unexpected_errors,
        ]
    }
}

/// Roots table findings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RootsReport {
    pub roots_checked: u64,
    pub roots_out_of_range: u64,
    pub roots_with_parent: u64,
    pub deleted_roots: u64,
    pub unexpected_errors: u64,
}

impl RootsReport {
    const fn errors(&self) -> [u64; 4] {
        [
            self.roots_out_of_range,
            self.roots_with_parent,
            self.deleted_roots,
            self.unexpected_errors,
        ]
    }
}

/// Name table round-trip findings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NamesReport {
    pub names_checked: u64,
    /// `value_of(id)` did not give back the enumerated name
    pub ids_not_resolving_to_name: u64,
    /// `enumerate(name)` did not give back the id
    pub names_not_resolving_to_id: u64,
    pub unexpected_errors: u64,
}

impl NamesReport {
    const fn errors(&self) -> [u64; 3] {
        [
            self.ids_not_resolving_to_name,
            self.names_not_resolving_to_id,
            self.unexpected_errors,
        ]
    }
}

/// Content store findings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ContentReport {
    pub content_records_checked: u64,
    pub unreadable_content_records: u64,
}

/// Result of one full check
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub records: RecordsReport,
    pub roots: RootsReport,
    pub names: NamesReport,
    pub content: ContentReport,
    pub elapsed_ms: u64,
}

impl HealthReport {
    fn error_counters(&self) -> impl Iterator<Item = u64> {
        self.records
            .errors()
            .into_iter()
            .chain(self.roots.errors())
            .chain(self.names.errors())
            .chain([self.content.unreadable_content_records])
    }

    /// True if no counter reports a problem
    pub fn is_healthy(&self) -> bool {
        self.error_counters().all(|count| count == 0)
    }

    /// Total number of problems found
    pub fn error_count(&self) -> u64 {
        self.error_counters().sum()
    }

    /// True if both reports found the same problems, ignoring totals checked
    /// and timing
    pub fn has_same_errors(&self, other: &Self) -> bool {
        self.error_counters().eq(other.error_counters())
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.records;
        writeln!(
            f,
            "records: {} checked, {} deleted",
            r.file_records_checked, r.file_records_deleted
        )?;
        writeln!(
            f,
            "  invalid flags: {}, unresolved names: {}, unreadable attributes: {}, unreadable content: {}",
            r.invalid_flags,
            r.unresolved_name_ids,
            r.unreadable_attribute_records,
            r.unreadable_content_records
        )?;
        writeln!(
            f,
            "  null parents: {}, unresolved parents: {}, parents not directory: {}",
            r.null_parents, r.unresolved_parents, r.parents_not_directory
        )?;
        writeln!(
            f,
            "  inconsistent parent/child: {}, non-directories with children: {}, orphans: {}, errors: {}",
            r.inconsistent_parent_child_relationships,
            r.non_directories_with_children,
            r.orphans,
            r.unexpected_errors
        )?;
        writeln!(
            f,
            "roots: {} checked, {} out of range, {} with parent, {} deleted",
            self.roots.roots_checked,
            self.roots.roots_out_of_range,
            self.roots.roots_with_parent,
            self.roots.deleted_roots
        )?;
        writeln!(
            f,
            "names: {} checked, {} ids not resolving, {} names not resolving",
            self.names.names_checked,
            self.names.ids_not_resolving_to_name,
            self.names.names_not_resolving_to_id
        )?;
        writeln!(
            f,
            "content: {} checked, {} unreadable",
            self.content.content_records_checked, self.content.unreadable_content_records
        )?;
        write!(
            f,
            "{} in {} ms",
            if self.is_healthy() { "healthy" } else { "UNHEALTHY" },
            self.elapsed_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_healthy() {
        assert!(HealthReport::default().is_healthy());
    }

    #[test]
    fn test_deleted_records_are_not_errors() {
        let mut report = HealthReport::default();
        report.records.file_records_checked = 10;
        report.records.file_records_deleted = 3;
        assert!(report.is_healthy());
    }

    #[test]
    fn test_same_errors_ignores_totals() {
        let mut a = HealthReport::default();
        a.records.orphans = 2;
        a.records.file_records_checked = 5;
        let mut b = a.clone();
        b.records.file_records_checked = 6;
        b.elapsed_ms = 40;
        assert!(a.has_same_errors(&b));
        assert_eq!(a.error_count(), 2);

        b.roots.deleted_roots = 1;
        assert!(!a.has_same_errors(&b));
        assert!(!b.is_healthy());
    }
}
