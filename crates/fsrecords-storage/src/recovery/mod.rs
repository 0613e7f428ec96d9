//! Rebuilding a store from a log position
//!
//! Recovery copies the files that were reachable at a point from an old
//! storage directory into a new, empty one. Values are taken as of the
//! point through a [`PointResolver`]; a file is recovered only if all of
//! its core fields resolve, otherwise its whole subtree is left out.
//!
//! The walk is breadth-first from the roots. A file reached a second time
//! (listed under two parents) is botched: its first copy is deleted and it
//! is never retried. Copies already made below a botched directory are
//! deleted too, so every surviving copy is reachable from a root. A final
//! pass rebuilds every children list from the surviving files only.

mod error;

pub use error::RecoveryError;

use crate::collab::{ATTRIBUTE_IDS_FILE_NAME, NAMES_FILE_NAME, RootsTable, split_versioned};
use crate::snapshot::{NotAvailableCause, PointResolver, Property, SnapshotOracle};
use crate::vfs::{NewRecord, VfsStore};
use fsrecords_common::{Config, FileId, LogPosition, NULL_RECORD_REF, RecordFlags};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Outcome of a completed recovery
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryResult {
    pub recovered_files: u64,
    pub botched_files: u64,
    pub botched_attributes_count: u64,
}

/// Rebuilds storage directories from their operation log
pub struct RecoveryEngine {
    config: Config,
}

/// Where a recovered file landed
#[derive(Clone, Copy)]
struct Recovered {
    new_id: FileId,
    new_parent: FileId,
    is_directory: bool,
}

/// Traversal bookkeeping, owned by one run
#[derive(Default)]
struct Visited {
    /// Old id to its copy
    recovered: HashMap<FileId, Recovered>,
    /// Old ids excluded after a failure or a second visit
    botched: HashSet<FileId>,
    /// New directories whose children at the point were not all recovered
    incomplete: HashSet<FileId>,
    botched_attributes: u64,
}

enum Visit {
    Recovered(Recovered),
    DeletedAtPoint,
    Unavailable,
    Botched,
}

/// Fields a file needs to be recovered at all
struct CoreFields {
    name_id: i32,
    length: i64,
    timestamp: i64,
    flags: RecordFlags,
    content_record_id: i32,
}

impl RecoveryEngine {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Rebuild the state of `old_dir` as of `point` into `new_dir`
    pub fn recover_from_point(
        &self,
        point: LogPosition,
        old_dir: impl AsRef<Path>,
        new_dir: impl AsRef<Path>,
    ) -> Result<RecoveryResult, RecoveryError> {
        let old_dir = old_dir.as_ref();
        let new_dir = new_dir.as_ref();
        if !old_dir.is_dir() {
            return Err(RecoveryError::SourceMissing(old_dir.to_path_buf()));
        }
        if new_dir.exists() && fs::read_dir(new_dir)?.next().is_some() {
            return Err(RecoveryError::TargetNotEmpty(new_dir.to_path_buf()));
        }
        fs::create_dir_all(new_dir)?;

        info!(
            "Recovering {:?} at log position {} into {:?}",
            old_dir, point, new_dir
        );
        let source = VfsStore::open(old_dir, &self.config)?;
        for name in [NAMES_FILE_NAME, ATTRIBUTE_IDS_FILE_NAME] {
            if old_dir.join(name).exists() {
                fs::copy(old_dir.join(name), new_dir.join(name))?;
            }
        }
        let target = VfsStore::open(new_dir, &self.config)?;

        let oracle = SnapshotOracle::for_store(&source);
        let snapshot = oracle
            .snapshot(point)
            .ok_or_else(|| RecoveryError::PointUnavailable {
                point,
                reason: format!(
                    "not an entry boundary inside the searchable window ending at {}",
                    source.log_position()
                ),
            })?;
        let resolver = PointResolver::new(*snapshot.context(), source.children());

        let mut walk = Walk {
            resolver,
            target: &target,
            last_id: target.records().max_allocated_id(),
        };
        let mut visited = Visited::default();
        let result = walk.run(&source, &mut visited)?;

        target.close()?;
        source.close()?;
        info!(
            "Recovery finished: {} recovered, {} botched, {} attributes dropped",
            result.recovered_files, result.botched_files, result.botched_attributes_count
        );
        Ok(result)
    }
}

struct Walk<'a> {
    resolver: PointResolver<'a>,
    target: &'a VfsStore,
    /// Last id handed out in the target
    last_id: FileId,
}

impl Walk<'_> {
    fn run(
        &mut self,
        source: &VfsStore,
        visited: &mut Visited,
    ) -> Result<RecoveryResult, RecoveryError> {
        let mut queue = VecDeque::new();
        for (old_root, url) in source.list_roots()? {
            let root = self
                .recover_file(old_root, FileId::NONE, visited)
                .map_err(|e| match e {
                    RecoveryError::Storage(e) => RecoveryError::Root { id: old_root, source: e },
                    other => other,
                })?;
            match root {
                Visit::Recovered(recovered) => {
                    self.target
                        .roots()
                        .insert(recovered.new_id, &url)
                        .map_err(|e| RecoveryError::Root { id: old_root, source: e })?;
                    queue.push_back((old_root, recovered.new_id));
                }
                Visit::DeletedAtPoint | Visit::Unavailable | Visit::Botched => {
                    debug!("root {} ({}) not recovered", old_root, url);
                }
            }
        }

        while let Some((old_dir, new_dir)) = queue.pop_front() {
            if visited.botched.contains(&old_dir) {
                continue;
            }
            let children = match self.resolver.children(old_dir) {
                Property::Ready(children) => children,
                Property::NotAvailable(cause) => {
                    debug!("children of {} unavailable: {}", old_dir, cause);
                    visited.incomplete.insert(new_dir);
                    continue;
                }
            };
            for child in children {
                match self.visit(child, new_dir, visited)? {
                    Visit::Recovered(recovered) if recovered.is_directory => {
                        queue.push_back((child, recovered.new_id));
                    }
                    Visit::Recovered(_) | Visit::DeletedAtPoint => {}
                    Visit::Unavailable | Visit::Botched => {
                        visited.incomplete.insert(new_dir);
                    }
                }
            }
        }

        self.drop_below_botched(visited);
        self.relink(visited).map_err(RecoveryError::Relink)?;

        let recovered_files = visited
            .recovered
            .keys()
            .filter(|old| !visited.botched.contains(old))
            .count() as u64;
        Ok(RecoveryResult {
            recovered_files,
            botched_files: visited.botched.len() as u64,
            botched_attributes_count: visited.botched_attributes,
        })
    }

    /// Recover one non-root file, absorbing per-file storage failures
    fn visit(
        &mut self,
        old: FileId,
        new_parent: FileId,
        visited: &mut Visited,
    ) -> Result<Visit, RecoveryError> {
        if visited.botched.contains(&old) {
            return Ok(Visit::Botched);
        }
        if let Some(first) = visited.recovered.get(&old).copied() {
            warn!("{} is reachable from more than one parent", old);
            visited.botched.insert(old);
            visited.incomplete.insert(first.new_parent);
            if let Err(e) = self.target.delete(first.new_id) {
                warn!("failed to delete botched copy {}: {}", first.new_id, e);
            }
            return Ok(Visit::Botched);
        }

        let allocated_before = self.last_id;
        match self.recover_file(old, new_parent, visited) {
            Ok(visit) => Ok(visit),
            Err(RecoveryError::Storage(e)) => {
                warn!("failed to recover {}: {}", old, e);
                visited.botched.insert(old);
                visited.recovered.remove(&old);
                if self.last_id != allocated_before {
                    if let Err(e) = self.target.delete(self.last_id) {
                        warn!("failed to delete partial copy {}: {}", self.last_id, e);
                    }
                }
                Ok(Visit::Botched)
            }
            Err(other) => Err(other),
        }
    }

    /// Delete the copies made below botched directories and forget them
    fn drop_below_botched(&self, visited: &mut Visited) {
        let mut by_parent: HashMap<FileId, Vec<FileId>> = HashMap::new();
        for (old, recovered) in &visited.recovered {
            if recovered.new_parent.is_valid() {
                by_parent.entry(recovered.new_parent).or_default().push(*old);
            }
        }
        let mut pending: Vec<FileId> = visited
            .botched
            .iter()
            .filter_map(|old| visited.recovered.get(old))
            .map(|recovered| recovered.new_id)
            .collect();
        let mut dropped = 0;
        while let Some(new_dir) = pending.pop() {
            for old in by_parent.remove(&new_dir).unwrap_or_default() {
                if visited.botched.contains(&old) {
                    continue;
                }
                let Some(recovered) = visited.recovered.remove(&old) else {
                    continue;
                };
                if let Err(e) = self.target.delete(recovered.new_id) {
                    warn!(
                        "failed to delete copy {} below a botched directory: {}",
                        recovered.new_id, e
                    );
                }
                pending.push(recovered.new_id);
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!("dropped {} copies below botched directories", dropped);
        }
    }

    fn core_fields(&self, old: FileId) -> Result<CoreFields, NotAvailableCause> {
        let resolver = &self.resolver;
        resolver.parent_id(old).into_result()?;
        Ok(CoreFields {
            name_id: resolver.name_id(old).into_result()?,
            length: resolver.length(old).into_result()?,
            timestamp: resolver.timestamp(old).into_result()?,
            flags: resolver.flags(old).into_result()?,
            content_record_id: resolver.content_record_id(old).into_result()?,
        })
    }

    fn allocate(&mut self, new: &NewRecord) -> Result<FileId, RecoveryError> {
        let id = self.target.allocate_file(new)?;
        let expected = self.last_id.next();
        if id != expected {
            return Err(RecoveryError::IdAllocationGap {
                expected,
                actual: id,
            });
        }
        self.last_id = id;
        Ok(id)
    }

    fn recover_file(
        &mut self,
        old: FileId,
        new_parent: FileId,
        visited: &mut Visited,
    ) -> Result<Visit, RecoveryError> {
        let core = match self.core_fields(old) {
            Ok(core) => core,
            Err(cause) => {
                debug!("{} unavailable at point: {}", old, cause);
                return Ok(Visit::Unavailable);
            }
        };
        if core.flags.is_deleted() {
            return Ok(Visit::DeletedAtPoint);
        }

        let new_id = self.allocate(&NewRecord {
            parent_id: new_parent,
            name_id: core.name_id,
            flags: core.flags,
            length: core.length,
            timestamp: core.timestamp,
        })?;
        let recovered = Recovered {
            new_id,
            new_parent,
            is_directory: core.flags.is_directory(),
        };
        visited.recovered.insert(old, recovered);

        if core.content_record_id != NULL_RECORD_REF {
            match self.resolver.content(old) {
                Property::Ready(Some(data)) => self.target.write_content(new_id, &data)?,
                Property::Ready(None) => {}
                Property::NotAvailable(cause) => {
                    debug!("content of {} not recovered: {}", old, cause);
                    self.target.set_flags(
                        new_id,
                        core.flags
                            | RecordFlags::MUST_RELOAD_CONTENT
                            | RecordFlags::MUST_RELOAD_LENGTH,
                    )?;
                }
            }
        }

        self.recover_attributes(old, new_id, visited)?;
        Ok(Visit::Recovered(recovered))
    }

    fn recover_attributes(
        &self,
        old: FileId,
        new_id: FileId,
        visited: &mut Visited,
    ) -> Result<(), RecoveryError> {
        let candidates = match self.resolver.attribute_candidates(old) {
            Property::Ready(ids) => ids,
            Property::NotAvailable(cause) => {
                debug!("attributes of {} not enumerable: {}", old, cause);
                return Ok(());
            }
        };
        for attribute_id in candidates {
            match self.resolver.attribute(old, attribute_id) {
                Property::Ready(Some(blob)) => {
                    let current = self.target.attribute_types().version_of(attribute_id);
                    match split_versioned(&blob) {
                        Some((version, _)) if Some(version) == current => {
                            self.target
                                .write_attribute_blob(new_id, attribute_id, &blob)?;
                        }
                        _ => {
                            debug!(
                                "dropping attribute {} of {}: version mismatch",
                                attribute_id, old
                            );
                            visited.botched_attributes += 1;
                        }
                    }
                }
                Property::Ready(None) => {}
                Property::NotAvailable(cause) => {
                    debug!("attribute {} of {} not recovered: {}", attribute_id, old, cause);
                    visited.botched_attributes += 1;
                }
            }
        }
        Ok(())
    }

    /// Rebuild children lists over the recovered, non-botched files
    fn relink(&self, visited: &Visited) -> fsrecords_common::Result<()> {
        let mut lists: BTreeMap<FileId, Vec<FileId>> = BTreeMap::new();
        for (old, recovered) in &visited.recovered {
            if visited.botched.contains(old) {
                continue;
            }
            if recovered.is_directory {
                lists.entry(recovered.new_id).or_default();
            }
            if recovered.new_parent.is_valid() {
                lists
                    .entry(recovered.new_parent)
                    .or_default()
                    .push(recovered.new_id);
            }
        }

        for (dir, children) in lists {
            self.target.set_children(dir, children)?;
            if visited.incomplete.contains(&dir) {
                let flags = self.target.records().flags(dir)?;
                if !flags.is_deleted() {
                    self.target
                        .set_flags(dir, flags.without(RecordFlags::CHILDREN_CACHED))?;
                }
            }
        }
        Ok(())
    }
}
