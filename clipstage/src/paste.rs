//! Paste orchestration and the rename-on-paste protocol.
//!
//! A paste is validated as a whole before anything is placed: file system,
//! record outcomes and type collisions. Only then are the staged copies
//! unarchived, in input order.

use compact_str::{CompactString, format_compact};
use nanoid::nanoid;
use smallvec::SmallVec;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{Instrument, Span, debug, error, info, instrument, warn};

use crate::error::{StageError, StageResult};
use crate::lock_table::LockTable;
use crate::node::{Node, NodeId, child_named};
use crate::record::{CopyOutcome, CopyRecord};
use crate::staging::ArchiveStaging;
use crate::store::CopyRecordStore;

const COPY_SUFFIX: &str = " - Copy";

pub struct PasteResolver {
    store: Arc<CopyRecordStore>,
    locks: LockTable,
    probe_limit: usize,
}

impl PasteResolver {
    pub fn new(store: Arc<CopyRecordStore>, lock_shards: usize, probe_limit: usize) -> Self {
        Self {
            store,
            locks: LockTable::new(lock_shards),
            probe_limit,
        }
    }

    /// Paste the staged copies of `node_ids` into `target`.
    ///
    /// Returns the newly created children in input order. Every error raised
    /// before the first placement leaves `target` untouched. Dropping the
    /// returned future stops before the next node; a placement already
    /// started still runs to completion, source name restore included.
    #[instrument(
        level = "debug",
        skip(self, node_ids, target),
        fields(target_id = %target.id(), count = node_ids.len())
    )]
    pub async fn paste(
        &self,
        source_file_system: &str,
        node_ids: &[NodeId],
        target: &Arc<dyn Node>,
    ) -> StageResult<Vec<Arc<dyn Node>>> {
        if !target.is_folder() {
            return Err(StageError::NotAFolder(target.id()));
        }

        let target_fs = target.file_system_name();
        if target_fs != source_file_system {
            return Err(StageError::DifferentFileSystem {
                expected: CompactString::from(source_file_system),
                found: target_fs,
            });
        }

        let records = self.classify(node_ids)?;
        check_type_collisions(&records, target.as_ref())?;

        let target_id = target.id();
        let mut placed = Vec::with_capacity(records.len());
        for record in &records {
            // Only children of `target` are ever renamed, so every paste that
            // can touch them contends on the target's lock.
            let guard = self.locks.lock(&target_id).await;

            let placement = Placement {
                staging: Arc::clone(self.store.staging()),
                target: Arc::clone(target),
                record: Arc::clone(record),
                probe_limit: self.probe_limit,
            };
            let child = tokio::spawn(placement.run(guard).instrument(Span::current())).await??;

            record.refresh(self.store.ttl());
            debug!(node_id = %record.node_id(), pasted_as = %child.name(), "Node pasted");
            placed.push(child);
        }

        let pruned: usize = placed
            .iter()
            .map(prune_cross_project_dependencies)
            .sum();

        info!(placed = placed.len(), pruned, "Paste finished");
        Ok(placed)
    }

    /// Look every id up; all must be `Succeeded`.
    fn classify(&self, node_ids: &[NodeId]) -> StageResult<Vec<Arc<CopyRecord>>> {
        let mut failed: SmallVec<[NodeId; 4]> = SmallVec::new();
        let mut succeeded = Vec::with_capacity(node_ids.len());

        for id in node_ids {
            // Absent records count as unfinished, like pending ones.
            let Some(record) = self.store.get(id) else {
                continue;
            };

            match record.outcome() {
                CopyOutcome::Succeeded => succeeded.push(record),
                CopyOutcome::Failed => failed.push(id.clone()),
                CopyOutcome::Pending => {}
            }
        }

        if !failed.is_empty() {
            return Err(StageError::CopyFailed(failed.into_vec()));
        }

        if succeeded.len() != node_ids.len() {
            return Err(StageError::CopyNotFinished);
        }

        Ok(succeeded)
    }
}

/// One node's placement into the target folder, run as its own task.
struct Placement {
    staging: Arc<ArchiveStaging>,
    target: Arc<dyn Node>,
    record: Arc<CopyRecord>,
    probe_limit: usize,
}

impl Placement {
    async fn run(self, _guard: OwnedMutexGuard<()>) -> StageResult<Arc<dyn Node>> {
        match child_named(self.target.as_ref(), self.record.name()) {
            None => {
                self.staging
                    .unarchive(Arc::clone(&self.target), self.record.staged_node_path())
                    .await
            }
            Some(existing) => self.paste_with_rename(existing).await,
        }
    }

    async fn paste_with_rename(&self, existing: Arc<dyn Node>) -> StageResult<Arc<dyn Node>> {
        if existing.node_type() != self.record.node_type() {
            return Err(StageError::already_exists(self.record.name()));
        }

        let original = CompactString::from(self.record.name());
        let temporary = format_compact!("{original}~{}", nanoid!(8));
        let rename = TemporaryRename::apply(existing, original.clone(), &temporary)?;

        let placed = self.place_as_copy(&original).await;
        let restored = rename.restore();

        let child = placed?;
        restored?;
        Ok(child)
    }

    /// Unarchive under the now-free original name, then move the new child
    /// to the first free " - Copy" name.
    async fn place_as_copy(&self, original: &str) -> StageResult<Arc<dyn Node>> {
        let child = self
            .staging
            .unarchive(Arc::clone(&self.target), self.record.staged_node_path())
            .await?;

        let taken: HashSet<CompactString> =
            self.target.children().iter().map(|c| c.name()).collect();
        let unique = unique_copy_name(original, self.probe_limit, |name| taken.contains(name))
            .ok_or_else(|| StageError::paste_failed(format!("no free copy name for '{original}'")))?;

        if let Err(e) = child.rename(&unique) {
            // The child must not keep the original name or the source cannot get it back.
            let fallback = format_compact!("{original}{COPY_SUFFIX} {}", nanoid!(10));
            warn!(error = %e, fallback = %fallback, "Renaming pasted copy failed, using fallback name");
            child.rename(&fallback).map_err(|_| e)?;
        }

        Ok(child)
    }
}

/// A live node moved out of the way for the duration of a paste.
///
/// The original name is put back by `restore`. Dropping the guard restores
/// too, which only happens if the placement task itself is torn down.
struct TemporaryRename {
    node: Arc<dyn Node>,
    original: CompactString,
    restored: bool,
}

impl TemporaryRename {
    fn apply(node: Arc<dyn Node>, original: CompactString, temporary: &str) -> StageResult<Self> {
        node.rename(temporary)?;
        debug!(node_id = %node.id(), temporary, "Source temporarily renamed");

        Ok(Self {
            node,
            original,
            restored: false,
        })
    }

    fn restore(mut self) -> StageResult<()> {
        self.restored = true;
        self.node.rename(&self.original).inspect_err(|e| {
            error!(node_id = %self.node.id(), original = %self.original, error = %e, "Failed to restore source name");
        })
    }
}

impl Drop for TemporaryRename {
    fn drop(&mut self) {
        if !self.restored {
            if let Err(e) = self.node.rename(&self.original) {
                error!(node_id = %self.node.id(), original = %self.original, error = %e, "Failed to restore source name");
            }
        }
    }
}

fn check_type_collisions(records: &[Arc<CopyRecord>], target: &dyn Node) -> StageResult<()> {
    for record in records {
        if let Some(existing) = child_named(target, record.name()) {
            if existing.node_type() != record.node_type() {
                return Err(StageError::already_exists(record.name()));
            }
        }
    }
    Ok(())
}

/// First free name among `"<original> - Copy"`, `"<original> - Copy (2)"`, ...
///
/// After `probe_limit` attempts a random suffix is used; `None` only if even
/// that is taken.
pub fn unique_copy_name(
    original: &str,
    probe_limit: usize,
    is_taken: impl Fn(&str) -> bool,
) -> Option<CompactString> {
    for attempt in 1..=probe_limit {
        let candidate = if attempt == 1 {
            format_compact!("{original}{COPY_SUFFIX}")
        } else {
            format_compact!("{original}{COPY_SUFFIX} ({attempt})")
        };

        if !is_taken(&candidate) {
            return Some(candidate);
        }
    }

    let fallback = format_compact!("{original}{COPY_SUFFIX} {}", nanoid!(10));
    (!is_taken(&fallback)).then_some(fallback)
}

/// Drop dependency edges of `root`'s subtree that resolve outside `root`'s project.
///
/// Walks with an explicit worklist and a visited set, so deep trees and
/// cycles are fine. Returns the number of edges removed.
pub fn prune_cross_project_dependencies(root: &Arc<dyn Node>) -> usize {
    let Some(own_project) = root.as_project_file().map(|p| p.project()) else {
        return 0;
    };

    let mut removed = 0;
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut worklist: Vec<Arc<dyn Node>> = vec![Arc::clone(root)];

    while let Some(node) = worklist.pop() {
        if !visited.insert(node.id()) {
            continue;
        }

        if let Some(file) = node.as_project_file() {
            for dependency in file.dependencies() {
                let foreign = dependency
                    .target_project
                    .as_ref()
                    .is_some_and(|project| *project != own_project);

                if foreign {
                    file.remove_dependency(&dependency.name);
                    removed += 1;
                    debug!(node_id = %node.id(), dependency = %dependency.name, "Pruned cross-project dependency");
                }
            }
        }

        worklist.extend(node.children());
    }

    removed
}
