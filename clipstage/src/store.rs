//! `CopyRecordStore`: the single source of truth for copy progress.
//!
//! One record per node id, held in a `DashMap`. Archive work runs on worker
//! tasks; the record is inserted as `Pending` before its task is spawned, so
//! creation happens-before any outcome change a paste can observe.

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::StageResult;
use crate::node::{Node, NodeId};
use crate::record::{CopyOutcome, CopyRecord};
use crate::staging::ArchiveStaging;

/// Full view of the store returned by `copy`.
pub type CopySnapshot = HashMap<NodeId, Arc<CopyRecord>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub pending: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl StoreStats {
    pub fn total(&self) -> usize {
        self.pending + self.succeeded + self.failed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub delete_failures: usize,
}

pub struct CopyRecordStore {
    records: DashMap<NodeId, Arc<CopyRecord>>,
    staging: Arc<ArchiveStaging>,
    ttl: Duration,
}

impl CopyRecordStore {
    pub fn new(staging: Arc<ArchiveStaging>, ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            staging,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn staging(&self) -> &Arc<ArchiveStaging> {
        &self.staging
    }

    /// Stage every node of `nodes`, returning the store's full snapshot.
    ///
    /// Nodes with a live `Pending`/`Succeeded` record only get their expiry
    /// extended. Fresh records come back `Pending`; await
    /// [`CopyRecord::settled`] to observe the outcome. Only a staging-root
    /// failure aborts the batch.
    #[instrument(level = "debug", skip(self, nodes), fields(batch = nodes.len()))]
    pub async fn copy(
        &self,
        nodes: &[Arc<dyn Node>],
        explicit_target: Option<&Path>,
    ) -> StageResult<CopySnapshot> {
        let root = self
            .staging
            .resolve_staging_directory(explicit_target)
            .await?;

        let mut staged = 0usize;
        for node in nodes {
            let node_id = node.id();

            let (record, replaced) = match self.records.entry(node_id.clone()) {
                Entry::Occupied(mut entry) => {
                    if entry.get().outcome() != CopyOutcome::Failed {
                        entry.get().refresh(self.ttl);
                        debug!(node_id = %node_id, "Copy already staged, expiry extended");
                        continue;
                    }

                    let record = Arc::new(CopyRecord::pending(node, Arc::clone(&root), self.ttl));
                    let replaced = entry.insert(Arc::clone(&record));
                    (record, Some(replaced))
                }
                Entry::Vacant(entry) => {
                    let record = Arc::new(CopyRecord::pending(node, Arc::clone(&root), self.ttl));
                    entry.insert(Arc::clone(&record));
                    (record, None)
                }
            };

            if let Some(old) = replaced {
                if let Err(e) = self.staging.discard(old.staging_root(), old.node_id()).await {
                    warn!(node_id = %node_id, error = %e, "Failed to discard staged data of failed copy");
                }
            }

            self.spawn_archive(Arc::clone(node), record);
            staged += 1;
        }

        if staged == 0 && root.is_owned() {
            self.staging.release_root_if_empty(root.path()).await;
        }

        info!(staged, requested = nodes.len(), root = %root.path().display(), "Copy batch submitted");
        Ok(self.snapshot())
    }

    fn spawn_archive(&self, node: Arc<dyn Node>, record: Arc<CopyRecord>) {
        let task_id = Uuid::new_v4();
        record.attach_task(task_id);

        let staging = Arc::clone(&self.staging);
        let ttl = self.ttl;
        tokio::spawn(async move {
            let root = Arc::clone(record.staging_root());
            match staging.archive(node, &root).await {
                Ok(_) => {
                    record.mark_succeeded();
                    debug!(node_id = %record.node_id(), %task_id, "Copy staged");
                }
                Err(e) => {
                    warn!(node_id = %record.node_id(), %task_id, error = %e, "Copy failed");
                    record.mark_failed(e.to_string());
                }
            }
            record.refresh(ttl);
        });
    }

    pub fn get(&self, node_id: &NodeId) -> Option<Arc<CopyRecord>> {
        self.records.get(node_id).map(|r| Arc::clone(r.value()))
    }

    pub fn snapshot(&self) -> CopySnapshot {
        self.records
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for record in self.records.iter() {
            match record.outcome() {
                CopyOutcome::Pending => stats.pending += 1,
                CopyOutcome::Succeeded => stats.succeeded += 1,
                CopyOutcome::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Remove expired records, then best-effort delete their staged data.
    #[instrument(level = "debug", skip(self))]
    pub async fn sweep_expired(&self) -> SweepReport {
        let now = Utc::now();
        let ids: Vec<NodeId> = self.records.iter().map(|r| r.key().clone()).collect();

        let mut report = SweepReport::default();
        for id in ids {
            // Re-checked under the shard lock: a concurrent copy may have refreshed it.
            // Pending records are left alone until their archive task settles.
            let Some((_, record)) = self
                .records
                .remove_if(&id, |_, r| r.outcome().is_terminal() && r.is_expired_at(now))
            else {
                continue;
            };
            report.removed += 1;

            if let Err(e) = self.staging.discard(record.staging_root(), &id).await {
                report.delete_failures += 1;
                warn!(
                    node_id = %id,
                    path = %record.staged_node_path().display(),
                    error = %e,
                    "Failed to delete expired staging directory"
                );
            }
        }

        if report.removed > 0 {
            info!(removed = report.removed, failures = report.delete_failures, "Expired copies reclaimed");
        }
        report
    }
}
