//! Tracked state of one node's staging attempt.

use chrono::{DateTime, TimeDelta, Utc};
use compact_str::CompactString;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use crate::node::{Node, NodeId};
use crate::staging::StagingRoot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Pending,
    Succeeded,
    Failed,
}

impl CopyOutcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CopyOutcome::Pending)
    }
}

pub struct CopyRecord {
    node_id: NodeId,
    node_ref: Weak<dyn Node>,

    /// Name and type at copy time; the staged copy materializes under these
    name: CompactString,
    node_type: CompactString,

    staging: Arc<StagingRoot>,
    outcome: watch::Sender<CopyOutcome>,
    failure: OnceLock<CompactString>,
    created_at: DateTime<Utc>,
    expires_at_ms: AtomicI64,
    task_id: Mutex<Option<Uuid>>,
}

impl CopyRecord {
    pub fn pending(node: &Arc<dyn Node>, staging: Arc<StagingRoot>, ttl: Duration) -> Self {
        let created_at = Utc::now();
        let (outcome, _) = watch::channel(CopyOutcome::Pending);

        Self {
            node_id: node.id(),
            node_ref: Arc::downgrade(node),
            name: node.name(),
            node_type: CompactString::from(node.node_type()),
            staging,
            outcome,
            failure: OnceLock::new(),
            created_at,
            expires_at_ms: AtomicI64::new(deadline_ms(created_at, ttl)),
            task_id: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The live source node, if it still exists.
    pub fn node(&self) -> Option<Arc<dyn Node>> {
        self.node_ref.upgrade()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn staging_root(&self) -> &Arc<StagingRoot> {
        &self.staging
    }

    pub fn staging_path(&self) -> &Path {
        self.staging.path()
    }

    /// `stagingPath/nodeId`, where the archived subtree lives.
    pub fn staged_node_path(&self) -> PathBuf {
        self.staging.node_path(&self.node_id)
    }

    pub fn outcome(&self) -> CopyOutcome {
        *self.outcome.borrow()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.get().map(CompactString::as_str)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.expires_at_ms.load(Ordering::Acquire))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at_ms.load(Ordering::Acquire) <= now.timestamp_millis()
    }

    pub fn refresh(&self, ttl: Duration) {
        self.expires_at_ms
            .store(deadline_ms(Utc::now(), ttl), Ordering::Release);
    }

    pub fn task_id(&self) -> Option<Uuid> {
        *self.task_id.lock()
    }

    pub(crate) fn attach_task(&self, task_id: Uuid) {
        *self.task_id.lock() = Some(task_id);
    }

    pub(crate) fn mark_succeeded(&self) -> bool {
        self.settle(CopyOutcome::Succeeded)
    }

    pub(crate) fn mark_failed(&self, cause: impl Into<CompactString>) -> bool {
        let _ = self.failure.set(cause.into());
        self.settle(CopyOutcome::Failed)
    }

    /// Pending -> terminal, at most once.
    fn settle(&self, outcome: CopyOutcome) -> bool {
        let changed = self.outcome.send_if_modified(|current| {
            if *current == CopyOutcome::Pending {
                *current = outcome;
                true
            } else {
                false
            }
        });

        if changed {
            *self.task_id.lock() = None;
        }
        changed
    }

    /// Wait until the staging task has settled this record.
    pub async fn settled(&self) -> CopyOutcome {
        let mut rx = self.outcome.subscribe();
        let settled = match rx.wait_for(|outcome| outcome.is_terminal()).await {
            Ok(outcome) => *outcome,
            Err(_) => self.outcome(),
        };
        settled
    }
}

impl std::fmt::Debug for CopyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyRecord")
            .field("node_id", &self.node_id)
            .field("name", &self.name)
            .field("outcome", &self.outcome())
            .field("staging", &self.staging.path())
            .field("expires_at", &self.expires_at())
            .finish()
    }
}

fn deadline_ms(from: DateTime<Utc>, ttl: Duration) -> i64 {
    let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
    from.checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .timestamp_millis()
}
