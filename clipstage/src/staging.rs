//! Staging directories and the archive / unarchive worker pool.
//!
//! A staging root is either a caller-supplied empty directory or a fresh
//! process-temp directory. Each node of a copy batch is archived under
//! `<root>/<nodeId>/`. Every directory handed out is tracked so the shutdown
//! hook can remove whatever the sweeper has not reclaimed yet.

use compact_str::CompactString;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs as TokioFs;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, trace, warn};

use crate::error::{StageError, StageResult};
use crate::node::{Node, NodeId};

/// Directory holding the archived nodes of one copy batch.
#[derive(Debug)]
pub struct StagingRoot {
    path: PathBuf,

    /// Created by us (process-temp) rather than supplied by the caller
    owned: bool,
}

impl StagingRoot {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn node_path(&self, node_id: &NodeId) -> PathBuf {
        self.path.join(node_id.as_str())
    }
}

pub struct ArchiveStaging {
    prefix: CompactString,
    workers: Arc<Semaphore>,
    tracked_nodes: Mutex<HashSet<PathBuf>>,
    owned_roots: Mutex<HashSet<PathBuf>>,
}

impl ArchiveStaging {
    pub fn new(prefix: impl Into<CompactString>, max_concurrent: usize) -> Self {
        Self {
            prefix: prefix.into(),
            workers: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tracked_nodes: Mutex::new(HashSet::new()),
            owned_roots: Mutex::new(HashSet::new()),
        }
    }

    /// Validate `explicit_target` or create a fresh process-temp root.
    #[instrument(level = "debug", skip(self))]
    pub async fn resolve_staging_directory(
        &self,
        explicit_target: Option<&Path>,
    ) -> StageResult<Arc<StagingRoot>> {
        let Some(target) = explicit_target else {
            let path = tempfile::Builder::new()
                .prefix(self.prefix.as_str())
                .tempdir()
                .map_err(|e| StageError::staging_io(&std::env::temp_dir(), e.to_string()))?
                .keep();

            debug!(staging_root = %path.display(), "Created process-temp staging root");
            self.owned_roots.lock().insert(path.clone());

            return Ok(Arc::new(StagingRoot { path, owned: true }));
        };

        let metadata = TokioFs::metadata(target)
            .await
            .map_err(|e| StageError::staging_io(target, e.to_string()))?;

        if !metadata.is_dir() {
            return Err(StageError::staging_io(target, "not a directory"));
        }

        if metadata.permissions().readonly() {
            return Err(StageError::staging_io(target, "not writable"));
        }

        let mut entries = TokioFs::read_dir(target)
            .await
            .map_err(|e| StageError::staging_io(target, e.to_string()))?;

        if entries
            .next_entry()
            .await
            .map_err(|e| StageError::staging_io(target, e.to_string()))?
            .is_some()
        {
            return Err(StageError::staging_not_empty(target));
        }

        Ok(Arc::new(StagingRoot {
            path: target.to_path_buf(),
            owned: false,
        }))
    }

    /// Archive `node` under `root/<nodeId>` on a worker thread.
    #[instrument(level = "debug", skip(self, node, root), fields(node_id = %node.id()))]
    pub async fn archive(&self, node: Arc<dyn Node>, root: &StagingRoot) -> StageResult<PathBuf> {
        let node_id = node.id();
        let node_path = root.node_path(&node_id);
        self.tracked_nodes.lock().insert(node_path.clone());

        let _permit = self.workers.acquire().await.map_err(|_| {
            StageError::archive_failed(&node_id, "archive worker pool is closed")
        })?;

        let into = root.path().to_path_buf();
        let id_for_task = node_id.clone();
        tokio::task::spawn_blocking(move || node.archive(&into))
            .await
            .map_err(|e| StageError::archive_failed(&id_for_task, e.to_string()))?
            .map_err(|e| match e {
                StageError::ArchiveFailed { .. } => e,
                other => StageError::archive_failed(&node_id, other.to_string()),
            })?;

        trace!(staged = %node_path.display(), "Node archived");
        Ok(node_path)
    }

    /// Materialize the archived subtree at `from` as a new child of `folder`.
    #[instrument(level = "debug", skip(self, folder), fields(folder_id = %folder.id()))]
    pub async fn unarchive(&self, folder: Arc<dyn Node>, from: PathBuf) -> StageResult<Arc<dyn Node>> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| StageError::unarchive_failed(&from, "archive worker pool is closed"))?;

        tokio::task::spawn_blocking(move || folder.unarchive(&from)).await?
    }

    /// Best-effort removal of one node's staged data.
    ///
    /// An owned root left empty afterwards is removed too.
    pub async fn discard(&self, root: &StagingRoot, node_id: &NodeId) -> std::io::Result<()> {
        let node_path = root.node_path(node_id);
        self.tracked_nodes.lock().remove(&node_path);

        match TokioFs::remove_dir_all(&node_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        if root.is_owned() {
            self.release_root_if_empty(root.path()).await;
        }

        Ok(())
    }

    /// Remove an owned root that ended up holding nothing.
    pub async fn release_root_if_empty(&self, root: &Path) {
        // remove_dir refuses non-empty directories, which is what we want here.
        if TokioFs::remove_dir(root).await.is_ok() {
            self.owned_roots.lock().remove(root);
            trace!(staging_root = %root.display(), "Released empty staging root");
        }
    }

    /// Shutdown hook: remove every staging directory still tracked.
    ///
    /// Returns the number of directories removed.
    pub fn cleanup_tracked(&self) -> usize {
        let nodes: Vec<PathBuf> = self.tracked_nodes.lock().drain().collect();
        let roots: Vec<PathBuf> = self.owned_roots.lock().drain().collect();

        let mut removed = 0;
        for path in nodes.iter().chain(roots.iter()) {
            match std::fs::remove_dir_all(path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staging directory on shutdown"),
            }
        }

        debug!(removed, "Shutdown staging cleanup finished");
        removed
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked_nodes.lock().len()
    }
}
