//! `StagingEngine`: explicitly constructed owner of the store, the paste
//! resolver and the expiration sweeper.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::StagingConfig;
use crate::error::StageResult;
use crate::node::{Node, NodeId};
use crate::paste::PasteResolver;
use crate::record::CopyRecord;
use crate::staging::ArchiveStaging;
use crate::store::{CopyRecordStore, CopySnapshot, StoreStats, SweepReport};
use crate::sweeper::{ExpirationSweeper, SweeperHandle};

pub struct StagingEngine {
    config: StagingConfig,
    store: Arc<CopyRecordStore>,
    resolver: PasteResolver,
    sweeper: Mutex<Option<SweeperHandle>>,
    cancel: CancellationToken,
}

impl StagingEngine {
    pub fn new(config: StagingConfig) -> StageResult<Self> {
        config.validate()?;

        let staging = Arc::new(ArchiveStaging::new(
            config.staging_prefix.clone(),
            config.max_concurrent_archives,
        ));
        let store = Arc::new(CopyRecordStore::new(staging, config.ttl));
        let resolver = PasteResolver::new(
            Arc::clone(&store),
            config.lock_shards,
            config.copy_probe_limit,
        );

        Ok(Self {
            config,
            store,
            resolver,
            sweeper: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    /// Construct and start the sweeper on the current runtime.
    pub fn start(config: StagingConfig) -> StageResult<Self> {
        let engine = Self::new(config)?;
        engine.start_sweeper();
        Ok(engine)
    }

    /// Start the expiration sweeper if it is not running yet.
    pub fn start_sweeper(&self) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return;
        }

        let sweeper = ExpirationSweeper::new(
            Arc::clone(&self.store),
            self.config.sweep_initial_delay,
            self.config.sweep_period,
        );
        *slot = Some(sweeper.spawn(self.cancel.child_token()));
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CopyRecordStore> {
        &self.store
    }

    pub async fn copy(
        &self,
        nodes: &[Arc<dyn Node>],
        explicit_target: Option<&Path>,
    ) -> StageResult<CopySnapshot> {
        self.store.copy(nodes, explicit_target).await
    }

    pub async fn paste(
        &self,
        source_file_system: &str,
        node_ids: &[NodeId],
        target: &Arc<dyn Node>,
    ) -> StageResult<Vec<Arc<dyn Node>>> {
        self.resolver
            .paste(source_file_system, node_ids, target)
            .await
    }

    pub fn record(&self, node_id: &NodeId) -> Option<Arc<CopyRecord>> {
        self.store.get(node_id)
    }

    pub fn snapshot(&self) -> CopySnapshot {
        self.store.snapshot()
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Run one sweep immediately, outside the periodic schedule.
    pub async fn sweep_now(&self) -> SweepReport {
        self.store.sweep_expired().await
    }

    /// Stop the sweeper and remove every staging directory still tracked.
    #[instrument(level = "debug", skip(self))]
    pub async fn shutdown(&self) -> usize {
        self.cancel.cancel();

        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }

        let removed = self.store.staging().cleanup_tracked();
        info!(removed, "Staging engine shut down");
        removed
    }
}
