//! Periodic reclamation of expired copy records.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::store::CopyRecordStore;

pub struct ExpirationSweeper {
    store: Arc<CopyRecordStore>,
    initial_delay: Duration,
    period: Duration,
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the sweeper and wait for its loop to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            debug!(error = %e, "Sweeper task ended abnormally");
        }
    }
}

impl ExpirationSweeper {
    pub fn new(store: Arc<CopyRecordStore>, initial_delay: Duration, period: Duration) -> Self {
        Self {
            store,
            initial_delay,
            period,
        }
    }

    /// Start sweeping on the current runtime; the task ends when `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> SweeperHandle {
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.initial_delay, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                initial_delay = ?self.initial_delay,
                period = ?self.period,
                "Expiration sweeper started"
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.store.sweep_expired().await;
                    }
                }
            }

            info!("Expiration sweeper stopped");
        });

        SweeperHandle { cancel, task }
    }
}
