//! Sharded async lock table keyed by node id.
//!
//! Unrelated ids mostly land on different shards, so pastes into different
//! folders rarely wait on each other. Two ids sharing a shard just serialize.
//! Guards are owned so they can travel into a spawned task.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::node::NodeId;

pub struct LockTable {
    shards: Box<[Arc<Mutex<()>>]>,
    hasher: ahash::RandomState,
}

impl LockTable {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Arc::new(Mutex::new(()))).collect(),
            hasher: ahash::RandomState::new(),
        }
    }

    pub async fn lock(&self, id: &NodeId) -> OwnedMutexGuard<()> {
        Arc::clone(&self.shards[self.shard_of(id)]).lock_owned().await
    }

    fn shard_of(&self, id: &NodeId) -> usize {
        (self.hasher.hash_one(id) % self.shards.len() as u64) as usize
    }
}
