//! # clipstage - Copy/Paste Staging for Hierarchical Node Trees
//!
//! Copies of nodes are archived into staging directories instead of being
//! kept in memory, tracked per node with a time-to-live, and unarchived on
//! paste with safe handling of name collisions.
//!
//! ## Key Features
//! - Batch copy with per-node outcome tracking and idempotent re-copy
//! - Background sweeper reclaiming expired copies and their directories
//! - All-or-nothing paste validation with "Name - Copy (n)" collision renaming
//! - Cross-project dependency pruning after a paste
//! - Clipboard payload codec for node selections

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock_table;
pub mod logging;
pub mod memory;
pub mod node;
pub mod paste;
pub mod record;
pub mod staging;
pub mod store;
pub mod sweeper;

pub use codec::{ClipboardCodec, ClipboardPayload};
pub use config::StagingConfig;
pub use engine::StagingEngine;
pub use error::{StageError, StageResult};
pub use memory::{MemoryNode, MemoryTree};
pub use node::{Dependency, Node, NodeId, ProjectFile, ProjectId};
pub use paste::{PasteResolver, prune_cross_project_dependencies, unique_copy_name};
pub use record::{CopyOutcome, CopyRecord};
pub use staging::{ArchiveStaging, StagingRoot};
pub use store::{CopyRecordStore, CopySnapshot, StoreStats, SweepReport};
pub use sweeper::{ExpirationSweeper, SweeperHandle};
