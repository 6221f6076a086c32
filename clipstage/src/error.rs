//! Error handling for the staging engine
//!
//! Expected outcomes of a paste (different file system, unfinished copy,
//! failed copy, name collision) are ordinary variants so callers can branch
//! on them without string matching.

use compact_str::CompactString;
use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;

use crate::node::NodeId;

pub type StageResult<T> = Result<T, StageError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    // ────────────────────────────────────────────────────────────
    // Staging setup (aborts a whole copy batch)
    // ────────────────────────────────────────────────────────────
    #[error("Staging directory is not empty: {path}")]
    StagingNotEmpty { path: CompactString },

    #[error("Staging directory unusable: {path} ({reason})")]
    StagingIo {
        path: CompactString,
        reason: CompactString,
    },

    // ────────────────────────────────────────────────────────────
    // Per-node archive / unarchive
    // ────────────────────────────────────────────────────────────
    #[error("Archiving node {node_id} failed: {reason}")]
    ArchiveFailed {
        node_id: NodeId,
        reason: CompactString,
    },

    #[error("Unarchiving from {path} failed: {reason}")]
    UnarchiveFailed {
        path: CompactString,
        reason: CompactString,
    },

    // ────────────────────────────────────────────────────────────
    // Paste outcomes
    // ────────────────────────────────────────────────────────────
    #[error("Target belongs to file system '{found}', copy came from '{expected}'")]
    DifferentFileSystem {
        expected: CompactString,
        found: CompactString,
    },

    #[error("Copy has not finished yet")]
    CopyNotFinished,

    #[error("Copy failed for {}", format_ids(.0))]
    CopyFailed(Vec<NodeId>),

    #[error("A node named '{name}' already exists")]
    AlreadyExists { name: CompactString },

    #[error("Paste failed: {0}")]
    PasteFailed(CompactString),

    // ────────────────────────────────────────────────────────────
    // Node capability
    // ────────────────────────────────────────────────────────────
    #[error("Node {0} is not a folder")]
    NotAFolder(NodeId),

    #[error("Renaming '{from}' to '{to}' failed: {reason}")]
    RenameFailed {
        from: CompactString,
        to: CompactString,
        reason: CompactString,
    },

    // ────────────────────────────────────────────────────────────
    // Ambient
    // ────────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(CompactString),

    #[error("File system error: {kind:?}: {message}")]
    Io {
        kind: ErrorKind,
        message: CompactString,
    },

    #[error("Serialization error: {0}")]
    Serialization(CompactString),
}

fn format_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl StageError {
    /// Outcomes the user can act on (retry later, pick another target, copy again).
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StageError::DifferentFileSystem { .. }
                | StageError::CopyNotFinished
                | StageError::CopyFailed(_)
                | StageError::AlreadyExists { .. }
                | StageError::StagingNotEmpty { .. }
        )
    }

    /// Errors raised before any per-node work of a copy batch starts.
    #[inline]
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            StageError::StagingNotEmpty { .. } | StageError::StagingIo { .. }
        )
    }

    #[inline]
    pub fn staging_io(path: &Path, reason: impl Into<CompactString>) -> Self {
        Self::StagingIo {
            path: CompactString::from(path.to_string_lossy()),
            reason: reason.into(),
        }
    }

    #[inline]
    pub fn staging_not_empty(path: &Path) -> Self {
        Self::StagingNotEmpty {
            path: CompactString::from(path.to_string_lossy()),
        }
    }

    #[inline]
    pub fn archive_failed(node_id: &NodeId, reason: impl Into<CompactString>) -> Self {
        Self::ArchiveFailed {
            node_id: node_id.clone(),
            reason: reason.into(),
        }
    }

    #[inline]
    pub fn unarchive_failed(path: &Path, reason: impl Into<CompactString>) -> Self {
        Self::UnarchiveFailed {
            path: CompactString::from(path.to_string_lossy()),
            reason: reason.into(),
        }
    }

    #[inline]
    pub fn already_exists(name: impl Into<CompactString>) -> Self {
        Self::AlreadyExists { name: name.into() }
    }

    #[inline]
    pub fn paste_failed(reason: impl Into<CompactString>) -> Self {
        Self::PasteFailed(reason.into())
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        StageError::Io {
            kind: err.kind(),
            message: CompactString::from(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StageError {
    fn from(err: serde_json::Error) -> Self {
        StageError::Serialization(CompactString::from(err.to_string()))
    }
}

impl From<toml::de::Error> for StageError {
    fn from(err: toml::de::Error) -> Self {
        StageError::Config(CompactString::from(err.to_string()))
    }
}

impl From<toml::ser::Error> for StageError {
    fn from(err: toml::ser::Error) -> Self {
        StageError::Config(CompactString::from(err.to_string()))
    }
}

impl From<tokio::task::JoinError> for StageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StageError::Io {
            kind: ErrorKind::Other,
            message: CompactString::from(format!("worker task aborted: {err}")),
        }
    }
}
