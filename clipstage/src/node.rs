//! Node capability consumed by the staging engine.
//!
//! The engine never owns nodes. It sees them through [`Node`] (and the
//! optional [`ProjectFile`] view) and keeps only weak back-references.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{StageError, StageResult};

/// Stable identifier of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(CompactString);

impl NodeId {
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(CompactString::from(id))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the project a project-scoped node belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(CompactString);

impl ProjectId {
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ProjectId {
    fn from(id: &str) -> Self {
        Self(CompactString::from(id))
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named dependency edge of a project file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: CompactString,

    /// Project the dependency target resolves to, `None` when unresolved.
    pub target_project: Option<ProjectId>,
}

impl Dependency {
    pub fn new(name: impl Into<CompactString>, target_project: Option<ProjectId>) -> Self {
        Self {
            name: name.into(),
            target_project,
        }
    }
}

/// An item of a hierarchical store (file or folder).
///
/// `archive` and `unarchive` are blocking; the engine only calls them from
/// worker threads.
pub trait Node: Send + Sync + 'static {
    fn id(&self) -> NodeId;

    fn name(&self) -> CompactString;

    fn rename(&self, new_name: &str) -> StageResult<()>;

    /// Type tag compared when a pasted node collides with an existing sibling.
    fn node_type(&self) -> &str;

    fn is_folder(&self) -> bool;

    fn file_system_name(&self) -> CompactString;

    /// Serialize this node's subtree under `into/<id>`.
    fn archive(&self, into: &Path) -> StageResult<()>;

    fn children(&self) -> Vec<Arc<dyn Node>> {
        Vec::new()
    }

    /// Materialize a new child from the serialized subtree at `from`.
    fn unarchive(&self, from: &Path) -> StageResult<Arc<dyn Node>> {
        let _ = from;
        Err(StageError::NotAFolder(self.id()))
    }

    fn as_project_file(&self) -> Option<&dyn ProjectFile> {
        None
    }
}

impl fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

/// Project-scoped view of a node.
pub trait ProjectFile {
    fn project(&self) -> ProjectId;

    fn dependencies(&self) -> Vec<Dependency>;

    fn remove_dependency(&self, name: &str);
}

/// Find a direct child of `folder` by name.
pub fn child_named(folder: &dyn Node, name: &str) -> Option<Arc<dyn Node>> {
    folder
        .children()
        .into_iter()
        .find(|child| child.name() == name)
}
