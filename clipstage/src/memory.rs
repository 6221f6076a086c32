//! In-memory node tree.
//!
//! A complete [`Node`] implementation for embedders without a tree of their
//! own. Sibling names are unique, subtrees archive to
//! `<into>/<nodeId>/node.json` and unarchived nodes get fresh ids and adopt
//! the target folder's project.

use compact_str::{CompactString, format_compact};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

use crate::error::{StageError, StageResult};
use crate::node::{Dependency, Node, NodeId, ProjectFile, ProjectId};

pub const FOLDER_TYPE: &str = "folder";
const ARCHIVE_FILE: &str = "node.json";

/// Owns the id sequence and the file-system name shared by its nodes.
#[derive(Debug)]
pub struct MemoryTree {
    file_system: CompactString,
    next_id: AtomicU64,
}

impl MemoryTree {
    pub fn new(file_system: impl Into<CompactString>) -> Arc<Self> {
        Arc::new(Self {
            file_system: file_system.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn file_system(&self) -> &str {
        &self.file_system
    }

    /// A parentless folder.
    pub fn root_folder(self: &Arc<Self>, name: &str) -> Arc<MemoryNode> {
        MemoryNode::create(self, name, FOLDER_TYPE, true, None, Weak::new())
    }

    /// A parentless folder scoped to `project`; descendants inherit the project.
    pub fn project_folder(self: &Arc<Self>, name: &str, project: ProjectId) -> Arc<MemoryNode> {
        MemoryNode::create(self, name, FOLDER_TYPE, true, Some(project), Weak::new())
    }

    fn allocate_id(&self) -> NodeId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        NodeId::new(format_compact!("n{n}"))
    }
}

pub struct MemoryNode {
    id: NodeId,
    tree: Arc<MemoryTree>,
    name: RwLock<CompactString>,
    node_type: CompactString,
    folder: bool,
    project: Option<ProjectId>,
    content: RwLock<Vec<u8>>,
    dependencies: RwLock<Vec<Dependency>>,
    parent: Weak<MemoryNode>,
    children: RwLock<Vec<Arc<MemoryNode>>>,
    fail_next_archive: AtomicBool,
    this: Weak<MemoryNode>,
}

/// Serialized form of a subtree.
#[derive(Debug, Serialize, Deserialize)]
struct ArchivedNode {
    name: CompactString,
    node_type: CompactString,
    folder: bool,
    #[serde(default)]
    content: Vec<u8>,
    #[serde(default)]
    dependencies: Vec<Dependency>,
    #[serde(default)]
    children: Vec<ArchivedNode>,
}

impl MemoryNode {
    fn create(
        tree: &Arc<MemoryTree>,
        name: &str,
        node_type: &str,
        folder: bool,
        project: Option<ProjectId>,
        parent: Weak<MemoryNode>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: tree.allocate_id(),
            tree: Arc::clone(tree),
            name: RwLock::new(CompactString::from(name)),
            node_type: CompactString::from(node_type),
            folder,
            project,
            content: RwLock::new(Vec::new()),
            dependencies: RwLock::new(Vec::new()),
            parent,
            children: RwLock::new(Vec::new()),
            fail_next_archive: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn add_folder(self: &Arc<Self>, name: &str) -> StageResult<Arc<MemoryNode>> {
        self.add_child(name, FOLDER_TYPE, true, Vec::new())
    }

    pub fn add_file(
        self: &Arc<Self>,
        name: &str,
        node_type: &str,
        content: impl Into<Vec<u8>>,
    ) -> StageResult<Arc<MemoryNode>> {
        self.add_child(name, node_type, false, content.into())
    }

    fn add_child(
        self: &Arc<Self>,
        name: &str,
        node_type: &str,
        folder: bool,
        content: Vec<u8>,
    ) -> StageResult<Arc<MemoryNode>> {
        if !self.folder {
            return Err(StageError::NotAFolder(self.id.clone()));
        }

        let mut children = self.children.write();
        if children.iter().any(|c| *c.name.read() == name) {
            return Err(StageError::already_exists(name));
        }

        let child = Self::create(
            &self.tree,
            name,
            node_type,
            folder,
            self.project.clone(),
            Arc::downgrade(self),
        );
        *child.content.write() = content;
        children.push(Arc::clone(&child));

        Ok(child)
    }

    pub fn remove_child(&self, name: &str) -> Option<Arc<MemoryNode>> {
        let mut children = self.children.write();
        let index = children.iter().position(|c| *c.name.read() == name)?;
        Some(children.remove(index))
    }

    pub fn child(&self, name: &str) -> Option<Arc<MemoryNode>> {
        self.children
            .read()
            .iter()
            .find(|c| *c.name.read() == name)
            .cloned()
    }

    pub fn child_names(&self) -> BTreeSet<String> {
        self.children
            .read()
            .iter()
            .map(|c| c.name.read().to_string())
            .collect()
    }

    pub fn content(&self) -> Vec<u8> {
        self.content.read().clone()
    }

    pub fn add_dependency(&self, dependency: Dependency) {
        self.dependencies.write().push(dependency);
    }

    pub fn project_id(&self) -> Option<&ProjectId> {
        self.project.as_ref()
    }

    /// Make the next `archive` call fail.
    pub fn fail_next_archive(&self) {
        self.fail_next_archive.store(true, Ordering::Release);
    }

    fn snapshot(&self) -> ArchivedNode {
        ArchivedNode {
            name: self.name.read().clone(),
            node_type: self.node_type.clone(),
            folder: self.folder,
            content: self.content.read().clone(),
            dependencies: self.dependencies.read().clone(),
            children: self.children.read().iter().map(|c| c.snapshot()).collect(),
        }
    }

    fn materialize(self: &Arc<Self>, archived: ArchivedNode) -> Arc<MemoryNode> {
        let node = Self::create(
            &self.tree,
            &archived.name,
            &archived.node_type,
            archived.folder,
            self.project.clone(),
            Arc::downgrade(self),
        );
        *node.content.write() = archived.content;
        *node.dependencies.write() = archived.dependencies;

        let children: Vec<Arc<MemoryNode>> = archived
            .children
            .into_iter()
            .map(|child| node.materialize(child))
            .collect();
        *node.children.write() = children;

        node
    }
}

impl Node for MemoryNode {
    fn id(&self) -> NodeId {
        self.id.clone()
    }

    fn name(&self) -> CompactString {
        self.name.read().clone()
    }

    fn rename(&self, new_name: &str) -> StageResult<()> {
        if new_name.is_empty() {
            return Err(StageError::RenameFailed {
                from: self.name(),
                to: CompactString::from(new_name),
                reason: "empty name".into(),
            });
        }

        match self.parent.upgrade() {
            Some(parent) => {
                let siblings = parent.children.write();
                if siblings
                    .iter()
                    .any(|c| c.id != self.id && *c.name.read() == new_name)
                {
                    return Err(StageError::already_exists(new_name));
                }
                *self.name.write() = CompactString::from(new_name);
            }
            None => *self.name.write() = CompactString::from(new_name),
        }

        Ok(())
    }

    fn node_type(&self) -> &str {
        &self.node_type
    }

    fn is_folder(&self) -> bool {
        self.folder
    }

    fn file_system_name(&self) -> CompactString {
        self.tree.file_system.clone()
    }

    fn archive(&self, into: &Path) -> StageResult<()> {
        if self.fail_next_archive.swap(false, Ordering::AcqRel) {
            return Err(StageError::archive_failed(&self.id, "injected archive failure"));
        }

        let dir = into.join(self.id.as_str());
        std::fs::create_dir_all(&dir)
            .map_err(|e| StageError::archive_failed(&self.id, e.to_string()))?;

        let bytes = serde_json::to_vec(&self.snapshot())
            .map_err(|e| StageError::archive_failed(&self.id, e.to_string()))?;
        std::fs::write(dir.join(ARCHIVE_FILE), bytes)
            .map_err(|e| StageError::archive_failed(&self.id, e.to_string()))?;

        trace!(node_id = %self.id, dir = %dir.display(), "Archived memory node");
        Ok(())
    }

    fn children(&self) -> Vec<Arc<dyn Node>> {
        self.children
            .read()
            .iter()
            .map(|c| Arc::clone(c) as Arc<dyn Node>)
            .collect()
    }

    fn unarchive(&self, from: &Path) -> StageResult<Arc<dyn Node>> {
        if !self.folder {
            return Err(StageError::NotAFolder(self.id.clone()));
        }

        let bytes = std::fs::read(from.join(ARCHIVE_FILE))
            .map_err(|e| StageError::unarchive_failed(from, e.to_string()))?;
        let archived: ArchivedNode = serde_json::from_slice(&bytes)
            .map_err(|e| StageError::unarchive_failed(from, e.to_string()))?;

        let this = self
            .this
            .upgrade()
            .ok_or_else(|| StageError::unarchive_failed(from, "folder is being dropped"))?;

        let mut children = this.children.write();
        if children.iter().any(|c| *c.name.read() == archived.name) {
            return Err(StageError::already_exists(archived.name));
        }

        let node = this.materialize(archived);
        children.push(Arc::clone(&node));

        Ok(node)
    }

    fn as_project_file(&self) -> Option<&dyn ProjectFile> {
        self.project.as_ref().map(|_| self as &dyn ProjectFile)
    }
}

impl ProjectFile for MemoryNode {
    fn project(&self) -> ProjectId {
        self.project.clone().unwrap_or_else(|| ProjectId::new(""))
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.dependencies.read().clone()
    }

    fn remove_dependency(&self, name: &str) {
        self.dependencies.write().retain(|d| d.name != name);
    }
}
