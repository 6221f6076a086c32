use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use clipstage::{
    ClipboardCodec, CopyOutcome, CopySnapshot, Dependency, MemoryNode, MemoryTree, Node, NodeId,
    ProjectId, StageError, StageResult, StagingConfig, StagingEngine,
};
use compact_str::CompactString;
use parking_lot::Mutex;
use tempfile::TempDir;

fn engine() -> StagingEngine {
    StagingEngine::new(StagingConfig::default()).unwrap()
}

fn node(n: &Arc<MemoryNode>) -> Arc<dyn Node> {
    Arc::clone(n) as Arc<dyn Node>
}

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

async fn copy_settled(engine: &StagingEngine, nodes: &[Arc<dyn Node>]) -> CopySnapshot {
    let snapshot = engine.copy(nodes, None).await.unwrap();
    for record in snapshot.values() {
        record.settled().await;
    }
    snapshot
}

/// Node whose archive blocks until the test releases it.
struct GatedNode {
    id: NodeId,
    gate: Mutex<Option<Receiver<()>>>,
}

impl GatedNode {
    fn new(id: &str) -> (Arc<Self>, Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let node = Arc::new(Self {
            id: NodeId::from(id),
            gate: Mutex::new(Some(rx)),
        });
        (node, tx)
    }
}

impl Node for GatedNode {
    fn id(&self) -> NodeId {
        self.id.clone()
    }

    fn name(&self) -> CompactString {
        CompactString::from("gated")
    }

    fn rename(&self, _new_name: &str) -> StageResult<()> {
        Ok(())
    }

    fn node_type(&self) -> &str {
        "script"
    }

    fn is_folder(&self) -> bool {
        false
    }

    fn file_system_name(&self) -> CompactString {
        CompactString::from("fs")
    }

    fn archive(&self, into: &Path) -> StageResult<()> {
        let gate = self.gate.lock().take();
        if let Some(rx) = gate {
            let _ = rx.recv();
        }
        std::fs::create_dir_all(into.join(self.id.as_str()))?;
        Ok(())
    }
}

#[tokio::test]
async fn repeated_copy_reuses_the_staged_record() {
    let engine = engine();
    let tree = MemoryTree::new("fs");
    let root = tree.root_folder("root");
    let sub = root.add_folder("Sub").unwrap();
    sub.add_file("main.lua", "script", "print(1)").unwrap();

    let first = copy_settled(&engine, &[node(&sub)]).await;
    let record = Arc::clone(&first[&sub.id()]);
    assert_eq!(record.outcome(), CopyOutcome::Succeeded);
    let expires_before = record.expires_at();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = engine.copy(&[node(&sub)], None).await.unwrap();

    assert!(Arc::ptr_eq(&record, &second[&sub.id()]));
    assert!(record.expires_at() > expires_before);
    assert_eq!(engine.store().staging().tracked_count(), 1);
    assert!(record.staged_node_path().is_dir());

    engine.shutdown().await;
}

#[tokio::test]
async fn paste_into_other_file_system_is_refused() {
    let engine = engine();
    let tree_a = MemoryTree::new("fsA");
    let tree_b = MemoryTree::new("fsB");
    let src = tree_a.root_folder("src");
    let sub = src.add_folder("Sub").unwrap();
    let target = tree_b.root_folder("target");
    target.add_file("keep", "script", "").unwrap();

    copy_settled(&engine, &[node(&sub)]).await;
    let before = target.child_names();

    let err = engine
        .paste("fsA", &[sub.id()], &node(&target))
        .await
        .unwrap_err();

    assert!(matches!(err, StageError::DifferentFileSystem { .. }));
    assert_eq!(target.child_names(), before);
    engine.shutdown().await;
}

#[tokio::test]
async fn unknown_or_pending_copies_are_not_finished() {
    let engine = engine();
    let tree = MemoryTree::new("fs");
    let target = tree.root_folder("target");
    let before = target.child_names();

    let err = engine
        .paste("fs", &[NodeId::from("missing")], &node(&target))
        .await
        .unwrap_err();
    assert_eq!(err, StageError::CopyNotFinished);

    let (gated, release) = GatedNode::new("g1");
    let snapshot = engine
        .copy(&[Arc::clone(&gated) as Arc<dyn Node>], None)
        .await
        .unwrap();
    let record = Arc::clone(&snapshot[&NodeId::from("g1")]);
    assert_eq!(record.outcome(), CopyOutcome::Pending);
    assert!(record.task_id().is_some());

    let err = engine
        .paste("fs", &[NodeId::from("g1")], &node(&target))
        .await
        .unwrap_err();
    assert_eq!(err, StageError::CopyNotFinished);
    assert_eq!(target.child_names(), before);

    release.send(()).unwrap();
    assert_eq!(record.settled().await, CopyOutcome::Succeeded);
    assert!(record.task_id().is_none());
    engine.shutdown().await;
}

#[tokio::test]
async fn failed_copies_are_listed_and_block_the_paste() {
    let engine = engine();
    let tree = MemoryTree::new("fs");
    let src = tree.root_folder("src");
    let good = src.add_file("good", "script", "").unwrap();
    let bad = src.add_file("bad", "script", "").unwrap();
    let target = tree.root_folder("target");
    bad.fail_next_archive();

    let snapshot = copy_settled(&engine, &[node(&good), node(&bad)]).await;
    assert_eq!(snapshot[&good.id()].outcome(), CopyOutcome::Succeeded);
    assert_eq!(snapshot[&bad.id()].outcome(), CopyOutcome::Failed);
    assert!(snapshot[&bad.id()].failure().is_some());

    let err = engine
        .paste("fs", &[good.id(), bad.id()], &node(&target))
        .await
        .unwrap_err();

    assert_eq!(err, StageError::CopyFailed(vec![bad.id()]));
    assert!(target.child_names().is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn failed_copy_is_replaced_by_a_new_copy() {
    let engine = engine();
    let tree = MemoryTree::new("fs");
    let src = tree.root_folder("src");
    let file = src.add_file("f", "script", "").unwrap();
    file.fail_next_archive();

    let first = copy_settled(&engine, &[node(&file)]).await;
    let failed = Arc::clone(&first[&file.id()]);
    assert_eq!(failed.outcome(), CopyOutcome::Failed);

    let second = copy_settled(&engine, &[node(&file)]).await;
    let fresh = &second[&file.id()];
    assert!(!Arc::ptr_eq(&failed, fresh));
    assert_eq!(fresh.outcome(), CopyOutcome::Succeeded);
    assert_eq!(engine.stats().total(), 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn paste_without_collision_keeps_the_name() {
    let engine = engine();
    let tree = MemoryTree::new("fs");
    let src = tree.root_folder("src");
    let sub = src.add_folder("Sub").unwrap();
    sub.add_file("main.lua", "script", "print(1)").unwrap();
    let target = tree.root_folder("target");

    copy_settled(&engine, &[node(&sub)]).await;
    let placed = engine
        .paste("fs", &[sub.id()], &node(&target))
        .await
        .unwrap();

    assert_eq!(placed.len(), 1);
    assert_eq!(target.child_names(), names(&["Sub"]));
    let copy = target.child("Sub").unwrap();
    assert_eq!(copy.child("main.lua").unwrap().content(), b"print(1)".to_vec());
    engine.shutdown().await;
}

#[tokio::test]
async fn same_type_collision_gets_copy_names() {
    let engine = engine();
    let tree = MemoryTree::new("fs");
    let root = tree.root_folder("root");
    let sub = root.add_folder("Sub").unwrap();
    let target = node(&root);

    copy_settled(&engine, &[node(&sub)]).await;

    engine.paste("fs", &[sub.id()], &target).await.unwrap();
    assert_eq!(root.child_names(), names(&["Sub", "Sub - Copy"]));
    assert_eq!(sub.name(), "Sub");

    engine.paste("fs", &[sub.id()], &target).await.unwrap();
    assert_eq!(
        root.child_names(),
        names(&["Sub", "Sub - Copy", "Sub - Copy (2)"])
    );
    assert_eq!(sub.name(), "Sub");
    engine.shutdown().await;
}

#[tokio::test]
async fn type_mismatch_collision_is_refused() {
    let engine = engine();
    let tree = MemoryTree::new("fs");
    let src = tree.root_folder("src");
    let script = src.add_file("Sub", "script", "").unwrap();
    let target = tree.root_folder("target");
    target.add_folder("Sub").unwrap();

    copy_settled(&engine, &[node(&script)]).await;
    let before = target.child_names();

    let err = engine
        .paste("fs", &[script.id()], &node(&target))
        .await
        .unwrap_err();

    assert!(matches!(err, StageError::AlreadyExists { .. }));
    assert_eq!(target.child_names(), before);
    assert_eq!(script.name(), "Sub");
    engine.shutdown().await;
}

#[tokio::test]
async fn type_mismatch_anywhere_in_batch_places_nothing() {
    let engine = engine();
    let tree = MemoryTree::new("fs");
    let src = tree.root_folder("src");
    let plain = src.add_file("plain", "script", "").unwrap();
    let clash = src.add_file("Sub", "script", "").unwrap();
    let target = tree.root_folder("target");
    target.add_folder("Sub").unwrap();

    copy_settled(&engine, &[node(&plain), node(&clash)]).await;

    let err = engine
        .paste("fs", &[plain.id(), clash.id()], &node(&target))
        .await
        .unwrap_err();

    assert!(matches!(err, StageError::AlreadyExists { .. }));
    assert_eq!(target.child_names(), names(&["Sub"]));
    engine.shutdown().await;
}

#[tokio::test]
async fn concurrent_pastes_of_one_source_all_get_unique_names() {
    let engine = Arc::new(engine());
    let tree = MemoryTree::new("fs");
    let root = tree.root_folder("root");
    let sub = root.add_folder("Sub").unwrap();

    copy_settled(&engine, &[node(&sub)]).await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        let target = node(&root);
        let id = sub.id();
        tasks.push(tokio::spawn(async move {
            engine.paste("fs", &[id], &target).await.map(|_| ())
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(
        root.child_names(),
        names(&[
            "Sub",
            "Sub - Copy",
            "Sub - Copy (2)",
            "Sub - Copy (3)",
            "Sub - Copy (4)",
        ])
    );
    assert_eq!(sub.name(), "Sub");
    engine.shutdown().await;
}

#[tokio::test]
async fn paste_into_a_leaf_is_refused() {
    let engine = engine();
    let tree = MemoryTree::new("fs");
    let root = tree.root_folder("root");
    let leaf = root.add_file("leaf", "script", "").unwrap();

    let err = engine
        .paste("fs", &[], &node(&leaf))
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::NotAFolder(_)));
}

#[tokio::test]
async fn cross_project_dependencies_are_pruned_after_paste() {
    let engine = engine();
    let tree = MemoryTree::new("fs");
    let alpha = tree.project_folder("alpha", ProjectId::from("alpha"));
    let beta = tree.project_folder("beta", ProjectId::from("beta"));

    let pkg = alpha.add_folder("pkg").unwrap();
    let main = pkg.add_file("main", "script", "").unwrap();
    main.add_dependency(Dependency::new("lib", Some(ProjectId::from("alpha"))));
    main.add_dependency(Dependency::new("shared", Some(ProjectId::from("beta"))));
    main.add_dependency(Dependency::new("loose", None));

    copy_settled(&engine, &[node(&pkg)]).await;
    engine.paste("fs", &[pkg.id()], &node(&beta)).await.unwrap();

    let pasted_main = beta.child("pkg").unwrap().child("main").unwrap();
    let kept: Vec<CompactString> = pasted_main
        .as_project_file()
        .unwrap()
        .dependencies()
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(kept, vec![CompactString::from("shared"), CompactString::from("loose")]);

    // The source keeps all of its edges.
    assert_eq!(main.as_project_file().unwrap().dependencies().len(), 3);
    engine.shutdown().await;
}

#[tokio::test]
async fn non_empty_explicit_target_aborts_the_batch() {
    let engine = engine();
    let staging = TempDir::new().unwrap();
    std::fs::write(staging.path().join("other"), b"x").unwrap();

    let tree = MemoryTree::new("fs");
    let root = tree.root_folder("root");
    let file = root.add_file("f", "script", "").unwrap();

    let err = engine
        .copy(&[node(&file)], Some(staging.path()))
        .await
        .unwrap_err();

    assert!(matches!(err, StageError::StagingNotEmpty { .. }));
    assert!(engine.store().is_empty());
}

#[tokio::test]
async fn explicit_target_holds_the_staged_nodes() {
    let engine = engine();
    let staging = TempDir::new().unwrap();

    let tree = MemoryTree::new("fs");
    let root = tree.root_folder("root");
    let file = root.add_file("f", "script", "").unwrap();

    let snapshot = engine
        .copy(&[node(&file)], Some(staging.path()))
        .await
        .unwrap();
    let record = &snapshot[&file.id()];
    record.settled().await;

    assert_eq!(record.staging_path(), staging.path());
    assert!(staging.path().join(file.id().as_str()).is_dir());
    engine.shutdown().await;
}

#[tokio::test]
async fn clipboard_payload_drives_a_paste() {
    let engine = engine();
    let tree = MemoryTree::new("workspace");
    let src = tree.root_folder("src");
    let a = src.add_file("a.lua", "script", "").unwrap();
    let b = src.add_file("b.lua", "script", "").unwrap();
    let target = tree.root_folder("target");

    let selection = [node(&a), node(&b)];
    copy_settled(&engine, &selection).await;
    let payload = ClipboardCodec::encode(&selection);

    let decoded = ClipboardCodec::decode(&payload).unwrap();
    assert_eq!(decoded.file_system_name, "workspace");
    assert_eq!(decoded.node_ids(), vec![a.id(), b.id()]);

    engine
        .paste(&decoded.file_system_name, &decoded.node_ids(), &node(&target))
        .await
        .unwrap();
    assert_eq!(target.child_names(), names(&["a.lua", "b.lua"]));
    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_named_sources_pasted_together_leave_the_existing_child_alone() {
    let engine = Arc::new(engine());
    let tree = MemoryTree::new("fs");

    for round in 0..20 {
        let a = tree.root_folder("a");
        let c = tree.root_folder("c");
        let target = tree.root_folder("t");
        let from_a = a.add_folder("Sub").unwrap();
        let from_c = c.add_folder("Sub").unwrap();
        let existing = target.add_folder("Sub").unwrap();

        copy_settled(&engine, &[node(&from_a), node(&from_c)]).await;

        let pastes: Vec<_> = [from_a.id(), from_c.id()]
            .into_iter()
            .map(|id| {
                let engine = Arc::clone(&engine);
                let target = node(&target);
                tokio::spawn(async move { engine.paste("fs", &[id], &target).await.map(|_| ()) })
            })
            .collect();
        for paste in pastes {
            paste.await.unwrap().unwrap();
        }

        assert_eq!(existing.name(), "Sub", "round {round}");
        assert_eq!(
            target.child_names(),
            names(&["Sub", "Sub - Copy", "Sub - Copy (2)"]),
            "round {round}"
        );
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn failed_placement_restores_the_source_name() {
    let engine = engine();
    let tree = MemoryTree::new("fs");
    let root = tree.root_folder("root");
    let sub = root.add_folder("Sub").unwrap();

    let snapshot = copy_settled(&engine, &[node(&sub)]).await;
    std::fs::remove_dir_all(snapshot[&sub.id()].staged_node_path()).unwrap();

    let err = engine
        .paste("fs", &[sub.id()], &node(&root))
        .await
        .unwrap_err();

    assert!(matches!(err, StageError::UnarchiveFailed { .. }));
    assert_eq!(sub.name(), "Sub");
    assert_eq!(root.child_names(), names(&["Sub"]));
    engine.shutdown().await;
}

/// Folder whose unarchive blocks until the test releases it.
struct GatedFolder {
    inner: Arc<MemoryNode>,
    gate: Mutex<Option<Receiver<()>>>,
}

impl Node for GatedFolder {
    fn id(&self) -> NodeId {
        self.inner.id()
    }

    fn name(&self) -> CompactString {
        self.inner.name()
    }

    fn rename(&self, new_name: &str) -> StageResult<()> {
        self.inner.rename(new_name)
    }

    fn node_type(&self) -> &str {
        self.inner.node_type()
    }

    fn is_folder(&self) -> bool {
        true
    }

    fn file_system_name(&self) -> CompactString {
        self.inner.file_system_name()
    }

    fn archive(&self, into: &Path) -> StageResult<()> {
        self.inner.archive(into)
    }

    fn children(&self) -> Vec<Arc<dyn Node>> {
        self.inner.children()
    }

    fn unarchive(&self, from: &Path) -> StageResult<Arc<dyn Node>> {
        let gate = self.gate.lock().take();
        if let Some(rx) = gate {
            let _ = rx.recv();
        }
        self.inner.unarchive(from)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_paste_still_completes_the_started_placement() {
    let engine = engine();
    let tree = MemoryTree::new("fs");
    let root = tree.root_folder("root");
    let sub = root.add_folder("Sub").unwrap();
    copy_settled(&engine, &[node(&sub)]).await;

    let (release, rx) = mpsc::channel();
    let gated: Arc<dyn Node> = Arc::new(GatedFolder {
        inner: Arc::clone(&root),
        gate: Mutex::new(Some(rx)),
    });

    let dropped = tokio::time::timeout(
        Duration::from_millis(50),
        engine.paste("fs", &[sub.id()], &gated),
    )
    .await;
    assert!(dropped.is_err());

    release.send(()).unwrap();
    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        while root.child_names() != names(&["Sub", "Sub - Copy"]) || sub.name() != "Sub" {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert!(finished.is_ok());
    engine.shutdown().await;
}
