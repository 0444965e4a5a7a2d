//! Per-document tree registry
//!
//! [`IndexStore`] holds one [`Tree`] per document id and owns the build
//! lifecycle:
//! - `begin_build` marks an id as in flight (at most one build per id)
//! - `complete_build` persists the snapshot, then publishes the tree
//! - `abort_build` releases the marker and leaves the prior tree visible
//!
//! Snapshots on disk are the source of truth; memory is a cache filled
//! lazily by `get` and `rehydrate_all`.

mod snapshot;

pub use snapshot::{is_safe_id, SnapshotDir, SNAPSHOT_SUFFIX};

use crate::errors::{AppError, Result};
use crate::metrics;
use crate::tree::Tree;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Snapshot writes tried before a build gives up to concurrent deletes
const PUBLISH_ATTEMPTS: usize = 4;

/// Shared handle to the registry; cheap to clone
#[derive(Clone)]
pub struct IndexStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    trees: RwLock<HashMap<String, Arc<Tree>>>,
    building: Mutex<HashSet<String>>,
    /// Bumped after every delete so a concurrent lazy load cannot resurrect the id
    deletions: AtomicU64,
    snapshots: SnapshotDir,
}

impl StoreInner {
    fn release(&self, document_id: &str) {
        self.building
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(document_id);
    }
}

/// Proof that the holder owns the in-flight marker for one document id.
///
/// Hand it back through `complete_build` or `abort_build`. Dropping it
/// unused (e.g. the request was abandoned) releases the marker as well.
#[must_use = "a build token must be completed or aborted"]
pub struct BuildToken {
    document_id: String,
    store: Arc<StoreInner>,
    released: bool,
}

impl BuildToken {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    fn release(mut self) {
        self.store.release(&self.document_id);
        self.released = true;
    }
}

impl Drop for BuildToken {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                document_id = %self.document_id,
                "Build abandoned before completion, releasing marker"
            );
            self.store.release(&self.document_id);
        }
    }
}

impl std::fmt::Debug for BuildToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildToken")
            .field("document_id", &self.document_id)
            .finish()
    }
}

impl IndexStore {
    /// Create an empty store backed by `index_dir`
    pub fn new(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                trees: RwLock::new(HashMap::new()),
                building: Mutex::new(HashSet::new()),
                deletions: AtomicU64::new(0),
                snapshots: SnapshotDir::new(index_dir),
            }),
        }
    }

    /// Create a store and make sure its snapshot directory exists
    pub async fn open(index_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(index_dir);
        store.inner.snapshots.ensure().await?;
        Ok(store)
    }

    pub fn index_dir(&self) -> &Path {
        self.inner.snapshots.root()
    }

    /// Where the snapshot for `document_id` lives
    pub fn snapshot_path(&self, document_id: &str) -> Option<PathBuf> {
        self.inner.snapshots.path_for(document_id)
    }

    /// Number of trees currently in memory
    pub fn len(&self) -> usize {
        self.inner
            .trees
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a build for `document_id` is in flight
    pub fn is_building(&self, document_id: &str) -> bool {
        self.inner
            .building
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(document_id)
    }

    /// Claim the in-flight marker for `document_id`; never waits
    pub fn begin_build(&self, document_id: &str) -> Result<BuildToken> {
        if !is_safe_id(document_id) {
            return Err(AppError::Validation {
                message: format!("invalid document id '{}'", document_id),
                field: Some("document_id".to_string()),
            });
        }

        let claimed = self
            .inner
            .building
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document_id.to_string());

        if !claimed {
            return Err(AppError::AlreadyBuilding {
                document_id: document_id.to_string(),
            });
        }

        debug!(document_id = %document_id, "Build started");
        Ok(BuildToken {
            document_id: document_id.to_string(),
            store: Arc::clone(&self.inner),
            released: false,
        })
    }

    /// Persist then publish `tree`, replacing any prior tree for the id.
    ///
    /// On error nothing is published and the marker is still released.
    pub async fn complete_build(&self, token: BuildToken, tree: Tree) -> Result<Arc<Tree>> {
        let result = self.persist_and_publish(&token, tree).await;
        token.release();
        result
    }

    async fn persist_and_publish(&self, token: &BuildToken, tree: Tree) -> Result<Arc<Tree>> {
        if tree.document_id != token.document_id {
            return Err(AppError::InvalidTree {
                message: format!(
                    "tree is for '{}' but the build is for '{}'",
                    tree.document_id, token.document_id
                ),
            });
        }
        tree.validate()?;

        let tree = Arc::new(tree);
        for attempt in 1..=PUBLISH_ATTEMPTS {
            let epoch = self.inner.deletions.load(Ordering::SeqCst);
            let path = self.inner.snapshots.write(&tree).await?;

            let total = {
                let mut trees = self
                    .inner
                    .trees
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                if self.inner.deletions.load(Ordering::SeqCst) != epoch {
                    // A delete may have removed the file we just wrote.
                    None
                } else {
                    trees.insert(token.document_id.clone(), Arc::clone(&tree));
                    Some(trees.len())
                }
            };

            let Some(total) = total else {
                debug!(
                    document_id = %token.document_id,
                    attempt,
                    "Delete raced with publish, writing snapshot again"
                );
                continue;
            };
            metrics::record_index_size(total);

            info!(
                document_id = %token.document_id,
                nodes = tree.node_count(),
                path = %path.display(),
                "Tree published"
            );
            return Ok(tree);
        }

        warn!(
            document_id = %token.document_id,
            "Deletes kept racing the build, tree not published"
        );
        Err(AppError::DocumentNotFound {
            id: token.document_id.clone(),
        })
    }

    /// Release the marker without installing anything
    pub fn abort_build(&self, token: BuildToken, error: &AppError) {
        warn!(
            document_id = %token.document_id,
            error = %error,
            "Build aborted, keeping previous tree"
        );
        token.release();
    }

    /// Fetch a tree, loading its snapshot if it is not in memory
    pub async fn get(&self, document_id: &str) -> Result<Arc<Tree>> {
        if let Some(tree) = self.cached(document_id) {
            return Ok(tree);
        }

        let not_found = || AppError::DocumentNotFound {
            id: document_id.to_string(),
        };
        if !is_safe_id(document_id) {
            return Err(not_found());
        }

        let epoch = self.inner.deletions.load(Ordering::SeqCst);
        let tree = self
            .inner
            .snapshots
            .read(document_id)
            .await?
            .ok_or_else(not_found)?;

        let mut trees = self
            .inner
            .trees
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if self.inner.deletions.load(Ordering::SeqCst) != epoch {
            // A delete ran while we were reading; answer from what we read
            // but do not cache it.
            return Ok(Arc::new(tree));
        }

        // A build may have published while we were reading; keep the newer tree.
        let tree = Arc::clone(
            trees
                .entry(document_id.to_string())
                .or_insert_with(|| Arc::new(tree)),
        );
        let total = trees.len();
        drop(trees);

        metrics::record_rehydration();
        metrics::record_index_size(total);
        debug!(document_id = %document_id, "Tree rehydrated from snapshot");
        Ok(tree)
    }

    fn cached(&self, document_id: &str) -> Option<Arc<Tree>> {
        self.inner
            .trees
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .cloned()
    }

    /// Every known document id, in memory or on disk, sorted
    pub async fn list(&self) -> Result<BTreeSet<String>> {
        let mut ids: BTreeSet<String> = self.inner.snapshots.scan().await?.into_iter().collect();
        ids.extend(
            self.inner
                .trees
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned(),
        );
        Ok(ids)
    }

    /// Load every snapshot not yet in memory and return the ids that are
    /// usable, sorted. Unreadable snapshots are logged and skipped.
    pub async fn rehydrate_all(&self) -> Result<Vec<String>> {
        let mut ready = Vec::new();
        for document_id in self.list().await? {
            match self.get(&document_id).await {
                Ok(_) => ready.push(document_id),
                Err(AppError::DocumentNotFound { .. }) => {}
                Err(e) => {
                    warn!(document_id = %document_id, error = %e, "Skipping unreadable snapshot");
                }
            }
        }
        Ok(ready)
    }

    /// Remove a document from memory and disk; deleting an absent id is not an error
    pub async fn delete(&self, document_id: &str) -> Result<bool> {
        let removed_file = self.inner.snapshots.remove(document_id).await?;

        let (removed_tree, total) = {
            let mut trees = self
                .inner
                .trees
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            self.inner.deletions.fetch_add(1, Ordering::SeqCst);
            let removed = trees.remove(document_id).is_some();
            (removed, trees.len())
        };
        metrics::record_index_size(total);

        let existed = removed_file || removed_tree;
        info!(document_id = %document_id, existed, "Document deleted");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Node;

    fn tree_with_children(id: &str, count: usize) -> Tree {
        let children = (0..count).map(|i| Node::titled(format!("Section {}", i)));
        Tree::new(id, Node::titled(id).with_children(children))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_begin_build_same_id_has_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());

        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let attempt = |store: IndexStore, barrier: Arc<tokio::sync::Barrier>| async move {
            barrier.wait().await;
            store.begin_build("report")
        };
        let a = tokio::spawn(attempt(store.clone(), barrier.clone()));
        let b = tokio::spawn(attempt(store.clone(), barrier.clone()));
        let results = vec![a.await.unwrap(), b.await.unwrap()];

        let winners = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::AlreadyBuilding { .. })))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(conflicts, 1);
    }

    #[tokio::test]
    async fn test_different_ids_build_independently() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());

        let a = store.begin_build("alpha").unwrap();
        let b = store.begin_build("beta").unwrap();
        store.complete_build(b, tree_with_children("beta", 1)).await.unwrap();
        store.complete_build(a, tree_with_children("alpha", 2)).await.unwrap();

        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_complete_build_persists_publishes_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());

        let token = store.begin_build("report").unwrap();
        assert!(store.is_building("report"));
        store
            .complete_build(token, tree_with_children("report", 3))
            .await
            .unwrap();

        assert!(!store.is_building("report"));
        assert!(dir.path().join("report_structure.json").exists());
        assert_eq!(store.get("report").await.unwrap().root.children.len(), 3);
        assert!(store.begin_build("report").is_ok());
    }

    #[tokio::test]
    async fn test_abort_keeps_previous_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());

        let token = store.begin_build("report").unwrap();
        store
            .complete_build(token, tree_with_children("report", 2))
            .await
            .unwrap();

        let token = store.begin_build("report").unwrap();
        let failure = AppError::BuildFailure {
            document_id: "report".into(),
            message: "parser crashed".into(),
        };
        store.abort_build(token, &failure);

        assert!(!store.is_building("report"));
        assert_eq!(store.get("report").await.unwrap().root.children.len(), 2);
    }

    #[tokio::test]
    async fn test_dropped_token_releases_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());

        {
            let _token = store.begin_build("report").unwrap();
            assert!(matches!(
                store.begin_build("report"),
                Err(AppError::AlreadyBuilding { .. })
            ));
        }

        assert!(!store.is_building("report"));
        assert!(store.begin_build("report").is_ok());
    }

    #[tokio::test]
    async fn test_invalid_tree_is_not_published_and_marker_released() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());

        let bad = Tree::new(
            "report",
            Node::titled("Root")
                .with_child(Node::titled("A").with_id("x"))
                .with_child(Node::titled("B").with_id("x")),
        );
        let token = store.begin_build("report").unwrap();
        let err = store.complete_build(token, bad).await.unwrap_err();

        assert!(matches!(err, AppError::InvalidTree { .. }));
        assert!(!store.is_building("report"));
        assert!(store.is_empty());
        assert!(!dir.path().join("report_structure.json").exists());
    }

    #[tokio::test]
    async fn test_mismatched_tree_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());

        let token = store.begin_build("report").unwrap();
        let err = store
            .complete_build(token, tree_with_children("other", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTree { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_observe_partial_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());

        let token = store.begin_build("report").unwrap();
        store
            .complete_build(token, tree_with_children("report", 2))
            .await
            .unwrap();

        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut seen = HashSet::new();
                for _ in 0..500 {
                    let tree = store.get("report").await.unwrap();
                    seen.insert(tree.root.children.len());
                    tokio::task::yield_now().await;
                }
                seen
            })
        };

        for _ in 0..20 {
            let token = store.begin_build("report").unwrap();
            store
                .complete_build(token, tree_with_children("report", 50))
                .await
                .unwrap();
            let token = store.begin_build("report").unwrap();
            store
                .complete_build(token, tree_with_children("report", 2))
                .await
                .unwrap();
        }

        let seen = reader.await.unwrap();
        assert!(seen.iter().all(|&n| n == 2 || n == 50), "saw {:?}", seen);
    }

    #[tokio::test]
    async fn test_get_rehydrates_from_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = IndexStore::new(dir.path());
            let token = store.begin_build("report").unwrap();
            store
                .complete_build(token, tree_with_children("report", 4))
                .await
                .unwrap();
        }

        let fresh = IndexStore::new(dir.path());
        assert!(fresh.is_empty());
        let tree = fresh.get("report").await.unwrap();
        assert_eq!(tree.root.children.len(), 4);
        assert_eq!(fresh.len(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());

        assert!(matches!(
            store.get("missing").await,
            Err(AppError::DocumentNotFound { .. })
        ));
        assert!(matches!(
            store.get("../etc/passwd").await,
            Err(AppError::DocumentNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_unions_memory_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let writer = IndexStore::new(dir.path());
        for id in ["beta", "alpha"] {
            let token = writer.begin_build(id).unwrap();
            writer
                .complete_build(token, tree_with_children(id, 1))
                .await
                .unwrap();
        }

        let store = IndexStore::new(dir.path());
        store.get("beta").await.unwrap();
        let ids: Vec<_> = store.list().await.unwrap().into_iter().collect();
        assert_eq!(ids, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[tokio::test]
    async fn test_rehydrate_all_skips_corrupt_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let writer = IndexStore::new(dir.path());
        let token = writer.begin_build("good").unwrap();
        writer
            .complete_build(token, tree_with_children("good", 1))
            .await
            .unwrap();
        std::fs::write(dir.path().join("bad_structure.json"), b"[[[").unwrap();

        let store = IndexStore::new(dir.path());
        let ready = store.rehydrate_all().await.unwrap();
        assert_eq!(ready, vec!["good".to_string()]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        let token = store.begin_build("report").unwrap();
        store
            .complete_build(token, tree_with_children("report", 1))
            .await
            .unwrap();

        assert!(store.delete("report").await.unwrap());
        assert!(!store.delete("report").await.unwrap());
        assert!(!dir.path().join("report_structure.json").exists());
        assert!(matches!(
            store.get("report").await,
            Err(AppError::DocumentNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_rejects_path_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        assert!(matches!(
            store.delete("../outside").await,
            Err(AppError::Validation { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_publish_racing_delete_never_leaves_memory_without_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        let snapshot = dir.path().join("report_structure.json");

        for _ in 0..300 {
            let token = store.begin_build("report").unwrap();
            let publish = {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .complete_build(token, tree_with_children("report", 2))
                        .await
                })
            };
            let delete = {
                let store = store.clone();
                tokio::spawn(async move { store.delete("report").await })
            };
            let _ = publish.await.unwrap();
            delete.await.unwrap().unwrap();

            if store.len() == 1 {
                assert!(snapshot.exists(), "published tree has no snapshot");
            }
            store.delete("report").await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lazy_load_racing_delete_does_not_cache_deleted_id() {
        let dir = tempfile::tempdir().unwrap();
        let writer = IndexStore::new(dir.path());

        for _ in 0..300 {
            let token = writer.begin_build("report").unwrap();
            writer
                .complete_build(token, tree_with_children("report", 1))
                .await
                .unwrap();

            let cold = IndexStore::new(dir.path());
            let get = {
                let cold = cold.clone();
                tokio::spawn(async move { cold.get("report").await })
            };
            let delete = {
                let cold = cold.clone();
                tokio::spawn(async move { cold.delete("report").await })
            };
            let fetched = get.await.unwrap();
            assert!(matches!(
                fetched,
                Ok(_) | Err(AppError::DocumentNotFound { .. })
            ));
            assert!(delete.await.unwrap().unwrap());

            assert!(cold.is_empty(), "deleted id was cached");
            assert!(cold.list().await.unwrap().is_empty());
        }
    }
}
