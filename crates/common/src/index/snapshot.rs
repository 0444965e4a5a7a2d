//! On-disk tree snapshots
//!
//! One pretty-printed JSON file per document, `<id>_structure.json`.
//! Writes go to a hidden temp file in the same directory and are renamed into
//! place, so a reader sees either the previous file or the complete new one.

use crate::errors::{AppError, Result};
use crate::tree::{decode_tree, Tree};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Filename suffix shared by every snapshot
pub const SNAPSHOT_SUFFIX: &str = "_structure.json";

/// Directory of tree snapshots
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    root: PathBuf,
}

impl SnapshotDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory if needed
    pub async fn ensure(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| self.error(&self.root, e))
    }

    /// Snapshot path for a document id, or `None` if the id could escape the directory
    pub fn path_for(&self, document_id: &str) -> Option<PathBuf> {
        is_safe_id(document_id)
            .then(|| self.root.join(format!("{}{}", document_id, SNAPSHOT_SUFFIX)))
    }

    /// Persist a tree; the file is complete on disk when this returns
    pub async fn write(&self, tree: &Tree) -> Result<PathBuf> {
        let path = self.checked_path(&tree.document_id)?;
        let json = tree.to_json_pretty()?;

        self.ensure().await?;
        let tmp = self.root.join(format!(
            ".{}{}.{}.tmp",
            tree.document_id,
            SNAPSHOT_SUFFIX,
            uuid::Uuid::new_v4().simple()
        ));

        if let Err(e) = write_synced(&tmp, json.as_bytes()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.error(&tmp, e));
        }

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.error(&path, e));
        }

        debug!(
            document_id = %tree.document_id,
            path = %path.display(),
            bytes = json.len(),
            "Snapshot written"
        );
        Ok(path)
    }

    /// Load and validate a snapshot; `Ok(None)` when no file exists
    pub async fn read(&self, document_id: &str) -> Result<Option<Tree>> {
        let Some(path) = self.path_for(document_id) else {
            return Ok(None);
        };

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.error(&path, e)),
        };

        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| AppError::Snapshot {
                path: path.display().to_string(),
                message: format!("malformed JSON: {}", e),
            })?;

        let tree = decode_tree(document_id, value)?;
        tree.validate()?;
        Ok(Some(tree))
    }

    /// Delete a snapshot; `Ok(false)` when there was nothing to delete
    pub async fn remove(&self, document_id: &str) -> Result<bool> {
        let path = self.checked_path(document_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.error(&path, e)),
        }
    }

    /// Document ids of every snapshot on disk, unordered
    pub async fn scan(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.error(&self.root, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.error(&self.root, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name.strip_suffix(SNAPSHOT_SUFFIX) {
                if is_safe_id(id) {
                    ids.push(id.to_string());
                }
            }
        }
        Ok(ids)
    }

    fn checked_path(&self, document_id: &str) -> Result<PathBuf> {
        self.path_for(document_id)
            .ok_or_else(|| AppError::Validation {
                message: format!("invalid document id '{}'", document_id),
                field: Some("document_id".to_string()),
            })
    }

    fn error(&self, path: &Path, err: std::io::Error) -> AppError {
        AppError::Snapshot {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Ids are filename stems: no separators, no dot-leading names
pub fn is_safe_id(document_id: &str) -> bool {
    !document_id.is_empty()
        && !document_id.starts_with('.')
        && !document_id.contains(['/', '\\', '\0'])
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Node;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotDir::new(dir.path());
        let tree = Tree::new("report", Node::titled("Report").with_child(Node::titled("Intro")));

        let path = snapshots.write(&tree).await.unwrap();
        assert_eq!(path, dir.path().join("report_structure.json"));

        let loaded = snapshots.read("report").await.unwrap().unwrap();
        assert_eq!(loaded, tree);
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotDir::new(dir.path());
        assert!(snapshots.read("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_malformed_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken_structure.json"), b"{ not json").unwrap();
        let snapshots = SnapshotDir::new(dir.path());

        let err = snapshots.read("broken").await.unwrap_err();
        assert!(matches!(err, AppError::Snapshot { .. }));
    }

    #[tokio::test]
    async fn test_scan_ignores_temp_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotDir::new(dir.path());
        snapshots
            .write(&Tree::new("alpha", Node::titled("A")))
            .await
            .unwrap();
        std::fs::write(dir.path().join(".beta_structure.json.abc.tmp"), b"{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();

        let ids = snapshots.scan().await.unwrap();
        assert_eq!(ids, vec!["alpha".to_string()]);
    }

    #[tokio::test]
    async fn test_scan_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotDir::new(dir.path().join("not-yet"));
        assert!(snapshots.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotDir::new(dir.path());
        snapshots
            .write(&Tree::new("gone", Node::titled("G")))
            .await
            .unwrap();

        assert!(snapshots.remove("gone").await.unwrap());
        assert!(!snapshots.remove("gone").await.unwrap());
    }

    #[test]
    fn test_unsafe_ids_have_no_path() {
        let snapshots = SnapshotDir::new("/tmp/indices");
        assert!(snapshots.path_for("../escape").is_none());
        assert!(snapshots.path_for("a/b").is_none());
        assert!(snapshots.path_for("").is_none());
        assert!(snapshots.path_for("Report 2024").is_some());
    }
}
