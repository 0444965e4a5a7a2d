//! Indexing pipeline
//!
//! Core logic for turning an upload into an indexed tree: save the file,
//! claim the build, run the builder and enrichment, then persist and
//! publish through the [`IndexStore`].

use crate::builder::{BuildOptions, BuilderSet, DocumentKind, SourceDocument, ALLOWED_EXTENSIONS};
use crate::enrich::Enricher;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use treerag_common::config::AppConfig;
use treerag_common::errors::{AppError, Result};
use treerag_common::index::{is_safe_id, IndexStore};
use treerag_common::llm::CompletionService;
use treerag_common::metrics;
use treerag_common::tree::document_id_from_filename;

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub status: String,
    pub filename: String,
    pub document_id: String,
    /// Snapshot file the tree was written to
    pub index_path: String,
}

/// Upload-to-index pipeline
#[derive(Clone)]
pub struct IndexingPipeline {
    store: IndexStore,
    upload_dir: PathBuf,
    builders: BuilderSet,
    enricher: Enricher,
    options: BuildOptions,
}

impl IndexingPipeline {
    pub fn new(
        store: IndexStore,
        upload_dir: impl Into<PathBuf>,
        builders: BuilderSet,
        enricher: Enricher,
        options: BuildOptions,
    ) -> Self {
        Self {
            store,
            upload_dir: upload_dir.into(),
            builders,
            enricher,
            options,
        }
    }

    pub fn from_config(
        store: IndexStore,
        config: &AppConfig,
        completion: Arc<dyn CompletionService>,
    ) -> Result<Self> {
        Ok(Self::new(
            store,
            &config.storage.upload_dir,
            BuilderSet::from_config(&config.builder)?,
            Enricher::new(completion),
            BuildOptions::from(&config.builder),
        ))
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Save, build and index one upload. The build runs to completion
    /// before this returns; a second upload of the same id meanwhile is
    /// rejected with `AlreadyBuilding`.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn ingest(&self, filename: &str, bytes: &[u8]) -> Result<UploadReceipt> {
        let filename = upload_name(filename)?;
        let kind = DocumentKind::from_filename(&filename)?;
        let document_id = document_id_from_filename(&filename);

        let token = self.store.begin_build(&document_id)?;
        info!(document_id = %document_id, kind = kind.as_str(), "Indexing upload");

        let start = Instant::now();
        let built = self.build(&filename, &document_id, kind, bytes).await;
        let elapsed = start.elapsed().as_secs_f64();

        let tree = match built {
            Ok(tree) => tree,
            Err(e) => {
                metrics::record_build(elapsed, kind.as_str(), "failed");
                self.store.abort_build(token, &e);
                return Err(e);
            }
        };

        match self.store.complete_build(token, tree).await {
            Ok(tree) => {
                metrics::record_build(elapsed, kind.as_str(), "indexed");
                info!(
                    document_id = %document_id,
                    nodes = tree.node_count(),
                    elapsed_secs = elapsed,
                    "Document indexed"
                );
            }
            Err(e) => {
                metrics::record_build(elapsed, kind.as_str(), "failed");
                error!(document_id = %document_id, error = %e, "Failed to publish tree");
                return Err(e);
            }
        }

        let index_path = self
            .store
            .snapshot_path(&document_id)
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        Ok(UploadReceipt {
            status: "success".to_string(),
            filename,
            document_id,
            index_path,
        })
    }

    async fn build(
        &self,
        filename: &str,
        document_id: &str,
        kind: DocumentKind,
        bytes: &[u8],
    ) -> Result<treerag_common::tree::Tree> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let path = self.upload_dir.join(filename);
        tokio::fs::write(&path, bytes).await?;

        let source = SourceDocument {
            document_id: document_id.to_string(),
            filename: filename.to_string(),
            path,
            kind,
        };

        let builder = self.builders.for_kind(kind);
        let tree = builder
            .build(&source, &self.options)
            .await
            .map_err(|e| e.into_app_error(document_id))?;

        if builder.needs_enrichment() {
            Ok(self.enricher.enrich(tree, &self.options).await)
        } else {
            Ok(tree)
        }
    }

    /// Delete saved uploads whose stem is `document_id`; returns how many were removed
    pub async fn remove_uploads(&self, document_id: &str) -> Result<usize> {
        if !is_safe_id(document_id) {
            return Ok(0);
        }

        let mut entries = match tokio::fs::read_dir(&self.upload_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let matches = DocumentKind::from_filename(&name).is_ok()
                && document_id_from_filename(&name) == document_id;
            if !matches {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(file = %name, error = %e, "Failed to remove upload");
                    return Err(e.into());
                }
            }
        }

        Ok(removed)
    }
}

/// Final path component of a client-supplied filename
fn upload_name(filename: &str) -> Result<String> {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    if name.is_empty() || !is_safe_id(&document_id_from_filename(&name)) {
        return Err(AppError::Validation {
            message: format!(
                "Invalid filename '{}'. Expected a {} file",
                filename,
                ALLOWED_EXTENSIONS.join(", ")
            ),
            field: Some("file".to_string()),
        });
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TreeBuilder;
    use crate::errors::IngestionError;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::Notify;
    use treerag_common::llm::OfflineCompletion;
    use treerag_common::tree::{Node, Tree};

    /// Returns a one-section tree, optionally waiting to be released first
    struct FakeBuilder {
        gate: Option<Arc<Notify>>,
        fail: bool,
    }

    #[async_trait]
    impl TreeBuilder for FakeBuilder {
        async fn build(
            &self,
            source: &SourceDocument,
            _options: &BuildOptions,
        ) -> std::result::Result<Tree, IngestionError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(IngestionError::RemoteError("model overloaded".into()));
            }
            let root = Node::titled(source.document_id.clone())
                .with_child(Node::titled("Summary").with_text("Numbers went up."));
            Ok(Tree::new(source.document_id.clone(), root).with_source(source.filename.clone()))
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    async fn pipeline(builder: FakeBuilder) -> (TempDir, IndexingPipeline) {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(dir.path().join("indices")).await.unwrap();
        let pipeline = IndexingPipeline::new(
            store,
            dir.path().join("uploads"),
            BuilderSet::uniform(Arc::new(builder)),
            Enricher::new(Arc::new(OfflineCompletion::new())),
            BuildOptions::default(),
        );
        (dir, pipeline)
    }

    #[tokio::test]
    async fn test_ingest_indexes_under_filename_stem() {
        let (_dir, pipeline) = pipeline(FakeBuilder { gate: None, fail: false }).await;

        let receipt = pipeline.ingest("report.pdf", b"%PDF-1.5").await.unwrap();
        assert_eq!(receipt.status, "success");
        assert_eq!(receipt.filename, "report.pdf");
        assert_eq!(receipt.document_id, "report");
        assert!(receipt.index_path.ends_with("report_structure.json"));

        let tree = pipeline.store().get("report").await.unwrap();
        assert_eq!(tree.root.id.as_deref(), Some("0000"));
        assert_eq!(
            tree.root.children[0].summary.as_deref(),
            Some("Numbers went up.")
        );
        assert!(pipeline.upload_dir().join("report.pdf").exists());
        assert!(!pipeline.store().is_building("report"));
    }

    #[tokio::test]
    async fn test_unsupported_extension_never_claims_a_build() {
        let (_dir, pipeline) = pipeline(FakeBuilder { gate: None, fail: false }).await;

        let err = pipeline.ingest("slides.pptx", b"..").await.unwrap_err();
        assert!(matches!(err, AppError::UnsupportedFileType { .. }));
        assert!(pipeline.store().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_builder_failure_releases_and_surfaces() {
        let (_dir, pipeline) = pipeline(FakeBuilder { gate: None, fail: true }).await;

        let err = pipeline.ingest("report.md", b"# Hi").await.unwrap_err();
        assert!(matches!(err, AppError::BuildFailure { ref document_id, .. } if document_id == "report"));
        assert!(!pipeline.store().is_building("report"));
        assert!(matches!(
            pipeline.store().get("report").await,
            Err(AppError::DocumentNotFound { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_upload_of_same_id_conflicts() {
        let gate = Arc::new(Notify::new());
        let (_dir, pipeline) = pipeline(FakeBuilder {
            gate: Some(gate.clone()),
            fail: false,
        })
        .await;

        let first = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.ingest("report.pdf", b"one").await })
        };
        while !pipeline.store().is_building("report") {
            tokio::task::yield_now().await;
        }

        let err = pipeline.ingest("report.md", b"two").await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyBuilding { .. }));

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert!(pipeline.store().get("report").await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_uploads_matches_stem_only() {
        let (_dir, pipeline) = pipeline(FakeBuilder { gate: None, fail: false }).await;
        pipeline.ingest("report.pdf", b"a").await.unwrap();
        pipeline.ingest("report-2024.md", b"b").await.unwrap();

        assert_eq!(pipeline.remove_uploads("report").await.unwrap(), 1);
        assert!(!pipeline.upload_dir().join("report.pdf").exists());
        assert!(pipeline.upload_dir().join("report-2024.md").exists());
        assert_eq!(pipeline.remove_uploads("report").await.unwrap(), 0);
    }

    #[test]
    fn test_upload_name_strips_directories() {
        assert_eq!(upload_name("../../etc/report.pdf").unwrap(), "report.pdf");
        assert_eq!(upload_name("C:\\docs\\notes.md").unwrap(), "notes.md");
        assert!(upload_name("dir/").is_err());
        assert!(upload_name(".pdf").is_err());
    }
}
