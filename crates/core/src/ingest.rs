use crate::chunking::build_chunks;
use crate::embeddings::Embedder;
use crate::error::{IngestError, ModelError, Result, StoreError};
use crate::extractor::{SourceFormat, TextExtractor};
use crate::models::{Chunk, Collection, DocumentType, FailureKind, GraphSync, IngestionReport};
use crate::stores::GraphLink;
use crate::traits::VectorIndex;
use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const LOCK_FILE: &str = "ingest.lock";
const IGNORED_FILES: [&str; 1] = ["metadata.json"];

/// Exclusive advisory lock held for the whole run so that ingestion runs
/// never overlap. Released on drop.
pub struct IngestLock {
    file: File,
    path: PathBuf,
}

impl IngestLock {
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| IngestError::Busy(path.clone()))?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IngestLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub fn discover_application_dirs(root: &Path) -> Vec<PathBuf> {
    let mut dirs = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect::<Vec<_>>();
    dirs.sort_unstable();
    dirs
}

pub fn discover_application_files(application_dir: &Path) -> Vec<PathBuf> {
    let mut files = WalkDir::new(application_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| !IGNORED_FILES.contains(&name))
        })
        .collect::<Vec<_>>();
    files.sort_unstable();
    files
}

fn document_type_of(path: &Path) -> DocumentType {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(DocumentType::from_file_stem)
        .unwrap_or(DocumentType::Other)
}

enum FileFailure {
    Extraction(String),
    Model(ModelError),
    Storage(StoreError),
}

impl FileFailure {
    fn kind(&self) -> FailureKind {
        match self {
            FileFailure::Extraction(_) => FailureKind::Extraction,
            FileFailure::Model(_) => FailureKind::Model,
            FileFailure::Storage(_) => FailureKind::Storage,
        }
    }

    fn reason(&self) -> String {
        match self {
            FileFailure::Extraction(reason) => reason.clone(),
            FileFailure::Model(error) => error.to_string(),
            FileFailure::Storage(error) => error.to_string(),
        }
    }
}

/// Extract → chunk → embed → upsert over a root of application folders.
pub struct IngestionDriver<'a> {
    extractor: &'a dyn TextExtractor,
    embedder: &'a dyn Embedder,
    index: &'a dyn VectorIndex,
    graph: Option<&'a GraphLink>,
    model_timeout: Duration,
}

impl<'a> IngestionDriver<'a> {
    pub fn new(
        extractor: &'a dyn TextExtractor,
        embedder: &'a dyn Embedder,
        index: &'a dyn VectorIndex,
        model_timeout: Duration,
    ) -> Self {
        Self {
            extractor,
            embedder,
            index,
            graph: None,
            model_timeout,
        }
    }

    pub fn with_graph(mut self, graph: &'a GraphLink) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Runs one ingestion pass. Must be called with the run lock held;
    /// see [`IngestLock`].
    pub async fn run(&self, root: &Path) -> Result<IngestionReport> {
        if !root.is_dir() {
            return Err(IngestError::MissingRoot(root.to_path_buf()));
        }

        let mut report = IngestionReport::new();
        let applications = discover_application_dirs(root);
        info!(
            run_id = %report.run_id,
            root = %root.display(),
            applications = applications.len(),
            "ingestion started"
        );

        for application_dir in applications {
            self.ingest_application(&application_dir, &mut report).await;
            report.applications += 1;
            if report.applications % 10 == 0 {
                info!(
                    applications = report.applications,
                    chunks = report.total_chunks(),
                    "ingestion progress"
                );
            }
        }

        for collection in Collection::ALL {
            let count = self.index.count(collection).await?;
            report.collection_counts.insert(collection, count);
        }
        report.finished_at = Some(Utc::now());

        info!(
            run_id = %report.run_id,
            files_discovered = report.files_discovered,
            files_processed = report.files_processed,
            failed_extractions = report.failed_extractions,
            model_failures = report.model_failures,
            storage_failures = report.storage_failures,
            chunks = report.total_chunks(),
            "ingestion finished"
        );
        Ok(report)
    }

    async fn ingest_application(&self, application_dir: &Path, report: &mut IngestionReport) {
        let Some(application_id) = application_dir
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
        else {
            warn!(path = %application_dir.display(), "skipping application folder without a utf-8 name");
            return;
        };

        let mut application_chunks = Vec::new();
        for path in discover_application_files(application_dir) {
            if SourceFormat::from_path(&path).is_none() {
                report.skipped_unsupported += 1;
                debug!(path = %path.display(), "unsupported extension");
                continue;
            }

            report.files_discovered += 1;
            let document_type = document_type_of(&path);
            match self.ingest_file(&application_id, document_type, &path).await {
                Ok(chunks) => {
                    debug!(
                        application_id = %application_id,
                        document_type = %document_type,
                        chunks = chunks.len(),
                        "indexed document"
                    );
                    report.record_success(document_type, chunks.len());
                    application_chunks.extend(chunks);
                }
                Err(failure) => {
                    let (kind, reason) = (failure.kind(), failure.reason());
                    warn!(path = %path.display(), kind = %kind, reason = %reason, "document failed");
                    report.record_failure(path, kind, reason);
                }
            }
        }

        if let Some(graph) = self.graph {
            self.sync_graph(graph, application_dir, &application_chunks, report)
                .await;
        }
    }

    async fn ingest_file(
        &self,
        application_id: &str,
        document_type: DocumentType,
        path: &Path,
    ) -> Result<Vec<Chunk>, FileFailure> {
        let text = self
            .extractor
            .extract(path)
            .await
            .map_err(|error| FileFailure::Extraction(error.to_string()))?;

        let chunks = build_chunks(
            application_id,
            document_type,
            &path.to_string_lossy(),
            &text,
        );
        if chunks.is_empty() {
            return Err(FileFailure::Extraction(format!(
                "no extractable text in {}",
                path.display()
            )));
        }

        let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
        let embeddings = tokio::time::timeout(self.model_timeout, self.embedder.embed_batch(&texts))
            .await
            .map_err(|_| {
                FileFailure::Model(ModelError::Timeout {
                    model: self.embedder.name().to_string(),
                    after: self.model_timeout,
                })
            })?
            .map_err(FileFailure::Model)?;

        let collection = document_type.collection();
        let document = chunks[0].document.as_str();
        self.index
            .remove_stale(collection, application_id, document, chunks.len())
            .await
            .map_err(FileFailure::Storage)?;
        self.index
            .upsert(collection, &chunks, &embeddings)
            .await
            .map_err(FileFailure::Storage)?;

        Ok(chunks)
    }

    async fn sync_graph(
        &self,
        graph: &GraphLink,
        application_dir: &Path,
        chunks: &[Chunk],
        report: &mut IngestionReport,
    ) {
        let outcome = match graph.sync(chunks).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(path = %application_dir.display(), error = %error, "graph sync failed");
                report.record_failure(
                    application_dir.to_path_buf(),
                    FailureKind::Storage,
                    error.to_string(),
                );
                return;
            }
        };

        report.graph = Some(match (report.graph.take(), outcome) {
            (Some(GraphSync::Synced { relations: before }), GraphSync::Synced { relations }) => {
                GraphSync::Synced {
                    relations: before + relations,
                }
            }
            (_, outcome) => outcome,
        });
    }
}

/// Drops every chunk of the given collections. Never run implicitly by
/// ingestion.
pub async fn clear_collections(
    index: &dyn VectorIndex,
    collections: &[Collection],
) -> Result<(), StoreError> {
    for collection in collections {
        index.clear(*collection).await?;
        info!(collection = %collection, backend = index.backend(), "collection cleared");
    }
    Ok(())
}
