use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Resume,
    BankStatement,
    AssetsLiabilities,
    EmiratesId,
    CreditReport,
    EmploymentLetter,
    Other,
}

impl DocumentType {
    pub const ALL: [DocumentType; 7] = [
        DocumentType::Resume,
        DocumentType::BankStatement,
        DocumentType::AssetsLiabilities,
        DocumentType::EmiratesId,
        DocumentType::CreditReport,
        DocumentType::EmploymentLetter,
        DocumentType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Resume => "resume",
            DocumentType::BankStatement => "bank_statement",
            DocumentType::AssetsLiabilities => "assets_liabilities",
            DocumentType::EmiratesId => "emirates_id",
            DocumentType::CreditReport => "credit_report",
            DocumentType::EmploymentLetter => "employment_letter",
            DocumentType::Other => "other",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    /// Classifies a file by its stem: exact tags first, then the loose
    /// name heuristics applications were uploaded with.
    pub fn from_file_stem(stem: &str) -> Self {
        let lowered = stem.to_lowercase();
        if let Some(exact) = Self::from_tag(&lowered) {
            return exact;
        }

        if lowered.contains("bank") {
            DocumentType::BankStatement
        } else if lowered.contains("emirates")
            || lowered.contains("_id")
            || lowered.contains("id_")
        {
            DocumentType::EmiratesId
        } else if lowered.contains("employment") {
            DocumentType::EmploymentLetter
        } else if lowered.contains("resume") {
            DocumentType::Resume
        } else if lowered.contains("asset") || lowered.contains("liabilit") {
            DocumentType::AssetsLiabilities
        } else if lowered.contains("credit") {
            DocumentType::CreditReport
        } else {
            DocumentType::Other
        }
    }

    pub fn collection(self) -> Collection {
        match self {
            DocumentType::Resume => Collection::Resumes,
            DocumentType::CreditReport
            | DocumentType::BankStatement
            | DocumentType::AssetsLiabilities => Collection::IncomePatterns,
            DocumentType::EmploymentLetter | DocumentType::EmiratesId | DocumentType::Other => {
                Collection::ApplicationSummaries
            }
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Resumes,
    ApplicationSummaries,
    IncomePatterns,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Resumes,
        Collection::ApplicationSummaries,
        Collection::IncomePatterns,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Resumes => "resumes",
            Collection::ApplicationSummaries => "application_summaries",
            Collection::IncomePatterns => "income_patterns",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|collection| collection.name() == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub application_id: String,
    pub document_type: DocumentType,
    /// File name of the source document inside its application folder.
    pub document: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub source_path: String,
}

impl Chunk {
    pub fn collection(&self) -> Collection {
        self.document_type.collection()
    }

    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            application_id: self.application_id.clone(),
            document_type: self.document_type,
            document: self.document.clone(),
            collection: self.collection(),
            chunk_index: self.chunk_index,
            total_chunks: self.total_chunks,
            source_path: self.source_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub application_id: String,
    pub document_type: DocumentType,
    pub document: String,
    pub collection: Collection,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub source_path: String,
}

/// A nearest-neighbour hit as returned by a vector index, before ranking.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub chunk: Chunk,
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SearchQuery {
    pub text: String,
    pub application_id: Option<String>,
    pub top_k: usize,
    pub rerank: bool,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            application_id: None,
            top_k,
            rerank: true,
        }
    }

    pub fn for_application(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    pub fn without_rerank(mut self) -> Self {
        self.rerank = false;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub semantic_score: f64,
    pub keyword_score: f64,
    pub hybrid_score: f64,
    pub rerank_score: Option<f64>,
}

impl RetrievalResult {
    pub fn final_score(&self) -> f64 {
        self.rerank_score.unwrap_or(self.hybrid_score)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Extraction,
    Model,
    Storage,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Extraction => "extraction",
            FailureKind::Model => "model",
            FailureKind::Storage => "storage",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GraphSync {
    Synced { relations: usize },
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub applications: usize,
    pub files_discovered: usize,
    pub files_processed: usize,
    pub failed_extractions: usize,
    pub model_failures: usize,
    pub storage_failures: usize,
    pub skipped_unsupported: usize,
    pub chunks_by_type: BTreeMap<DocumentType, usize>,
    pub files_by_type: BTreeMap<DocumentType, usize>,
    pub failures: Vec<FailedFile>,
    pub collection_counts: BTreeMap<Collection, usize>,
    pub graph: Option<GraphSync>,
}

impl IngestionReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            applications: 0,
            files_discovered: 0,
            files_processed: 0,
            failed_extractions: 0,
            model_failures: 0,
            storage_failures: 0,
            skipped_unsupported: 0,
            chunks_by_type: BTreeMap::new(),
            files_by_type: BTreeMap::new(),
            failures: Vec::new(),
            collection_counts: BTreeMap::new(),
            graph: None,
        }
    }

    pub fn total_chunks(&self) -> usize {
        self.chunks_by_type.values().sum()
    }

    pub(crate) fn record_success(&mut self, document_type: DocumentType, chunks: usize) {
        self.files_processed += 1;
        *self.files_by_type.entry(document_type).or_default() += 1;
        *self.chunks_by_type.entry(document_type).or_default() += chunks;
    }

    pub(crate) fn record_failure(&mut self, path: PathBuf, kind: FailureKind, reason: String) {
        match kind {
            FailureKind::Extraction => self.failed_extractions += 1,
            FailureKind::Model => self.model_failures += 1,
            FailureKind::Storage => self.storage_failures += 1,
        }
        self.failures.push(FailedFile { path, kind, reason });
    }
}

impl Default for IngestionReport {
    fn default() -> Self {
        Self::new()
    }
}
