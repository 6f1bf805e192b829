use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    Pdf(String),

    #[error("spreadsheet parse error: {0}")]
    Spreadsheet(String),

    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported text encoding in {0}")]
    Encoding(PathBuf),

    #[error("no extractable text in {0}")]
    NoText(PathBuf),

    #[error("no OCR engine available: {0}")]
    OcrUnavailable(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("OCR by {program} did not finish within {after:?}")]
    OcrTimeout { program: String, after: Duration },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model {model} is unavailable: {details}")]
    Unavailable { model: String, details: String },

    #[error("model {model} did not answer within {after:?}")]
    Timeout { model: String, after: Duration },

    #[error("invalid response from model {model}: {details}")]
    InvalidResponse { model: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ModelError {
    pub fn unavailable(model: impl Into<String>, details: impl ToString) -> Self {
        Self::Unavailable {
            model: model.into(),
            details: details.to_string(),
        }
    }

    pub fn invalid_response(model: impl Into<String>, details: impl ToString) -> Self {
        Self::InvalidResponse {
            model: model.into(),
            details: details.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("collection {collection} expects {expected} dimensions, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("store not available: {0}")]
    Unavailable(String),

    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("documents root does not exist or is not a directory: {0}")]
    MissingRoot(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("another ingestion run holds the lock at {0}")]
    Busy(PathBuf),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
