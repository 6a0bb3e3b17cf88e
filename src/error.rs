use std::path::PathBuf;

use crate::extract::DocumentKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("failed to fetch model files: {0}")]
    ModelDownload(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("text extraction failed ({kind})")]
    ExtractionFailed { kind: DocumentKind },

    #[error("no valid text content ({kind})")]
    NoValidContent { kind: DocumentKind },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "vectors for material {material_id} were indexed but its metadata could not be written: {source}"
    )]
    PartialPersistFailure {
        material_id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("vector index is corrupt: {0}")]
    CorruptIndex(String),

    #[error("retrieval state lock poisoned")]
    LockPoisoned,
}

impl Error {
    /// Failures of a single ingestion call that are reported back to the
    /// caller as a failed outcome instead of aborting the process.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ExtractionFailed { .. }
                | Error::NoValidContent { .. }
                | Error::Embedding(_)
                | Error::DimensionMismatch { .. }
                | Error::PartialPersistFailure { .. }
        )
    }
}
