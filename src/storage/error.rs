use crate::types::JobId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job {0} does not exist")]
    NotFound(JobId),

    #[error("Invalid posting {id}: {reason}")]
    InvalidPosting { id: JobId, reason: String },

    #[error(
        "Embedding dimension {actual} does not match stored embeddings of dimension {expected}\nSuggestion: Run 'jobmatch embed --reset' after switching models"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid database value: {0}")]
    InvalidDbValue(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
