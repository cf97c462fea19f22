//! Error types for the job matching pipeline
//!
//! `MatchError` is what every public operation returns. Layer-specific
//! errors (vector math, artifact files, the SQLite store) convert into it so
//! callers can match on the taxonomy without knowing which layer failed.

use crate::storage::StoreError;
use crate::types::JobId;
use crate::vector::{ArtifactError, ClusteringError, VectorError};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for embedding, indexing and search operations
#[derive(Error, Debug)]
pub enum MatchError {
    /// Empty or malformed caller input
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Job {id} not found")]
    NotFound { id: JobId },

    #[error(
        "Not enough embedded postings to train the index: have {available}, need at least {required}"
    )]
    InsufficientData { available: usize, required: usize },

    #[error("An index build is already in progress")]
    BuildInProgress,

    #[error("No index has been built yet (looked in '{path}')")]
    IndexNotBuilt { path: PathBuf },

    #[error("Index at '{path}' is incompatible: {reason}")]
    IncompatibleIndex { path: PathBuf, reason: String },

    /// Model initialization or inference failures
    #[error("Embedding failed: {reason}")]
    Embedding { reason: String },

    #[error("Job store error: {0}")]
    Store(StoreError),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Index appears to be corrupted: {reason}")]
    IndexCorrupted { reason: String },

    /// Clustering or quantizer training could not produce a usable index
    #[error("Index training failed: {reason}")]
    TrainingFailed { reason: String },

    #[error("Index build was cancelled before the new index was published")]
    BuildCancelled,

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl MatchError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InsufficientData { .. } => "INSUFFICIENT_DATA",
            Self::BuildInProgress => "BUILD_IN_PROGRESS",
            Self::IndexNotBuilt { .. } => "INDEX_NOT_BUILT",
            Self::IncompatibleIndex { .. } => "INCOMPATIBLE_INDEX",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Store(_) => "STORE_ERROR",
            Self::Io { .. } => "IO_ERROR",
            Self::Serialization { .. } => "SERIALIZATION_ERROR",
            Self::IndexCorrupted { .. } => "INDEX_CORRUPTED",
            Self::TrainingFailed { .. } => "TRAINING_FAILED",
            Self::BuildCancelled => "BUILD_CANCELLED",
            Self::Config { .. } => "CONFIG_ERROR",
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::InvalidInput { .. } => vec!["Provide non-empty query text"],
            Self::InsufficientData { .. } => vec![
                "Import more postings and run 'jobmatch build' again",
                "Set index.kind = \"flat\" or \"auto\" to use exhaustive search for small corpora",
            ],
            Self::BuildInProgress => vec![
                "Wait for the running build to finish, then retry",
                "Searches keep using the previous index meanwhile",
            ],
            Self::IndexNotBuilt { .. } => vec!["Run 'jobmatch build' to create the index"],
            Self::IncompatibleIndex { .. } => vec![
                "Run 'jobmatch build' to rebuild the index with the current model",
                "Or set embedding.model back to the model the index was built with",
            ],
            Self::IndexCorrupted { .. } => vec![
                "Run 'jobmatch build' to rebuild from the job store",
                "Check for disk errors or filesystem corruption",
            ],
            Self::Embedding { .. } => vec![
                "Ensure you have internet connection for first-time model download",
                "Check embedding.cache_dir is writable",
            ],
            Self::TrainingFailed { .. } => vec![
                "Check that postings have varied descriptions",
                "Set index.kind = \"flat\" to skip clustering",
            ],
            Self::BuildCancelled => vec!["The previous index is still being served"],
            Self::Io { .. } => vec!["Check disk space and permissions in the index directory"],
            Self::Config { .. } => vec!["Run 'jobmatch config' to inspect the effective settings"],
            _ => vec![],
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Lifts an artifact error for the file at `path`.
    pub fn from_artifact(path: impl Into<PathBuf>, error: ArtifactError) -> Self {
        let path = path.into();
        match error {
            ArtifactError::Io(source) => Self::Io { path, source },
            ArtifactError::VersionMismatch { expected, actual } => Self::IncompatibleIndex {
                path,
                reason: format!("format version {actual}, expected {expected}"),
            },
            ArtifactError::Incompatible(reason) => Self::IncompatibleIndex { path, reason },
            ArtifactError::ChecksumMismatch => Self::IndexCorrupted {
                reason: format!("checksum mismatch in '{}'", path.display()),
            },
            ArtifactError::InvalidFormat(reason) => Self::IndexCorrupted {
                reason: format!("'{}': {reason}", path.display()),
            },
            ArtifactError::Vector(e) => Self::IndexCorrupted {
                reason: format!("'{}': {e}", path.display()),
            },
            ArtifactError::Encode(reason) => Self::Serialization { reason },
        }
    }
}

impl From<VectorError> for MatchError {
    fn from(error: VectorError) -> Self {
        match error {
            VectorError::EmbeddingFailed(reason) => Self::Embedding { reason },
            VectorError::ClusteringFailed(reason) => Self::TrainingFailed { reason },
            VectorError::Serialization(reason) => Self::Serialization { reason },
            VectorError::Inconsistent(reason) => Self::IndexCorrupted { reason },
            VectorError::Storage(source) => Self::Io {
                path: PathBuf::new(),
                source,
            },
            other @ (VectorError::DimensionMismatch { .. }
            | VectorError::InvalidDimension { .. }
            | VectorError::NonFinite) => Self::Embedding {
                reason: other.to_string(),
            },
            other @ (VectorError::InvalidScore { .. } | VectorError::VersionMismatch { .. }) => {
                Self::IndexCorrupted {
                    reason: other.to_string(),
                }
            }
        }
    }
}

impl From<StoreError> for MatchError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => Self::NotFound { id },
            StoreError::InvalidPosting { id, reason } => Self::InvalidInput {
                reason: format!("posting {id}: {reason}"),
            },
            other => Self::Store(other),
        }
    }
}

impl From<ClusteringError> for MatchError {
    fn from(error: ClusteringError) -> Self {
        Self::TrainingFailed {
            reason: error.to_string(),
        }
    }
}

/// Result type alias for job matching operations
pub type MatchResult<T> = Result<T, MatchError>;
