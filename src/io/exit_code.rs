//! Exit codes for CLI operations following Unix conventions.
//!
//! # Exit Code Semantics
//!
//! - `0`: Success - operation completed (an empty result is still a success for builds)
//! - `1`: General error - unspecified failure
//! - `2`: Blocking error - critical failure that should halt automation
//! - `3-125`: Specific recoverable errors
//! - `126-255`: Reserved by shell

use crate::error::MatchError;

/// Standard exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Operation succeeded (code 0)
    Success = 0,

    /// Unspecified error occurred (code 1)
    GeneralError = 1,

    /// Critical error that should halt automation (code 2)
    BlockingError = 2,

    /// Job not found, or a search matched nothing (code 3)
    NotFound = 3,

    /// Empty query or malformed postings file (code 4)
    InvalidInput = 4,

    /// File I/O error (code 5)
    IoError = 5,

    /// Configuration error (code 6)
    ConfigError = 6,

    /// Index missing, corrupted or built with another model (code 7)
    IndexUnavailable = 7,

    /// Another build holds the index (code 8)
    Busy = 8,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl ExitCode {
    /// Exit code for a search: `NotFound` when nothing matched.
    pub fn from_results<T>(results: &[T]) -> Self {
        if results.is_empty() {
            ExitCode::NotFound
        } else {
            ExitCode::Success
        }
    }

    /// Convert a `MatchError` to the appropriate exit code.
    ///
    /// Maps specific error types to semantic exit codes that scripts
    /// can use to determine appropriate recovery actions.
    pub fn from_error(error: &MatchError) -> Self {
        match error {
            MatchError::NotFound { .. } => ExitCode::NotFound,

            MatchError::InvalidInput { .. } | MatchError::InsufficientData { .. } => {
                ExitCode::InvalidInput
            }

            MatchError::Io { .. } => ExitCode::IoError,
            MatchError::Config { .. } => ExitCode::ConfigError,

            MatchError::IndexNotBuilt { .. }
            | MatchError::IncompatibleIndex { .. }
            | MatchError::IndexCorrupted { .. } => ExitCode::IndexUnavailable,

            MatchError::BuildInProgress => ExitCode::Busy,

            // The store itself is unusable
            MatchError::Store(_) => ExitCode::BlockingError,

            _ => ExitCode::GeneralError,
        }
    }

    /// Check if this exit code indicates a blocking error.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, ExitCode::BlockingError)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }

    /// Get a human-readable description of the exit code.
    pub fn description(&self) -> &str {
        match self {
            ExitCode::Success => "Success",
            ExitCode::GeneralError => "General error",
            ExitCode::BlockingError => "Blocking error - automation should halt",
            ExitCode::NotFound => "Not found",
            ExitCode::InvalidInput => "Invalid input",
            ExitCode::IoError => "I/O error",
            ExitCode::ConfigError => "Configuration error",
            ExitCode::IndexUnavailable => "Index unavailable",
            ExitCode::Busy => "Build in progress",
        }
    }
}
