//! Everything the CLI reads and prints.
//!
//! Postings files and query text come in through [`input`]. Results leave
//! through [`OutputManager`], as text or the [`JsonResponse`] envelope,
//! and every outcome maps to an [`ExitCode`].

pub mod exit_code;
pub mod format;
pub mod input;
pub mod output;

pub use exit_code::ExitCode;
pub use format::{ErrorDetails, JsonResponse, OutputFormat, ResponseMeta, ResponseStatus};
pub use input::{read_postings, read_query_file};
pub use output::OutputManager;
