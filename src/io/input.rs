//! Reading postings files and query text for the CLI.

use std::path::Path;

use serde::Deserialize;

use crate::error::{MatchError, MatchResult};
use crate::types::NewJobPosting;

/// Accepted shapes of a postings file.
#[derive(Deserialize)]
#[serde(untagged)]
enum PostingsFile {
    List(Vec<NewJobPosting>),
    Wrapped { jobs: Vec<NewJobPosting> },
}

/// Reads postings from a JSON file.
///
/// The file holds either an array of postings or `{"jobs": [...]}`.
pub fn read_postings(path: &Path) -> MatchResult<Vec<NewJobPosting>> {
    let content = std::fs::read_to_string(path).map_err(|e| MatchError::io(path, e))?;
    let parsed: PostingsFile =
        serde_json::from_str(&content).map_err(|e| MatchError::InvalidInput {
            reason: format!("{}: {e}", path.display()),
        })?;

    Ok(match parsed {
        PostingsFile::List(jobs) | PostingsFile::Wrapped { jobs } => jobs,
    })
}

/// Reads plain query text, such as an already extracted resume.
pub fn read_query_file(path: &Path) -> MatchResult<String> {
    let text = std::fs::read_to_string(path).map_err(|e| MatchError::io(path, e))?;
    if text.trim().is_empty() {
        return Err(MatchError::InvalidInput {
            reason: format!("{} contains no text", path.display()),
        });
    }
    Ok(text)
}
