//! Domain types shared by the store, the index builder and the matcher.

use crate::vector::{Embedding, Score};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Identifier of a job posting, as assigned by the upstream job source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

/// A job posting as stored.
///
/// `embedding` is `None` until the posting has been embedded, and is cleared
/// again whenever its description changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    pub job_id: JobId,
    pub title: String,
    pub company: String,
    pub description: String,
    pub location: Option<String>,
    pub salary_range: Option<String>,
    pub job_type: Option<String>,
    pub post_date: Option<String>,
    pub url: Option<String>,
    #[serde(skip)]
    pub embedding: Option<Embedding>,
}

impl JobPosting {
    /// First `max_chars` characters of the description, with an ellipsis when cut.
    pub fn description_preview(&self, max_chars: usize) -> String {
        let mut chars = self.description.chars();
        let preview: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{}...", preview.trim_end())
        } else {
            preview
        }
    }
}

/// Input record for inserting or updating a posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJobPosting {
    pub job_id: JobId,
    pub title: String,
    #[serde(default)]
    pub company: String,
    pub description: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub salary_range: Option<String>,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub post_date: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl NewJobPosting {
    /// Minimal posting with only the required fields.
    pub fn new(job_id: i64, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            job_id: JobId::new(job_id),
            title: title.into(),
            company: String::new(),
            description: description.into(),
            location: None,
            salary_range: None,
            job_type: None,
            post_date: None,
            url: None,
        }
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = company.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// One ranked hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JobMatch {
    pub job_id: JobId,
    pub score: Score,
}

/// Ranked hits, best first, at most `top_k` long.
pub type QueryResult = Vec<JobMatch>;

/// One page of a paged search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchPage {
    pub results: Vec<JobMatch>,
    /// Number of ranked results the pages are cut from.
    pub total: usize,
    /// 1-based page number.
    pub page: usize,
    pub total_pages: usize,
}

/// A hit resolved to its full posting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostingMatch {
    pub posting: JobPosting,
    pub score: Score,
}
