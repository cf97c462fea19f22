//! Build phases and the summary a build reports

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::types::JobId;
use crate::vector::IndexKind;

/// Where a running build currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    /// Clearing embeddings written by a different model
    Reconciling,
    Embedding { done: usize, total: usize },
    Training { vectors: usize, clusters: usize },
    Adding { vectors: usize },
    Persisting,
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reconciling => write!(f, "Checking stored embeddings"),
            Self::Embedding { done, total } => write!(f, "Embedding postings {done}/{total}"),
            Self::Training { vectors, clusters } => {
                write!(f, "Training {clusters} clusters on {vectors} vectors")
            }
            Self::Adding { vectors } => write!(f, "Adding {vectors} vectors"),
            Self::Persisting => write!(f, "Writing index"),
        }
    }
}

/// Statistics collected during a build
#[derive(Debug, Default, Clone, Serialize)]
pub struct BuildReport {
    /// Postings that received a new embedding in this run
    pub postings_embedded: usize,

    /// Postings skipped because embedding them failed
    pub embedding_failures: usize,

    /// Vectors in the published index
    pub total_indexed: usize,

    pub kind: Option<IndexKind>,

    /// Coarse clusters; 0 for flat indexes
    pub clusters: usize,

    pub duration: Duration,

    /// First failures, as (job id, reason)
    pub failures: Vec<(JobId, String)>,

    #[serde(skip)]
    start_time: Option<Instant>,
}

impl BuildReport {
    /// Create a report and start timing
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Stop timing and record elapsed time
    pub fn stop_timing(&mut self) {
        if let Some(start) = self.start_time {
            self.duration = start.elapsed();
            self.start_time = None;
        }
    }

    /// Record a skipped posting (reasons kept for the first 100)
    pub fn add_failure(&mut self, id: JobId, reason: String) {
        if self.failures.len() < 100 {
            self.failures.push((id, reason));
        }
        self.embedding_failures += 1;
    }
}
