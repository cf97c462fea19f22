//! Dense-vector job matching.
//!
//! Postings live in a SQLite store together with their embeddings. A build
//! trains an IVF-PQ index over every stored embedding and writes it, with
//! the position to job id mapping, as one artifact. The matcher embeds free
//! text and ranks jobs against whichever artifact was published last.

pub mod config;
pub mod display;
pub mod embedder;
pub mod error;
pub mod indexing;
pub mod io;
pub mod logging;
pub mod matcher;
pub mod service;
pub mod storage;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use embedder::{Embedder, EmbedderOptions, GeneratorFactory};
pub use error::{MatchError, MatchResult};
pub use indexing::{BuildPhase, BuildReport, IndexBuilder};
pub use matcher::Matcher;
pub use service::JobSearchService;
pub use storage::{JobStore, StoreError, StoreResult, UpsertOutcome};
pub use types::{
    JobId, JobMatch, JobPosting, NewJobPosting, PostingMatch, QueryResult, SearchPage,
};
pub use vector::{
    Embedding, EmbeddingGenerator, IndexArtifact, IndexKind, IndexMetadata, PositionMapping,
    Score, VectorDimension, VectorError,
};
