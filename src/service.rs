//! The assembled pipeline: store, embedder, builder and matcher.
//!
//! `JobSearchService` is what the binary (or an embedding application)
//! constructs once and shares. It owns the single-writer rule for builds:
//! at most one build or embedding pass runs at a time, and a second attempt
//! fails immediately with `BuildInProgress`. Builds embed through a
//! detached [`Embedder`], leaving the shared one free for queries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::Settings;
use crate::embedder::Embedder;
use crate::error::{MatchError, MatchResult};
use crate::indexing::{BuildPhase, BuildReport, IndexBuilder};
use crate::matcher::Matcher;
use crate::storage::JobStore;
use crate::types::{PostingMatch, QueryResult, SearchPage};

pub struct JobSearchService {
    settings: Settings,
    store: Arc<JobStore>,
    embedder: Arc<Embedder>,
    matcher: Matcher,
    building: AtomicBool,
    cancel: Arc<AtomicBool>,
}

impl std::fmt::Debug for JobSearchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSearchService")
            .field("embedder", &self.embedder)
            .field("matcher", &self.matcher)
            .field("building", &self.is_building())
            .finish()
    }
}

/// Clears the build flag when the build ends, however it ends.
struct BuildGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl JobSearchService {
    /// Opens the store and prepares a lazily loaded fastembed embedder.
    pub fn open(settings: Settings) -> MatchResult<Self> {
        settings
            .validate()
            .map_err(|reason| MatchError::Config { reason })?;

        let store = JobStore::open(settings.database_path())?;
        let embedder = Embedder::from_config(&settings.embedding, settings.model_cache_dir())?;
        Ok(Self::with_components(
            settings,
            Arc::new(store),
            Arc::new(embedder),
        ))
    }

    /// Assembles a service from existing parts.
    pub fn with_components(settings: Settings, store: Arc<JobStore>, embedder: Arc<Embedder>) -> Self {
        let matcher = Matcher::new(
            settings.index_dir(),
            Arc::clone(&store),
            Arc::clone(&embedder),
            &settings.search,
        );
        Self {
            settings,
            store,
            embedder,
            matcher,
            building: AtomicBool::new(false),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Ranked jobs for free text from any source (typed query, extracted resume).
    pub fn search_jobs(&self, query_text: &str, top_k: usize) -> MatchResult<QueryResult> {
        self.matcher.search(query_text, top_k)
    }

    /// One page of the `search.max_results` best matches. Pages are 1-based.
    pub fn search_page(
        &self,
        query_text: &str,
        page: usize,
        per_page: usize,
    ) -> MatchResult<SearchPage> {
        self.matcher
            .search_page(query_text, self.settings.search.max_results, page, per_page)
    }

    pub fn search_postings(&self, query_text: &str, top_k: usize) -> MatchResult<Vec<PostingMatch>> {
        self.matcher.search_postings(query_text, top_k)
    }

    /// Full rebuild; the new index is served as soon as it is written.
    pub fn rebuild_index(&self) -> MatchResult<BuildReport> {
        self.run_build(None::<fn(BuildPhase)>)
    }

    pub fn rebuild_index_with_progress(
        &self,
        progress: impl Fn(BuildPhase) + Send + Sync + 'static,
    ) -> MatchResult<BuildReport> {
        self.run_build(Some(progress))
    }

    /// Embeds postings missing an embedding without building an index.
    pub fn embed_missing(&self) -> MatchResult<BuildReport> {
        let _guard = self.begin_build()?;
        let mut report = BuildReport::new();

        let embedder = self.embedder.detached();
        let model_id = embedder.model_id()?;
        self.store.clear_embeddings_not_from(&model_id)?;
        self.builder()
            .embed_missing(&self.store, &embedder, &model_id, &mut report)?;

        report.stop_timing();
        Ok(report)
    }

    /// Drops every stored embedding so the next pass re-embeds all postings.
    pub fn reset_embeddings(&self) -> MatchResult<usize> {
        let _guard = self.begin_build()?;
        let cleared = self.store.clear_embeddings()?;
        tracing::info!(target: "service", "cleared {cleared} stored embeddings");
        Ok(cleared)
    }

    pub fn is_building(&self) -> bool {
        self.building.load(Ordering::SeqCst)
    }

    /// Asks a running build to stop before it publishes anything.
    pub fn cancel_build(&self) {
        if self.is_building() {
            self.cancel.store(true, Ordering::SeqCst);
            tracing::info!(target: "service", "build cancellation requested");
        }
    }

    /// Releases the embedding model; it reloads on next use.
    pub fn shutdown(&self) {
        self.embedder.shutdown();
    }

    fn run_build<F>(&self, progress: Option<F>) -> MatchResult<BuildReport>
    where
        F: Fn(BuildPhase) + Send + Sync + 'static,
    {
        let _guard = self.begin_build()?;

        let mut builder = self.builder();
        if let Some(progress) = progress {
            builder = builder.with_progress(progress);
        }

        // own model instance; dropped with the build
        let embedder = self.embedder.detached();
        let (artifact, report) = builder.build(&self.store, &embedder)?;
        self.matcher.publish(artifact);
        Ok(report)
    }

    fn builder(&self) -> IndexBuilder {
        IndexBuilder::new(self.settings.index.clone(), self.settings.index_dir())
            .with_batch_size(self.settings.embedding.batch_size)
            .with_cancel_flag(Arc::clone(&self.cancel))
    }

    fn begin_build(&self) -> MatchResult<BuildGuard<'_>> {
        self.building
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| MatchError::BuildInProgress)?;
        self.cancel.store(false, Ordering::SeqCst);
        Ok(BuildGuard {
            flag: &self.building,
        })
    }
}
