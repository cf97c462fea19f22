//! Query-time ranking against the published index.
//!
//! The matcher serves whichever artifact was published last. Searches clone
//! an `Arc` to it under a short read lock and then run lock-free, so a
//! rebuild publishing a new artifact never waits on, or blocks, a search.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::SearchConfig;
use crate::embedder::Embedder;
use crate::error::{MatchError, MatchResult};
use crate::storage::JobStore;
use crate::types::{JobId, JobMatch, PostingMatch, QueryResult, SearchPage};
use crate::vector::{IndexArtifact, IndexMetadata, VectorIndex};

pub struct Matcher {
    index_dir: PathBuf,
    store: Arc<JobStore>,
    embedder: Arc<Embedder>,
    nprobe: Option<usize>,
    candidate_multiplier: usize,
    current: RwLock<Option<Arc<IndexArtifact>>>,
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("index_dir", &self.index_dir)
            .field("nprobe", &self.nprobe)
            .field("loaded", &self.current.read().is_some())
            .finish()
    }
}

impl Matcher {
    pub fn new(
        index_dir: impl Into<PathBuf>,
        store: Arc<JobStore>,
        embedder: Arc<Embedder>,
        search: &SearchConfig,
    ) -> Self {
        Self {
            index_dir: index_dir.into(),
            store,
            embedder,
            nprobe: search.nprobe,
            candidate_multiplier: search.candidate_multiplier.max(1),
            current: RwLock::new(None),
        }
    }

    /// Ranks jobs for `query`, best first, at most `top_k` of them.
    ///
    /// Jobs deleted since the index was built are skipped and the next best
    /// candidates take their place.
    pub fn search(&self, query: &str, top_k: usize) -> MatchResult<QueryResult> {
        if top_k == 0 {
            return Err(MatchError::InvalidInput {
                reason: "top_k must be greater than zero".to_string(),
            });
        }
        if query.trim().is_empty() {
            return Err(MatchError::InvalidInput {
                reason: "query text is empty".to_string(),
            });
        }

        let artifact = self.artifact()?;
        let embedding = self.embedder.embed(query)?;
        let model_id = self.embedder.model_id()?;
        artifact
            .metadata()
            .check_compatible(&model_id, embedding.dimension().get())
            .map_err(|e| MatchError::from_artifact(self.artifact_path(), e))?;

        self.rank(&artifact, embedding.as_slice(), top_k)
    }

    /// One page of the `top_k` ranked results. Pages are 1-based.
    pub fn search_page(
        &self,
        query: &str,
        top_k: usize,
        page: usize,
        per_page: usize,
    ) -> MatchResult<SearchPage> {
        if page == 0 || per_page == 0 {
            return Err(MatchError::InvalidInput {
                reason: "page and per_page must be at least 1".to_string(),
            });
        }

        let ranked = self.search(query, top_k)?;
        let total = ranked.len();
        let results = ranked
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .collect();

        Ok(SearchPage {
            results,
            total,
            page,
            total_pages: total.div_ceil(per_page),
        })
    }

    /// Like [`Matcher::search`], with each hit resolved to its posting.
    pub fn search_postings(&self, query: &str, top_k: usize) -> MatchResult<Vec<PostingMatch>> {
        let ranked = self.search(query, top_k)?;
        let ids: Vec<JobId> = ranked.iter().map(|m| m.job_id).collect();
        let postings = self.store.get_postings(&ids)?;

        // get_postings keeps request order and drops ids deleted meanwhile
        let mut scores = ranked.into_iter();
        let mut resolved = Vec::with_capacity(postings.len());
        for posting in postings {
            if let Some(hit) = scores.find(|m| m.job_id == posting.job_id) {
                resolved.push(PostingMatch {
                    posting,
                    score: hit.score,
                });
            }
        }
        Ok(resolved)
    }

    /// Makes `artifact` the one served to subsequent searches.
    pub fn publish(&self, artifact: Arc<IndexArtifact>) {
        let ntotal = artifact.metadata().ntotal;
        *self.current.write() = Some(artifact);
        tracing::info!(target: "matcher", "serving new index with {ntotal} vectors");
    }

    /// Re-reads the artifact from disk, e.g. after another process rebuilt it.
    ///
    /// Returns `false` when no artifact exists; the current one stays served.
    pub fn reload(&self) -> MatchResult<bool> {
        match self.load_from_disk()? {
            Some(artifact) => {
                self.publish(artifact);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    /// Metadata of the served artifact, loading it if needed.
    pub fn metadata(&self) -> MatchResult<IndexMetadata> {
        Ok(self.artifact()?.metadata().clone())
    }

    fn artifact(&self) -> MatchResult<Arc<IndexArtifact>> {
        if let Some(artifact) = self.current.read().as_ref() {
            return Ok(Arc::clone(artifact));
        }

        let mut slot = self.current.write();
        if let Some(artifact) = slot.as_ref() {
            return Ok(Arc::clone(artifact));
        }
        let artifact = self
            .load_from_disk()?
            .ok_or_else(|| MatchError::IndexNotBuilt {
                path: self.index_dir.clone(),
            })?;
        *slot = Some(Arc::clone(&artifact));
        Ok(artifact)
    }

    fn load_from_disk(&self) -> MatchResult<Option<Arc<IndexArtifact>>> {
        let started = std::time::Instant::now();
        let loaded = IndexArtifact::load(&self.index_dir)
            .map_err(|e| MatchError::from_artifact(self.artifact_path(), e))?;

        Ok(loaded.map(|artifact| {
            tracing::debug!(
                target: "matcher",
                "loaded {} index ({} vectors) in {:.2?}",
                artifact.metadata().kind,
                artifact.metadata().ntotal,
                started.elapsed()
            );
            Arc::new(artifact)
        }))
    }

    fn artifact_path(&self) -> PathBuf {
        IndexArtifact::path_in(&self.index_dir)
    }

    /// Searches with a growing candidate window until `wanted` live jobs are
    /// found or the index is exhausted.
    fn rank(
        &self,
        artifact: &IndexArtifact,
        query: &[f32],
        wanted: usize,
    ) -> MatchResult<Vec<JobMatch>> {
        let index = artifact.index();
        let ntotal = index.ntotal();
        if ntotal == 0 {
            return Ok(Vec::new());
        }

        let nlist = index.nlist().max(1);
        let mut nprobe = self
            .nprobe
            .unwrap_or(artifact.metadata().default_nprobe)
            .clamp(1, nlist);
        let mut window = wanted
            .saturating_mul(self.candidate_multiplier)
            .clamp(wanted.min(ntotal), ntotal);

        loop {
            let neighbors = index.search(query, window, nprobe);
            let candidates: Vec<(JobId, JobMatch)> = neighbors
                .iter()
                .filter_map(|neighbor| {
                    let job_id = artifact.mapping().resolve(neighbor.position)?;
                    Some((
                        job_id,
                        JobMatch {
                            job_id,
                            score: neighbor.score,
                        },
                    ))
                })
                .collect();

            let ids: Vec<JobId> = candidates.iter().map(|(id, _)| *id).collect();
            let live: HashSet<JobId> = self.store.existing_ids(&ids)?;
            let mut matches: Vec<JobMatch> = candidates
                .into_iter()
                .filter(|(id, _)| live.contains(id))
                .map(|(_, hit)| hit)
                .collect();

            let exhausted = window >= ntotal && nprobe >= nlist;
            if matches.len() >= wanted || exhausted {
                let stale = ids.len() - matches.len();
                if stale > 0 {
                    tracing::warn!(
                        target: "matcher",
                        "skipped {stale} indexed jobs no longer in the store"
                    );
                }
                matches.sort_by(|a, b| {
                    b.score
                        .cmp(&a.score)
                        .then_with(|| a.job_id.cmp(&b.job_id))
                });
                matches.truncate(wanted);
                return Ok(matches);
            }

            window = window.saturating_mul(2).min(ntotal);
            nprobe = nprobe.saturating_mul(2).min(nlist);
            tracing::debug!(
                target: "matcher",
                "backfilling: window={window}, nprobe={nprobe}"
            );
        }
    }
}
