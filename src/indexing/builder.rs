//! Full index rebuilds from the job store.
//!
//! A build embeds whatever postings lack an embedding, trains an IVF-PQ
//! index (or a flat one) over every stored embedding, and writes the index
//! and its position mapping as a single artifact. Nothing on disk changes
//! until the final atomic replace, so a failed or cancelled build leaves the
//! previous artifact in place.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::{IndexConfig, IndexKindSetting};
use crate::embedder::Embedder;
use crate::error::{MatchError, MatchResult};
use crate::indexing::progress::{BuildPhase, BuildReport};
use crate::storage::{JobStore, StoreError};
use crate::types::{JobId, JobPosting};
use crate::vector::{
    AnnIndex, Embedding, FORMAT_VERSION, FlatIndex, IndexArtifact, IndexKind, IndexMetadata,
    IvfPqIndex, IvfPqParams, MAX_CODEBOOK_SIZE, PositionMapping, VectorDimension, VectorIndex,
    subquantizer_count,
};

type ProgressFn = Box<dyn Fn(BuildPhase) + Send + Sync>;

/// Shape of the index a build is about to train.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingPlan {
    pub nlist: usize,
    pub sample_size: usize,
    pub subquantizers: usize,
    pub codebook_size: usize,
}

impl TrainingPlan {
    /// Derives cluster and quantizer sizes for `n` vectors of `dimension`.
    pub fn for_corpus(n: usize, dimension: usize, config: &IndexConfig) -> Self {
        let sample_size = n.min(config.max_training_sample.max(1));
        let nlist = (n / config.vectors_per_cluster.max(1))
            .clamp(config.min_clusters, config.max_clusters)
            .min(sample_size)
            .max(1);
        let subquantizers = subquantizer_count(dimension, config.subquantizers);
        let wanted = 1usize << config.quantization_bits.min(8);
        let codebook_size = wanted.min(MAX_CODEBOOK_SIZE).min(sample_size).max(1);

        Self {
            nlist,
            sample_size,
            subquantizers,
            codebook_size,
        }
    }
}

pub struct IndexBuilder {
    config: IndexConfig,
    index_dir: PathBuf,
    batch_size: usize,
    cancel: Arc<AtomicBool>,
    progress: Option<ProgressFn>,
}

impl std::fmt::Debug for IndexBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBuilder")
            .field("config", &self.config)
            .field("index_dir", &self.index_dir)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl IndexBuilder {
    pub fn new(config: IndexConfig, index_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            index_dir: index_dir.into(),
            batch_size: 32,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    /// Postings embedded per model call.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Shares a cancellation flag, checked between build phases.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: impl Fn(BuildPhase) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn index_dir(&self) -> &std::path::Path {
        &self.index_dir
    }

    /// Runs a full rebuild and writes the artifact.
    ///
    /// Returns the new artifact so an in-process matcher can publish it
    /// without reading it back.
    pub fn build(
        &self,
        store: &JobStore,
        embedder: &Embedder,
    ) -> MatchResult<(Arc<IndexArtifact>, BuildReport)> {
        let mut report = BuildReport::new();
        tracing::info!(target: "indexing", "index build started");

        let generator = embedder.init()?;
        let model_id = generator.model_id().to_string();
        let dimension = generator.dimension();

        self.report(BuildPhase::Reconciling);
        let cleared = store.clear_embeddings_not_from(&model_id)?;
        if cleared > 0 {
            tracing::info!(
                target: "indexing",
                "cleared {cleared} embeddings written by another model"
            );
        }
        self.check_cancelled()?;

        self.embed_missing(store, embedder, &model_id, &mut report)?;
        self.check_cancelled()?;

        let stored = store.get_all_embeddings()?;
        let n = stored.len();
        let kind = self.resolve_kind(n)?;

        let mut job_ids = Vec::with_capacity(n);
        let mut vectors = Vec::with_capacity(n);
        for (job_id, embedding) in stored {
            dimension.validate_vector(embedding.as_slice())?;
            job_ids.push(job_id);
            vectors.push(embedding.normalized().into_vec());
        }

        let (index, plan) = match kind {
            IndexKind::Flat => {
                self.report(BuildPhase::Adding { vectors: n });
                let mut flat = FlatIndex::new(dimension);
                flat.add(&vectors)?;
                (AnnIndex::Flat(flat), None)
            }
            IndexKind::IvfPq => {
                let (index, plan) = self.train_ivfpq(&vectors, dimension)?;
                (AnnIndex::IvfPq(index), Some(plan))
            }
        };
        self.check_cancelled()?;

        let metadata = IndexMetadata {
            format_version: FORMAT_VERSION,
            model_id,
            dimension: dimension.get(),
            kind,
            number_of_clusters: index.nlist(),
            training_sample_size: plan.map_or(0, |p| p.sample_size),
            quantization_bits: plan.map_or(0, |_| self.config.quantization_bits),
            subquantizers: plan.map_or(0, |p| p.subquantizers),
            codebook_size: plan.map_or(0, |p| p.codebook_size),
            ntotal: index.ntotal(),
            default_nprobe: plan.map_or(1, |p| p.nlist.min(self.config.default_nprobe).max(1)),
            normalized: true,
            built_at: chrono::Utc::now().to_rfc3339(),
        };

        let path = IndexArtifact::path_in(&self.index_dir);
        let artifact = IndexArtifact::new(metadata, index, PositionMapping::new(job_ids))
            .map_err(|e| MatchError::from_artifact(&path, e))?;

        // last point where cancelling leaves the previous artifact untouched
        self.check_cancelled()?;
        self.report(BuildPhase::Persisting);
        artifact
            .persist(&self.index_dir)
            .map_err(|e| MatchError::from_artifact(&path, e))?;

        report.total_indexed = artifact.metadata().ntotal;
        report.kind = Some(kind);
        report.clusters = artifact.metadata().number_of_clusters;
        report.stop_timing();

        tracing::info!(
            target: "indexing",
            "index build finished: {} vectors, kind {kind}, {} clusters in {:.2?}",
            report.total_indexed,
            report.clusters,
            report.duration
        );
        Ok((Arc::new(artifact), report))
    }

    /// Embeds postings that have no stored embedding.
    ///
    /// Postings whose embedding fails are skipped and counted; postings
    /// deleted while the batch was in flight are ignored.
    pub fn embed_missing(
        &self,
        store: &JobStore,
        embedder: &Embedder,
        model_id: &str,
        report: &mut BuildReport,
    ) -> MatchResult<()> {
        let pending = store.get_postings_missing_embeddings()?;
        let total = pending.len();
        if total == 0 {
            return Ok(());
        }
        tracing::info!(target: "indexing", "embedding {total} postings");

        let mut done = 0;
        for batch in pending.chunks(self.batch_size) {
            self.check_cancelled()?;

            for (posting, result) in batch.iter().zip(embed_postings(embedder, batch)) {
                let embedding = match result {
                    Ok(embedding) => embedding,
                    Err(e) => {
                        tracing::warn!(
                            target: "indexing",
                            "skipping job {}: {e}",
                            posting.job_id
                        );
                        report.add_failure(posting.job_id, e.to_string());
                        continue;
                    }
                };

                match store.save_embedding(posting.job_id, &embedding, model_id) {
                    Ok(()) => report.postings_embedded += 1,
                    Err(StoreError::NotFound(id)) => {
                        tracing::debug!(target: "indexing", "job {id} deleted during embedding");
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            done += batch.len();
            tracing::debug!(target: "indexing", "embedded {done}/{total}");
            self.report(BuildPhase::Embedding { done, total });
        }
        Ok(())
    }

    fn resolve_kind(&self, n: usize) -> MatchResult<IndexKind> {
        let required = self.config.min_training_vectors;
        if n == 0 {
            return Err(MatchError::InsufficientData {
                available: 0,
                required: match self.config.kind {
                    IndexKindSetting::Flat | IndexKindSetting::Auto => 1,
                    IndexKindSetting::Ivfpq => required,
                },
            });
        }

        match self.config.kind {
            IndexKindSetting::Flat => Ok(IndexKind::Flat),
            IndexKindSetting::Ivfpq if n < required => Err(MatchError::InsufficientData {
                available: n,
                required,
            }),
            IndexKindSetting::Ivfpq => Ok(IndexKind::IvfPq),
            IndexKindSetting::Auto if n < required => {
                tracing::info!(
                    target: "indexing",
                    "{n} embeddings is below the IVF-PQ threshold of {required}, building a flat index"
                );
                Ok(IndexKind::Flat)
            }
            IndexKindSetting::Auto => Ok(IndexKind::IvfPq),
        }
    }

    fn train_ivfpq(
        &self,
        vectors: &[Vec<f32>],
        dimension: VectorDimension,
    ) -> MatchResult<(IvfPqIndex, TrainingPlan)> {
        let plan = TrainingPlan::for_corpus(vectors.len(), dimension.get(), &self.config);

        let wanted = 1usize << self.config.quantization_bits.min(8);
        if plan.codebook_size < wanted {
            tracing::warn!(
                target: "indexing",
                "codebook size clamped from {wanted} to {} by the training sample",
                plan.codebook_size
            );
        }

        let training = self.training_sample(vectors, plan.sample_size);
        self.report(BuildPhase::Training {
            vectors: training.len(),
            clusters: plan.nlist,
        });
        tracing::info!(
            target: "indexing",
            "training IVF-PQ: nlist={}, m={}, ksub={}, sample={}",
            plan.nlist,
            plan.subquantizers,
            plan.codebook_size,
            training.len()
        );

        let params = IvfPqParams {
            nlist: plan.nlist,
            subquantizers: plan.subquantizers,
            codebook_size: plan.codebook_size,
            max_iterations: self.config.kmeans_iterations,
            seed: self.config.seed,
        };
        let mut index = IvfPqIndex::train(&training, &params)?;
        self.check_cancelled()?;

        self.report(BuildPhase::Adding {
            vectors: vectors.len(),
        });
        index.add(vectors)?;
        Ok((index, plan))
    }

    /// Seeded random subset when the corpus exceeds the sample cap.
    fn training_sample(&self, vectors: &[Vec<f32>], sample_size: usize) -> Vec<Vec<f32>> {
        if sample_size >= vectors.len() {
            return vectors.to_vec();
        }
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut picked = rand::seq::index::sample(&mut rng, vectors.len(), sample_size).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| vectors[i].clone()).collect()
    }

    fn check_cancelled(&self) -> MatchResult<()> {
        if self.cancel.load(Ordering::SeqCst) {
            tracing::info!(target: "indexing", "build cancelled");
            return Err(MatchError::BuildCancelled);
        }
        Ok(())
    }

    fn report(&self, phase: BuildPhase) {
        if let Some(progress) = &self.progress {
            progress(phase);
        }
    }
}

/// Embeds a batch of postings, isolating per-posting failures.
///
/// The whole batch goes to the model at once; if that fails, each posting
/// is retried alone so one bad description does not sink its neighbours.
fn embed_postings(embedder: &Embedder, batch: &[JobPosting]) -> Vec<MatchResult<Embedding>> {
    let texts: Vec<&str> = batch.iter().map(|p| p.description.as_str()).collect();
    match embedder.embed_batch(&texts) {
        Ok(embeddings) => embeddings.into_iter().map(Ok).collect(),
        Err(e) => {
            tracing::debug!(target: "indexing", "batch embedding failed ({e}), retrying one by one");
            texts.iter().map(|text| embedder.embed(text)).collect()
        }
    }
}

/// Ids covered by an artifact, sorted, for comparing builds.
pub fn indexed_job_ids(artifact: &IndexArtifact) -> Vec<JobId> {
    let mut ids = artifact.mapping().job_ids().to_vec();
    ids.sort_unstable();
    ids
}
