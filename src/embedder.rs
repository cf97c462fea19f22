//! Text to normalized embedding, with an init-once model lifecycle.
//!
//! The embedder owns a factory rather than a model. The model is created on
//! first use (or an explicit [`Embedder::init`]) and shared by every caller
//! until [`Embedder::shutdown`] drops it; the next call loads it again.
//! [`Embedder::detached`] gives a second embedder over the same factory with
//! its own model instance, so builds and queries never share one.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{EmbeddingConfig, LongTextStrategy};
use crate::error::{MatchError, MatchResult};
use crate::vector::{
    Embedding, EmbeddingGenerator, FastEmbedGenerator, FastEmbedOptions, VectorDimension,
    VectorError, parse_embedding_model,
};

/// Creates the embedding backend on demand.
pub type GeneratorFactory =
    Arc<dyn Fn() -> Result<Arc<dyn EmbeddingGenerator>, VectorError> + Send + Sync>;

/// Input handling options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedderOptions {
    pub long_text: LongTextStrategy,
    pub chunk_chars: usize,
    pub batch_size: usize,
}

impl Default for EmbedderOptions {
    fn default() -> Self {
        Self {
            long_text: LongTextStrategy::Truncate,
            chunk_chars: 512,
            batch_size: 32,
        }
    }
}

impl From<&EmbeddingConfig> for EmbedderOptions {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            long_text: config.long_text,
            chunk_chars: config.chunk_chars.max(1),
            batch_size: config.batch_size.max(1),
        }
    }
}

pub struct Embedder {
    factory: GeneratorFactory,
    generator: Mutex<Option<Arc<dyn EmbeddingGenerator>>>,
    options: EmbedderOptions,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("loaded", &self.is_loaded())
            .field("options", &self.options)
            .finish()
    }
}

impl Embedder {
    pub fn new(factory: GeneratorFactory, options: EmbedderOptions) -> Self {
        Self {
            factory,
            generator: Mutex::new(None),
            options,
        }
    }

    /// A fresh, unloaded embedder sharing this one's factory and options.
    ///
    /// The detached embedder loads its own generator, so a batch running
    /// through it never holds the model lock a query is waiting on. Note that
    /// [`Embedder::with_generator`] factories hand back the same instance.
    pub fn detached(&self) -> Self {
        Self::new(Arc::clone(&self.factory), self.options)
    }

    /// Embedder over an already constructed generator.
    pub fn with_generator(generator: Arc<dyn EmbeddingGenerator>, options: EmbedderOptions) -> Self {
        Self::new(Arc::new(move || Ok(Arc::clone(&generator))), options)
    }

    /// Embedder backed by fastembed as configured.
    ///
    /// The model name is validated now; the model itself loads lazily.
    pub fn from_config(config: &EmbeddingConfig, cache_dir: std::path::PathBuf) -> MatchResult<Self> {
        let model = parse_embedding_model(&config.model).map_err(|e| MatchError::Config {
            reason: e.to_string(),
        })?;
        let fastembed_options = FastEmbedOptions {
            cache_dir,
            max_length: config.max_length,
            show_download_progress: config.show_download_progress,
        };

        let factory: GeneratorFactory = Arc::new(move || {
            let generator = FastEmbedGenerator::with_fallback(model.clone(), &fastembed_options)?;
            Ok(Arc::new(generator) as Arc<dyn EmbeddingGenerator>)
        });
        Ok(Self::new(factory, EmbedderOptions::from(config)))
    }

    /// Loads the model if it is not resident yet. Idempotent.
    pub fn init(&self) -> MatchResult<Arc<dyn EmbeddingGenerator>> {
        let mut slot = self.generator.lock();
        if let Some(generator) = slot.as_ref() {
            return Ok(Arc::clone(generator));
        }

        let started = std::time::Instant::now();
        let generator = (self.factory)()?;
        tracing::info!(
            target: "embedder",
            "loaded model {} (dimension {}) in {:.2?}",
            generator.model_id(),
            generator.dimension(),
            started.elapsed()
        );
        *slot = Some(Arc::clone(&generator));
        Ok(generator)
    }

    pub fn is_loaded(&self) -> bool {
        self.generator.lock().is_some()
    }

    /// Drops the resident model. In-flight calls keep their own handle.
    pub fn shutdown(&self) {
        if self.generator.lock().take().is_some() {
            tracing::debug!(target: "embedder", "model released");
        }
    }

    pub fn model_id(&self) -> MatchResult<String> {
        Ok(self.init()?.model_id().to_string())
    }

    pub fn dimension(&self) -> MatchResult<VectorDimension> {
        Ok(self.init()?.dimension())
    }

    /// Embeds one text.
    ///
    /// Fails with `InvalidInput` when the text is empty after trimming.
    pub fn embed(&self, text: &str) -> MatchResult<Embedding> {
        let mut embeddings = self.embed_batch(&[text])?;
        embeddings.pop().ok_or_else(|| MatchError::Embedding {
            reason: "model returned no embedding".to_string(),
        })
    }

    /// Embeds texts in order, returning one unit-length embedding per input.
    pub fn embed_batch(&self, texts: &[&str]) -> MatchResult<Vec<Embedding>> {
        let trimmed: Vec<&str> = texts.iter().map(|t| t.trim()).collect();
        if let Some(position) = trimmed.iter().position(|t| t.is_empty()) {
            return Err(MatchError::InvalidInput {
                reason: format!("text {position} is empty or whitespace-only"),
            });
        }
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let generator = self.init()?;
        match self.options.long_text {
            LongTextStrategy::Truncate => {
                let raw = self.generate_batched(generator.as_ref(), &trimmed)?;
                raw.into_iter()
                    .map(|values| to_unit_embedding(values, generator.dimension()))
                    .collect()
            }
            LongTextStrategy::ChunkMean => self.embed_chunk_mean(generator.as_ref(), &trimmed),
        }
    }

    fn generate_batched(
        &self,
        generator: &dyn EmbeddingGenerator,
        texts: &[&str],
    ) -> MatchResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.options.batch_size.max(1)) {
            let embeddings = generator.generate_embeddings(batch)?;
            if embeddings.len() != batch.len() {
                return Err(MatchError::Embedding {
                    reason: format!(
                        "generator returned {} embeddings for {} texts",
                        embeddings.len(),
                        batch.len()
                    ),
                });
            }
            out.extend(embeddings);
        }
        Ok(out)
    }

    /// Splits each text into character chunks, embeds all chunks and
    /// averages them per text.
    fn embed_chunk_mean(
        &self,
        generator: &dyn EmbeddingGenerator,
        texts: &[&str],
    ) -> MatchResult<Vec<Embedding>> {
        let mut owners = Vec::new();
        let mut pieces: Vec<&str> = Vec::new();
        for (owner, text) in texts.iter().enumerate() {
            for chunk in char_chunks(text, self.options.chunk_chars) {
                owners.push(owner);
                pieces.push(chunk);
            }
        }

        let raw = self.generate_batched(generator, &pieces)?;
        let dimension = generator.dimension();
        let mut sums = vec![vec![0.0f32; dimension.get()]; texts.len()];
        let mut counts = vec![0usize; texts.len()];

        for (owner, values) in owners.into_iter().zip(raw) {
            dimension.validate_vector(&values)?;
            for (sum, value) in sums[owner].iter_mut().zip(values) {
                *sum += value;
            }
            counts[owner] += 1;
        }

        sums.into_iter()
            .zip(counts)
            .map(|(mut sum, count)| {
                for value in sum.iter_mut() {
                    *value /= count.max(1) as f32;
                }
                to_unit_embedding(sum, dimension)
            })
            .collect()
    }
}

fn to_unit_embedding(values: Vec<f32>, dimension: VectorDimension) -> MatchResult<Embedding> {
    Ok(Embedding::with_dimension(values, dimension)?.normalized())
}

/// Splits `text` into slices of at most `size` characters on char boundaries.
fn char_chunks(text: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (index, _) in text.char_indices() {
        if count == size {
            chunks.push(&text[start..index]);
            start = index;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}
