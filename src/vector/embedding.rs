//! Embedding generation backends.
//!
//! [`EmbeddingGenerator`] is the seam between the job-matching pipeline and
//! whatever model turns text into vectors. The production backend wraps
//! fastembed's ONNX sentence-transformer models; tests plug in deterministic
//! generators through the same trait.

use crate::vector::{VectorDimension, VectorError};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Mutex;

/// Model used when nothing else is configured, and the fallback when the
/// configured model fails to load.
pub const DEFAULT_MODEL: EmbeddingModel = EmbeddingModel::AllMiniLML6V2;

/// Trait for generating embeddings from text.
///
/// Implementations must be thread-safe and deterministic for identical
/// input within one model version.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate embeddings for multiple texts, one per input, in order.
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Get the dimension of embeddings produced by this generator.
    #[must_use]
    fn dimension(&self) -> VectorDimension;

    /// Stable identifier of the underlying model, recorded in index artifacts.
    fn model_id(&self) -> &str;
}

/// Options for loading a fastembed model.
#[derive(Debug, Clone)]
pub struct FastEmbedOptions {
    pub cache_dir: PathBuf,
    /// Token window; longer inputs are truncated by the tokenizer.
    pub max_length: usize,
    pub show_download_progress: bool,
}

/// FastEmbed implementation.
///
/// The model dimension is discovered by embedding a probe string once at
/// load time, so any fastembed text model can be used.
pub struct FastEmbedGenerator {
    model: Mutex<TextEmbedding>,
    dimension: VectorDimension,
    model_id: String,
}

impl std::fmt::Debug for FastEmbedGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedGenerator")
            .field("model_id", &self.model_id)
            .field("dimension", &self.dimension)
            .field("model", &"<TextEmbedding>")
            .finish()
    }
}

impl FastEmbedGenerator {
    /// Loads `model`, downloading it into the cache on first use.
    ///
    /// # Errors
    /// Returns an error if the model fails to initialize or download.
    pub fn new(model: EmbeddingModel, options: &FastEmbedOptions) -> Result<Self, VectorError> {
        let model_id = model_to_string(&model);
        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(options.cache_dir.clone())
                .with_max_length(options.max_length)
                .with_show_download_progress(options.show_download_progress),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize embedding model {model_id}: {e}. Ensure you have internet connection for first-time model download")
        ))?;

        let probe = text_model
            .embed(vec!["dimension probe"], None)
            .map_err(|e| VectorError::EmbeddingFailed(format!("Model probe failed: {e}")))?;
        let dimension = probe
            .first()
            .map(Vec::len)
            .ok_or_else(|| VectorError::EmbeddingFailed("Model probe returned nothing".to_string()))?;

        Ok(Self {
            model: Mutex::new(text_model),
            dimension: VectorDimension::new(dimension)?,
            model_id,
        })
    }

    /// Loads `model`, falling back to [`DEFAULT_MODEL`] if it fails.
    pub fn with_fallback(model: EmbeddingModel, options: &FastEmbedOptions) -> Result<Self, VectorError> {
        let requested = model_to_string(&model);
        match Self::new(model, options) {
            Ok(generator) => Ok(generator),
            Err(e) if requested != model_to_string(&DEFAULT_MODEL) => {
                tracing::warn!(
                    target: "embedding",
                    "model {requested} failed to load ({e}); falling back to {}",
                    model_to_string(&DEFAULT_MODEL)
                );
                Self::new(DEFAULT_MODEL, options)
            }
            Err(e) => Err(e),
        }
    }
}

impl EmbeddingGenerator for FastEmbedGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();

        let embeddings = self
            .model
            .lock()
            .map_err(|_| {
                VectorError::EmbeddingFailed(
                    "Failed to acquire embedding model lock - model may be poisoned".to_string(),
                )
            })?
            .embed(text_strings, None)
            .map_err(|e| {
                VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}"))
            })?;

        if embeddings.len() != texts.len() {
            return Err(VectorError::EmbeddingFailed(format!(
                "Model returned {} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }
        for embedding in &embeddings {
            self.dimension.validate_vector(embedding)?;
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Parses a configured model name.
///
/// Accepts the fastembed variant name (`AllMiniLML6V2`) or the Hugging Face
/// style name (`all-MiniLM-L6-v2`), case-insensitively.
pub fn parse_embedding_model(name: &str) -> Result<EmbeddingModel, VectorError> {
    let normalized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();

    let model = match normalized.as_str() {
        "allminilml6v2" | "sentencetransformersallminilml6v2" => EmbeddingModel::AllMiniLML6V2,
        "allminilml12v2" | "sentencetransformersallminilml12v2" => EmbeddingModel::AllMiniLML12V2,
        "bgesmallenv15" | "baaibgesmallenv15" => EmbeddingModel::BGESmallENV15,
        "bgebaseenv15" | "baaibgebaseenv15" => EmbeddingModel::BGEBaseENV15,
        "bgelargeenv15" | "baaibgelargeenv15" => EmbeddingModel::BGELargeENV15,
        "paraphrasemlminilml12v2" | "paraphrasemultilingualminilml12v2" => {
            EmbeddingModel::ParaphraseMLMiniLML12V2
        }
        "paraphrasemlmpnetbasev2" | "paraphrasemultilingualmpnetbasev2" => {
            EmbeddingModel::ParaphraseMLMpnetBaseV2
        }
        _ => {
            return Err(VectorError::EmbeddingFailed(format!(
                "Unknown embedding model '{name}'. Supported: AllMiniLML6V2, AllMiniLML12V2, BGESmallENV15, BGEBaseENV15, BGELargeENV15, ParaphraseMLMiniLML12V2, ParaphraseMLMpnetBaseV2"
            )));
        }
    };
    Ok(model)
}

/// Canonical identifier for a model, as stored in artifacts.
#[must_use]
pub fn model_to_string(model: &EmbeddingModel) -> String {
    format!("{model:?}")
}

/// Mock embedding generator for testing.
///
/// Hashes lower-cased words into buckets, so texts sharing words share
/// direction. Output is deterministic and unit length.
#[cfg(test)]
pub struct MockEmbeddingGenerator {
    dimension: VectorDimension,
}

#[cfg(test)]
impl MockEmbeddingGenerator {
    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: VectorDimension::new(dimension).expect("non-zero test dimension"),
        }
    }
}

#[cfg(test)]
impl EmbeddingGenerator for MockEmbeddingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        let dim = self.dimension.get();
        Ok(texts
            .iter()
            .map(|text| {
                let mut embedding = vec![0.0f32; dim];
                for word in text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                {
                    let bucket = word
                        .to_lowercase()
                        .bytes()
                        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
                            (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
                        });
                    embedding[(bucket % dim as u64) as usize] += 1.0;
                }
                embedding[dim - 1] += 0.01;
                crate::vector::normalize_in_place(&mut embedding);
                embedding
            })
            .collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_id(&self) -> &str {
        "mock-hash"
    }
}
