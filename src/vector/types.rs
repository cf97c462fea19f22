//! Type-safe wrappers and core types for the vector layer.
//!
//! Newtypes here keep index positions, cluster ids and similarity scores
//! from being mixed up with plain integers and floats. The `Embedding` type
//! carries its dimension so a vector can never silently change shape between
//! the store, the index and the query path.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dimension produced by the default embedding model (all-MiniLM-L6-v2).
pub const VECTOR_DIMENSION_384: usize = 384;

/// Epsilon below which a vector norm is treated as zero.
pub(crate) const NORM_EPSILON: f32 = 1e-10;

/// Slot a vector occupies inside an ANN index.
///
/// Positions are 0-based and assigned in insertion order at build time.
/// They are distinct from job identifiers; the position mapping translates
/// between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position(u32);

impl Position {
    /// Creates a position from a raw slot number.
    #[must_use]
    pub const fn new(slot: u32) -> Self {
        Self(slot)
    }

    /// Creates a position from a `usize` index.
    ///
    /// Returns `None` when the index does not fit in `u32`.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        u32::try_from(index).ok().map(Self)
    }

    /// Returns the underlying slot number.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Returns the slot as a `usize` for slice indexing.
    #[must_use]
    pub const fn as_index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a coarse cluster (inverted list) in an IVF index.
///
/// Cluster ids are 0-based so they index directly into the centroid table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterId(u32);

impl ClusterId {
    /// Creates a new `ClusterId`.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying u32 value.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Returns the id as a `usize` for slice indexing.
    #[must_use]
    pub const fn as_index(&self) -> usize {
        self.0 as usize
    }
}

/// Cosine similarity score.
///
/// Scores live in `[-1.0, 1.0]` where 1.0 means identical direction.
/// Approximate distances from quantized indexes can drift slightly outside
/// that range, so `from_similarity` clamps instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score(f32);

impl Score {
    /// Creates a new `Score` with validation.
    ///
    /// Returns an error if the score is NaN or outside `[-1.0, 1.0]`.
    pub fn new(value: f32) -> Result<Self, VectorError> {
        if value.is_nan() {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score cannot be NaN",
            });
        }
        if !(-1.0..=1.0).contains(&value) {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score must be in range [-1.0, 1.0]",
            });
        }
        Ok(Self(value))
    }

    /// Creates a score from a raw similarity, clamping into range.
    ///
    /// NaN maps to -1.0 so corrupted candidates sink to the bottom.
    #[must_use]
    pub fn from_similarity(value: f32) -> Self {
        if value.is_nan() {
            Self(-1.0)
        } else {
            Self(value.clamp(-1.0, 1.0))
        }
    }

    /// Converts a squared L2 distance between unit vectors to cosine similarity.
    ///
    /// For unit vectors `||a - b||^2 = 2 - 2 cos(a, b)`.
    #[must_use]
    pub fn from_squared_l2(distance: f32) -> Self {
        Self::from_similarity(1.0 - distance / 2.0)
    }

    /// Returns the underlying f32 value.
    #[must_use]
    pub fn get(&self) -> f32 {
        self.0
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// Type-safe wrapper for vector dimensions.
///
/// Dimensions are validated at write time so vectors of different models
/// can never end up in the same index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Creates a standard 384-dimensional vector dimension.
    #[must_use]
    pub const fn dimension_384() -> Self {
        Self(VECTOR_DIMENSION_384)
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for VectorDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-dimension dense vector produced by an embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Wraps raw values, rejecting empty vectors and non-finite components.
    pub fn new(values: Vec<f32>) -> Result<Self, VectorError> {
        VectorDimension::new(values.len())?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(VectorError::NonFinite);
        }
        Ok(Self { values })
    }

    /// Wraps raw values and checks them against an expected dimension.
    pub fn with_dimension(values: Vec<f32>, dimension: VectorDimension) -> Result<Self, VectorError> {
        dimension.validate_vector(&values)?;
        Self::new(values)
    }

    /// Returns the dimension of this embedding.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        VectorDimension(self.values.len())
    }

    /// Borrows the raw components.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Consumes the embedding and returns the raw components.
    #[must_use]
    pub fn into_vec(self) -> Vec<f32> {
        self.values
    }

    /// Euclidean norm of the vector.
    #[must_use]
    pub fn norm(&self) -> f32 {
        l2_norm(&self.values)
    }

    /// Returns a unit-length copy. Zero vectors are returned unchanged.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        normalize_in_place(&mut self.values);
        self
    }

    /// Encodes the components as little-endian f32 bytes.
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.values.len() * 4);
        for value in &self.values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Decodes little-endian f32 bytes produced by [`Embedding::to_le_bytes`].
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, VectorError> {
        if bytes.len() % 4 != 0 {
            return Err(VectorError::Serialization(format!(
                "embedding blob length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        let values = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Self::new(values)
    }
}

/// Euclidean norm of a slice.
#[must_use]
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalizes a vector in-place to unit length.
///
/// Vectors with a norm below epsilon are left as-is.
pub fn normalize_in_place(vector: &mut [f32]) {
    let norm = l2_norm(vector);
    if norm > NORM_EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Errors that can occur during vector operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Invalid score value: {value}\nReason: {reason}")]
    InvalidScore { value: f32, reason: &'static str },

    #[error("Vector contains NaN or infinite components\nSuggestion: Check the embedding model output")]
    NonFinite,

    #[error("Storage error: {0}\nSuggestion: Check disk space and file permissions")]
    Storage(#[from] std::io::Error),

    #[error(
        "Embedding generation failed: {0}\nSuggestion: Verify the embedding model is properly initialized"
    )]
    EmbeddingFailed(String),

    #[error(
        "Clustering failed: {0}\nSuggestion: Ensure sufficient distinct vectors are available for training"
    )]
    ClusteringFailed(String),

    #[error(
        "Serialization error: {0}\nSuggestion: Check that vector data is valid and not corrupted"
    )]
    Serialization(String),

    #[error(
        "Invalid index format version: expected {expected}, got {actual}\nSuggestion: Rebuild the index with the current version"
    )]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Index structure is inconsistent: {0}\nSuggestion: Rebuild the index")]
    Inconsistent(String),
}
