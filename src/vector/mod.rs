//! Dense-vector primitives for job matching.
//!
//! This module holds everything that operates on raw vectors, independent of
//! job postings or the relational store:
//! - validated vector types and scores
//! - seeded k-means for coarse and PQ training
//! - flat and IVF-PQ index structures
//! - the persisted index artifact with its position mapping
//! - embedding generators
//!
//! # Architecture
//! The IVF-PQ index partitions unit-length vectors into spherical k-means
//! cells and stores each vector as product-quantized codes of its residual
//! against the cell centroid. A query probes the `nprobe` closest cells and
//! ranks candidates with asymmetric distance tables.

mod ann;
mod clustering;
mod embedding;
mod quantization;
mod storage;
mod types;

pub use ann::{AnnIndex, FlatIndex, IndexKind, IvfPqIndex, IvfPqParams, Neighbor, VectorIndex};
pub use clustering::{
    ClusteringError, KMeansParams, KMeansResult, Metric, cosine_similarity, kmeans,
    nearest_centroid,
};
#[cfg(test)]
pub use embedding::MockEmbeddingGenerator;
pub use embedding::{
    DEFAULT_MODEL, EmbeddingGenerator, FastEmbedGenerator, FastEmbedOptions, model_to_string,
    parse_embedding_model,
};
pub use quantization::{MAX_CODEBOOK_SIZE, ProductQuantizer, subquantizer_count};
pub use storage::{
    ARTIFACT_FILE_NAME, ArtifactError, FORMAT_VERSION, IndexArtifact, IndexMetadata,
    PositionMapping,
};
pub use types::{
    ClusterId, Embedding, Position, Score, VECTOR_DIMENSION_384, VectorDimension, VectorError,
    l2_norm, normalize_in_place,
};
