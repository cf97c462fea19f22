//! K-means clustering for the coarse quantizer and PQ codebooks.
//!
//! Two flavours share one implementation:
//! - spherical k-means (cosine metric, unit-length centroids) for the
//!   inverted-file coarse quantizer over normalized embeddings
//! - plain k-means (squared L2, mean centroids) for product-quantizer
//!   sub-space codebooks trained on residuals
//!
//! Initialization is K-means++ driven by a seeded RNG, so training the same
//! data with the same seed yields the same centroids.
//!
//! # Performance Characteristics
//! - O(n * k * d * iterations) time complexity
//! - O(k * d) space for centroids
//! - Assignment step runs on the rayon pool

use crate::vector::types::{ClusterId, NORM_EPSILON, VectorError, normalize_in_place};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;

/// Default iteration cap when callers do not configure one.
pub const DEFAULT_MAX_ITERATIONS: usize = 25;

/// Convergence tolerance for centroid updates.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Distance used to assign vectors to centroids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Cosine similarity; centroids are kept at unit length.
    Cosine,
    /// Squared Euclidean distance; centroids are arithmetic means.
    SquaredL2,
}

/// Parameters for a single k-means run.
#[derive(Debug, Clone)]
pub struct KMeansParams {
    pub k: usize,
    pub metric: Metric,
    pub max_iterations: usize,
    pub seed: u64,
    /// Accept fewer distinct points than `k` by duplicating centroids.
    ///
    /// PQ codebooks tolerate duplicates; the coarse quantizer does not.
    pub allow_duplicates: bool,
}

impl KMeansParams {
    /// Spherical k-means for the coarse quantizer.
    #[must_use]
    pub fn coarse(k: usize, max_iterations: usize, seed: u64) -> Self {
        Self {
            k,
            metric: Metric::Cosine,
            max_iterations,
            seed,
            allow_duplicates: false,
        }
    }

    /// Euclidean k-means for PQ sub-space codebooks.
    #[must_use]
    pub fn codebook(k: usize, max_iterations: usize, seed: u64) -> Self {
        Self {
            k,
            metric: Metric::SquaredL2,
            max_iterations,
            seed,
            allow_duplicates: true,
        }
    }
}

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Cluster centroids, each a vector of the same dimension as input vectors.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster assignment for each input vector.
    pub assignments: Vec<ClusterId>,

    /// Number of iterations until convergence.
    pub iterations: usize,
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error(
        "Empty vector set provided for clustering\nSuggestion: Ensure embeddings are generated before building the index"
    )]
    EmptyVectorSet,

    #[error("Invalid cluster count: {0}\nSuggestion: Use k between 1 and the number of vectors")]
    InvalidClusterCount(usize),

    #[error(
        "Dimension mismatch in vectors\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch,

    #[error(
        "Only {distinct} distinct vectors available for {k} clusters\nSuggestion: Add more varied postings or use a flat index"
    )]
    DegenerateData { distinct: usize, k: usize },

    #[error("Vector operation error: {0}")]
    VectorError(#[from] VectorError),
}

/// Runs k-means with the given parameters.
///
/// # Algorithm
/// 1. Initialize centroids using seeded K-means++
/// 2. Iterate until convergence or `max_iterations`:
///    - Assign each vector to its nearest centroid
///    - Update centroids from their members
///    - Stop when assignments are stable or centroids barely move
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans(vectors: &[Vec<f32>], params: &KMeansParams) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }

    let k = params.k;
    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount(k));
    }

    let dimension = vectors[0].len();
    if vectors.iter().any(|v| v.len() != dimension) {
        return Err(ClusteringError::DimensionMismatch);
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut centroids = initialize_kmeans_plus_plus(vectors, params, &mut rng)?;
    let mut assignments: Vec<ClusterId> = Vec::new();
    let mut iterations = 0;
    let max_iterations = params.max_iterations.max(1);

    loop {
        iterations += 1;

        let new_assignments = assign_all(vectors, &centroids, params.metric);
        let converged = new_assignments == assignments;
        assignments = new_assignments;

        if converged || iterations >= max_iterations {
            break;
        }

        let new_centroids = update_centroids(vectors, &assignments, k, params.metric, &mut rng);
        let movement = centroid_movement(&centroids, &new_centroids, params.metric);
        centroids = new_centroids;

        if movement < CONVERGENCE_TOLERANCE {
            assignments = assign_all(vectors, &centroids, params.metric);
            break;
        }
    }

    if iterations >= max_iterations {
        tracing::debug!(
            target: "clustering",
            "k-means stopped at iteration cap ({max_iterations}) with k={k}"
        );
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

/// Assigns every vector to its nearest centroid in parallel.
fn assign_all(vectors: &[Vec<f32>], centroids: &[Vec<f32>], metric: Metric) -> Vec<ClusterId> {
    vectors
        .par_iter()
        .map(|vector| nearest_centroid(vector, centroids, metric))
        .collect()
}

/// Returns the centroid closest to `vector` under `metric`.
///
/// Ties resolve to the lowest cluster id.
pub fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>], metric: Metric) -> ClusterId {
    let mut best_cluster = 0usize;
    let mut best_distance = f32::INFINITY;

    for (i, centroid) in centroids.iter().enumerate() {
        let distance = distance(vector, centroid, metric);
        if distance < best_distance {
            best_distance = distance;
            best_cluster = i;
        }
    }

    ClusterId::new(best_cluster as u32)
}

/// Distance under `metric`; smaller is closer.
fn distance(a: &[f32], b: &[f32], metric: Metric) -> f32 {
    match metric {
        Metric::Cosine => 1.0 - cosine_similarity(a, b),
        Metric::SquaredL2 => squared_l2(a, b),
    }
}

/// Updates centroids from their assigned vectors.
///
/// Empty clusters are re-seeded from a random input vector.
fn update_centroids(
    vectors: &[Vec<f32>],
    assignments: &[ClusterId],
    k: usize,
    metric: Metric,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut new_centroids = vec![vec![0.0; dimension]; k];
    let mut cluster_sizes = vec![0usize; k];

    for (vector, cluster_id) in vectors.iter().zip(assignments.iter()) {
        let cluster_idx = cluster_id.as_index();
        for (sum, &value) in new_centroids[cluster_idx].iter_mut().zip(vector.iter()) {
            *sum += value;
        }
        cluster_sizes[cluster_idx] += 1;
    }

    for (centroid, &size) in new_centroids.iter_mut().zip(cluster_sizes.iter()) {
        if size == 0 {
            let random_idx = rng.random_range(0..vectors.len());
            *centroid = prepare_centroid(&vectors[random_idx], metric);
        } else {
            for value in centroid.iter_mut() {
                *value /= size as f32;
            }
            if metric == Metric::Cosine {
                normalize_in_place(centroid);
            }
        }
    }

    new_centroids
}

/// Computes cosine similarity between two vectors.
///
/// Returns 0.0 when either vector has zero length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Squared Euclidean distance.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Dot product of two equal-length slices.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Initializes centroids using the K-means++ algorithm.
///
/// Each subsequent centroid is drawn with probability proportional to its
/// squared distance from the nearest centroid chosen so far.
fn initialize_kmeans_plus_plus(
    vectors: &[Vec<f32>],
    params: &KMeansParams,
    rng: &mut StdRng,
) -> Result<Vec<Vec<f32>>, ClusteringError> {
    let k = params.k;
    let mut centroids = Vec::with_capacity(k);

    let first_idx = rng.random_range(0..vectors.len());
    centroids.push(prepare_centroid(&vectors[first_idx], params.metric));

    let mut min_distances: Vec<f32> = vectors
        .iter()
        .map(|v| distance(v, &centroids[0], params.metric))
        .collect();

    while centroids.len() < k {
        let weights: Vec<f32> = min_distances.iter().map(|d| d.max(0.0) * d.max(0.0)).collect();
        let total: f32 = weights.iter().sum();

        if total < NORM_EPSILON {
            // every remaining point coincides with an existing centroid
            if !params.allow_duplicates {
                return Err(ClusteringError::DegenerateData {
                    distinct: centroids.len(),
                    k,
                });
            }
            while centroids.len() < k {
                let idx = rng.random_range(0..vectors.len());
                centroids.push(prepare_centroid(&vectors[idx], params.metric));
            }
            break;
        }

        let target = rng.random::<f32>() * total;
        let mut cumulative = 0.0;
        let mut chosen = None;
        for (i, &weight) in weights.iter().enumerate() {
            cumulative += weight;
            if weight > 0.0 && cumulative >= target {
                chosen = Some(i);
                break;
            }
        }
        // rounding can leave target just above the final cumulative sum
        let chosen = match chosen {
            Some(i) => i,
            None => weights
                .iter()
                .rposition(|&w| w > 0.0)
                .unwrap_or(vectors.len() - 1),
        };

        let centroid = prepare_centroid(&vectors[chosen], params.metric);
        for (min_distance, vector) in min_distances.iter_mut().zip(vectors.iter()) {
            let d = distance(vector, &centroid, params.metric);
            if d < *min_distance {
                *min_distance = d;
            }
        }
        centroids.push(centroid);
    }

    Ok(centroids)
}

fn prepare_centroid(vector: &[f32], metric: Metric) -> Vec<f32> {
    let mut centroid = vector.to_vec();
    if metric == Metric::Cosine {
        normalize_in_place(&mut centroid);
    }
    centroid
}

/// Average movement of centroids between iterations.
fn centroid_movement(old: &[Vec<f32>], new: &[Vec<f32>], metric: Metric) -> f32 {
    old.iter()
        .zip(new.iter())
        .map(|(old_c, new_c)| distance(old_c, new_c, metric))
        .sum::<f32>()
        / old.len() as f32
}
