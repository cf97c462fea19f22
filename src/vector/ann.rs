//! Approximate nearest-neighbour index structures.
//!
//! Two index kinds share the [`VectorIndex`] trait:
//! - [`FlatIndex`]: exhaustive inner-product scan, exact, used for small corpora
//! - [`IvfPqIndex`]: inverted file over spherical k-means cells with
//!   product-quantized residuals
//!
//! Both assume unit-length vectors, so inner product equals cosine similarity
//! and squared L2 distance maps to cosine through `1 - d/2`. Positions are
//! assigned in insertion order starting at 0.

use crate::vector::clustering::{ClusteringError, KMeansParams, Metric, dot, kmeans, nearest_centroid};
use crate::vector::quantization::ProductQuantizer;
use crate::vector::types::{Position, Score, VectorDimension, VectorError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Kind of index held in an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Flat,
    IvfPq,
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexKind::Flat => write!(f, "flat"),
            IndexKind::IvfPq => write!(f, "ivfpq"),
        }
    }
}

/// A single search hit before position resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: Position,
    pub score: Score,
}

/// Orders neighbours best-first: higher score, then lower position.
fn best_first(a: &Neighbor, b: &Neighbor) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.position.cmp(&b.position))
}

fn top_k(mut candidates: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    if candidates.len() > k && k > 0 {
        candidates.select_nth_unstable_by(k - 1, best_first);
        candidates.truncate(k);
    }
    candidates.sort_unstable_by(best_first);
    candidates.truncate(k);
    candidates
}

/// Common search contract over the index kinds.
pub trait VectorIndex: Send + Sync {
    /// Dimension of indexed vectors.
    fn dimension(&self) -> VectorDimension;

    /// Number of indexed vectors.
    fn ntotal(&self) -> usize;

    /// Returns up to `k` neighbours of a unit-length query, best first.
    ///
    /// `nprobe` is the number of coarse cells scanned; exhaustive indexes
    /// ignore it.
    fn search(&self, query: &[f32], k: usize, nprobe: usize) -> Vec<Neighbor>;
}

/// Exhaustive inner-product index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: VectorDimension,
    /// Row-major `ntotal * dimension` values.
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Appends vectors; each receives the next position.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), VectorError> {
        for vector in vectors {
            self.dimension.validate_vector(vector)?;
        }
        self.data.reserve(vectors.len() * self.dimension.get());
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), VectorError> {
        if self.dimension.get() == 0 || self.data.len() % self.dimension.get() != 0 {
            return Err(VectorError::Inconsistent(format!(
                "flat data length {} is not a multiple of dimension {}",
                self.data.len(),
                self.dimension
            )));
        }
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn ntotal(&self) -> usize {
        self.data.len().checked_div(self.dimension.get()).unwrap_or(0)
    }

    fn search(&self, query: &[f32], k: usize, _nprobe: usize) -> Vec<Neighbor> {
        if query.len() != self.dimension.get() || k == 0 {
            return Vec::new();
        }
        let candidates: Vec<Neighbor> = self
            .data
            .par_chunks(self.dimension.get())
            .enumerate()
            .map(|(i, row)| Neighbor {
                position: Position::new(i as u32),
                score: Score::from_similarity(dot(query, row)),
            })
            .collect();
        top_k(candidates, k)
    }
}

/// Training parameters for an IVF-PQ index.
#[derive(Debug, Clone)]
pub struct IvfPqParams {
    pub nlist: usize,
    pub subquantizers: usize,
    pub codebook_size: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

/// One inverted list: positions and their PQ codes, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct InvertedList {
    positions: Vec<Position>,
    codes: Vec<u8>,
}

/// Inverted-file index with product-quantized residuals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfPqIndex {
    dimension: VectorDimension,
    centroids: Vec<Vec<f32>>,
    pq: ProductQuantizer,
    lists: Vec<InvertedList>,
    ntotal: usize,
}

impl IvfPqIndex {
    /// Trains the coarse quantizer and the residual product quantizer.
    ///
    /// Training vectors must be unit length.
    pub fn train(training: &[Vec<f32>], params: &IvfPqParams) -> Result<Self, ClusteringError> {
        let coarse = kmeans(
            training,
            &KMeansParams::coarse(params.nlist, params.max_iterations, params.seed),
        )?;

        let residuals: Vec<Vec<f32>> = training
            .iter()
            .zip(coarse.assignments.iter())
            .map(|(vector, cluster)| residual(vector, &coarse.centroids[cluster.as_index()]))
            .collect();

        let pq = ProductQuantizer::train(
            &residuals,
            params.subquantizers,
            params.codebook_size,
            params.max_iterations,
            params.seed,
        )?;

        let dimension = VectorDimension::new(training[0].len())?;
        Ok(Self {
            dimension,
            lists: vec![InvertedList::default(); coarse.centroids.len()],
            centroids: coarse.centroids,
            pq,
            ntotal: 0,
        })
    }

    pub fn nlist(&self) -> usize {
        self.centroids.len()
    }

    pub fn quantizer(&self) -> &ProductQuantizer {
        &self.pq
    }

    /// Encodes and appends vectors; each receives the next position.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), VectorError> {
        for vector in vectors {
            self.dimension.validate_vector(vector)?;
        }

        let encoded: Vec<(usize, Vec<u8>)> = vectors
            .par_iter()
            .map(|vector| {
                let cluster = nearest_centroid(vector, &self.centroids, Metric::Cosine).as_index();
                let mut codes = Vec::with_capacity(self.pq.code_size());
                self.pq
                    .encode_into(&residual(vector, &self.centroids[cluster]), &mut codes);
                (cluster, codes)
            })
            .collect();

        for (cluster, codes) in encoded {
            let position = Position::from_index(self.ntotal).ok_or_else(|| {
                VectorError::Inconsistent("index exceeds u32 positions".to_string())
            })?;
            let list = &mut self.lists[cluster];
            list.positions.push(position);
            list.codes.extend_from_slice(&codes);
            self.ntotal += 1;
        }
        Ok(())
    }

    /// Number of vectors stored in each inverted list.
    pub fn list_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(|l| l.positions.len()).collect()
    }

    fn validate(&self) -> Result<(), VectorError> {
        if !self.pq.is_consistent() || self.pq.dimension() != self.dimension.get() {
            return Err(VectorError::Inconsistent(
                "product quantizer shape does not match index".to_string(),
            ));
        }
        if self.centroids.is_empty()
            || self.lists.len() != self.centroids.len()
            || self.centroids.iter().any(|c| c.len() != self.dimension.get())
        {
            return Err(VectorError::Inconsistent(
                "coarse centroids do not match inverted lists".to_string(),
            ));
        }
        let code_size = self.pq.code_size();
        let mut seen = vec![false; self.ntotal];
        let mut count = 0usize;
        for list in &self.lists {
            if list.codes.len() != list.positions.len() * code_size {
                return Err(VectorError::Inconsistent(
                    "inverted list codes do not match positions".to_string(),
                ));
            }
            for position in &list.positions {
                match seen.get_mut(position.as_index()) {
                    Some(slot) if !*slot => *slot = true,
                    _ => {
                        return Err(VectorError::Inconsistent(format!(
                            "position {position} is duplicated or out of range"
                        )));
                    }
                }
                count += 1;
            }
        }
        if count != self.ntotal {
            return Err(VectorError::Inconsistent(format!(
                "inverted lists hold {count} vectors, expected {}",
                self.ntotal
            )));
        }
        Ok(())
    }
}

impl VectorIndex for IvfPqIndex {
    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn ntotal(&self) -> usize {
        self.ntotal
    }

    fn search(&self, query: &[f32], k: usize, nprobe: usize) -> Vec<Neighbor> {
        if query.len() != self.dimension.get() || k == 0 || self.centroids.is_empty() {
            return Vec::new();
        }
        let nprobe = nprobe.clamp(1, self.centroids.len());

        let mut cells: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, dot(query, c)))
            .collect();
        cells.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        cells.truncate(nprobe);

        let code_size = self.pq.code_size();
        let candidates: Vec<Neighbor> = cells
            .par_iter()
            .flat_map_iter(|&(cell, _)| {
                let list = &self.lists[cell];
                let table = self
                    .pq
                    .distance_table(&residual(query, &self.centroids[cell]));
                list.positions
                    .iter()
                    .zip(list.codes.chunks_exact(code_size))
                    .map(|(&position, codes)| Neighbor {
                        position,
                        score: Score::from_squared_l2(self.pq.table_distance(&table, codes)),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        top_k(candidates, k)
    }
}

/// An owned index of either kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnnIndex {
    Flat(FlatIndex),
    IvfPq(IvfPqIndex),
}

impl AnnIndex {
    pub fn kind(&self) -> IndexKind {
        match self {
            AnnIndex::Flat(_) => IndexKind::Flat,
            AnnIndex::IvfPq(_) => IndexKind::IvfPq,
        }
    }

    /// Number of coarse clusters; 0 for flat indexes.
    pub fn nlist(&self) -> usize {
        match self {
            AnnIndex::Flat(_) => 0,
            AnnIndex::IvfPq(index) => index.nlist(),
        }
    }

    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), VectorError> {
        match self {
            AnnIndex::Flat(index) => index.add(vectors),
            AnnIndex::IvfPq(index) => index.add(vectors),
        }
    }

    /// Structural consistency check, run after build and after load.
    pub fn validate(&self) -> Result<(), VectorError> {
        match self {
            AnnIndex::Flat(index) => index.validate(),
            AnnIndex::IvfPq(index) => index.validate(),
        }
    }

    fn inner(&self) -> &dyn VectorIndex {
        match self {
            AnnIndex::Flat(index) => index,
            AnnIndex::IvfPq(index) => index,
        }
    }
}

impl VectorIndex for AnnIndex {
    fn dimension(&self) -> VectorDimension {
        self.inner().dimension()
    }

    fn ntotal(&self) -> usize {
        self.inner().ntotal()
    }

    fn search(&self, query: &[f32], k: usize, nprobe: usize) -> Vec<Neighbor> {
        self.inner().search(query, k, nprobe)
    }
}

fn residual(vector: &[f32], centroid: &[f32]) -> Vec<f32> {
    vector
        .iter()
        .zip(centroid.iter())
        .map(|(v, c)| v - c)
        .collect()
}
