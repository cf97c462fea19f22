//! Product quantization of residual vectors.
//!
//! A vector of dimension `d` is split into `m` contiguous sub-vectors of
//! `dsub = d / m` components. Each sub-space has its own codebook of `ksub`
//! centroids, so a vector is stored as `m` one-byte codes. Query time uses
//! asymmetric distance computation: per-sub-space lookup tables of squared
//! distances from the (uncompressed) query to every codebook entry.

use crate::vector::clustering::{ClusteringError, KMeansParams, kmeans, squared_l2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Largest codebook a one-byte code can address.
pub const MAX_CODEBOOK_SIZE: usize = 256;

/// Largest divisor of `dimension` that does not exceed `max_subquantizers`.
///
/// Always at least 1.
#[must_use]
pub fn subquantizer_count(dimension: usize, max_subquantizers: usize) -> usize {
    let mut m = max_subquantizers.clamp(1, dimension.max(1));
    while m > 1 && dimension % m != 0 {
        m -= 1;
    }
    m
}

/// Trained product quantizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductQuantizer {
    dimension: usize,
    m: usize,
    dsub: usize,
    ksub: usize,
    /// `m` codebooks, each `ksub * dsub` values laid out row-major.
    codebooks: Vec<Vec<f32>>,
}

impl ProductQuantizer {
    /// Trains one codebook per sub-space.
    ///
    /// `ksub` must already be clamped to the number of training vectors.
    pub fn train(
        training: &[Vec<f32>],
        m: usize,
        ksub: usize,
        max_iterations: usize,
        seed: u64,
    ) -> Result<Self, ClusteringError> {
        let first = training.first().ok_or(ClusteringError::EmptyVectorSet)?;
        let dimension = first.len();
        if m == 0 || dimension % m != 0 {
            return Err(ClusteringError::InvalidClusterCount(m));
        }
        if ksub == 0 || ksub > MAX_CODEBOOK_SIZE || ksub > training.len() {
            return Err(ClusteringError::InvalidClusterCount(ksub));
        }
        let dsub = dimension / m;

        let codebooks = (0..m)
            .into_par_iter()
            .map(|sub| {
                let slices: Vec<Vec<f32>> = training
                    .iter()
                    .map(|v| v[sub * dsub..(sub + 1) * dsub].to_vec())
                    .collect();
                let params =
                    KMeansParams::codebook(ksub, max_iterations, seed.wrapping_add(sub as u64 + 1));
                kmeans(&slices, &params).map(|result| result.centroids.concat())
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            dimension,
            m,
            dsub,
            ksub,
            codebooks,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn subquantizers(&self) -> usize {
        self.m
    }

    pub fn codebook_size(&self) -> usize {
        self.ksub
    }

    /// Bytes per encoded vector.
    pub fn code_size(&self) -> usize {
        self.m
    }

    fn centroid(&self, sub: usize, code: usize) -> &[f32] {
        &self.codebooks[sub][code * self.dsub..(code + 1) * self.dsub]
    }

    /// Encodes a vector into `m` codes, appending them to `out`.
    pub fn encode_into(&self, vector: &[f32], out: &mut Vec<u8>) {
        debug_assert_eq!(vector.len(), self.dimension);
        for sub in 0..self.m {
            let slice = &vector[sub * self.dsub..(sub + 1) * self.dsub];
            let mut best = 0usize;
            let mut best_distance = f32::INFINITY;
            for code in 0..self.ksub {
                let d = squared_l2(slice, self.centroid(sub, code));
                if d < best_distance {
                    best_distance = d;
                    best = code;
                }
            }
            out.push(best as u8);
        }
    }

    /// Reconstructs the approximate vector for a code sequence.
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dimension);
        for (sub, &code) in codes.iter().enumerate().take(self.m) {
            vector.extend_from_slice(self.centroid(sub, code as usize));
        }
        vector
    }

    /// Builds the asymmetric distance table for a query residual.
    ///
    /// Entry `[sub * ksub + code]` is the squared distance between the
    /// query's sub-vector and that codebook centroid.
    pub fn distance_table(&self, residual: &[f32]) -> Vec<f32> {
        let mut table = Vec::with_capacity(self.m * self.ksub);
        for sub in 0..self.m {
            let slice = &residual[sub * self.dsub..(sub + 1) * self.dsub];
            for code in 0..self.ksub {
                table.push(squared_l2(slice, self.centroid(sub, code)));
            }
        }
        table
    }

    /// Sums table entries for one encoded vector.
    #[inline]
    pub fn table_distance(&self, table: &[f32], codes: &[u8]) -> f32 {
        codes
            .iter()
            .enumerate()
            .map(|(sub, &code)| table[sub * self.ksub + code as usize])
            .sum()
    }

    /// Checks internal shape after deserialization.
    pub fn is_consistent(&self) -> bool {
        self.m > 0
            && self.dsub * self.m == self.dimension
            && self.ksub > 0
            && self.ksub <= MAX_CODEBOOK_SIZE
            && self.codebooks.len() == self.m
            && self
                .codebooks
                .iter()
                .all(|book| book.len() == self.ksub * self.dsub)
    }
}
