use rayon::prelude::*;

use crate::aknn::NeighborGraph;
use crate::config::HsneParameters;
use crate::sparse::{normalize_and_prune, SparseMatrix};
use crate::HsneError;

const MAX_CALIBRATION_ITERS: usize = 200;
const ENTROPY_TOLERANCE: f64 = 1e-5;

/// Converts a kNN graph into the row-stochastic transition matrix of scale 0.
///
/// Each row is a Gaussian kernel over squared neighbour distances whose
/// precision is calibrated so the row entropy matches `ln(perplexity)`.
/// Entries whose normalised weight falls below the prune threshold are
/// dropped and the remainder renormalised.
#[derive(Debug, Clone, Copy)]
pub struct TransitionMatrixBuilder {
    perplexity: f32,
    prune_threshold: f32,
}

impl TransitionMatrixBuilder {
    pub fn new(perplexity: f32, prune_threshold: f32) -> Self {
        Self {
            perplexity: perplexity.max(1.0),
            prune_threshold,
        }
    }

    pub fn from_params(params: &HsneParameters) -> Self {
        Self::new(params.perplexity(), params.transition_matrix_prune_thresh)
    }

    pub fn perplexity(&self) -> f32 {
        self.perplexity
    }

    pub fn build(&self, graph: &NeighborGraph) -> Result<SparseMatrix, HsneError> {
        let rows = (0..graph.len())
            .into_par_iter()
            .map(|i| {
                let affinities = calibrate_row(graph.distances(i), self.perplexity as f64);
                let masses: Vec<(u32, f64)> = graph
                    .neighbors(i)
                    .iter()
                    .copied()
                    .zip(affinities)
                    .collect();
                normalize_and_prune(i, &masses, self.prune_threshold)
            })
            .collect::<Result<Vec<_>, HsneError>>()?;
        SparseMatrix::square(rows)
    }
}

/// Unnormalised Gaussian affinities for one row of squared distances.
///
/// Binary-searches the precision `beta` of `exp(-beta * (d - d_min))`
/// until the entropy of the normalised row is within tolerance of
/// `ln(perplexity)`. Subtracting `d_min` keeps the closest neighbour at
/// weight one, so the row never underflows to zero.
pub(crate) fn calibrate_row(distances: &[f32], perplexity: f64) -> Vec<f64> {
    if distances.is_empty() {
        return Vec::new();
    }
    let d_min = distances
        .iter()
        .map(|&d| d as f64)
        .fold(f64::INFINITY, f64::min);
    let shifted: Vec<f64> = distances.iter().map(|&d| d as f64 - d_min).collect();
    let target = perplexity.ln();

    let mut beta = 1.0f64;
    let mut min_beta = f64::NEG_INFINITY;
    let mut max_beta = f64::INFINITY;
    let mut weights = vec![0.0f64; shifted.len()];

    for _ in 0..MAX_CALIBRATION_ITERS {
        let mut sum = 0.0f64;
        let mut weighted = 0.0f64;
        for (w, &d) in weights.iter_mut().zip(shifted.iter()) {
            *w = (-beta * d).exp();
            sum += *w;
            weighted += d * *w;
        }
        let entropy = sum.ln() + beta * weighted / sum;
        let diff = entropy - target;
        if diff.abs() < ENTROPY_TOLERANCE {
            break;
        }
        if diff > 0.0 {
            min_beta = beta;
            beta = if max_beta.is_finite() {
                (beta + max_beta) * 0.5
            } else {
                beta * 2.0
            };
        } else {
            max_beta = beta;
            beta = if min_beta.is_finite() {
                (beta + min_beta) * 0.5
            } else {
                beta * 0.5
            };
        }
    }

    weights
}
