//! Projection of a fine scale onto its landmarks.
//!
//! The area of influence of a landmark is the set of fine points whose
//! random walks reach it first. Row `i` of the influence matrix holds the
//! share of walks from fine point `i` absorbed by each landmark. Landmark
//! weights and the coarse transition matrix both follow from it:
//!
//! ```text
//! weight(a)  = sum_i w_i * I(i, a)
//! T'(a, b)  ~= sum_i w_i * I(i, a) * I(i, b)     (a != b, rows renormalised)
//! ```

use std::collections::{BTreeMap, VecDeque};

use rayon::prelude::*;

use crate::cancel::{self, CancellationToken};
use crate::config::HsneParameters;
use crate::landmarks::VisitFrequencies;
use crate::sparse::{normalize_and_prune, SparseMatrix, SparseRow};
use crate::walk::{step, unit_rng, STREAM_INFLUENCE};
use crate::HsneError;

/// Output of aggregating one fine scale.
#[derive(Debug, Clone)]
pub struct AggregatedScale {
    /// Row-stochastic matrix over the landmarks.
    pub transition_matrix: SparseMatrix,
    /// Accumulated fine-point mass per landmark.
    pub landmark_weights: Vec<f32>,
    /// Fine points x landmarks; every row sums to one.
    pub area_of_influence: SparseMatrix,
    /// Landmark id of each fine point that survived, `None` otherwise.
    pub previous_to_landmark: Vec<Option<u32>>,
    /// Fine points none of whose walks reached a landmark.
    pub unreached: usize,
}

#[derive(Debug, Clone)]
pub struct ScaleAggregator {
    walks_per_point: usize,
    max_walk_length: usize,
    prune_threshold: f32,
    seed: u64,
}

impl ScaleAggregator {
    pub fn new(params: &HsneParameters, seed: u64) -> Self {
        Self {
            walks_per_point: params.num_walks_per_landmark,
            max_walk_length: params.max_influence_walk_length,
            prune_threshold: params.transition_matrix_prune_thresh,
            seed,
        }
    }

    /// Build the coarse scale `scale` from the fine matrix, the fine point
    /// weights and the selected landmarks (ascending fine indices).
    pub fn aggregate(
        &self,
        fine: &SparseMatrix,
        fine_weights: &[f32],
        landmarks: &[u32],
        frequencies: &VisitFrequencies,
        scale: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<AggregatedScale, HsneError> {
        let n = fine.num_rows();
        if fine_weights.len() != n {
            return Err(HsneError::InputShape(format!(
                "{} weights for a scale of {n} points",
                fine_weights.len()
            )));
        }
        if landmarks.is_empty() {
            return Err(HsneError::EmptyScale { scale });
        }
        if landmarks.windows(2).any(|w| w[0] >= w[1]) {
            return Err(HsneError::InputShape(
                "landmarks must be strictly ascending".to_string(),
            ));
        }
        if landmarks.iter().any(|&l| l as usize >= n) {
            return Err(HsneError::InputShape(format!(
                "landmark index out of range for a scale of {n} points"
            )));
        }

        let mut previous_to_landmark = vec![None; n];
        for (id, &point) in landmarks.iter().enumerate() {
            previous_to_landmark[point as usize] = Some(id as u32);
        }

        let (area_of_influence, unreached) = self.area_of_influence(
            fine,
            &previous_to_landmark,
            landmarks,
            frequencies,
            scale,
            cancel,
        )?;

        cancel::check(cancel)?;
        let (transition_matrix, landmark_weights) =
            self.coarse_transitions(&area_of_influence, fine_weights)?;

        Ok(AggregatedScale {
            transition_matrix,
            landmark_weights,
            area_of_influence,
            previous_to_landmark,
            unreached,
        })
    }

    fn area_of_influence(
        &self,
        fine: &SparseMatrix,
        lookup: &[Option<u32>],
        landmarks: &[u32],
        frequencies: &VisitFrequencies,
        scale: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<(SparseMatrix, usize), HsneError> {
        let rows = (0..fine.num_rows())
            .into_par_iter()
            .map(|i| {
                cancel::check(cancel)?;
                if let Some(row) = self.walk_influence(fine, lookup, i, scale) {
                    return Ok((row, false));
                }
                let row = nearest_by_hops(fine, lookup, i).unwrap_or_else(|| {
                    // No landmark is reachable from this component.
                    let fallback = frequencies
                        .most_visited(landmarks)
                        .and_then(|p| lookup[p as usize])
                        .unwrap_or(0);
                    SparseRow::from_sorted(vec![(fallback, 1.0)])
                });
                Ok((row, true))
            })
            .collect::<Result<Vec<_>, HsneError>>()?;

        let unreached = rows.iter().filter(|(_, fallback)| *fallback).count();
        let rows = rows.into_iter().map(|(row, _)| row).collect();
        Ok((
            SparseMatrix::from_rows_unchecked(rows, landmarks.len()),
            unreached,
        ))
    }

    /// Influence row of fine point `i` estimated by absorbing walks.
    fn walk_influence(
        &self,
        fine: &SparseMatrix,
        lookup: &[Option<u32>],
        i: usize,
        scale: usize,
    ) -> Option<SparseRow> {
        if let Some(id) = lookup[i] {
            return Some(SparseRow::from_sorted(vec![(id, 1.0)]));
        }

        let mut rng = unit_rng(self.seed, scale, STREAM_INFLUENCE, i as u64);
        let mut hits: BTreeMap<u32, u32> = BTreeMap::new();
        for _ in 0..self.walks_per_point {
            let mut current = i;
            for _ in 0..self.max_walk_length {
                let Some(next) = step(fine.row(current), &mut rng) else {
                    break;
                };
                if let Some(id) = lookup[next as usize] {
                    *hits.entry(id).or_insert(0) += 1;
                    break;
                }
                current = next as usize;
            }
        }

        let total: u32 = hits.values().sum();
        if total == 0 {
            return None;
        }
        let total = total as f32;
        Some(SparseRow::from_sorted(
            hits.into_iter()
                .map(|(id, count)| (id, count as f32 / total))
                .collect(),
        ))
    }

    /// Landmark weights and the renormalised inter-landmark matrix.
    ///
    /// Accumulates sequentially in fine-point order so the floating-point
    /// result is reproducible.
    fn coarse_transitions(
        &self,
        area_of_influence: &SparseMatrix,
        fine_weights: &[f32],
    ) -> Result<(SparseMatrix, Vec<f32>), HsneError> {
        let m = area_of_influence.num_cols();
        let mut weights = vec![0.0f64; m];
        let mut mass: Vec<BTreeMap<u32, f64>> = vec![BTreeMap::new(); m];

        for (row, &w) in area_of_influence.rows().iter().zip(fine_weights) {
            let w = w as f64;
            for (a, share_a) in row.iter() {
                let share_a = share_a as f64;
                weights[a as usize] += w * share_a;
                for (b, share_b) in row.iter() {
                    if a != b {
                        *mass[a as usize].entry(b).or_insert(0.0) += w * share_a * share_b as f64;
                    }
                }
            }
        }

        let rows = mass
            .into_iter()
            .enumerate()
            .map(|(a, entries)| {
                if entries.is_empty() {
                    // Mass is symmetric, so no other landmark moves into this one
                    // either. It stays an isolated absorbing state.
                    return Ok(SparseRow::from_sorted(vec![(a as u32, 1.0)]));
                }
                let masses: Vec<(u32, f64)> = entries.into_iter().collect();
                normalize_and_prune(a, &masses, self.prune_threshold)
            })
            .collect::<Result<Vec<_>, HsneError>>()?;

        Ok((
            SparseMatrix::from_rows_unchecked(rows, m),
            weights.into_iter().map(|w| w as f32).collect(),
        ))
    }
}

/// Equal shares over the landmarks at the smallest hop distance from `start`.
fn nearest_by_hops(fine: &SparseMatrix, lookup: &[Option<u32>], start: usize) -> Option<SparseRow> {
    let mut seen = vec![false; fine.num_rows()];
    let mut frontier = VecDeque::from([start]);
    seen[start] = true;

    while !frontier.is_empty() {
        let mut found: Vec<u32> = Vec::new();
        let mut next_frontier = VecDeque::new();
        for current in frontier {
            for (next, _) in fine.row(current).iter() {
                let next = next as usize;
                if seen[next] {
                    continue;
                }
                seen[next] = true;
                match lookup[next] {
                    Some(id) => found.push(id),
                    None => next_frontier.push_back(next),
                }
            }
        }
        if !found.is_empty() {
            let share = 1.0 / found.len() as f32;
            return Some(SparseRow::from_entries(
                found.into_iter().map(|id| (id, share)).collect(),
            ));
        }
        frontier = next_frontier;
    }
    None
}
