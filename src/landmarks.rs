//! Markov-chain Monte Carlo landmark selection.
//!
//! Every point of a scale starts `num_walks` random walks over the scale's
//! transition matrix. Each step increments a visit counter at the point it
//! lands on. Normalised counts estimate how central a point is in the
//! similarity graph, and the most visited points become the landmarks of
//! the next scale.

use std::collections::BTreeMap;

use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rayon::prelude::*;

use crate::cancel::{self, CancellationToken};
use crate::config::{HsneParameters, WalkLength};
use crate::sparse::SparseMatrix;
use crate::walk::{step, unit_rng, WalkLengthSampler, STREAM_SAMPLING, STREAM_SELECTION};
use crate::HsneError;

/// Per-worker visit counter. Implementations differ only in memory layout
/// and must report identical counts for identical walks.
pub trait VisitAccumulator: Send + Sized {
    /// Fresh accumulator for a scale of `num_points` points.
    fn with_points(num_points: usize) -> Self;

    fn record(&mut self, point: u32);

    /// Fold another worker's counts into this one.
    fn merge(&mut self, other: Self);

    /// Non-zero counts in ascending point order.
    fn into_counts(self) -> Vec<(u32, u64)>;
}

/// One counter slot per point.
#[derive(Debug, Clone)]
pub struct DenseVisits {
    counts: Vec<u64>,
}

impl VisitAccumulator for DenseVisits {
    fn with_points(num_points: usize) -> Self {
        Self {
            counts: vec![0; num_points],
        }
    }

    #[inline]
    fn record(&mut self, point: u32) {
        self.counts[point as usize] += 1;
    }

    fn merge(&mut self, other: Self) {
        for (dst, src) in self.counts.iter_mut().zip(other.counts) {
            *dst += src;
        }
    }

    fn into_counts(self) -> Vec<(u32, u64)> {
        self.counts
            .into_iter()
            .enumerate()
            .filter(|&(_, c)| c > 0)
            .map(|(p, c)| (p as u32, c))
            .collect()
    }
}

/// Counters only for points that were actually visited.
///
/// Memory grows with the number of distinct visited points rather than the
/// scale size, which is what out-of-core construction needs.
#[derive(Debug, Clone, Default)]
pub struct SparseVisits {
    counts: BTreeMap<u32, u64>,
}

impl VisitAccumulator for SparseVisits {
    fn with_points(_num_points: usize) -> Self {
        Self::default()
    }

    #[inline]
    fn record(&mut self, point: u32) {
        *self.counts.entry(point).or_insert(0) += 1;
    }

    fn merge(&mut self, other: Self) {
        for (point, count) in other.counts {
            *self.counts.entry(point).or_insert(0) += count;
        }
    }

    fn into_counts(self) -> Vec<(u32, u64)> {
        self.counts.into_iter().collect()
    }
}

/// Normalised visit counts of one scale.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitFrequencies {
    num_points: usize,
    total: u64,
    counts: Vec<(u32, u64)>,
}

impl VisitFrequencies {
    /// `counts` must be sorted by point and contain only non-zero entries.
    pub fn from_counts(num_points: usize, counts: Vec<(u32, u64)>) -> Self {
        let total = counts.iter().map(|&(_, c)| c).sum();
        Self {
            num_points,
            total,
            counts,
        }
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    /// Total number of recorded steps.
    pub fn total_visits(&self) -> u64 {
        self.total
    }

    /// Number of distinct visited points.
    pub fn visited(&self) -> usize {
        self.counts.len()
    }

    pub fn count(&self, point: u32) -> u64 {
        self.counts
            .binary_search_by_key(&point, |&(p, _)| p)
            .map(|pos| self.counts[pos].1)
            .unwrap_or(0)
    }

    /// Fraction of all steps that landed on `point`.
    pub fn frequency(&self, point: u32) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.count(point) as f64 / self.total as f64
        }
    }

    /// `(point, frequency)` for every visited point, ascending by point.
    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        let total = self.total.max(1) as f64;
        self.counts.iter().map(move |&(p, c)| (p, c as f64 / total))
    }

    /// The most visited of `candidates`; ties go to the earliest candidate.
    pub fn most_visited(&self, candidates: &[u32]) -> Option<u32> {
        let mut best: Option<(u32, u64)> = None;
        for &candidate in candidates {
            let count = self.count(candidate);
            match best {
                Some((_, c)) if count <= c => {}
                _ => best = Some((candidate, count)),
            }
        }
        best.map(|(p, _)| p)
    }
}

/// How landmarks are picked from visit frequencies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionPolicy {
    /// Keep every point whose frequency exceeds the threshold.
    Threshold(f32),
    /// Draw as many points as the scale has, with replacement, proportionally
    /// to frequency; the distinct draws become landmarks.
    WeightedSampling,
}

/// Landmarks chosen for a new scale together with the statistics behind them.
#[derive(Debug, Clone)]
pub struct LandmarkSelection {
    /// Indices into the previous scale, ascending.
    pub landmarks: Vec<u32>,
    pub frequencies: VisitFrequencies,
}

/// Runs the walks of one scale and applies a [`SelectionPolicy`].
#[derive(Debug, Clone)]
pub struct LandmarkSelector {
    num_walks: usize,
    walk_length: WalkLength,
    policy: SelectionPolicy,
    out_of_core: bool,
    seed: u64,
}

impl LandmarkSelector {
    pub fn new(params: &HsneParameters, seed: u64) -> Self {
        let policy = if params.monte_carlo_sampling {
            SelectionPolicy::Threshold(params.landmark_threshold)
        } else {
            SelectionPolicy::WeightedSampling
        };
        Self {
            num_walks: params.num_walks,
            walk_length: params.walk_length,
            policy,
            out_of_core: params.out_of_core_computation,
            seed,
        }
    }

    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Estimate visit frequencies over `matrix` for the scale being built.
    ///
    /// Walks starting at point `i` use their own generator seeded from
    /// `(seed, scale, i)`, so the result does not depend on thread count.
    pub fn visit_frequencies(
        &self,
        matrix: &SparseMatrix,
        scale: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<VisitFrequencies, HsneError> {
        if self.out_of_core {
            self.simulate::<SparseVisits>(matrix, scale, cancel)
        } else {
            self.simulate::<DenseVisits>(matrix, scale, cancel)
        }
    }

    fn simulate<A: VisitAccumulator>(
        &self,
        matrix: &SparseMatrix,
        scale: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<VisitFrequencies, HsneError> {
        let n = matrix.num_rows();
        let sampler = WalkLengthSampler::new(self.walk_length)?;

        let visits = (0..n)
            .into_par_iter()
            .try_fold(
                || A::with_points(n),
                |mut acc, start| {
                    cancel::check(cancel)?;
                    let mut rng = unit_rng(self.seed, scale, STREAM_SELECTION, start as u64);
                    for _ in 0..self.num_walks {
                        let mut current = start as u32;
                        for _ in 0..sampler.sample(&mut rng) {
                            match step(matrix.row(current as usize), &mut rng) {
                                Some(next) => {
                                    acc.record(next);
                                    current = next;
                                }
                                None => break,
                            }
                        }
                    }
                    Ok::<A, HsneError>(acc)
                },
            )
            .try_reduce(
                || A::with_points(n),
                |mut left, right| {
                    left.merge(right);
                    Ok(left)
                },
            )?;

        Ok(VisitFrequencies::from_counts(n, visits.into_counts()))
    }

    /// Select the landmarks of `scale` from the transition matrix of `scale - 1`.
    pub fn select(
        &self,
        matrix: &SparseMatrix,
        scale: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<LandmarkSelection, HsneError> {
        let frequencies = self.visit_frequencies(matrix, scale, cancel)?;
        let landmarks = self.apply_policy(&frequencies, scale)?;
        Ok(LandmarkSelection {
            landmarks,
            frequencies,
        })
    }

    /// Pick landmarks from precomputed frequencies.
    pub fn apply_policy(
        &self,
        frequencies: &VisitFrequencies,
        scale: usize,
    ) -> Result<Vec<u32>, HsneError> {
        let landmarks: Vec<u32> = match self.policy {
            SelectionPolicy::Threshold(tau) => frequencies
                .iter()
                .filter(|&(_, f)| f > tau as f64)
                .map(|(p, _)| p)
                .collect(),
            SelectionPolicy::WeightedSampling => {
                if frequencies.visited() == 0 {
                    return Err(HsneError::EmptyScale { scale });
                }
                let dist = WeightedIndex::new(frequencies.counts.iter().map(|&(_, c)| c))
                    .map_err(|_| HsneError::EmptyScale { scale })?;
                let mut rng = unit_rng(self.seed, scale, STREAM_SAMPLING, 0);
                let mut drawn = vec![false; frequencies.visited()];
                for _ in 0..frequencies.num_points() {
                    drawn[dist.sample(&mut rng)] = true;
                }
                frequencies
                    .counts
                    .iter()
                    .zip(drawn)
                    .filter(|&(_, hit)| hit)
                    .map(|(&(p, _), _)| p)
                    .collect()
            }
        };

        if landmarks.is_empty() {
            return Err(HsneError::EmptyScale { scale });
        }
        Ok(landmarks)
    }
}
