use std::time::Instant;

use crate::aggregate::ScaleAggregator;
use crate::aknn::build_neighbor_graph;
use crate::cancel::{self, CancellationToken};
use crate::config::HsneParameters;
use crate::landmarks::LandmarkSelector;
use crate::observer::{BuildEvent, BuildObserver, NoopObserver};
use crate::points::PointSet;
use crate::sparse::SparseMatrix;
use crate::transition::TransitionMatrixBuilder;
use crate::walk::{unit_seed, STREAM_TREES};
use crate::HsneError;

static NOOP: NoopObserver = NoopObserver;

/// Observer and cancellation flag threaded through a build.
#[derive(Clone, Copy)]
pub struct BuildHooks<'a> {
    pub observer: &'a dyn BuildObserver,
    pub cancel: Option<&'a CancellationToken>,
}

impl<'a> BuildHooks<'a> {
    pub fn new(observer: &'a dyn BuildObserver) -> Self {
        Self {
            observer,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl Default for BuildHooks<'_> {
    fn default() -> Self {
        Self::new(&NOOP)
    }
}

/// One level of the hierarchy.
///
/// Scale 0 holds every original point: its landmark lists are the identity
/// and every weight is one. A coarser scale references its landmarks by
/// index into the scale below it.
#[derive(Debug, Clone, PartialEq)]
pub struct Scale {
    pub(crate) transition_matrix: SparseMatrix,
    pub(crate) landmark_to_original: Vec<u32>,
    pub(crate) landmark_to_previous: Vec<u32>,
    pub(crate) previous_to_landmark: Vec<Option<u32>>,
    pub(crate) landmark_weights: Vec<f32>,
    pub(crate) area_of_influence: SparseMatrix,
}

impl Scale {
    fn data_scale(transition_matrix: SparseMatrix) -> Self {
        let n = transition_matrix.num_rows();
        let identity: Vec<u32> = (0..n as u32).collect();
        Self {
            transition_matrix,
            landmark_to_original: identity.clone(),
            landmark_to_previous: identity.clone(),
            previous_to_landmark: identity.into_iter().map(Some).collect(),
            landmark_weights: vec![1.0; n],
            area_of_influence: SparseMatrix::with_cols(n),
        }
    }

    /// Number of points (landmarks) in this scale.
    pub fn len(&self) -> usize {
        self.landmark_weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmark_weights.is_empty()
    }

    pub fn transition_matrix(&self) -> &SparseMatrix {
        &self.transition_matrix
    }

    /// Landmark set: indices into the previous scale.
    pub fn landmarks(&self) -> &[u32] {
        &self.landmark_to_previous
    }

    pub fn landmark_to_original(&self) -> &[u32] {
        &self.landmark_to_original
    }

    /// For each point of the previous scale, its landmark id here if it survived.
    pub fn previous_to_landmark(&self) -> &[Option<u32>] {
        &self.previous_to_landmark
    }

    pub fn landmark_weights(&self) -> &[f32] {
        &self.landmark_weights
    }

    /// Previous-scale points x landmarks. Has no rows at scale 0.
    pub fn area_of_influence(&self) -> &SparseMatrix {
        &self.area_of_influence
    }

    /// For each point of the previous scale, the landmark holding the largest
    /// share of its influence. Empty at scale 0.
    pub fn best_representatives(&self) -> Vec<u32> {
        self.area_of_influence
            .rows()
            .iter()
            .map(|row| row.argmax().unwrap_or(0))
            .collect()
    }
}

/// Lifecycle of a [`Hierarchy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyState {
    Empty,
    /// Scale 0 is built.
    Initialized,
    /// At least one coarser scale has been appended.
    Growing,
}

/// Append-only sequence of scales plus the metadata needed to rebuild it.
#[derive(Debug, Clone, PartialEq)]
pub struct Hierarchy {
    params: HsneParameters,
    seed: u64,
    dim: usize,
    num_points: usize,
    scales: Vec<Scale>,
}

impl Hierarchy {
    /// Empty hierarchy. A negative `params.seed` is replaced by a random one.
    pub fn new(params: HsneParameters) -> Result<Self, HsneError> {
        params.validate()?;
        let seed = if params.seed < 0 {
            rand::random::<u64>() >> 1
        } else {
            params.seed as u64
        };
        Ok(Self {
            params,
            seed,
            dim: 0,
            num_points: 0,
            scales: Vec::new(),
        })
    }

    pub(crate) fn from_parts(
        params: HsneParameters,
        seed: u64,
        dim: usize,
        num_points: usize,
        scales: Vec<Scale>,
    ) -> Self {
        Self {
            params,
            seed,
            dim,
            num_points,
            scales,
        }
    }

    pub fn parameters(&self) -> &HsneParameters {
        &self.params
    }

    /// Seed actually used for construction.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn dimensionality(&self) -> usize {
        self.dim
    }

    /// Number of original points.
    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn state(&self) -> HierarchyState {
        match self.scales.len() {
            0 => HierarchyState::Empty,
            1 => HierarchyState::Initialized,
            _ => HierarchyState::Growing,
        }
    }

    pub fn scale_count(&self) -> usize {
        self.scales.len()
    }

    pub fn scale_at(&self, idx: usize) -> Result<&Scale, HsneError> {
        self.scales.get(idx).ok_or(HsneError::ScaleOutOfRange {
            scale: idx,
            count: self.scales.len(),
        })
    }

    pub fn scales(&self) -> &[Scale] {
        &self.scales
    }

    /// Coarsest scale built so far.
    pub fn top_scale(&self) -> Option<&Scale> {
        self.scales.last()
    }

    /// Build scale 0 from a row-major `points` buffer with `dim` columns.
    pub fn initialize(&mut self, points: &[f32], dim: usize) -> Result<(), HsneError> {
        self.initialize_with(points, dim, BuildHooks::default())
    }

    pub fn initialize_with(
        &mut self,
        points: &[f32],
        dim: usize,
        hooks: BuildHooks<'_>,
    ) -> Result<(), HsneError> {
        if !self.scales.is_empty() {
            return Err(HsneError::AlreadyInitialized);
        }
        let points = PointSet::new(points, dim)?;
        let params = &self.params;

        let start = Instant::now();
        let graph = build_neighbor_graph(
            &points,
            params.num_neighbors,
            params.num_trees,
            params.num_checks,
            params.leaf_max_size,
            unit_seed(self.seed, 0, STREAM_TREES, 0),
            hooks.cancel,
        )?;
        hooks.observer.on_event(&BuildEvent::NeighborGraphBuilt {
            points: points.len(),
            neighbors: graph.k(),
            trees: params.num_trees,
            elapsed: start.elapsed(),
        });

        let start = Instant::now();
        cancel::check(hooks.cancel)?;
        let matrix = TransitionMatrixBuilder::from_params(params).build(&graph)?;
        hooks.observer.on_event(&BuildEvent::ScaleInitialized {
            points: matrix.num_rows(),
            nonzeros: matrix.nnz(),
            elapsed: start.elapsed(),
        });

        self.dim = dim;
        self.num_points = points.len();
        self.scales.push(Scale::data_scale(matrix));
        Ok(())
    }

    /// Append exactly one coarser scale.
    ///
    /// Nothing is appended when selection collapses ([`HsneError::EmptyScale`]),
    /// a row degenerates or the build is cancelled.
    pub fn add_scale(&mut self) -> Result<&Scale, HsneError> {
        self.add_scale_with(BuildHooks::default())
    }

    pub fn add_scale_with(&mut self, hooks: BuildHooks<'_>) -> Result<&Scale, HsneError> {
        let previous = self.scales.last().ok_or(HsneError::NotInitialized)?;
        let scale_idx = self.scales.len();

        let start = Instant::now();
        let selector = LandmarkSelector::new(&self.params, self.seed);
        let selection = selector.select(&previous.transition_matrix, scale_idx, hooks.cancel)?;
        hooks.observer.on_event(&BuildEvent::LandmarksSelected {
            scale: scale_idx,
            candidates: previous.len(),
            landmarks: selection.landmarks.len(),
            total_steps: selection.frequencies.total_visits(),
            elapsed: start.elapsed(),
        });

        let start = Instant::now();
        let aggregator = ScaleAggregator::new(&self.params, self.seed);
        let aggregated = aggregator.aggregate(
            &previous.transition_matrix,
            &previous.landmark_weights,
            &selection.landmarks,
            &selection.frequencies,
            scale_idx,
            hooks.cancel,
        )?;
        if aggregated.unreached > 0 {
            hooks.observer.on_event(&BuildEvent::UnreachedPoints {
                scale: scale_idx,
                count: aggregated.unreached,
            });
        }

        let landmark_to_original = selection
            .landmarks
            .iter()
            .map(|&p| previous.landmark_to_original[p as usize])
            .collect();
        let scale = Scale {
            transition_matrix: aggregated.transition_matrix,
            landmark_to_original,
            landmark_to_previous: selection.landmarks,
            previous_to_landmark: aggregated.previous_to_landmark,
            landmark_weights: aggregated.landmark_weights,
            area_of_influence: aggregated.area_of_influence,
        };
        hooks.observer.on_event(&BuildEvent::ScaleAdded {
            scale: scale_idx,
            landmarks: scale.len(),
            nonzeros: scale.transition_matrix.nnz(),
            elapsed: start.elapsed(),
        });

        self.scales.push(scale);
        Ok(&self.scales[scale_idx])
    }

    /// For every original point, the landmark of `scale` that represents it.
    ///
    /// Composes [`Scale::best_representatives`] from scale 1 upwards; scale 0
    /// maps every point to itself.
    pub fn datascale_mapping(&self, scale: usize) -> Result<Vec<u32>, HsneError> {
        self.scale_at(scale)?;
        let mut mapping: Vec<u32> = (0..self.num_points as u32).collect();
        for s in &self.scales[1..=scale] {
            let best = s.best_representatives();
            for m in mapping.iter_mut() {
                *m = best[*m as usize];
            }
        }
        Ok(mapping)
    }
}
