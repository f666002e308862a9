use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

use crate::HsneError;

/// Length of the random walks used for landmark selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WalkLength {
    /// Every walk takes exactly this many steps.
    Fixed(usize),
    /// Walk lengths follow a geometric distribution (support 1, 2, ...) with this mean.
    Geometric { mean: f32 },
}

impl Default for WalkLength {
    fn default() -> Self {
        WalkLength::Fixed(15)
    }
}

/// Hierarchy construction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HsneParameters {
    /// Negative values request a fresh random seed.
    pub seed: i64,

    // Landmark selection
    pub landmark_threshold: f32,
    pub num_walks: usize,
    pub walk_length: WalkLength,
    pub monte_carlo_sampling: bool,
    pub out_of_core_computation: bool,

    // Neighbourhood graph
    pub num_neighbors: usize,
    pub num_trees: usize,
    pub num_checks: usize,
    pub leaf_max_size: usize,
    pub perplexity_multiplier: f32,

    // Transition matrices
    pub transition_matrix_prune_thresh: f32,
    pub num_walks_per_landmark: usize,
    pub max_influence_walk_length: usize,
}

impl Default for HsneParameters {
    fn default() -> Self {
        Self {
            seed: 0,

            // Landmark selection
            landmark_threshold: 1e-3,
            num_walks: 10,
            walk_length: WalkLength::default(),
            monte_carlo_sampling: true,
            out_of_core_computation: false,

            // Neighbourhood graph
            num_neighbors: 30,
            num_trees: 4,
            num_checks: 1024,
            leaf_max_size: 8,
            perplexity_multiplier: 3.0,

            // Transition matrices
            transition_matrix_prune_thresh: 1e-3,
            num_walks_per_landmark: 100,
            max_influence_walk_length: 100,
        }
    }
}

/// Visits a landmark needs, as a multiple of the average visits per point.
pub const RELATIVE_LANDMARK_THRESHOLD: f32 = 1.5;

/// Frequency threshold keeping points visited more than
/// [`RELATIVE_LANDMARK_THRESHOLD`] times the average over `num_points` points.
pub fn suggested_landmark_threshold(num_points: usize) -> f32 {
    (RELATIVE_LANDMARK_THRESHOLD / num_points.max(1) as f32).min(1.0)
}

impl HsneParameters {
    /// Defaults with the landmark threshold scaled to a data set of `num_points`.
    ///
    /// The fixed default of `1e-3` only matches inputs of about a thousand
    /// points; above that the average visit frequency falls below it and
    /// selection comes back empty.
    pub fn for_point_count(num_points: usize) -> Self {
        Self {
            landmark_threshold: suggested_landmark_threshold(num_points),
            ..Self::default()
        }
    }

    /// Target perplexity of the scale 0 kernel. Never below 1.
    pub fn perplexity(&self) -> f32 {
        (self.num_neighbors as f32 / self.perplexity_multiplier).max(1.0)
    }

    /// Reject out-of-range values with [`HsneError::Parameter`].
    pub fn validate(&self) -> Result<(), HsneError> {
        fn positive(name: &str, value: usize) -> Result<(), HsneError> {
            if value == 0 {
                return Err(HsneError::Parameter(format!("{name} must be positive")));
            }
            Ok(())
        }

        positive("num_neighbors", self.num_neighbors)?;
        positive("num_trees", self.num_trees)?;
        positive("num_checks", self.num_checks)?;
        positive("num_walks", self.num_walks)?;
        positive("num_walks_per_landmark", self.num_walks_per_landmark)?;
        positive("max_influence_walk_length", self.max_influence_walk_length)?;
        positive("leaf_max_size", self.leaf_max_size)?;

        if !self.landmark_threshold.is_finite() || !(0.0..=1.0).contains(&self.landmark_threshold)
        {
            return Err(HsneError::Parameter(format!(
                "landmark_threshold must lie in [0, 1], got {}",
                self.landmark_threshold
            )));
        }
        if !self.transition_matrix_prune_thresh.is_finite()
            || !(0.0..1.0).contains(&self.transition_matrix_prune_thresh)
        {
            return Err(HsneError::Parameter(format!(
                "transition_matrix_prune_thresh must lie in [0, 1), got {}",
                self.transition_matrix_prune_thresh
            )));
        }
        if !self.perplexity_multiplier.is_finite() || self.perplexity_multiplier <= 0.0 {
            return Err(HsneError::Parameter(
                "perplexity_multiplier must be a positive number".to_string(),
            ));
        }
        match self.walk_length {
            WalkLength::Fixed(0) => {
                return Err(HsneError::Parameter(
                    "walk_length must be at least one step".to_string(),
                ))
            }
            WalkLength::Geometric { mean } if !mean.is_finite() || mean < 1.0 => {
                return Err(HsneError::Parameter(format!(
                    "geometric walk length mean must be >= 1, got {mean}"
                )))
            }
            _ => {}
        }
        Ok(())
    }
}

/// Parameter table as a foreign caller marshals it, with signed counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawParameters {
    pub seed: i64,
    pub landmark_threshold: f32,
    pub num_neighbors: i64,
    pub num_trees: i64,
    pub num_checks: i64,
    pub transition_matrix_prune_thresh: f32,
    pub num_walks: i64,
    pub num_walks_per_landmark: i64,
    pub monte_carlo_sampling: bool,
    pub out_of_core_computation: bool,
}

impl TryFrom<RawParameters> for HsneParameters {
    type Error = HsneError;

    fn try_from(raw: RawParameters) -> Result<Self, Self::Error> {
        fn count(name: &str, value: i64) -> Result<usize, HsneError> {
            usize::try_from(value).map_err(|_| {
                HsneError::Parameter(format!("{name} must not be negative, got {value}"))
            })
        }

        let params = HsneParameters {
            seed: raw.seed,
            landmark_threshold: raw.landmark_threshold,
            num_neighbors: count("num_neighbors", raw.num_neighbors)?,
            num_trees: count("num_trees", raw.num_trees)?,
            num_checks: count("num_checks", raw.num_checks)?,
            transition_matrix_prune_thresh: raw.transition_matrix_prune_thresh,
            num_walks: count("num_walks", raw.num_walks)?,
            num_walks_per_landmark: count("num_walks_per_landmark", raw.num_walks_per_landmark)?,
            monte_carlo_sampling: raw.monte_carlo_sampling,
            out_of_core_computation: raw.out_of_core_computation,
            ..HsneParameters::default()
        };
        params.validate()?;
        Ok(params)
    }
}
