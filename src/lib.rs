//! Hierarchical landmark construction for HSNE-style multi-scale analytics.
//!
//! A point cloud is summarised by a sequence of scales. Scale 0 is the
//! row-stochastic similarity graph of the original points, built from an
//! approximate kNN graph. Every further scale keeps the points that random
//! walks over the previous scale visit most often and aggregates the
//! transition mass of the discarded points onto them.
//!
//! ```no_run
//! use hsne_rs::{Hierarchy, HsneParameters};
//!
//! # fn demo(points: &[f32]) -> Result<(), hsne_rs::HsneError> {
//! let mut hierarchy = Hierarchy::new(HsneParameters::default())?;
//! hierarchy.initialize(points, 10)?;
//! hierarchy.add_scale()?;
//! hierarchy.save_to_path("points.hsne")?;
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod aknn;
pub mod cancel;
pub mod config;
pub mod hierarchy;
pub mod io;
pub mod landmarks;
pub mod observer;
pub mod persist;
pub mod pipeline;
pub mod points;
pub mod sparse;
pub mod transition;

mod math;
mod walk;

pub use aggregate::{AggregatedScale, ScaleAggregator};
pub use aknn::{NeighborGraph, RandomizedKdForest};
pub use cancel::CancellationToken;
pub use config::{suggested_landmark_threshold, HsneParameters, RawParameters, WalkLength};
pub use hierarchy::{BuildHooks, Hierarchy, HierarchyState, Scale};
pub use landmarks::{
    DenseVisits, LandmarkSelection, LandmarkSelector, SelectionPolicy, SparseVisits,
    VisitAccumulator, VisitFrequencies,
};
pub use observer::{BuildEvent, BuildObserver, NoopObserver, TracingObserver};
pub use pipeline::{build_hierarchy, run, run_with_defaults, suggested_scale_count, BuildReport};
pub use points::PointSet;
pub use sparse::{SparseMatrix, SparseRow};
pub use transition::TransitionMatrixBuilder;

#[cfg(test)]
mod tests;

/// Errors that can occur while building, reading or writing a hierarchy.
#[derive(thiserror::Error, Debug)]
pub enum HsneError {
    /// Returned when the input matrix is empty, ragged or contains non-finite values.
    #[error("invalid input shape: {0}")]
    InputShape(String),
    /// Returned when there are too few points to give every point `neighbors` neighbours.
    #[error("insufficient data: {points} points cannot provide {neighbors} neighbours per point")]
    InsufficientData { points: usize, neighbors: usize },
    /// Returned when pruning removes every entry of a transition row.
    #[error("transition row {row} is empty after pruning at threshold {threshold}")]
    DegenerateRow { row: usize, threshold: f32 },
    /// Returned when landmark selection keeps no point of the previous scale.
    #[error("landmark selection for scale {scale} produced no landmarks")]
    EmptyScale { scale: usize },
    /// Returned when persistence encounters an I/O failure.
    #[error("i/o error while reading or writing a hierarchy: {0}")]
    Persistence(#[from] std::io::Error),
    /// Returned when the persisted bytes are inconsistent or corrupt.
    #[error("invalid persisted hierarchy: {0}")]
    InvalidPersistence(&'static str),
    /// Returned when a configuration value is out of range.
    #[error("invalid parameter: {0}")]
    Parameter(String),
    /// Returned when a scale is requested before scale 0 exists.
    #[error("hierarchy is empty; call `initialize` first")]
    NotInitialized,
    /// Returned when `initialize` is called on a hierarchy that already has scales.
    #[error("hierarchy is already initialized")]
    AlreadyInitialized,
    /// Returned when a scale index does not exist.
    #[error("scale {scale} does not exist, hierarchy has {count} scales")]
    ScaleOutOfRange { scale: usize, count: usize },
    /// Returned when a cancellation token fired during construction.
    #[error("hierarchy construction was cancelled")]
    Cancelled,
}

impl HsneError {
    /// True for the errors raised while saving or loading a hierarchy.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            HsneError::Persistence(_) | HsneError::InvalidPersistence(_)
        )
    }
}
