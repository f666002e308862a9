//! Build events and the observer interface that receives them.
//!
//! The library never logs on its own. Callers pass a [`BuildObserver`]
//! into construction and decide where events go; [`TracingObserver`]
//! forwards them to `tracing`.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

/// A progress or diagnostic event emitted while building a hierarchy.
#[derive(Debug, Clone)]
pub enum BuildEvent<'a> {
    /// The approximate kNN graph of scale 0 is complete.
    NeighborGraphBuilt {
        points: usize,
        neighbors: usize,
        trees: usize,
        elapsed: Duration,
    },
    /// Scale 0 transition matrix is complete.
    ScaleInitialized {
        points: usize,
        nonzeros: usize,
        elapsed: Duration,
    },
    /// Random walks over `scale - 1` selected the landmarks of `scale`.
    LandmarksSelected {
        scale: usize,
        candidates: usize,
        landmarks: usize,
        total_steps: u64,
        elapsed: Duration,
    },
    /// Fine points whose influence walks never reached a landmark.
    UnreachedPoints { scale: usize, count: usize },
    /// A coarser scale was appended.
    ScaleAdded {
        scale: usize,
        landmarks: usize,
        nonzeros: usize,
        elapsed: Duration,
    },
    /// The hierarchy was written to disk.
    HierarchySaved {
        path: &'a Path,
        scales: usize,
        elapsed: Duration,
    },
    /// The build was aborted.
    BuildFailed { message: &'a str },
}

/// Receiver of [`BuildEvent`]s.
pub trait BuildObserver: Sync {
    fn on_event(&self, event: &BuildEvent<'_>);
}

/// Observer that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl BuildObserver for NoopObserver {
    fn on_event(&self, _event: &BuildEvent<'_>) {}
}

impl<F> BuildObserver for F
where
    F: Fn(&BuildEvent<'_>) + Sync,
{
    fn on_event(&self, event: &BuildEvent<'_>) {
        self(event)
    }
}

/// Observer that emits structured `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl BuildObserver for TracingObserver {
    fn on_event(&self, event: &BuildEvent<'_>) {
        match event {
            BuildEvent::NeighborGraphBuilt {
                points,
                neighbors,
                trees,
                elapsed,
            } => info!(
                points,
                neighbors,
                trees,
                elapsed_ms = elapsed.as_millis() as u64,
                "approximate neighbour graph built"
            ),
            BuildEvent::ScaleInitialized {
                points,
                nonzeros,
                elapsed,
            } => info!(
                points,
                nonzeros,
                elapsed_ms = elapsed.as_millis() as u64,
                "scale 0 initialized"
            ),
            BuildEvent::LandmarksSelected {
                scale,
                candidates,
                landmarks,
                total_steps,
                elapsed,
            } => info!(
                scale,
                candidates,
                landmarks,
                total_steps,
                elapsed_ms = elapsed.as_millis() as u64,
                "landmarks selected"
            ),
            BuildEvent::UnreachedPoints { scale, count } => warn!(
                scale,
                count, "influence walks did not reach a landmark; using graph fallback"
            ),
            BuildEvent::ScaleAdded {
                scale,
                landmarks,
                nonzeros,
                elapsed,
            } => info!(
                scale,
                landmarks,
                nonzeros,
                elapsed_ms = elapsed.as_millis() as u64,
                "scale added"
            ),
            BuildEvent::HierarchySaved {
                path,
                scales,
                elapsed,
            } => info!(
                path = %path.display(),
                scales,
                elapsed_ms = elapsed.as_millis() as u64,
                "hierarchy saved"
            ),
            BuildEvent::BuildFailed { message } => warn!(message, "hierarchy build failed"),
        }
    }
}
