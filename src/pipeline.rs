//! One-call construction: build every scale, save, and report.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;

use crate::config::HsneParameters;
use crate::hierarchy::{BuildHooks, Hierarchy};
use crate::observer::{BuildEvent, BuildObserver};
use crate::HsneError;

/// Outcome of [`run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub success: bool,
    /// Empty on success, otherwise a description of the failure.
    pub message: String,
}

impl BuildReport {
    fn ok() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            message,
        }
    }
}

/// Number of scales worth building for `num_points` points.
pub fn suggested_scale_count(num_points: usize) -> usize {
    let levels = (num_points as f64 / 100.0).log10().floor();
    if levels.is_finite() && levels > 2.0 {
        levels as usize
    } else {
        2
    }
}

/// Build a hierarchy with `num_scales` scales, scale 0 included.
pub fn build_hierarchy(
    points: &[f32],
    dim: usize,
    num_scales: i64,
    params: HsneParameters,
    hooks: BuildHooks<'_>,
) -> Result<Hierarchy, HsneError> {
    if num_scales <= 0 {
        return Err(HsneError::Parameter(format!(
            "num_scales must be positive, got {num_scales}"
        )));
    }
    let mut hierarchy = Hierarchy::new(params)?;
    hierarchy.initialize_with(points, dim, hooks)?;
    for _ in 1..num_scales {
        hierarchy.add_scale_with(hooks)?;
    }
    Ok(hierarchy)
}

/// Build a hierarchy and write it to `path`.
///
/// Never panics: errors and panics raised during the build are turned into
/// a failed [`BuildReport`] and reported to `observer` as
/// [`BuildEvent::BuildFailed`].
pub fn run(
    points: &[f32],
    dim: usize,
    path: &Path,
    num_scales: i64,
    params: HsneParameters,
    observer: &dyn BuildObserver,
) -> BuildReport {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let hierarchy =
            build_hierarchy(points, dim, num_scales, params, BuildHooks::new(observer))?;
        let start = Instant::now();
        hierarchy.save_to_path(path)?;
        observer.on_event(&BuildEvent::HierarchySaved {
            path,
            scales: hierarchy.scale_count(),
            elapsed: start.elapsed(),
        });
        Ok::<(), HsneError>(())
    }));

    let message = match outcome {
        Ok(Ok(())) => return BuildReport::ok(),
        Ok(Err(err)) => err.to_string(),
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            format!("internal error: {detail}")
        }
    };
    observer.on_event(&BuildEvent::BuildFailed { message: &message });
    BuildReport::failed(message)
}

/// [`run`] with parameters and scale count chosen for the size of `points`.
///
/// Uses [`HsneParameters::for_point_count`] and [`suggested_scale_count`].
pub fn run_with_defaults(
    points: &[f32],
    dim: usize,
    path: &Path,
    observer: &dyn BuildObserver,
) -> BuildReport {
    let num_points = if dim == 0 { 0 } else { points.len() / dim };
    run(
        points,
        dim,
        path,
        suggested_scale_count(num_points) as i64,
        HsneParameters::for_point_count(num_points),
        observer,
    )
}
