use std::io::{self, Cursor, Write};
use std::sync::Mutex;

use rand::prelude::*;

use crate::aknn::{build_neighbor_graph, RandomizedKdForest};
use crate::io::{read_point_matrix_from_reader, write_fvecs_to_writer};
use crate::math::l2_distance_sqr;
use crate::persist::write_atomically;
use crate::{
    build_hierarchy, run, run_with_defaults, suggested_scale_count, BuildEvent, BuildHooks,
    BuildObserver, CancellationToken, Hierarchy, HierarchyState, HsneError, HsneParameters,
    LandmarkSelector, PointSet, RawParameters, SelectionPolicy, TransitionMatrixBuilder, WalkLength,
};

fn random_points(count: usize, dim: usize, rng: &mut StdRng) -> Vec<f32> {
    (0..count * dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect()
}

fn small_params() -> HsneParameters {
    HsneParameters {
        seed: 17,
        num_neighbors: 10,
        num_trees: 4,
        num_checks: 128,
        ..HsneParameters::default()
    }
}

fn build_small(seed: u64, num_scales: i64) -> Hierarchy {
    let mut rng = StdRng::seed_from_u64(seed);
    let points = random_points(300, 6, &mut rng);
    build_hierarchy(&points, 6, num_scales, small_params(), BuildHooks::default()).unwrap()
}

/// Accepts `remaining` bytes, then fails every write like a full disk.
struct FailAfter {
    remaining: usize,
}

impl Write for FailAfter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        let n = buf.len().min(self.remaining);
        self.remaining -= n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    fn names(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl BuildObserver for RecordingObserver {
    fn on_event(&self, event: &BuildEvent<'_>) {
        let name = match event {
            BuildEvent::NeighborGraphBuilt { .. } => "neighbor_graph",
            BuildEvent::ScaleInitialized { .. } => "scale_initialized",
            BuildEvent::LandmarksSelected { .. } => "landmarks_selected",
            BuildEvent::UnreachedPoints { .. } => "unreached",
            BuildEvent::ScaleAdded { .. } => "scale_added",
            BuildEvent::HierarchySaved { .. } => "saved",
            BuildEvent::BuildFailed { .. } => "failed",
        };
        self.events.lock().unwrap().push(name.to_string());
    }
}

#[test]
fn neighbor_graph_excludes_self_and_is_sorted() {
    let mut rng = StdRng::seed_from_u64(1);
    let data = random_points(200, 8, &mut rng);
    let points = PointSet::new(&data, 8).unwrap();
    let graph = build_neighbor_graph(&points, 8, 4, 256, 8, 3, None).unwrap();

    assert_eq!(graph.len(), 200);
    for i in 0..graph.len() {
        let ids = graph.neighbors(i);
        let dists = graph.distances(i);
        assert_eq!(ids.len(), 8);
        assert!(!ids.contains(&(i as u32)));
        assert!(dists.windows(2).all(|w| w[0] <= w[1]));
        let mut unique = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 8);
    }
}

#[test]
fn neighbor_graph_recall_against_brute_force() {
    let mut rng = StdRng::seed_from_u64(2);
    let dim = 8;
    let data = random_points(500, dim, &mut rng);
    let points = PointSet::new(&data, dim).unwrap();
    let k = 10;
    let graph = build_neighbor_graph(&points, k, 8, 512, 8, 5, None).unwrap();

    let mut hits = 0usize;
    for i in 0..points.len() {
        let mut exact: Vec<(f32, u32)> = (0..points.len())
            .filter(|&j| j != i)
            .map(|j| (l2_distance_sqr(points.point(i), points.point(j)), j as u32))
            .collect();
        exact.sort_by(|a, b| a.0.total_cmp(&b.0));
        let truth: Vec<u32> = exact.iter().take(k).map(|&(_, j)| j).collect();
        hits += graph
            .neighbors(i)
            .iter()
            .filter(|id| truth.contains(id))
            .count();
    }
    let recall = hits as f64 / (points.len() * k) as f64;
    assert!(recall >= 0.9, "recall = {recall}");
}

#[test]
fn forest_search_rejects_wrong_dimension() {
    let mut rng = StdRng::seed_from_u64(4);
    let data = random_points(50, 4, &mut rng);
    let points = PointSet::new(&data, 4).unwrap();
    let forest = RandomizedKdForest::build(&points, 2, 8, 9).unwrap();
    assert_eq!(forest.num_trees(), 2);
    let err = forest.search(&points, &[0.0; 3], 5, 64, None).unwrap_err();
    assert!(matches!(err, HsneError::InputShape(_)));
}

#[test]
fn too_few_points_is_insufficient_data() {
    let mut rng = StdRng::seed_from_u64(5);
    let data = random_points(30, 4, &mut rng);
    let mut hierarchy = Hierarchy::new(HsneParameters::default()).unwrap();
    let err = hierarchy.initialize(&data, 4).unwrap_err();
    assert!(matches!(
        err,
        HsneError::InsufficientData {
            points: 30,
            neighbors: 30
        }
    ));
    assert_eq!(hierarchy.state(), HierarchyState::Empty);
}

#[test]
fn malformed_input_is_rejected() {
    let mut hierarchy = Hierarchy::new(small_params()).unwrap();
    assert!(matches!(
        hierarchy.initialize(&[], 3),
        Err(HsneError::InputShape(_))
    ));
    assert!(matches!(
        hierarchy.initialize(&[1.0; 10], 3),
        Err(HsneError::InputShape(_))
    ));
    assert!(matches!(
        hierarchy.initialize(&[1.0; 6], 0),
        Err(HsneError::InputShape(_))
    ));
    let mut data = vec![0.5f32; 60];
    data[7] = f32::NAN;
    assert!(matches!(
        hierarchy.initialize(&data, 3),
        Err(HsneError::InputShape(_))
    ));
}

#[test]
fn lifecycle_errors() {
    let mut hierarchy = Hierarchy::new(small_params()).unwrap();
    assert!(matches!(hierarchy.add_scale(), Err(HsneError::NotInitialized)));

    let mut rng = StdRng::seed_from_u64(6);
    let data = random_points(100, 3, &mut rng);
    hierarchy.initialize(&data, 3).unwrap();
    assert_eq!(hierarchy.state(), HierarchyState::Initialized);
    assert!(matches!(
        hierarchy.initialize(&data, 3),
        Err(HsneError::AlreadyInitialized)
    ));
    assert!(matches!(
        hierarchy.scale_at(4),
        Err(HsneError::ScaleOutOfRange { scale: 4, count: 1 })
    ));
}

#[test]
fn duplicate_points_still_give_stochastic_rows() {
    let mut rng = StdRng::seed_from_u64(7);
    let base = random_points(40, 5, &mut rng);
    let mut data = base.clone();
    data.extend_from_slice(&base);
    data.extend(std::iter::repeat(0.25f32).take(20 * 5));

    let mut hierarchy = Hierarchy::new(small_params()).unwrap();
    hierarchy.initialize(&data, 5).unwrap();
    let scale0 = hierarchy.scale_at(0).unwrap();
    assert_eq!(scale0.len(), 100);
    assert!(scale0.transition_matrix().is_row_stochastic(1e-5));
}

#[test]
fn data_scale_is_identity_with_unit_weights() {
    let hierarchy = build_small(8, 1);
    let scale0 = hierarchy.scale_at(0).unwrap();
    assert_eq!(scale0.len(), 300);
    assert_eq!(scale0.transition_matrix().num_cols(), 300);
    assert!(scale0.transition_matrix().is_row_stochastic(1e-5));
    assert!(scale0.landmark_weights().iter().all(|&w| w == 1.0));
    assert!(scale0
        .landmark_to_original()
        .iter()
        .enumerate()
        .all(|(i, &p)| p as usize == i));
    assert_eq!(scale0.area_of_influence().num_rows(), 0);
}

#[test]
fn transition_rows_respect_prune_threshold() {
    let mut rng = StdRng::seed_from_u64(9);
    let data = random_points(150, 4, &mut rng);
    let points = PointSet::new(&data, 4).unwrap();
    let graph = build_neighbor_graph(&points, 12, 4, 256, 8, 1, None).unwrap();
    let matrix = TransitionMatrixBuilder::new(4.0, 0.02).build(&graph).unwrap();

    assert!(matrix.is_row_stochastic(1e-5));
    for row in matrix.rows() {
        assert!(!row.is_empty());
        assert!(row.len() <= 12);
    }
}

#[test]
fn dense_and_sparse_visit_counters_agree() {
    let hierarchy = build_small(10, 1);
    let matrix = hierarchy.scale_at(0).unwrap().transition_matrix();

    let dense_params = small_params();
    let sparse_params = HsneParameters {
        out_of_core_computation: true,
        ..small_params()
    };
    let dense = LandmarkSelector::new(&dense_params, 42)
        .select(matrix, 1, None)
        .unwrap();
    let sparse = LandmarkSelector::new(&sparse_params, 42)
        .select(matrix, 1, None)
        .unwrap();

    assert_eq!(dense.frequencies, sparse.frequencies);
    assert_eq!(dense.landmarks, sparse.landmarks);
    assert_eq!(dense.frequencies.total_visits(), 300 * 10 * 15);
}

#[test]
fn threshold_policy_keeps_frequent_points() {
    let hierarchy = build_small(11, 1);
    let matrix = hierarchy.scale_at(0).unwrap().transition_matrix();
    let selector =
        LandmarkSelector::new(&small_params(), 3).with_policy(SelectionPolicy::Threshold(0.004));
    let selection = selector.select(matrix, 1, None).unwrap();

    assert!(selection.landmarks.windows(2).all(|w| w[0] < w[1]));
    for &p in &selection.landmarks {
        assert!(selection.frequencies.frequency(p) > 0.004);
    }
    assert!(selection.landmarks.len() < 300);
}

#[test]
fn unreachable_threshold_fails_without_touching_hierarchy() {
    let mut rng = StdRng::seed_from_u64(12);
    let data = random_points(200, 4, &mut rng);
    let params = HsneParameters {
        landmark_threshold: 1.0,
        ..small_params()
    };
    let mut hierarchy = Hierarchy::new(params).unwrap();
    hierarchy.initialize(&data, 4).unwrap();
    let before = hierarchy.clone();

    let err = hierarchy.add_scale().unwrap_err();
    assert!(matches!(err, HsneError::EmptyScale { scale: 1 }));
    assert_eq!(hierarchy.scale_count(), 1);
    assert_eq!(hierarchy, before);
}

#[test]
fn weighted_sampling_selects_distinct_draws() {
    let mut rng = StdRng::seed_from_u64(13);
    let data = random_points(300, 5, &mut rng);
    let params = HsneParameters {
        monte_carlo_sampling: false,
        ..small_params()
    };
    let hierarchy = build_hierarchy(&data, 5, 2, params, BuildHooks::default()).unwrap();
    let scale1 = hierarchy.scale_at(1).unwrap();
    assert!(!scale1.is_empty());
    assert!(scale1.len() < 300);
    assert!(scale1.transition_matrix().is_row_stochastic(1e-5));
}

#[test]
fn geometric_walk_lengths_build() {
    let mut rng = StdRng::seed_from_u64(14);
    let data = random_points(250, 4, &mut rng);
    let params = HsneParameters {
        walk_length: WalkLength::Geometric { mean: 10.0 },
        ..small_params()
    };
    let hierarchy = build_hierarchy(&data, 4, 2, params, BuildHooks::default()).unwrap();
    assert_eq!(hierarchy.scale_count(), 2);
}

#[test]
fn three_scale_build_on_random_points() {
    let mut rng = StdRng::seed_from_u64(2024);
    let data = random_points(1000, 10, &mut rng);
    let params = HsneParameters {
        seed: 1,
        num_neighbors: 30,
        num_trees: 8,
        num_checks: 200,
        landmark_threshold: 1e-3,
        ..HsneParameters::default()
    };
    let hierarchy = build_hierarchy(&data, 10, 3, params, BuildHooks::default()).unwrap();

    assert_eq!(hierarchy.scale_count(), 3);
    assert_eq!(hierarchy.state(), HierarchyState::Growing);
    let sizes: Vec<usize> = hierarchy.scales().iter().map(|s| s.len()).collect();
    assert_eq!(sizes[0], 1000);
    assert!(sizes[1] < sizes[0], "sizes = {sizes:?}");
    assert!(sizes[2] < sizes[1], "sizes = {sizes:?}");

    for (s, scale) in hierarchy.scales().iter().enumerate() {
        assert!(scale.transition_matrix().is_row_stochastic(1e-5));
        if s == 0 {
            continue;
        }
        let previous = &hierarchy.scales()[s - 1];
        assert!(scale.landmarks().iter().all(|&l| (l as usize) < previous.len()));
        assert!(scale.area_of_influence().is_row_stochastic(1e-5));
        assert_eq!(scale.area_of_influence().num_rows(), previous.len());

        let previous_mass: f64 = previous.landmark_weights().iter().map(|&w| w as f64).sum();
        let mass: f64 = scale.landmark_weights().iter().map(|&w| w as f64).sum();
        assert!(
            (mass - previous_mass).abs() < 1e-3 * previous_mass,
            "scale {s}: {mass} vs {previous_mass}"
        );

        for (id, &p) in scale.landmarks().iter().enumerate() {
            assert_eq!(scale.previous_to_landmark()[p as usize], Some(id as u32));
            assert_eq!(
                scale.landmark_to_original()[id],
                previous.landmark_to_original()[p as usize]
            );
        }
    }

    let restored = Hierarchy::from_bytes(&hierarchy.to_bytes().unwrap()).unwrap();
    assert_eq!(
        restored.scale_at(2).unwrap().landmark_weights(),
        hierarchy.scale_at(2).unwrap().landmark_weights()
    );
}

#[test]
fn identical_seeds_give_identical_hierarchies() {
    let a = build_small(15, 3);
    let b = build_small(15, 3);
    assert_eq!(a, b);
    assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
}

#[test]
fn output_does_not_depend_on_thread_count() {
    let one = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
    let many = rayon::ThreadPoolBuilder::new().num_threads(8).build().unwrap();

    let single = one.install(|| build_small(15, 3).to_bytes().unwrap());
    let parallel = many.install(|| build_small(15, 3).to_bytes().unwrap());
    assert_eq!(single, parallel);
}

#[test]
fn negative_seed_is_resolved_and_recorded() {
    let params = HsneParameters {
        seed: -1,
        ..small_params()
    };
    let mut rng = StdRng::seed_from_u64(16);
    let data = random_points(120, 3, &mut rng);
    let mut hierarchy = Hierarchy::new(params).unwrap();
    hierarchy.initialize(&data, 3).unwrap();

    let restored = Hierarchy::from_bytes(&hierarchy.to_bytes().unwrap()).unwrap();
    assert_eq!(restored.seed(), hierarchy.seed());
    assert_eq!(restored.parameters().seed, -1);
}

#[test]
fn raw_parameters_convert_and_validate() {
    let raw = RawParameters {
        seed: 3,
        landmark_threshold: 0.01,
        num_neighbors: 20,
        num_trees: 4,
        num_checks: 256,
        transition_matrix_prune_thresh: 0.0,
        num_walks: 5,
        num_walks_per_landmark: 30,
        monte_carlo_sampling: true,
        out_of_core_computation: true,
    };
    let params = HsneParameters::try_from(raw).unwrap();
    assert_eq!(params.num_neighbors, 20);
    assert!(params.out_of_core_computation);

    let bad = RawParameters {
        num_trees: -1,
        ..raw
    };
    assert!(matches!(
        HsneParameters::try_from(bad),
        Err(HsneError::Parameter(_))
    ));
}

#[test]
fn persistence_round_trip_through_cursor() {
    let hierarchy = build_small(18, 3);
    let mut buffer = Cursor::new(Vec::new());
    hierarchy.save_to_writer(&mut buffer).unwrap();

    buffer.set_position(0);
    let restored = Hierarchy::load_from_reader(&mut buffer).unwrap();
    assert_eq!(restored, hierarchy);
    assert_eq!(restored.dimensionality(), 6);
    assert_eq!(restored.num_points(), 300);
}

#[test]
fn persistence_round_trip_through_file() {
    let hierarchy = build_small(19, 2);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("points.hsne");
    hierarchy.save_to_path(&path).unwrap();

    let restored = Hierarchy::load_from_path(&path).unwrap();
    assert_eq!(restored, hierarchy);
    let entries = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(entries, 1);
}

#[test]
fn corrupted_payload_is_detected() {
    let hierarchy = build_small(20, 2);
    let mut bytes = hierarchy.to_bytes().unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x5a;

    let err = Hierarchy::from_bytes(&bytes).unwrap_err();
    assert!(err.is_persistence(), "unexpected error: {err}");
}

#[test]
fn truncated_and_foreign_files_are_rejected() {
    let hierarchy = build_small(21, 2);
    let bytes = hierarchy.to_bytes().unwrap();

    let err = Hierarchy::from_bytes(&bytes[..bytes.len() - 3]).unwrap_err();
    assert!(err.is_persistence());

    let mut foreign = bytes.clone();
    foreign[..4].copy_from_slice(b"NOPE");
    assert!(matches!(
        Hierarchy::from_bytes(&foreign),
        Err(HsneError::InvalidPersistence(_))
    ));

    let mut future = bytes;
    future[4..8].copy_from_slice(&7u32.to_le_bytes());
    assert!(matches!(
        Hierarchy::from_bytes(&future),
        Err(HsneError::InvalidPersistence(_))
    ));
}

#[test]
fn failed_save_leaves_no_file_behind() {
    let hierarchy = build_small(22, 1);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("points.hsne");

    let err = hierarchy.save_to_path(&path).unwrap_err();
    assert!(err.is_persistence());
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn writer_failing_mid_stream_is_a_persistence_error() {
    let hierarchy = build_small(28, 2);
    assert!(hierarchy.to_bytes().unwrap().len() > 10_000);

    let err = hierarchy
        .save_to_writer(FailAfter { remaining: 10_000 })
        .unwrap_err();
    assert!(err.is_persistence(), "unexpected error: {err}");
    assert!(matches!(err, HsneError::Persistence(_)));
}

#[test]
fn interrupted_atomic_write_leaves_no_file_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("points.hsne");

    let err = write_atomically(&path, |writer| {
        writer.write_all(&[0xab; 20_000])?;
        writer.flush()?;
        Err(HsneError::Persistence(io::Error::new(
            io::ErrorKind::Other,
            "disk full",
        )))
    })
    .unwrap_err();

    assert!(err.is_persistence());
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn interrupted_atomic_write_keeps_previous_file() {
    let hierarchy = build_small(29, 2);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("points.hsne");
    hierarchy.save_to_path(&path).unwrap();
    let before = std::fs::read(&path).unwrap();

    let result = write_atomically(&path, |writer| {
        writer.write_all(b"HSN1")?;
        hierarchy.save_to_writer(FailAfter { remaining: 512 })
    });

    assert!(result.unwrap_err().is_persistence());
    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    assert_eq!(Hierarchy::load_from_path(&path).unwrap(), hierarchy);
}

#[test]
fn empty_hierarchy_cannot_be_saved() {
    let hierarchy = Hierarchy::new(small_params()).unwrap();
    assert!(matches!(
        hierarchy.to_bytes(),
        Err(HsneError::NotInitialized)
    ));
}

#[test]
fn run_reports_success_and_events() {
    let mut rng = StdRng::seed_from_u64(23);
    let data = random_points(300, 4, &mut rng);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.hsne");
    let observer = RecordingObserver::default();

    let report = run(&data, 4, &path, 2, small_params(), &observer);
    assert!(report.success, "{}", report.message);
    assert!(report.message.is_empty());

    let names = observer.names();
    assert_eq!(names.first().map(String::as_str), Some("neighbor_graph"));
    assert!(names.contains(&"scale_added".to_string()));
    assert_eq!(names.last().map(String::as_str), Some("saved"));

    let restored = Hierarchy::load_from_path(&path).unwrap();
    assert_eq!(restored.scale_count(), 2);
}

#[test]
fn default_build_scales_to_large_inputs() {
    let mut rng = StdRng::seed_from_u64(30);
    let num_points = 20_000;
    let data = random_points(num_points, 10, &mut rng);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("large.hsne");
    let observer = RecordingObserver::default();

    let report = run_with_defaults(&data, 10, &path, &observer);
    assert!(report.success, "{}", report.message);

    let hierarchy = Hierarchy::load_from_path(&path).unwrap();
    assert_eq!(hierarchy.scale_count(), suggested_scale_count(num_points));
    assert_eq!(
        hierarchy.parameters(),
        &HsneParameters::for_point_count(num_points)
    );
    let sizes: Vec<usize> = hierarchy.scales().iter().map(|s| s.len()).collect();
    assert_eq!(sizes[0], num_points);
    for pair in sizes.windows(2) {
        assert!(pair[1] > 0 && pair[1] < pair[0], "sizes = {sizes:?}");
    }
}

#[test]
fn run_reports_failures_without_writing() {
    let mut rng = StdRng::seed_from_u64(24);
    let data = random_points(100, 4, &mut rng);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.hsne");
    let observer = RecordingObserver::default();

    let report = run(&data, 4, &path, 0, small_params(), &observer);
    assert!(!report.success);
    assert!(report.message.contains("num_scales"));
    assert_eq!(observer.names(), vec!["failed".to_string()]);

    let report = run(&data[..40], 4, &path, 2, small_params(), &observer);
    assert!(!report.success);
    assert!(report.message.contains("insufficient data"));
    assert!(!path.exists());
}

#[test]
fn cancelled_builds_append_nothing() {
    let mut rng = StdRng::seed_from_u64(25);
    let data = random_points(200, 4, &mut rng);
    let token = CancellationToken::new();
    token.cancel();

    let mut hierarchy = Hierarchy::new(small_params()).unwrap();
    let hooks = BuildHooks::default().with_cancel(&token);
    assert!(matches!(
        hierarchy.initialize_with(&data, 4, hooks),
        Err(HsneError::Cancelled)
    ));
    assert_eq!(hierarchy.state(), HierarchyState::Empty);

    hierarchy.initialize(&data, 4).unwrap();
    assert!(matches!(
        hierarchy.add_scale_with(hooks),
        Err(HsneError::Cancelled)
    ));
    assert_eq!(hierarchy.scale_count(), 1);
}

#[test]
fn datascale_mapping_points_landmarks_to_themselves() {
    let hierarchy = build_small(26, 3);
    assert_eq!(
        hierarchy.datascale_mapping(0).unwrap(),
        (0..300).collect::<Vec<u32>>()
    );

    let top = hierarchy.scale_at(2).unwrap();
    let mapping = hierarchy.datascale_mapping(2).unwrap();
    assert_eq!(mapping.len(), 300);
    assert!(mapping.iter().all(|&m| (m as usize) < top.len()));
    for (id, &original) in top.landmark_to_original().iter().enumerate() {
        assert_eq!(mapping[original as usize], id as u32);
    }
    assert!(matches!(
        hierarchy.datascale_mapping(3),
        Err(HsneError::ScaleOutOfRange { .. })
    ));
}

#[test]
fn suggested_scale_counts() {
    assert_eq!(suggested_scale_count(0), 2);
    assert_eq!(suggested_scale_count(1_000), 2);
    assert_eq!(suggested_scale_count(100_000), 3);
    assert_eq!(suggested_scale_count(1_000_000), 4);
}

#[test]
fn fvecs_point_matrix_round_trip() {
    let mut rng = StdRng::seed_from_u64(27);
    let data = random_points(12, 5, &mut rng);
    let mut bytes = Vec::new();
    write_fvecs_to_writer(&mut bytes, &data, 5).unwrap();
    assert_eq!(bytes.len(), 12 * (4 + 5 * 4));

    let matrix = read_point_matrix_from_reader(Cursor::new(&bytes), None).unwrap();
    assert_eq!(matrix.dim, 5);
    assert_eq!(matrix.len(), 12);
    assert_eq!(matrix.data, data);

    let limited = read_point_matrix_from_reader(Cursor::new(&bytes), Some(4)).unwrap();
    assert_eq!(limited.len(), 4);
    assert_eq!(limited.data[..], data[..20]);
}

#[test]
fn fvecs_with_mixed_dimensions_is_rejected() {
    let mut bytes = Vec::new();
    write_fvecs_to_writer(&mut bytes, &[1.0, 2.0, 3.0], 3).unwrap();
    write_fvecs_to_writer(&mut bytes, &[1.0, 2.0], 2).unwrap();
    let err = read_point_matrix_from_reader(Cursor::new(&bytes), None).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}
