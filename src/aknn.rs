//! Approximate k-nearest-neighbour graphs over randomized kd-trees.
//!
//! Each tree splits on the mean of one of the highest-variance dimensions,
//! chosen at random per node, so the trees of a forest partition the space
//! differently. A query descends every tree, keeps the unexplored branches
//! in one priority queue ordered by their distance bound, and examines leaf
//! points until `checks` distinct points were evaluated and `k` results are
//! held. Recall is not guaranteed; more trees and checks improve it.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use rand::prelude::*;
use rayon::prelude::*;
use roaring::RoaringBitmap;

use crate::cancel::{self, CancellationToken};
use crate::math::{l2_distance_sqr, mean_and_variance};
use crate::points::PointSet;
use crate::HsneError;

/// Number of highest-variance dimensions a split is drawn from.
const RAND_DIMS: usize = 5;
/// Points sampled per node to estimate split statistics.
const SAMPLE_SIZE: usize = 100;

/// kNN graph stored as `len x k` row-major neighbour ids and squared distances.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborGraph {
    k: usize,
    ids: Vec<u32>,
    distances: Vec<f32>,
}

impl NeighborGraph {
    pub fn from_parts(k: usize, ids: Vec<u32>, distances: Vec<f32>) -> Result<Self, HsneError> {
        if k == 0 || ids.len() != distances.len() || ids.len() % k != 0 {
            return Err(HsneError::InputShape(
                "neighbour ids and distances must form equal rows of k entries".to_string(),
            ));
        }
        Ok(Self { k, ids, distances })
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.ids.len() / self.k
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Neighbours per point.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Neighbour ids of `point`, closest first.
    pub fn neighbors(&self, point: usize) -> &[u32] {
        &self.ids[point * self.k..(point + 1) * self.k]
    }

    /// Squared distances matching [`NeighborGraph::neighbors`].
    pub fn distances(&self, point: usize) -> &[f32] {
        &self.distances[point * self.k..(point + 1) * self.k]
    }
}

#[derive(Debug, Clone)]
enum KdNode {
    Leaf {
        start: u32,
        end: u32,
    },
    Split {
        dim: u32,
        value: f32,
        left: u32,
        right: u32,
    },
}

#[derive(Debug, Clone)]
struct KdTree {
    order: Vec<u32>,
    nodes: Vec<KdNode>,
}

impl KdTree {
    fn build(points: &PointSet<'_>, leaf_max_size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<u32> = (0..points.len() as u32).collect();
        order.shuffle(&mut rng);

        let mut tree = KdTree {
            order,
            nodes: Vec::new(),
        };
        let len = tree.order.len();
        tree.divide(points, 0, len, leaf_max_size.max(1), &mut rng);
        tree
    }

    /// Build the subtree over `order[start..end]` and return its node id.
    fn divide(
        &mut self,
        points: &PointSet<'_>,
        start: usize,
        end: usize,
        leaf_max_size: usize,
        rng: &mut StdRng,
    ) -> u32 {
        let node_id = self.nodes.len() as u32;
        if end - start <= leaf_max_size {
            self.nodes.push(KdNode::Leaf {
                start: start as u32,
                end: end as u32,
            });
            return node_id;
        }

        let (dim, value) = self.choose_split(points, start, end, rng);
        let mut mid = self.partition(points, start, end, dim, value);
        if mid == start || mid == end {
            // Every point falls on one side: all coordinates equal along `dim`.
            mid = start + (end - start) / 2;
        }

        self.nodes.push(KdNode::Split {
            dim: dim as u32,
            value,
            left: 0,
            right: 0,
        });
        let left = self.divide(points, start, mid, leaf_max_size, rng);
        let right = self.divide(points, mid, end, leaf_max_size, rng);
        if let KdNode::Split {
            left: l, right: r, ..
        } = &mut self.nodes[node_id as usize]
        {
            *l = left;
            *r = right;
        }
        node_id
    }

    fn choose_split(
        &self,
        points: &PointSet<'_>,
        start: usize,
        end: usize,
        rng: &mut StdRng,
    ) -> (usize, f32) {
        let sample_end = (start + SAMPLE_SIZE).min(end);
        let sample = &self.order[start..sample_end];
        let (mean, var) = mean_and_variance(points.as_slice(), points.dim(), sample);

        let mut dims: Vec<usize> = (0..points.dim()).collect();
        dims.sort_by(|&a, &b| var[b].total_cmp(&var[a]).then(a.cmp(&b)));
        let top = RAND_DIMS.min(dims.len());
        let dim = dims[rng.gen_range(0..top)];
        (dim, mean[dim] as f32)
    }

    /// Move points with coordinate `< value` to the front and return the split position.
    fn partition(
        &mut self,
        points: &PointSet<'_>,
        start: usize,
        end: usize,
        dim: usize,
        value: f32,
    ) -> usize {
        let mut mid = start;
        for i in start..end {
            if points.point(self.order[i] as usize)[dim] < value {
                self.order.swap(i, mid);
                mid += 1;
            }
        }
        mid
    }
}

#[derive(Debug, Clone, Copy)]
struct Branch {
    bound: f32,
    tree: u32,
    node: u32,
}

impl PartialEq for Branch {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Branch {}

impl PartialOrd for Branch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Branch {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bound
            .total_cmp(&other.bound)
            .then(self.tree.cmp(&other.tree))
            .then(self.node.cmp(&other.node))
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    id: u32,
    distance: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

/// Search state for one query across all trees.
struct Query<'q> {
    vector: &'q [f32],
    exclude: Option<u32>,
    k: usize,
    max_checks: usize,
    checks: usize,
    checked: RoaringBitmap,
    results: BinaryHeap<Candidate>,
    branches: BinaryHeap<Reverse<Branch>>,
}

impl<'q> Query<'q> {
    fn is_full(&self) -> bool {
        self.results.len() >= self.k
    }

    fn worst(&self) -> f32 {
        if self.is_full() {
            self.results
                .peek()
                .map(|c| c.distance)
                .unwrap_or(f32::INFINITY)
        } else {
            f32::INFINITY
        }
    }

    fn budget_spent(&self) -> bool {
        self.checks >= self.max_checks && self.is_full()
    }

    fn offer(&mut self, candidate: Candidate) {
        if self.results.len() < self.k {
            self.results.push(candidate);
        } else if let Some(top) = self.results.peek() {
            if candidate < *top {
                self.results.pop();
                self.results.push(candidate);
            }
        }
    }
}

/// A forest of randomized kd-trees over a borrowed point set.
#[derive(Debug, Clone)]
pub struct RandomizedKdForest {
    trees: Vec<KdTree>,
    dim: usize,
}

impl RandomizedKdForest {
    /// Build `num_trees` trees; tree `t` is seeded from `seed` and `t`.
    pub fn build(
        points: &PointSet<'_>,
        num_trees: usize,
        leaf_max_size: usize,
        seed: u64,
    ) -> Result<Self, HsneError> {
        Self::build_cancellable(points, num_trees, leaf_max_size, seed, None)
    }

    pub(crate) fn build_cancellable(
        points: &PointSet<'_>,
        num_trees: usize,
        leaf_max_size: usize,
        seed: u64,
        cancel: Option<&CancellationToken>,
    ) -> Result<Self, HsneError> {
        if num_trees == 0 {
            return Err(HsneError::Parameter("num_trees must be positive".to_string()));
        }
        let trees = (0..num_trees)
            .into_par_iter()
            .map(|t| {
                cancel::check(cancel)?;
                let tree_seed = seed ^ (t as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
                Ok(KdTree::build(points, leaf_max_size, tree_seed))
            })
            .collect::<Result<Vec<_>, HsneError>>()?;
        Ok(Self {
            trees,
            dim: points.dim(),
        })
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Approximate `k` nearest neighbours of `query`, closest first.
    ///
    /// Distances are squared L2. `exclude` is never returned, which is how a
    /// point is kept out of its own neighbour list.
    pub fn search(
        &self,
        points: &PointSet<'_>,
        query: &[f32],
        k: usize,
        checks: usize,
        exclude: Option<u32>,
    ) -> Result<Vec<(u32, f32)>, HsneError> {
        if query.len() != self.dim {
            return Err(HsneError::InputShape(format!(
                "query has {} dimensions, index has {}",
                query.len(),
                self.dim
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut state = Query {
            vector: query,
            exclude,
            k,
            max_checks: checks.max(1),
            checks: 0,
            checked: RoaringBitmap::new(),
            results: BinaryHeap::with_capacity(k + 1),
            branches: BinaryHeap::new(),
        };

        for tree in 0..self.trees.len() {
            self.descend(points, &mut state, tree as u32, 0, 0.0);
        }
        while let Some(Reverse(branch)) = state.branches.pop() {
            if state.budget_spent() {
                break;
            }
            self.descend(points, &mut state, branch.tree, branch.node, branch.bound);
        }

        let mut neighbours: Vec<(u32, f32)> = state
            .results
            .into_sorted_vec()
            .into_iter()
            .map(|c| (c.id, c.distance))
            .collect();
        neighbours.truncate(k);
        Ok(neighbours)
    }

    /// Walk from `node` to a leaf, queueing the farther child at every split.
    fn descend(
        &self,
        points: &PointSet<'_>,
        state: &mut Query<'_>,
        tree: u32,
        mut node: u32,
        bound: f32,
    ) {
        if bound > state.worst() {
            return;
        }
        let kd = &self.trees[tree as usize];
        loop {
            match kd.nodes[node as usize] {
                KdNode::Leaf { start, end } => {
                    for &id in &kd.order[start as usize..end as usize] {
                        if state.budget_spent() {
                            return;
                        }
                        if Some(id) == state.exclude || !state.checked.insert(id) {
                            continue;
                        }
                        state.checks += 1;
                        let distance = l2_distance_sqr(state.vector, points.point(id as usize));
                        state.offer(Candidate { id, distance });
                    }
                    return;
                }
                KdNode::Split {
                    dim,
                    value,
                    left,
                    right,
                } => {
                    let diff = state.vector[dim as usize] - value;
                    let (near, far) = if diff < 0.0 { (left, right) } else { (right, left) };
                    let far_bound = bound + diff * diff;
                    if far_bound < state.worst() {
                        state.branches.push(Reverse(Branch {
                            bound: far_bound,
                            tree,
                            node: far,
                        }));
                    }
                    node = near;
                }
            }
        }
    }
}

/// Build the approximate kNN graph of every point in `points`.
///
/// Fails with [`HsneError::InsufficientData`] unless there are more than `k` points.
pub fn build_neighbor_graph(
    points: &PointSet<'_>,
    k: usize,
    num_trees: usize,
    num_checks: usize,
    leaf_max_size: usize,
    seed: u64,
    cancel: Option<&CancellationToken>,
) -> Result<NeighborGraph, HsneError> {
    if k == 0 {
        return Err(HsneError::Parameter("num_neighbors must be positive".to_string()));
    }
    if points.len() < k + 1 {
        return Err(HsneError::InsufficientData {
            points: points.len(),
            neighbors: k,
        });
    }

    let forest =
        RandomizedKdForest::build_cancellable(points, num_trees, leaf_max_size, seed, cancel)?;

    let rows = (0..points.len())
        .into_par_iter()
        .map(|i| {
            cancel::check(cancel)?;
            let found = forest.search(points, points.point(i), k, num_checks, Some(i as u32))?;
            if found.len() != k {
                return Err(HsneError::InsufficientData {
                    points: points.len(),
                    neighbors: k,
                });
            }
            Ok(found)
        })
        .collect::<Result<Vec<_>, HsneError>>()?;

    let mut ids = Vec::with_capacity(points.len() * k);
    let mut distances = Vec::with_capacity(points.len() * k);
    for row in rows {
        for (id, distance) in row {
            ids.push(id);
            distances.push(distance);
        }
    }
    NeighborGraph::from_parts(k, ids, distances)
}
