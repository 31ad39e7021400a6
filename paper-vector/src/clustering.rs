//! HDBSCAN density clustering.
//!
//! Steps:
//! 1. Core distances: distance to the `min_samples`-th nearest other point.
//! 2. Mutual reachability: `max(core(a), core(b), d(a, b))`.
//! 3. Minimum spanning tree over mutual reachability (Prim).
//! 4. Single-linkage dendrogram from the sorted MST edges (union-find).
//! 5. Condensed tree: splits that shed fewer than `min_cluster_size` points
//!    are treated as points falling out of the parent cluster.
//! 6. Excess-of-mass selection over cluster stabilities.
//!
//! Points not inside a selected cluster are noise. Fewer points than
//! `min_cluster_size` yields all noise rather than an error.

use serde::{Deserialize, Serialize};

use crate::error::VectorError;
use crate::types::{ClusterAssignment, Metric};

/// Lambda used for merges at distance zero.
const LAMBDA_CAP: f64 = 1e12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterParams {
	pub min_cluster_size: usize,
	pub min_samples: usize,
	pub metric: Metric,
	/// Allow the root of the condensed tree to be selected, so that a single
	/// dense blob is reported as one cluster instead of all noise.
	pub allow_single_cluster: bool,
}

impl Default for ClusterParams {
	fn default() -> Self {
		Self {
			min_cluster_size: 2,
			min_samples: 1,
			metric: Metric::Euclidean,
			allow_single_cluster: false,
		}
	}
}

impl ClusterParams {
	pub fn validate(&self) -> Result<(), VectorError> {
		if self.min_cluster_size < 2 {
			return Err(VectorError::validation(format!(
				"minClusterSize must be >= 2, got {}",
				self.min_cluster_size
			)));
		}
		if self.min_samples == 0 {
			return Err(VectorError::validation("minSamples must be >= 1"));
		}
		Ok(())
	}
}

/// Assign every point to a cluster or to noise. Output order matches input.
pub fn cluster(points: &[Vec<f32>], params: &ClusterParams) -> Result<Vec<ClusterAssignment>, VectorError> {
	params.validate()?;

	let n = points.len();
	if let Some(first) = points.first() {
		if let Some(bad) = points.iter().find(|p| p.len() != first.len()) {
			return Err(VectorError::DimensionMismatch {
				expected: first.len(),
				actual: bad.len(),
			});
		}
	}
	if n < params.min_cluster_size {
		tracing::debug!(
			points = n,
			min_cluster_size = params.min_cluster_size,
			"Too few points to cluster; all noise"
		);
		return Ok(vec![ClusterAssignment::Noise; n]);
	}

	let distances = pairwise(points, params.metric);
	let core = core_distances(&distances, n, params.min_samples);
	let mst = prim_mst(&distances, &core, n);
	let dendrogram = single_linkage(&mst, n);
	let condensed = condense(&dendrogram, n, params.min_cluster_size);
	let selected = select_clusters(&condensed, n, params.allow_single_cluster);
	let assignments = label_points(&condensed, &selected, n);

	let clusters = selected.len();
	let noise = assignments.iter().filter(|a| a.is_noise()).count();
	tracing::debug!(
		points = n,
		clusters,
		noise,
		min_cluster_size = params.min_cluster_size,
		min_samples = params.min_samples,
		"HDBSCAN complete"
	);
	Ok(assignments)
}

/// Number of distinct non-noise clusters.
pub fn cluster_count(assignments: &[ClusterAssignment]) -> usize {
	assignments
		.iter()
		.filter_map(|a| a.cluster())
		.max()
		.map_or(0, |max| max + 1)
}

/// Arithmetic mean of the members of `label`. `None` if it has no members.
pub fn centroid(points: &[Vec<f32>], assignments: &[ClusterAssignment], label: usize) -> Option<Vec<f32>> {
	let mut sum: Vec<f64> = Vec::new();
	let mut count = 0usize;
	for (point, assignment) in points.iter().zip(assignments) {
		if assignment.cluster() != Some(label) {
			continue;
		}
		if sum.is_empty() {
			sum = vec![0.0; point.len()];
		}
		for (s, &v) in sum.iter_mut().zip(point) {
			*s += v as f64;
		}
		count += 1;
	}
	if count == 0 {
		return None;
	}
	Some(sum.into_iter().map(|s| (s / count as f64) as f32).collect())
}

/// Centroids of every cluster, ordered by label. Noise is excluded.
pub fn centroids(points: &[Vec<f32>], assignments: &[ClusterAssignment]) -> Vec<(usize, Vec<f32>)> {
	(0..cluster_count(assignments))
		.filter_map(|label| centroid(points, assignments, label).map(|c| (label, c)))
		.collect()
}

// ---------------------------------------------------------------------------
// Mutual reachability and MST
// ---------------------------------------------------------------------------

fn pairwise(points: &[Vec<f32>], metric: Metric) -> Vec<f64> {
	let n = points.len();
	let mut out = vec![0.0; n * n];
	for i in 0..n {
		for j in (i + 1)..n {
			let d = metric.distance(&points[i], &points[j]);
			out[i * n + j] = d;
			out[j * n + i] = d;
		}
	}
	out
}

fn core_distances(distances: &[f64], n: usize, min_samples: usize) -> Vec<f64> {
	(0..n)
		.map(|i| {
			let mut row: Vec<f64> = (0..n)
				.filter(|&j| j != i)
				.map(|j| distances[i * n + j])
				.collect();
			row.sort_by(f64::total_cmp);
			let k = min_samples.min(row.len());
			if k == 0 { 0.0 } else { row[k - 1] }
		})
		.collect()
}

/// Prim's algorithm on the implicit mutual-reachability graph. Returns
/// `n - 1` edges sorted by weight (stable, so ties keep discovery order).
fn prim_mst(distances: &[f64], core: &[f64], n: usize) -> Vec<(usize, usize, f64)> {
	let reach = |i: usize, j: usize| distances[i * n + j].max(core[i]).max(core[j]);

	let mut in_tree = vec![false; n];
	let mut best = vec![f64::INFINITY; n];
	let mut from = vec![0usize; n];
	let mut edges = Vec::with_capacity(n.saturating_sub(1));

	in_tree[0] = true;
	for j in 1..n {
		best[j] = reach(0, j);
	}

	for _ in 1..n {
		let Some(next) = (0..n)
			.filter(|&j| !in_tree[j])
			.min_by(|&a, &b| best[a].total_cmp(&best[b]).then(a.cmp(&b)))
		else {
			break;
		};
		in_tree[next] = true;
		edges.push((from[next], next, best[next]));

		for j in 0..n {
			if !in_tree[j] {
				let d = reach(next, j);
				if d < best[j] {
					best[j] = d;
					from[j] = next;
				}
			}
		}
	}

	edges.sort_by(|a, b| a.2.total_cmp(&b.2));
	edges
}

// ---------------------------------------------------------------------------
// Single-linkage dendrogram
// ---------------------------------------------------------------------------

/// Internal node `n + i` merges `left` and `right` at `distance`.
#[derive(Debug, Clone, Copy)]
struct Merge {
	left: usize,
	right: usize,
	distance: f64,
	size: usize,
}

struct UnionFind {
	parent: Vec<usize>,
}

impl UnionFind {
	fn new(size: usize) -> Self {
		Self {
			parent: (0..size).collect(),
		}
	}

	fn find(&mut self, mut x: usize) -> usize {
		while self.parent[x] != x {
			self.parent[x] = self.parent[self.parent[x]];
			x = self.parent[x];
		}
		x
	}
}

fn single_linkage(mst: &[(usize, usize, f64)], n: usize) -> Vec<Merge> {
	let mut uf = UnionFind::new(2 * n);
	let mut sizes = vec![1usize; 2 * n];
	let mut merges = Vec::with_capacity(mst.len());

	for (i, &(a, b, distance)) in mst.iter().enumerate() {
		let left = uf.find(a);
		let right = uf.find(b);
		let node = n + i;
		let size = sizes[left] + sizes[right];
		sizes[node] = size;
		uf.parent[left] = node;
		uf.parent[right] = node;
		merges.push(Merge {
			left,
			right,
			distance,
			size,
		});
	}
	merges
}

// ---------------------------------------------------------------------------
// Condensed tree
// ---------------------------------------------------------------------------

/// One edge of the condensed tree. Children below `n` are points; the
/// rest are clusters. Cluster ids start at `n` (the root).
#[derive(Debug, Clone, Copy, PartialEq)]
struct CondensedEdge {
	parent: usize,
	child: usize,
	lambda: f64,
	size: usize,
}

fn lambda_of(distance: f64) -> f64 {
	if distance > 0.0 {
		(1.0 / distance).min(LAMBDA_CAP)
	} else {
		LAMBDA_CAP
	}
}

fn condense(merges: &[Merge], n: usize, min_cluster_size: usize) -> Vec<CondensedEdge> {
	let node_size = |node: usize| if node < n { 1 } else { merges[node - n].size };
	let children = |node: usize| {
		let m = merges[node - n];
		(m.left, m.right)
	};

	// Every point below `node` in the dendrogram.
	let leaves = |node: usize| -> Vec<usize> {
		let mut out = Vec::new();
		let mut stack = vec![node];
		while let Some(x) = stack.pop() {
			if x < n {
				out.push(x);
			} else {
				let (l, r) = children(x);
				stack.push(r);
				stack.push(l);
			}
		}
		out
	};

	let root = 2 * n - 2;
	let mut out = Vec::new();
	let mut next_label = n + 1;

	// (dendrogram node, condensed cluster it belongs to)
	let mut queue = std::collections::VecDeque::from([(root, n)]);
	while let Some((node, label)) = queue.pop_front() {
		if node < n {
			continue;
		}
		let (left, right) = children(node);
		let lambda = lambda_of(merges[node - n].distance);
		let (left_size, right_size) = (node_size(left), node_size(right));
		let left_big = left_size >= min_cluster_size;
		let right_big = right_size >= min_cluster_size;

		match (left_big, right_big) {
			(true, true) => {
				for (child, size) in [(left, left_size), (right, right_size)] {
					let child_label = next_label;
					next_label += 1;
					out.push(CondensedEdge {
						parent: label,
						child: child_label,
						lambda,
						size,
					});
					queue.push_back((child, child_label));
				}
			}
			(false, false) => {
				for side in [left, right] {
					for point in leaves(side) {
						out.push(CondensedEdge {
							parent: label,
							child: point,
							lambda,
							size: 1,
						});
					}
				}
			}
			(true, false) => {
				for point in leaves(right) {
					out.push(CondensedEdge {
						parent: label,
						child: point,
						lambda,
						size: 1,
					});
				}
				queue.push_back((left, label));
			}
			(false, true) => {
				for point in leaves(left) {
					out.push(CondensedEdge {
						parent: label,
						child: point,
						lambda,
						size: 1,
					});
				}
				queue.push_back((right, label));
			}
		}
	}
	out
}

// ---------------------------------------------------------------------------
// Excess-of-mass selection
// ---------------------------------------------------------------------------

/// Selected cluster ids, ascending.
fn select_clusters(condensed: &[CondensedEdge], n: usize, allow_single_cluster: bool) -> Vec<usize> {
	let slots = condensed
		.iter()
		.map(|e| e.parent.max(e.child))
		.filter(|&id| id >= n)
		.max()
		.map_or(1, |max| max - n + 1);

	let mut birth = vec![0.0f64; slots];
	let mut child_clusters: Vec<Vec<usize>> = vec![Vec::new(); slots];
	for e in condensed.iter().filter(|e| e.child >= n) {
		birth[e.child - n] = e.lambda;
		child_clusters[e.parent - n].push(e.child - n);
	}

	let mut stability = vec![0.0f64; slots];
	for e in condensed {
		stability[e.parent - n] += (e.lambda - birth[e.parent - n]) * e.size as f64;
	}

	let mut is_selected = vec![true; slots];
	is_selected[0] = allow_single_cluster;

	// Children always carry larger ids than their parents.
	for c in (0..slots).rev() {
		if (c == 0 && !allow_single_cluster) || child_clusters[c].is_empty() {
			continue;
		}
		let subtree: f64 = child_clusters[c].iter().map(|&child| stability[child]).sum();
		if subtree > stability[c] {
			is_selected[c] = false;
			stability[c] = subtree;
		} else {
			is_selected[c] = true;
			let mut stack = child_clusters[c].clone();
			while let Some(x) = stack.pop() {
				is_selected[x] = false;
				stack.extend(child_clusters[x].iter().copied());
			}
		}
	}

	(0..slots).filter(|&c| is_selected[c]).map(|c| c + n).collect()
}

fn label_points(condensed: &[CondensedEdge], selected: &[usize], n: usize) -> Vec<ClusterAssignment> {
	let mut cluster_parent = std::collections::HashMap::new();
	let mut point_parent = vec![None; n];
	for e in condensed {
		if e.child < n {
			point_parent[e.child] = Some(e.parent);
		} else {
			cluster_parent.insert(e.child, e.parent);
		}
	}

	point_parent
		.into_iter()
		.map(|start| {
			let mut current = start;
			while let Some(c) = current {
				if let Ok(label) = selected.binary_search(&c) {
					return ClusterAssignment::Cluster(label);
				}
				current = cluster_parent.get(&c).copied();
			}
			ClusterAssignment::Noise
		})
		.collect()
}
