// ---------------------------------------------------------------------------
// UMAP-style dimensionality reduction
// ---------------------------------------------------------------------------
//
// 0. Bit-identical inputs collapse to one point; duplicates copy its result.
// 1. Exact k-nearest-neighbour graph from the full pairwise distance matrix.
// 2. Smooth-kNN: per-point `rho` (nearest non-zero distance) and `sigma`
//    (binary search so the membership strengths sum to log2(k)).
// 3. Fuzzy union symmetrization: w = a + b - a*b.
// 4. Low-dimensional curve 1 / (1 + a * d^(2b)) fitted to `min_dist`/`spread`.
// 5. Random uniform layout, then SGD over the edges with negative sampling.
//
// Everything downstream of the seed is deterministic. Memory is O(n^2).
// ---------------------------------------------------------------------------

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::VectorError;
use crate::types::Metric;

const SMOOTH_K_TOLERANCE: f64 = 1e-5;
const SMOOTH_K_ITERATIONS: usize = 64;
const MIN_K_DIST_SCALE: f64 = 1e-3;
const GRADIENT_CLIP: f64 = 4.0;
const INIT_RANGE: f64 = 10.0;
const CURVE_SAMPLES: usize = 300;
const CURVE_FIT_ITERATIONS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReductionParams {
	pub n_components: usize,
	pub n_neighbors: usize,
	pub min_dist: f64,
	pub spread: f64,
	pub metric: Metric,
	/// Defaults to 500 for up to 10k points, 200 above.
	pub n_epochs: Option<usize>,
	pub learning_rate: f64,
	pub negative_sample_rate: usize,
	/// Fixed seed for reproducible layouts. `None` draws a fresh one.
	pub seed: Option<u64>,
}

impl Default for ReductionParams {
	fn default() -> Self {
		Self {
			n_components: 2,
			n_neighbors: 15,
			min_dist: 0.1,
			spread: 1.0,
			metric: Metric::Cosine,
			n_epochs: None,
			learning_rate: 1.0,
			negative_sample_rate: 5,
			seed: None,
		}
	}
}

impl ReductionParams {
	pub fn validate(&self) -> Result<(), VectorError> {
		if self.n_components == 0 {
			return Err(VectorError::validation("nComponents must be at least 1"));
		}
		if self.n_neighbors < 2 {
			return Err(VectorError::validation("nNeighbors must be at least 2"));
		}
		if self.spread <= 0.0 {
			return Err(VectorError::validation("spread must be positive"));
		}
		if !(0.0..=self.spread).contains(&self.min_dist) {
			return Err(VectorError::validation(
				"minDist must be between 0 and spread",
			));
		}
		if self.learning_rate <= 0.0 {
			return Err(VectorError::validation("learningRate must be positive"));
		}
		if self.n_epochs == Some(0) {
			return Err(VectorError::validation("nEpochs must be at least 1"));
		}
		Ok(())
	}

	fn epochs_for(&self, n: usize) -> usize {
		self.n_epochs
			.unwrap_or(if n <= 10_000 { 500 } else { 200 })
	}
}

/// Project `data` into `params.n_components` dimensions.
///
/// Empty input yields no points and a single point lands on the origin.
/// All inputs must share one dimension. Bit-identical inputs are laid out
/// once and share their coordinates.
pub fn reduce(data: &[Vec<f32>], params: &ReductionParams) -> Result<Vec<Vec<f32>>, VectorError> {
	params.validate()?;

	let Some(first) = data.first() else {
		return Ok(Vec::new());
	};
	let dim = first.len();
	if dim == 0 {
		return Err(VectorError::validation("input vectors must not be empty"));
	}
	if let Some(bad) = data.iter().find(|v| v.len() != dim) {
		return Err(VectorError::DimensionMismatch {
			expected: dim,
			actual: bad.len(),
		});
	}

	let (unique, slots) = dedup_exact(data);
	if unique.len() < data.len() {
		tracing::debug!(
			points = data.len(),
			unique = unique.len(),
			"Collapsed identical inputs before reduction"
		);
	}

	let reduced = reduce_unique(&unique, dim, params);
	Ok(slots.into_iter().map(|slot| reduced[slot].clone()).collect())
}

/// Unique vectors in first-seen order, plus each input's index into them.
fn dedup_exact(data: &[Vec<f32>]) -> (Vec<Vec<f32>>, Vec<usize>) {
	let mut seen: HashMap<Vec<u32>, usize> = HashMap::new();
	let mut unique = Vec::new();
	let slots = data
		.iter()
		.map(|v| {
			let bits: Vec<u32> = v.iter().map(|x| x.to_bits()).collect();
			*seen.entry(bits).or_insert_with(|| {
				unique.push(v.clone());
				unique.len() - 1
			})
		})
		.collect();
	(unique, slots)
}

fn reduce_unique(data: &[Vec<f32>], dim: usize, params: &ReductionParams) -> Vec<Vec<f32>> {
	let n = data.len();
	if n == 1 {
		return vec![vec![0.0; params.n_components]];
	}

	let k = params.n_neighbors.min(n - 1);
	let n_epochs = params.epochs_for(n);
	let seed = params.seed.unwrap_or_else(rand::random);

	tracing::debug!(
		points = n,
		dim,
		k,
		n_epochs,
		seed,
		metric = ?params.metric,
		"Starting reduction"
	);

	let distances = pairwise_distances(data, params.metric);
	let knn = nearest_neighbors(&distances, n, k);
	let graph = fuzzy_simplicial_set(&distances, &knn, n);
	let (a, b) = fit_ab(params.spread, params.min_dist);

	let mut rng = StdRng::seed_from_u64(seed);
	let mut layout: Vec<f64> = (0..n * params.n_components)
		.map(|_| rng.random_range(-INIT_RANGE..INIT_RANGE))
		.collect();

	optimize_layout(
		&mut layout,
		&graph,
		Layout {
			n,
			dim: params.n_components,
			a,
			b,
			n_epochs,
			learning_rate: params.learning_rate,
			negative_sample_rate: params.negative_sample_rate,
		},
		&mut rng,
	);

	tracing::debug!(points = n, a, b, "Reduction complete");

	layout
		.chunks_exact(params.n_components)
		.map(|row| row.iter().map(|&v| v as f32).collect())
		.collect()
}

// ---------------------------------------------------------------------------
// High-dimensional graph
// ---------------------------------------------------------------------------

fn pairwise_distances(data: &[Vec<f32>], metric: Metric) -> Vec<f64> {
	let n = data.len();
	let mut out = vec![0.0; n * n];
	for i in 0..n {
		for j in (i + 1)..n {
			let d = metric.distance(&data[i], &data[j]);
			out[i * n + j] = d;
			out[j * n + i] = d;
		}
	}
	out
}

/// For each point, the `k` nearest other points ordered by (distance, index).
fn nearest_neighbors(distances: &[f64], n: usize, k: usize) -> Vec<Vec<usize>> {
	(0..n)
		.map(|i| {
			let row = &distances[i * n..(i + 1) * n];
			let mut others: Vec<usize> = (0..n).filter(|&j| j != i).collect();
			others.sort_by(|&x, &y| row[x].total_cmp(&row[y]).then(x.cmp(&y)));
			others.truncate(k);
			others
		})
		.collect()
}

/// Symmetric weighted edge list `(i, j, w)` with `i < j`.
fn fuzzy_simplicial_set(distances: &[f64], knn: &[Vec<usize>], n: usize) -> Vec<(usize, usize, f64)> {
	let mean_all = distances.iter().sum::<f64>() / (n * n) as f64;
	let mut directed: BTreeMap<(usize, usize), (f64, f64)> = BTreeMap::new();

	for (i, neighbors) in knn.iter().enumerate() {
		let dists: Vec<f64> = neighbors.iter().map(|&j| distances[i * n + j]).collect();
		let (rho, sigma) = smooth_knn(&dists, mean_all);

		for (&j, &d) in neighbors.iter().zip(&dists) {
			let excess = d - rho;
			let w = if excess <= 0.0 {
				1.0
			} else if sigma == 0.0 {
				0.0
			} else {
				(-excess / sigma).exp()
			};
			let entry = directed.entry((i.min(j), i.max(j))).or_insert((0.0, 0.0));
			if i < j {
				entry.0 = w;
			} else {
				entry.1 = w;
			}
		}
	}

	directed
		.into_iter()
		.map(|((i, j), (w_ij, w_ji))| (i, j, w_ij + w_ji - w_ij * w_ji))
		.filter(|&(_, _, w)| w > 0.0)
		.collect()
}

/// Returns `(rho, sigma)` for one point's sorted neighbour distances.
fn smooth_knn(dists: &[f64], mean_all: f64) -> (f64, f64) {
	let target = (dists.len() as f64).log2();
	let rho = dists.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);

	let mut lo = 0.0;
	let mut hi = f64::INFINITY;
	let mut mid = 1.0;

	for _ in 0..SMOOTH_K_ITERATIONS {
		let psum: f64 = dists
			.iter()
			.map(|&d| {
				let excess = d - rho;
				if excess > 0.0 { (-excess / mid).exp() } else { 1.0 }
			})
			.sum();

		if (psum - target).abs() < SMOOTH_K_TOLERANCE {
			break;
		}
		if psum > target {
			hi = mid;
			mid = (lo + hi) / 2.0;
		} else {
			lo = mid;
			mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
		}
	}

	let floor = if rho > 0.0 {
		MIN_K_DIST_SCALE * dists.iter().sum::<f64>() / dists.len() as f64
	} else {
		MIN_K_DIST_SCALE * mean_all
	};
	(rho, mid.max(floor))
}

// ---------------------------------------------------------------------------
// Low-dimensional curve
// ---------------------------------------------------------------------------

/// Fit `a, b` so that `1 / (1 + a x^(2b))` approximates the target
/// membership curve defined by `spread` and `min_dist`.
pub fn fit_ab(spread: f64, min_dist: f64) -> (f64, f64) {
	let xs: Vec<f64> = (0..CURVE_SAMPLES)
		.map(|i| 3.0 * spread * i as f64 / (CURVE_SAMPLES - 1) as f64)
		.collect();
	let ys: Vec<f64> = xs
		.iter()
		.map(|&x| {
			if x < min_dist {
				1.0
			} else {
				(-(x - min_dist) / spread).exp()
			}
		})
		.collect();

	let loss = |a: f64, b: f64| -> f64 {
		xs.iter()
			.zip(&ys)
			.map(|(&x, &y)| {
				let r = 1.0 / (1.0 + a * x.powf(2.0 * b)) - y;
				r * r
			})
			.sum()
	};

	// Levenberg-Marquardt from (1, 1).
	let (mut a, mut b) = (1.0_f64, 1.0_f64);
	let mut current = loss(a, b);
	let mut lambda = 1e-3;

	for _ in 0..CURVE_FIT_ITERATIONS {
		let (mut jaa, mut jab, mut jbb, mut ga, mut gb) = (0.0, 0.0, 0.0, 0.0, 0.0);
		for (&x, &y) in xs.iter().zip(&ys) {
			if x == 0.0 {
				continue;
			}
			let p = x.powf(2.0 * b);
			let denom = 1.0 + a * p;
			let r = 1.0 / denom - y;
			let da = -p / (denom * denom);
			let db = -a * p * 2.0 * x.ln() / (denom * denom);
			jaa += da * da;
			jab += da * db;
			jbb += db * db;
			ga += da * r;
			gb += db * r;
		}

		let (maa, mbb) = (jaa * (1.0 + lambda), jbb * (1.0 + lambda));
		let det = maa * mbb - jab * jab;
		if det.abs() < f64::EPSILON {
			break;
		}
		let step_a = -(mbb * ga - jab * gb) / det;
		let step_b = -(maa * gb - jab * ga) / det;

		let (na, nb) = (a + step_a, b + step_b);
		let candidate = if na > 0.0 && nb > 0.0 {
			loss(na, nb)
		} else {
			f64::INFINITY
		};
		if candidate < current {
			a = na;
			b = nb;
			current = candidate;
			lambda = (lambda / 10.0).max(1e-12);
		} else {
			lambda *= 10.0;
			if lambda > 1e12 {
				break;
			}
		}
	}
	(a, b)
}

// ---------------------------------------------------------------------------
// Layout optimization
// ---------------------------------------------------------------------------

struct Layout {
	n: usize,
	dim: usize,
	a: f64,
	b: f64,
	n_epochs: usize,
	learning_rate: f64,
	negative_sample_rate: usize,
}

fn clip(v: f64) -> f64 {
	v.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

fn squared_distance(layout: &[f64], dim: usize, i: usize, j: usize) -> f64 {
	(0..dim)
		.map(|d| {
			let diff = layout[i * dim + d] - layout[j * dim + d];
			diff * diff
		})
		.sum()
}

fn optimize_layout(
	layout: &mut [f64],
	graph: &[(usize, usize, f64)],
	cfg: Layout,
	rng: &mut StdRng,
) {
	let Some(max_w) = graph.iter().map(|e| e.2).reduce(f64::max) else {
		return;
	};
	let threshold = max_w / cfg.n_epochs as f64;

	// Both directions of every surviving edge, so each endpoint is pulled.
	let edges: Vec<(usize, usize, f64)> = graph
		.iter()
		.filter(|e| e.2 >= threshold)
		.flat_map(|&(i, j, w)| [(i, j, w), (j, i, w)])
		.collect();

	let epochs_per_sample: Vec<f64> = edges.iter().map(|e| max_w / e.2).collect();
	let epochs_per_negative: Vec<f64> = epochs_per_sample
		.iter()
		.map(|&e| e / cfg.negative_sample_rate.max(1) as f64)
		.collect();
	let mut next_sample = epochs_per_sample.clone();
	let mut next_negative = epochs_per_negative.clone();

	let (a, b, dim) = (cfg.a, cfg.b, cfg.dim);

	for epoch in 0..cfg.n_epochs {
		let alpha = cfg.learning_rate * (1.0 - epoch as f64 / cfg.n_epochs as f64);
		let now = epoch as f64;

		for (e, &(head, tail, _)) in edges.iter().enumerate() {
			if next_sample[e] > now {
				continue;
			}

			let d2 = squared_distance(layout, dim, head, tail);
			let attract = if d2 > 0.0 {
				-2.0 * a * b * d2.powf(b - 1.0) / (a * d2.powf(b) + 1.0)
			} else {
				0.0
			};
			for d in 0..dim {
				let diff = layout[head * dim + d] - layout[tail * dim + d];
				let grad = clip(attract * diff) * alpha;
				layout[head * dim + d] += grad;
				layout[tail * dim + d] -= grad;
			}
			next_sample[e] += epochs_per_sample[e];

			if cfg.negative_sample_rate == 0 {
				continue;
			}
			let n_neg = ((now - next_negative[e]) / epochs_per_negative[e]).floor().max(0.0) as usize;
			for _ in 0..n_neg {
				let other = rng.random_range(0..cfg.n);
				if other == head {
					continue;
				}
				let d2 = squared_distance(layout, dim, head, other);
				let repel = if d2 > 0.0 {
					2.0 * b / ((0.001 + d2) * (a * d2.powf(b) + 1.0))
				} else {
					0.0
				};
				for d in 0..dim {
					let grad = if repel > 0.0 {
						clip(repel * (layout[head * dim + d] - layout[other * dim + d]))
					} else {
						GRADIENT_CLIP
					};
					layout[head * dim + d] += grad * alpha;
				}
			}
			next_negative[e] += n_neg as f64 * epochs_per_negative[e];
		}
	}
}
