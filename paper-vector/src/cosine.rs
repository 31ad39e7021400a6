use crate::types::Metric;

/// Compute cosine similarity between two f32 vectors.
/// Returns 0.0 for zero-magnitude vectors or dimension mismatches.
/// Result clamped to [-1.0, 1.0].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
	if a.len() != b.len() || a.is_empty() {
		return 0.0;
	}
	cosine_similarity_with_magnitude(a, b, compute_magnitude(a), compute_magnitude(b))
}

/// Compute the magnitude (L2 norm) of a vector.
pub fn compute_magnitude(embedding: &[f32]) -> f64 {
	embedding
		.iter()
		.map(|&v| (v as f64) * (v as f64))
		.sum::<f64>()
		.sqrt()
}

/// Cosine similarity with pre-computed magnitudes, so a query's norm is
/// computed once per scan.
pub fn cosine_similarity_with_magnitude(a: &[f32], b: &[f32], mag_a: f64, mag_b: f64) -> f64 {
	if a.len() != b.len() || a.is_empty() {
		return 0.0;
	}

	let denom = mag_a * mag_b;
	if denom == 0.0 {
		return 0.0;
	}

	let dot: f64 = a
		.iter()
		.zip(b)
		.map(|(&x, &y)| (x as f64) * (y as f64))
		.sum();

	let result = dot / denom;
	if !result.is_finite() {
		return 0.0;
	}
	result.clamp(-1.0, 1.0)
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
	a.iter()
		.zip(b)
		.map(|(&x, &y)| {
			let d = (x as f64) - (y as f64);
			d * d
		})
		.sum::<f64>()
		.sqrt()
}

impl Metric {
	/// Distance between two points of equal dimension. Cosine distance is
	/// `1 - similarity`, so a zero vector sits at distance 1 from everything.
	pub fn distance(self, a: &[f32], b: &[f32]) -> f64 {
		match self {
			Self::Euclidean => euclidean_distance(a, b),
			Self::Cosine => 1.0 - cosine_similarity(a, b),
		}
	}
}
