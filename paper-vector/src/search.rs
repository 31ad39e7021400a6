use crate::cosine::{compute_magnitude, cosine_similarity_with_magnitude};
use crate::embedder::Embedder;
use crate::error::VectorError;
use crate::kv::KeyValueStore;
use crate::store::RecordStore;
use crate::types::{ScopeFilter, SearchResult};

/// Rank records in scope by cosine similarity to `query`.
///
/// Candidates whose dimension differs from the query are skipped. Results
/// are sorted by descending score; equal scores keep store order (by id).
pub fn search<K: KeyValueStore>(
	store: &RecordStore<K>,
	query: &[f32],
	filter: Option<&ScopeFilter>,
	top_k: usize,
	min_score: f64,
) -> Result<Vec<SearchResult>, VectorError> {
	if top_k == 0 {
		return Err(VectorError::validation("topK must be at least 1"));
	}
	if query.is_empty() {
		return Err(VectorError::validation("query embedding must not be empty"));
	}

	let query_mag = compute_magnitude(query);
	let mut scored: Vec<SearchResult> = Vec::new();
	let mut skipped = 0usize;

	for record in store.list(filter) {
		let record = record?;
		if record.embedding.len() != query.len() {
			skipped += 1;
			tracing::warn!(
				id = %record.id,
				expected = query.len(),
				actual = record.embedding.len(),
				"Skipping record with mismatched dimension"
			);
			continue;
		}

		let score = cosine_similarity_with_magnitude(
			query,
			&record.embedding,
			query_mag,
			compute_magnitude(&record.embedding),
		);
		if score < min_score {
			continue;
		}
		scored.push(SearchResult {
			record_id: record.id,
			score,
			text: record.text,
			metadata: record.metadata,
		});
	}

	// sort_by is stable
	scored.sort_by(|a, b| b.score.total_cmp(&a.score));
	scored.truncate(top_k);

	tracing::debug!(results = scored.len(), skipped, top_k, "Vector search complete");
	Ok(scored)
}

/// Embed `query` and search with the resulting vector. Embedder failure
/// aborts the search.
pub fn search_text<K: KeyValueStore>(
	store: &RecordStore<K>,
	embedder: &dyn Embedder,
	query: &str,
	filter: Option<&ScopeFilter>,
	top_k: usize,
	min_score: f64,
) -> Result<Vec<SearchResult>, VectorError> {
	if query.trim().is_empty() {
		return Err(VectorError::validation("query text must not be empty"));
	}
	let embedding = embedder.embed(query)?;
	search(store, &embedding, filter, top_k, min_score)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::embedder::EmbedError;
	use crate::kv::MemoryKv;
	use crate::types::Metadata;

	fn seeded() -> RecordStore<MemoryKv> {
		let mut s = RecordStore::open(MemoryKv::new());
		s.put("a", "alpha", &[1.0, 0.0, 0.0], &Metadata::for_paper("p1"))
			.unwrap();
		s.put("b", "beta", &[0.9, 0.1, 0.0], &Metadata::for_paper("p1"))
			.unwrap();
		s.put("c", "gamma", &[0.0, 1.0, 0.0], &Metadata::for_paper("p2"))
			.unwrap();
		s.put("d", "delta", &[0.0, 0.0, 1.0], &Metadata::for_paper("p2"))
			.unwrap();
		s
	}

	#[test]
	fn results_bounded_and_sorted() {
		let s = seeded();
		let results = search(&s, &[1.0, 0.2, 0.1], None, 3, 0.0).unwrap();
		assert!(results.len() <= 3);
		for pair in results.windows(2) {
			assert!(pair[0].score >= pair[1].score);
		}
		assert_eq!(results[0].record_id, "b");
	}

	#[test]
	fn self_similarity_is_one() {
		let s = seeded();
		let results = search(&s, &[0.0, 1.0, 0.0], None, 1, 0.0).unwrap();
		assert_eq!(results[0].record_id, "c");
		assert!((results[0].score - 1.0).abs() < 1e-9);
		assert_eq!(results[0].text, "gamma");
	}

	#[test]
	fn empty_store_returns_nothing() {
		let s = RecordStore::open(MemoryKv::new());
		assert!(search(&s, &[1.0], None, 5, 0.0).unwrap().is_empty());
	}

	#[test]
	fn scope_filter_restricts_candidates() {
		let s = seeded();
		let results = search(&s, &[1.0, 0.0, 0.0], Some(&ScopeFilter::paper("p2")), 10, 0.0)
			.unwrap();
		let ids: Vec<&str> = results.iter().map(|r| r.record_id.as_str()).collect();
		assert_eq!(ids, vec!["c", "d"]);
		assert!(results.iter().all(|r| r.metadata.paper_id.as_deref() == Some("p2")));
	}

	#[test]
	fn mismatched_dimensions_are_skipped() {
		let mut s = seeded();
		s.put("short", "x", &[1.0, 0.0], &Metadata::default()).unwrap();
		let results = search(&s, &[1.0, 0.0, 0.0], None, 10, -1.0).unwrap();
		assert_eq!(results.len(), 4);
		assert!(results.iter().all(|r| r.record_id != "short"));
	}

	#[test]
	fn min_score_drops_weak_matches() {
		let s = seeded();
		let results = search(&s, &[1.0, 0.0, 0.0], None, 10, 0.5).unwrap();
		let ids: Vec<&str> = results.iter().map(|r| r.record_id.as_str()).collect();
		assert_eq!(ids, vec!["a", "b"]);
	}

	#[test]
	fn ties_keep_store_order() {
		let mut s = RecordStore::open(MemoryKv::new());
		for id in ["z", "m", "a"] {
			s.put(id, id, &[2.0, 2.0], &Metadata::default()).unwrap();
		}
		let results = search(&s, &[1.0, 1.0], None, 3, 0.0).unwrap();
		let ids: Vec<&str> = results.iter().map(|r| r.record_id.as_str()).collect();
		assert_eq!(ids, vec!["a", "m", "z"]);
	}

	#[test]
	fn zero_top_k_is_rejected() {
		let s = seeded();
		assert!(matches!(
			search(&s, &[1.0, 0.0, 0.0], None, 0, 0.0),
			Err(VectorError::Validation(_))
		));
		assert!(matches!(
			search(&s, &[], None, 1, 0.0),
			Err(VectorError::Validation(_))
		));
	}

	#[test]
	fn text_search_uses_embedder() {
		let s = seeded();
		let embedder = |_: &str| -> Result<Vec<f32>, EmbedError> { Ok(vec![0.0, 0.0, 1.0]) };
		let results = search_text(&s, &embedder, "anything", None, 1, 0.0).unwrap();
		assert_eq!(results[0].record_id, "d");
	}

	#[test]
	fn text_search_propagates_embed_failure() {
		let s = seeded();
		let embedder = |_: &str| -> Result<Vec<f32>, EmbedError> { Err(EmbedError::new("down")) };
		let err = search_text(&s, &embedder, "anything", None, 1, 0.0).unwrap_err();
		assert!(matches!(err, VectorError::Embedding(_)));
	}
}
