use crate::embedder::{EmbedError, Embedder};
use crate::error::VectorError;
use crate::kv::KeyValueStore;
use crate::store::RecordStore;
use crate::types::Metadata;

/// Embed `text` and store it under a fresh id.
pub fn ingest<K: KeyValueStore>(
	store: &mut RecordStore<K>,
	embedder: &dyn Embedder,
	text: &str,
	metadata: &Metadata,
) -> Result<String, VectorError> {
	let embedding = embed_checked(embedder, text)?;
	store.insert(text, &embedding, metadata)
}

/// Ingest many texts. The result has one slot per input: the new id, or
/// `None` when that text was rejected or could not be embedded. Storage
/// failures abort the whole batch.
pub fn ingest_batch<K: KeyValueStore>(
	store: &mut RecordStore<K>,
	embedder: &dyn Embedder,
	texts: &[String],
	metadata: &[Metadata],
) -> Result<Vec<Option<String>>, VectorError> {
	if texts.len() != metadata.len() {
		return Err(VectorError::validation(format!(
			"texts and metadata must have the same length ({} vs {})",
			texts.len(),
			metadata.len()
		)));
	}

	let mut ids = Vec::with_capacity(texts.len());
	for (index, (text, meta)) in texts.iter().zip(metadata).enumerate() {
		match embed_checked(embedder, text) {
			Ok(embedding) => ids.push(Some(store.insert(text, &embedding, meta)?)),
			Err(e @ (VectorError::Validation(_) | VectorError::Embedding(_))) => {
				tracing::warn!(index, error = %e, "Skipping batch item");
				ids.push(None);
			}
			Err(e) => return Err(e),
		}
	}

	let stored = ids.iter().filter(|id| id.is_some()).count();
	tracing::info!(total = texts.len(), stored, "Batch ingestion complete");
	Ok(ids)
}

fn embed_checked(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, VectorError> {
	if text.trim().is_empty() {
		return Err(VectorError::validation("text must not be empty"));
	}
	let embedding = embedder.embed(text)?;
	if embedding.is_empty() {
		return Err(EmbedError::new("embedder returned an empty embedding").into());
	}
	Ok(embedding)
}
