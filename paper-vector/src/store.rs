// ---------------------------------------------------------------------------
// RecordStore: id -> (text, embedding, metadata) over a key-value store
// ---------------------------------------------------------------------------
//
// Each record occupies three independent keys:
//
//   text:<id>        UTF-8 text
//   meta:<id>        flat metadata JSON
//   embedding:<id>   f32 little-endian bytes
//
// There is no multi-key transaction. `put` writes the embedding last and
// `delete` removes it first, so the embedding key marks a complete record;
// readers that find an embedding without its text or metadata treat the
// record as absent.
// ---------------------------------------------------------------------------

use uuid::Uuid;

use crate::error::VectorError;
use crate::kv::KeyValueStore;
use crate::types::{Metadata, Record, ScopeFilter};

const EMBEDDING_PREFIX: &str = "embedding:";
const TEXT_PREFIX: &str = "text:";
const META_PREFIX: &str = "meta:";

fn embedding_key(id: &str) -> String {
	format!("{}{}", EMBEDDING_PREFIX, id)
}

fn text_key(id: &str) -> String {
	format!("{}{}", TEXT_PREFIX, id)
}

fn meta_key(id: &str) -> String {
	format!("{}{}", META_PREFIX, id)
}

// ---------------------------------------------------------------------------
// Embedding encode / decode
// ---------------------------------------------------------------------------

/// Encode a f32 slice as little-endian bytes.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
	embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes back to `Vec<f32>`.
pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, VectorError> {
	if bytes.len() % 4 != 0 {
		return Err(VectorError::Corruption(format!(
			"Invalid embedding length {} (not a multiple of 4)",
			bytes.len()
		)));
	}
	Ok(bytes
		.chunks_exact(4)
		.map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
		.collect())
}

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// Vector record store. Constructed explicitly around a backing store and
/// closed with [`RecordStore::close`] (or on drop).
pub struct RecordStore<K: KeyValueStore> {
	kv: K,
	closed: bool,
}

impl<K: KeyValueStore> RecordStore<K> {
	pub fn open(kv: K) -> Self {
		Self { kv, closed: false }
	}

	/// Flush the backing store and end the store's lifecycle.
	pub fn close(mut self) -> Result<(), VectorError> {
		self.closed = true;
		self.kv.flush()
	}

	/// Make every write so far durable in the backing store.
	pub fn flush(&mut self) -> Result<(), VectorError> {
		self.kv.flush()
	}

	pub fn backing(&self) -> &K {
		&self.kv
	}

	// -- Writes --------------------------------------------------------------

	/// Store a record under `id`, overwriting any existing record.
	pub fn put(
		&mut self,
		id: &str,
		text: &str,
		embedding: &[f32],
		metadata: &Metadata,
	) -> Result<String, VectorError> {
		if id.is_empty() {
			return Err(VectorError::validation("record id must not be empty"));
		}
		if embedding.is_empty() {
			return Err(VectorError::EmptyEmbedding);
		}

		let meta_json = serde_json::to_string(metadata)
			.map_err(|e| VectorError::Serialization(e.to_string()))?;

		self.kv.set_text(&text_key(id), text)?;
		self.kv.set_text(&meta_key(id), &meta_json)?;
		self.kv
			.set_bytes(&embedding_key(id), &encode_embedding(embedding))?;

		tracing::debug!(id, dimension = embedding.len(), "Stored record");
		Ok(id.to_string())
	}

	/// Store a record under a fresh v4 UUID.
	pub fn insert(
		&mut self,
		text: &str,
		embedding: &[f32],
		metadata: &Metadata,
	) -> Result<String, VectorError> {
		let id = Uuid::new_v4().to_string();
		self.put(&id, text, embedding, metadata)
	}

	/// Delete a record. Returns true if it existed.
	pub fn delete(&mut self, id: &str) -> Result<bool, VectorError> {
		let existed = self.kv.delete(&embedding_key(id))?;
		self.kv.delete(&text_key(id))?;
		self.kv.delete(&meta_key(id))?;
		if existed {
			tracing::debug!(id, "Deleted record");
		}
		Ok(existed)
	}

	/// Delete several records. Returns the count actually removed.
	pub fn delete_batch(&mut self, ids: &[String]) -> Result<usize, VectorError> {
		let mut count = 0;
		for id in ids {
			if self.delete(id)? {
				count += 1;
			}
		}
		Ok(count)
	}

	/// Delete every record matching `filter` (e.g. all chunks of a paper).
	pub fn delete_scope(&mut self, filter: &ScopeFilter) -> Result<usize, VectorError> {
		if filter.is_empty() {
			return Err(VectorError::validation(
				"delete_scope requires a non-empty filter; use clear() to remove everything",
			));
		}
		let ids: Vec<String> = self
			.list(Some(filter))
			.map(|r| r.map(|rec| rec.id))
			.collect::<Result<_, _>>()?;
		self.delete_batch(&ids)
	}

	/// Remove every record, including partially written ones.
	pub fn clear(&mut self) -> Result<usize, VectorError> {
		let mut removed = 0;
		for prefix in [EMBEDDING_PREFIX, TEXT_PREFIX, META_PREFIX] {
			for key in self.kv.keys_with_prefix(prefix)? {
				if self.kv.delete(&key)? && prefix == EMBEDDING_PREFIX {
					removed += 1;
				}
			}
		}
		tracing::info!(removed, "Cleared record store");
		Ok(removed)
	}

	// -- Reads ---------------------------------------------------------------

	pub fn get(&self, id: &str) -> Result<Record, VectorError> {
		self.load(id)?
			.ok_or_else(|| VectorError::NotFound(id.to_string()))
	}

	pub fn contains(&self, id: &str) -> Result<bool, VectorError> {
		Ok(self.load(id)?.is_some())
	}

	/// Records matching `filter`, ordered by id. Partially written records
	/// are skipped.
	pub fn list(&self, filter: Option<&ScopeFilter>) -> Records<'_, K> {
		let (ids, pending_error) = match self.kv.keys_with_prefix(EMBEDDING_PREFIX) {
			Ok(keys) => (
				keys.into_iter()
					.map(|k| k[EMBEDDING_PREFIX.len()..].to_string())
					.collect::<Vec<_>>(),
				None,
			),
			Err(e) => (Vec::new(), Some(e)),
		};
		Records {
			store: self,
			filter: filter.filter(|f| !f.is_empty()).cloned(),
			ids: ids.into_iter(),
			pending_error,
		}
	}

	pub fn count(&self, filter: Option<&ScopeFilter>) -> Result<usize, VectorError> {
		let mut n = 0;
		for record in self.list(filter) {
			record?;
			n += 1;
		}
		Ok(n)
	}

	fn load(&self, id: &str) -> Result<Option<Record>, VectorError> {
		let Some(bytes) = self.kv.get_bytes(&embedding_key(id))? else {
			return Ok(None);
		};
		let text = self.kv.get_text(&text_key(id))?;
		let meta_json = self.kv.get_text(&meta_key(id))?;

		let (Some(text), Some(meta_json)) = (text, meta_json) else {
			tracing::warn!(id, "Skipping partially written record");
			return Ok(None);
		};

		let embedding = decode_embedding(&bytes)?;
		let metadata: Metadata = serde_json::from_str(&meta_json)
			.map_err(|e| VectorError::Corruption(format!("Invalid metadata for {}: {}", id, e)))?;

		Ok(Some(Record {
			id: id.to_string(),
			text,
			embedding,
			metadata,
		}))
	}
}

impl<K: KeyValueStore> Drop for RecordStore<K> {
	fn drop(&mut self) {
		if !self.closed {
			if let Err(e) = self.kv.flush() {
				tracing::error!("Failed to flush record store on drop: {}", e);
			}
		}
	}
}

// ---------------------------------------------------------------------------
// Records iterator
// ---------------------------------------------------------------------------

/// Iterator returned by [`RecordStore::list`].
pub struct Records<'a, K: KeyValueStore> {
	store: &'a RecordStore<K>,
	filter: Option<ScopeFilter>,
	ids: std::vec::IntoIter<String>,
	pending_error: Option<VectorError>,
}

impl<K: KeyValueStore> Iterator for Records<'_, K> {
	type Item = Result<Record, VectorError>;

	fn next(&mut self) -> Option<Self::Item> {
		if let Some(e) = self.pending_error.take() {
			return Some(Err(e));
		}
		loop {
			let id = self.ids.next()?;
			match self.store.load(&id) {
				Ok(Some(record)) => {
					let wanted = self
						.filter
						.as_ref()
						.is_none_or(|f| f.matches(&record.metadata));
					if wanted {
						return Some(Ok(record));
					}
				}
				Ok(None) => {}
				Err(e) => return Some(Err(e)),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::kv::{FileKv, MemoryKv};

	fn store() -> RecordStore<MemoryKv> {
		RecordStore::open(MemoryKv::new())
	}

	#[test]
	fn put_then_get_is_exact() {
		let mut s = store();
		let embedding = vec![0.1f32, -2.5, f32::MIN_POSITIVE, 1e-30, 3.4e38];
		let meta = Metadata::for_paper("p1")
			.with_section("intro")
			.with_extra("authors", vec!["x".to_string(), "y".to_string()]);
		let id = s.put("doc-1", "some text", &embedding, &meta).unwrap();
		assert_eq!(id, "doc-1");

		let rec = s.get("doc-1").unwrap();
		assert_eq!(rec.text, "some text");
		assert_eq!(rec.metadata, meta);
		let bits: Vec<u32> = rec.embedding.iter().map(|f| f.to_bits()).collect();
		let expected: Vec<u32> = embedding.iter().map(|f| f.to_bits()).collect();
		assert_eq!(bits, expected);
	}

	#[test]
	fn put_rejects_empty_embedding() {
		let mut s = store();
		let err = s.put("a", "t", &[], &Metadata::default()).unwrap_err();
		assert!(matches!(err, VectorError::EmptyEmbedding));
		assert!(!s.contains("a").unwrap());
	}

	#[test]
	fn put_overwrites_existing_id() {
		let mut s = store();
		s.put("a", "first", &[1.0], &Metadata::for_paper("p1")).unwrap();
		s.put("a", "second", &[2.0, 3.0], &Metadata::for_paper("p2")).unwrap();
		let rec = s.get("a").unwrap();
		assert_eq!(rec.text, "second");
		assert_eq!(rec.embedding, vec![2.0, 3.0]);
		assert_eq!(rec.metadata.paper_id.as_deref(), Some("p2"));
		assert_eq!(s.count(None).unwrap(), 1);
	}

	#[test]
	fn insert_generates_uuid() {
		let mut s = store();
		let id = s.insert("t", &[1.0], &Metadata::default()).unwrap();
		assert!(Uuid::parse_str(&id).is_ok());
		assert!(s.contains(&id).unwrap());
	}

	#[test]
	fn get_missing_is_not_found() {
		let s = store();
		assert!(matches!(s.get("nope"), Err(VectorError::NotFound(_))));
	}

	#[test]
	fn delete_reports_existence() {
		let mut s = store();
		s.put("a", "t", &[1.0], &Metadata::default()).unwrap();
		assert!(s.delete("a").unwrap());
		assert!(!s.delete("a").unwrap());
		assert!(s.backing().is_empty());
	}

	#[test]
	fn list_filters_and_orders_by_id() {
		let mut s = store();
		s.put("c", "t", &[1.0], &Metadata::for_paper("p1")).unwrap();
		s.put("a", "t", &[1.0], &Metadata::for_paper("p1")).unwrap();
		s.put("b", "t", &[1.0], &Metadata::for_paper("p2")).unwrap();
		s.put("d", "t", &[1.0], &Metadata::default()).unwrap();

		let all: Vec<String> = s.list(None).map(|r| r.unwrap().id).collect();
		assert_eq!(all, vec!["a", "b", "c", "d"]);

		let p1: Vec<String> = s
			.list(Some(&ScopeFilter::paper("p1")))
			.map(|r| r.unwrap().id)
			.collect();
		assert_eq!(p1, vec!["a", "c"]);
	}

	#[test]
	fn partial_record_is_invisible() {
		let mut kv = MemoryKv::new();
		kv.set_bytes("embedding:half", &encode_embedding(&[1.0, 2.0]))
			.unwrap();
		kv.set_text("meta:half", "{}").unwrap();
		let s = RecordStore::open(kv);

		assert!(matches!(s.get("half"), Err(VectorError::NotFound(_))));
		assert_eq!(s.list(None).count(), 0);
	}

	#[test]
	fn corrupt_embedding_bytes_surface_as_error() {
		let mut kv = MemoryKv::new();
		kv.set_bytes("embedding:bad", &[1, 2, 3]).unwrap();
		kv.set_text("text:bad", "t").unwrap();
		kv.set_text("meta:bad", "{}").unwrap();
		let s = RecordStore::open(kv);
		assert!(matches!(s.get("bad"), Err(VectorError::Corruption(_))));
		assert!(s.list(None).next().unwrap().is_err());
	}

	#[test]
	fn delete_scope_removes_only_matching() {
		let mut s = store();
		s.put("a", "t", &[1.0], &Metadata::for_paper("p1")).unwrap();
		s.put("b", "t", &[1.0], &Metadata::for_paper("p1")).unwrap();
		s.put("c", "t", &[1.0], &Metadata::for_paper("p2")).unwrap();

		assert_eq!(s.delete_scope(&ScopeFilter::paper("p1")).unwrap(), 2);
		let left: Vec<String> = s.list(None).map(|r| r.unwrap().id).collect();
		assert_eq!(left, vec!["c"]);
		assert!(s.delete_scope(&ScopeFilter::new()).is_err());
	}

	#[test]
	fn clear_removes_partials_too() {
		let mut s = store();
		s.put("a", "t", &[1.0], &Metadata::default()).unwrap();
		s.put("b", "t", &[1.0], &Metadata::default()).unwrap();
		assert_eq!(s.clear().unwrap(), 2);
		assert!(s.backing().is_empty());
	}

	#[test]
	fn file_backed_store_reopens() {
		let dir = tempfile::tempdir().unwrap();
		{
			let mut s = RecordStore::open(FileKv::open(dir.path()).unwrap());
			s.put("a", "persist me", &[0.25, 0.5], &Metadata::for_paper("p"))
				.unwrap();
			s.close().unwrap();
		}
		let s = RecordStore::open(FileKv::open(dir.path()).unwrap());
		let rec = s.get("a").unwrap();
		assert_eq!(rec.text, "persist me");
		assert_eq!(rec.embedding, vec![0.25, 0.5]);
	}

	#[test]
	fn embedding_codec_rejects_ragged_bytes() {
		assert!(decode_embedding(&[0u8; 5]).is_err());
		assert_eq!(decode_embedding(&encode_embedding(&[1.5])).unwrap(), vec![1.5]);
	}
}
