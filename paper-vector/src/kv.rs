// ---------------------------------------------------------------------------
// Key-value backing store
// ---------------------------------------------------------------------------
//
// The record store addresses its data by string key (`embedding:<id>`,
// `text:<id>`, `meta:<id>`). Two backends:
//
//   MemoryKv  ordered in-memory map, nothing survives the process
//   FileKv    the same map mirrored to `<dir>/store.kv`
//
// Snapshot file format: gzipped JSON
//   { "version": 1, "entries": { "<key>": { "kind": "bytes"|"text", "data": "<base64>" } } }
// Mutations only mark the store dirty; `flush` rewrites the snapshot through
// a temp file + rename.
// ---------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::{GzDecoder, GzEncoder};
use serde::{Deserialize, Serialize};

use crate::error::VectorError;

pub const SNAPSHOT_FILE: &str = "store.kv";
const SNAPSHOT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

pub trait KeyValueStore {
	fn set_bytes(&mut self, key: &str, value: &[u8]) -> Result<(), VectorError>;
	fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, VectorError>;
	fn set_text(&mut self, key: &str, value: &str) -> Result<(), VectorError>;
	fn get_text(&self, key: &str) -> Result<Option<String>, VectorError>;
	/// Returns true if the key existed.
	fn delete(&mut self, key: &str) -> Result<bool, VectorError>;
	/// Keys starting with `prefix`, in sorted order.
	fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, VectorError>;
	/// Make pending writes durable.
	fn flush(&mut self) -> Result<(), VectorError>;
}

impl<K: KeyValueStore + ?Sized> KeyValueStore for Box<K> {
	fn set_bytes(&mut self, key: &str, value: &[u8]) -> Result<(), VectorError> {
		(**self).set_bytes(key, value)
	}

	fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, VectorError> {
		(**self).get_bytes(key)
	}

	fn set_text(&mut self, key: &str, value: &str) -> Result<(), VectorError> {
		(**self).set_text(key, value)
	}

	fn get_text(&self, key: &str) -> Result<Option<String>, VectorError> {
		(**self).get_text(key)
	}

	fn delete(&mut self, key: &str) -> Result<bool, VectorError> {
		(**self).delete(key)
	}

	fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, VectorError> {
		(**self).keys_with_prefix(prefix)
	}

	fn flush(&mut self) -> Result<(), VectorError> {
		(**self).flush()
	}
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
	Bytes(Vec<u8>),
	Text(String),
}

#[derive(Debug, Default)]
pub struct MemoryKv {
	entries: BTreeMap<String, Value>,
}

impl MemoryKv {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

impl KeyValueStore for MemoryKv {
	fn set_bytes(&mut self, key: &str, value: &[u8]) -> Result<(), VectorError> {
		self.entries
			.insert(key.to_string(), Value::Bytes(value.to_vec()));
		Ok(())
	}

	fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, VectorError> {
		Ok(self.entries.get(key).map(|v| match v {
			Value::Bytes(b) => b.clone(),
			Value::Text(t) => t.as_bytes().to_vec(),
		}))
	}

	fn set_text(&mut self, key: &str, value: &str) -> Result<(), VectorError> {
		self.entries
			.insert(key.to_string(), Value::Text(value.to_string()));
		Ok(())
	}

	fn get_text(&self, key: &str) -> Result<Option<String>, VectorError> {
		match self.entries.get(key) {
			None => Ok(None),
			Some(Value::Text(t)) => Ok(Some(t.clone())),
			Some(Value::Bytes(b)) => String::from_utf8(b.clone())
				.map(Some)
				.map_err(|e| VectorError::Corruption(format!("Non-UTF-8 text at {}: {}", key, e))),
		}
	}

	fn delete(&mut self, key: &str) -> Result<bool, VectorError> {
		Ok(self.entries.remove(key).is_some())
	}

	fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, VectorError> {
		Ok(self
			.entries
			.range(prefix.to_string()..)
			.take_while(|(k, _)| k.starts_with(prefix))
			.map(|(k, _)| k.clone())
			.collect())
	}

	fn flush(&mut self) -> Result<(), VectorError> {
		Ok(())
	}
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
	kind: String,
	data: String,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
	version: u32,
	entries: BTreeMap<String, SnapshotEntry>,
}

/// Directory-backed store. Reads and writes go to memory; the snapshot is
/// rewritten on [`KeyValueStore::flush`] when anything changed.
#[derive(Debug)]
pub struct FileKv {
	dir: PathBuf,
	inner: MemoryKv,
	dirty: bool,
}

impl FileKv {
	/// Open (or create) the store in `dir`. A missing snapshot is an empty
	/// store; an unreadable one is `VectorError::Corruption`.
	pub fn open(dir: impl AsRef<Path>) -> Result<Self, VectorError> {
		let dir = dir.as_ref().to_path_buf();
		fs::create_dir_all(&dir)?;

		let path = dir.join(SNAPSHOT_FILE);
		let inner = if path.exists() {
			let raw = fs::read(&path)?;
			decode_snapshot(&raw)?
		} else {
			MemoryKv::new()
		};

		tracing::debug!(dir = %dir.display(), keys = inner.len(), "Opened file store");
		Ok(Self {
			dir,
			inner,
			dirty: false,
		})
	}

	pub fn path(&self) -> PathBuf {
		self.dir.join(SNAPSHOT_FILE)
	}

	/// True if there are writes not yet in the snapshot.
	pub fn is_dirty(&self) -> bool {
		self.dirty
	}

	fn persist(&self) -> Result<(), VectorError> {
		let bytes = encode_snapshot(&self.inner)?;
		let tmp = self.dir.join(format!("{}.tmp", SNAPSHOT_FILE));
		fs::write(&tmp, bytes)?;
		fs::rename(&tmp, self.path())?;
		Ok(())
	}
}

impl KeyValueStore for FileKv {
	fn set_bytes(&mut self, key: &str, value: &[u8]) -> Result<(), VectorError> {
		self.inner.set_bytes(key, value)?;
		self.dirty = true;
		Ok(())
	}

	fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, VectorError> {
		self.inner.get_bytes(key)
	}

	fn set_text(&mut self, key: &str, value: &str) -> Result<(), VectorError> {
		self.inner.set_text(key, value)?;
		self.dirty = true;
		Ok(())
	}

	fn get_text(&self, key: &str) -> Result<Option<String>, VectorError> {
		self.inner.get_text(key)
	}

	fn delete(&mut self, key: &str) -> Result<bool, VectorError> {
		let existed = self.inner.delete(key)?;
		self.dirty |= existed;
		Ok(existed)
	}

	fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, VectorError> {
		self.inner.keys_with_prefix(prefix)
	}

	fn flush(&mut self) -> Result<(), VectorError> {
		if !self.dirty {
			return Ok(());
		}
		self.persist()?;
		self.dirty = false;
		tracing::trace!(keys = self.inner.len(), "Snapshot written");
		Ok(())
	}
}

// ---------------------------------------------------------------------------
// Snapshot codec
// ---------------------------------------------------------------------------

/// Gzip-compress a byte slice.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, VectorError> {
	let mut encoder = GzEncoder::new(data, Compression::new(6));
	let mut compressed = Vec::new();
	encoder.read_to_end(&mut compressed)?;
	Ok(compressed)
}

/// Gunzip-decompress a byte slice.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, VectorError> {
	let mut decoder = GzDecoder::new(data);
	let mut decompressed = Vec::new();
	decoder
		.read_to_end(&mut decompressed)
		.map_err(|e| VectorError::Corruption(format!("Invalid gzip data: {}", e)))?;
	Ok(decompressed)
}

/// Check if data starts with gzip magic bytes (0x1f, 0x8b).
pub fn is_gzipped(data: &[u8]) -> bool {
	data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

fn encode_snapshot(kv: &MemoryKv) -> Result<Vec<u8>, VectorError> {
	let entries = kv
		.entries
		.iter()
		.map(|(k, v)| {
			let entry = match v {
				Value::Bytes(b) => SnapshotEntry {
					kind: "bytes".into(),
					data: STANDARD.encode(b),
				},
				Value::Text(t) => SnapshotEntry {
					kind: "text".into(),
					data: STANDARD.encode(t.as_bytes()),
				},
			};
			(k.clone(), entry)
		})
		.collect();

	let json = serde_json::to_vec(&Snapshot {
		version: SNAPSHOT_VERSION,
		entries,
	})
	.map_err(|e| VectorError::Serialization(e.to_string()))?;
	compress(&json)
}

fn decode_snapshot(raw: &[u8]) -> Result<MemoryKv, VectorError> {
	if raw.is_empty() {
		return Ok(MemoryKv::new());
	}
	if !is_gzipped(raw) {
		return Err(VectorError::Corruption(
			"Snapshot is not gzip-compressed".into(),
		));
	}

	let json = decompress(raw)?;
	let snapshot: Snapshot = serde_json::from_slice(&json)
		.map_err(|e| VectorError::Corruption(format!("Invalid snapshot JSON: {}", e)))?;
	if snapshot.version != SNAPSHOT_VERSION {
		return Err(VectorError::Corruption(format!(
			"Unsupported snapshot version {}",
			snapshot.version
		)));
	}

	let mut kv = MemoryKv::new();
	for (key, entry) in snapshot.entries {
		let data = STANDARD
			.decode(&entry.data)
			.map_err(|e| VectorError::Corruption(format!("Invalid base64 at {}: {}", key, e)))?;
		let value = match entry.kind.as_str() {
			"bytes" => Value::Bytes(data),
			"text" => Value::Text(String::from_utf8(data).map_err(|e| {
				VectorError::Corruption(format!("Invalid UTF-8 at {}: {}", key, e))
			})?),
			other => {
				return Err(VectorError::Corruption(format!(
					"Unknown entry kind {:?} at {}",
					other, key
				)));
			}
		};
		kv.entries.insert(key, value);
	}
	Ok(kv)
}
