// ---------------------------------------------------------------------------
// VectorServer: JSON-RPC dispatcher
// ---------------------------------------------------------------------------
//
// Routes JSON-RPC 2.0 requests (NDJSON over stdin) to the record store,
// search, ingestion and cluster-map operations. One request at a time: a
// `run()` loop, a `dispatch()` match and free-standing handler functions.
// ---------------------------------------------------------------------------

use std::io::{self, BufRead};

use serde::Deserialize;

use crate::embedder::Embedder;
use crate::error::VectorError;
use crate::ingest::{ingest, ingest_batch};
use crate::kv::KeyValueStore;
use crate::pipeline::{ClusterOptions, cluster_scope};
use crate::protocol::*;
use crate::search::{search, search_text};
use crate::store::RecordStore;
use crate::transport::NdjsonTransport;
use crate::types::{Metadata, ScopeFilter};

pub type DynStore = RecordStore<Box<dyn KeyValueStore>>;

/// Request defaults that callers may override per call.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub default_top_k: usize,
	pub default_min_score: f64,
	pub cluster: ClusterOptions,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			default_top_k: 5,
			default_min_score: 0.0,
			cluster: ClusterOptions::default(),
		}
	}
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// JSON-RPC server over an injected [`RecordStore`].
pub struct VectorServer {
	transport: NdjsonTransport,
	store: DynStore,
	embedder: Option<Box<dyn Embedder>>,
	config: ServerConfig,
}

impl VectorServer {
	pub fn new(
		transport: NdjsonTransport,
		store: DynStore,
		embedder: Option<Box<dyn Embedder>>,
		config: ServerConfig,
	) -> Self {
		Self {
			transport,
			store,
			embedder,
			config,
		}
	}

	/// Hand the store back so the caller can close it.
	pub fn into_store(self) -> DynStore {
		self.store
	}

	/// Main loop: read JSON-RPC messages from stdin until EOF.
	pub fn run(&mut self) -> Result<(), VectorError> {
		let stdin = io::stdin();
		self.serve(stdin.lock())
	}

	/// Serve requests from any line reader.
	pub fn serve(&mut self, reader: impl BufRead) -> Result<(), VectorError> {
		for line_result in reader.lines() {
			let line = line_result?;
			if line.trim().is_empty() {
				continue;
			}

			let request: JsonRpcRequest = match serde_json::from_str(&line) {
				Ok(r) => r,
				Err(e) => {
					tracing::error!("Failed to parse request: {}", e);
					self.transport
						.write_unaddressed_error(PARSE_ERROR, format!("Parse error: {}", e));
					continue;
				}
			};

			self.dispatch(request);
		}

		Ok(())
	}

	// ── Dispatch ──────────────────────────────────────────────────────────

	fn dispatch(&mut self, req: JsonRpcRequest) {
		let id = req.id;
		tracing::debug!(id, method = %req.method, "Dispatching request");

		let result = match req.method.as_str() {
			// -- Store ---------------------------------------------------
			"store/put" => handle_put(&mut self.store, req.params),
			"store/get" => handle_get(&self.store, req.params),
			"store/delete" => handle_delete(&mut self.store, req.params),
			"store/deleteBatch" => handle_delete_batch(&mut self.store, req.params),
			"store/deleteScope" => handle_delete_scope(&mut self.store, req.params),
			"store/list" => handle_list(&self.store, req.params),
			"store/count" => handle_count(&self.store, req.params),
			"store/clear" => self
				.store
				.clear()
				.map(|_| serde_json::json!({})),

			// -- Search --------------------------------------------------
			"search/vector" => handle_search_vector(&self.store, &self.config, req.params),
			"search/text" => self.embedder().and_then(|e| {
				handle_search_text(&self.store, e, &self.config, req.params)
			}),

			// -- Ingestion -----------------------------------------------
			"ingest/one" => match self.embedder.as_deref() {
				Some(e) => handle_ingest(&mut self.store, e, req.params),
				None => Err(VectorError::NoEmbedder),
			},
			"ingest/batch" => match self.embedder.as_deref() {
				Some(e) => handle_ingest_batch(&mut self.store, e, req.params),
				None => Err(VectorError::NoEmbedder),
			},

			// -- Cluster map ---------------------------------------------
			"cluster/run" => handle_cluster_run(&self.store, &self.config, req.params),
			"cluster/hierarchy" => handle_cluster_hierarchy(&self.store, &self.config, req.params),

			// -- Unknown -------------------------------------------------
			_ => {
				self.transport.write_error(
					id,
					METHOD_NOT_FOUND,
					format!("Unknown method: {}", req.method),
					None,
				);
				return;
			}
		};

		// One snapshot write per mutating request, also after partial failures.
		let result = if is_mutation(&req.method) {
			let flushed = self.store.flush();
			result.and_then(|value| flushed.map(|_| value))
		} else {
			result
		};

		match result {
			Ok(value) => self.transport.write_response(id, value),
			Err(e) => {
				tracing::debug!(id, code = e.code(), "Request failed: {}", e);
				self.transport.write_error(
					id,
					VECTOR_ERROR,
					e.to_string(),
					Some(e.to_json_rpc_error()),
				)
			}
		}
	}

	fn embedder(&self) -> Result<&dyn Embedder, VectorError> {
		self.embedder.as_deref().ok_or(VectorError::NoEmbedder)
	}
}

fn is_mutation(method: &str) -> bool {
	matches!(method.split('/').next(), Some("store" | "ingest"))
		&& !matches!(method, "store/get" | "store/list" | "store/count")
}

// ---------------------------------------------------------------------------
// Param types
// ---------------------------------------------------------------------------

fn parse_params<T: serde::de::DeserializeOwned>(
	params: serde_json::Value,
) -> Result<T, VectorError> {
	serde_json::from_value(params)
		.map_err(|e| VectorError::Serialization(format!("Invalid params: {}", e)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutParams {
	id: Option<String>,
	text: String,
	embedding: Vec<f32>,
	#[serde(default)]
	metadata: Metadata,
}

#[derive(Deserialize)]
struct IdParams {
	id: String,
}

#[derive(Deserialize)]
struct IdsParams {
	ids: Vec<String>,
}

#[derive(Deserialize)]
struct DeleteScopeParams {
	filter: ScopeFilter,
}

#[derive(Deserialize)]
struct FilterParams {
	#[serde(default)]
	filter: Option<ScopeFilter>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchVectorParams {
	query_embedding: Vec<f32>,
	filter: Option<ScopeFilter>,
	top_k: Option<usize>,
	min_score: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchTextParams {
	query: String,
	filter: Option<ScopeFilter>,
	top_k: Option<usize>,
	min_score: Option<f64>,
}

#[derive(Deserialize)]
struct IngestParams {
	text: String,
	#[serde(default)]
	metadata: Metadata,
}

#[derive(Deserialize)]
struct IngestBatchParams {
	texts: Vec<String>,
	metadata: Option<Vec<Metadata>>,
}

#[derive(Deserialize)]
struct ClusterRunParams {
	filter: Option<ScopeFilter>,
	#[serde(default)]
	options: serde_json::Value,
}

/// Params are optional for list-style methods; `null` means "no filter".
fn parse_filter(params: serde_json::Value) -> Result<Option<ScopeFilter>, VectorError> {
	if params.is_null() {
		return Ok(None);
	}
	let p: FilterParams = parse_params(params)?;
	Ok(p.filter)
}

/// Overlay request options onto the configured defaults, key by key.
fn merge_options(
	defaults: &ClusterOptions,
	overrides: serde_json::Value,
) -> Result<ClusterOptions, VectorError> {
	if overrides.is_null() {
		return Ok(defaults.clone());
	}
	let mut base = serde_json::to_value(defaults)
		.map_err(|e| VectorError::Serialization(e.to_string()))?;
	merge_json(&mut base, overrides);
	parse_params(base)
}

fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
	match (base, overlay) {
		(serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
			for (key, value) in overlay {
				match base.get_mut(&key) {
					Some(slot) => merge_json(slot, value),
					None => {
						base.insert(key, value);
					}
				}
			}
		}
		(slot, value) => *slot = value,
	}
}

// ---------------------------------------------------------------------------
// Free-standing handler functions
// ---------------------------------------------------------------------------

fn handle_put(store: &mut DynStore, params: serde_json::Value) -> Result<serde_json::Value, VectorError> {
	let p: PutParams = parse_params(params)?;
	let id = match p.id {
		Some(id) => store.put(&id, &p.text, &p.embedding, &p.metadata)?,
		None => store.insert(&p.text, &p.embedding, &p.metadata)?,
	};
	Ok(serde_json::json!({ "id": id }))
}

fn handle_get(store: &DynStore, params: serde_json::Value) -> Result<serde_json::Value, VectorError> {
	let p: IdParams = parse_params(params)?;
	let record = store.get(&p.id)?;
	Ok(serde_json::json!({ "record": record }))
}

fn handle_delete(store: &mut DynStore, params: serde_json::Value) -> Result<serde_json::Value, VectorError> {
	let p: IdParams = parse_params(params)?;
	let deleted = store.delete(&p.id)?;
	Ok(serde_json::json!({ "deleted": deleted }))
}

fn handle_delete_batch(
	store: &mut DynStore,
	params: serde_json::Value,
) -> Result<serde_json::Value, VectorError> {
	let p: IdsParams = parse_params(params)?;
	let count = store.delete_batch(&p.ids)?;
	Ok(serde_json::json!({ "count": count }))
}

fn handle_delete_scope(
	store: &mut DynStore,
	params: serde_json::Value,
) -> Result<serde_json::Value, VectorError> {
	let p: DeleteScopeParams = parse_params(params)?;
	let count = store.delete_scope(&p.filter)?;
	Ok(serde_json::json!({ "count": count }))
}

fn handle_list(store: &DynStore, params: serde_json::Value) -> Result<serde_json::Value, VectorError> {
	let filter = parse_filter(params)?;
	let records = store.list(filter.as_ref()).collect::<Result<Vec<_>, _>>()?;
	Ok(serde_json::json!({ "records": records }))
}

fn handle_count(store: &DynStore, params: serde_json::Value) -> Result<serde_json::Value, VectorError> {
	let filter = parse_filter(params)?;
	let count = store.count(filter.as_ref())?;
	Ok(serde_json::json!({ "count": count }))
}

fn handle_search_vector(
	store: &DynStore,
	config: &ServerConfig,
	params: serde_json::Value,
) -> Result<serde_json::Value, VectorError> {
	let p: SearchVectorParams = parse_params(params)?;
	let results = search(
		store,
		&p.query_embedding,
		p.filter.as_ref(),
		p.top_k.unwrap_or(config.default_top_k),
		p.min_score.unwrap_or(config.default_min_score),
	)?;
	Ok(serde_json::json!({ "results": results }))
}

fn handle_search_text(
	store: &DynStore,
	embedder: &dyn Embedder,
	config: &ServerConfig,
	params: serde_json::Value,
) -> Result<serde_json::Value, VectorError> {
	let p: SearchTextParams = parse_params(params)?;
	let results = search_text(
		store,
		embedder,
		&p.query,
		p.filter.as_ref(),
		p.top_k.unwrap_or(config.default_top_k),
		p.min_score.unwrap_or(config.default_min_score),
	)?;
	Ok(serde_json::json!({ "results": results }))
}

fn handle_ingest(
	store: &mut DynStore,
	embedder: &dyn Embedder,
	params: serde_json::Value,
) -> Result<serde_json::Value, VectorError> {
	let p: IngestParams = parse_params(params)?;
	let id = ingest(store, embedder, &p.text, &p.metadata)?;
	Ok(serde_json::json!({ "id": id }))
}

fn handle_ingest_batch(
	store: &mut DynStore,
	embedder: &dyn Embedder,
	params: serde_json::Value,
) -> Result<serde_json::Value, VectorError> {
	let p: IngestBatchParams = parse_params(params)?;
	let metadata = p
		.metadata
		.unwrap_or_else(|| vec![Metadata::default(); p.texts.len()]);
	let ids = ingest_batch(store, embedder, &p.texts, &metadata)?;
	Ok(serde_json::json!({ "ids": ids }))
}

fn run_cluster(
	store: &DynStore,
	config: &ServerConfig,
	params: serde_json::Value,
) -> Result<crate::pipeline::ClusterReport, VectorError> {
	let p: ClusterRunParams = if params.is_null() {
		ClusterRunParams {
			filter: None,
			options: serde_json::Value::Null,
		}
	} else {
		parse_params(params)?
	};
	let options = merge_options(&config.cluster, p.options)?;
	cluster_scope(store, p.filter.as_ref(), &options)
}

fn handle_cluster_run(
	store: &DynStore,
	config: &ServerConfig,
	params: serde_json::Value,
) -> Result<serde_json::Value, VectorError> {
	let report = run_cluster(store, config, params)?;
	serde_json::to_value(report).map_err(|e| VectorError::Serialization(e.to_string()))
}

fn handle_cluster_hierarchy(
	store: &DynStore,
	config: &ServerConfig,
	params: serde_json::Value,
) -> Result<serde_json::Value, VectorError> {
	let report = run_cluster(store, config, params)?;
	Ok(serde_json::json!({ "hierarchy": report.hierarchy }))
}
