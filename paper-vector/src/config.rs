use std::path::PathBuf;

use clap::Parser;

use crate::clustering::ClusterParams;
use crate::embedder::{DEFAULT_OLLAMA_MODEL, OllamaConfig};
use crate::pipeline::ClusterOptions;
use crate::reduction::ReductionParams;
use crate::server::ServerConfig;

#[derive(Parser, Debug)]
#[command(
	name = "paper-vector-engine",
	about = "JSON-RPC vector store and cluster map engine for paper chunks"
)]
pub struct CliArgs {
	/// Directory for the persistent store. In-memory when omitted.
	#[arg(long, env = "PAPER_VECTOR_STORAGE_PATH")]
	pub storage_path: Option<PathBuf>,

	/// Ollama server URL for text embeddings (e.g., http://localhost:11434).
	/// Text search and ingestion are unavailable without it.
	#[arg(long, env = "PAPER_VECTOR_OLLAMA_URL")]
	pub ollama_url: Option<String>,

	/// Embedding model served by Ollama
	#[arg(long, default_value = DEFAULT_OLLAMA_MODEL, env = "PAPER_VECTOR_EMBEDDING_MODEL")]
	pub embedding_model: String,

	/// Embedding request timeout in seconds
	#[arg(long, default_value = "30", env = "PAPER_VECTOR_EMBED_TIMEOUT")]
	pub embed_timeout: u64,

	/// Results returned by search when the request gives no topK
	#[arg(long, default_value = "5", env = "PAPER_VECTOR_TOP_K")]
	pub default_top_k: usize,

	/// Minimum cosine score when the request gives no minScore
	#[arg(long, default_value = "0.0", env = "PAPER_VECTOR_MIN_SCORE")]
	pub default_min_score: f64,

	/// UMAP neighbourhood size
	#[arg(long, default_value = "15", env = "PAPER_VECTOR_N_NEIGHBORS")]
	pub n_neighbors: usize,

	/// UMAP minimum distance between embedded points
	#[arg(long, default_value = "0.1", env = "PAPER_VECTOR_MIN_DIST")]
	pub min_dist: f64,

	/// Seed for the layout. Same seed, same map.
	#[arg(long, default_value = "42", env = "PAPER_VECTOR_SEED")]
	pub seed: u64,

	/// HDBSCAN minimum cluster size
	#[arg(long, default_value = "2", env = "PAPER_VECTOR_MIN_CLUSTER_SIZE")]
	pub min_cluster_size: usize,

	/// HDBSCAN min samples (core distance neighbour)
	#[arg(long, default_value = "1", env = "PAPER_VECTOR_MIN_SAMPLES")]
	pub min_samples: usize,

	/// Log level (trace, debug, info, warn, error)
	#[arg(long, default_value = "info", env = "PAPER_VECTOR_LOG_LEVEL")]
	pub log_level: String,
}

impl CliArgs {
	/// Embedder settings, if an Ollama URL was configured.
	pub fn ollama_config(&self) -> Option<OllamaConfig> {
		self.ollama_url.as_ref().map(|url| OllamaConfig {
			base_url: url.clone(),
			model: self.embedding_model.clone(),
			timeout_secs: self.embed_timeout,
		})
	}

	pub fn server_config(&self) -> ServerConfig {
		ServerConfig {
			default_top_k: self.default_top_k,
			default_min_score: self.default_min_score,
			cluster: ClusterOptions {
				reduction: ReductionParams {
					n_neighbors: self.n_neighbors,
					min_dist: self.min_dist,
					seed: Some(self.seed),
					..ReductionParams::default()
				},
				clustering: ClusterParams {
					min_cluster_size: self.min_cluster_size,
					min_samples: self.min_samples,
					..ClusterParams::default()
				},
				..ClusterOptions::default()
			},
		}
	}
}
