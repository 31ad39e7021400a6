//! Text embedders.
//!
//! The store never embeds on its own; ingestion and text search take an
//! [`Embedder`]. The production implementation talks to an Ollama server
//! over HTTP.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ureq::Agent;

/// Failure to turn text into a vector.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct EmbedError {
	message: String,
}

impl EmbedError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
		}
	}
}

/// Maps text to a fixed-dimension vector.
pub trait Embedder {
	fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

impl<F> Embedder for F
where
	F: Fn(&str) -> Result<Vec<f32>, EmbedError>,
{
	fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
		self(text)
	}
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text:v1.5";

#[derive(Debug, Clone)]
pub struct OllamaConfig {
	/// Base URL of the Ollama server.
	pub base_url: String,
	pub model: String,
	/// Request timeout in seconds.
	pub timeout_secs: u64,
}

impl Default for OllamaConfig {
	fn default() -> Self {
		Self {
			base_url: DEFAULT_OLLAMA_URL.to_string(),
			model: DEFAULT_OLLAMA_MODEL.to_string(),
			timeout_secs: 30,
		}
	}
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
	model: &'a str,
	prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
	embedding: Vec<f32>,
}

/// Embedder backed by Ollama's `/api/embeddings` endpoint.
pub struct OllamaEmbedder {
	url: String,
	agent: Agent,
	model: String,
}

impl OllamaEmbedder {
	pub fn new(config: OllamaConfig) -> Self {
		let url = format!("{}/api/embeddings", config.base_url.trim_end_matches('/'));
		let agent_config = Agent::config_builder()
			.timeout_global(Some(Duration::from_secs(config.timeout_secs)))
			.build();
		let agent = Agent::new_with_config(agent_config);
		Self {
			url,
			agent,
			model: config.model,
		}
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	pub fn model(&self) -> &str {
		&self.model
	}
}

impl Embedder for OllamaEmbedder {
	fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
		tracing::debug!(url = %self.url, model = %self.model, chars = text.len(), "Requesting embedding");

		let body = OllamaEmbedRequest {
			model: &self.model,
			prompt: text,
		};

		let response: OllamaEmbedResponse = self
			.agent
			.post(&self.url)
			.send_json(&body)
			.map_err(|e| EmbedError::new(format!("Ollama request failed: {}", e)))?
			.body_mut()
			.read_json()
			.map_err(|e| EmbedError::new(format!("Ollama response parse error: {}", e)))?;

		if response.embedding.is_empty() {
			return Err(EmbedError::new("Ollama returned an empty embedding"));
		}

		tracing::debug!(dimension = response.embedding.len(), "Embedding received");
		Ok(response.embedding)
	}
}
