use thiserror::Error;

use crate::embedder::EmbedError;

#[derive(Debug, Error)]
pub enum VectorError {
	#[error("Validation failed: {0}")]
	Validation(String),
	#[error("Empty embedding: cannot store a record with an empty embedding")]
	EmptyEmbedding,
	#[error("Embedding failed: {0}")]
	Embedding(#[from] EmbedError),
	#[error("Record not found: {0}")]
	NotFound(String),
	#[error("Dimension mismatch: expected {expected}, got {actual}")]
	DimensionMismatch { expected: usize, actual: usize },
	#[error("No embedder configured: start the engine with --ollama-url")]
	NoEmbedder,
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Storage corruption: {0}")]
	Corruption(String),
}

impl VectorError {
	pub fn validation(msg: impl Into<String>) -> Self {
		Self::Validation(msg.into())
	}

	pub fn code(&self) -> &str {
		match self {
			Self::Validation(_) => "VECTOR_VALIDATION",
			Self::EmptyEmbedding => "VECTOR_EMPTY_EMBEDDING",
			Self::Embedding(_) => "VECTOR_EMBEDDING_FAILED",
			Self::NotFound(_) => "VECTOR_RECORD_NOT_FOUND",
			Self::DimensionMismatch { .. } => "VECTOR_DIMENSION_MISMATCH",
			Self::NoEmbedder => "VECTOR_NO_EMBEDDER",
			Self::Io(_) => "VECTOR_IO",
			Self::Serialization(_) => "VECTOR_SERIALIZATION",
			Self::Corruption(_) => "VECTOR_CORRUPT",
		}
	}

	pub fn to_json_rpc_error(&self) -> serde_json::Value {
		serde_json::json!({
			"vectorCode": self.code(),
			"message": self.to_string(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn codes_are_stable() {
		assert_eq!(VectorError::validation("x").code(), "VECTOR_VALIDATION");
		assert_eq!(VectorError::EmptyEmbedding.code(), "VECTOR_EMPTY_EMBEDDING");
		assert_eq!(
			VectorError::DimensionMismatch { expected: 3, actual: 2 }.code(),
			"VECTOR_DIMENSION_MISMATCH"
		);
	}

	#[test]
	fn json_rpc_error_carries_code_and_message() {
		let err = VectorError::NotFound("abc".into());
		let value = err.to_json_rpc_error();
		assert_eq!(value["vectorCode"], "VECTOR_RECORD_NOT_FOUND");
		assert_eq!(value["message"], "Record not found: abc");
	}

	#[test]
	fn embed_error_converts() {
		let err: VectorError = EmbedError::new("connection refused").into();
		assert_eq!(err.code(), "VECTOR_EMBEDDING_FAILED");
		assert!(err.to_string().contains("connection refused"));
	}
}
