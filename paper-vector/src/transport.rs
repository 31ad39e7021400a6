use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use serde::Serialize;

#[derive(Serialize)]
struct JsonRpcResponse<'a> {
	jsonrpc: &'a str,
	/// `null` when the request id could not be read.
	id: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	result: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<JsonRpcErrorBody>,
}

#[derive(Serialize)]
struct JsonRpcErrorBody {
	code: i32,
	message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	data: Option<serde_json::Value>,
}

enum Sink {
	Stdout,
	Buffer(Arc<Mutex<Vec<u8>>>),
}

/// Writes JSON-RPC responses as newline-delimited JSON.
pub struct NdjsonTransport {
	sink: Sink,
}

impl Default for NdjsonTransport {
	fn default() -> Self {
		Self::new()
	}
}

impl NdjsonTransport {
	pub fn new() -> Self {
		Self { sink: Sink::Stdout }
	}

	/// Transport that appends lines to a shared buffer instead of stdout.
	pub fn buffered(buffer: Arc<Mutex<Vec<u8>>>) -> Self {
		Self {
			sink: Sink::Buffer(buffer),
		}
	}

	pub fn write_response(&self, id: u64, result: serde_json::Value) {
		self.write_line(&JsonRpcResponse {
			jsonrpc: "2.0",
			id: Some(id),
			result: Some(result),
			error: None,
		});
	}

	pub fn write_error(
		&self,
		id: u64,
		code: i32,
		message: impl Into<String>,
		data: Option<serde_json::Value>,
	) {
		self.write_error_body(Some(id), code, message.into(), data);
	}

	/// Error reply for a line whose id is unknown (`"id": null`).
	pub fn write_unaddressed_error(&self, code: i32, message: impl Into<String>) {
		self.write_error_body(None, code, message.into(), None);
	}

	fn write_error_body(
		&self,
		id: Option<u64>,
		code: i32,
		message: String,
		data: Option<serde_json::Value>,
	) {
		self.write_line(&JsonRpcResponse {
			jsonrpc: "2.0",
			id,
			result: None,
			error: Some(JsonRpcErrorBody {
				code,
				message,
				data,
			}),
		});
	}

	fn write_line(&self, value: &impl Serialize) {
		let mut line = match serde_json::to_vec(value) {
			Ok(bytes) => bytes,
			Err(e) => {
				tracing::error!("Failed to serialize: {}", e);
				return;
			}
		};
		line.push(b'\n');

		match &self.sink {
			Sink::Stdout => {
				let mut stdout = io::stdout().lock();
				let _ = stdout.write_all(&line);
				let _ = stdout.flush();
			}
			Sink::Buffer(buffer) => match buffer.lock() {
				Ok(mut buf) => buf.extend_from_slice(&line),
				Err(e) => tracing::error!("Transport buffer poisoned: {}", e),
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn lines(buffer: &Arc<Mutex<Vec<u8>>>) -> Vec<serde_json::Value> {
		let bytes = buffer.lock().unwrap().clone();
		String::from_utf8(bytes)
			.unwrap()
			.lines()
			.map(|l| serde_json::from_str(l).unwrap())
			.collect()
	}

	#[test]
	fn response_line_has_result_and_no_error() {
		let buffer = Arc::new(Mutex::new(Vec::new()));
		let transport = NdjsonTransport::buffered(buffer.clone());
		transport.write_response(7, serde_json::json!({ "ok": true }));

		let out = lines(&buffer);
		assert_eq!(out.len(), 1);
		assert_eq!(out[0]["jsonrpc"], "2.0");
		assert_eq!(out[0]["id"], 7);
		assert_eq!(out[0]["result"]["ok"], true);
		assert!(out[0].get("error").is_none());
	}

	#[test]
	fn error_line_omits_missing_data() {
		let buffer = Arc::new(Mutex::new(Vec::new()));
		let transport = NdjsonTransport::buffered(buffer.clone());
		transport.write_error(3, -32601, "Unknown method: nope", None);

		let out = lines(&buffer);
		assert_eq!(out[0]["error"]["code"], -32601);
		assert!(out[0]["error"].get("data").is_none());
		assert!(out[0].get("result").is_none());
	}

	#[test]
	fn unaddressed_error_has_null_id() {
		let buffer = Arc::new(Mutex::new(Vec::new()));
		let transport = NdjsonTransport::buffered(buffer.clone());
		transport.write_unaddressed_error(-32700, "Parse error");

		let out = lines(&buffer);
		assert_eq!(out.len(), 1);
		assert!(out[0]["id"].is_null());
		assert!(out[0].as_object().unwrap().contains_key("id"));
		assert_eq!(out[0]["error"]["code"], -32700);
	}
}
