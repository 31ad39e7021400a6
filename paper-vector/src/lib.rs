pub mod clustering;
pub mod config;
pub mod cosine;
pub mod embedder;
pub mod error;
pub mod hierarchy;
pub mod ingest;
pub mod kv;
pub mod pipeline;
pub mod protocol;
pub mod reduction;
pub mod search;
pub mod server;
pub mod store;
pub mod transport;
pub mod types;

pub use error::VectorError;
pub use store::RecordStore;
