use clap::Parser;
use paper_vector_engine::config::CliArgs;
use paper_vector_engine::embedder::{Embedder, OllamaEmbedder};
use paper_vector_engine::error::VectorError;
use paper_vector_engine::kv::{FileKv, KeyValueStore, MemoryKv};
use paper_vector_engine::server::{DynStore, VectorServer};
use paper_vector_engine::store::RecordStore;
use paper_vector_engine::transport::NdjsonTransport;

fn main() {
	let args = CliArgs::parse();

	// Logging goes to stderr; stdout carries the protocol.
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
		)
		.init();

	if let Err(e) = run(args) {
		tracing::error!("Server error: {}", e);
		std::process::exit(1);
	}
}

fn run(args: CliArgs) -> Result<(), VectorError> {
	let kv: Box<dyn KeyValueStore> = match &args.storage_path {
		Some(path) => {
			let kv = FileKv::open(path)?;
			tracing::info!(path = %kv.path().display(), "Opened persistent store");
			Box::new(kv)
		}
		None => {
			tracing::info!("Using in-memory store");
			Box::new(MemoryKv::new())
		}
	};
	let store: DynStore = RecordStore::open(kv);

	let embedder: Option<Box<dyn Embedder>> = args.ollama_config().map(|config| {
		let embedder = OllamaEmbedder::new(config);
		tracing::info!(url = %embedder.url(), model = %embedder.model(), "Ollama embedder configured");
		Box::new(embedder) as Box<dyn Embedder>
	});
	if embedder.is_none() {
		tracing::info!("No embedder configured; text search and ingestion disabled");
	}

	let transport = NdjsonTransport::new();
	let mut server = VectorServer::new(transport, store, embedder, args.server_config());

	tracing::info!("paper-vector-engine ready");
	let served = server.run();
	let closed = server.into_store().close();
	served?;
	closed
}
