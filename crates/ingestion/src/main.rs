//! KAS ingest CLI
//!
//! `ingest <path> [content_type]`
//!
//! 1. Loads configuration and initializes telemetry
//! 2. Chunks the file with the strategy for its content type
//! 3. Embeds every chunk through the cached batch embedder
//! 4. Prints one JSON line per chunk

use anyhow::Context;
use kas_common::{
    cache::Cache,
    config::AppConfig,
    embeddings::{create_embedder, BatchEmbedder, CircuitBreaker},
    metrics::{register_metrics, EMBEDDING_BUCKETS, LATENCY_BUCKETS},
    telemetry, VERSION,
};
use kas_ingestion::{Chunker, IngestionProcessor};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const USAGE: &str = "usage: ingest <path> [content_type]";

fn infer_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => "pdf",
        Some(ext) if ext.eq_ignore_ascii_case("md") => "note",
        _ => "file",
    }
}

fn install_metrics_exporter(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Full("kas_embedding_duration_seconds".to_string()), EMBEDDING_BUCKETS)?
        .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), LATENCY_BUCKETS)?
        .install()
        .context("failed to install Prometheus exporter")?;
    register_metrics();
    info!(%addr, "Metrics exporter listening");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let path = args.next().context(USAGE)?;
    let path = Path::new(&path);
    let content_type = args
        .next()
        .unwrap_or_else(|| infer_content_type(path).to_string());

    // Load configuration
    let config = AppConfig::load().context("failed to load configuration")?;

    // Initialize tracing
    telemetry::init(&config.observability)?;
    info!("Starting KAS ingest v{}", VERSION);

    if config.observability.metrics_port != 0 {
        install_metrics_exporter(config.observability.metrics_port)?;
    }

    let cache = Arc::new(Cache::connect(&config.cache).await);
    let provider = create_embedder(&config.embedding)?;
    let circuit = Arc::new(CircuitBreaker::new("embedding", &config.circuit_breaker));
    let embedder = Arc::new(BatchEmbedder::new(provider, cache, &config.embedding).with_circuit_breaker(circuit));
    let processor = IngestionProcessor::new(Chunker::new(config.chunking.clone()), embedder);

    let report = processor
        .process_file(path, &content_type)
        .await
        .with_context(|| format!("failed to ingest {}", path.display()))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for embedded in &report.chunks {
        let chunk = &embedded.chunk;
        let line = serde_json::json!({
            "index": chunk.index,
            "source_ref": chunk.source_ref,
            "start": chunk.start,
            "end": chunk.end,
            "chars": chunk.char_count(),
            "dimension": embedded.embedding.len(),
        });
        writeln!(out, "{}", line)?;
    }

    info!(
        strategy = %report.strategy,
        chunks = report.chunks.len(),
        model = %report.embedding_model,
        "Ingestion complete"
    );
    Ok(())
}
