//! KAS Common Library
//!
//! Shared code for the KAS ingestion and search crates including:
//! - Error types and handling
//! - Configuration management
//! - Tracing and metrics
//! - Category-scoped caching with pluggable stores
//! - Embedding providers and the batch embedder
//! - LLM client abstraction

pub mod cache;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod telemetry;

// Re-export commonly used types
pub use cache::{Cache, CacheCategory, Cached, Operation};
pub use config::AppConfig;
pub use embeddings::{BatchEmbedder, Embedder};
pub use errors::{AppError, Result};
pub use llm::{GenerationOptions, LlmClient};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
