//! KAS Ingestion Library
//!
//! Content chunking and the chunk-then-embed ingestion processor.

pub mod chunker;
pub mod errors;
pub mod processor;

pub use chunker::{chunk, merge_small_chunks, Chunk, Chunker, ChunkingConfig, ChunkingStrategy};
pub use errors::IngestionError;
pub use processor::{EmbeddedChunk, IngestionProcessor, IngestionReport};
