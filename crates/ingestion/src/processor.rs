//! Ingestion processor
//!
//! Reads a document, chunks it with the strategy for its content type and
//! embeds every chunk through the batch embedder.

use crate::chunker::{Chunk, Chunker, ChunkingStrategy};
use crate::errors::IngestionError;
use kas_common::embeddings::BatchEmbedder;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

/// A chunk together with its vector
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Output of one document ingestion
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub content_type: String,
    pub strategy: ChunkingStrategy,
    pub chunks: Vec<EmbeddedChunk>,
    pub embedding_model: String,
}

/// Ingestion processor
pub struct IngestionProcessor {
    chunker: Chunker,
    embedder: Arc<BatchEmbedder>,
}

impl IngestionProcessor {
    pub fn new(chunker: Chunker, embedder: Arc<BatchEmbedder>) -> Self {
        Self { chunker, embedder }
    }

    /// Read and ingest a local file
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn process_file(&self, path: &Path, content_type: &str) -> Result<IngestionReport, IngestionError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IngestionError::FileNotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Err(IngestionError::EmptyContent(path.display().to_string()));
        }

        self.process_text(&content, content_type).await
    }

    /// Chunk and embed already-loaded content
    #[instrument(skip(self, content), fields(len = content.len()))]
    pub async fn process_text(&self, content: &str, content_type: &str) -> Result<IngestionReport, IngestionError> {
        let (strategy, chunks) = self.chunker.chunk_content(content, content_type);
        info!(strategy = %strategy, chunk_count = chunks.len(), "Content chunked");

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_all(&texts).await?;

        let chunks: Vec<EmbeddedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
            .collect();

        info!(chunk_count = chunks.len(), "Chunks embedded");

        Ok(IngestionReport {
            content_type: content_type.to_string(),
            strategy,
            chunks,
            embedding_model: self.embedder.model_name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kas_common::cache::Cache;
    use kas_common::config::{CacheConfig, EmbeddingConfig};
    use kas_common::embeddings::MockEmbedder;

    fn processor() -> IngestionProcessor {
        let embedder = BatchEmbedder::new(
            Arc::new(MockEmbedder::new(8)),
            Arc::new(Cache::disabled(&CacheConfig::default())),
            &EmbeddingConfig::default(),
        );
        IngestionProcessor::new(Chunker::default(), Arc::new(embedder))
    }

    #[tokio::test]
    async fn test_transcript_is_chunked_and_embedded() {
        let transcript = format!(
            "[0:00] {}\n[3:00] {}",
            "Welcome to the session on vector search. ".repeat(4),
            "Now we compare lexical and semantic ranking. ".repeat(4)
        );

        let report = processor().process_text(&transcript, "youtube").await.unwrap();

        assert_eq!(report.strategy, ChunkingStrategy::Timestamp);
        assert_eq!(report.chunks.len(), 2);
        assert_eq!(report.embedding_model, "mock-embedding");
        for (i, embedded) in report.chunks.iter().enumerate() {
            assert_eq!(embedded.chunk.index, i);
            assert_eq!(embedded.embedding.len(), 8);
        }
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = processor()
            .process_file(Path::new("/definitely/not/here.txt"), "file")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_report_serializes_flat_chunks() {
        let report = processor().process_text("A short note about Rust.", "note").await.unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["strategy"], "paragraph");
        assert_eq!(json["chunks"][0]["text"], "A short note about Rust.");
        assert!(json["chunks"][0]["embedding"].is_array());
    }
}
