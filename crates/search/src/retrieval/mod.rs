//! Hybrid retrieval
//!
//! Two ranked candidate channels feed one ranking:
//! - Lexical search (BM25 or any keyword index)
//! - Vector search (semantic similarity over embeddings)
//!
//! Both indexes are collaborators behind [`LexicalIndex`] and [`VectorIndex`];
//! this module owns the fusion and the degradation policy around them.

mod fusion;
mod hybrid;
mod memory;

pub use fusion::RRFusion;
pub use hybrid::HybridRetriever;
pub use memory::MemoryIndex;

use kas_common::errors::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display metadata of one retrievable content item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub title: String,
    pub content_type: String,
    pub namespace: Option<String>,
    /// Best matching chunk, when the channel is chunk-level
    pub chunk_text: Option<String>,
    pub source_ref: Option<String>,
}

/// One entry of a channel's ranked list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub content_id: Uuid,

    /// 1-based, local to the channel
    pub rank: usize,

    /// Raw channel score (BM25 score or cosine similarity)
    pub score: Option<f64>,

    pub doc: DocumentRef,
}

impl Candidate {
    /// Assign 1-based ranks from list position
    pub fn ranked(candidates: impl IntoIterator<Item = (Uuid, Option<f64>, DocumentRef)>) -> Vec<Self> {
        candidates
            .into_iter()
            .enumerate()
            .map(|(i, (content_id, score, doc))| Candidate {
                content_id,
                rank: i + 1,
                score,
                doc,
            })
            .collect()
    }
}

/// Fused result, ordered by `fused_score`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub content_id: Uuid,
    pub fused_score: f64,

    #[serde(flatten)]
    pub doc: DocumentRef,

    // Source tracking
    pub bm25_rank: Option<usize>,
    pub vector_rank: Option<usize>,
    pub bm25_score: Option<f64>,
    pub vector_similarity: Option<f64>,
}

impl FusedResult {
    /// Lower of the two channel ranks
    pub fn best_rank(&self) -> usize {
        match (self.bm25_rank, self.vector_rank) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => usize::MAX,
        }
    }

    /// Text handed to rerankers and answer generation
    pub fn passage(&self) -> &str {
        self.doc.chunk_text.as_deref().unwrap_or(&self.doc.title)
    }
}

/// Which channels contributed to a response
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SearchMode {
    #[serde(rename = "hybrid")]
    Hybrid,
    #[serde(rename = "bm25_only")]
    LexicalOnly,
    #[serde(rename = "vector_only")]
    VectorOnly,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Hybrid => "hybrid",
            SearchMode::LexicalOnly => "bm25_only",
            SearchMode::VectorOnly => "vector_only",
        }
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Search request parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query text
    pub query: String,

    /// Maximum results to return (configured default when unset)
    pub limit: Option<usize>,

    /// Exact namespace, or a prefix ending in `*`
    pub namespace: Option<String>,

    /// Minimum fused score
    pub min_score: Option<f64>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = Some(min_score);
        self
    }
}

/// Search response with degradation status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridSearchResponse {
    pub results: Vec<FusedResult>,

    /// Semantic search was unavailable
    pub degraded: bool,

    pub mode: SearchMode,
    pub warnings: Vec<String>,
}

impl HybridSearchResponse {
    pub fn empty(mode: SearchMode) -> Self {
        Self {
            results: Vec::new(),
            degraded: false,
            mode,
            warnings: Vec::new(),
        }
    }
}

/// Keyword index collaborator
#[async_trait::async_trait]
pub trait LexicalIndex: Send + Sync {
    async fn search(&self, query: &str, limit: usize, namespace: Option<&str>) -> Result<Vec<Candidate>>;
}

/// Vector index collaborator
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, embedding: &[f32], limit: usize, namespace: Option<&str>) -> Result<Vec<Candidate>>;
}

/// Common trait for all retrievers
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, request: &SearchRequest) -> Result<HybridSearchResponse>;
}

/// Namespace filter: exact match, or prefix match when the filter ends in `*`
pub fn namespace_matches(filter: Option<&str>, namespace: Option<&str>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    let Some(namespace) = namespace else {
        return false;
    };
    match filter.strip_suffix('*') {
        Some(prefix) => namespace.starts_with(prefix),
        None => namespace == filter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranks_follow_position() {
        let ranked = Candidate::ranked([
            (Uuid::from_u128(7), Some(3.2), DocumentRef::default()),
            (Uuid::from_u128(3), Some(2.9), DocumentRef::default()),
        ]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 2);
        assert_eq!(ranked[1].content_id, Uuid::from_u128(3));
    }

    #[test]
    fn test_namespace_filter() {
        assert!(namespace_matches(None, None));
        assert!(namespace_matches(Some("work"), Some("work")));
        assert!(!namespace_matches(Some("work"), Some("work/rust")));
        assert!(namespace_matches(Some("work*"), Some("work/rust")));
        assert!(!namespace_matches(Some("work*"), None));
    }

    #[test]
    fn test_mode_wire_names() {
        assert_eq!(serde_json::to_value(SearchMode::LexicalOnly).unwrap(), "bm25_only");
        assert_eq!(SearchMode::Hybrid.to_string(), "hybrid");
    }

    #[test]
    fn test_passage_falls_back_to_title() {
        let mut result = FusedResult {
            content_id: Uuid::nil(),
            fused_score: 0.0,
            doc: DocumentRef {
                title: "Tokio internals".to_string(),
                ..Default::default()
            },
            bm25_rank: Some(4),
            vector_rank: Some(2),
            bm25_score: None,
            vector_similarity: None,
        };
        assert_eq!(result.passage(), "Tokio internals");
        assert_eq!(result.best_rank(), 2);

        result.doc.chunk_text = Some("The scheduler steals work".to_string());
        assert_eq!(result.passage(), "The scheduler steals work");
    }
}
