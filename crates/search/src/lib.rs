//! KAS Search Library
//!
//! Query-time half of the retrieval pipeline:
//! - Hybrid lexical + vector retrieval fused with RRF
//! - Synonym expansion of the lexical query
//! - Reranking, confidence and citations
//! - Multi-hop decomposition of compound questions
//! - Query routing and the Q&A pipeline built on top

pub mod context;
pub mod expansion;
pub mod multihop;
pub mod qa;
pub mod rerank;
pub mod retrieval;
pub mod router;

pub use context::{Collaborators, SearchContext};
pub use expansion::{expand_query, ExpandedQuery, QueryExpander};
pub use multihop::{MultiHopResult, MultiHopSearcher, QueryDecomposer};
pub use qa::{AskOptions, QaPipeline, QaResult};
pub use rerank::{
    build_citations, Citation, Confidence, ConfidenceCalculator, ConfidenceLevel, EmbeddingScorer, RankedResult,
    RelevanceScorer, Reranker,
};
pub use retrieval::{
    Candidate, DocumentRef, FusedResult, HybridRetriever, HybridSearchResponse, LexicalIndex, MemoryIndex, RRFusion,
    Retriever, SearchMode, SearchRequest, VectorIndex,
};
pub use router::{QueryType, RoutedSearch, Router, RoutingParams};
