//! Process-wide search state
//!
//! Built once at startup and passed by reference; the pipeline has no global
//! singletons.

use crate::multihop::{MultiHopSearcher, QueryDecomposer};
use crate::qa::{AskOptions, QaPipeline};
use crate::rerank::{ConfidenceCalculator, EmbeddingScorer, RelevanceScorer, Reranker};
use crate::retrieval::{HybridRetriever, LexicalIndex, Retriever, VectorIndex};
use crate::router::Router;
use kas_common::cache::Cache;
use kas_common::config::AppConfig;
use kas_common::embeddings::{create_embedder, BatchEmbedder, CircuitBreaker, Embedder};
use kas_common::errors::Result;
use kas_common::llm::{ChatCompletionsClient, LlmClient};
use std::sync::Arc;
use tracing::info;

/// External collaborators the context is assembled from
pub struct Collaborators {
    pub lexical: Arc<dyn LexicalIndex>,
    pub vector: Arc<dyn VectorIndex>,
    pub embedding_provider: Arc<dyn Embedder>,
    pub llm: Arc<dyn LlmClient>,

    /// Defaults to cosine similarity over the embedding provider
    pub scorer: Option<Arc<dyn RelevanceScorer>>,
}

pub struct SearchContext {
    pub config: Arc<AppConfig>,
    pub cache: Arc<Cache>,
    pub embedder: Arc<BatchEmbedder>,
    pub retriever: Arc<HybridRetriever>,
    pub reranker: Arc<Reranker>,
    pub multihop: Arc<MultiHopSearcher>,
    pub router: Router,
    pub qa: QaPipeline,
}

impl SearchContext {
    /// Validate `config`, connect the cache and build HTTP providers from config
    pub async fn connect(
        config: AppConfig,
        lexical: Arc<dyn LexicalIndex>,
        vector: Arc<dyn VectorIndex>,
    ) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(Cache::connect(&config.cache).await);
        let collaborators = Collaborators {
            lexical,
            vector,
            embedding_provider: create_embedder(&config.embedding)?,
            llm: Arc::new(ChatCompletionsClient::new(&config.llm)?),
            scorer: None,
        };

        Ok(Self::build(config, cache, collaborators))
    }

    /// Wire every component from already-constructed collaborators
    pub fn build(config: AppConfig, cache: Arc<Cache>, collaborators: Collaborators) -> Self {
        let config = Arc::new(config);

        let circuit = Arc::new(CircuitBreaker::new("embedding", &config.circuit_breaker));
        let embedder = Arc::new(
            BatchEmbedder::new(collaborators.embedding_provider, cache.clone(), &config.embedding)
                .with_circuit_breaker(circuit),
        );

        let retriever = Arc::new(HybridRetriever::new(
            collaborators.lexical,
            collaborators.vector,
            embedder.clone(),
            cache.clone(),
            &config.search,
        ));
        let as_retriever: Arc<dyn Retriever> = retriever.clone();

        let scorer = collaborators
            .scorer
            .unwrap_or_else(|| Arc::new(EmbeddingScorer::new(embedder.clone())) as Arc<dyn RelevanceScorer>);
        let reranker = Arc::new(Reranker::new(scorer, cache.clone(), &config.rerank));

        let decomposer = QueryDecomposer::new(collaborators.llm.clone(), &config.multihop);
        let multihop = Arc::new(MultiHopSearcher::new(
            decomposer,
            as_retriever.clone(),
            &config.multihop,
        ));

        let router = Router::new(as_retriever.clone(), multihop.clone(), reranker.clone());
        let qa = QaPipeline::new(
            as_retriever,
            reranker.clone(),
            ConfidenceCalculator::from_config(&config.confidence),
            collaborators.llm,
            &config.qa,
            config.confidence.max_citations,
        );

        info!(
            embedding_model = %embedder.model_name(),
            cache_connected = cache.is_connected(),
            "Search context ready"
        );

        Self {
            config,
            cache,
            embedder,
            retriever,
            reranker,
            multihop,
            router,
            qa,
        }
    }

    /// Q&A options from configuration
    pub fn ask_options(&self) -> AskOptions {
        AskOptions::from_config(&self.config.qa, &self.config.rerank)
    }
}
