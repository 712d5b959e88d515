//! In-process index implementing both channels
//!
//! Term-frequency lexical scoring and brute-force cosine search. Meant for
//! tests, demos and small corpora; production deployments plug a real BM25
//! engine and vector store in behind the same traits.

use super::{namespace_matches, Candidate, DocumentRef, LexicalIndex, VectorIndex};
use async_trait::async_trait;
use kas_common::embeddings::cosine_similarity;
use kas_common::errors::Result;
use uuid::Uuid;

struct IndexedDocument {
    content_id: Uuid,
    doc: DocumentRef,
    terms: Vec<String>,
    embedding: Vec<f32>,
}

#[derive(Default)]
pub struct MemoryIndex {
    documents: Vec<IndexedDocument>,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index one chunk; lexical terms come from the title and chunk text
    pub fn insert(&mut self, content_id: Uuid, doc: DocumentRef, embedding: Vec<f32>) {
        let mut terms = tokenize(&doc.title);
        if let Some(text) = &doc.chunk_text {
            terms.extend(tokenize(text));
        }
        self.documents.push(IndexedDocument {
            content_id,
            doc,
            terms,
            embedding,
        });
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn visible<'a>(&'a self, namespace: Option<&'a str>) -> impl Iterator<Item = &'a IndexedDocument> + 'a {
        self.documents
            .iter()
            .filter(move |d| namespace_matches(namespace, d.doc.namespace.as_deref()))
    }
}

/// Stable sort by score descending, keep `limit`, assign ranks
fn top(mut scored: Vec<(&IndexedDocument, f64)>, limit: usize) -> Vec<Candidate> {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    Candidate::ranked(
        scored
            .into_iter()
            .take(limit)
            .map(|(d, score)| (d.content_id, Some(score), d.doc.clone())),
    )
}

#[async_trait]
impl LexicalIndex for MemoryIndex {
    async fn search(&self, query: &str, limit: usize, namespace: Option<&str>) -> Result<Vec<Candidate>> {
        let query_terms = tokenize(query);
        let scored = self
            .visible(namespace)
            .filter_map(|d| {
                let hits = d
                    .terms
                    .iter()
                    .filter(|t| query_terms.contains(t))
                    .count();
                (hits > 0).then_some((d, hits as f64))
            })
            .collect();
        Ok(top(scored, limit))
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn search(&self, embedding: &[f32], limit: usize, namespace: Option<&str>) -> Result<Vec<Candidate>> {
        let scored = self
            .visible(namespace)
            .map(|d| (d, cosine_similarity(embedding, &d.embedding)))
            .collect();
        Ok(top(scored, limit))
    }
}
