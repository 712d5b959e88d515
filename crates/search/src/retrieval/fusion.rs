//! Reciprocal Rank Fusion (RRF) for combining search results
//!
//! `fused_score = Σ weight / (k + rank)` over the channels an item appears in.
//! Only ranks matter, so BM25 scores and cosine similarities never need a
//! common scale.

use super::{Candidate, FusedResult};
use kas_common::config::SearchConfig;
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

/// RRF fusion parameters
#[derive(Debug, Clone)]
pub struct RRFusion {
    /// Constant k (typically 60)
    pub k: f64,

    /// Weight for BM25 results
    pub bm25_weight: f64,

    /// Weight for vector results
    pub vector_weight: f64,
}

impl Default for RRFusion {
    fn default() -> Self {
        Self {
            k: 60.0,
            bm25_weight: 1.0,
            vector_weight: 1.0,
        }
    }
}

#[derive(Clone, Copy)]
enum Channel {
    Lexical,
    Vector,
}

impl RRFusion {
    pub fn new(k: f64) -> Self {
        Self {
            k,
            ..Default::default()
        }
    }

    /// Create with custom weights
    pub fn with_weights(mut self, bm25_weight: f64, vector_weight: f64) -> Self {
        self.bm25_weight = bm25_weight;
        self.vector_weight = vector_weight;
        self
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(config.rrf_k).with_weights(config.bm25_weight, config.vector_weight)
    }

    /// Ranks are 1-based; a rank of 0 counts as 1 so the term stays finite
    fn contribution(&self, weight: f64, rank: usize) -> f64 {
        weight / (self.k + rank.max(1) as f64)
    }

    /// Fuse lexical and vector candidate lists.
    ///
    /// A content id listed twice in one channel keeps its best rank. Items with
    /// equal scores are ordered by their best channel rank, then by content id.
    pub fn fuse(&self, lexical: &[Candidate], vector: &[Candidate]) -> Vec<FusedResult> {
        let mut positions: HashMap<Uuid, usize> = HashMap::new();
        let mut fused: Vec<FusedResult> = Vec::with_capacity(lexical.len() + vector.len());

        for candidate in lexical {
            Self::absorb(&mut positions, &mut fused, candidate, Channel::Lexical);
        }
        for candidate in vector {
            Self::absorb(&mut positions, &mut fused, candidate, Channel::Vector);
        }

        for result in &mut fused {
            let lexical = result
                .bm25_rank
                .map(|rank| self.contribution(self.bm25_weight, rank))
                .unwrap_or(0.0);
            let vector = result
                .vector_rank
                .map(|rank| self.contribution(self.vector_weight, rank))
                .unwrap_or(0.0);
            result.fused_score = lexical + vector;
        }

        fused.sort_by(compare_fused);
        fused
    }

    fn absorb(
        positions: &mut HashMap<Uuid, usize>,
        fused: &mut Vec<FusedResult>,
        candidate: &Candidate,
        channel: Channel,
    ) {
        let position = *positions.entry(candidate.content_id).or_insert_with(|| {
            fused.push(FusedResult {
                content_id: candidate.content_id,
                fused_score: 0.0,
                doc: candidate.doc.clone(),
                bm25_rank: None,
                vector_rank: None,
                bm25_score: None,
                vector_similarity: None,
            });
            fused.len() - 1
        });
        let entry = &mut fused[position];

        let (rank, score) = match channel {
            Channel::Lexical => (&mut entry.bm25_rank, &mut entry.bm25_score),
            Channel::Vector => (&mut entry.vector_rank, &mut entry.vector_similarity),
        };
        let rank_improved = rank.map_or(true, |existing| candidate.rank < existing);
        if rank_improved {
            *rank = Some(candidate.rank);
            *score = candidate.score;
        }

        // Vector hits are chunk-level; prefer their excerpt and its location
        if let Channel::Vector = channel {
            if candidate.doc.chunk_text.is_some() && rank_improved {
                entry.doc.chunk_text = candidate.doc.chunk_text.clone();
                if candidate.doc.source_ref.is_some() {
                    entry.doc.source_ref = candidate.doc.source_ref.clone();
                }
            }
        }
        if entry.doc.chunk_text.is_none() {
            entry.doc.chunk_text = candidate.doc.chunk_text.clone();
        }
        if entry.doc.namespace.is_none() {
            entry.doc.namespace = candidate.doc.namespace.clone();
        }
        if entry.doc.source_ref.is_none() {
            entry.doc.source_ref = candidate.doc.source_ref.clone();
        }
    }
}

/// Score descending, then best channel rank, then content id
pub(crate) fn compare_fused(a: &FusedResult, b: &FusedResult) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| a.best_rank().cmp(&b.best_rank()))
        .then_with(|| a.content_id.cmp(&b.content_id))
}
