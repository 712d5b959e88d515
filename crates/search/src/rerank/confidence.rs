//! Answer confidence from the top rerank scores
//!
//! `score = 0.6 * top1 + 0.4 * mean(top N)`, clamped to `[0, 1]`.

use super::RankedResult;
use kas_common::config::ConfidenceConfig;
use serde::{Deserialize, Serialize};

const TOP_WEIGHT: f64 = 0.6;
const MEAN_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    pub level: ConfidenceLevel,
    pub score: f64,
}

impl Confidence {
    pub const NONE: Confidence = Confidence {
        level: ConfidenceLevel::Low,
        score: 0.0,
    };
}

#[derive(Debug, Clone)]
pub struct ConfidenceCalculator {
    low: f64,
    high: f64,
    top_n: usize,
}

impl Default for ConfidenceCalculator {
    fn default() -> Self {
        Self {
            low: 0.3,
            high: 0.7,
            top_n: 3,
        }
    }
}

impl ConfidenceCalculator {
    pub fn new(low: f64, high: f64, top_n: usize) -> Self {
        Self { low, high, top_n }
    }

    pub fn from_config(config: &ConfidenceConfig) -> Self {
        Self::new(config.low, config.high, config.top_n)
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    pub fn level(&self, score: f64) -> ConfidenceLevel {
        if score < self.low {
            ConfidenceLevel::Low
        } else if score < self.high {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::High
        }
    }

    /// Confidence over reranked results, which must already be in rerank order
    pub fn calculate(&self, results: &[RankedResult]) -> Confidence {
        let scores: Vec<f64> = results.iter().map(|r| r.rerank_score).collect();
        self.evaluate(&scores)
    }

    /// Empty or non-finite input yields [`Confidence::NONE`]
    pub fn evaluate(&self, scores: &[f64]) -> Confidence {
        let top = &scores[..scores.len().min(self.top_n)];
        let Some(&first) = top.first() else {
            return Confidence::NONE;
        };
        if top.iter().any(|s| !s.is_finite()) {
            return Confidence::NONE;
        }

        let mean = top.iter().sum::<f64>() / top.len() as f64;
        let score = (TOP_WEIGHT * first + MEAN_WEIGHT * mean).clamp(0.0, 1.0);

        Confidence {
            level: self.level(score),
            score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_low_zero() {
        assert_eq!(ConfidenceCalculator::default().evaluate(&[]), Confidence::NONE);
        assert_eq!(ConfidenceCalculator::default().calculate(&[]), Confidence::NONE);
    }

    #[test]
    fn test_high_confidence_example() {
        let confidence = ConfidenceCalculator::default().evaluate(&[0.9, 0.85, 0.8]);
        let expected = 0.6 * 0.9 + 0.4 * ((0.9 + 0.85 + 0.8) / 3.0);

        assert_eq!(confidence.level, ConfidenceLevel::High);
        assert!((confidence.score - expected).abs() < 1e-12);
        assert!((confidence.score - 0.88).abs() < 1e-9);
    }

    #[test]
    fn test_only_top_n_count() {
        let calc = ConfidenceCalculator::default();
        let with_tail = calc.evaluate(&[0.5, 0.5, 0.5, 0.0, 0.0]);
        assert!((with_tail.score - 0.5).abs() < 1e-12);
        assert_eq!(with_tail.level, ConfidenceLevel::Medium);
    }

    #[test]
    fn test_level_boundaries() {
        let calc = ConfidenceCalculator::default();
        assert_eq!(calc.level(0.29), ConfidenceLevel::Low);
        assert_eq!(calc.level(0.3), ConfidenceLevel::Medium);
        assert_eq!(calc.level(0.69), ConfidenceLevel::Medium);
        assert_eq!(calc.level(0.7), ConfidenceLevel::High);
    }

    #[test]
    fn test_single_result() {
        let confidence = ConfidenceCalculator::default().evaluate(&[0.2]);
        assert!((confidence.score - 0.2).abs() < 1e-12);
        assert_eq!(confidence.level, ConfidenceLevel::Low);
    }

    #[test]
    fn test_out_of_range_scores() {
        let calc = ConfidenceCalculator::default();
        assert_eq!(calc.evaluate(&[f64::NAN, 0.9]), Confidence::NONE);
        assert_eq!(calc.evaluate(&[3.0, 2.0]).score, 1.0);
        assert_eq!(calc.evaluate(&[-0.4]).score, 0.0);
    }

    #[test]
    fn test_custom_thresholds() {
        let calc = ConfidenceCalculator::new(0.1, 0.2, 1);
        assert_eq!(calc.evaluate(&[0.15, 0.9]).level, ConfidenceLevel::Medium);
    }
}
