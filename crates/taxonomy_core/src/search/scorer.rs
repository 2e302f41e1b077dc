//! Relevance scoring seam.

use crate::search::engine::SearchRecord;

/// Assigns a relevance score to a matched record. Higher is better.
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, text: Option<&str>, record: &SearchRecord) -> f64;
}

/// Gives every hit the same score, so relevance order falls back to
/// recency.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeutralScorer;

impl RelevanceScorer for NeutralScorer {
    fn score(&self, _text: Option<&str>, _record: &SearchRecord) -> f64 {
        0.0
    }
}
