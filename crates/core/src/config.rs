//! Tunable constants for indexing, graph analytics and context assembly.
//!
//! Every threshold the retrieval pipeline uses lives here with its default,
//! so callers can override them instead of patching code.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexOptions {
    /// Scores at or below this are dropped from `search` output.
    pub min_score: f64,
    /// Minimum cosine similarity for an implicit link.
    pub implicit_threshold: f64,
    /// Implicit links kept per document.
    pub implicit_top_n: usize,
    /// Only the first N documents (load order) take part in pairwise mining.
    pub implicit_max_docs: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            min_score: 0.005,
            implicit_threshold: 0.25,
            implicit_top_n: 6,
            implicit_max_docs: 250,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphOptions {
    pub pagerank_iterations: usize,
    pub damping: f64,
    pub topic_keywords: usize,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            pagerank_iterations: 25,
            damping: 0.85,
            topic_keywords: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextOptions {
    /// Character budget of the formatted context string.
    pub budget_chars: usize,
    pub top_n: usize,
    pub max_neighbors_per_result: usize,
    pub neighbor_preview_chars: usize,
    /// Passage budgets by hop distance: seed, hop 1, hop 2, hop 3 and beyond.
    pub hop_budgets: [usize; 4],
    /// Hubs used as traversal seeds when too few confident results exist.
    pub hub_seeds: usize,
    /// A result at or above this score counts as a confident seed.
    pub seed_min_score: f64,
    pub max_hops: usize,
    pub max_docs: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            budget_chars: 3_000,
            top_n: 5,
            max_neighbors_per_result: 2,
            neighbor_preview_chars: 300,
            hop_budgets: [1_200, 600, 280, 120],
            hub_seeds: 5,
            seed_min_score: 0.3,
            max_hops: 2,
            max_docs: 20,
        }
    }
}

impl ContextOptions {
    pub fn hop_budget(&self, hops: usize) -> usize {
        self.hop_budgets[hops.min(self.hop_budgets.len() - 1)]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct EngineOptions {
    pub index: IndexOptions,
    pub graph: GraphOptions,
    pub context: ContextOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_budget_saturates_at_last_bucket() {
        let options = ContextOptions::default();
        assert_eq!(options.hop_budget(0), 1_200);
        assert_eq!(options.hop_budget(1), 600);
        assert_eq!(options.hop_budget(2), 280);
        assert_eq!(options.hop_budget(3), 120);
        assert_eq!(options.hop_budget(9), 120);
    }

    #[test]
    fn partial_options_fall_back_to_defaults() {
        let options: EngineOptions =
            serde_json::from_str(r#"{"index":{"implicit_threshold":0.4}}"#).expect("valid options");
        assert_eq!(options.index.implicit_threshold, 0.4);
        assert_eq!(options.index.implicit_max_docs, 250);
        assert_eq!(options.context.budget_chars, 3_000);
    }
}
