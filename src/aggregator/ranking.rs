//! Weighting, precedence and deduplication of provider results
//!
//! Merging is a pure function of the provider groups and the ranking config:
//!
//! 1. reorder groups so providers listed for the target language come first
//! 2. flatten and multiply each score by the provider's weight
//! 3. drop duplicates by normalized text, keeping the first seen
//! 4. stable sort by score, descending, and truncate

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::normalize::normalize_text;
use crate::config::ConfigSource;
use crate::provider::{Suggestion, DEFAULT_PROVIDER_WEIGHT};

/// Language key used when the target language has no priority list
pub const DEFAULT_PRIORITY_KEY: &str = "default";

/// Provider weights and per-language precedence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    pub weights: HashMap<String, f64>,
    pub language_priority: HashMap<String, Vec<String>>,
}

impl RankingConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        Self {
            weights: source
                .provider_configs()
                .into_iter()
                .map(|p| (p.provider_id, p.weight))
                .collect(),
            language_priority: source.language_priority(),
        }
    }

    pub fn with_weight(mut self, provider_id: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(provider_id.into(), weight);
        self
    }

    pub fn with_priority(mut self, language: impl Into<String>, providers: &[&str]) -> Self {
        self.language_priority
            .insert(language.into(), providers.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Weight for a provider, 0.5 when unconfigured
    pub fn weight_for(&self, provider_id: &str) -> f64 {
        self.weights
            .get(provider_id)
            .copied()
            .unwrap_or(DEFAULT_PROVIDER_WEIGHT)
    }

    /// Provider precedence for a target language
    pub fn priority_for(&self, language: &str) -> &[String] {
        self.language_priority
            .get(language)
            .or_else(|| self.language_priority.get(DEFAULT_PRIORITY_KEY))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Results of one provider, in the order the provider returned them
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderGroup {
    pub provider_id: String,
    pub suggestions: Vec<Suggestion>,
}

impl ProviderGroup {
    pub fn new(provider_id: impl Into<String>, suggestions: Vec<Suggestion>) -> Self {
        Self {
            provider_id: provider_id.into(),
            suggestions,
        }
    }
}

/// Stable reorder: listed providers first in list order, the rest after
pub fn reorder(mut groups: Vec<ProviderGroup>, priority: &[String]) -> Vec<ProviderGroup> {
    groups.sort_by_key(|g| {
        priority
            .iter()
            .position(|p| *p == g.provider_id)
            .unwrap_or(priority.len())
    });
    groups
}

/// Merge provider groups into one ranked list
pub fn merge(groups: Vec<ProviderGroup>, target_lang: &str, max_results: usize, config: &RankingConfig) -> Vec<Suggestion> {
    if max_results == 0 {
        return Vec::new();
    }

    let ordered = reorder(groups, config.priority_for(target_lang));

    let mut seen = HashSet::new();
    let mut merged: Vec<Suggestion> = Vec::new();

    for group in ordered {
        let weight = config.weight_for(&group.provider_id);
        for mut suggestion in group.suggestions {
            let dedup_key = normalize_text(&suggestion.text);
            if dedup_key.is_empty() || !seen.insert(dedup_key) {
                continue;
            }
            suggestion.relevance_score = weighted(suggestion.relevance_score, weight);
            merged.push(suggestion);
        }
    }

    merged.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(Ordering::Equal)
    });
    merged.truncate(max_results);
    merged
}

fn weighted(score: f64, weight: f64) -> f64 {
    let value = score * weight;
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
