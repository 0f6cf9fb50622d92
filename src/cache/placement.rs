//! Placement Strategy Table
//!
//! Maps a content type to the tiers it may occupy, its TTL, its per-entry
//! byte budget and its eviction priority hint. Read-only once built.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::tier::TierId;

const MIB: u64 = 1024 * 1024;
const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;

/// Logical kind of cached content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    /// Merged suggestion lists
    LiveSuggestion,
    /// Raw per-provider responses
    ProviderResponse,
    /// Per-user learning state
    UserProfile,
    /// Large model artifacts
    ModelBlob,
    /// Bulk parallel text
    TranslationCorpus,
    /// Rarely touched long-lived data
    ArchivalData,
    /// Anything else
    #[serde(other)]
    Unknown,
}

impl ContentType {
    pub const KNOWN: [ContentType; 6] = [
        ContentType::LiveSuggestion,
        ContentType::ProviderResponse,
        ContentType::UserProfile,
        ContentType::ModelBlob,
        ContentType::TranslationCorpus,
        ContentType::ArchivalData,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::LiveSuggestion => "live-suggestion",
            ContentType::ProviderResponse => "provider-response",
            ContentType::UserProfile => "user-profile",
            ContentType::ModelBlob => "model-blob",
            ContentType::TranslationCorpus => "translation-corpus",
            ContentType::ArchivalData => "archival-data",
            ContentType::Unknown => "unknown",
        }
    }
}

impl FromStr for ContentType {
    type Err = std::convert::Infallible;

    /// Never fails: unrecognised names map to [`ContentType::Unknown`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::KNOWN
            .into_iter()
            .find(|ct| ct.as_str() == s)
            .unwrap_or(ContentType::Unknown))
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how long one content type is cached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementStrategy {
    /// Eligible tiers, fastest first
    pub tiers: Vec<TierId>,
    /// Time-to-live in seconds (0 = never expires)
    pub ttl_seconds: u64,
    /// Entries larger than this are not cached
    pub max_entry_bytes: u64,
    /// Higher = evicted later
    #[serde(default = "default_priority_hint")]
    pub priority_hint: f64,
}

fn default_priority_hint() -> f64 {
    1.0
}

impl PlacementStrategy {
    pub fn new(tiers: impl Into<Vec<TierId>>, ttl_seconds: u64, max_entry_bytes: u64, priority_hint: f64) -> Self {
        let mut tiers = tiers.into();
        tiers.sort();
        tiers.dedup();
        Self {
            tiers,
            ttl_seconds,
            max_entry_bytes,
            priority_hint,
        }
    }

    /// Conservative default for unknown content: fastest tier only, short TTL
    pub fn conservative() -> Self {
        Self::new([TierId::Memory], 60, MIB, 1.0)
    }
}

/// Content type → strategy lookup
#[derive(Debug, Clone)]
pub struct PlacementTable {
    strategies: HashMap<ContentType, PlacementStrategy>,
    fallback: PlacementStrategy,
}

impl Default for PlacementTable {
    fn default() -> Self {
        let strategies = HashMap::from([
            // Immediate
            (
                ContentType::LiveSuggestion,
                PlacementStrategy::new([TierId::Memory, TierId::Embedded], 300, 10 * MIB, 1.0),
            ),
            (
                ContentType::ProviderResponse,
                PlacementStrategy::new([TierId::Memory, TierId::Embedded], 300, MIB, 1.0),
            ),
            // Persistent
            (
                ContentType::UserProfile,
                PlacementStrategy::new([TierId::Embedded, TierId::Persistent], 30 * DAY, 50 * MIB, 2.0),
            ),
            // Performance
            (
                ContentType::ModelBlob,
                PlacementStrategy::new([TierId::Memory, TierId::Network], DAY, 100 * MIB, 1.5),
            ),
            // Capacity
            (
                ContentType::TranslationCorpus,
                PlacementStrategy::new([TierId::Network], 7 * DAY, 200 * MIB, 0.5),
            ),
            // Preservation
            (
                ContentType::ArchivalData,
                PlacementStrategy::new([TierId::Embedded, TierId::Network], 365 * DAY, 150 * MIB, 3.0),
            ),
        ]);

        Self {
            strategies,
            fallback: PlacementStrategy::conservative(),
        }
    }
}

impl PlacementTable {
    /// Replace the strategy for one content type
    pub fn with_override(mut self, content_type: ContentType, strategy: PlacementStrategy) -> Self {
        let strategy = PlacementStrategy::new(
            strategy.tiers,
            strategy.ttl_seconds,
            strategy.max_entry_bytes,
            strategy.priority_hint,
        );
        if content_type == ContentType::Unknown {
            self.fallback = strategy;
        } else {
            self.strategies.insert(content_type, strategy);
        }
        self
    }

    /// Strategy for a content type, falling back to the conservative default
    pub fn strategy_for(&self, content_type: ContentType) -> &PlacementStrategy {
        self.strategies.get(&content_type).unwrap_or(&self.fallback)
    }

    /// Every tier referenced by any strategy
    pub fn referenced_tiers(&self) -> Vec<TierId> {
        let mut tiers: Vec<TierId> = self
            .strategies
            .values()
            .chain(std::iter::once(&self.fallback))
            .flat_map(|s| s.tiers.iter().copied())
            .collect();
        tiers.sort();
        tiers.dedup();
        tiers
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_parsing() {
        assert_eq!("live-suggestion".parse::<ContentType>().unwrap(), ContentType::LiveSuggestion);
        assert_eq!("model-blob".parse::<ContentType>().unwrap(), ContentType::ModelBlob);
        assert_eq!("cat-pictures".parse::<ContentType>().unwrap(), ContentType::Unknown);
        assert_eq!(ContentType::UserProfile.to_string(), "user-profile");
    }

    #[test]
    fn test_content_type_serde_unknown() {
        let ct: ContentType = serde_json::from_str("\"whatever\"").unwrap();
        assert_eq!(ct, ContentType::Unknown);
    }

    #[test]
    fn test_default_strategies() {
        let table = PlacementTable::default();

        let live = table.strategy_for(ContentType::LiveSuggestion);
        assert_eq!(live.tiers, vec![TierId::Memory, TierId::Embedded]);
        assert_eq!(live.ttl_seconds, 300);

        let profile = table.strategy_for(ContentType::UserProfile);
        assert_eq!(profile.tiers, vec![TierId::Embedded, TierId::Persistent]);
        assert_eq!(profile.ttl_seconds, 30 * DAY);

        let corpus = table.strategy_for(ContentType::TranslationCorpus);
        assert_eq!(corpus.tiers, vec![TierId::Network]);
    }

    #[test]
    fn test_unknown_falls_back_to_conservative() {
        let table = PlacementTable::default();
        let strategy = table.strategy_for(ContentType::Unknown);
        assert_eq!(strategy.tiers, vec![TierId::Memory]);
        assert_eq!(strategy.ttl_seconds, 60);
    }

    #[test]
    fn test_override_sorts_tiers() {
        let table = PlacementTable::default().with_override(
            ContentType::LiveSuggestion,
            PlacementStrategy {
                tiers: vec![TierId::Persistent, TierId::Memory, TierId::Memory],
                ttl_seconds: 1,
                max_entry_bytes: 10,
                priority_hint: 0.0,
            },
        );
        let strategy = table.strategy_for(ContentType::LiveSuggestion);
        assert_eq!(strategy.tiers, vec![TierId::Memory, TierId::Persistent]);
        assert_eq!(strategy.ttl_seconds, 1);
    }

    #[test]
    fn test_referenced_tiers() {
        assert_eq!(PlacementTable::default().referenced_tiers(), TierId::ALL.to_vec());
    }
}
