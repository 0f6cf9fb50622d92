//! External Lookup Providers
//!
//! A provider is any asynchronous source of ranked text candidates for a
//! query (translation memories, dictionaries, corpora, MT services). Each one
//! is wrapped in a [`ProviderGateway`] that bounds its latency, memoizes its
//! responses and contains its failures.

pub mod gateway;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use gateway::ProviderGateway;
pub use http::HttpProvider;

/// Default weight for providers without an explicit one
pub const DEFAULT_PROVIDER_WEIGHT: f64 = 0.5;

/// Default per-provider timeout in milliseconds
pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 3500;

fn default_confidence() -> f64 {
    0.5
}

/// Candidate as returned by a provider, before weighting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub text: String,
    /// Provider-specific confidence; missing values count as 0.5
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Source named by the provider itself; the provider id when absent
    #[serde(default, alias = "sourceId", skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

impl RawCandidate {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
            source_id: None,
        }
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }
}

/// One ranked suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    /// 0.0 - 1.0 once weighted
    pub relevance_score: f64,
    pub source_provider_id: String,
}

/// A remote lookup source
#[async_trait]
pub trait LookupProvider: Send + Sync {
    /// Stable identifier used for weights and priorities
    fn id(&self) -> &str;

    /// Look up candidates; must be safe to drop mid-flight
    async fn invoke(&self, query: &str, source_lang: &str, target_lang: &str) -> Result<Vec<RawCandidate>>;
}

/// Per-provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_id: String,
    /// Multiplier applied to raw confidence
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_timeout_millis")]
    pub timeout_millis: u64,
    /// JSON endpoint for HTTP-backed providers
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Memoize raw responses in the cache
    #[serde(default = "default_true")]
    pub cache_responses: bool,
}

fn default_weight() -> f64 {
    DEFAULT_PROVIDER_WEIGHT
}

fn default_timeout_millis() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            weight: DEFAULT_PROVIDER_WEIGHT,
            timeout_millis: DEFAULT_PROVIDER_TIMEOUT_MS,
            endpoint: None,
            cache_responses: true,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_millis = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }
}

// =============================================================================
// Tests
// =============================================================================
