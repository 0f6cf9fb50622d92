//! Suggestion Aggregator
//!
//! Fans a normalized query out to every provider gateway under one shared
//! deadline, merges the groups through [`ranking::merge`] and caches the
//! final list as a `live-suggestion`.
//!
//! ```text
//!   query ─► normalize ─► cache? ──hit──► truncate ─► caller
//!                           │miss
//!                           ▼
//!          ┌────────── fan-out (bounded, ordered) ──────────┐
//!          │  gateway 1     gateway 2     ...    gateway n  │
//!          └────────────────────────┬───────────────────────┘
//!                                   ▼
//!               reorder ─► weight ─► dedup ─► sort ─► cache ─► caller
//! ```

pub mod normalize;
pub mod ranking;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::cache::{derive_key, CacheCoordinator, ContentType};
use crate::config::ConfigSource;
use crate::error::{Error, Result};
use crate::metrics::EngineMetrics;
use crate::provider::{ProviderGateway, Suggestion};

pub use normalize::normalize_text;
pub use ranking::{merge, reorder, ProviderGroup, RankingConfig, DEFAULT_PRIORITY_KEY};

/// Providers fanned out concurrently when more than this many are configured
pub const MAX_DEFAULT_IN_FLIGHT: usize = 10;

/// Aggregator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Shared deadline for one fan-out
    pub deadline_ms: u64,
    pub default_max_results: usize,
    /// Concurrent provider calls per request; `None` means one per provider
    /// up to 10
    pub max_in_flight: Option<usize>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 3500,
            default_max_results: 7,
            max_in_flight: None,
        }
    }
}

impl AggregatorConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Cached form of a merged list
#[derive(Debug, Serialize, Deserialize)]
struct CachedSuggestions {
    /// The limit the list was produced with
    max_results: usize,
    suggestions: Vec<Suggestion>,
}

/// Merges provider results into one ranked list
pub struct Aggregator {
    gateways: Vec<ProviderGateway>,
    ranking: RwLock<Arc<RankingConfig>>,
    cache: Arc<CacheCoordinator>,
    config: AggregatorConfig,
    metrics: Arc<EngineMetrics>,
}

impl Aggregator {
    pub fn new(
        gateways: Vec<ProviderGateway>,
        ranking: RankingConfig,
        cache: Arc<CacheCoordinator>,
        config: AggregatorConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        info!(
            "Aggregator over {} providers (deadline {:?})",
            gateways.len(),
            config.deadline()
        );
        Self {
            gateways,
            ranking: RwLock::new(Arc::new(ranking)),
            cache,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.gateways.iter().map(|g| g.id().to_string()).collect()
    }

    /// Current weights and priorities
    pub fn ranking(&self) -> Arc<RankingConfig> {
        self.ranking.read().clone()
    }

    /// Swap in new weights and priorities from `source`
    ///
    /// Requests already in flight finish with the config they started with.
    pub fn reload_ranking(&self, source: &dyn ConfigSource) {
        let ranking = RankingConfig::from_source(source);
        info!(
            "Reloaded ranking: {} weights, {} language priorities",
            ranking.weights.len(),
            ranking.language_priority.len()
        );
        *self.ranking.write() = Arc::new(ranking);
    }

    /// Cache key of a merged list
    pub fn suggestion_key(normalized_query: &str, source_lang: &str, target_lang: &str) -> String {
        derive_key("suggest", &[normalized_query, source_lang, target_lang])
    }

    /// Cache key a raw request resolves to
    pub fn key_for(query: &str, source_lang: &str, target_lang: &str) -> String {
        Self::suggestion_key(&normalize_text(query), source_lang.trim(), target_lang.trim())
    }

    /// Ranked suggestions for `query`
    ///
    /// Fails only on invalid arguments; provider trouble shows up as a
    /// shorter (possibly empty) list.
    #[instrument(skip(self))]
    pub async fn suggest(
        &self,
        query: &str,
        source_lang: &str,
        target_lang: &str,
        max_results: i64,
    ) -> Result<Vec<Suggestion>> {
        let start = Instant::now();
        let Some(request) = SuggestRequest::parse(query, source_lang, target_lang, max_results)? else {
            return Ok(Vec::new());
        };

        let key = request.key();
        if let Some(mut cached) = self.cached(&key, request.max_results).await {
            cached.truncate(request.max_results);
            debug!("Serving {} suggestions for {:?} from cache", cached.len(), request.normalized);
            self.metrics.record_suggest(start.elapsed(), true);
            return Ok(cached);
        }

        let merged = self.compute(&request).await;
        self.store(&key, &request, &merged).await;
        self.metrics.record_suggest(start.elapsed(), false);
        Ok(merged)
    }

    /// Recompute and re-cache a list, bypassing the cached copy
    pub async fn refresh(
        &self,
        query: &str,
        source_lang: &str,
        target_lang: &str,
        max_results: i64,
    ) -> Result<Vec<Suggestion>> {
        let Some(request) = SuggestRequest::parse(query, source_lang, target_lang, max_results)? else {
            return Ok(Vec::new());
        };
        let merged = self.compute(&request).await;
        self.store(&request.key(), &request, &merged).await;
        Ok(merged)
    }

    async fn compute(&self, request: &SuggestRequest) -> Vec<Suggestion> {
        let deadline = Instant::now() + self.config.deadline();
        let ranking = self.ranking();
        let query = request.normalized.as_str();
        let (source, target) = (request.source.as_str(), request.target.as_str());

        let calls: Vec<_> = self
            .gateways
            .iter()
            .map(|gateway| async move {
                let remaining = deadline.saturating_duration_since(Instant::now());
                ProviderGroup::new(gateway.id(), gateway.invoke(query, source, target, remaining).await)
            })
            .collect();

        let groups: Vec<ProviderGroup> = stream::iter(calls)
            .buffered(self.max_in_flight())
            .collect()
            .await;

        let responded = groups.iter().filter(|g| !g.suggestions.is_empty()).count();
        let merged = merge(groups, target, request.max_results, &ranking);
        debug!(
            "Merged {} suggestions from {}/{} providers",
            merged.len(),
            responded,
            self.gateways.len()
        );
        merged
    }

    fn max_in_flight(&self) -> usize {
        self.config
            .max_in_flight
            .unwrap_or_else(|| self.gateways.len().min(MAX_DEFAULT_IN_FLIGHT))
            .max(1)
    }

    async fn cached(&self, key: &str, max_results: usize) -> Option<Vec<Suggestion>> {
        let payload = self.cache.get(key, ContentType::LiveSuggestion).await?;
        let cached: CachedSuggestions = match serde_json::from_slice(&payload) {
            Ok(cached) => cached,
            Err(e) => {
                debug!("Ignoring undecodable cached list {}: {}", key, e);
                return None;
            }
        };
        (cached.max_results >= max_results).then_some(cached.suggestions)
    }

    async fn store(&self, key: &str, request: &SuggestRequest, merged: &[Suggestion]) {
        let envelope = CachedSuggestions {
            max_results: request.max_results,
            suggestions: merged.to_vec(),
        };
        match serde_json::to_vec(&envelope) {
            Ok(payload) => {
                self.cache
                    .set(key, ContentType::LiveSuggestion, Bytes::from(payload))
                    .await;
            }
            Err(e) => debug!("Not caching list {}: {}", key, e),
        }
    }
}

/// Validated request
#[derive(Debug)]
struct SuggestRequest {
    normalized: String,
    source: String,
    target: String,
    max_results: usize,
}

impl SuggestRequest {
    /// `Ok(None)` when the request is valid but asks for nothing
    fn parse(query: &str, source_lang: &str, target_lang: &str, max_results: i64) -> Result<Option<Self>> {
        if max_results < 0 {
            return Err(Error::InvalidArgument(format!(
                "max_results must not be negative, got {}",
                max_results
            )));
        }

        let source = source_lang.trim();
        let target = target_lang.trim();
        if source.is_empty() || target.is_empty() {
            return Err(Error::InvalidArgument("source and target language are required".into()));
        }

        let normalized = normalize_text(query);
        if normalized.is_empty() {
            return Err(Error::InvalidArgument(format!("query {:?} is empty after normalization", query)));
        }

        if max_results == 0 {
            return Ok(None);
        }

        Ok(Some(Self {
            normalized,
            source: source.to_string(),
            target: target.to_string(),
            max_results: usize::try_from(max_results).unwrap_or(usize::MAX),
        }))
    }

    fn key(&self) -> String {
        Aggregator::suggestion_key(&self.normalized, &self.source, &self.target)
    }
}

// =============================================================================
// Tests
// =============================================================================
