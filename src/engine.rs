//! Suggestion Engine
//!
//! Process-wide façade wiring the cache coordinator, aggregator, usage
//! recorder and prefetcher together. Constructed once at startup and shared
//! by reference; nothing here is global.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::{Aggregator, RankingConfig};
use crate::cache::{CacheCoordinator, ContentType, TierStats};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::metrics::{render_prometheus, EngineMetrics, MetricsSnapshot};
use crate::provider::{LookupProvider, ProviderGateway, Suggestion};
use crate::usage::{AccessContext, DeviceClass, Populator, Prefetcher, UsageRecorder};

/// Request behind a cached suggestion list
#[derive(Debug, Clone)]
struct SuggestionRequest {
    query: String,
    source_lang: String,
    target_lang: String,
    max_results: i64,
}

/// Rebuilds suggestion lists for the prefetcher
///
/// Only keys produced by [`SuggestionEngine::suggest`] can be rebuilt; other
/// cache keys are tracked but never prefetched.
pub struct SuggestionPopulator {
    aggregator: Arc<Aggregator>,
    cache: Arc<CacheCoordinator>,
    requests: DashMap<String, SuggestionRequest>,
}

impl SuggestionPopulator {
    fn new(aggregator: Arc<Aggregator>, cache: Arc<CacheCoordinator>) -> Self {
        Self {
            aggregator,
            cache,
            requests: DashMap::new(),
        }
    }

    fn remember(&self, key: String, request: SuggestionRequest) {
        self.requests.insert(key, request);
    }

    /// Forget requests whose key no longer has usage history
    fn retain_tracked(&self, recorder: &UsageRecorder) -> usize {
        let mut dropped = 0;
        self.requests.retain(|key, _| {
            let tracked = recorder.contains(key);
            if !tracked {
                dropped += 1;
            }
            tracked
        });
        dropped
    }

    /// Number of requests that can be replayed
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[async_trait]
impl Populator for SuggestionPopulator {
    async fn populate(&self, key: &str) -> Result<()> {
        let request = self
            .requests
            .get(key)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::Internal(format!("No request known for {}", key)))?;

        let suggestions = self
            .aggregator
            .refresh(
                &request.query,
                &request.source_lang,
                &request.target_lang,
                request.max_results,
            )
            .await?;
        debug!("Prefetched {} suggestions for {}", suggestions.len(), key);
        Ok(())
    }

    async fn is_fresh(&self, key: &str) -> bool {
        self.cache.contains_fresh(key, ContentType::LiveSuggestion).await
    }

    fn can_populate(&self, key: &str) -> bool {
        self.requests.contains_key(key)
    }
}

fn forget_idle(recorder: &UsageRecorder, populator: &SuggestionPopulator, idle_after: std::time::Duration) -> usize {
    let cutoff = match chrono::Duration::from_std(idle_after) {
        Ok(window) => chrono::Utc::now() - window,
        Err(e) => {
            warn!("Idle window out of range, keeping usage history: {}", e);
            return 0;
        }
    };
    let dropped = recorder.forget_idle(cutoff);
    let requests = populator.retain_tracked(recorder);
    if dropped > 0 || requests > 0 {
        debug!("Forgot {} idle keys and {} stale requests", dropped, requests);
    }
    dropped
}

/// The suggestion engine
pub struct SuggestionEngine {
    config: EngineConfig,
    cache: Arc<CacheCoordinator>,
    aggregator: Arc<Aggregator>,
    recorder: Arc<UsageRecorder>,
    populator: Arc<SuggestionPopulator>,
    prefetcher: Arc<Prefetcher>,
    metrics: Arc<EngineMetrics>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SuggestionEngine {
    /// Build an engine whose providers are the HTTP endpoints in `config`
    pub async fn from_config(config: EngineConfig) -> Result<Self> {
        let providers = config.build_providers()?;
        Self::new(config, providers).await
    }

    /// Build an engine over explicit providers
    ///
    /// Each provider's weight and timeout come from the matching
    /// `config.providers` entry, or the defaults when there is none.
    pub async fn new(config: EngineConfig, providers: Vec<Arc<dyn LookupProvider>>) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(EngineMetrics::new());
        let cache = Arc::new(CacheCoordinator::new(
            config.build_tiers().await?,
            config.build_placement(),
            config.eviction.clone(),
            metrics.clone(),
        ));

        let mut ranking = RankingConfig::from_source(&config);
        let gateways = providers
            .into_iter()
            .map(|provider| {
                let provider_config = config.provider_config(provider.id());
                ranking
                    .weights
                    .entry(provider_config.provider_id.clone())
                    .or_insert(provider_config.weight);
                ProviderGateway::new(provider, &provider_config, metrics.clone()).with_cache(cache.clone())
            })
            .collect();

        let aggregator = Arc::new(Aggregator::new(
            gateways,
            ranking,
            cache.clone(),
            config.aggregator.clone(),
            metrics.clone(),
        ));

        let recorder = Arc::new(UsageRecorder::with_capacity(config.history_cap));
        let populator = Arc::new(SuggestionPopulator::new(aggregator.clone(), cache.clone()));
        let prefetcher = Prefetcher::new(
            config.prefetch.clone(),
            recorder.clone(),
            populator.clone(),
            metrics.clone(),
        );

        info!(
            "Suggestion engine ready: {} tiers, {} providers",
            cache.stats().len(),
            aggregator.provider_ids().len()
        );

        Ok(Self {
            config,
            cache,
            aggregator,
            recorder,
            populator,
            prefetcher,
            metrics,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheCoordinator> {
        &self.cache
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn recorder(&self) -> &Arc<UsageRecorder> {
        &self.recorder
    }

    pub fn prefetcher(&self) -> &Arc<Prefetcher> {
        &self.prefetcher
    }

    pub fn populator(&self) -> &Arc<SuggestionPopulator> {
        &self.populator
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Ranked suggestions for `query`
    ///
    /// Fails only with [`Error::InvalidArgument`].
    pub async fn suggest(
        &self,
        query: &str,
        source_lang: &str,
        target_lang: &str,
        max_results: i64,
    ) -> Result<Vec<Suggestion>> {
        let context = AccessContext::now(Some(target_lang.trim().to_string()), DeviceClass::default());
        self.suggest_with_context(query, source_lang, target_lang, max_results, context)
            .await
    }

    /// Like [`suggest`](Self::suggest) with an explicit access context
    pub async fn suggest_with_context(
        &self,
        query: &str,
        source_lang: &str,
        target_lang: &str,
        max_results: i64,
        context: AccessContext,
    ) -> Result<Vec<Suggestion>> {
        let suggestions = self
            .aggregator
            .suggest(query, source_lang, target_lang, max_results)
            .await?;

        if max_results > 0 {
            let key = Aggregator::key_for(query, source_lang, target_lang);
            self.populator.remember(
                key.clone(),
                SuggestionRequest {
                    query: query.to_string(),
                    source_lang: source_lang.to_string(),
                    target_lang: target_lang.to_string(),
                    max_results,
                },
            );
            self.recorder.record(&key, context);
        }

        Ok(suggestions)
    }

    /// Cached payload for `key`, if any tier holds a fresh copy
    pub async fn cache_get(&self, key: &str, content_type: ContentType) -> Option<Bytes> {
        self.cache_get_with_context(key, content_type, AccessContext::now(None, DeviceClass::default()))
            .await
    }

    pub async fn cache_get_with_context(
        &self,
        key: &str,
        content_type: ContentType,
        context: AccessContext,
    ) -> Option<Bytes> {
        self.recorder.record(key, context);
        self.cache.get(key, content_type).await
    }

    /// Best-effort insert; entries that fit nowhere are dropped
    pub async fn cache_set(&self, key: &str, content_type: ContentType, payload: Bytes) {
        let report = self.cache.set(key, content_type, payload).await;
        if !report.is_cached() {
            debug!("{} was not cached in any tier", key);
        }
    }

    pub async fn cache_delete(&self, key: &str) {
        self.cache.delete(key).await;
    }

    /// Record an access without reading the cache
    pub fn record_access(&self, key: &str, context: AccessContext) {
        self.recorder.record(key, context);
    }

    // =========================================================================
    // Background Tasks
    // =========================================================================

    /// Start the prefetch loop and the expired-entry sweep
    ///
    /// Calling this twice is a no-op.
    pub fn start_background(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            warn!("Background tasks already running");
            return;
        }

        if self.config.prefetch.enabled {
            let prefetcher = self.prefetcher.clone();
            tasks.push(tokio::spawn(prefetcher.run(self.shutdown.child_token())));
        } else {
            info!("Prefetching disabled");
        }

        let cache = self.cache.clone();
        let recorder = self.recorder.clone();
        let populator = self.populator.clone();
        let idle_after = self.config.prefetch.recent_window();
        let period = self.config.cleanup_interval();
        let shutdown = self.shutdown.child_token();
        tasks.push(tokio::spawn(async move {
            let mut tick = interval(period);
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let removed = cache.purge_expired().await;
                        if removed > 0 {
                            info!("Purged {} expired entries", removed);
                        }
                        forget_idle(&recorder, &populator, idle_after);
                    }
                    _ = shutdown.cancelled() => {
                        info!("Cache cleanup shutting down");
                        break;
                    }
                }
            }
        }));
    }

    /// Drop usage history and replayable requests for keys idle longer than
    /// the prefetch recent window; such keys can no longer be predicted
    ///
    /// Runs on every cleanup tick. Returns the number of keys dropped.
    pub fn forget_idle(&self) -> usize {
        forget_idle(&self.recorder, &self.populator, self.config.prefetch.recent_window())
    }

    /// Stop background tasks and wait for them to exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        info!("Suggestion engine stopped");
    }

    // =========================================================================
    // Metrics
    // =========================================================================

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn tier_stats(&self) -> Vec<TierStats> {
        self.cache.stats()
    }

    /// Prometheus text exposition of the current metrics
    pub fn render_metrics(&self) -> Result<String> {
        render_prometheus(&self.metrics.snapshot(), &self.cache.stats())
    }
}

// =============================================================================
// Tests
// =============================================================================
