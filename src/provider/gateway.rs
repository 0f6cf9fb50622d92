//! Provider Gateway
//!
//! Wraps one [`LookupProvider`] with a deadline, cache-around-call and
//! failure containment. [`ProviderGateway::invoke`] never fails: a timeout
//! or provider error yields an empty list.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use super::{LookupProvider, ProviderConfig, RawCandidate, Suggestion};
use crate::cache::{derive_key, CacheCoordinator, ContentType};
use crate::error::{Error, Result};
use crate::metrics::EngineMetrics;

/// Guarded access to one provider
pub struct ProviderGateway {
    provider: Arc<dyn LookupProvider>,
    timeout: Duration,
    cache_responses: bool,
    cache: Option<Arc<CacheCoordinator>>,
    metrics: Arc<EngineMetrics>,
}

impl ProviderGateway {
    pub fn new(provider: Arc<dyn LookupProvider>, config: &ProviderConfig, metrics: Arc<EngineMetrics>) -> Self {
        if provider.id() != config.provider_id {
            warn!(
                "Provider {} configured under id {}",
                provider.id(),
                config.provider_id
            );
        }
        Self {
            provider,
            timeout: config.timeout(),
            cache_responses: config.cache_responses,
            cache: None,
            metrics,
        }
    }

    /// Memoize raw responses in `cache` under content type `provider-response`
    ///
    /// No-op for providers configured with `cache_responses: false`.
    pub fn with_cache(mut self, cache: Arc<CacheCoordinator>) -> Self {
        if self.cache_responses {
            self.cache = Some(cache);
        }
        self
    }

    pub fn id(&self) -> &str {
        self.provider.id()
    }

    /// Cache key for one provider response
    pub fn response_key(provider_id: &str, normalized_query: &str, source_lang: &str, target_lang: &str) -> String {
        derive_key("provider", &[provider_id, normalized_query, source_lang, target_lang])
    }

    /// Invoke the provider, containing every failure
    pub async fn invoke(&self, query: &str, source_lang: &str, target_lang: &str, deadline: Duration) -> Vec<Suggestion> {
        self.try_invoke(query, source_lang, target_lang, deadline)
            .await
            .unwrap_or_default()
    }

    /// Invoke the provider, reporting timeout or error
    ///
    /// The effective timeout is the smaller of `deadline` and the provider's
    /// own configured timeout. It bounds the memo lookup and the call
    /// together; the memo write happens in the background.
    #[instrument(skip(self), fields(provider = %self.provider.id()))]
    pub async fn try_invoke(
        &self,
        query: &str,
        source_lang: &str,
        target_lang: &str,
        deadline: Duration,
    ) -> Result<Vec<Suggestion>> {
        let provider_id = self.provider.id();
        let key = Self::response_key(provider_id, query, source_lang, target_lang);
        let start = Instant::now();
        let timeout = deadline.min(self.timeout);
        let expires = start + timeout;

        match tokio::time::timeout(timeout, self.cached(&key)).await {
            Ok(Some(raw)) => {
                self.metrics.record_provider_cache_hit();
                log_call(provider_id, query, start, "cached", raw.len());
                return Ok(self.to_suggestions(raw));
            }
            Ok(None) => {}
            Err(_) => debug!("Memo lookup for {} ran out of time", provider_id),
        }

        self.metrics.record_provider_call();
        let remaining = expires.saturating_duration_since(Instant::now());
        let outcome = tokio::time::timeout(remaining, self.provider.invoke(query, source_lang, target_lang)).await;

        let raw = match outcome {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                self.metrics.record_provider_error();
                log_call(provider_id, query, start, "error", 0);
                warn!("Provider {} failed: {}", provider_id, e);
                return Err(Error::ProviderError {
                    provider: provider_id.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                self.metrics.record_provider_timeout();
                log_call(provider_id, query, start, "timeout", 0);
                return Err(Error::ProviderTimeout {
                    provider: provider_id.to_string(),
                    timeout,
                });
            }
        };

        log_call(provider_id, query, start, "ok", raw.len());
        self.store(key, &raw);
        Ok(self.to_suggestions(raw))
    }

    async fn cached(&self, key: &str) -> Option<Vec<RawCandidate>> {
        let cache = self.cache.as_ref()?;
        let payload = cache.get(key, ContentType::ProviderResponse).await?;
        match serde_json::from_slice(&payload) {
            Ok(raw) => Some(raw),
            Err(e) => {
                debug!("Ignoring undecodable cached response {}: {}", key, e);
                None
            }
        }
    }

    fn store(&self, key: String, raw: &[RawCandidate]) {
        let Some(cache) = &self.cache else { return };
        match serde_json::to_vec(raw) {
            Ok(payload) => {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache.set(&key, ContentType::ProviderResponse, Bytes::from(payload)).await;
                });
            }
            Err(e) => debug!("Not caching response {}: {}", key, e),
        }
    }

    fn to_suggestions(&self, raw: Vec<RawCandidate>) -> Vec<Suggestion> {
        raw.into_iter()
            .map(|c| Suggestion {
                text: c.text,
                relevance_score: c.confidence,
                source_provider_id: c.source_id.unwrap_or_else(|| self.provider.id().to_string()),
            })
            .collect()
    }
}

fn log_call(provider: &str, query: &str, start: Instant, status: &str, count: usize) {
    info!(
        provider,
        query,
        elapsed_ms = start.elapsed().as_millis() as u64,
        status,
        count,
        "provider call"
    );
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EvictionPolicy, KvStore, PlacementStrategy, PlacementTable, StoreTier, TierId};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticProvider {
        id: String,
        delay: Duration,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StaticProvider {
        fn new(id: &str) -> Self {
            Self {
                id: id.into(),
                delay: Duration::ZERO,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LookupProvider for StaticProvider {
        fn id(&self) -> &str {
            &self.id
        }

        async fn invoke(&self, query: &str, _source: &str, _target: &str) -> Result<Vec<RawCandidate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(Error::Internal("upstream 503".into()));
            }
            Ok(vec![RawCandidate::new(format!("{}-result", query), 0.8)])
        }
    }

    async fn wait_until_cached(cache: &CacheCoordinator, key: &str) {
        for _ in 0..100 {
            if cache.contains_fresh(key, ContentType::ProviderResponse).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("response for {} was never cached", key);
    }

    /// Memo store that misses slowly and writes slowly
    struct SluggishStore {
        delay: Duration,
    }

    #[async_trait]
    impl KvStore for SluggishStore {
        fn name(&self) -> &str {
            "sluggish"
        }
        async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
            tokio::time::sleep(self.delay).await;
            Ok(None)
        }
        async fn put(&self, _key: &str, _value: Bytes) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
        async fn delete(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }
        async fn keys(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn size_bytes(&self) -> Result<u64> {
            Ok(0)
        }
    }

    fn sluggish_cache(delay: Duration) -> Arc<CacheCoordinator> {
        let placement = PlacementTable::default().with_override(
            ContentType::ProviderResponse,
            PlacementStrategy::new([TierId::Embedded], 300, 1 << 20, 1.0),
        );
        let store = StoreTier::new(TierId::Embedded, Arc::new(SluggishStore { delay }), 1 << 20)
            .with_timeout(Duration::from_secs(5));
        Arc::new(CacheCoordinator::new(
            vec![Arc::new(store)],
            placement,
            EvictionPolicy::default(),
            Arc::new(EngineMetrics::new()),
        ))
    }

    fn gateway(provider: Arc<StaticProvider>, timeout: Duration) -> ProviderGateway {
        let config = ProviderConfig::new(provider.id.clone()).with_timeout(timeout);
        ProviderGateway::new(provider, &config, Arc::new(EngineMetrics::new()))
    }

    #[tokio::test]
    async fn test_invoke_tags_source() {
        let gw = gateway(Arc::new(StaticProvider::new("p1")), Duration::from_secs(1));
        let out = gw.invoke("hello", "en", "fr", Duration::from_secs(1)).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "hello-result");
        assert_eq!(out[0].relevance_score, 0.8);
        assert_eq!(out[0].source_provider_id, "p1");
    }

    #[tokio::test]
    async fn test_provider_named_source_is_kept() {
        struct Relay;

        #[async_trait]
        impl LookupProvider for Relay {
            fn id(&self) -> &str {
                "relay"
            }
            async fn invoke(&self, _query: &str, _source: &str, _target: &str) -> Result<Vec<RawCandidate>> {
                Ok(vec![
                    RawCandidate::new("salut", 0.9).with_source("wiktionary"),
                    RawCandidate::new("bonjour", 0.8),
                ])
            }
        }

        let config = ProviderConfig::new("relay");
        let gw = ProviderGateway::new(Arc::new(Relay), &config, Arc::new(EngineMetrics::new()));
        let out = gw.invoke("hello", "en", "fr", Duration::from_secs(1)).await;
        assert_eq!(out[0].source_provider_id, "wiktionary");
        assert_eq!(out[1].source_provider_id, "relay");
    }

    #[tokio::test]
    async fn test_timeout_uses_smaller_of_deadline_and_config() {
        let mut provider = StaticProvider::new("slow");
        provider.delay = Duration::from_millis(500);
        let gw = gateway(Arc::new(provider), Duration::from_secs(5));

        let start = Instant::now();
        let err = gw
            .try_invoke("hello", "en", "fr", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_matches!(err, Error::ProviderTimeout { timeout, .. } if timeout == Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_millis(400));

        // Contained form
        assert!(gw.invoke("hello", "en", "fr", Duration::from_millis(50)).await.is_empty());
        assert_eq!(gw.metrics.snapshot().provider_timeouts, 2);
    }

    #[tokio::test]
    async fn test_error_is_contained() {
        let mut provider = StaticProvider::new("broken");
        provider.fail = true;
        let gw = gateway(Arc::new(provider), Duration::from_secs(1));

        let err = gw.try_invoke("q", "en", "fr", Duration::from_secs(1)).await.unwrap_err();
        assert_matches!(err, Error::ProviderError { ref provider, .. } if provider == "broken");
        assert!(gw.invoke("q", "en", "fr", Duration::from_secs(1)).await.is_empty());
    }

    #[tokio::test]
    async fn test_responses_are_memoized() {
        let provider = Arc::new(StaticProvider::new("p1"));
        let cache = Arc::new(CacheCoordinator::in_memory(1 << 20));
        let gw = gateway(provider.clone(), Duration::from_secs(1)).with_cache(cache.clone());

        let key = ProviderGateway::response_key("p1", "hello", "en", "fr");
        let first = gw.invoke("hello", "en", "fr", Duration::from_secs(1)).await;
        wait_until_cached(&cache, &key).await;
        let second = gw.invoke("hello", "en", "fr", Duration::from_secs(1)).await;
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gw.metrics.snapshot().provider_cache_hits, 1);

        // Different language pair is a different key
        gw.invoke("hello", "en", "de", Duration::from_secs(1)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        assert!(cache.contains_fresh(&key, ContentType::ProviderResponse).await);
    }

    #[tokio::test]
    async fn test_caching_can_be_disabled() {
        let provider = Arc::new(StaticProvider::new("live"));
        let mut config = ProviderConfig::new("live");
        config.cache_responses = false;
        let gw = ProviderGateway::new(provider.clone(), &config, Arc::new(EngineMetrics::new()))
            .with_cache(Arc::new(CacheCoordinator::in_memory(1 << 20)));

        gw.invoke("hello", "en", "fr", Duration::from_secs(1)).await;
        gw.invoke("hello", "en", "fr", Duration::from_secs(1)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_memo_counts_against_deadline() {
        let mut provider = StaticProvider::new("p1");
        provider.delay = Duration::from_millis(400);
        let gw = gateway(Arc::new(provider), Duration::from_secs(5))
            .with_cache(sluggish_cache(Duration::from_millis(300)));

        let start = Instant::now();
        let err = gw
            .try_invoke("hello", "en", "fr", Duration::from_millis(500))
            .await
            .unwrap_err();
        assert_matches!(err, Error::ProviderTimeout { .. });
        assert!(start.elapsed() < Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_memo_write_does_not_delay_answer() {
        let mut provider = StaticProvider::new("p1");
        provider.delay = Duration::from_millis(50);
        let gw = gateway(Arc::new(provider), Duration::from_secs(5))
            .with_cache(sluggish_cache(Duration::from_millis(300)));

        let start = Instant::now();
        let out = gw.invoke("hello", "en", "fr", Duration::from_secs(2)).await;
        assert_eq!(out.len(), 1);
        // One slow miss plus the call, no slow write
        assert!(start.elapsed() < Duration::from_millis(600));
    }
}
