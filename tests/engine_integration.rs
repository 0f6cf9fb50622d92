//! Suggestion Engine Integration Tests
//!
//! Exercises the public API end to end:
//! - Aggregation: weighting, precedence, deduplication, partial failure
//! - Caching: TTL expiry, eviction under capacity, promotion, persistence
//! - Prefetch: predicted keys are rebuilt through the engine

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;

use suggestor::cache::{CacheEntry, PlacementStrategy};
use suggestor::usage::Populator;
use suggestor::{
    Aggregator, BackendKind, ContentType, EngineConfig, Error, LookupProvider, ProviderConfig, RawCandidate, Result,
    SuggestionEngine, TierBackend, TierConfig, TierId,
};

const MIB: u64 = 1024 * 1024;

// =============================================================================
// Test Providers
// =============================================================================

struct StubProvider {
    id: String,
    answers: Vec<RawCandidate>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StubProvider {
    fn new(id: &str, answers: &[(&str, f64)]) -> Arc<Self> {
        Self::slow(id, answers, Duration::ZERO)
    }

    fn slow(id: &str, answers: &[(&str, f64)], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            answers: answers.iter().map(|(t, c)| RawCandidate::new(*t, *c)).collect(),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LookupProvider for StubProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, _query: &str, _source: &str, _target: &str) -> Result<Vec<RawCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self.answers.clone())
    }
}

fn provider_config(id: &str, weight: f64) -> ProviderConfig {
    let mut config = ProviderConfig::new(id).with_weight(weight);
    // Keep provider calls observable across requests
    config.cache_responses = false;
    config
}

fn with_placement(mut config: EngineConfig, content_type: ContentType, strategy: PlacementStrategy) -> EngineConfig {
    config.placement.insert(content_type, strategy);
    config
}

// =============================================================================
// Aggregation
// =============================================================================

mod aggregation_tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_kept_from_priority_provider() {
        let mut config = EngineConfig::default();
        config.providers = vec![provider_config("p1", 1.0), provider_config("p2", 0.5)];
        config
            .language_priority
            .insert("fr".into(), vec!["p1".into(), "p2".into()]);

        let p1 = StubProvider::new("p1", &[("bonjour", 0.9)]);
        let p2 = StubProvider::new("p2", &[("bonjour", 0.95)]);
        let engine = SuggestionEngine::new(config, vec![p2, p1]).await.unwrap();

        let out = engine.suggest("hello", "en", "fr", 7).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "bonjour");
        assert_eq!(out[0].source_provider_id, "p1");
        assert!((out[0].relevance_score - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_weight_decides_rank() {
        let mut config = EngineConfig::default();
        config.providers = vec![provider_config("full", 1.0), provider_config("half", 0.5)];

        let engine = SuggestionEngine::new(
            config,
            vec![
                StubProvider::new("half", &[("salut", 0.9)]),
                StubProvider::new("full", &[("bonjour", 0.9)]),
            ],
        )
        .await
        .unwrap();

        let out = engine.suggest("hello", "en", "fr", 7).await.unwrap();
        let texts: Vec<_> = out.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["bonjour", "salut"]);
    }

    #[tokio::test]
    async fn test_two_of_three_providers_time_out() {
        let mut config = EngineConfig::default();
        config.aggregator.deadline_ms = 300;
        config.providers = vec![
            provider_config("slow-a", 1.0),
            provider_config("slow-b", 1.0),
            provider_config("fast", 0.8),
        ];

        let engine = SuggestionEngine::new(
            config,
            vec![
                StubProvider::slow("slow-a", &[("a", 0.9)], Duration::from_secs(5)),
                StubProvider::slow("slow-b", &[("b", 0.9)], Duration::from_secs(5)),
                StubProvider::new("fast", &[("rapide", 1.0)]),
            ],
        )
        .await
        .unwrap();

        let start = Instant::now();
        let out = engine.suggest("quick", "en", "fr", 7).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "rapide");
        assert!((out[0].relevance_score - 0.8).abs() < 1e-9);
        assert_eq!(engine.metrics().provider_timeouts, 2);
    }

    #[tokio::test]
    async fn test_repeat_runs_rank_identically() {
        let mut config = EngineConfig::default();
        config.providers = vec![provider_config("a", 1.0), provider_config("b", 1.0)];
        config
            .language_priority
            .insert("default".into(), vec!["b".into(), "a".into()]);

        let engine = SuggestionEngine::new(
            config,
            vec![
                StubProvider::new("a", &[("Un", 0.7), ("deux", 0.7), ("trois", 0.2)]),
                StubProvider::new("b", &[("un!", 0.7), ("quatre", 0.7)]),
            ],
        )
        .await
        .unwrap();

        let first = engine.aggregator().refresh("one", "en", "fr", 7).await.unwrap();
        let second = engine.aggregator().refresh("one", "en", "fr", 7).await.unwrap();
        assert_eq!(first, second);

        // "un!" from b wins the duplicate; equal scores keep b's order first
        let texts: Vec<_> = first.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["un!", "quatre", "deux", "trois"]);
    }

    #[tokio::test]
    async fn test_max_results_edges() {
        let provider = StubProvider::new("p", &[("a", 0.9), ("b", 0.8)]);
        let engine = SuggestionEngine::new(EngineConfig::default(), vec![provider.clone()])
            .await
            .unwrap();

        let err = engine.suggest("hello", "en", "fr", -3).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(err.is_usage_error());

        assert!(engine.suggest("hello", "en", "fr", 0).await.unwrap().is_empty());
        assert_eq!(provider.calls(), 0);

        assert_eq!(engine.suggest("hello", "en", "fr", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_suggestions_is_not_an_error() {
        let engine = SuggestionEngine::new(EngineConfig::default(), vec![StubProvider::new("empty", &[])])
            .await
            .unwrap();
        assert!(engine.suggest("hello", "en", "fr", 7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_request_served_from_cache() {
        let provider = StubProvider::new("p", &[("bonjour", 0.9)]);
        let engine = SuggestionEngine::new(EngineConfig::default(), vec![provider.clone()])
            .await
            .unwrap();

        let first = engine.suggest("Hello!", "en", "fr", 7).await.unwrap();
        let second = engine.suggest("hello", "en", "fr", 7).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.calls(), 1);
        assert_eq!(engine.metrics().suggest_cache_hits, 1);
    }
}

// =============================================================================
// Caching
// =============================================================================

mod cache_tests {
    use super::*;

    #[tokio::test]
    async fn test_ttl_expiry() {
        let config = with_placement(
            EngineConfig::default(),
            ContentType::LiveSuggestion,
            PlacementStrategy::new([TierId::Memory, TierId::Embedded], 1, MIB, 1.0),
        );
        let engine = SuggestionEngine::new(config, Vec::new()).await.unwrap();

        let payload = Bytes::from_static(b"payload");
        engine.cache_set("k1", ContentType::LiveSuggestion, payload.clone()).await;
        assert_eq!(engine.cache_get("k1", ContentType::LiveSuggestion).await, Some(payload));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(engine.cache_get("k1", ContentType::LiveSuggestion).await.is_none());
    }

    #[tokio::test]
    async fn test_eviction_keeps_tier_within_capacity() {
        let mut config = with_placement(
            EngineConfig::default(),
            ContentType::ModelBlob,
            PlacementStrategy::new([TierId::Memory], 3600, 2 * MIB, 1.0),
        );
        config.tiers[0].capacity_bytes = 5 * MIB;
        let engine = SuggestionEngine::new(config, Vec::new()).await.unwrap();

        for i in 0..10 {
            let key = format!("blob-{}", i);
            engine
                .cache_set(&key, ContentType::ModelBlob, Bytes::from(vec![i as u8; MIB as usize]))
                .await;

            let memory = engine
                .tier_stats()
                .into_iter()
                .find(|s| s.tier == TierId::Memory)
                .unwrap();
            assert!(memory.size_bytes <= memory.capacity_bytes);
            assert!(engine.cache().contains_fresh(&key, ContentType::ModelBlob).await);
        }

        let memory = engine.cache().tier(TierId::Memory).unwrap();
        assert_eq!(memory.len(), 5);
        assert!(engine.metrics().tier(TierId::Memory).unwrap().evictions >= 5);
    }

    #[tokio::test]
    async fn test_hit_promotes_to_fastest_tier() {
        let engine = SuggestionEngine::new(EngineConfig::default(), Vec::new()).await.unwrap();

        // user-profile lives in [Embedded, Persistent]; seed only the slower one
        let persistent = engine.cache().tier(TierId::Persistent).unwrap();
        persistent
            .set(CacheEntry::new("profile:1", Bytes::from_static(b"prefs"), 3600, 2.0))
            .await
            .unwrap();

        let first = engine
            .cache()
            .lookup("profile:1", ContentType::UserProfile)
            .await
            .unwrap();
        assert_eq!(first.tier, TierId::Persistent);

        let second = engine
            .cache()
            .lookup("profile:1", ContentType::UserProfile)
            .await
            .unwrap();
        assert_eq!(second.tier, TierId::Embedded);
        assert_eq!(second.payload, Bytes::from_static(b"prefs"));
    }

    #[tokio::test]
    async fn test_oversize_entries_are_not_cached() {
        let engine = SuggestionEngine::new(EngineConfig::default(), Vec::new()).await.unwrap();
        engine
            .cache_set(
                "huge",
                ContentType::Unknown,
                Bytes::from(vec![0u8; 2 * MIB as usize]),
            )
            .await;
        assert!(engine.cache_get("huge", ContentType::Unknown).await.is_none());
        assert_eq!(engine.metrics().oversize_skips, 1);
    }

    #[tokio::test]
    async fn test_file_tier_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.tiers = vec![
            TierConfig::new(TierId::Memory, 16 * MIB),
            TierConfig::new(TierId::Embedded, 16 * MIB),
            TierConfig::new(TierId::Persistent, 16 * MIB).with_backend(BackendKind::File {
                path: dir.path().to_path_buf(),
            }),
        ];

        {
            let engine = SuggestionEngine::new(config.clone(), Vec::new()).await.unwrap();
            engine
                .cache_set("profile:7", ContentType::UserProfile, Bytes::from_static(b"saved"))
                .await;
        }

        let engine = SuggestionEngine::new(config, Vec::new()).await.unwrap();
        let persistent = engine.cache().tier(TierId::Persistent).unwrap();
        assert_eq!(persistent.len(), 1);
        assert_eq!(persistent.current_size_bytes(), 5);

        let hit = engine
            .cache()
            .lookup("profile:7", ContentType::UserProfile)
            .await
            .unwrap();
        assert_eq!(hit.tier, TierId::Persistent);
        assert_eq!(hit.payload, Bytes::from_static(b"saved"));
    }

    #[tokio::test]
    async fn test_delete_removes_from_every_tier() {
        let engine = SuggestionEngine::new(EngineConfig::default(), Vec::new()).await.unwrap();
        engine
            .cache_set("k", ContentType::ArchivalData, Bytes::from_static(b"old"))
            .await;
        engine.cache_delete("k").await;
        assert!(engine.cache_get("k", ContentType::ArchivalData).await.is_none());
        for stats in engine.tier_stats() {
            assert_eq!(stats.entries, 0);
        }
    }
}

// =============================================================================
// Prefetch
// =============================================================================

mod prefetch_tests {
    use super::*;

    #[tokio::test]
    async fn test_predicted_key_is_rebuilt() {
        let provider = StubProvider::new("p", &[("bonjour", 0.9)]);
        let mut config = EngineConfig::default();
        config.providers = vec![provider_config("p", 1.0)];
        config.prefetch.confidence_threshold = 0.5;
        config.prefetch.current_language = Some("fr".into());
        let engine = SuggestionEngine::new(config, vec![provider.clone()]).await.unwrap();

        engine.suggest("hello", "en", "fr", 7).await.unwrap();
        let key = Aggregator::key_for("hello", "en", "fr");

        // Still cached: nothing to do
        assert_eq!(engine.prefetcher().run_once().await, 0);

        engine.cache_delete(&key).await;
        assert!(!engine.populator().is_fresh(&key).await);

        assert_eq!(engine.prefetcher().run_once().await, 1);
        assert_eq!(provider.calls(), 2);
        assert!(engine.populator().is_fresh(&key).await);

        let metrics = engine.metrics();
        assert_eq!(metrics.prefetch_succeeded, 1);
        assert_eq!(metrics.prefetch_runs, 2);
    }

    #[tokio::test]
    async fn test_plain_cache_keys_are_never_prefetched() {
        let mut config = EngineConfig::default();
        config.prefetch.confidence_threshold = 0.1;
        let engine = SuggestionEngine::new(config, Vec::new()).await.unwrap();

        engine.cache_get("not-a-suggestion", ContentType::UserProfile).await;
        assert_eq!(engine.prefetcher().run_once().await, 0);
    }
}
