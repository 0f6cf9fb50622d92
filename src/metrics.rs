//! Engine Metrics Collection
//!
//! Lock-free counters for every contained failure and every cache decision,
//! plus a Prometheus text rendering for the binary's `/metrics` endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use prometheus::{Encoder, Gauge, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::cache::{TierId, TierStats};
use crate::error::{Error, Result};

const TIERS: usize = TierId::ALL.len();

/// Per-tier counter block
#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    promotions: AtomicU64,
    set_failures: AtomicU64,
    backend_errors: AtomicU64,
}

/// Engine metrics collector
#[derive(Debug, Default)]
pub struct EngineMetrics {
    tiers: [TierCounters; TIERS],

    // Cache entry decisions
    lookup_misses: AtomicU64,
    oversize_skips: AtomicU64,
    expired_removals: AtomicU64,

    // Provider gateway
    provider_calls: AtomicU64,
    provider_timeouts: AtomicU64,
    provider_errors: AtomicU64,
    provider_cache_hits: AtomicU64,

    // Aggregator (latency as exponential moving average, microseconds)
    suggest_calls: AtomicU64,
    suggest_cache_hits: AtomicU64,
    suggest_latency_us: AtomicU64,

    // Prefetcher
    prefetch_runs: AtomicU64,
    prefetch_scheduled: AtomicU64,
    prefetch_succeeded: AtomicU64,
    prefetch_failed: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn tier(&self, tier: TierId) -> &TierCounters {
        &self.tiers[tier.index()]
    }

    // Tier metrics
    pub fn record_hit(&self, tier: TierId) {
        self.tier(tier).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self, tier: TierId) {
        self.tier(tier).misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, tier: TierId, count: u64) {
        self.tier(tier).evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_promotion(&self, tier: TierId) {
        self.tier(tier).promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set_failure(&self, tier: TierId) {
        self.tier(tier).set_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backend_error(&self, tier: TierId) {
        self.tier(tier).backend_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A lookup that missed every tier
    pub fn record_lookup_miss(&self) {
        self.lookup_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_oversize_skip(&self) {
        self.oversize_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired_removals(&self, count: u64) {
        self.expired_removals.fetch_add(count, Ordering::Relaxed);
    }

    pub fn hits(&self, tier: TierId) -> u64 {
        self.tier(tier).hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self, tier: TierId) -> u64 {
        self.tier(tier).misses.load(Ordering::Relaxed)
    }

    // Provider metrics
    pub fn record_provider_call(&self) {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_timeout(&self) {
        self.provider_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_error(&self) {
        self.provider_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_cache_hit(&self) {
        self.provider_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    // Aggregator metrics
    pub fn record_suggest(&self, latency: Duration, from_cache: bool) {
        self.suggest_calls.fetch_add(1, Ordering::Relaxed);
        if from_cache {
            self.suggest_cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        update_latency_ema(&self.suggest_latency_us, latency);
    }

    // Prefetch metrics
    pub fn record_prefetch_run(&self, scheduled: u64) {
        self.prefetch_runs.fetch_add(1, Ordering::Relaxed);
        self.prefetch_scheduled.fetch_add(scheduled, Ordering::Relaxed);
    }

    pub fn record_prefetch_result(&self, success: bool) {
        if success {
            self.prefetch_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.prefetch_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Overall hit ratio across lookups (a lookup hits at most one tier)
    pub fn overall_hit_ratio(&self) -> f64 {
        let hits: u64 = TierId::ALL.iter().map(|t| self.hits(*t)).sum();
        let lookups = hits + self.lookup_misses.load(Ordering::Relaxed);
        if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let tiers = TierId::ALL
            .iter()
            .map(|&tier| {
                let c = self.tier(tier);
                TierMetrics {
                    tier,
                    hits: c.hits.load(Ordering::Relaxed),
                    misses: c.misses.load(Ordering::Relaxed),
                    evictions: c.evictions.load(Ordering::Relaxed),
                    promotions: c.promotions.load(Ordering::Relaxed),
                    set_failures: c.set_failures.load(Ordering::Relaxed),
                    backend_errors: c.backend_errors.load(Ordering::Relaxed),
                }
            })
            .collect();

        MetricsSnapshot {
            tiers,
            hit_ratio: self.overall_hit_ratio(),
            lookup_misses: self.lookup_misses.load(Ordering::Relaxed),
            oversize_skips: self.oversize_skips.load(Ordering::Relaxed),
            expired_removals: self.expired_removals.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            provider_timeouts: self.provider_timeouts.load(Ordering::Relaxed),
            provider_errors: self.provider_errors.load(Ordering::Relaxed),
            provider_cache_hits: self.provider_cache_hits.load(Ordering::Relaxed),
            suggest_calls: self.suggest_calls.load(Ordering::Relaxed),
            suggest_cache_hits: self.suggest_cache_hits.load(Ordering::Relaxed),
            suggest_latency_us: self.suggest_latency_us.load(Ordering::Relaxed),
            prefetch_runs: self.prefetch_runs.load(Ordering::Relaxed),
            prefetch_scheduled: self.prefetch_scheduled.load(Ordering::Relaxed),
            prefetch_succeeded: self.prefetch_succeeded.load(Ordering::Relaxed),
            prefetch_failed: self.prefetch_failed.load(Ordering::Relaxed),
        }
    }
}

fn update_latency_ema(target: &AtomicU64, duration: Duration) {
    let new_us = duration.as_micros() as u64;
    let alpha = 0.1; // EMA smoothing factor

    let _ = target.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(if current == 0 {
            new_us
        } else {
            ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
        })
    });
}

/// Per-tier counters at a point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierMetrics {
    pub tier: TierId,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub promotions: u64,
    pub set_failures: u64,
    pub backend_errors: u64,
}

/// Metrics snapshot for reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub tiers: Vec<TierMetrics>,
    /// Lookups served by any tier / all lookups
    pub hit_ratio: f64,
    pub lookup_misses: u64,
    pub oversize_skips: u64,
    pub expired_removals: u64,
    pub provider_calls: u64,
    pub provider_timeouts: u64,
    pub provider_errors: u64,
    pub provider_cache_hits: u64,
    pub suggest_calls: u64,
    pub suggest_cache_hits: u64,
    pub suggest_latency_us: u64,
    pub prefetch_runs: u64,
    pub prefetch_scheduled: u64,
    pub prefetch_succeeded: u64,
    pub prefetch_failed: u64,
}

impl MetricsSnapshot {
    pub fn tier(&self, tier: TierId) -> Option<&TierMetrics> {
        self.tiers.iter().find(|t| t.tier == tier)
    }
}

// =============================================================================
// Prometheus Exposition
// =============================================================================

fn prom_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("Prometheus encoding failed: {}", e))
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    let vec = IntCounterVec::new(Opts::new(name, help), labels).map_err(prom_err)?;
    registry.register(Box::new(vec.clone())).map_err(prom_err)?;
    Ok(vec)
}

fn gauge(registry: &Registry, name: &str, help: &str, value: u64) -> Result<()> {
    let gauge = IntGauge::new(name, help).map_err(prom_err)?;
    gauge.set(value as i64);
    registry.register(Box::new(gauge)).map_err(prom_err)
}

/// Render a snapshot plus tier sizes in Prometheus text format
pub fn render_prometheus(snapshot: &MetricsSnapshot, tier_stats: &[TierStats]) -> Result<String> {
    let registry = Registry::new();

    let tier_ops = counter_vec(
        &registry,
        "suggestor_tier_operations_total",
        "Cache tier operations by outcome",
        &["tier", "outcome"],
    )?;
    for t in &snapshot.tiers {
        let tier = t.tier.as_str();
        for (outcome, value) in [
            ("hit", t.hits),
            ("miss", t.misses),
            ("eviction", t.evictions),
            ("promotion", t.promotions),
            ("set_failure", t.set_failures),
            ("backend_error", t.backend_errors),
        ] {
            tier_ops.with_label_values(&[tier, outcome]).inc_by(value);
        }
    }

    let provider_ops = counter_vec(
        &registry,
        "suggestor_provider_calls_total",
        "Provider gateway invocations by status",
        &["status"],
    )?;
    for (status, value) in [
        ("invoked", snapshot.provider_calls),
        ("timeout", snapshot.provider_timeouts),
        ("error", snapshot.provider_errors),
        ("cached", snapshot.provider_cache_hits),
    ] {
        provider_ops.with_label_values(&[status]).inc_by(value);
    }

    let prefetch_ops = counter_vec(
        &registry,
        "suggestor_prefetch_total",
        "Prefetcher activity",
        &["event"],
    )?;
    for (event, value) in [
        ("run", snapshot.prefetch_runs),
        ("scheduled", snapshot.prefetch_scheduled),
        ("succeeded", snapshot.prefetch_succeeded),
        ("failed", snapshot.prefetch_failed),
    ] {
        prefetch_ops.with_label_values(&[event]).inc_by(value);
    }

    let hit_ratio = Gauge::new("suggestor_cache_hit_ratio", "Share of lookups served by any tier").map_err(prom_err)?;
    hit_ratio.set(snapshot.hit_ratio);
    registry.register(Box::new(hit_ratio)).map_err(prom_err)?;

    gauge(&registry, "suggestor_suggest_calls", "Suggest calls served", snapshot.suggest_calls)?;
    gauge(
        &registry,
        "suggestor_suggest_cache_hits",
        "Suggest calls answered from cache",
        snapshot.suggest_cache_hits,
    )?;
    gauge(
        &registry,
        "suggestor_suggest_latency_microseconds",
        "Moving average suggest latency",
        snapshot.suggest_latency_us,
    )?;
    gauge(
        &registry,
        "suggestor_oversize_skips",
        "Entries not cached because they exceed the placement budget",
        snapshot.oversize_skips,
    )?;

    let sizes = IntGaugeVec::new(
        Opts::new("suggestor_tier_bytes", "Tier bytes by kind"),
        &["tier", "kind"],
    )
    .map_err(prom_err)?;
    registry.register(Box::new(sizes.clone())).map_err(prom_err)?;
    for stats in tier_stats {
        let tier = stats.tier.as_str();
        sizes.with_label_values(&[tier, "used"]).set(stats.size_bytes as i64);
        sizes.with_label_values(&[tier, "capacity"]).set(stats.capacity_bytes as i64);
    }

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer).map_err(prom_err)?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("Non-UTF8 metrics output: {}", e)))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_counters() {
        let metrics = EngineMetrics::new();
        metrics.record_hit(TierId::Memory);
        metrics.record_hit(TierId::Memory);
        metrics.record_miss(TierId::Memory);
        metrics.record_hit(TierId::Embedded);
        metrics.record_evictions(TierId::Embedded, 3);

        let snapshot = metrics.snapshot();
        let memory = snapshot.tier(TierId::Memory).unwrap();
        assert_eq!(memory.hits, 2);
        assert_eq!(memory.misses, 1);
        let embedded = snapshot.tier(TierId::Embedded).unwrap();
        assert_eq!(embedded.hits, 1);
        assert_eq!(embedded.evictions, 3);
    }

    #[test]
    fn test_overall_hit_ratio() {
        let metrics = EngineMetrics::new();
        assert_eq!(metrics.overall_hit_ratio(), 0.0);

        // hit at L1; miss at L1 then hit at L2; miss everywhere
        metrics.record_hit(TierId::Memory);
        metrics.record_miss(TierId::Memory);
        metrics.record_hit(TierId::Embedded);
        metrics.record_miss(TierId::Memory);
        metrics.record_miss(TierId::Embedded);
        metrics.record_lookup_miss();

        // 2 hits over 3 lookups
        assert!((metrics.overall_hit_ratio() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_suggest_latency_ema() {
        let metrics = EngineMetrics::new();
        metrics.record_suggest(Duration::from_micros(100), false);
        assert_eq!(metrics.snapshot().suggest_latency_us, 100);
        metrics.record_suggest(Duration::from_micros(200), true);
        // EMA should smooth values
        assert_eq!(metrics.snapshot().suggest_latency_us, 110);
        assert_eq!(metrics.snapshot().suggest_cache_hits, 1);
    }

    #[test]
    fn test_prefetch_counters() {
        let metrics = EngineMetrics::new();
        metrics.record_prefetch_run(3);
        metrics.record_prefetch_result(true);
        metrics.record_prefetch_result(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.prefetch_runs, 1);
        assert_eq!(snapshot.prefetch_scheduled, 3);
        assert_eq!(snapshot.prefetch_succeeded, 1);
        assert_eq!(snapshot.prefetch_failed, 1);
    }

    #[test]
    fn test_render_prometheus() {
        let metrics = EngineMetrics::new();
        metrics.record_hit(TierId::Memory);
        metrics.record_provider_timeout();

        let stats = vec![TierStats {
            tier: TierId::Memory,
            size_bytes: 42,
            capacity_bytes: 100,
            entries: 1,
        }];
        let text = render_prometheus(&metrics.snapshot(), &stats).unwrap();
        assert!(text.contains("suggestor_tier_operations_total{outcome=\"hit\",tier=\"memory\"} 1"));
        assert!(text.contains("suggestor_provider_calls_total{status=\"timeout\"} 1"));
        assert!(text.contains("suggestor_tier_bytes{kind=\"used\",tier=\"memory\"} 42"));
        assert!(text.contains("suggestor_cache_hit_ratio 1"));
    }
}
