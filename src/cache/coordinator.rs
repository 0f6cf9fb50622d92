//! Cache Coordinator - Unified Multi-Tier Cache
//!
//! Looks entries up fastest tier first, promotes hits into the faster tiers
//! that missed, and inserts with capacity-aware eviction. Tier failures are
//! contained here: a failing tier reads as a miss and writes as a skip.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use super::entry::{now_millis, CacheEntry};
use super::eviction::EvictionPolicy;
use super::memory::MemoryTier;
use super::placement::{ContentType, PlacementTable};
use super::store::InMemoryKvStore;
use super::store_tier::StoreTier;
use super::tier::{TierBackend, TierId, TierStats};
use crate::error::Result;
use crate::metrics::EngineMetrics;

/// Cache lookup result
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub payload: Bytes,
    /// Which tier served the hit
    pub tier: TierId,
}

/// Outcome of a best-effort insertion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetReport {
    pub written: Vec<TierId>,
    pub skipped: Vec<TierId>,
}

impl SetReport {
    pub fn is_cached(&self) -> bool {
        !self.written.is_empty()
    }
}

/// Unified cache coordinator
pub struct CacheCoordinator {
    tiers: BTreeMap<TierId, Arc<dyn TierBackend>>,
    placement: PlacementTable,
    eviction: EvictionPolicy,
    metrics: Arc<EngineMetrics>,
}

impl CacheCoordinator {
    /// Create a coordinator over the given backends
    ///
    /// Strategies referencing a tier with no backend simply skip it.
    pub fn new(
        backends: Vec<Arc<dyn TierBackend>>,
        placement: PlacementTable,
        eviction: EvictionPolicy,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let tiers: BTreeMap<_, _> = backends.into_iter().map(|b| (b.id(), b)).collect();

        for tier in placement.referenced_tiers() {
            if !tiers.contains_key(&tier) {
                warn!("Placement references tier {} but no backend is configured", tier);
            }
        }

        Self {
            tiers,
            placement,
            eviction,
            metrics,
        }
    }

    /// All four tiers in process memory, each with the same capacity (for testing)
    pub fn in_memory(capacity_per_tier: u64) -> Self {
        let mut backends: Vec<Arc<dyn TierBackend>> = vec![Arc::new(MemoryTier::new(capacity_per_tier))];
        for tier in [TierId::Embedded, TierId::Persistent, TierId::Network] {
            backends.push(Arc::new(StoreTier::new(
                tier,
                Arc::new(InMemoryKvStore::new()),
                capacity_per_tier,
            )));
        }
        Self::new(
            backends,
            PlacementTable::default(),
            EvictionPolicy::default(),
            Arc::new(EngineMetrics::new()),
        )
    }

    pub fn placement(&self) -> &PlacementTable {
        &self.placement
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Backend for one tier, if configured
    pub fn tier(&self, id: TierId) -> Option<&Arc<dyn TierBackend>> {
        self.tiers.get(&id)
    }

    fn backends_for(&self, content_type: ContentType) -> Vec<&Arc<dyn TierBackend>> {
        self.placement
            .strategy_for(content_type)
            .tiers
            .iter()
            .filter_map(|id| self.tiers.get(id))
            .collect()
    }

    /// Get a payload, searching the content type's tiers fastest first
    pub async fn get(&self, key: &str, content_type: ContentType) -> Option<Bytes> {
        self.lookup(key, content_type).await.map(|hit| hit.payload)
    }

    /// Like [`get`](Self::get), also reporting the serving tier
    #[instrument(skip(self), fields(content_type = %content_type))]
    pub async fn lookup(&self, key: &str, content_type: ContentType) -> Option<CacheLookup> {
        let now = now_millis();
        let mut missed: Vec<&Arc<dyn TierBackend>> = Vec::new();

        for backend in self.backends_for(content_type) {
            let tier = backend.id();
            match backend.get(key).await {
                Ok(Some(entry)) if entry.is_expired_at(now) => {
                    self.metrics.record_miss(tier);
                    self.remove_expired(backend.as_ref(), key).await;
                    missed.push(backend);
                }
                Ok(Some(entry)) => {
                    entry.record_access();
                    self.metrics.record_hit(tier);
                    debug!("Hit for {} in {}", key, tier);

                    if !missed.is_empty() {
                        self.promote(&entry, &missed).await;
                    }
                    return Some(CacheLookup {
                        payload: entry.payload().clone(),
                        tier,
                    });
                }
                Ok(None) => {
                    self.metrics.record_miss(tier);
                    missed.push(backend);
                }
                Err(e) => {
                    warn!("Tier {} read failed for {}, treating as miss: {}", tier, key, e);
                    self.metrics.record_backend_error(tier);
                    self.metrics.record_miss(tier);
                    missed.push(backend);
                }
            }
        }

        self.metrics.record_lookup_miss();
        None
    }

    /// Whether a fresh entry exists in any eligible tier
    ///
    /// Does not record access, promote, or count hits.
    pub async fn contains_fresh(&self, key: &str, content_type: ContentType) -> bool {
        let now = now_millis();
        for backend in self.backends_for(content_type) {
            if let Ok(Some(entry)) = backend.get(key).await {
                if !entry.is_expired_at(now) {
                    return true;
                }
            }
        }
        false
    }

    /// Copy a hit into the faster tiers that missed it
    ///
    /// Best effort: no eviction is attempted and failures are only logged.
    async fn promote(&self, entry: &CacheEntry, targets: &[&Arc<dyn TierBackend>]) {
        let results = join_all(targets.iter().map(|backend| async move {
            (backend.id(), backend.set(entry.clone()).await)
        }))
        .await;

        for (tier, result) in results {
            match result {
                Ok(()) => {
                    self.metrics.record_promotion(tier);
                    debug!("Promoted {} into {}", entry.key(), tier);
                }
                Err(e) => debug!("Promotion of {} into {} skipped: {}", entry.key(), tier, e),
            }
        }
    }

    async fn remove_expired(&self, backend: &dyn TierBackend, key: &str) {
        match backend.delete(key).await {
            Ok(true) => self.metrics.record_expired_removals(1),
            Ok(false) => {}
            Err(e) => {
                warn!("Failed to remove expired {} from {}: {}", key, backend.id(), e);
                self.metrics.record_backend_error(backend.id());
            }
        }
    }

    /// Insert a payload into every tier of the content type's strategy
    ///
    /// Never fails: tiers that cannot take the entry are reported as skipped.
    #[instrument(skip(self, payload), fields(content_type = %content_type, size = payload.len()))]
    pub async fn set(&self, key: &str, content_type: ContentType, payload: Bytes) -> SetReport {
        let strategy = self.placement.strategy_for(content_type);
        let mut report = SetReport::default();

        let size = payload.len() as u64;
        if size > strategy.max_entry_bytes {
            warn!(
                "Not caching {}: {} bytes exceeds the {} budget of {} bytes",
                key, size, content_type, strategy.max_entry_bytes
            );
            self.metrics.record_oversize_skip();
            report.skipped = strategy.tiers.clone();
            return report;
        }

        let entry = CacheEntry::new(key, payload, strategy.ttl_seconds, strategy.priority_hint);

        for &tier in &strategy.tiers {
            let Some(backend) = self.tiers.get(&tier) else {
                report.skipped.push(tier);
                continue;
            };
            match self.store_in(backend.as_ref(), entry.clone()).await {
                Ok(()) => report.written.push(tier),
                Err(e) => {
                    warn!("Skipping tier {} for {}: {}", tier, key, e);
                    self.metrics.record_set_failure(tier);
                    report.skipped.push(tier);
                }
            }
        }

        report
    }

    /// Set with one eviction-and-retry on capacity failure
    async fn store_in(&self, backend: &dyn TierBackend, entry: CacheEntry) -> Result<()> {
        let tier = backend.id();
        match backend.set(entry.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_capacity() => {
                debug!("{} full for {}: {}", tier, entry.key(), e);
            }
            Err(e) => {
                self.metrics.record_backend_error(tier);
                return Err(e);
            }
        }

        if entry.size_bytes() > backend.capacity_bytes() {
            return backend.set(entry).await;
        }
        self.evict(backend, entry.size_bytes()).await;

        backend.set(entry).await.inspect_err(|e| {
            if !e.is_capacity() {
                self.metrics.record_backend_error(tier);
            }
        })
    }

    /// Evict from one tier until at least `bytes_needed` has been freed
    async fn evict(&self, backend: &dyn TierBackend, bytes_needed: u64) {
        let tier = backend.id();
        let plan = self.eviction.plan(backend.candidates(), bytes_needed, now_millis());
        if !plan.satisfied {
            debug!("{} cannot free {} bytes; evicting all candidates", tier, bytes_needed);
        }

        let mut evicted = 0;
        for victim in &plan.victims {
            match backend.delete(victim).await {
                Ok(true) => evicted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Eviction of {} from {} failed: {}", victim, tier, e);
                    self.metrics.record_backend_error(tier);
                }
            }
        }

        self.metrics.record_evictions(tier, evicted);
        info!(
            "Evicted {} entries ({} bytes planned) from {} to free {} bytes",
            evicted, plan.bytes_freed, tier, bytes_needed
        );
    }

    /// Remove a key from every configured tier
    ///
    /// Returns whether any tier held it.
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> bool {
        let mut deleted = false;
        for backend in self.tiers.values() {
            match backend.delete(key).await {
                Ok(removed) => deleted |= removed,
                Err(e) => {
                    warn!("Delete of {} from {} failed: {}", key, backend.id(), e);
                    self.metrics.record_backend_error(backend.id());
                }
            }
        }
        deleted
    }

    /// Sweep every tier for expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> u64 {
        let mut removed = 0;
        for backend in self.tiers.values() {
            for candidate in backend.candidates().into_iter().filter(|c| c.expired) {
                match backend.delete(&candidate.key).await {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Purge of {} from {} failed: {}", candidate.key, backend.id(), e);
                        self.metrics.record_backend_error(backend.id());
                    }
                }
            }
        }
        if removed > 0 {
            self.metrics.record_expired_removals(removed);
            info!("Purged {} expired entries", removed);
        }
        removed
    }

    /// Per-tier size report
    pub fn stats(&self) -> Vec<TierStats> {
        self.tiers
            .values()
            .map(|b| TierStats {
                tier: b.id(),
                size_bytes: b.current_size_bytes(),
                capacity_bytes: b.capacity_bytes(),
                entries: b.len(),
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
