//! L2-L4 Tiers over a byte-oriented store
//!
//! Entries are encoded into a self-describing envelope so metadata survives
//! a restart. A local metadata index tracks sizes for capacity accounting and
//! eviction planning without touching the store. No lock is held across a
//! store call.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::entry::{CacheEntry, EntryMetadata};
use super::eviction::EvictionCandidate;
use super::store::KvStore;
use super::tier::{candidate_from, TierBackend, TierId};
use crate::error::{Error, Result};

/// Default internal timeout for a single store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

/// Tier backed by a [`KvStore`]
pub struct StoreTier {
    id: TierId,
    store: Arc<dyn KvStore>,
    capacity: u64,
    timeout: Duration,
    index: DashMap<String, Arc<EntryMetadata>>,
    current_size: AtomicU64,
}

impl StoreTier {
    pub fn new(id: TierId, store: Arc<dyn KvStore>, capacity: u64) -> Self {
        Self {
            id,
            store,
            capacity,
            timeout: DEFAULT_STORE_TIMEOUT,
            index: DashMap::new(),
            current_size: AtomicU64::new(0),
        }
    }

    /// Override the internal per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a store call under the tier timeout, classifying failures
    async fn guarded<T>(&self, op: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::BackendUnavailable {
                tier: self.id,
                reason: format!("{} {}: {}", self.store.name(), op, e),
            }),
            Err(_) => Err(Error::BackendTimeout {
                tier: self.id,
                timeout: self.timeout,
            }),
        }
    }

    fn reserve(&self, bytes: u64) -> Result<Reservation<'_>> {
        self.current_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(bytes)
                    .filter(|next| *next <= self.capacity)
            })
            .map(|_| Reservation { tier: self, bytes })
            .map_err(|current| Error::CapacityExceeded {
                tier: self.id,
                requested: bytes,
                available: self.capacity.saturating_sub(current),
            })
    }

    fn release(&self, bytes: u64) {
        self.current_size.fetch_sub(bytes, Ordering::AcqRel);
    }

    /// Rebuild the metadata index from whatever the store already holds
    ///
    /// Returns the number of entries indexed. Undecodable values are skipped.
    pub async fn warm_index(&self) -> Result<usize> {
        let keys = self.guarded("keys", self.store.keys()).await?;
        let mut indexed = 0;

        for key in keys {
            let raw = match self.guarded("get", self.store.get(&key)).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping {} while warming {}: {}", key, self.id, e);
                    continue;
                }
            };
            match CacheEntry::decode(&raw) {
                Ok(entry) => {
                    let size = entry.size_bytes();
                    if let Some(old) = self.index.insert(key, entry.metadata.clone()) {
                        self.release(old.size_bytes());
                    }
                    self.current_size.fetch_add(size, Ordering::AcqRel);
                    indexed += 1;
                }
                Err(e) => warn!("Skipping undecodable entry {} in {}: {}", key, self.id, e),
            }
        }

        info!(
            "Warmed {} index: {} entries, {} bytes",
            self.id,
            indexed,
            self.current_size_bytes()
        );
        Ok(indexed)
    }
}

/// Bytes held for an in-flight write, handed back unless committed
///
/// Covers both a failed put and a caller that stops polling mid-write.
struct Reservation<'a> {
    tier: &'a StoreTier,
    bytes: u64,
}

impl Reservation<'_> {
    fn commit(mut self) -> u64 {
        std::mem::take(&mut self.bytes)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.tier.release(self.bytes);
        }
    }
}

#[async_trait]
impl TierBackend for StoreTier {
    fn id(&self) -> TierId {
        self.id
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let Some(raw) = self.guarded("get", self.store.get(key)).await? else {
            return Ok(None);
        };
        let decoded = CacheEntry::decode(&raw)?;

        // Share live counters with the index so accesses feed eviction scoring
        match self.index.get(key) {
            Some(meta) => Ok(Some(CacheEntry::with_metadata(
                key,
                decoded.payload().clone(),
                meta.value().clone(),
            ))),
            None => Ok(Some(decoded)),
        }
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        let size = entry.size_bytes();
        let raw = entry.encode()?;

        // Replacing a key only needs room for the growth
        let indexed = self.index.get(entry.key()).map(|m| m.size_bytes()).unwrap_or(0);
        let reservation = self.reserve(size.saturating_sub(indexed))?;
        self.guarded("put", self.store.put(entry.key(), raw)).await?;
        let reserved = reservation.commit();

        let previous = self
            .index
            .insert(entry.key().to_string(), entry.metadata.clone())
            .map(|m| m.size_bytes())
            .unwrap_or(0);

        // Settle against whatever the index actually held at insert time
        let settled = reserved + previous;
        if settled > size {
            self.release(settled - size);
        } else if size > settled {
            self.current_size.fetch_add(size - settled, Ordering::AcqRel);
        }
        debug!("Stored {} ({} bytes) in {}", entry.key(), size, self.id);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.guarded("delete", self.store.delete(key)).await?;
        let indexed = match self.index.remove(key) {
            Some((_, meta)) => {
                self.release(meta.size_bytes());
                true
            }
            None => false,
        };
        Ok(existed || indexed)
    }

    fn current_size_bytes(&self) -> u64 {
        self.current_size.load(Ordering::Acquire)
    }

    fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn candidates(&self) -> Vec<EvictionCandidate> {
        self.index
            .iter()
            .map(|item| candidate_from(item.key(), item.value()))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
