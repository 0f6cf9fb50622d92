//! L1 Tier - In-Process Memory
//!
//! Lowest-latency tier backed by a sharded map. Byte accounting is updated
//! under the owning shard's write lock, so a capacity check and the insert it
//! admits cannot be split by a concurrent writer to the same key.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::entry::CacheEntry;
use super::eviction::EvictionCandidate;
use super::shard::ShardedMap;
use super::tier::{candidate_from, TierBackend, TierId};
use crate::error::{Error, Result};

/// Memory tier
pub struct MemoryTier {
    storage: ShardedMap<CacheEntry>,
    capacity: u64,
    current_size: AtomicU64,
}

impl MemoryTier {
    /// Create a memory tier with the given byte capacity
    pub fn new(capacity: u64) -> Self {
        Self {
            storage: ShardedMap::new(),
            capacity,
            current_size: AtomicU64::new(0),
        }
    }

    /// Reserve `bytes` against capacity, failing without side effects
    fn reserve(&self, bytes: u64) -> Result<()> {
        self.current_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(bytes)
                    .filter(|next| *next <= self.capacity)
            })
            .map(|_| ())
            .map_err(|current| Error::CapacityExceeded {
                tier: TierId::Memory,
                requested: bytes,
                available: self.capacity.saturating_sub(current),
            })
    }

    fn release(&self, bytes: u64) {
        self.current_size.fetch_sub(bytes, Ordering::AcqRel);
    }
}

#[async_trait]
impl TierBackend for MemoryTier {
    fn id(&self) -> TierId {
        TierId::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.storage.get(key))
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        let size = entry.size_bytes();
        let mut freed = 0;

        self.storage.insert_with(entry.key().to_string(), entry, |previous| {
            let old_size = previous.map(|e| e.size_bytes()).unwrap_or(0);
            if size > old_size {
                self.reserve(size - old_size)
            } else {
                freed = old_size - size;
                Ok(())
            }
        })?;

        if freed > 0 {
            self.release(freed);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match self.storage.remove(key) {
            Some(entry) => {
                self.release(entry.size_bytes());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn current_size_bytes(&self) -> u64 {
        self.current_size.load(Ordering::Acquire)
    }

    fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    fn len(&self) -> usize {
        self.storage.len()
    }

    fn candidates(&self) -> Vec<EvictionCandidate> {
        self.storage
            .entries()
            .iter()
            .map(|(key, entry)| candidate_from(key, &entry.metadata))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use bytes::Bytes;

    fn make_entry(key: &str, size: usize) -> CacheEntry {
        CacheEntry::new(key, Bytes::from(vec![0u8; size]), 60, 1.0)
    }

    #[tokio::test]
    async fn test_put_get() {
        let tier = MemoryTier::new(1024);
        tier.set(make_entry("a", 100)).await.unwrap();

        let entry = tier.get("a").await.unwrap().unwrap();
        assert_eq!(entry.size_bytes(), 100);
        assert_eq!(tier.current_size_bytes(), 100);
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_exceeded_is_reported_not_evicted() {
        let tier = MemoryTier::new(250);
        tier.set(make_entry("a", 100)).await.unwrap();
        tier.set(make_entry("b", 100)).await.unwrap();

        let err = tier.set(make_entry("c", 100)).await.unwrap_err();
        assert_matches!(err, Error::CapacityExceeded { tier: TierId::Memory, requested: 100, available: 50 });

        // Nothing was evicted on our behalf
        assert_eq!(tier.len(), 2);
        assert_eq!(tier.current_size_bytes(), 200);
    }

    #[tokio::test]
    async fn test_replace_accounts_for_delta() {
        let tier = MemoryTier::new(300);
        tier.set(make_entry("a", 200)).await.unwrap();
        // Growing in place only needs the delta
        tier.set(make_entry("a", 280)).await.unwrap();
        assert_eq!(tier.current_size_bytes(), 280);
        tier.set(make_entry("a", 50)).await.unwrap();
        assert_eq!(tier.current_size_bytes(), 50);
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_releases_space() {
        let tier = MemoryTier::new(1024);
        tier.set(make_entry("a", 512)).await.unwrap();
        assert!(tier.delete("a").await.unwrap());
        assert!(!tier.delete("a").await.unwrap());
        assert_eq!(tier.current_size_bytes(), 0);
        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn test_candidates_reflect_access() {
        let tier = MemoryTier::new(1024);
        tier.set(make_entry("a", 10)).await.unwrap();
        let entry = tier.get("a").await.unwrap().unwrap();
        entry.record_access();

        let candidates = tier.candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].access_count, 1);
        assert_eq!(candidates[0].size_bytes, 10);
    }

    #[tokio::test]
    async fn test_concurrent_writers_never_exceed_capacity() {
        use std::sync::Arc;
        use tokio::task::JoinSet;

        let tier = Arc::new(MemoryTier::new(1000));
        let mut join_set = JoinSet::new();
        for i in 0..50 {
            let tier = tier.clone();
            join_set.spawn(async move { tier.set(make_entry(&format!("k{}", i), 100)).await });
        }
        let mut ok = 0;
        while let Some(res) = join_set.join_next().await {
            if res.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 10);
        assert_eq!(tier.current_size_bytes(), 1000);
    }
}
