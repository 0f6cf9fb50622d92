//! Sharded Map Implementation
//!
//! Concurrent string-keyed map split across `N` shards, each behind its own
//! `RwLock`, so operations on different keys rarely contend while operations
//! on the same key are serialized by that key's shard lock.

use parking_lot::RwLock;
use std::collections::HashMap;

use super::entry::fx_hash;

/// Single shard
pub struct Shard<V> {
    map: RwLock<HashMap<String, V>>,
}

impl<V> Default for Shard<V> {
    fn default() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

/// Sharded map with configurable shard count
pub struct ShardedMap<V, const N: usize = 64> {
    shards: Vec<Shard<V>>,
}

impl<V, const N: usize> Default for ShardedMap<V, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, const N: usize> ShardedMap<V, N> {
    /// Create a new sharded map
    pub fn new() -> Self {
        assert!(N.is_power_of_two(), "shard count must be a power of two");
        Self {
            shards: (0..N).map(|_| Shard::default()).collect(),
        }
    }

    #[inline]
    fn shard(&self, key: &str) -> &Shard<V> {
        // Power of 2 enables fast modulo via bitwise AND
        &self.shards[(fx_hash(key.as_bytes()) as usize) & (N - 1)]
    }

    /// Get a clone of the value stored under `key`
    pub fn get(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        self.shard(key).map.read().get(key).cloned()
    }

    /// Check if a key exists
    pub fn contains_key(&self, key: &str) -> bool {
        self.shard(key).map.read().contains_key(key)
    }

    /// Insert under the shard write lock after `admit` approves the replacement
    ///
    /// `admit` sees the current value (if any) and may veto the write; the
    /// check and the insert happen under one lock acquisition.
    pub fn insert_with<E>(
        &self,
        key: String,
        value: V,
        admit: impl FnOnce(Option<&V>) -> Result<(), E>,
    ) -> Result<Option<V>, E> {
        let mut guard = self.shard(&key).map.write();
        admit(guard.get(&key))?;
        Ok(guard.insert(key, value))
    }

    /// Remove a value, returning it if present
    pub fn remove(&self, key: &str) -> Option<V> {
        self.shard(key).map.write().remove(key)
    }

    /// Snapshot of all entries
    pub fn entries(&self) -> Vec<(String, V)>
    where
        V: Clone,
    {
        self.shards
            .iter()
            .flat_map(|s| {
                let guard = s.map.read();
                guard
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Total number of entries across shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.map.read().is_empty())
    }
}

// =============================================================================
// Tests
// =============================================================================
