//! Tier identity and the uniform backend contract
//!
//! Every tier exposes the same per-key get/set/delete surface plus size
//! accounting. Backends never evict on their own: a `set` that does not fit
//! fails with [`Error::CapacityExceeded`](crate::error::Error::CapacityExceeded)
//! and the coordinator decides what to remove.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::entry::{now_millis, CacheEntry};
use super::eviction::EvictionCandidate;
use crate::error::Result;

/// Cache tier, ordered fastest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TierId {
    /// L1 - in-process memory
    Memory,
    /// L2 - structured embedded store
    Embedded,
    /// L3 - enhanced persistent key-value store
    Persistent,
    /// L4 - network-fronted cache
    Network,
}

impl TierId {
    /// All tiers, fastest first
    pub const ALL: [TierId; 4] = [
        TierId::Memory,
        TierId::Embedded,
        TierId::Persistent,
        TierId::Network,
    ];

    /// Zero-based level (0 = fastest)
    #[inline]
    pub fn index(self) -> usize {
        match self {
            TierId::Memory => 0,
            TierId::Embedded => 1,
            TierId::Persistent => 2,
            TierId::Network => 3,
        }
    }

    /// Stable lowercase name used in logs and metric labels
    pub fn as_str(self) -> &'static str {
        match self {
            TierId::Memory => "memory",
            TierId::Embedded => "embedded",
            TierId::Persistent => "persistent",
            TierId::Network => "network",
        }
    }
}

impl std::fmt::Display for TierId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierId::Memory => write!(f, "L1 (memory)"),
            TierId::Embedded => write!(f, "L2 (embedded)"),
            TierId::Persistent => write!(f, "L3 (persistent)"),
            TierId::Network => write!(f, "L4 (network)"),
        }
    }
}

/// Uniform key/value contract implemented by every tier
#[async_trait]
pub trait TierBackend: Send + Sync {
    /// Which tier this backend serves
    fn id(&self) -> TierId;

    /// Fetch an entry; expiry is the caller's concern
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Store an entry atomically, replacing any previous value for its key
    async fn set(&self, entry: CacheEntry) -> Result<()>;

    /// Remove an entry, returning whether it was present
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Bytes currently accounted to this tier
    fn current_size_bytes(&self) -> u64;

    /// Configured capacity in bytes
    fn capacity_bytes(&self) -> u64;

    /// Number of entries held
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Metadata for every held entry, used to plan evictions
    fn candidates(&self) -> Vec<EvictionCandidate>;
}

/// Build a candidate record from an entry
pub(crate) fn candidate_from(key: &str, entry_meta: &super::entry::EntryMetadata) -> EvictionCandidate {
    EvictionCandidate {
        key: key.to_string(),
        size_bytes: entry_meta.size_bytes(),
        access_count: entry_meta.access_count(),
        last_access_ms: entry_meta.last_access_ms(),
        priority_hint: entry_meta.priority_hint(),
        expired: entry_meta.is_expired_at(now_millis()),
    }
}

/// Point-in-time size report for one tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStats {
    pub tier: TierId,
    pub size_bytes: u64,
    pub capacity_bytes: u64,
    pub entries: usize,
}

// =============================================================================
// Tests
// =============================================================================
