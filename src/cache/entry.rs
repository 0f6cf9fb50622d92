//! Cache Entry Types
//!
//! A cached entry is an opaque payload plus metadata used for expiry and
//! eviction scoring. Metadata counters are shared (`Arc`) between clones so
//! that an entry promoted into a faster tier keeps a single access history.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Milliseconds since the Unix epoch
#[inline]
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Fast non-cryptographic hash (FxHash algorithm)
#[inline]
pub fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

/// Build a cache key `prefix:<hash>` from the given identity parts
///
/// Parts are joined with a unit separator so `("ab", "c")` and `("a", "bc")`
/// never collide by construction.
pub fn derive_key(prefix: &str, parts: &[&str]) -> String {
    let joined = parts.join("\u{1f}");
    format!("{}:{:016x}", prefix, fx_hash(joined.as_bytes()))
}

/// Metadata for cache entries
#[derive(Debug)]
pub struct EntryMetadata {
    /// Payload size in bytes (fixed at insertion)
    size_bytes: u64,
    /// Creation timestamp (epoch millis)
    created_at_ms: u64,
    /// Last access timestamp (epoch millis)
    last_access_ms: AtomicU64,
    /// Access count for frequency-based eviction
    access_count: AtomicU64,
    /// TTL in seconds (0 = no expiry)
    ttl_seconds: u64,
    /// Eviction tie-breaker copied from the placement strategy
    priority_hint: f64,
}

impl EntryMetadata {
    /// Create new entry metadata stamped with the current time
    pub fn new(size_bytes: u64, ttl_seconds: u64, priority_hint: f64) -> Self {
        let now = now_millis();
        Self {
            size_bytes,
            created_at_ms: now,
            last_access_ms: AtomicU64::new(now),
            access_count: AtomicU64::new(0),
            ttl_seconds,
            priority_hint,
        }
    }

    /// Rebuild metadata from a persisted snapshot
    pub fn restore(snapshot: &MetadataSnapshot) -> Self {
        Self {
            size_bytes: snapshot.size_bytes,
            created_at_ms: snapshot.created_at_ms,
            last_access_ms: AtomicU64::new(snapshot.last_access_ms),
            access_count: AtomicU64::new(snapshot.access_count),
            ttl_seconds: snapshot.ttl_seconds,
            priority_hint: snapshot.priority_hint,
        }
    }

    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    #[inline]
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    #[inline]
    pub fn last_access_ms(&self) -> u64 {
        self.last_access_ms.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    #[inline]
    pub fn priority_hint(&self) -> f64 {
        self.priority_hint
    }

    /// Record an access and return the new count
    #[inline]
    pub fn record_access(&self) -> u64 {
        self.last_access_ms.store(now_millis(), Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Check expiry against an explicit clock reading
    #[inline]
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        if self.ttl_seconds == 0 {
            return false;
        }
        now_ms.saturating_sub(self.created_at_ms) > self.ttl_seconds * 1000
    }

    /// Check if entry has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Serializable copy of the current counters
    pub fn snapshot(&self) -> MetadataSnapshot {
        MetadataSnapshot {
            size_bytes: self.size_bytes,
            created_at_ms: self.created_at_ms,
            last_access_ms: self.last_access_ms(),
            access_count: self.access_count(),
            ttl_seconds: self.ttl_seconds,
            priority_hint: self.priority_hint,
        }
    }
}

/// Plain-data form of [`EntryMetadata`] for persistent tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    pub size_bytes: u64,
    pub created_at_ms: u64,
    pub last_access_ms: u64,
    pub access_count: u64,
    pub ttl_seconds: u64,
    pub priority_hint: f64,
}

/// On-disk / on-wire envelope used by byte-oriented tiers
#[derive(Serialize, Deserialize)]
struct EntryEnvelope {
    key: String,
    meta: MetadataSnapshot,
    payload: Vec<u8>,
}

/// Cache entry containing a payload and shared metadata
#[derive(Clone)]
pub struct CacheEntry {
    key: String,
    payload: Bytes,
    /// Entry metadata (shared across tier copies)
    pub metadata: Arc<EntryMetadata>,
}

impl CacheEntry {
    /// Create a new cache entry; size is taken from the payload length
    pub fn new(key: impl Into<String>, payload: Bytes, ttl_seconds: u64, priority_hint: f64) -> Self {
        let metadata = EntryMetadata::new(payload.len() as u64, ttl_seconds, priority_hint);
        Self {
            key: key.into(),
            payload,
            metadata: Arc::new(metadata),
        }
    }

    /// Create with existing metadata (for cache tier transfers)
    pub fn with_metadata(key: impl Into<String>, payload: Bytes, metadata: Arc<EntryMetadata>) -> Self {
        Self {
            key: key.into(),
            payload,
            metadata,
        }
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get payload (zero-copy)
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.metadata.size_bytes()
    }

    #[inline]
    pub fn record_access(&self) -> u64 {
        self.metadata.record_access()
    }

    #[inline]
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.metadata.is_expired_at(now_ms)
    }

    /// Encode payload and metadata into one byte buffer
    pub fn encode(&self) -> Result<Bytes> {
        let envelope = EntryEnvelope {
            key: self.key.clone(),
            meta: self.metadata.snapshot(),
            payload: self.payload.to_vec(),
        };
        Ok(Bytes::from(serde_json::to_vec(&envelope)?))
    }

    /// Decode an envelope produced by [`CacheEntry::encode`]
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let envelope: EntryEnvelope = serde_json::from_slice(raw)?;
        Ok(Self {
            key: envelope.key,
            payload: Bytes::from(envelope.payload),
            metadata: Arc::new(EntryMetadata::restore(&envelope.meta)),
        })
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("size", &self.metadata.size_bytes())
            .field("access_count", &self.metadata.access_count())
            .field("is_expired", &self.metadata.is_expired())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
