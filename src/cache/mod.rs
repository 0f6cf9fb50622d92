//! Multi-Tier Suggestion Cache
//!
//! Four tiers of increasing capacity and latency behind one uniform
//! contract, coordinated by [`CacheCoordinator`]:
//!
//! - **L1 (memory)**: sharded in-process map
//! - **L2 (embedded)**: local structured store
//! - **L3 (persistent)**: durable key-value store
//! - **L4 (network)**: network-fronted cache
//!
//! # Architecture
//!
//! ```text
//!                ┌────────────────────────────┐
//!   get/set ───▶ │      CacheCoordinator      │ ◀── PlacementTable
//!                │  lookup · promote · evict  │ ◀── EvictionPolicy
//!                └─────────────┬──────────────┘
//!          ┌──────────┬────────┴─────┬──────────────┐
//!          ▼          ▼              ▼              ▼
//!     MemoryTier  StoreTier     StoreTier      StoreTier
//!       (L1)     (L2, KvStore) (L3, KvStore)  (L4, KvStore)
//! ```

pub mod coordinator;
pub mod entry;
pub mod eviction;
pub mod memory;
pub mod placement;
pub mod shard;
pub mod store;
pub mod store_tier;
pub mod tier;

pub use coordinator::{CacheCoordinator, CacheLookup, SetReport};
pub use entry::{derive_key, CacheEntry, EntryMetadata};
pub use eviction::{EvictionCandidate, EvictionPlan, EvictionPolicy};
pub use memory::MemoryTier;
pub use placement::{ContentType, PlacementStrategy, PlacementTable};
pub use store::{FileKvStore, HttpKvStore, InMemoryKvStore, KvStore};
pub use store_tier::{StoreTier, DEFAULT_STORE_TIMEOUT};
pub use tier::{TierBackend, TierId, TierStats};
