//! Suggestor - Adaptive Suggestion Cache and Aggregation Engine
//!
//! Serves ranked text suggestions merged from several external lookup
//! providers, behind a four-tier cache that places content by type, evicts
//! by score and prefetches what it expects to be asked next.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        SuggestionEngine                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐        │
//! │  │  Aggregator  │───▶│   Provider   │───▶│   Lookup     │        │
//! │  │   (rank)     │    │   Gateways   │    │  Providers   │        │
//! │  └──────┬───────┘    └──────┬───────┘    └──────────────┘        │
//! │         ▼                   ▼                                     │
//! │  ┌──────────────────────────────────┐    ┌──────────────┐        │
//! │  │        Cache Coordinator         │◀───│  Prefetcher  │        │
//! │  │   L1 memory → L2 → L3 → L4       │    │  (predict)   │        │
//! │  └──────────────────────────────────┘    └──────┬───────┘        │
//! │                                          ┌──────┴───────┐        │
//! │                                          │    Usage     │        │
//! │                                          │   Recorder   │        │
//! │                                          └──────────────┘        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`aggregator`] - Fan-out, weighting, deduplication and ranking
//! - [`cache`] - Tier backends, placement, eviction and the coordinator
//! - [`config`] - Engine configuration and the configuration source trait
//! - [`engine`] - The public façade
//! - [`error`] - Error types
//! - [`metrics`] - Counters and Prometheus exposition
//! - [`provider`] - Lookup provider trait, gateway and HTTP provider
//! - [`usage`] - Usage recording and predictive prefetch

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod provider;
pub mod usage;

// Re-export commonly used types
pub use aggregator::{Aggregator, AggregatorConfig, RankingConfig};
pub use cache::{CacheCoordinator, ContentType, PlacementStrategy, TierBackend, TierId};
pub use config::{BackendKind, ConfigSource, EngineConfig, TierConfig};
pub use engine::SuggestionEngine;
pub use error::{Error, Result};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use provider::{LookupProvider, ProviderConfig, RawCandidate, Suggestion};
pub use usage::{AccessContext, DeviceClass, PrefetchConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
