//! Engine configuration
//!
//! Loaded once at startup from YAML or JSON. Every section has defaults, so
//! an empty document yields a working in-memory engine with no providers.
//!
//! ```yaml
//! tiers:
//!   - tier: memory
//!     capacity_bytes: 67108864
//!   - tier: persistent
//!     capacity_bytes: 1073741824
//!     backend: { kind: file, path: /var/lib/suggestor/l3 }
//! providers:
//!   - provider_id: mymemory
//!     weight: 1.0
//!     endpoint: http://localhost:8081/suggest
//! language_priority:
//!   fr: [mymemory]
//!   default: [mymemory]
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregator::AggregatorConfig;
use crate::cache::{
    ContentType, EvictionPolicy, FileKvStore, HttpKvStore, InMemoryKvStore, KvStore, MemoryTier, PlacementStrategy,
    PlacementTable, StoreTier, TierBackend, TierId, DEFAULT_STORE_TIMEOUT,
};
use crate::error::{Error, Result};
use crate::provider::{HttpProvider, LookupProvider, ProviderConfig};
use crate::usage::{PrefetchConfig, DEFAULT_HISTORY_CAP};

const MIB: u64 = 1024 * 1024;

/// Source of provider settings and language priorities
///
/// Read at startup; [`Aggregator::reload_ranking`](crate::aggregator::Aggregator::reload_ranking)
/// accepts any implementation for hot reloads.
pub trait ConfigSource: Send + Sync {
    fn provider_configs(&self) -> Vec<ProviderConfig>;

    /// Target language → provider ids, highest precedence first
    fn language_priority(&self) -> HashMap<String, Vec<String>>;
}

/// Where a tier keeps its bytes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    InMemory,
    /// One file per key under `path`
    File { path: PathBuf },
    /// Network-fronted cache
    Http { base_url: String },
}

fn default_tier_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT.as_millis() as u64
}

/// One cache tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub tier: TierId,
    pub capacity_bytes: u64,
    /// Ignored for the memory tier
    #[serde(default)]
    pub backend: BackendKind,
    /// Internal timeout for each backing-store call
    #[serde(default = "default_tier_timeout_ms")]
    pub timeout_ms: u64,
}

impl TierConfig {
    pub fn new(tier: TierId, capacity_bytes: u64) -> Self {
        Self {
            tier,
            capacity_bytes,
            backend: BackendKind::InMemory,
            timeout_ms: default_tier_timeout_ms(),
        }
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tiers: Vec<TierConfig>,
    /// Per content type overrides of the default placement table
    pub placement: HashMap<ContentType, PlacementStrategy>,
    pub providers: Vec<ProviderConfig>,
    pub language_priority: HashMap<String, Vec<String>>,
    pub aggregator: AggregatorConfig,
    pub prefetch: PrefetchConfig,
    pub eviction: EvictionPolicy,
    /// Usage patterns retained per key
    pub history_cap: usize,
    /// Seconds between expired-entry sweeps
    pub cleanup_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                TierConfig::new(TierId::Memory, 64 * MIB),
                TierConfig::new(TierId::Embedded, 256 * MIB),
                TierConfig::new(TierId::Persistent, 1024 * MIB),
                TierConfig::new(TierId::Network, 4096 * MIB),
            ],
            placement: HashMap::new(),
            providers: Vec::new(),
            language_priority: HashMap::new(),
            aggregator: AggregatorConfig::default(),
            prefetch: PrefetchConfig::default(),
            eviction: EvictionPolicy::default(),
            history_cap: DEFAULT_HISTORY_CAP,
            cleanup_interval_secs: 600,
        }
    }
}

impl EngineConfig {
    /// Load and validate a config file; `.json` is JSON, anything else YAML
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        config.validate()?;

        info!(
            "Loaded configuration from {} ({} tiers, {} providers)",
            path.display(),
            config.tiers.len(),
            config.providers.len()
        );
        Ok(config)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    /// Settings for a provider id, defaults when unlisted
    pub fn provider_config(&self, provider_id: &str) -> ProviderConfig {
        self.providers
            .iter()
            .find(|p| p.provider_id == provider_id)
            .cloned()
            .unwrap_or_else(|| ProviderConfig::new(provider_id))
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(Error::Config("at least one cache tier is required".into()));
        }

        let mut tiers = HashSet::new();
        for tier in &self.tiers {
            if !tiers.insert(tier.tier) {
                return Err(Error::Config(format!("tier {} configured twice", tier.tier)));
            }
            if tier.capacity_bytes == 0 {
                return Err(Error::Config(format!("tier {} has zero capacity", tier.tier)));
            }
            if tier.timeout_ms == 0 {
                return Err(Error::Config(format!("tier {} has zero timeout", tier.tier)));
            }
            if tier.tier == TierId::Memory && tier.backend != BackendKind::InMemory {
                return Err(Error::Config("the memory tier cannot use an external backend".into()));
            }
        }

        for (content_type, strategy) in &self.placement {
            if strategy.tiers.is_empty() {
                return Err(Error::Config(format!("placement for {} lists no tiers", content_type)));
            }
        }

        let mut ids = HashSet::new();
        for provider in &self.providers {
            if !ids.insert(provider.provider_id.as_str()) {
                return Err(Error::Config(format!(
                    "provider {} configured twice",
                    provider.provider_id
                )));
            }
            if !(0.0..=1.0).contains(&provider.weight) {
                return Err(Error::Config(format!(
                    "provider {} weight {} outside [0, 1]",
                    provider.provider_id, provider.weight
                )));
            }
            if provider.timeout_millis == 0 {
                return Err(Error::Config(format!("provider {} has zero timeout", provider.provider_id)));
            }
        }

        if self.aggregator.deadline_ms == 0 {
            return Err(Error::Config("aggregator deadline must be positive".into()));
        }
        if self.aggregator.max_in_flight == Some(0) {
            return Err(Error::Config("aggregator max_in_flight must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.prefetch.confidence_threshold) {
            return Err(Error::Config(format!(
                "prefetch confidence threshold {} outside [0, 1]",
                self.prefetch.confidence_threshold
            )));
        }
        if self.history_cap == 0 {
            return Err(Error::Config("history_cap must be positive".into()));
        }

        for (language, providers) in &self.language_priority {
            for id in providers {
                if !ids.contains(id.as_str()) {
                    warn!("Language priority for {} names unconfigured provider {}", language, id);
                }
            }
        }

        Ok(())
    }

    /// Placement defaults with the configured overrides applied
    pub fn build_placement(&self) -> PlacementTable {
        self.placement
            .iter()
            .fold(PlacementTable::default(), |table, (content_type, strategy)| {
                table.with_override(*content_type, strategy.clone())
            })
    }

    /// Construct every configured tier
    ///
    /// File and HTTP tiers rebuild their index from what the store already
    /// holds; a store unreachable at startup is logged and starts empty.
    pub async fn build_tiers(&self) -> Result<Vec<Arc<dyn TierBackend>>> {
        let mut backends: Vec<Arc<dyn TierBackend>> = Vec::with_capacity(self.tiers.len());

        for tier in &self.tiers {
            if tier.tier == TierId::Memory {
                backends.push(Arc::new(MemoryTier::new(tier.capacity_bytes)));
                continue;
            }

            let store: Arc<dyn KvStore> = match &tier.backend {
                BackendKind::InMemory => Arc::new(InMemoryKvStore::new()),
                BackendKind::File { path } => Arc::new(FileKvStore::open(path).await?),
                BackendKind::Http { base_url } => Arc::new(HttpKvStore::new(base_url.clone(), tier.timeout())?),
            };
            let backend = StoreTier::new(tier.tier, store, tier.capacity_bytes).with_timeout(tier.timeout());

            if tier.backend != BackendKind::InMemory {
                if let Err(e) = backend.warm_index().await {
                    warn!("Tier {} starts with an empty index: {}", tier.tier, e);
                }
            }
            backends.push(Arc::new(backend));
        }

        Ok(backends)
    }

    /// HTTP providers for every entry with an endpoint
    pub fn build_providers(&self) -> Result<Vec<Arc<dyn LookupProvider>>> {
        self.providers
            .iter()
            .filter(|p| p.endpoint.is_some())
            .map(|p| HttpProvider::from_config(p).map(|hp| Arc::new(hp) as Arc<dyn LookupProvider>))
            .collect()
    }
}

impl ConfigSource for EngineConfig {
    fn provider_configs(&self) -> Vec<ProviderConfig> {
        self.providers.clone()
    }

    fn language_priority(&self) -> HashMap<String, Vec<String>> {
        self.language_priority.clone()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tiers.len(), 4);
        assert_eq!(config.aggregator.deadline_ms, 3500);
        assert_eq!(config.aggregator.default_max_results, 7);
        assert_eq!(config.cleanup_interval(), Duration::from_secs(600));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_parse_yaml() {
        let config = EngineConfig::from_yaml_str(
            r#"
tiers:
  - tier: memory
    capacity_bytes: 1024
  - tier: persistent
    capacity_bytes: 4096
    backend: { kind: file, path: /tmp/l3 }
    timeout_ms: 250
  - tier: network
    capacity_bytes: 8192
    backend: { kind: http, base_url: "http://cache:8080" }
placement:
  live-suggestion:
    tiers: [memory]
    ttl_seconds: 1
    max_entry_bytes: 512
providers:
  - provider_id: p1
    weight: 1.0
  - provider_id: p2
    endpoint: http://localhost:9000/suggest
language_priority:
  fr: [p1, p2]
prefetch:
  interval_secs: 5
"#,
        )
        .unwrap();

        assert_eq!(config.tiers[1].backend, BackendKind::File { path: "/tmp/l3".into() });
        assert_eq!(config.tiers[1].timeout(), Duration::from_millis(250));
        assert_eq!(config.tiers[2].timeout_ms, 500);
        assert_eq!(config.providers[1].weight, 0.5);
        assert_eq!(config.prefetch.interval_secs, 5);
        assert_eq!(config.prefetch.confidence_threshold, 0.75);

        let placement = config.build_placement();
        let live = placement.strategy_for(ContentType::LiveSuggestion);
        assert_eq!(live.ttl_seconds, 1);
        assert_eq!(live.tiers, vec![TierId::Memory]);
        assert_eq!(live.priority_hint, 1.0);

        assert_eq!(config.build_providers().unwrap().len(), 1);
        assert_eq!(config.language_priority()["fr"], vec!["p1", "p2"]);
    }

    #[test]
    fn test_rejects_bad_weight() {
        let mut config = EngineConfig::default();
        config.providers.push(ProviderConfig::new("p").with_weight(1.5));
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_rejects_duplicate_provider() {
        let mut config = EngineConfig::default();
        config.providers.push(ProviderConfig::new("p"));
        config.providers.push(ProviderConfig::new("p"));
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let mut config = EngineConfig::default();
        config.tiers[0].capacity_bytes = 0;
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_rejects_empty_placement() {
        let mut config = EngineConfig::default();
        config
            .placement
            .insert(ContentType::ModelBlob, PlacementStrategy::new(Vec::<TierId>::new(), 10, 10, 1.0));
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_rejects_external_memory_tier() {
        let mut config = EngineConfig::default();
        config.tiers[0].backend = BackendKind::Http {
            base_url: "http://x".into(),
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_provider_config_lookup() {
        let mut config = EngineConfig::default();
        config.providers.push(ProviderConfig::new("known").with_weight(0.9));
        assert_eq!(config.provider_config("known").weight, 0.9);
        assert_eq!(config.provider_config("other").weight, 0.5);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"cleanup_interval_secs": 60, "history_cap": 10}}"#).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cleanup_interval_secs, 60);
        assert_eq!(config.history_cap, 10);
    }

    #[test]
    fn test_from_file_missing() {
        assert_matches!(
            EngineConfig::from_file("/nonexistent/suggestor.yaml"),
            Err(Error::Config(_))
        );
    }

    #[tokio::test]
    async fn test_build_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.tiers[2].backend = BackendKind::File {
            path: dir.path().to_path_buf(),
        };

        let tiers = config.build_tiers().await.unwrap();
        let ids: Vec<_> = tiers.iter().map(|t| t.id()).collect();
        assert_eq!(ids, TierId::ALL.to_vec());
        assert_eq!(tiers[0].capacity_bytes(), 64 * MIB);
    }
}
