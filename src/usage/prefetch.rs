//! Predictive Prefetcher
//!
//! Periodically scores every tracked key for the likelihood it is about to be
//! requested and populates the most likely ones in the background, through
//! the same path a cache miss would take.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::recorder::{AccessContext, DeviceClass, UsagePattern, UsageRecorder};
use crate::error::Result;
use crate::metrics::EngineMetrics;

// =============================================================================
// Configuration
// =============================================================================

/// Weights of the access-probability terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionWeights {
    /// Share of history that is recent
    pub frequency: f64,
    /// Recent accesses within one hour of the current hour
    pub time_of_day: f64,
    /// Recent accesses on the current weekday
    pub weekday: f64,
    /// Recent accesses in the current language
    pub language: f64,
}

impl Default for PredictionWeights {
    fn default() -> Self {
        Self {
            frequency: 0.4,
            time_of_day: 0.3,
            weekday: 0.2,
            language: 0.1,
        }
    }
}

/// Prefetcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    pub enabled: bool,
    /// Seconds between evaluations
    pub interval_secs: u64,
    /// Keys must score strictly above this to be prefetched
    pub confidence_threshold: f64,
    /// Maximum keys populated per evaluation
    pub max_candidates: usize,
    /// Width of the "recent" window in seconds
    pub recent_window_secs: u64,
    pub weights: PredictionWeights,
    /// Language the current context is evaluated against
    pub current_language: Option<String>,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            confidence_threshold: 0.75,
            max_candidates: 5,
            recent_window_secs: 3600,
            weights: PredictionWeights::default(),
            current_language: None,
        }
    }
}

impl PrefetchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn recent_window(&self) -> Duration {
        Duration::from_secs(self.recent_window_secs)
    }
}

// =============================================================================
// Probability Model
// =============================================================================

/// Probability that a key is about to be accessed, in [0, 1]
///
/// Terms whose denominator is zero contribute nothing.
pub fn access_probability(
    patterns: &[UsagePattern],
    current: &AccessContext,
    now: DateTime<Utc>,
    recent_window: Duration,
    weights: &PredictionWeights,
) -> f64 {
    if patterns.is_empty() {
        return 0.0;
    }

    let window_ms = recent_window.as_millis() as i64;
    let recent: Vec<&UsagePattern> = patterns
        .iter()
        .filter(|p| (now - p.timestamp).num_milliseconds() < window_ms)
        .collect();

    let mut probability = weights.frequency * (recent.len() as f64 / patterns.len() as f64);

    if !recent.is_empty() {
        let total = recent.len() as f64;
        let hour_matches = recent
            .iter()
            .filter(|p| (p.context.time_of_day as i16 - current.time_of_day as i16).abs() <= 1)
            .count();
        let weekday_matches = recent
            .iter()
            .filter(|p| p.context.weekday == current.weekday)
            .count();
        let language_matches = recent
            .iter()
            .filter(|p| p.context.language == current.language)
            .count();

        probability += weights.time_of_day * (hour_matches as f64 / total);
        probability += weights.weekday * (weekday_matches as f64 / total);
        probability += weights.language * (language_matches as f64 / total);
    }

    probability.clamp(0.0, 1.0)
}

// =============================================================================
// Population Seam
// =============================================================================

/// How a predicted key gets filled
#[async_trait]
pub trait Populator: Send + Sync {
    /// Fetch and cache the value behind `key`, exactly as a miss would
    async fn populate(&self, key: &str) -> Result<()>;

    /// Whether `key` is already cached and unexpired
    async fn is_fresh(&self, key: &str) -> bool;

    /// Whether this populator knows how to rebuild `key`
    fn can_populate(&self, _key: &str) -> bool {
        true
    }

    /// Relative importance multiplier
    fn prefetch_priority(&self, _key: &str) -> f64 {
        1.0
    }
}

/// Key selected for prefetch
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchCandidate {
    pub key: String,
    pub probability: f64,
    /// `probability * prefetch_priority`
    pub rank: f64,
}

// =============================================================================
// Prefetcher
// =============================================================================

/// Background prefetch loop
pub struct Prefetcher {
    config: PrefetchConfig,
    recorder: Arc<UsageRecorder>,
    populator: Arc<dyn Populator>,
    metrics: Arc<EngineMetrics>,
    in_flight: Arc<DashSet<String>>,
}

impl Prefetcher {
    pub fn new(
        config: PrefetchConfig,
        recorder: Arc<UsageRecorder>,
        populator: Arc<dyn Populator>,
        metrics: Arc<EngineMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            recorder,
            populator,
            metrics,
            in_flight: Arc::new(DashSet::new()),
        })
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    /// Keys scoring above the threshold, best first
    pub fn candidates(&self, now: DateTime<Utc>) -> Vec<PrefetchCandidate> {
        let current = AccessContext::at(now, self.config.current_language.clone(), DeviceClass::default());
        let window = self.config.recent_window();

        let mut candidates: Vec<PrefetchCandidate> = self
            .recorder
            .tracked_keys()
            .into_iter()
            .filter(|key| !self.in_flight.contains(key) && self.populator.can_populate(key))
            .filter_map(|key| {
                let history = self.recorder.history_for(&key);
                let probability = access_probability(&history, &current, now, window, &self.config.weights);
                (probability > self.config.confidence_threshold).then(|| {
                    let rank = probability * self.populator.prefetch_priority(&key);
                    PrefetchCandidate { key, probability, rank }
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.rank
                .partial_cmp(&a.rank)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        candidates
    }

    /// Evaluate once and spawn population tasks for the top candidates
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for candidate in self.candidates(Utc::now()) {
            if handles.len() >= self.config.max_candidates {
                break;
            }
            if self.populator.is_fresh(&candidate.key).await {
                debug!("Skipping prefetch of {}: already cached", candidate.key);
                continue;
            }
            // Another tick may have claimed it since candidates() ran
            if !self.in_flight.insert(candidate.key.clone()) {
                continue;
            }

            debug!(
                "Prefetching {} (probability {:.2}, rank {:.2})",
                candidate.key, candidate.probability, candidate.rank
            );

            let populator = self.populator.clone();
            let in_flight = self.in_flight.clone();
            let metrics = self.metrics.clone();
            handles.push(tokio::spawn(async move {
                let result = populator.populate(&candidate.key).await;
                if let Err(e) = &result {
                    warn!("Prefetch of {} failed: {}", candidate.key, e);
                }
                metrics.record_prefetch_result(result.is_ok());
                in_flight.remove(&candidate.key);
            }));
        }

        self.metrics.record_prefetch_run(handles.len() as u64);
        if !handles.is_empty() {
            info!("Scheduled {} prefetches", handles.len());
        }
        handles
    }

    /// Evaluate once and wait for every spawned population to finish
    ///
    /// Returns the number of keys populated or attempted.
    pub async fn run_once(&self) -> usize {
        let handles = self.tick().await;
        let scheduled = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Prefetch task panicked: {}", e);
            }
        }
        scheduled
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            "Starting prefetcher (interval {:?}, threshold {})",
            self.config.interval(),
            self.config.confidence_threshold
        );

        let mut tick = interval(self.config.interval());
        // The first tick completes immediately; skip it so startup is quiet
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    // Population runs detached; the loop never waits on it
                    drop(self.tick().await);
                }
                _ = shutdown.cancelled() => {
                    info!("Prefetcher shutting down");
                    break;
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
