//! Usage Pattern Recorder
//!
//! Keeps a bounded, per-key history of accesses along with the context they
//! happened in. The history feeds the prefetcher's access-probability model.

use std::collections::VecDeque;

use chrono::{DateTime, Datelike, Timelike, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Default number of patterns retained per key
pub const DEFAULT_HISTORY_CAP: usize = 100;

/// Coarse client device class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    Tablet,
    #[default]
    Desktop,
}

impl DeviceClass {
    /// Classify a user agent string
    pub fn from_user_agent(user_agent: &str) -> Self {
        const MOBILE: [&str; 4] = ["Mobile", "Android", "iPhone", "iPad"];
        if MOBILE.iter().any(|m| user_agent.contains(m)) {
            DeviceClass::Mobile
        } else if user_agent.contains("Tablet") {
            DeviceClass::Tablet
        } else {
            DeviceClass::Desktop
        }
    }
}

/// Context features captured with every access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    /// Hour of day, 0-23 (UTC)
    pub time_of_day: u8,
    /// Day of week, 0 = Sunday .. 6 = Saturday
    pub weekday: u8,
    pub language: Option<String>,
    pub device: DeviceClass,
}

impl AccessContext {
    /// Context stamped with the current wall clock
    pub fn now(language: Option<String>, device: DeviceClass) -> Self {
        Self::at(Utc::now(), language, device)
    }

    /// Context for an explicit instant
    pub fn at(instant: DateTime<Utc>, language: Option<String>, device: DeviceClass) -> Self {
        Self {
            time_of_day: instant.hour() as u8,
            weekday: instant.weekday().num_days_from_sunday() as u8,
            language,
            device,
        }
    }
}

/// One recorded access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsagePattern {
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub context: AccessContext,
}

/// Per-key bounded access history
pub struct UsageRecorder {
    history: DashMap<String, VecDeque<UsagePattern>>,
    cap: usize,
}

impl Default for UsageRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageRecorder {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAP)
    }

    /// Recorder keeping at most `cap` patterns per key
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            history: DashMap::new(),
            cap: cap.max(1),
        }
    }

    /// Record an access happening now
    pub fn record(&self, key: &str, context: AccessContext) {
        self.record_at(key, context, Utc::now());
    }

    /// Record an access at an explicit instant
    pub fn record_at(&self, key: &str, context: AccessContext, timestamp: DateTime<Utc>) {
        let pattern = UsagePattern {
            key: key.to_string(),
            timestamp,
            context,
        };

        // Only this key's bucket is locked, and only for the append
        let mut patterns = self.history.entry(key.to_string()).or_default();
        patterns.push_back(pattern);
        while patterns.len() > self.cap {
            patterns.pop_front();
        }
    }

    /// Oldest-first history for a key
    pub fn history_for(&self, key: &str) -> Vec<UsagePattern> {
        self.history
            .get(key)
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys with any recorded history
    pub fn tracked_keys(&self) -> Vec<String> {
        self.history.iter().map(|e| e.key().clone()).collect()
    }

    /// Drop a key's history
    pub fn forget(&self, key: &str) -> bool {
        self.history.remove(key).is_some()
    }

    /// Drop every key whose newest access is older than `cutoff`
    ///
    /// Returns the number of keys dropped.
    pub fn forget_idle(&self, cutoff: DateTime<Utc>) -> usize {
        let mut dropped = 0;
        self.history.retain(|_, patterns| {
            let active = patterns.back().is_some_and(|p| p.timestamp >= cutoff);
            if !active {
                dropped += 1;
            }
            active
        });
        dropped
    }

    pub fn contains(&self, key: &str) -> bool {
        self.history.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
