//! Cache Eviction Policy
//!
//! Scores eviction candidates and plans which entries to remove from a tier
//! so that a pending insertion fits. Higher score = evicted sooner.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Snapshot of one entry as seen by the eviction planner
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionCandidate {
    pub key: String,
    pub size_bytes: u64,
    pub access_count: u64,
    pub last_access_ms: u64,
    pub priority_hint: f64,
    pub expired: bool,
}

/// Eviction policy configuration
///
/// Score = `frequency_weight / (access_count + 1)
///        + staleness_weight * hours_since_last_access
///        - priority_weight * priority_hint`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionPolicy {
    /// Weight for the inverse-frequency term
    pub frequency_weight: f64,
    /// Weight for hours since last access
    pub staleness_weight: f64,
    /// Weight for the placement priority hint (subtracted)
    pub priority_weight: f64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            frequency_weight: 1.0,
            staleness_weight: 1.0,
            priority_weight: 1.0,
        }
    }
}

/// Outcome of [`EvictionPolicy::plan`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvictionPlan {
    /// Keys to delete, in eviction order
    pub victims: Vec<String>,
    /// Bytes released if every victim is deleted
    pub bytes_freed: u64,
    /// Whether `bytes_freed` reaches the requested amount
    pub satisfied: bool,
}

impl EvictionPolicy {
    /// Calculate eviction score for an entry
    ///
    /// Higher score = more likely to evict
    pub fn calculate_score(&self, access_count: u64, hours_since_access: f64, priority_hint: f64) -> f64 {
        let freq_score = 1.0 / (access_count as f64 + 1.0);

        self.frequency_weight * freq_score + self.staleness_weight * hours_since_access
            - self.priority_weight * priority_hint
    }

    fn score(&self, candidate: &EvictionCandidate, now_ms: u64) -> f64 {
        // Expired entries always go first
        if candidate.expired {
            return f64::INFINITY;
        }
        let hours = now_ms.saturating_sub(candidate.last_access_ms) as f64 / 3_600_000.0;
        self.calculate_score(candidate.access_count, hours, candidate.priority_hint)
    }

    /// Order candidates for eviction: score descending, larger entries first on ties
    pub fn rank(&self, mut candidates: Vec<EvictionCandidate>, now_ms: u64) -> Vec<EvictionCandidate> {
        let mut scored: Vec<(f64, EvictionCandidate)> = candidates
            .drain(..)
            .map(|c| (self.score(&c, now_ms), c))
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.size_bytes.cmp(&a.size_bytes))
                .then_with(|| a.key.cmp(&b.key))
        });

        scored.into_iter().map(|(_, c)| c).collect()
    }

    /// Pick victims until at least `bytes_needed` would be freed
    pub fn plan(&self, candidates: Vec<EvictionCandidate>, bytes_needed: u64, now_ms: u64) -> EvictionPlan {
        let mut plan = EvictionPlan::default();
        if bytes_needed == 0 {
            plan.satisfied = true;
            return plan;
        }

        for candidate in self.rank(candidates, now_ms) {
            plan.bytes_freed += candidate.size_bytes;
            plan.victims.push(candidate.key);
            if plan.bytes_freed >= bytes_needed {
                plan.satisfied = true;
                break;
            }
        }
        plan
    }
}

// =============================================================================
// Tests
// =============================================================================
