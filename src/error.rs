//! Error types for the suggestion engine

use std::time::Duration;

use thiserror::Error;

use crate::cache::TierId;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the engine
///
/// Only [`Error::InvalidArgument`] ever reaches a `suggest` caller; tier and
/// provider failures are contained at the coordinator and aggregator boundaries.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Cache Tier Errors
    // =========================================================================
    /// A tier cannot hold the entry without eviction
    #[error("Capacity exceeded on tier {tier}: requested {requested} bytes, {available} available")]
    CapacityExceeded {
        tier: TierId,
        requested: u64,
        available: u64,
    },

    /// Tier backing store unreachable or failing
    #[error("Backend for tier {tier} unavailable: {reason}")]
    BackendUnavailable { tier: TierId, reason: String },

    /// Tier backing store exceeded its internal timeout
    #[error("Backend for tier {tier} timed out after {timeout:?}")]
    BackendTimeout { tier: TierId, timeout: Duration },

    // =========================================================================
    // Provider Errors
    // =========================================================================
    /// Provider did not answer before its deadline
    #[error("Provider {provider} timed out after {timeout:?}")]
    ProviderTimeout { provider: String, timeout: Duration },

    /// Provider returned an error
    #[error("Provider {provider} failed: {reason}")]
    ProviderError { provider: String, reason: String },

    // =========================================================================
    // Usage Errors
    // =========================================================================
    /// Caller passed an argument the engine cannot serve
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // =========================================================================
    // Ambient Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for the error class that may be surfaced to callers
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    /// True for errors the coordinator recovers from by evicting and retrying
    pub fn is_capacity(&self) -> bool {
        matches!(self, Error::CapacityExceeded { .. })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_error_classification() {
        assert!(Error::InvalidArgument("empty query".into()).is_usage_error());
        assert!(!Error::ProviderError {
            provider: "p1".into(),
            reason: "boom".into()
        }
        .is_usage_error());
        assert!(!Error::Internal("x".into()).is_usage_error());
    }

    #[test]
    fn test_capacity_classification() {
        let err = Error::CapacityExceeded {
            tier: TierId::Memory,
            requested: 10,
            available: 5,
        };
        assert!(err.is_capacity());
        assert!(err.to_string().contains("requested 10 bytes"));
    }
}
