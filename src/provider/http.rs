//! Generic JSON-over-HTTP lookup provider
//!
//! `POST {endpoint}` with `{"query", "source", "target"}` and expects a JSON
//! array of `{"text", "confidence", "sourceId"}` objects back; only `text`
//! is required.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{LookupProvider, ProviderConfig, RawCandidate};
use crate::error::{Error, Result};

#[derive(Debug, Serialize)]
struct LookupRequest<'a> {
    query: &'a str,
    source: &'a str,
    target: &'a str,
}

/// HTTP-backed provider
#[derive(Debug)]
pub struct HttpProvider {
    id: String,
    endpoint: String,
    client: Client,
}

impl HttpProvider {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            id: id.into(),
            endpoint: endpoint.into(),
            client,
        })
    }

    /// Build from a provider config; requires `endpoint`
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            Error::Config(format!("Provider {} has no endpoint", config.provider_id))
        })?;
        Self::new(config.provider_id.clone(), endpoint, config.timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LookupProvider for HttpProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, query: &str, source_lang: &str, target_lang: &str) -> Result<Vec<RawCandidate>> {
        let request = LookupRequest {
            query,
            source: source_lang,
            target: target_lang,
        };

        let candidates = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<RawCandidate>>()
            .await?;

        Ok(candidates)
    }
}

// =============================================================================
// Tests
// =============================================================================
