//! Client for the remote network-quality API.
//!
//! The upstream endpoint serves a legacy certificate chain, so certificate
//! validation is turned off for this client only.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::ProbeError;
use crate::metrics::json_type;

/// Source of raw client records.
#[async_trait]
pub trait ApiSource: Send + Sync {
    /// Fetch the current payload.
    ///
    /// A successful response is returned as-is even when it is not an
    /// array; shape checks are the consumer's job.
    async fn fetch(&self) -> Result<Value, ProbeError>;
}

/// Fetches the client list with a single GET per call.
pub struct RemoteApiClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl RemoteApiClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl ApiSource for RemoteApiClient {
    async fn fetch(&self) -> Result<Value, ProbeError> {
        tracing::info!("Fetching data from API: {}", self.url);

        let timeout = self.timeout;
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::from(e)
            }
        };

        let response = self.client.get(&self.url).send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            tracing::error!("API HTTP error: {}", status.as_u16());
            return Err(ProbeError::HttpStatus(status.as_u16()));
        }

        let data: Value = response.json().await.map_err(classify)?;
        match &data {
            Value::Array(clients) => {
                tracing::info!("Successfully fetched API data: {} clients", clients.len())
            }
            other => tracing::warn!("Unexpected data format: {}", json_type(other)),
        }
        Ok(data)
    }
}
