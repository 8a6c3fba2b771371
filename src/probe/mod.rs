//! Probe module for network monitoring.
//!
//! Supports ICMP ping, HTTP GET and remote-API probes.

mod http;
mod ping;
mod remote;

pub use http::*;
pub use ping::*;
pub use remote::*;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::metrics::SinkError;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream responded with HTTP {0}")]
    HttpStatus(u16),
    #[error("network error: {0}")]
    Transport(String),
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to record measurement: {0}")]
    Sink(#[from] SinkError),
}

impl ProbeError {
    /// Tag value used when counting this failure.
    pub fn error_tag(&self) -> String {
        match self {
            ProbeError::Timeout(_) => "timeout".to_string(),
            ProbeError::HttpStatus(code) => format!("http_{}", code),
            _ => "unknown".to_string(),
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            ProbeError::HttpStatus(status.as_u16())
        } else if e.is_decode() {
            ProbeError::Decode(e.to_string())
        } else {
            ProbeError::Transport(e.to_string())
        }
    }
}

/// One kind of measurement taken against a single target.
#[async_trait]
pub trait Probe: Send + Sync {
    type Output: Send + 'static;

    /// Short name used in logs, e.g. "ping".
    fn kind(&self) -> &'static str;

    /// Measure `target` once.
    async fn check(&self, target: &str) -> Result<Self::Output, ProbeError>;
}
