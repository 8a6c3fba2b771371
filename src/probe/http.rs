//! HTTP probe implementation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Probe, ProbeError};
use crate::metrics::{MetricsSink, HTTP_DURATION, HTTP_STATUS};

/// Outcome of one HTTP check. Any status code, including 4xx/5xx, is a
/// successful measurement.
#[derive(Debug, Clone)]
pub struct HttpResult {
    pub target: String,
    pub url: String,
    pub status_code: u16,
    pub duration_ms: f64,
    pub content_length: usize,
    pub checked_at: DateTime<Utc>,
}

/// Issues one GET per check against `{scheme}://{target}`.
pub struct HttpProbe {
    client: reqwest::Client,
    sink: Arc<dyn MetricsSink>,
    timeout: Duration,
    scheme: &'static str,
}

impl HttpProbe {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(sink: Arc<dyn MetricsSink>) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self {
            client,
            sink,
            timeout: Self::DEFAULT_TIMEOUT,
            scheme: "https",
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe over plain HTTP instead of HTTPS.
    pub fn insecure(mut self) -> Self {
        self.scheme = "http";
        self
    }

    fn url_for(&self, target: &str) -> String {
        format!("{}://{}", self.scheme, target)
    }

    /// Run a single GET with the given deadline. No retries.
    pub async fn check_with(&self, target: &str, timeout: Duration) -> Result<HttpResult, ProbeError> {
        let url = self.url_for(target);
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Transport(e.to_string())
            }
        };

        let start = Instant::now();
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_err)?;
        let status_code = response.status().as_u16();

        // Read the full body to measure complete transfer time
        let body = response.bytes().await.map_err(map_err)?;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        let status = status_code.to_string();
        let tags = [
            ("target", target),
            ("method", "GET"),
            ("status_code", status.as_str()),
        ];
        self.sink.record_histogram(HTTP_DURATION, duration_ms, &tags)?;
        self.sink.record_counter(HTTP_STATUS, 1, &tags)?;

        tracing::info!(
            host = %target,
            "HTTP check - Target: {}, Status: {}, Duration: {:.2}ms",
            target,
            status_code,
            duration_ms
        );

        Ok(HttpResult {
            target: target.to_string(),
            url,
            status_code,
            duration_ms,
            content_length: body.len(),
            checked_at: Utc::now(),
        })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    type Output = HttpResult;

    fn kind(&self) -> &'static str {
        "http"
    }

    async fn check(&self, target: &str) -> Result<HttpResult, ProbeError> {
        let result = self.check_with(target, self.timeout).await;
        match &result {
            Err(ProbeError::Timeout(_)) => tracing::error!("HTTP timeout for {}", target),
            Err(e) => tracing::error!("HTTP check error for {}: {}", target, e),
            Ok(_) => {}
        }
        result
    }
}
