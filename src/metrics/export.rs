//! Periodic push of the metrics registry to the telemetry collector.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::registry::PrometheusSink;
use super::sink::SinkError;
use crate::config::TelemetryConfig;

/// Pushes every series of a [`PrometheusSink`] to `{endpoint}/metrics/job/{service}`.
pub struct PushExporter {
    sink: Arc<PrometheusSink>,
    endpoint: String,
    job: String,
    interval: Duration,
}

impl PushExporter {
    pub fn new(sink: Arc<PrometheusSink>, telemetry: &TelemetryConfig) -> Self {
        Self {
            sink,
            endpoint: telemetry.collector_endpoint.clone(),
            job: telemetry.service_name.clone(),
            interval: telemetry.export_interval,
        }
    }

    /// Push the current snapshot once.
    pub async fn push_once(&self) -> Result<(), SinkError> {
        if self.job.is_empty() || self.job.contains('/') {
            return Err(SinkError::Export(format!("invalid job name {:?}", self.job)));
        }

        let families = self.sink.gather();
        let job = self.job.clone();
        let endpoint = self.endpoint.clone();
        // push_metrics uses a blocking HTTP client
        tokio::task::spawn_blocking(move || {
            prometheus::push_metrics(&job, HashMap::new(), &endpoint, families, None)
        })
        .await
        .map_err(|e| SinkError::Export(e.to_string()))?
        .map_err(|e| SinkError::Export(e.to_string()))
    }

    /// Push every `interval` until `token` is cancelled, then flush once more.
    pub async fn run(self, token: CancellationToken) {
        tracing::info!(
            "Exporting metrics to {} every {:?}",
            self.endpoint,
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.push_once().await {
                        tracing::warn!("Metrics export failed: {}", e);
                    }
                }
            }
        }

        if let Err(e) = self.push_once().await {
            tracing::warn!("Final metrics export failed: {}", e);
        }
        tracing::info!("Metrics exporter stopped");
    }
}
