//! Turns remote-API client records into per-client measurements.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::calculator::{
    calculate_availability, calculate_bandwidth_stats, calculate_quality_score, numeric_field,
    BandwidthStats,
};
use super::instruments::{
    BANDWIDTH_PEAK_IN, BANDWIDTH_PEAK_OUT, BANDWIDTH_USAGE_IN, BANDWIDTH_USAGE_OUT,
    CLIENTS_TOTAL, CLIENT_AVAILABILITY, CONNECTION_QUALITY, SMOKE_LATENCY, SMOKE_LOSS,
};
use super::json_type;
use super::sink::{MetricsSink, SinkError};

/// Failure to process one client record.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("client record is not an object: {0}")]
    NotAnObject(String),
    #[error("malformed client record: {0}")]
    MalformedData(String),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// A borrowed view of one raw client record.
#[derive(Debug)]
pub struct RemoteClientRecord<'a> {
    pub id: String,
    pub name: String,
    pub smoke: &'a Value,
    pub interfaces: &'a [Value],
}

impl<'a> RemoteClientRecord<'a> {
    /// Extract the fields the processor needs.
    ///
    /// Absent `id`/`name` fall back to `"unknown"`/`"Unknown"`; an absent
    /// `data`, `smoke` or `interfaces` reads as empty.
    pub fn from_value(raw: &'a Value) -> Result<Self, ProcessError> {
        let object = raw
            .as_object()
            .ok_or_else(|| ProcessError::NotAnObject(raw.to_string()))?;

        let data = match object.get("data") {
            None | Some(Value::Null) => None,
            Some(Value::Object(data)) => Some(data),
            Some(other) => {
                return Err(ProcessError::MalformedData(format!(
                    "data is not an object: {}",
                    other
                )))
            }
        };

        let smoke = data.and_then(|d| d.get("smoke")).unwrap_or(&Value::Null);
        let interfaces = match data.and_then(|d| d.get("interfaces")) {
            Some(Value::Array(list)) => list.as_slice(),
            None | Some(Value::Null) => &[],
            Some(other) => {
                tracing::warn!("Ignoring non-list interfaces: {}", other);
                &[]
            }
        };

        Ok(Self {
            id: text_field(object.get("id"), "unknown"),
            name: text_field(object.get("name"), "Unknown"),
            smoke,
            interfaces,
        })
    }
}

fn text_field(value: Option<&Value>, default: &str) -> String {
    match value {
        None | Some(Value::Null) => default.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Everything recorded for one client in one polling cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientMetrics {
    pub client_id: String,
    pub client_name: String,
    pub availability: f64,
    pub bandwidth: BandwidthStats,
    pub quality: f64,
    pub smoke_latency_ms: f64,
    pub smoke_loss_percent: f64,
}

impl ClientMetrics {
    /// Derive the metrics of one record. Pure.
    pub fn derive(record: &RemoteClientRecord<'_>) -> Self {
        let availability = calculate_availability(record.smoke);
        let bandwidth = calculate_bandwidth_stats(record.interfaces);
        let quality = calculate_quality_score(availability, record.smoke);

        Self {
            client_id: record.id.clone(),
            client_name: record.name.clone(),
            availability,
            bandwidth,
            quality,
            smoke_latency_ms: numeric_field(record.smoke, "val").unwrap_or(0.0),
            smoke_loss_percent: numeric_field(record.smoke, "loss").unwrap_or(0.0),
        }
    }
}

/// Outcome of processing one API payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
}

/// Processes API payloads and pushes client measurements to the sink.
pub struct DataProcessor {
    sink: Arc<dyn MetricsSink>,
}

impl DataProcessor {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    /// Process a whole API payload.
    ///
    /// Anything other than a non-empty array is logged and ignored. Each
    /// record is processed independently; a failing record is logged and
    /// skipped without affecting the rest.
    pub fn process_api_data(&self, data: &Value) -> ProcessSummary {
        let clients = match data {
            Value::Array(clients) if !clients.is_empty() => clients,
            Value::Array(_) | Value::Null => {
                tracing::warn!("No data to process");
                return ProcessSummary::default();
            }
            other => {
                tracing::warn!("Unexpected data format: {}, expected list", json_type(other));
                return ProcessSummary::default();
            }
        };

        tracing::info!("Processing {} clients", clients.len());
        if let Err(e) = self.sink.record_gauge(CLIENTS_TOTAL, clients.len() as f64, &[]) {
            tracing::warn!("Failed to record client total: {}", e);
        }

        let mut summary = ProcessSummary {
            total: clients.len(),
            ..Default::default()
        };
        for client in clients {
            match self.process_client(client) {
                Ok(_) => summary.processed += 1,
                Err(e) => {
                    tracing::error!("Error processing client: {}", e);
                    summary.skipped += 1;
                }
            }
        }
        summary
    }

    /// Derive and record the metrics of one raw client record.
    pub fn process_client(&self, raw: &Value) -> Result<ClientMetrics, ProcessError> {
        let record = RemoteClientRecord::from_value(raw)?;
        let metrics = ClientMetrics::derive(&record);
        self.record_client_metrics(&metrics)?;

        tracing::info!(
            client_id = %metrics.client_id,
            "Processed client '{}' ({}): Availability={:.2}%, BW In={:.2}bps, BW Out={:.2}bps, Quality={:.2}, Latency={}ms",
            metrics.client_name,
            metrics.client_id,
            metrics.availability,
            metrics.bandwidth.avg_in,
            metrics.bandwidth.avg_out,
            metrics.quality,
            metrics.smoke_latency_ms,
        );
        Ok(metrics)
    }

    fn record_client_metrics(&self, m: &ClientMetrics) -> Result<(), SinkError> {
        let tags = [
            ("client_id", m.client_id.as_str()),
            ("client_name", m.client_name.as_str()),
        ];

        let gauges = [
            (CLIENT_AVAILABILITY, m.availability),
            (CONNECTION_QUALITY, m.quality),
            (BANDWIDTH_USAGE_IN, m.bandwidth.avg_in),
            (BANDWIDTH_USAGE_OUT, m.bandwidth.avg_out),
            (BANDWIDTH_PEAK_IN, m.bandwidth.max_in),
            (BANDWIDTH_PEAK_OUT, m.bandwidth.max_out),
            (SMOKE_LATENCY, m.smoke_latency_ms),
            (SMOKE_LOSS, m.smoke_loss_percent),
        ];
        for (name, value) in gauges {
            self.sink.record_gauge(name, value, &tags)?;
        }
        Ok(())
    }
}
