//! The contract between probes and the telemetry pipeline.

use thiserror::Error;

/// Attribute tags attached to one measurement.
pub type Tags<'a> = &'a [(&'a str, &'a str)];

/// Failure to record a measurement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("failed to register instrument {name}: {reason}")]
    Registration { name: String, reason: String },
    #[error("measurement rejected by {name}: {reason}")]
    Rejected { name: String, reason: String },
    #[error("failed to encode metrics: {0}")]
    Encode(String),
    #[error("failed to export metrics: {0}")]
    Export(String),
}

/// Destination for named measurements.
///
/// Implementations must tolerate concurrent calls; batching and locking
/// are the sink's own business.
pub trait MetricsSink: Send + Sync {
    fn record_histogram(&self, name: &str, value: f64, tags: Tags<'_>) -> Result<(), SinkError>;

    fn record_counter(&self, name: &str, value: u64, tags: Tags<'_>) -> Result<(), SinkError>;

    fn record_gauge(&self, name: &str, value: f64, tags: Tags<'_>) -> Result<(), SinkError>;
}
