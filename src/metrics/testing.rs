//! In-memory sink used by unit tests.

use std::sync::Mutex;

use super::instruments::InstrumentKind;
use super::sink::{MetricsSink, SinkError, Tags};

#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub kind: InstrumentKind,
    pub name: String,
    pub value: f64,
    pub tags: Vec<(String, String)>,
}

impl Measurement {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Records every measurement; optionally rejects writes to one instrument.
#[derive(Default)]
pub struct RecordingSink {
    measurements: Mutex<Vec<Measurement>>,
    fail_on: Option<String>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(name: &str) -> Self {
        Self {
            fail_on: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn measurements(&self) -> Vec<Measurement> {
        self.measurements.lock().unwrap().clone()
    }

    pub fn named(&self, name: &str) -> Vec<Measurement> {
        self.measurements()
            .into_iter()
            .filter(|m| m.name == name)
            .collect()
    }

    fn push(&self, kind: InstrumentKind, name: &str, value: f64, tags: Tags<'_>) -> Result<(), SinkError> {
        if self.fail_on.as_deref() == Some(name) {
            return Err(SinkError::Rejected {
                name: name.to_string(),
                reason: "sink unavailable".to_string(),
            });
        }
        self.measurements.lock().unwrap().push(Measurement {
            kind,
            name: name.to_string(),
            value,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        Ok(())
    }
}

impl MetricsSink for RecordingSink {
    fn record_histogram(&self, name: &str, value: f64, tags: Tags<'_>) -> Result<(), SinkError> {
        self.push(InstrumentKind::Histogram, name, value, tags)
    }

    fn record_counter(&self, name: &str, value: u64, tags: Tags<'_>) -> Result<(), SinkError> {
        self.push(InstrumentKind::Counter, name, value as f64, tags)
    }

    fn record_gauge(&self, name: &str, value: f64, tags: Tags<'_>) -> Result<(), SinkError> {
        self.push(InstrumentKind::Gauge, name, value, tags)
    }
}
