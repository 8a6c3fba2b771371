//! Derived connection statistics.
//!
//! Every function here is pure. Raw fields come straight from the remote
//! API as JSON, so each accessor tolerates missing data and degrades a
//! malformed field to a safe default instead of failing the record.

use serde_json::Value;
use thiserror::Error;

const AVAILABILITY_WEIGHT: f64 = 0.5;
const LATENCY_WEIGHT: f64 = 0.3;
const LOSS_WEIGHT: f64 = 0.2;

/// A raw field that cannot be read as a number.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("expected an object holding {0}")]
    NotAnObject(&'static str),
    #[error("field {field} is not numeric: {value}")]
    NotNumeric { field: &'static str, value: String },
}

/// One interface's traffic sample, in bits per second.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InterfaceSample {
    pub avg_in: f64,
    pub avg_out: f64,
    pub max_in: f64,
    pub max_out: f64,
}

impl InterfaceSample {
    /// Read a sample from a raw interface object; absent fields are zero.
    pub fn from_value(raw: &Value) -> Result<Self, FieldError> {
        Ok(Self {
            avg_in: numeric_field(raw, "avg_in")?,
            avg_out: numeric_field(raw, "avg_out")?,
            max_in: numeric_field(raw, "max_in")?,
            max_out: numeric_field(raw, "max_out")?,
        })
    }
}

/// Bandwidth summed across every interface of a client.
pub type BandwidthStats = InterfaceSample;

impl std::ops::Add for InterfaceSample {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            avg_in: self.avg_in + rhs.avg_in,
            avg_out: self.avg_out + rhs.avg_out,
            max_in: self.max_in + rhs.max_in,
            max_out: self.max_out + rhs.max_out,
        }
    }
}

/// Read `field` of a JSON object as a finite number.
///
/// A missing field or a missing object reads as `0`. Numbers, numeric
/// strings and booleans are accepted; anything else is malformed.
pub fn numeric_field(object: &Value, field: &'static str) -> Result<f64, FieldError> {
    let raw = match object {
        Value::Null => return Ok(0.0),
        Value::Object(map) => match map.get(field) {
            Some(raw) => raw,
            None => return Ok(0.0),
        },
        _ => return Err(FieldError::NotAnObject(field)),
    };

    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };

    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| FieldError::NotNumeric {
            field,
            value: raw.to_string(),
        })
}

/// Availability derived from smoke-ping average loss: `100 - avg_loss`,
/// clamped to `[0, 100]`. Malformed input yields `0`.
pub fn calculate_availability(smoke: &Value) -> f64 {
    match numeric_field(smoke, "avg_loss") {
        Ok(avg_loss) => (100.0 - avg_loss).clamp(0.0, 100.0),
        Err(e) => {
            tracing::error!("Error calculating availability: {}", e);
            0.0
        }
    }
}

/// Element-wise sum of all interface samples.
///
/// An empty list sums to zero. If any interface is malformed the whole
/// result collapses to zero.
pub fn calculate_bandwidth_stats(interfaces: &[Value]) -> BandwidthStats {
    interfaces
        .iter()
        .map(InterfaceSample::from_value)
        .try_fold(
            BandwidthStats::default(),
            |acc, sample| -> Result<BandwidthStats, FieldError> { Ok(acc + sample?) },
        )
        .unwrap_or_else(|e| {
            tracing::error!("Error calculating bandwidth stats: {}", e);
            BandwidthStats::default()
        })
}

/// Score for the current smoke latency in milliseconds.
///
/// Up to 50ms is perfect, 50-100ms decays linearly to 0, beyond 100ms the
/// score is `100 - latency` floored at 0.
pub fn latency_score(latency_ms: f64) -> f64 {
    if latency_ms <= 50.0 {
        100.0
    } else if latency_ms <= 100.0 {
        100.0 - (latency_ms - 50.0) * 2.0
    } else {
        (100.0 - latency_ms).max(0.0)
    }
}

/// Score for the current loss percentage; 10% loss or more scores 0.
pub fn loss_score(loss_percent: f64) -> f64 {
    (100.0 - loss_percent * 10.0).max(0.0)
}

/// Weighted connection quality: availability 50%, latency 30%, current
/// loss 20%, clamped to `[0, 100]`. Malformed smoke data yields `0`.
pub fn calculate_quality_score(availability: f64, smoke: &Value) -> f64 {
    let components = numeric_field(smoke, "val").and_then(|latency| {
        let loss = numeric_field(smoke, "loss")?;
        Ok((latency, loss))
    });

    match components {
        Ok((latency, loss)) if availability.is_finite() => {
            let score = availability * AVAILABILITY_WEIGHT
                + latency_score(latency) * LATENCY_WEIGHT
                + loss_score(loss) * LOSS_WEIGHT;
            score.clamp(0.0, 100.0)
        }
        Ok(_) => {
            tracing::error!("Error calculating quality score: availability is not finite");
            0.0
        }
        Err(e) => {
            tracing::error!("Error calculating quality score: {}", e);
            0.0
        }
    }
}
