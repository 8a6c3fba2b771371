//! Prometheus-backed metrics sink.
//!
//! Instruments are created on first use. The label set of an instrument is
//! fixed by the tag keys of its first measurement; later measurements must
//! carry the same keys.

use std::collections::HashMap;
use std::sync::Mutex;

use prometheus::proto::MetricFamily;
use prometheus::{Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use super::instruments::{self, InstrumentKind};
use super::sink::{MetricsSink, SinkError, Tags};

enum Family {
    Histogram(HistogramVec),
    Counter(IntCounterVec),
    Gauge(GaugeVec),
}

impl Family {
    fn kind(&self) -> InstrumentKind {
        match self {
            Family::Histogram(_) => InstrumentKind::Histogram,
            Family::Counter(_) => InstrumentKind::Counter,
            Family::Gauge(_) => InstrumentKind::Gauge,
        }
    }
}

struct Registered {
    family: Family,
    label_names: Vec<String>,
}

/// A sink that aggregates measurements in an owned Prometheus registry.
pub struct PrometheusSink {
    registry: Registry,
    families: Mutex<HashMap<String, Registered>>,
}

impl PrometheusSink {
    /// Create a sink whose series all carry `service_name` as a constant label.
    pub fn new(service_name: &str) -> Result<Self, SinkError> {
        let mut labels = HashMap::new();
        labels.insert("service_name".to_string(), service_name.to_string());
        let registry = Registry::new_custom(None, Some(labels)).map_err(|e| {
            SinkError::Registration {
                name: "registry".to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            registry,
            families: Mutex::new(HashMap::new()),
        })
    }

    /// Snapshot of every registered series.
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Render every registered series in the text exposition format.
    pub fn encode_text(&self) -> Result<String, SinkError> {
        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&self.gather(), &mut buffer)
            .map_err(|e| SinkError::Encode(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| SinkError::Encode(e.to_string()))
    }

    fn record(
        &self,
        name: &str,
        kind: InstrumentKind,
        tags: Tags<'_>,
        apply: impl FnOnce(&Family, &[&str]) -> Result<(), prometheus::Error>,
    ) -> Result<(), SinkError> {
        let rejected = |reason: String| SinkError::Rejected {
            name: name.to_string(),
            reason,
        };

        let mut pairs: Vec<(String, &str)> = tags
            .iter()
            .map(|(key, value)| (sanitize(key), *value))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let label_names: Vec<String> = pairs.iter().map(|(k, _)| k.clone()).collect();
        let label_values: Vec<&str> = pairs.iter().map(|(_, v)| *v).collect();

        let mut families = self
            .families
            .lock()
            .map_err(|_| rejected("instrument table lock poisoned".to_string()))?;

        if !families.contains_key(name) {
            let family = self.register(name, kind, &label_names)?;
            families.insert(
                name.to_string(),
                Registered {
                    family,
                    label_names: label_names.clone(),
                },
            );
        }

        let registered = families
            .get(name)
            .ok_or_else(|| rejected("instrument vanished".to_string()))?;

        if registered.family.kind() != kind {
            return Err(rejected(format!(
                "registered as {:?}, recorded as {:?}",
                registered.family.kind(),
                kind
            )));
        }
        if registered.label_names != label_names {
            return Err(rejected(format!(
                "expected tags {:?}, got {:?}",
                registered.label_names, label_names
            )));
        }

        apply(&registered.family, &label_values).map_err(|e| rejected(e.to_string()))
    }

    fn register(
        &self,
        name: &str,
        kind: InstrumentKind,
        label_names: &[String],
    ) -> Result<Family, SinkError> {
        let metric_name = sanitize(name);
        let (help, unit) = instruments::lookup(name)
            .map(|i| (i.help, i.unit))
            .unwrap_or((name, ""));
        let labels: Vec<&str> = label_names.iter().map(String::as_str).collect();

        let registration_failed = |e: prometheus::Error| SinkError::Registration {
            name: name.to_string(),
            reason: e.to_string(),
        };

        let family = match kind {
            InstrumentKind::Histogram => {
                let opts = HistogramOpts::new(metric_name, help)
                    .buckets(instruments::buckets_for(unit));
                Family::Histogram(HistogramVec::new(opts, &labels).map_err(registration_failed)?)
            }
            InstrumentKind::Counter => Family::Counter(
                IntCounterVec::new(Opts::new(metric_name, help), &labels)
                    .map_err(registration_failed)?,
            ),
            InstrumentKind::Gauge => Family::Gauge(
                GaugeVec::new(Opts::new(metric_name, help), &labels)
                    .map_err(registration_failed)?,
            ),
        };

        let collector: Box<dyn prometheus::core::Collector> = match &family {
            Family::Histogram(h) => Box::new(h.clone()),
            Family::Counter(c) => Box::new(c.clone()),
            Family::Gauge(g) => Box::new(g.clone()),
        };
        self.registry.register(collector).map_err(registration_failed)?;

        tracing::debug!("Registered {:?} instrument {}", kind, name);
        Ok(family)
    }
}

impl MetricsSink for PrometheusSink {
    fn record_histogram(&self, name: &str, value: f64, tags: Tags<'_>) -> Result<(), SinkError> {
        self.record(name, InstrumentKind::Histogram, tags, |family, values| {
            if let Family::Histogram(h) = family {
                h.get_metric_with_label_values(values)?.observe(value);
            }
            Ok(())
        })
    }

    fn record_counter(&self, name: &str, value: u64, tags: Tags<'_>) -> Result<(), SinkError> {
        self.record(name, InstrumentKind::Counter, tags, |family, values| {
            if let Family::Counter(c) = family {
                c.get_metric_with_label_values(values)?.inc_by(value);
            }
            Ok(())
        })
    }

    fn record_gauge(&self, name: &str, value: f64, tags: Tags<'_>) -> Result<(), SinkError> {
        self.record(name, InstrumentKind::Gauge, tags, |family, values| {
            if let Family::Gauge(g) = family {
                g.get_metric_with_label_values(values)?.set(value);
            }
            Ok(())
        })
    }
}

/// Map an instrument or tag name onto the Prometheus name alphabet.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
