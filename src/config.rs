//! Configuration for the monitoring agents.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Values that fail to parse are logged and the default is kept.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Telemetry settings shared by both agents.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Collector endpoint (default: "http://otel-collector:4317")
    pub collector_endpoint: String,
    /// Service name attached to every exported series
    pub service_name: String,
    /// Delay between pushes to the collector (default: 10s)
    pub export_interval: Duration,
}

impl TelemetryConfig {
    fn with_service(service_name: &str) -> Self {
        Self {
            collector_endpoint: "http://otel-collector:4317".to_string(),
            service_name: service_name.to_string(),
            export_interval: Duration::from_secs(10),
        }
    }

    fn apply(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup("OTEL_EXPORTER_OTLP_ENDPOINT") {
            self.collector_endpoint = endpoint;
        }
        if let Some(name) = lookup("OTEL_SERVICE_NAME") {
            self.service_name = name;
        }
        if let Some(millis) = parse_var::<u64>(lookup, "OTEL_METRIC_EXPORT_INTERVAL") {
            self.export_interval = Duration::from_millis(millis.max(1));
        }
    }
}

/// Configuration of the ping/HTTP network monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMonitorConfig {
    /// Hosts probed on every tick
    pub targets: Vec<String>,
    /// Delay between ping ticks (default: 30s)
    pub ping_interval: Duration,
    /// Delay between HTTP ticks (default: 60s)
    pub http_interval: Duration,
    /// Echo attempts per ping check (default: 10)
    pub ping_count: u32,
    /// Deadline for a single echo (default: 2s)
    pub ping_timeout: Duration,
    /// Deadline for one HTTP GET (default: 10s)
    pub http_timeout: Duration,
    /// Port of the liveness endpoint (default: 8080)
    pub health_port: u16,
    pub telemetry: TelemetryConfig,
}

impl Default for NetworkMonitorConfig {
    fn default() -> Self {
        Self {
            targets: parse_targets("google.com,youtube.com,rnp.br"),
            ping_interval: Duration::from_secs(30),
            http_interval: Duration::from_secs(60),
            ping_count: 10,
            ping_timeout: Duration::from_secs(2),
            http_timeout: Duration::from_secs(10),
            health_port: 8080,
            telemetry: TelemetryConfig::with_service("network-monitor"),
        }
    }
}

impl NetworkMonitorConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `MONITOR_TARGETS`: comma-separated hosts
    /// - `PING_INTERVAL`, `HTTP_INTERVAL`: loop intervals in seconds
    /// - `PING_COUNT`, `PING_TIMEOUT`, `HTTP_TIMEOUT`: probe tuning
    /// - `HEALTH_PORT`: liveness port
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`, `OTEL_METRIC_EXPORT_INTERVAL`: telemetry
    pub fn load() -> Self {
        Self::load_from(|key| env::var(key).ok())
    }

    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(raw) = lookup("MONITOR_TARGETS") {
            let targets = parse_targets(&raw);
            if targets.is_empty() {
                tracing::warn!("MONITOR_TARGETS is empty, keeping default targets");
            } else {
                cfg.targets = targets;
            }
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "PING_INTERVAL") {
            cfg.ping_interval = interval_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "HTTP_INTERVAL") {
            cfg.http_interval = interval_secs(secs);
        }
        if let Some(count) = parse_var::<u32>(&lookup, "PING_COUNT") {
            cfg.ping_count = count.max(1);
        }
        if let Some(secs) = parse_var::<f64>(&lookup, "PING_TIMEOUT") {
            cfg.ping_timeout = timeout_secs(secs, cfg.ping_timeout);
        }
        if let Some(secs) = parse_var::<f64>(&lookup, "HTTP_TIMEOUT") {
            cfg.http_timeout = timeout_secs(secs, cfg.http_timeout);
        }
        if let Some(port) = parse_var(&lookup, "HEALTH_PORT") {
            cfg.health_port = port;
        }

        cfg.telemetry.apply(&lookup);
        cfg
    }
}

/// Configuration of the remote-API collector.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    /// Endpoint returning the JSON array of client records
    pub api_url: String,
    /// Delay between fetches (default: 60s)
    pub poll_interval: Duration,
    /// Deadline for one fetch (default: 30s)
    pub timeout: Duration,
    /// Port of the liveness endpoint (default: 8081)
    pub health_port: u16,
    pub telemetry: TelemetryConfig,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            api_url: "https://legadoviaipe.rnp.br/api/norte".to_string(),
            poll_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            health_port: 8081,
            telemetry: TelemetryConfig::with_service("viaipe-collector"),
        }
    }
}

impl CollectorConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `VIAIPE_API_URL`: remote API endpoint
    /// - `VIAIPE_POLL_INTERVAL`: seconds between fetches
    /// - `VIAIPE_TIMEOUT`: fetch deadline in seconds
    /// - `HEALTH_PORT`: liveness port
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`, `OTEL_METRIC_EXPORT_INTERVAL`: telemetry
    pub fn load() -> Self {
        Self::load_from(|key| env::var(key).ok())
    }

    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(url) = lookup("VIAIPE_API_URL") {
            cfg.api_url = url;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "VIAIPE_POLL_INTERVAL") {
            cfg.poll_interval = interval_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "VIAIPE_TIMEOUT") {
            cfg.timeout = timeout_secs(secs as f64, cfg.timeout);
        }
        if let Some(port) = parse_var(&lookup, "HEALTH_PORT") {
            cfg.health_port = port;
        }

        cfg.telemetry.apply(&lookup);
        cfg
    }
}

fn parse_targets(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid value {:?} for {}", raw, key);
            None
        }
    }
}

// A zero interval would turn the loop into a busy spin.
fn interval_secs(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

fn timeout_secs(secs: f64, fallback: Duration) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        fallback
    }
}
