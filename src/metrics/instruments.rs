//! Catalogue of the instruments the agents emit.

/// How an instrument aggregates recorded values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Histogram,
    Counter,
    Gauge,
}

/// Static description of one named instrument.
#[derive(Debug, Clone, Copy)]
pub struct Instrument {
    pub name: &'static str,
    pub kind: InstrumentKind,
    pub unit: &'static str,
    pub help: &'static str,
}

const fn instrument(
    name: &'static str,
    kind: InstrumentKind,
    unit: &'static str,
    help: &'static str,
) -> Instrument {
    Instrument { name, kind, unit, help }
}

use InstrumentKind::{Counter, Gauge, Histogram};

pub const PING_RTT: &str = "network.ping.rtt";
pub const PING_PACKET_LOSS: &str = "network.ping.packet_loss";
pub const HTTP_DURATION: &str = "http.client.duration";
pub const HTTP_STATUS: &str = "http.client.status";

pub const CLIENT_AVAILABILITY: &str = "viaipe.client.availability";
pub const CONNECTION_QUALITY: &str = "viaipe.connection.quality";
pub const BANDWIDTH_USAGE_IN: &str = "viaipe.bandwidth.usage.in";
pub const BANDWIDTH_USAGE_OUT: &str = "viaipe.bandwidth.usage.out";
pub const BANDWIDTH_PEAK_IN: &str = "viaipe.bandwidth.peak.in";
pub const BANDWIDTH_PEAK_OUT: &str = "viaipe.bandwidth.peak.out";
pub const SMOKE_LATENCY: &str = "viaipe.smoke.latency";
pub const SMOKE_LOSS: &str = "viaipe.smoke.loss";
pub const CLIENTS_TOTAL: &str = "viaipe.clients.total";
pub const API_REQUESTS: &str = "viaipe.api.requests";
pub const API_ERRORS: &str = "viaipe.api.errors";

pub const CATALOGUE: &[Instrument] = &[
    instrument(PING_RTT, Histogram, "ms", "Ping round-trip time in milliseconds"),
    instrument(PING_PACKET_LOSS, Histogram, "%", "Ping packet loss percentage"),
    instrument(HTTP_DURATION, Histogram, "ms", "HTTP request duration in milliseconds"),
    instrument(HTTP_STATUS, Counter, "1", "HTTP response status code count"),
    instrument(
        CLIENT_AVAILABILITY,
        Gauge,
        "%",
        "Client availability percentage based on smoke ping loss",
    ),
    instrument(CONNECTION_QUALITY, Gauge, "score", "Connection quality score (0-100)"),
    instrument(BANDWIDTH_USAGE_IN, Gauge, "bps", "Average inbound bandwidth usage"),
    instrument(BANDWIDTH_USAGE_OUT, Gauge, "bps", "Average outbound bandwidth usage"),
    instrument(BANDWIDTH_PEAK_IN, Gauge, "bps", "Peak inbound bandwidth"),
    instrument(BANDWIDTH_PEAK_OUT, Gauge, "bps", "Peak outbound bandwidth"),
    instrument(SMOKE_LATENCY, Gauge, "ms", "Smoke ping latency"),
    instrument(SMOKE_LOSS, Gauge, "%", "Smoke ping packet loss"),
    instrument(CLIENTS_TOTAL, Gauge, "1", "Total number of clients"),
    instrument(API_REQUESTS, Counter, "1", "Number of API requests"),
    instrument(API_ERRORS, Counter, "1", "Number of API errors"),
];

/// Look up a catalogued instrument by name.
pub fn lookup(name: &str) -> Option<&'static Instrument> {
    CATALOGUE.iter().find(|i| i.name == name)
}

/// Histogram buckets suited to the unit of an instrument.
pub fn buckets_for(unit: &str) -> Vec<f64> {
    match unit {
        "ms" => vec![
            1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
        ],
        "%" => vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0],
        _ => prometheus::DEFAULT_BUCKETS.to_vec(),
    }
}
