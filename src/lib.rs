//! Network and remote-API monitoring agents.
//!
//! Two agents share this library: `network-monitor` pings and fetches a
//! list of hosts, `viaipe-collector` polls the ViaIpe API and derives
//! per-client quality metrics. Both record into a [`metrics::MetricsSink`].

pub mod config;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod probe;
pub mod scheduler;
