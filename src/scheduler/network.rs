//! Orchestrator for the ping and HTTP loops of the network monitor.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{run_probe_loop, Lifecycle, RunState, SchedulerError};
use crate::config::NetworkMonitorConfig;
use crate::metrics::MetricsSink;
use crate::probe::{HttpProbe, HttpResult, IcmpPinger, PingProbe, PingResult, Probe, ProbeError};

/// Runs one ping loop and one HTTP loop over the same target list.
pub struct NetworkMonitor {
    targets: Arc<[String]>,
    ping: Arc<dyn Probe<Output = PingResult>>,
    http: Arc<dyn Probe<Output = HttpResult>>,
    ping_interval: Duration,
    http_interval: Duration,
    lifecycle: Lifecycle,
}

impl NetworkMonitor {
    /// Build the monitor with native ICMP and HTTPS probes.
    pub fn new(config: &NetworkMonitorConfig, sink: Arc<dyn MetricsSink>) -> Result<Self, ProbeError> {
        let ping = PingProbe::new(Arc::new(IcmpPinger), sink.clone())
            .with_count(config.ping_count)
            .with_timeout(config.ping_timeout);
        let http = HttpProbe::new(sink)?.with_timeout(config.http_timeout);

        Ok(Self::with_probes(
            config.targets.clone(),
            Arc::new(ping),
            Arc::new(http),
            config.ping_interval,
            config.http_interval,
        ))
    }

    pub fn with_probes(
        targets: Vec<String>,
        ping: Arc<dyn Probe<Output = PingResult>>,
        http: Arc<dyn Probe<Output = HttpResult>>,
        ping_interval: Duration,
        http_interval: Duration,
    ) -> Self {
        Self {
            targets: targets.into(),
            ping,
            http,
            ping_interval,
            http_interval,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn state(&self) -> RunState {
        self.lifecycle.state()
    }

    /// Token that stops both loops at their next tick boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.lifecycle.token()
    }

    /// Run both loops until stopped or until either loop fails.
    ///
    /// A failing loop takes the other one down with it. The monitor ends
    /// in [`RunState::Stopped`] either way and cannot be run again.
    pub async fn run(&self) -> Result<(), SchedulerError> {
        let token = self.lifecycle.begin()?;
        tracing::info!("Starting network monitor for targets: {:?}", self.targets);

        let result = tokio::try_join!(
            run_probe_loop(
                self.ping.clone(),
                self.targets.clone(),
                self.ping_interval,
                token.clone(),
            ),
            run_probe_loop(
                self.http.clone(),
                self.targets.clone(),
                self.http_interval,
                token,
            ),
        );

        self.lifecycle.stop();
        match &result {
            Ok(_) => tracing::info!("Network monitor stopped"),
            Err(e) => tracing::error!("Network monitor failed: {}", e),
        }
        result.map(|_| ())
    }

    /// Stop both loops after their current tick.
    pub fn stop(&self) {
        tracing::info!("Stopping network monitor");
        self.lifecycle.stop();
    }
}
