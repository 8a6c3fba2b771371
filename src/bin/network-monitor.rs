//! Network monitor: ICMP and HTTP checks against a fixed list of targets.

use std::sync::Arc;

use netwatch::config::NetworkMonitorConfig;
use netwatch::health::HealthServer;
use netwatch::metrics::{PrometheusSink, PushExporter};
use netwatch::scheduler::{cancel_on_ctrl_c, wind_down, NetworkMonitor};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    netwatch::logging::init("netwatch=info,network_monitor=info")?;

    let cfg = NetworkMonitorConfig::load();
    tracing::info!("Starting network monitor for targets: {:?}", cfg.targets);
    tracing::info!(
        "Telemetry: service {} (collector {})",
        cfg.telemetry.service_name,
        cfg.telemetry.collector_endpoint
    );

    HealthServer::bind(cfg.health_port)?.spawn()?;

    let sink = Arc::new(PrometheusSink::new(&cfg.telemetry.service_name)?);
    let monitor = NetworkMonitor::new(&cfg, sink.clone())?;
    cancel_on_ctrl_c(monitor.cancellation_token());
    let exporter = tokio::spawn(
        PushExporter::new(sink.clone(), &cfg.telemetry).run(monitor.cancellation_token()),
    );

    let result = monitor.run().await;
    tracing::info!("Network monitor exited in state {:?}", monitor.state());
    wind_down(result, exporter, &sink).await?;
    Ok(())
}
