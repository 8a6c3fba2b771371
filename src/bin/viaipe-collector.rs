//! ViaIpe collector: polls the remote API and exports per-client metrics.

use std::sync::Arc;

use netwatch::config::CollectorConfig;
use netwatch::health::HealthServer;
use netwatch::metrics::{PrometheusSink, PushExporter};
use netwatch::scheduler::{cancel_on_ctrl_c, wind_down, Collector};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    netwatch::logging::init("netwatch=info,viaipe_collector=info")?;

    let cfg = CollectorConfig::load();
    tracing::info!("Starting ViaIpe collector for {}", cfg.api_url);
    tracing::info!(
        "Telemetry: service {} (collector {})",
        cfg.telemetry.service_name,
        cfg.telemetry.collector_endpoint
    );

    HealthServer::bind(cfg.health_port)?.spawn()?;

    let sink = Arc::new(PrometheusSink::new(&cfg.telemetry.service_name)?);
    let collector = Collector::new(&cfg, sink.clone())?;
    cancel_on_ctrl_c(collector.cancellation_token());
    let exporter = tokio::spawn(
        PushExporter::new(sink.clone(), &cfg.telemetry).run(collector.cancellation_token()),
    );

    let result = collector.run().await;
    tracing::info!("Collector exited in state {:?}", collector.state());
    wind_down(result, exporter, &sink).await?;
    Ok(())
}
