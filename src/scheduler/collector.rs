//! Orchestrator for the remote-API polling loop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{Lifecycle, RunState, SchedulerError};
use crate::config::CollectorConfig;
use crate::metrics::{DataProcessor, MetricsSink, ProcessSummary, API_ERRORS, API_REQUESTS};
use crate::probe::{ApiSource, ProbeError, RemoteApiClient};

/// Polls the remote API and feeds every payload to the data processor.
pub struct Collector {
    source: Arc<dyn ApiSource>,
    processor: DataProcessor,
    sink: Arc<dyn MetricsSink>,
    poll_interval: Duration,
    lifecycle: Lifecycle,
}

impl Collector {
    pub fn new(config: &CollectorConfig, sink: Arc<dyn MetricsSink>) -> Result<Self, ProbeError> {
        let client = RemoteApiClient::new(config.api_url.clone(), config.timeout)?;
        Ok(Self::with_source(Arc::new(client), sink, config.poll_interval))
    }

    pub fn with_source(
        source: Arc<dyn ApiSource>,
        sink: Arc<dyn MetricsSink>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            processor: DataProcessor::new(sink.clone()),
            sink,
            poll_interval,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.lifecycle.state()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.lifecycle.token()
    }

    /// One polling cycle: fetch, count the request, process.
    ///
    /// Failures are counted under `viaipe.api.errors` with their error
    /// kind and returned; the caller keeps polling regardless.
    pub async fn fetch_and_process(&self) -> Result<ProcessSummary, ProbeError> {
        let result = self.poll().await;
        if let Err(e) = &result {
            let kind = e.error_tag();
            match e {
                ProbeError::Timeout(_) => tracing::error!("API request timeout"),
                ProbeError::HttpStatus(code) => tracing::error!("API HTTP error: {}", code),
                other => tracing::error!("Error fetching/processing data: {}", other),
            }
            let tags = [("error", kind.as_str())];
            if let Err(sink_err) = self.sink.record_counter(API_ERRORS, 1, &tags) {
                tracing::warn!("Failed to count API error: {}", sink_err);
            }
        }
        result
    }

    async fn poll(&self) -> Result<ProcessSummary, ProbeError> {
        let data = self.source.fetch().await?;
        self.sink
            .record_counter(API_REQUESTS, 1, &[("status", "success")])?;
        Ok(self.processor.process_api_data(&data))
    }

    /// Poll until stopped. Fetch and processing errors never end the loop.
    pub async fn run(&self) -> Result<(), SchedulerError> {
        let token = self.lifecycle.begin()?;
        tracing::info!("Starting collector, polling every {:?}", self.poll_interval);

        while !token.is_cancelled() {
            if let Ok(summary) = self.fetch_and_process().await {
                tracing::debug!(
                    "Poll done: {} processed, {} skipped",
                    summary.processed,
                    summary.skipped
                );
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.lifecycle.stop();
        tracing::info!("Collector stopped");
        Ok(())
    }

    pub fn stop(&self) {
        tracing::info!("Stopping collector");
        self.lifecycle.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::RecordingSink;
    use crate::metrics::{CLIENTS_TOTAL, CLIENT_AVAILABILITY};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted responses, then repeats an empty list.
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Value, ProbeError>>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Value, ProbeError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait]
    impl ApiSource for ScriptedSource {
        async fn fetch(&self) -> Result<Value, ProbeError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(json!([])))
        }
    }

    fn client(id: &str) -> Value {
        json!({
            "id": id,
            "name": format!("Client {}", id),
            "data": {"smoke": {"val": 20, "loss": 0, "avg_loss": 1}, "interfaces": []}
        })
    }

    #[tokio::test]
    async fn test_successful_poll_counts_and_processes() {
        let sink = Arc::new(RecordingSink::new());
        let source = ScriptedSource::new(vec![Ok(json!([client("a"), client("b")]))]);
        let collector = Collector::with_source(source, sink.clone(), Duration::from_secs(60));

        let summary = collector.fetch_and_process().await.unwrap();
        assert_eq!(summary.processed, 2);

        let requests = sink.named(API_REQUESTS);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tag("status"), Some("success"));
        assert_eq!(sink.named(CLIENTS_TOTAL)[0].value, 2.0);
        assert_eq!(sink.named(CLIENT_AVAILABILITY).len(), 2);
        assert!(sink.named(API_ERRORS).is_empty());
    }

    #[tokio::test]
    async fn test_errors_are_counted_by_kind() {
        let sink = Arc::new(RecordingSink::new());
        let source = ScriptedSource::new(vec![
            Err(ProbeError::Timeout(Duration::from_secs(30))),
            Err(ProbeError::HttpStatus(502)),
            Err(ProbeError::Transport("dns failure".into())),
        ]);
        let collector = Collector::with_source(source, sink.clone(), Duration::from_secs(60));

        for _ in 0..3 {
            assert!(collector.fetch_and_process().await.is_err());
        }

        let kinds: Vec<String> = sink
            .named(API_ERRORS)
            .iter()
            .filter_map(|m| m.tag("error").map(String::from))
            .collect();
        assert_eq!(kinds, vec!["timeout", "http_502", "unknown"]);
        assert!(sink.named(API_REQUESTS).is_empty());
    }

    #[tokio::test]
    async fn test_non_list_payload_is_counted_but_not_processed() {
        let sink = Arc::new(RecordingSink::new());
        let source = ScriptedSource::new(vec![Ok(json!({"message": "maintenance"}))]);
        let collector = Collector::with_source(source, sink.clone(), Duration::from_secs(60));

        let summary = collector.fetch_and_process().await.unwrap();
        assert_eq!(summary, ProcessSummary::default());
        assert_eq!(sink.named(API_REQUESTS).len(), 1);
        assert!(sink.named(CLIENTS_TOTAL).is_empty());
    }

    #[tokio::test]
    async fn test_request_counter_failure_is_an_unknown_error() {
        let sink = Arc::new(RecordingSink::failing_on(API_REQUESTS));
        let source = ScriptedSource::new(vec![Ok(json!([client("a")]))]);
        let collector = Collector::with_source(source, sink.clone(), Duration::from_secs(60));

        let err = collector.fetch_and_process().await.unwrap_err();
        assert!(matches!(err, ProbeError::Sink(_)));
        assert_eq!(sink.named(API_ERRORS)[0].tag("error"), Some("unknown"));
        assert!(sink.named(CLIENT_AVAILABILITY).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_errors_until_stopped() {
        let sink = Arc::new(RecordingSink::new());
        let source = ScriptedSource::new(vec![
            Err(ProbeError::HttpStatus(500)),
            Ok(json!([client("a")])),
            Err(ProbeError::Timeout(Duration::from_secs(30))),
        ]);
        let collector = Arc::new(Collector::with_source(
            source,
            sink.clone(),
            Duration::from_secs(60),
        ));

        let runner = tokio::spawn({
            let collector = collector.clone();
            async move { collector.run().await }
        });

        // polls at 0, 60, 120 and 180
        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(collector.state(), RunState::Running);
        collector.stop();
        runner.await.unwrap().unwrap();

        assert_eq!(sink.named(API_ERRORS).len(), 2);
        assert_eq!(sink.named(API_REQUESTS).len(), 2);
        assert_eq!(sink.named(CLIENT_AVAILABILITY).len(), 1);
        assert_eq!(collector.state(), RunState::Stopped);
        assert_eq!(collector.run().await.unwrap_err(), SchedulerError::Terminated);
    }
}
