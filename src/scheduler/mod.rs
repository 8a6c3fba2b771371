//! Scheduler module for running probes on a fixed cadence.
//!
//! Each probe kind gets its own loop. A tick fans out one check per target
//! and waits for all of them before sleeping, so ticks never overlap.
//! Loops observe a [`CancellationToken`] at tick boundaries only; checks
//! already in flight always run to completion.

mod collector;
mod network;

pub use collector::*;
pub use network::*;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::metrics::PrometheusSink;
use crate::probe::Probe;

/// Scheduler error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("already running")]
    AlreadyStarted,
    #[error("already stopped; create a new instance to run again")]
    Terminated,
    #[error("probe task failed: {0}")]
    TaskFailed(String),
}

/// Lifecycle of an orchestrator. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Stopped,
}

/// Run flag plus the token that tells loops to wind down.
pub(crate) struct Lifecycle {
    state: Mutex<RunState>,
    token: CancellationToken,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RunState::Idle),
            token: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn state(&self) -> RunState {
        *self.lock()
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Idle -> Running.
    pub(crate) fn begin(&self) -> Result<CancellationToken, SchedulerError> {
        let mut state = self.lock();
        match *state {
            RunState::Idle => {
                *state = RunState::Running;
                Ok(self.token.clone())
            }
            RunState::Running => Err(SchedulerError::AlreadyStarted),
            RunState::Stopped => Err(SchedulerError::Terminated),
        }
    }

    /// Ask running loops to stop after their current tick.
    pub(crate) fn stop(&self) {
        *self.lock() = RunState::Stopped;
        self.token.cancel();
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Check every target concurrently and wait for all of them.
///
/// A failed check is logged and counted. A check task that panics or is
/// aborted fails the whole tick.
pub async fn run_tick<P>(probe: &Arc<P>, targets: &[String]) -> Result<TickSummary, SchedulerError>
where
    P: Probe + ?Sized + 'static,
{
    let mut checks = JoinSet::new();
    for target in targets {
        let probe = Arc::clone(probe);
        let target = target.clone();
        checks.spawn(async move {
            let outcome = probe.check(&target).await.map(|_| ());
            (target, outcome)
        });
    }

    let mut summary = TickSummary::default();
    while let Some(joined) = checks.join_next().await {
        let (target, outcome) = joined.map_err(|e| SchedulerError::TaskFailed(e.to_string()))?;
        match outcome {
            Ok(()) => summary.succeeded += 1,
            Err(e) => {
                tracing::debug!("{} check failed for {}: {}", probe.kind(), target, e);
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

/// Drive `probe` over `targets` every `interval` until `token` is cancelled.
pub async fn run_probe_loop<P>(
    probe: Arc<P>,
    targets: Arc<[String]>,
    interval: Duration,
    token: CancellationToken,
) -> Result<(), SchedulerError>
where
    P: Probe + ?Sized + 'static,
{
    let kind = probe.kind();
    tracing::info!(
        "Starting {} loop: {} targets every {:?}",
        kind,
        targets.len(),
        interval
    );

    while !token.is_cancelled() {
        let summary = run_tick(&probe, &targets).await.inspect_err(|e| {
            tracing::error!("{} loop aborted: {}", kind, e);
        })?;
        tracing::debug!(
            "{} tick done: {} ok, {} failed",
            kind,
            summary.succeeded,
            summary.failed
        );

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::info!("{} loop stopped", kind);
    Ok(())
}

/// Wait for the metrics exporter's final flush after an orchestrator run.
///
/// The run's own outcome is always what comes back; exporter or encoding
/// trouble at this point is only logged.
pub async fn wind_down(
    result: Result<(), SchedulerError>,
    exporter: tokio::task::JoinHandle<()>,
    sink: &PrometheusSink,
) -> Result<(), SchedulerError> {
    if let Err(e) = exporter.await {
        tracing::warn!("Metrics exporter task failed: {}", e);
    }
    match sink.encode_text() {
        Ok(text) => tracing::debug!("Final metrics:\n{}", text),
        Err(e) => tracing::warn!("Failed to encode final metrics: {}", e),
    }
    result
}

/// Cancel `token` on the first interrupt signal.
pub fn cancel_on_ctrl_c(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    tracing::info!("Received interrupt, shutting down");
                    token.cancel();
                }
                Err(e) => tracing::error!("Failed to listen for interrupt: {}", e),
            },
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::probe::{Probe, ProbeError};

    /// Fake probe that asserts ticks never overlap.
    ///
    /// Checks are numbered in start order; check `i` belongs to tick
    /// `i / targets`, and no check may start before every check of the
    /// previous tick has finished.
    pub struct BarrierProbe {
        targets: usize,
        delays: HashMap<String, Duration>,
        failing: Option<String>,
        started: AtomicUsize,
        finished: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl BarrierProbe {
        pub fn new(delays: &[(&str, u64)]) -> Self {
            Self {
                targets: delays.len(),
                delays: delays
                    .iter()
                    .map(|(t, ms)| (t.to_string(), Duration::from_millis(*ms)))
                    .collect(),
                failing: None,
                started: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        pub fn failing_for(mut self, target: &str) -> Self {
            self.failing = Some(target.to_string());
            self
        }

        pub fn targets(&self) -> Vec<String> {
            let mut targets: Vec<String> = self.delays.keys().cloned().collect();
            targets.sort();
            targets
        }

        pub fn started(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        pub fn finished(&self) -> usize {
            self.finished.load(Ordering::SeqCst)
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Probe for BarrierProbe {
        type Output = ();

        fn kind(&self) -> &'static str {
            "fake"
        }

        async fn check(&self, target: &str) -> Result<(), ProbeError> {
            let index = self.started.fetch_add(1, Ordering::SeqCst);
            let tick = index / self.targets;
            assert!(
                self.finished.load(Ordering::SeqCst) >= tick * self.targets,
                "check {} of tick {} started before the previous tick finished",
                index,
                tick
            );

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = self.delays.get(target).copied().unwrap_or_default();
            tokio::time::sleep(delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);

            if self.failing.as_deref() == Some(target) {
                return Err(ProbeError::Transport("connection refused".into()));
            }
            Ok(())
        }
    }

    /// Fake probe whose checks panic.
    pub struct PanickingProbe;

    #[async_trait]
    impl Probe for PanickingProbe {
        type Output = ();

        fn kind(&self) -> &'static str {
            "panicking"
        }

        async fn check(&self, _target: &str) -> Result<(), ProbeError> {
            panic!("probe exploded");
        }
    }
}
