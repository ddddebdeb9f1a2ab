//! Scheduler that drives a sink until shutdown.

use crate::config::RunnerConfig;
use crate::sink::{BatchEnd, CounterSnapshot, InfluxSink, Status};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, error, info, warn};

/// Exponential backoff between cycles that delivered nothing.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay after the first empty or failed cycle (default: 1s)
    pub base_delay: Duration,
    /// Maximum delay (default: 5s)
    pub max_delay: Duration,
    /// Add ±25% jitter (default: true)
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            jitter: config.jitter,
        }
    }

    /// Disable jitter (for testing).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay after `attempt` consecutive backoffs: min(max, base * 2^attempt).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;

        let capped_ms = base_ms.saturating_mul(1u64 << attempt.min(20)).min(max_ms);

        if !self.jitter {
            return Duration::from_millis(capped_ms);
        }
        let range = capped_ms / 4;
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        Duration::from_millis(capped_ms.saturating_sub(range) + seed % (range * 2 + 1))
    }
}

/// Calls [`InfluxSink::process_cycle`] in a loop, backing off while the channel is
/// empty or delivery fails.
pub struct SinkRunner {
    sink: Arc<InfluxSink>,
    policy: BackoffPolicy,
    stop_when_drained: bool,
    shutdown_tx: broadcast::Sender<()>,
}

impl SinkRunner {
    pub fn new(sink: Arc<InfluxSink>, policy: BackoffPolicy) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            sink,
            policy,
            stop_when_drained: false,
            shutdown_tx,
        }
    }

    /// Return after the first cycle that delivers nothing because the channel
    /// is empty.
    pub fn stop_when_drained(mut self, enabled: bool) -> Self {
        self.stop_when_drained = enabled;
        self
    }

    /// Sender that stops the runner when signalled.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn sink(&self) -> &Arc<InfluxSink> {
        &self.sink
    }

    /// Start the sink, process until shutdown, then stop it.
    ///
    /// Returns the final counters, or the error that stopped the loop. The
    /// sink is stopped in both cases.
    pub async fn run(&self) -> Result<CounterSnapshot> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.sink.start().await?;
        info!(sink = self.sink.name(), "Runner started");

        let outcome = self.run_loop(&mut shutdown_rx).await;
        let snapshot = self.sink.stop().await;

        match outcome {
            Ok(()) => {
                info!(sink = self.sink.name(), "Runner stopped");
                Ok(snapshot)
            }
            Err(e) => {
                error!(sink = self.sink.name(), error = %e, "Runner stopped on fatal error");
                Err(e)
            }
        }
    }

    async fn run_loop(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> Result<()> {
        let mut consecutive_backoffs = 0u32;

        loop {
            if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
                debug!("Shutdown signal received");
                return Ok(());
            }

            match self.sink.process_cycle().await {
                Ok(result) if result.status == Status::Ready => {
                    consecutive_backoffs = 0;
                    continue;
                }
                Ok(result) => {
                    // an empty payload also yields Backoff with events still queued
                    if self.stop_when_drained && result.end == BatchEnd::Drained {
                        info!(sink = self.sink.name(), "Channel drained");
                        return Ok(());
                    }
                }
                Err(e) if e.is_delivery() => {
                    warn!(
                        sink = self.sink.name(),
                        attempt = consecutive_backoffs + 1,
                        error = %e,
                        "Delivery failed, will retry"
                    );
                }
                Err(e) => return Err(e),
            }

            let delay = self.policy.calculate_delay(consecutive_backoffs);
            consecutive_backoffs = consecutive_backoffs.saturating_add(1);
            debug!(delay_ms = delay.as_millis() as u64, "Backing off");

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Shutdown signal received");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
