//! InfluxDB sink: lifecycle around the batch consumer.
//!
//! `configure` → `start` → `process`* → `stop`. Start, stop and process
//! share one async mutex, so a lifecycle change never overlaps a running
//! cycle.

mod consumer;
mod counter;

pub use consumer::{BatchConsumer, BatchCycleResult, BatchEnd, Status};
pub use counter::{CounterSnapshot, SinkCounter};

use crate::channel::Channel;
use crate::config::SinkSettings;
use crate::health::{HealthCheck, CHANNEL, INFLUXDB};
use crate::influx::{HttpInfluxClient, TimeSeriesClient};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct SinkState {
    running: bool,
    client: Option<Arc<dyn TimeSeriesClient>>,
    consumer: Option<BatchConsumer>,
}

/// Sink that drains a channel into InfluxDB.
pub struct InfluxSink {
    settings: SinkSettings,
    channel: Arc<dyn Channel>,
    counter: Arc<SinkCounter>,
    health: Arc<HealthCheck>,
    state: Mutex<SinkState>,
}

impl InfluxSink {
    /// Create an unconfigured sink reading from `channel`.
    pub fn new(settings: SinkSettings, channel: Arc<dyn Channel>) -> Self {
        Self::with_health(settings, channel, Arc::new(HealthCheck::new()))
    }

    /// Create an unconfigured sink reporting into a shared health check.
    pub fn with_health(
        settings: SinkSettings,
        channel: Arc<dyn Channel>,
        health: Arc<HealthCheck>,
    ) -> Self {
        let counter = Arc::new(SinkCounter::new(settings.name.clone()));
        Self {
            settings,
            channel,
            counter,
            health,
            state: Mutex::new(SinkState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &SinkSettings {
        &self.settings
    }

    pub fn counter(&self) -> Arc<SinkCounter> {
        Arc::clone(&self.counter)
    }

    pub fn health(&self) -> Arc<HealthCheck> {
        Arc::clone(&self.health)
    }

    /// Build an HTTP client from the settings, check the server answers, and
    /// configure the sink with it.
    pub async fn connect(&self) -> Result<()> {
        let connected = match HttpInfluxClient::connect(&self.settings.influx) {
            Ok(client) => client.ping().await.map(|version| (client, version)),
            Err(e) => Err(e),
        };
        let (client, version) = match connected {
            Ok(connected) => connected,
            Err(e) => {
                self.counter.increment_connection_failed();
                self.health.mark_unhealthy(INFLUXDB, &e.to_string());
                error!(sink = %self.settings.name, error = %e, "Failed to connect to InfluxDB");
                return Err(e);
            }
        };
        info!(url = client.base_url(), version = %version, "Connected to InfluxDB");
        self.configure(Arc::new(client)).await
    }

    /// Prepare `client` for writing: ensure the database exists, select it and
    /// the retention policy, and enable batched writes.
    pub async fn configure(&self, client: Arc<dyn TimeSeriesClient>) -> Result<()> {
        let mut state = self.state.lock().await;
        let influx = &self.settings.influx;

        if let Err(e) = Self::prepare(client.as_ref(), &self.settings).await {
            self.counter.increment_connection_failed();
            self.health.mark_unhealthy(INFLUXDB, &e.to_string());
            error!(
                sink = %self.settings.name,
                host = %influx.host,
                port = influx.port,
                error = %e,
                "Failed to configure InfluxDB connection"
            );
            return Err(e);
        }

        self.counter.increment_connection_created();
        self.health.mark_healthy(INFLUXDB);
        info!(
            sink = %self.settings.name,
            host = %influx.host,
            port = influx.port,
            database = %influx.database,
            retention_policy = %influx.retention_policy,
            batch_size = self.settings.batch_size,
            "InfluxDB sink configured"
        );

        state.consumer = Some(BatchConsumer::new(
            Arc::clone(&self.channel),
            Arc::clone(&client),
            Arc::clone(&self.counter),
        ));
        state.client = Some(client);
        Ok(())
    }

    async fn prepare(client: &dyn TimeSeriesClient, settings: &SinkSettings) -> Result<()> {
        let influx = &settings.influx;
        if !client.database_exists(&influx.database).await? {
            info!(database = %influx.database, "Creating database");
            client.create_database(&influx.database).await?;
        }
        client.set_database(&influx.database);
        client.set_retention_policy(&influx.retention_policy);
        client.enable_batching(settings.batch_size, influx.flush_interval);
        Ok(())
    }

    /// Reset counters and accept `process` calls.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.consumer.is_none() {
            return Err(Error::Config(format!(
                "sink '{}' must be configured before start",
                self.settings.name
            )));
        }
        if state.running {
            debug!(sink = %self.settings.name, "Sink already running");
            return Ok(());
        }

        self.counter.start();
        self.health.sink_started();
        state.running = true;
        info!(sink = %self.settings.name, channel = self.channel.name(), "Sink started");
        Ok(())
    }

    /// Run one batch cycle.
    pub async fn process(&self) -> Result<Status> {
        self.process_cycle().await.map(|result| result.status)
    }

    /// Run one batch cycle and report how its take loop ended.
    pub async fn process_cycle(&self) -> Result<BatchCycleResult> {
        let mut state = self.state.lock().await;
        if !state.running {
            return Err(Error::NotRunning);
        }
        let consumer = state.consumer.as_mut().ok_or(Error::NotRunning)?;

        match consumer.run_cycle(self.settings.batch_size).await {
            Ok(result) => {
                self.health.mark_healthy(CHANNEL);
                if result.processed > 0 {
                    self.health.mark_healthy(INFLUXDB);
                }
                Ok(result)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    fn record_failure(&self, err: &Error) {
        match err {
            Error::TransactionFailure { .. } => {
                self.health.mark_unhealthy(CHANNEL, &err.to_string());
            }
            Error::Delivery { cause } => match cause.as_ref() {
                Error::Influx(e) => self.health.mark_degraded(INFLUXDB, &e.to_string()),
                Error::Channel(e) => self.health.mark_degraded(CHANNEL, &e.to_string()),
                _ => {}
            },
            _ => {}
        }
    }

    /// Close the client, stop the counters and return their final values.
    ///
    /// Safe to call before `start` and more than once.
    pub async fn stop(&self) -> CounterSnapshot {
        let mut state = self.state.lock().await;

        if let Some(client) = state.client.as_ref() {
            if !client.is_closed() {
                if let Err(e) = client.close().await {
                    warn!(sink = %self.settings.name, error = %e, "Error closing InfluxDB client");
                }
                self.counter.increment_connection_closed();
            }
        }

        let was_running = std::mem::replace(&mut state.running, false);
        self.counter.stop();
        self.health.sink_stopped();

        if was_running {
            info!(sink = %self.settings.name, metrics = %self.counter, "Sink stopped");
        }
        self.counter.snapshot()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }
}
