//! Run command: replay spool files through the sink into InfluxDB.

use crate::server::{start_server, ServerState};
use anyhow::{anyhow, Result};
use q2i_core::channel::{read_spool_file, MemoryChannel};
use q2i_core::health::{HealthCheck, CHANNEL};
use q2i_core::runner::{BackoffPolicy, SinkRunner};
use q2i_core::sink::InfluxSink;
use q2i_core::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Command line overrides for `run`.
#[derive(Debug, Default)]
pub struct RunOptions {
    pub spool: Vec<PathBuf>,
    pub batch_size: Option<usize>,
    /// Exit once the channel is drained instead of waiting for a signal.
    pub once: bool,
    pub no_server: bool,
}

/// Load the spool files into a channel and drain it into InfluxDB.
pub async fn run(mut config: Config, options: RunOptions) -> Result<()> {
    if let Some(batch_size) = options.batch_size {
        config.sink.batch_size = batch_size;
    }

    let settings = config.settings().map_err(|issues| {
        anyhow!(
            "Invalid configuration: {}",
            issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        )
    })?;

    let channel = Arc::new(MemoryChannel::new(
        settings.name.clone(),
        config.channel.capacity,
    ));
    for path in &options.spool {
        let events = read_spool_file(path)?;
        let count = channel.put_all(events)?;
        info!(file = %path.display(), events = count, "Spool file loaded");
    }

    let health = Arc::new(HealthCheck::new());
    health.mark_healthy(CHANNEL);
    let sink = Arc::new(InfluxSink::with_health(
        settings,
        channel.clone(),
        Arc::clone(&health),
    ));
    sink.connect().await?;

    let runner = SinkRunner::new(
        Arc::clone(&sink),
        BackoffPolicy::from_config(&config.runner),
    )
    .stop_when_drained(options.once);
    let shutdown_tx = runner.shutdown_signal();

    let (server_shutdown_tx, server_shutdown_rx) = broadcast::channel(1);
    let server = if options.no_server {
        None
    } else {
        let state = Arc::new(ServerState {
            health,
            counter: sink.counter(),
            channel: channel.clone(),
        });
        Some(tokio::spawn(start_server(
            state,
            config.monitoring.health_port,
            config.monitoring.metrics_port,
            server_shutdown_rx,
        )))
    };

    // Forward SIGINT and SIGTERM to the runner
    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_signal.send(());
    });

    let result = runner.run().await;

    let _ = server_shutdown_tx.send(());
    if let Some(server) = server {
        let _ = server.await;
    }

    let snapshot = result?;
    info!(
        delivered = snapshot.event_drain_success_count,
        remaining = channel.len(),
        "Sink stopped"
    );
    println!(
        "Delivered {} events in {} batches ({} left in channel)",
        snapshot.event_drain_success_count,
        snapshot.batch_complete_count,
        channel.len()
    );
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, initiating graceful shutdown");
    }
}
