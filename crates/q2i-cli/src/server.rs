//! HTTP server for health and metrics endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use q2i_core::channel::MemoryChannel;
use q2i_core::health::{HealthCheck, HealthStatus};
use q2i_core::sink::SinkCounter;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Shared state for HTTP endpoints.
pub struct ServerState {
    pub health: Arc<HealthCheck>,
    pub counter: Arc<SinkCounter>,
    pub channel: Arc<MemoryChannel>,
}

fn health_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

fn metrics_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve health and metrics until shutdown.
pub async fn start_server(
    state: Arc<ServerState>,
    health_port: u16,
    metrics_port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let health_addr = SocketAddr::from(([0, 0, 0, 0], health_port));
    let health_listener = match tokio::net::TcpListener::bind(health_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port = health_port, "Failed to bind health server");
            return;
        }
    };
    info!(port = health_port, "Health server started");

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
    let metrics_listener = match tokio::net::TcpListener::bind(metrics_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port = metrics_port, "Failed to bind metrics server");
            return;
        }
    };
    info!(port = metrics_port, "Metrics server started");

    let health_server = axum::serve(health_listener, health_router(Arc::clone(&state)));
    let metrics_server = axum::serve(metrics_listener, metrics_router(state));

    tokio::select! {
        result = health_server => {
            if let Err(e) = result {
                error!(error = %e, "Health server error");
            }
        }
        result = metrics_server => {
            if let Err(e) = result {
                error!(error = %e, "Metrics server error");
            }
        }
        _ = shutdown_rx.recv() => {
            info!("HTTP servers shutting down");
        }
    }
}

/// Full health report.
async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let report = state.health.report();
    let status_code = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(report))
}

/// Liveness: the sink has not hit a fatal error.
async fn healthz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.health.overall_status() != HealthStatus::Unhealthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Readiness: the sink is running and operational.
async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.health.is_running() && state.health.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics.
async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let mut output = state.counter.export_prometheus_text("q2i");

    output.push_str("# HELP q2i_channel_depth Events waiting in the channel\n");
    output.push_str("# TYPE q2i_channel_depth gauge\n");
    output.push_str(&format!("q2i_channel_depth {}\n\n", state.channel.len()));

    output.push_str("# HELP q2i_channel_in_flight Events taken by an open transaction\n");
    output.push_str("# TYPE q2i_channel_in_flight gauge\n");
    output.push_str(&format!("q2i_channel_in_flight {}\n", state.channel.in_flight()));

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        output,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use q2i_core::channel::Event;
    use q2i_core::health::INFLUXDB;

    fn state() -> Arc<ServerState> {
        Arc::new(ServerState {
            health: Arc::new(HealthCheck::new()),
            counter: Arc::new(SinkCounter::new("influx")),
            channel: Arc::new(MemoryChannel::new("mem", 10)),
        })
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_include_counters_and_depth() {
        let state = state();
        state.counter.increment_batch_complete();
        state.channel.put(Event::new(vec![1u8])).unwrap();

        let response = metrics_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;

        assert!(text.contains("q2i_batch_complete_total{sink=\"influx\"} 1"));
        assert!(text.contains("q2i_channel_depth 1"));
        assert!(text.contains("q2i_channel_in_flight 0"));
    }

    #[tokio::test]
    async fn test_health_reflects_components() {
        let state = state();
        state.health.mark_degraded(INFLUXDB, "write failed");

        let response = health_handler(State(Arc::clone(&state))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["components"]["influxdb"]["reason"], "write failed");

        state.health.mark_unhealthy(INFLUXDB, "down");
        let response = health_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_readiness_requires_running_sink() {
        let state = state();
        let response = readyz_handler(State(Arc::clone(&state))).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.health.sink_started();
        let response = readyz_handler(State(Arc::clone(&state))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let response = healthz_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
