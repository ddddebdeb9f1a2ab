//! Status command implementation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Health response from the server.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    running: bool,
    uptime_seconds: Option<u64>,
    #[serde(default)]
    components: BTreeMap<String, ComponentStatus>,
}

/// Component status from the server.
#[derive(Debug, Deserialize)]
struct ComponentStatus {
    status: String,
    reason: Option<String>,
}

/// Show health and metrics of a running sink.
pub async fn run(url: &str, metrics_url: &str) -> Result<()> {
    println!("Checking health at {}...\n", url);

    let health_url = format!("{}/health", url.trim_end_matches('/'));
    let client = reqwest::Client::new();

    match client.get(&health_url).send().await {
        Ok(response) => {
            let status_code = response.status();
            match response.json::<HealthResponse>().await {
                Ok(health) => print_health_status(&health, status_code.as_u16()),
                Err(e) => {
                    println!("Failed to parse health response: {}", e);
                    println!("HTTP Status: {}", status_code);
                }
            }
        }
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs the q2i sink running?");
            println!("Start it with: q2i run --config <path-to-config> --spool <file>");
            return Ok(());
        }
    }

    let metrics_url = format!("{}/metrics", metrics_url.trim_end_matches('/'));
    println!("\n--- Metrics ---");
    println!("Fetching from {}...\n", metrics_url);

    match client.get(&metrics_url).send().await {
        Ok(response) => {
            let text = response.text().await.context("Failed to read metrics")?;
            print_metrics(&text);
        }
        Err(e) => println!("Failed to fetch metrics: {}", e),
    }

    Ok(())
}

fn status_marker(status: &str) -> &'static str {
    match status {
        "healthy" => "[OK]",
        "degraded" => "[WARN]",
        "unhealthy" => "[FAIL]",
        _ => "[?]",
    }
}

fn print_health_status(health: &HealthResponse, status_code: u16) {
    println!(
        "{} Overall Status: {} (HTTP {})",
        status_marker(&health.status),
        health.status.to_uppercase(),
        status_code
    );
    match (health.running, health.uptime_seconds) {
        (true, Some(uptime)) => println!("Sink running for {}s", uptime),
        (true, None) => println!("Sink running"),
        (false, _) => println!("Sink stopped"),
    }
    println!();

    if !health.components.is_empty() {
        println!("Components:");
        for (name, status) in &health.components {
            let marker = status_marker(&status.status);
            match &status.reason {
                Some(reason) => println!("  {} {}: {} ({})", marker, name, status.status, reason),
                None => println!("  {} {}: {}", marker, name, status.status),
            }
        }
    }
}

/// Parse Prometheus text into metric name (labels stripped) to value.
fn parse_metrics(text: &str) -> HashMap<&str, u64> {
    let mut values = HashMap::new();
    for line in text.lines() {
        if line.starts_with('#') || line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        if let (Some(name), Some(value)) = (parts.next(), parts.next()) {
            let name = name.split('{').next().unwrap_or(name);
            if let Ok(value) = value.parse::<u64>() {
                values.insert(name, value);
            }
        }
    }
    values
}

fn print_metrics(metrics_text: &str) {
    let values = parse_metrics(metrics_text);

    let rows = [
        ("q2i_event_drain_success_total", "Events Delivered:  "),
        ("q2i_event_drain_attempt_total", "Events Attempted:  "),
        ("q2i_batch_complete_total", "Batches Complete:  "),
        ("q2i_batch_empty_total", "Batches Empty:     "),
        ("q2i_batch_underflow_total", "Batches Underflow: "),
        ("q2i_connection_failed_total", "Connection Errors: "),
        ("q2i_channel_depth", "Channel Depth:     "),
    ];
    for (metric, label) in rows {
        if let Some(v) = values.get(metric) {
            println!("{}{}", label, format_number(*v));
        }
    }

    if values.is_empty() {
        println!("No metrics available yet.");
    }
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metrics_strips_labels() {
        let text = "# HELP q2i_batch_empty_total x\n\
                    # TYPE q2i_batch_empty_total counter\n\
                    q2i_batch_empty_total{sink=\"influx\"} 7\n\
                    \n\
                    q2i_channel_depth 3\n";
        let values = parse_metrics(text);
        assert_eq!(values.get("q2i_batch_empty_total"), Some(&7));
        assert_eq!(values.get("q2i_channel_depth"), Some(&3));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_500), "1.50K");
        assert_eq!(format_number(2_000_000), "2.00M");
    }

    #[test]
    fn test_health_response_parsing() {
        let body = r#"{"status":"degraded","running":true,"uptime_seconds":12,
            "components":{"influxdb":{"status":"degraded","reason":"timeout"},
            "channel":{"status":"healthy"}}}"#;
        let health: HealthResponse = serde_json::from_str(body).unwrap();
        assert_eq!(health.status, "degraded");
        assert_eq!(
            health.components["influxdb"].reason.as_deref(),
            Some("timeout")
        );
        assert!(health.components["channel"].reason.is_none());
    }
}
