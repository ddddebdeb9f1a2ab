//! Component health for the sink's health endpoint.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;

/// Component name of the source channel.
pub const CHANNEL: &str = "channel";
/// Component name of the InfluxDB connection.
pub const INFLUXDB: &str = "influxdb";

/// Health status of a component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Operational, but the last cycle failed and will be retried
    Degraded(String),
    Unhealthy(String),
    Unknown,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Serializable view returned by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub running: bool,
    pub uptime_seconds: Option<u64>,
    pub components: BTreeMap<String, ComponentStatus>,
}

/// Tracks the health of the sink's components.
pub struct HealthCheck {
    components: RwLock<BTreeMap<String, ComponentStatus>>,
    started_at: RwLock<Option<Instant>>,
    running: RwLock<bool>,
}

impl HealthCheck {
    /// Create a health check with the channel and InfluxDB components registered.
    pub fn new() -> Self {
        let health = Self::empty();
        health.register_component(CHANNEL);
        health.register_component(INFLUXDB);
        health
    }

    /// Create a health check with no components.
    pub fn empty() -> Self {
        Self {
            components: RwLock::new(BTreeMap::new()),
            started_at: RwLock::new(None),
            running: RwLock::new(false),
        }
    }

    pub fn register_component(&self, name: &str) {
        self.components
            .write()
            .insert(name.to_string(), ComponentStatus::Unknown);
    }

    pub fn mark_healthy(&self, name: &str) {
        self.components
            .write()
            .insert(name.to_string(), ComponentStatus::Healthy);
    }

    pub fn mark_degraded(&self, name: &str, reason: &str) {
        self.components.write().insert(
            name.to_string(),
            ComponentStatus::Degraded(reason.to_string()),
        );
    }

    pub fn mark_unhealthy(&self, name: &str, reason: &str) {
        self.components.write().insert(
            name.to_string(),
            ComponentStatus::Unhealthy(reason.to_string()),
        );
    }

    pub fn get_component_status(&self, name: &str) -> Option<ComponentStatus> {
        self.components.read().get(name).cloned()
    }

    /// Overall status: the worst status of any component.
    pub fn overall_status(&self) -> HealthStatus {
        let components = self.components.read();

        let mut has_degraded = false;
        for status in components.values() {
            match status {
                ComponentStatus::Unhealthy(_) => return HealthStatus::Unhealthy,
                ComponentStatus::Degraded(_) => has_degraded = true,
                _ => {}
            }
        }

        if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Healthy or degraded.
    pub fn is_operational(&self) -> bool {
        self.overall_status() != HealthStatus::Unhealthy
    }

    pub fn sink_started(&self) {
        *self.running.write() = true;
        *self.started_at.write() = Some(Instant::now());
    }

    pub fn sink_stopped(&self) {
        *self.running.write() = false;
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: self.overall_status(),
            running: self.is_running(),
            uptime_seconds: self.started_at.read().map(|t| t.elapsed().as_secs()),
            components: self.components.read().clone(),
        }
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_components() {
        let health = HealthCheck::new();
        assert_eq!(
            health.get_component_status(CHANNEL),
            Some(ComponentStatus::Unknown)
        );
        assert_eq!(
            health.get_component_status(INFLUXDB),
            Some(ComponentStatus::Unknown)
        );
        assert_eq!(health.overall_status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_status_priority() {
        let health = HealthCheck::new();
        health.mark_healthy(CHANNEL);
        health.mark_healthy(INFLUXDB);
        assert_eq!(health.overall_status(), HealthStatus::Healthy);

        health.mark_degraded(INFLUXDB, "write failed");
        assert_eq!(health.overall_status(), HealthStatus::Degraded);
        assert!(health.is_operational());

        health.mark_unhealthy(CHANNEL, "rollback failed");
        assert_eq!(health.overall_status(), HealthStatus::Unhealthy);
        assert!(!health.is_operational());

        // recovery
        health.mark_healthy(CHANNEL);
        health.mark_healthy(INFLUXDB);
        assert_eq!(health.overall_status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_running_lifecycle() {
        let health = HealthCheck::new();
        assert!(!health.is_running());
        assert!(health.report().uptime_seconds.is_none());

        health.sink_started();
        assert!(health.is_running());
        assert!(health.report().uptime_seconds.is_some());

        health.sink_stopped();
        assert!(!health.is_running());
    }

    #[test]
    fn test_report_serialization() {
        let health = HealthCheck::new();
        health.mark_degraded(INFLUXDB, "timeout");
        let json = serde_json::to_value(health.report()).unwrap();

        assert_eq!(json["status"], "degraded");
        assert_eq!(json["components"]["influxdb"]["status"], "degraded");
        assert_eq!(json["components"]["influxdb"]["reason"], "timeout");
        assert_eq!(json["components"]["channel"]["status"], "unknown");
    }
}
