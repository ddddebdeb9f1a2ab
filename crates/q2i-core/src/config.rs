//! Configuration structures for q2i.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.
//! Connection settings are optional at the serde level so that
//! [`Config::settings`] can report every missing or invalid value at once;
//! the sink is only ever built from the validated [`SinkSettings`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// InfluxDB connection configuration
    #[serde(default)]
    pub influxdb: InfluxConfig,

    /// Sink configuration
    #[serde(default)]
    pub sink: SinkConfig,

    /// In-memory channel configuration
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Scheduler backoff configuration
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// InfluxDB connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InfluxConfig {
    /// Server host (required)
    pub host: Option<String>,

    /// Server HTTP port (required)
    pub port: Option<u16>,

    /// User name (required, may be empty for unauthenticated servers)
    pub user: Option<String>,

    /// Password (required)
    pub password: Option<String>,

    /// Target database (required, created when missing)
    pub database: Option<String>,

    /// Retention policy used for writes
    #[serde(default = "default_retention_policy")]
    pub retention_policy: String,

    /// Interval at which buffered writes are flushed, in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// HTTP request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            retention_policy: default_retention_policy(),
            flush_interval_ms: default_flush_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    /// Sink name used in logs and metrics
    #[serde(default = "default_sink_name")]
    pub name: String,

    /// Maximum events per transaction (also the write batch size)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            name: default_sink_name(),
            batch_size: default_batch_size(),
        }
    }
}

/// In-memory channel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// Maximum number of events held by the channel
    #[serde(default = "default_channel_capacity")]
    pub capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: default_channel_capacity(),
        }
    }
}

/// Scheduler backoff configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Delay after the first backoff, in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff delay cap, in milliseconds
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Randomize delays by ±25%
    #[serde(default = "default_enabled")]
    pub jitter: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            jitter: default_enabled(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Metrics HTTP port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Health check HTTP port
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            health_port: default_health_port(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive string for an env filter.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions

fn default_retention_policy() -> String {
    "autogen".into()
}
fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_sink_name() -> String {
    "influxdb-sink".into()
}
fn default_batch_size() -> usize {
    100
}
fn default_channel_capacity() -> usize {
    10_000
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    5000
}
fn default_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9090
}

fn default_health_port() -> u16 {
    8080
}

/// A single configuration problem.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    /// A required value is absent
    #[error("missing configuration: {0}")]
    Missing(&'static str),

    /// A value is present but unusable
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Validated InfluxDB connection settings.
#[derive(Debug, Clone)]
pub struct InfluxSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub retention_policy: String,
    pub flush_interval: Duration,
    pub request_timeout: Duration,
}

/// Validated settings the sink is built from.
#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub name: String,
    pub batch_size: usize,
    pub influx: InfluxSettings,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, folding all issues into one error.
    pub fn validate(&self) -> crate::Result<()> {
        self.settings().map(|_| ()).map_err(|issues| {
            crate::Error::Config(
                issues
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })
    }

    /// Validate the configuration and produce sink settings, or every issue found.
    pub fn settings(&self) -> Result<SinkSettings, Vec<ConfigIssue>> {
        let mut issues = Vec::new();
        let influx = &self.influxdb;

        let host = required_str(&mut issues, "influxdb.host", &influx.host);
        let user = influx.user.clone();
        if user.is_none() {
            issues.push(ConfigIssue::Missing("influxdb.user"));
        }
        let password = influx.password.clone();
        if password.is_none() {
            issues.push(ConfigIssue::Missing("influxdb.password"));
        }
        let database = required_str(&mut issues, "influxdb.database", &influx.database);

        let port = match influx.port {
            None => {
                issues.push(ConfigIssue::Missing("influxdb.port"));
                None
            }
            Some(0) => {
                issues.push(ConfigIssue::Invalid {
                    field: "influxdb.port",
                    reason: "must be non-zero".into(),
                });
                None
            }
            Some(port) => Some(port),
        };

        if self.sink.batch_size == 0 {
            issues.push(ConfigIssue::Invalid {
                field: "sink.batch_size",
                reason: "must be at least 1".into(),
            });
        }
        if influx.flush_interval_ms == 0 {
            issues.push(ConfigIssue::Invalid {
                field: "influxdb.flush_interval_ms",
                reason: "must be at least 1".into(),
            });
        }
        if self.channel.capacity == 0 {
            issues.push(ConfigIssue::Invalid {
                field: "channel.capacity",
                reason: "must be at least 1".into(),
            });
        }
        if self.runner.backoff_max_ms < self.runner.backoff_base_ms {
            issues.push(ConfigIssue::Invalid {
                field: "runner.backoff_max_ms",
                reason: format!(
                    "{} is below backoff_base_ms {}",
                    self.runner.backoff_max_ms, self.runner.backoff_base_ms
                ),
            });
        }

        match (host, port, user, password, database) {
            (Some(host), Some(port), Some(user), Some(password), Some(database))
                if issues.is_empty() =>
            {
                Ok(SinkSettings {
                    name: self.sink.name.clone(),
                    batch_size: self.sink.batch_size,
                    influx: InfluxSettings {
                        host,
                        port,
                        user,
                        password,
                        database,
                        retention_policy: influx.retention_policy.clone(),
                        flush_interval: Duration::from_millis(influx.flush_interval_ms),
                        request_timeout: Duration::from_millis(influx.request_timeout_ms),
                    },
                })
            }
            _ => Err(issues),
        }
    }
}

fn required_str(
    issues: &mut Vec<ConfigIssue>,
    field: &'static str,
    value: &Option<String>,
) -> Option<String> {
    match value {
        None => {
            issues.push(ConfigIssue::Missing(field));
            None
        }
        Some(v) if v.trim().is_empty() => {
            issues.push(ConfigIssue::Invalid {
                field,
                reason: "must not be empty".into(),
            });
            None
        }
        Some(v) => Some(v.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        [influxdb]
        host = "localhost"
        port = 8086
        user = "writer"
        password = "secret"
        database = "telemetry"

        [sink]
        batch_size = 250
    "#;

    #[test]
    fn test_full_config() {
        let config: Config = toml::from_str(FULL).unwrap();
        let settings = config.settings().unwrap();
        assert_eq!(settings.batch_size, 250);
        assert_eq!(settings.name, "influxdb-sink");
        assert_eq!(settings.influx.host, "localhost");
        assert_eq!(settings.influx.port, 8086);
        assert_eq!(settings.influx.retention_policy, "autogen");
        assert_eq!(settings.influx.flush_interval, Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sink.batch_size, 100);
        assert_eq!(config.channel.capacity, 10_000);
        assert_eq!(config.runner.backoff_base_ms, 1000);
        assert_eq!(config.runner.backoff_max_ms, 5000);
        assert_eq!(config.monitoring.health_port, 8080);
        assert_eq!(config.monitoring.metrics_port, 9090);
        assert_eq!(config.monitoring.log_format, LogFormat::Json);
    }

    #[test]
    fn test_reports_every_missing_field() {
        let issues = Config::default().settings().unwrap_err();
        assert_eq!(
            issues,
            vec![
                ConfigIssue::Missing("influxdb.host"),
                ConfigIssue::Missing("influxdb.user"),
                ConfigIssue::Missing("influxdb.password"),
                ConfigIssue::Missing("influxdb.database"),
                ConfigIssue::Missing("influxdb.port"),
            ]
        );
    }

    #[test]
    fn test_invalid_values() {
        let mut config: Config = toml::from_str(FULL).unwrap();
        config.influxdb.port = Some(0);
        config.influxdb.host = Some("  ".into());
        config.sink.batch_size = 0;

        let issues = config.settings().unwrap_err();
        assert_eq!(issues.len(), 3);
        assert!(issues.contains(&ConfigIssue::Invalid {
            field: "sink.batch_size",
            reason: "must be at least 1".into()
        }));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid influxdb.port"));
    }

    #[test]
    fn test_issue_messages() {
        assert_eq!(
            ConfigIssue::Missing("influxdb.host").to_string(),
            "missing configuration: influxdb.host"
        );
        let issue = ConfigIssue::Invalid {
            field: "influxdb.port",
            reason: "must be between 1 and 65535".into(),
        };
        assert_eq!(
            issue.to_string(),
            "invalid influxdb.port: must be between 1 and 65535"
        );
        let _: &dyn std::error::Error = &issue;
    }

    #[test]
    fn test_empty_user_allowed() {
        let mut config: Config = toml::from_str(FULL).unwrap();
        config.influxdb.user = Some(String::new());
        config.influxdb.password = Some(String::new());
        assert!(config.settings().is_ok());
    }

    #[test]
    fn test_backoff_bounds() {
        let mut config: Config = toml::from_str(FULL).unwrap();
        config.runner.backoff_max_ms = 10;
        let issues = config.settings().unwrap_err();
        assert!(matches!(
            issues.as_slice(),
            [ConfigIssue::Invalid {
                field: "runner.backoff_max_ms",
                ..
            }]
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("q2i.toml");
        std::fs::write(&path, FULL).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.influxdb.database.as_deref(), Some("telemetry"));

        std::fs::write(&path, "[influxdb]\nhost = \"h\"\n").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_log_level_variants() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogLevel::Debug.as_str(), "debug");
    }
}
