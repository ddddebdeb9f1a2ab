//! InfluxDB 1.x HTTP API client.
//!
//! Uses `/ping`, `/query` and `/write` with `u`/`p` query credentials.
//! Writes are sent as line protocol with nanosecond precision.

use super::{BatchProcessor, TimeSeriesClient};
use crate::config::InfluxSettings;
use crate::point::{to_line_protocol, Point};
use crate::{Error, InfluxError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Response body of `/query`.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// State shared with the background flush task.
struct Inner {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    database: RwLock<Option<String>>,
    retention_policy: RwLock<Option<String>>,
}

impl Inner {
    fn credentials(&self) -> Vec<(&'static str, String)> {
        if self.user.is_empty() {
            Vec::new()
        } else {
            vec![("u", self.user.clone()), ("p", self.password.clone())]
        }
    }

    fn connection_error(&self, err: reqwest::Error) -> Error {
        Error::Influx(InfluxError::Connection {
            url: self.base_url.clone(),
            message: err.to_string(),
        })
    }

    async fn query(&self, statement: &str, mutating: bool) -> Result<QueryResponse> {
        let url = format!("{}/query", self.base_url);
        let mut params = self.credentials();
        params.push(("q", statement.to_string()));

        let request = if mutating {
            self.http.post(&url).form(&params)
        } else {
            self.http.get(&url).query(&params)
        };

        let response = request
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.connection_error(e))?;

        let parsed: QueryResponse = serde_json::from_str(&body).map_err(|e| {
            Error::Influx(InfluxError::Query(format!(
                "{} (status {}): unparseable response: {}",
                statement, status, e
            )))
        })?;

        if let Some(err) = parsed
            .error
            .clone()
            .or_else(|| parsed.results.iter().find_map(|r| r.error.clone()))
        {
            return Err(Error::Influx(InfluxError::Query(format!(
                "{}: {}",
                statement, err
            ))));
        }
        if !status.is_success() {
            return Err(Error::Influx(InfluxError::Query(format!(
                "{}: HTTP {}",
                statement, status
            ))));
        }

        Ok(parsed)
    }

    async fn write_lines(&self, lines: Vec<String>) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }

        let database = self.database.read().clone().ok_or_else(|| {
            Error::Influx(InfluxError::Write {
                status: 0,
                message: "no database selected".into(),
            })
        })?;

        let mut params = self.credentials();
        params.push(("db", database));
        params.push(("precision", "n".to_string()));
        if let Some(rp) = self.retention_policy.read().clone() {
            params.push(("rp", rp));
        }

        let count = lines.len();
        let response = self
            .http
            .post(format!("{}/write", self.base_url))
            .query(&params)
            .body(lines.join("\n"))
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Influx(InfluxError::Write {
                status: status.as_u16(),
                message: message.trim().to_string(),
            }));
        }

        debug!(lines = count, "Points written to InfluxDB");
        Ok(())
    }
}

/// HTTP client for InfluxDB 1.x.
pub struct HttpInfluxClient {
    inner: Arc<Inner>,
    batch: RwLock<Option<Arc<BatchProcessor>>>,
    closed: AtomicBool,
}

impl HttpInfluxClient {
    /// Build a client for `http://host:port`. No request is made.
    pub fn connect(settings: &InfluxSettings) -> Result<Self> {
        let base_url = format!("http://{}:{}", settings.host, settings.port);
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| {
                Error::Influx(InfluxError::Connection {
                    url: base_url.clone(),
                    message: e.to_string(),
                })
            })?;

        info!(url = %base_url, user = %settings.user, "InfluxDB client created");

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url,
                user: settings.user.clone(),
                password: settings.password.clone(),
                database: RwLock::new(None),
                retention_policy: RwLock::new(None),
            }),
            batch: RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Base URL of the server.
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Whether batching is enabled.
    pub fn is_batching(&self) -> bool {
        self.batch.read().is_some()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Influx(InfluxError::Closed));
        }
        Ok(())
    }
}

#[async_trait]
impl TimeSeriesClient for HttpInfluxClient {
    async fn ping(&self) -> Result<String> {
        let response = self
            .inner
            .http
            .get(format!("{}/ping", self.inner.base_url))
            .send()
            .await
            .map_err(|e| self.inner.connection_error(e))?;

        if !response.status().is_success() {
            return Err(Error::Influx(InfluxError::Connection {
                url: self.inner.base_url.clone(),
                message: format!("ping returned HTTP {}", response.status()),
            }));
        }

        Ok(response
            .headers()
            .get("X-Influxdb-Version")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string())
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        self.ensure_open()?;
        let response = self.inner.query("SHOW DATABASES", false).await?;
        Ok(response
            .results
            .iter()
            .flat_map(|r| r.series.iter())
            .flat_map(|s| s.values.iter())
            .any(|row| row.first().and_then(|v| v.as_str()) == Some(name)))
    }

    async fn create_database(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let statement = format!("CREATE DATABASE \"{}\"", name.replace('"', "\\\""));
        self.inner.query(&statement, true).await?;
        Ok(())
    }

    fn set_database(&self, name: &str) {
        *self.inner.database.write() = Some(name.to_string());
    }

    fn set_retention_policy(&self, name: &str) {
        *self.inner.retention_policy.write() = Some(name.to_string());
    }

    fn enable_batching(&self, actions: usize, flush_interval: Duration) {
        let inner = Arc::clone(&self.inner);
        let processor = BatchProcessor::spawn(actions, flush_interval, move |lines| {
            let inner = Arc::clone(&inner);
            async move { inner.write_lines(lines).await }
        });
        debug!(
            actions = processor.actions(),
            flush_interval_ms = flush_interval.as_millis() as u64,
            "Write batching enabled"
        );
        *self.batch.write() = Some(Arc::new(processor));
    }

    async fn write(&self, point: &Point) -> Result<()> {
        self.ensure_open()?;
        let line = to_line_protocol(point)?;

        let processor = self.batch.read().clone();
        let ready = match processor {
            Some(processor) => match processor.push(line)? {
                Some(lines) => lines,
                None => return Ok(()),
            },
            None => vec![line],
        };

        self.inner.write_lines(ready).await
    }

    async fn flush(&self) -> Result<()> {
        let processor = self.batch.read().clone();
        match processor {
            Some(processor) => processor.flush().await,
            None => Ok(()),
        }
    }

    fn discard_pending(&self) -> usize {
        self.batch
            .read()
            .as_ref()
            .map(|processor| processor.discard())
            .unwrap_or(0)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let processor = self.batch.write().take();
        let result = match processor {
            Some(processor) => processor.flush().await,
            None => Ok(()),
        };

        if let Err(ref e) = result {
            warn!(error = %e, "Final flush on close failed");
        }
        info!(url = %self.inner.base_url, "InfluxDB client closed");
        result
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
