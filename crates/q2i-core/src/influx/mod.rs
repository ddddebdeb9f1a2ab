//! Downstream time-series client.
//!
//! [`TimeSeriesClient`] is the seam between the sink and the store; the
//! shipped implementation is [`HttpInfluxClient`] for the InfluxDB 1.x HTTP
//! API.

mod batch;
mod http;

pub use batch::BatchProcessor;
pub use http::HttpInfluxClient;

use crate::point::Point;
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Operations the sink needs from a time-series store.
#[async_trait]
pub trait TimeSeriesClient: Send + Sync {
    /// Check connectivity, returning the server version.
    async fn ping(&self) -> Result<String>;

    /// Whether database `name` exists.
    async fn database_exists(&self, name: &str) -> Result<bool>;

    /// Create database `name`.
    async fn create_database(&self, name: &str) -> Result<()>;

    /// Database used by subsequent writes.
    fn set_database(&self, name: &str);

    /// Retention policy used by subsequent writes.
    fn set_retention_policy(&self, name: &str);

    /// Buffer writes, sending them once `actions` points are pending or
    /// `flush_interval` has elapsed.
    fn enable_batching(&self, actions: usize, flush_interval: Duration);

    /// Write one point (buffered when batching is enabled).
    async fn write(&self, point: &Point) -> Result<()>;

    /// Send any buffered points now.
    async fn flush(&self) -> Result<()>;

    /// Drop buffered points that have not been sent, returning how many.
    fn discard_pending(&self) -> usize {
        0
    }

    /// Flush and release the connection. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Whether [`TimeSeriesClient::close`] has been called.
    fn is_closed(&self) -> bool;
}
