//! Q2I Core - transactional queue to InfluxDB sink
//!
//! This library drains telemetry events from a transactional channel and
//! writes them to InfluxDB with:
//!
//! - A compact binary point codec and line protocol rendering
//! - All-or-nothing batches: every event taken in a cycle is committed or rolled back
//! - Batched HTTP writes to the InfluxDB 1.x API
//! - Lifecycle counters and component health for monitoring

pub mod channel;
pub mod config;
pub mod error;
pub mod health;
pub mod influx;
pub mod point;
pub mod runner;
pub mod sink;

// Re-export commonly used types
pub use config::Config;
pub use error::{ChannelError, CodecError, InfluxError};
pub use error::{Error, Result};
