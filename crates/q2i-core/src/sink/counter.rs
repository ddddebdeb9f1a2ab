//! Sink lifecycle counters.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing what a sink has done since it was started.
///
/// Incremented by the consumer, read by the metrics endpoint.
pub struct SinkCounter {
    name: String,

    // === BATCHES ===
    /// Cycles that processed at least one event
    batch_complete: AtomicU64,
    /// Cycles that found nothing to process
    batch_empty: AtomicU64,
    /// Completed cycles that processed fewer than `batch_size` events
    batch_underflow: AtomicU64,

    // === EVENTS ===
    /// Non-empty events taken from the channel
    event_drain_attempt: AtomicU64,
    /// Events written and committed
    event_drain_success: AtomicU64,

    // === CONNECTION ===
    connection_created: AtomicU64,
    connection_closed: AtomicU64,
    connection_failed: AtomicU64,

    started_at: Mutex<Option<DateTime<Utc>>>,
    stopped_at: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of a [`SinkCounter`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterSnapshot {
    pub name: String,
    pub batch_complete_count: u64,
    pub batch_empty_count: u64,
    pub batch_underflow_count: u64,
    pub event_drain_attempt_count: u64,
    pub event_drain_success_count: u64,
    pub connection_created_count: u64,
    pub connection_closed_count: u64,
    pub connection_failed_count: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl SinkCounter {
    /// Create counters for the sink called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batch_complete: AtomicU64::new(0),
            batch_empty: AtomicU64::new(0),
            batch_underflow: AtomicU64::new(0),
            event_drain_attempt: AtomicU64::new(0),
            event_drain_success: AtomicU64::new(0),
            connection_created: AtomicU64::new(0),
            connection_closed: AtomicU64::new(0),
            connection_failed: AtomicU64::new(0),
            started_at: Mutex::new(None),
            stopped_at: Mutex::new(None),
        }
    }

    /// Sink name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reset batch and event counters and record the start time.
    ///
    /// Connection counters are kept since the connection is made before start.
    pub fn start(&self) {
        for counter in [
            &self.batch_complete,
            &self.batch_empty,
            &self.batch_underflow,
            &self.event_drain_attempt,
            &self.event_drain_success,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.started_at.lock() = Some(Utc::now());
        *self.stopped_at.lock() = None;
    }

    /// Record the stop time.
    pub fn stop(&self) {
        *self.stopped_at.lock() = Some(Utc::now());
    }

    // === RECORDING ===

    pub fn increment_batch_complete(&self) {
        self.batch_complete.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batch_empty(&self) {
        self.batch_empty.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batch_underflow(&self) {
        self.batch_underflow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_event_drain_attempt(&self) {
        self.event_drain_attempt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_event_drain_success(&self, count: u64) {
        self.event_drain_success.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_connection_created(&self) {
        self.connection_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_connection_closed(&self) {
        self.connection_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_connection_failed(&self) {
        self.connection_failed.fetch_add(1, Ordering::Relaxed);
    }

    // === GETTERS ===

    pub fn batch_complete_count(&self) -> u64 {
        self.batch_complete.load(Ordering::Relaxed)
    }

    pub fn batch_empty_count(&self) -> u64 {
        self.batch_empty.load(Ordering::Relaxed)
    }

    pub fn event_drain_success_count(&self) -> u64 {
        self.event_drain_success.load(Ordering::Relaxed)
    }

    /// Copy every counter.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            name: self.name.clone(),
            batch_complete_count: self.batch_complete.load(Ordering::Relaxed),
            batch_empty_count: self.batch_empty.load(Ordering::Relaxed),
            batch_underflow_count: self.batch_underflow.load(Ordering::Relaxed),
            event_drain_attempt_count: self.event_drain_attempt.load(Ordering::Relaxed),
            event_drain_success_count: self.event_drain_success.load(Ordering::Relaxed),
            connection_created_count: self.connection_created.load(Ordering::Relaxed),
            connection_closed_count: self.connection_closed.load(Ordering::Relaxed),
            connection_failed_count: self.connection_failed.load(Ordering::Relaxed),
            started_at: *self.started_at.lock(),
            stopped_at: *self.stopped_at.lock(),
        }
    }

    /// Export all counters in Prometheus text format.
    ///
    /// # Example
    /// ```
    /// use q2i_core::sink::SinkCounter;
    ///
    /// let counter = SinkCounter::new("influx");
    /// counter.increment_batch_complete();
    /// let text = counter.export_prometheus_text("q2i");
    /// assert!(text.contains("q2i_batch_complete_total{sink=\"influx\"} 1"));
    /// ```
    pub fn export_prometheus_text(&self, prefix: &str) -> String {
        let snapshot = self.snapshot();
        let mut output = String::with_capacity(2048);

        let counters: [(&str, &str, u64); 8] = [
            (
                "batch_complete_total",
                "Batches that processed at least one event",
                snapshot.batch_complete_count,
            ),
            (
                "batch_empty_total",
                "Batches that found the channel drained",
                snapshot.batch_empty_count,
            ),
            (
                "batch_underflow_total",
                "Completed batches smaller than the batch size",
                snapshot.batch_underflow_count,
            ),
            (
                "event_drain_attempt_total",
                "Events taken from the channel",
                snapshot.event_drain_attempt_count,
            ),
            (
                "event_drain_success_total",
                "Events written and committed",
                snapshot.event_drain_success_count,
            ),
            (
                "connection_created_total",
                "Connections established to InfluxDB",
                snapshot.connection_created_count,
            ),
            (
                "connection_closed_total",
                "Connections to InfluxDB closed",
                snapshot.connection_closed_count,
            ),
            (
                "connection_failed_total",
                "Failed connection attempts to InfluxDB",
                snapshot.connection_failed_count,
            ),
        ];

        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {}_{} {}\n", prefix, name, help));
            output.push_str(&format!("# TYPE {}_{} counter\n", prefix, name));
            output.push_str(&format!(
                "{}_{}{{sink=\"{}\"}} {}\n\n",
                prefix, name, snapshot.name, value
            ));
        }

        if let Some(started) = snapshot.started_at {
            output.push_str(&format!(
                "# HELP {}_start_time_seconds Sink start time as a Unix timestamp\n",
                prefix
            ));
            output.push_str(&format!("# TYPE {}_start_time_seconds gauge\n", prefix));
            output.push_str(&format!(
                "{}_start_time_seconds{{sink=\"{}\"}} {}\n",
                prefix,
                snapshot.name,
                started.timestamp()
            ));
        }

        output
    }
}

impl fmt::Display for SinkCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.snapshot();
        write!(
            f,
            "{}: batches complete={} empty={} underflow={}, events attempted={} succeeded={}, \
             connections created={} closed={} failed={}",
            s.name,
            s.batch_complete_count,
            s.batch_empty_count,
            s.batch_underflow_count,
            s.event_drain_attempt_count,
            s.event_drain_success_count,
            s.connection_created_count,
            s.connection_closed_count,
            s.connection_failed_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let counter = SinkCounter::new("sink");
        counter.increment_batch_complete();
        counter.increment_batch_complete();
        counter.increment_batch_empty();
        counter.add_event_drain_success(42);

        let snapshot = counter.snapshot();
        assert_eq!(snapshot.batch_complete_count, 2);
        assert_eq!(snapshot.batch_empty_count, 1);
        assert_eq!(snapshot.event_drain_success_count, 42);
        assert!(snapshot.started_at.is_none());
    }

    #[test]
    fn test_start_resets_batches_but_not_connections() {
        let counter = SinkCounter::new("sink");
        counter.increment_connection_created();
        counter.increment_batch_empty();
        counter.stop();

        counter.start();
        let snapshot = counter.snapshot();
        assert_eq!(snapshot.batch_empty_count, 0);
        assert_eq!(snapshot.connection_created_count, 1);
        assert!(snapshot.started_at.is_some());
        assert!(snapshot.stopped_at.is_none());

        counter.stop();
        assert!(counter.snapshot().stopped_at.is_some());
    }

    #[test]
    fn test_concurrent_increments() {
        let counter = std::sync::Arc::new(SinkCounter::new("sink"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = std::sync::Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.increment_event_drain_attempt();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.snapshot().event_drain_attempt_count, 4000);
    }

    #[test]
    fn test_prometheus_text_export() {
        let counter = SinkCounter::new("influx");
        counter.start();
        counter.increment_batch_empty();
        let text = counter.export_prometheus_text("q2i");

        assert!(text.contains("# TYPE q2i_batch_empty_total counter"));
        assert!(text.contains("q2i_batch_empty_total{sink=\"influx\"} 1"));
        assert!(text.contains("q2i_batch_complete_total{sink=\"influx\"} 0"));
        assert!(text.contains("q2i_start_time_seconds{sink=\"influx\"}"));
    }

    #[test]
    fn test_display() {
        let counter = SinkCounter::new("influx");
        counter.add_event_drain_success(3);
        assert!(counter.to_string().contains("succeeded=3"));
    }
}
