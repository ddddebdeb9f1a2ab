//! One transactional drain cycle from a channel into a time-series client.

use super::counter::SinkCounter;
use crate::channel::{Channel, ScopedTransaction};
use crate::influx::TimeSeriesClient;
use crate::point::decode_event;
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Outcome of a cycle as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// At least one event was delivered; poll again right away.
    Ready,
    /// Nothing was delivered; poll less often.
    Backoff,
}

/// Why the take loop of a cycle stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchEnd {
    /// The channel had no more events.
    Drained,
    /// An event with an empty body was taken.
    EmptyPayload,
    /// `batch_size` events were processed.
    BatchFull,
}

/// Result of a committed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCycleResult {
    pub status: Status,
    /// Events decoded and written in this cycle.
    pub processed: usize,
    pub end: BatchEnd,
}

/// Moves events from a [`Channel`] to a [`TimeSeriesClient`], one
/// transaction per cycle.
pub struct BatchConsumer {
    channel: Arc<dyn Channel>,
    client: Arc<dyn TimeSeriesClient>,
    counter: Arc<SinkCounter>,
}

impl BatchConsumer {
    pub fn new(
        channel: Arc<dyn Channel>,
        client: Arc<dyn TimeSeriesClient>,
        counter: Arc<SinkCounter>,
    ) -> Self {
        Self {
            channel,
            client,
            counter,
        }
    }

    pub fn counter(&self) -> &Arc<SinkCounter> {
        &self.counter
    }

    /// Run one cycle taking at most `batch_size` events.
    ///
    /// Every event taken is either committed after its point reached the
    /// client or rolled back into the channel. A failed cycle returns
    /// [`Error::Delivery`]; a failed rollback returns
    /// [`Error::TransactionFailure`].
    pub async fn run_cycle(&mut self, batch_size: usize) -> Result<BatchCycleResult> {
        let mut tx = ScopedTransaction::new(
            self.channel
                .transaction()
                .map_err(|e| Error::delivery(e.into()))?,
        );
        if let Err(e) = tx.begin().await {
            warn!(channel = self.channel.name(), error = %e, "Failed to begin transaction");
            return Err(Error::delivery(e.into()));
        }

        let outcome = match self.drain(&mut tx, batch_size).await {
            Ok(drained) => tx.commit().await.map(|()| drained).map_err(Error::from),
            Err(e) => Err(e),
        };

        match outcome {
            Ok((processed, end)) => Ok(self.record(processed, end, batch_size)),
            Err(cause) => {
                warn!(
                    channel = self.channel.name(),
                    error = %cause,
                    "Batch failed, rolling back transaction"
                );
                let discarded = self.client.discard_pending();
                if discarded > 0 {
                    debug!(points = discarded, "Discarded unsent points of failed batch");
                }
                match tx.rollback().await {
                    Ok(()) => Err(Error::delivery(cause)),
                    Err(rollback) => {
                        error!(
                            channel = self.channel.name(),
                            error = %rollback,
                            cause = %cause,
                            "Rollback failed"
                        );
                        Err(Error::TransactionFailure {
                            rollback,
                            cause: Box::new(cause),
                        })
                    }
                }
            }
        }
    }

    /// Take, decode and write until the batch ends, then flush the client.
    async fn drain(
        &self,
        tx: &mut ScopedTransaction,
        batch_size: usize,
    ) -> Result<(usize, BatchEnd)> {
        let mut processed = 0usize;

        let end = loop {
            if processed >= batch_size {
                break BatchEnd::BatchFull;
            }

            let event = match tx.take().await? {
                Some(event) => event,
                None => break BatchEnd::Drained,
            };
            if event.is_empty() {
                break BatchEnd::EmptyPayload;
            }
            self.counter.increment_event_drain_attempt();

            let body = event.body();
            let point = match decode_event(body) {
                Ok(Some(point)) => point,
                Ok(None) => break BatchEnd::EmptyPayload,
                Err(e) => {
                    error!(
                        length = body.len(),
                        payload = %STANDARD.encode(body),
                        error = %e,
                        "Failed to decode event"
                    );
                    return Err(e.into());
                }
            };

            self.client.write(&point).await?;
            processed += 1;
        };

        if processed > 0 {
            self.client.flush().await?;
        }

        debug!(processed, end = ?end, "Batch drained");
        Ok((processed, end))
    }

    fn record(&self, processed: usize, end: BatchEnd, batch_size: usize) -> BatchCycleResult {
        let status = if processed == 0 {
            self.counter.increment_batch_empty();
            Status::Backoff
        } else {
            self.counter.increment_batch_complete();
            if processed < batch_size {
                self.counter.increment_batch_underflow();
            }
            self.counter.add_event_drain_success(processed as u64);
            Status::Ready
        };

        BatchCycleResult {
            status,
            processed,
            end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Event, MemoryChannel};
    use crate::point::{encode, Point};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingClient {
        written: Mutex<Vec<Point>>,
        flushes: Mutex<usize>,
    }

    #[async_trait]
    impl TimeSeriesClient for RecordingClient {
        async fn ping(&self) -> Result<String> {
            Ok("test".into())
        }
        async fn database_exists(&self, _name: &str) -> Result<bool> {
            Ok(true)
        }
        async fn create_database(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        fn set_database(&self, _name: &str) {}
        fn set_retention_policy(&self, _name: &str) {}
        fn enable_batching(&self, _actions: usize, _flush_interval: Duration) {}
        async fn write(&self, point: &Point) -> Result<()> {
            self.written.lock().push(point.clone());
            Ok(())
        }
        async fn flush(&self) -> Result<()> {
            *self.flushes.lock() += 1;
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
        fn is_closed(&self) -> bool {
            false
        }
    }

    fn point(i: i64) -> Point {
        Point::builder("cpu")
            .time(i, Default::default())
            .field("value", i)
            .build()
            .unwrap()
    }

    fn setup(events: usize) -> (Arc<MemoryChannel>, Arc<RecordingClient>, BatchConsumer) {
        let channel = Arc::new(MemoryChannel::new("mem", 1000));
        for i in 0..events {
            channel
                .put(Event::new(encode(&point(i as i64)).unwrap()))
                .unwrap();
        }
        let client = Arc::new(RecordingClient::default());
        let consumer = BatchConsumer::new(
            channel.clone(),
            client.clone(),
            Arc::new(SinkCounter::new("test")),
        );
        (channel, client, consumer)
    }

    #[tokio::test]
    async fn test_drains_fewer_than_batch_size() {
        let (channel, client, mut consumer) = setup(3);

        let result = consumer.run_cycle(10).await.unwrap();
        assert_eq!(result.status, Status::Ready);
        assert_eq!(result.processed, 3);
        assert_eq!(result.end, BatchEnd::Drained);
        assert_eq!(client.written.lock().len(), 3);
        assert_eq!(*client.flushes.lock(), 1);
        assert!(channel.is_empty());

        let snapshot = consumer.counter().snapshot();
        assert_eq!(snapshot.batch_complete_count, 1);
        assert_eq!(snapshot.batch_underflow_count, 1);
        assert_eq!(snapshot.event_drain_success_count, 3);
    }

    #[tokio::test]
    async fn test_stops_at_batch_size_without_taking_more() {
        let (channel, client, mut consumer) = setup(5);

        let result = consumer.run_cycle(2).await.unwrap();
        assert_eq!(result.end, BatchEnd::BatchFull);
        assert_eq!(result.processed, 2);
        assert_eq!(client.written.lock().len(), 2);
        assert_eq!(channel.len(), 3);
        assert_eq!(consumer.counter().snapshot().batch_underflow_count, 0);

        // the next cycle starts counting from zero
        let result = consumer.run_cycle(2).await.unwrap();
        assert_eq!(result.processed, 2);
        assert_eq!(channel.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_channel_backs_off() {
        let (_channel, client, mut consumer) = setup(0);

        let result = consumer.run_cycle(10).await.unwrap();
        assert_eq!(result.status, Status::Backoff);
        assert_eq!(result.end, BatchEnd::Drained);
        assert!(client.written.lock().is_empty());
        assert_eq!(*client.flushes.lock(), 0);
        assert_eq!(consumer.counter().batch_empty_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_payload_ends_batch() {
        let (channel, client, mut consumer) = setup(1);
        channel.put(Event::new(Vec::new())).unwrap();
        channel
            .put(Event::new(encode(&point(9)).unwrap()))
            .unwrap();

        let result = consumer.run_cycle(10).await.unwrap();
        assert_eq!(result.status, Status::Ready);
        assert_eq!(result.end, BatchEnd::EmptyPayload);
        assert_eq!(result.processed, 1);
        assert_eq!(client.written.lock().len(), 1);
        // empty event is committed with the batch
        assert_eq!(channel.len(), 1);
        assert_eq!(consumer.counter().snapshot().event_drain_attempt_count, 1);
    }

    #[tokio::test]
    async fn test_decode_failure_rolls_back() {
        let (channel, _client, mut consumer) = setup(2);
        channel.put(Event::new(vec![0xFFu8; 20])).unwrap();

        let err = consumer.run_cycle(10).await.unwrap_err();
        assert!(err.is_delivery());
        assert!(!err.is_fatal());
        assert_eq!(channel.len(), 3);
        assert_eq!(channel.in_flight(), 0);
        assert_eq!(consumer.counter().snapshot().batch_complete_count, 0);
    }
}
