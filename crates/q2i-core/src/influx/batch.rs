//! Client-side write batching.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type FlushFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type FlushFn = Arc<dyn Fn(Vec<String>) -> FlushFuture + Send + Sync>;

#[derive(Default)]
struct Buffer {
    lines: Vec<String>,
    /// Error of the last failed interval flush, not yet reported to a writer.
    failure: Option<Error>,
    /// Bumped on discard so an in-flight interval send does not restore
    /// lines that were already dropped.
    epoch: u64,
}

struct Shared {
    buffer: Mutex<Buffer>,
    /// Held for the whole of every send, interval or explicit.
    sending: tokio::sync::Mutex<()>,
    flush: FlushFn,
}

impl Shared {
    /// Send what is pending on behalf of the interval task.
    ///
    /// A failed send puts the lines back in front of newer ones and keeps the
    /// error until the next push or flush reports it.
    async fn interval_flush(&self) {
        let _sending = self.sending.lock().await;
        let (lines, epoch) = {
            let mut buffer = self.buffer.lock();
            if buffer.failure.is_some() || buffer.lines.is_empty() {
                return;
            }
            (std::mem::take(&mut buffer.lines), buffer.epoch)
        };

        let count = lines.len();
        match (self.flush)(lines.clone()).await {
            Ok(()) => debug!(lines = count, "Interval batch flushed"),
            Err(e) => {
                warn!(lines = count, error = %e, "Interval batch flush failed");
                let mut buffer = self.buffer.lock();
                if buffer.epoch == epoch {
                    let newer = std::mem::replace(&mut buffer.lines, lines);
                    buffer.lines.extend(newer);
                    buffer.failure = Some(e);
                }
            }
        }
    }
}

/// Buffers line protocol lines and flushes them by size or on an interval.
///
/// Size-triggered batches are handed back to the caller by [`BatchProcessor::push`]
/// so write errors reach the writer. Interval flushes run on a background
/// task; a failed one keeps its lines and surfaces its error through the next
/// `push` or `flush`, so no line is lost silently.
pub struct BatchProcessor {
    actions: usize,
    flush_interval: Duration,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl BatchProcessor {
    /// Start a processor whose background task calls `flush` every `flush_interval`.
    pub fn spawn<F, Fut>(actions: usize, flush_interval: Duration, flush: F) -> Self
    where
        F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let actions = actions.max(1);
        let flush: FlushFn =
            Arc::new(move |lines: Vec<String>| Box::pin(flush(lines)) as FlushFuture);
        let shared = Arc::new(Shared {
            buffer: Mutex::new(Buffer {
                lines: Vec::with_capacity(actions),
                ..Default::default()
            }),
            sending: tokio::sync::Mutex::new(()),
            flush,
        });
        let task_shared = Arc::clone(&shared);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                task_shared.interval_flush().await;
            }
        });

        Self {
            actions,
            flush_interval,
            shared,
            task,
        }
    }

    /// Buffer a line. Returns the full batch once `actions` lines are pending.
    ///
    /// Fails with the error of a failed interval flush; the line is not
    /// buffered then.
    pub fn push(&self, line: String) -> Result<Option<Vec<String>>> {
        let mut buffer = self.shared.buffer.lock();
        if let Some(e) = buffer.failure.take() {
            return Err(e);
        }
        buffer.lines.push(line);
        if buffer.lines.len() >= self.actions {
            Ok(Some(std::mem::replace(
                &mut buffer.lines,
                Vec::with_capacity(self.actions),
            )))
        } else {
            Ok(None)
        }
    }

    /// Send every pending line now.
    ///
    /// Waits for an interval send in progress, and fails with its error if it
    /// did not go through.
    pub async fn flush(&self) -> Result<()> {
        let _sending = self.shared.sending.lock().await;
        let lines = {
            let mut buffer = self.shared.buffer.lock();
            if let Some(e) = buffer.failure.take() {
                return Err(e);
            }
            std::mem::take(&mut buffer.lines)
        };
        if lines.is_empty() {
            return Ok(());
        }
        (self.shared.flush)(lines).await
    }

    /// Drop every pending line and any unreported failure, returning how many
    /// lines were dropped.
    pub fn discard(&self) -> usize {
        let mut buffer = self.shared.buffer.lock();
        buffer.epoch += 1;
        buffer.failure = None;
        std::mem::take(&mut buffer.lines).len()
    }

    /// Number of pending lines.
    pub fn pending(&self) -> usize {
        self.shared.buffer.lock().lines.len()
    }

    /// Batch size threshold.
    pub fn actions(&self) -> usize {
        self.actions
    }

    /// Background flush interval.
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }
}

impl Drop for BatchProcessor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
