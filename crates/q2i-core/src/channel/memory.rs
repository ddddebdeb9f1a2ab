//! Bounded in-memory transactional channel.

use super::{Channel, Event, Transaction};
use crate::error::ChannelError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

struct Queue {
    events: VecDeque<Event>,
    /// Events taken by open transactions, still reserved against capacity
    in_flight: usize,
}

/// In-memory channel backed by a bounded deque.
///
/// Taken events stay reserved until the transaction commits; a rollback puts
/// them back at the head in their original order.
pub struct MemoryChannel {
    name: String,
    capacity: usize,
    queue: Arc<Mutex<Queue>>,
}

impl MemoryChannel {
    /// Create a channel holding at most `capacity` events.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            queue: Arc::new(Mutex::new(Queue {
                events: VecDeque::new(),
                in_flight: 0,
            })),
        }
    }

    /// Enqueue one event.
    pub fn put(&self, event: Event) -> Result<(), ChannelError> {
        let mut queue = self.queue.lock();
        if queue.events.len() + queue.in_flight >= self.capacity {
            return Err(ChannelError::Full {
                capacity: self.capacity,
            });
        }
        queue.events.push_back(event);
        Ok(())
    }

    /// Enqueue all events, or none of them when they do not fit.
    pub fn put_all(&self, events: impl IntoIterator<Item = Event>) -> Result<usize, ChannelError> {
        let events: Vec<Event> = events.into_iter().collect();
        let mut queue = self.queue.lock();
        if queue.events.len() + queue.in_flight + events.len() > self.capacity {
            return Err(ChannelError::Full {
                capacity: self.capacity,
            });
        }
        let count = events.len();
        queue.events.extend(events);
        Ok(count)
    }

    /// Events available for taking.
    pub fn len(&self) -> usize {
        self.queue.lock().events.len()
    }

    /// Whether no events are available.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events taken by transactions that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.queue.lock().in_flight
    }

    /// Channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn transaction(&self) -> Result<Box<dyn Transaction>, ChannelError> {
        Ok(Box::new(MemoryTransaction {
            queue: Arc::clone(&self.queue),
            state: TxState::New,
            taken: Vec::new(),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    New,
    Open,
    Committed,
    RolledBack,
    Closed,
}

/// Transaction over a [`MemoryChannel`].
pub struct MemoryTransaction {
    queue: Arc<Mutex<Queue>>,
    state: TxState,
    taken: Vec<Event>,
}

impl MemoryTransaction {
    fn expect_open(&self, op: &str) -> Result<(), ChannelError> {
        if self.state != TxState::Open {
            return Err(ChannelError::InvalidState(format!(
                "{} in state {:?}",
                op, self.state
            )));
        }
        Ok(())
    }

    fn restore_taken(&mut self) -> usize {
        let count = self.taken.len();
        let mut queue = self.queue.lock();
        for event in self.taken.drain(..).rev() {
            queue.events.push_front(event);
        }
        queue.in_flight -= count;
        count
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn begin(&mut self) -> Result<(), ChannelError> {
        if self.state != TxState::New {
            return Err(ChannelError::InvalidState(format!(
                "begin in state {:?}",
                self.state
            )));
        }
        self.state = TxState::Open;
        Ok(())
    }

    async fn take(&mut self) -> Result<Option<Event>, ChannelError> {
        self.expect_open("take")?;
        let mut queue = self.queue.lock();
        let event = queue.events.pop_front();
        if let Some(ref event) = event {
            queue.in_flight += 1;
            self.taken.push(event.clone());
        }
        Ok(event)
    }

    async fn commit(&mut self) -> Result<(), ChannelError> {
        self.expect_open("commit")?;
        let count = self.taken.len();
        self.queue.lock().in_flight -= count;
        self.taken.clear();
        self.state = TxState::Committed;
        debug!(events = count, "Memory channel transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ChannelError> {
        self.expect_open("rollback")?;
        let count = self.restore_taken();
        self.state = TxState::RolledBack;
        debug!(events = count, "Memory channel transaction rolled back");
        Ok(())
    }

    fn close(&mut self) {
        if self.state == TxState::Open && !self.taken.is_empty() {
            let count = self.restore_taken();
            warn!(
                events = count,
                "Transaction closed while open, returning taken events"
            );
        }
        self.state = TxState::Closed;
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.state != TxState::Closed {
            self.close();
        }
    }
}
