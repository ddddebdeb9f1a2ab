//! Upstream transactional event channel.
//!
//! A [`Channel`] hands out [`Transaction`]s; every event taken under a
//! transaction is either committed or rolled back with it. The consumer holds
//! a transaction through a [`ScopedTransaction`], which closes it on drop so
//! the handle is released on every exit path.

mod memory;
mod spool;

pub use memory::{MemoryChannel, MemoryTransaction};
pub use spool::{read_spool, read_spool_file, write_spool, write_spool_file};

use crate::error::ChannelError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

/// An opaque payload with optional headers, as produced by the channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    headers: HashMap<String, String>,
    body: Bytes,
}

impl Event {
    /// Create an event with no headers.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Attach headers.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Event body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the event, keeping the body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Event headers.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Whether the body carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// A transactional, ordered, at-least-once source of events.
pub trait Channel: Send + Sync {
    /// Channel name for logging.
    fn name(&self) -> &str;

    /// Create a new transaction. It must be begun before use.
    fn transaction(&self) -> Result<Box<dyn Transaction>, ChannelError>;
}

/// A single take/commit/rollback scope over a channel.
///
/// `commit` and `rollback` are valid once, after `begin`. `take` returns
/// `Ok(None)` when no event is currently available and must not block
/// indefinitely.
#[async_trait]
pub trait Transaction: Send {
    /// Open the transaction.
    async fn begin(&mut self) -> Result<(), ChannelError>;

    /// Take the next event, if one is available.
    async fn take(&mut self) -> Result<Option<Event>, ChannelError>;

    /// Make every take under this transaction permanent.
    async fn commit(&mut self) -> Result<(), ChannelError>;

    /// Return every event taken under this transaction to the channel.
    async fn rollback(&mut self) -> Result<(), ChannelError>;

    /// Release the transaction. Must be safe in any state.
    fn close(&mut self);
}

/// Owns a transaction for the duration of one scope and closes it on drop.
pub struct ScopedTransaction {
    inner: Box<dyn Transaction>,
}

impl ScopedTransaction {
    /// Take ownership of `inner`.
    pub fn new(inner: Box<dyn Transaction>) -> Self {
        Self { inner }
    }
}

impl Deref for ScopedTransaction {
    type Target = dyn Transaction;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DerefMut for ScopedTransaction {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}

impl Drop for ScopedTransaction {
    fn drop(&mut self) {
        self.inner.close();
    }
}
