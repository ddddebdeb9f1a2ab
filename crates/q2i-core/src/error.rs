//! Error types for q2i core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.
//! Per-event failures surface as [`Error::Delivery`] (recoverable, the events
//! stay in the channel) and a failed rollback surfaces as
//! [`Error::TransactionFailure`] (fatal).

use thiserror::Error;

/// Result type alias for q2i operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for q2i.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Point codec error (malformed record)
    #[error("Malformed record: {0}")]
    Codec(#[from] CodecError),

    /// InfluxDB client error
    #[error("InfluxDB error: {0}")]
    Influx(#[from] InfluxError),

    /// Channel error
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Point violates the data model invariants
    #[error("Invalid point: {0}")]
    InvalidPoint(String),

    /// A batch cycle failed and its transaction was rolled back
    #[error("Failed to deliver events: {cause}")]
    Delivery {
        /// The failure that aborted the cycle
        #[source]
        cause: Box<Error>,
    },

    /// Rollback after a failed cycle itself failed; transactional integrity is lost
    #[error("Transaction rollback failed: {rollback} (after: {cause})")]
    TransactionFailure {
        /// The rollback failure
        rollback: ChannelError,
        /// The failure that triggered the rollback
        cause: Box<Error>,
    },

    /// Sink was asked to process before start
    #[error("Sink is not running")]
    NotRunning,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Wrap a cycle failure as a recoverable delivery error.
    pub fn delivery(cause: Error) -> Self {
        Error::Delivery {
            cause: Box::new(cause),
        }
    }

    /// Whether the error must stop the sink instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::TransactionFailure { .. })
    }

    /// Whether the error is a recoverable delivery failure.
    pub fn is_delivery(&self) -> bool {
        matches!(self, Error::Delivery { .. })
    }
}

/// Point codec errors. Every variant is a malformed record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before the record did
    #[error("truncated record: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Unsupported format version byte
    #[error("unsupported format version {0:#04x}")]
    UnsupportedVersion(u8),

    /// Unknown time unit tag
    #[error("unknown time unit tag {0}")]
    UnknownTimeUnit(u8),

    /// Unknown field value type tag
    #[error("unknown field type tag {tag:#04x} for field {field:?}")]
    UnknownFieldType { field: String, tag: u8 },

    /// Boolean byte other than 0 or 1
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBoolean(u8),

    /// String bytes are not UTF-8
    #[error("invalid UTF-8 at offset {0}")]
    InvalidUtf8(usize),

    /// Measurement name is empty
    #[error("empty measurement name")]
    EmptyMeasurement,

    /// Bytes left after the last field
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),

    /// A string or collection does not fit its length prefix
    #[error("{what} too large: {len} exceeds {max}")]
    TooLarge {
        what: &'static str,
        len: usize,
        max: usize,
    },
}

/// InfluxDB client errors.
#[derive(Error, Debug)]
pub enum InfluxError {
    /// Could not reach the server
    #[error("Connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    /// Server rejected a write
    #[error("Write failed ({status}): {message}")]
    Write { status: u16, message: String },

    /// Query failed
    #[error("Query failed: {0}")]
    Query(String),

    /// Client was closed
    #[error("Client closed")]
    Closed,
}

/// Channel (upstream queue) errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Transaction method called in the wrong state
    #[error("Invalid transaction state: {0}")]
    InvalidState(String),

    /// Channel capacity exhausted
    #[error("Channel full: capacity {capacity}")]
    Full { capacity: usize },

    /// Channel was closed
    #[error("Channel closed")]
    Closed,

    /// Spool file could not be read or written
    #[error("Spool error: {0}")]
    Spool(String),

    /// Error raised by a channel implementation
    #[error("{0}")]
    Other(String),
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
