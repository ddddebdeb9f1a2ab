//! Telemetry point model, binary codec and line protocol rendering.

pub mod codec;
mod line_protocol;

pub use codec::{decode, decode_event, encode, FORMAT_VERSION, MIN_RECORD_LEN};
pub use line_protocol::to_line_protocol;

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Unit qualifying a point timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[default]
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    /// Tag byte used by the binary codec.
    pub fn tag(self) -> u8 {
        match self {
            TimeUnit::Nanoseconds => 0,
            TimeUnit::Microseconds => 1,
            TimeUnit::Milliseconds => 2,
            TimeUnit::Seconds => 3,
            TimeUnit::Minutes => 4,
            TimeUnit::Hours => 5,
        }
    }

    /// Inverse of [`TimeUnit::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => TimeUnit::Nanoseconds,
            1 => TimeUnit::Microseconds,
            2 => TimeUnit::Milliseconds,
            3 => TimeUnit::Seconds,
            4 => TimeUnit::Minutes,
            5 => TimeUnit::Hours,
            _ => return None,
        })
    }

    /// Nanoseconds per unit.
    pub fn nanos_per_unit(self) -> i64 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60_000_000_000,
            TimeUnit::Hours => 3_600_000_000_000,
        }
    }

    /// Convert a timestamp in this unit to nanoseconds, `None` on overflow.
    pub fn to_nanos(self, value: i64) -> Option<i64> {
        value.checked_mul(self.nanos_per_unit())
    }
}

/// Typed scalar field value.
///
/// Deserialized untagged, so JSON `1` is an integer and `1.0` a float.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

/// A telemetry record destined for the time-series store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Measurement name (never empty)
    pub measurement: String,

    /// Timestamp in `precision` units
    pub timestamp: i64,

    /// Unit of `timestamp`
    #[serde(default)]
    pub precision: TimeUnit,

    /// Tag set
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Field set
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Point {
    /// Start building a point for `measurement`.
    pub fn builder(measurement: impl Into<String>) -> PointBuilder {
        PointBuilder {
            measurement: measurement.into(),
            timestamp: None,
            precision: TimeUnit::default(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Check the invariants required for a write.
    pub fn validate(&self) -> Result<()> {
        if self.measurement.is_empty() {
            return Err(Error::InvalidPoint("measurement name is empty".into()));
        }
        if self.fields.is_empty() {
            return Err(Error::InvalidPoint(format!(
                "point {} has no fields",
                self.measurement
            )));
        }
        Ok(())
    }

    /// Timestamp in nanoseconds since the epoch.
    pub fn timestamp_nanos(&self) -> Result<i64> {
        self.precision.to_nanos(self.timestamp).ok_or_else(|| {
            Error::InvalidPoint(format!(
                "timestamp {} {:?} overflows nanoseconds",
                self.timestamp, self.precision
            ))
        })
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[tags={}, fields={}, ts={}]",
            self.measurement,
            self.tags.len(),
            self.fields.len(),
            self.timestamp
        )
    }
}

/// Builder for [`Point`].
#[derive(Debug, Clone)]
pub struct PointBuilder {
    measurement: String,
    timestamp: Option<i64>,
    precision: TimeUnit,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
}

impl PointBuilder {
    /// Set the timestamp and its unit.
    pub fn time(mut self, timestamp: i64, precision: TimeUnit) -> Self {
        self.timestamp = Some(timestamp);
        self.precision = precision;
        self
    }

    /// Add a tag.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a field.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Build the point, checking the invariants.
    pub fn build(self) -> Result<Point> {
        let timestamp = self.timestamp.ok_or_else(|| {
            Error::InvalidPoint(format!("point {} has no timestamp", self.measurement))
        })?;
        let point = Point {
            measurement: self.measurement,
            timestamp,
            precision: self.precision,
            tags: self.tags,
            fields: self.fields,
        };
        point.validate()?;
        Ok(point)
    }
}
