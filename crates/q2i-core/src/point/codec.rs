//! Flat binary encoding of a single [`Point`].
//!
//! Layout (big-endian):
//!
//! ```text
//! u8  version (0x01)
//! i64 timestamp
//! u8  time unit tag
//! u16 measurement length, measurement bytes
//! u16 tag count,   { u16 key len, key, u16 value len, value }*
//! u16 field count, { u16 name len, name, u8 type tag, value }*
//! ```
//!
//! Field values: `0x01` string (u32 length + bytes), `0x02` f64,
//! `0x03` i64, `0x04` bool (one byte, 0 or 1). Maps are written in key order.

use super::{FieldValue, Point, TimeUnit};
use crate::error::CodecError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

/// Format version byte.
pub const FORMAT_VERSION: u8 = 0x01;

/// Smallest possible record: header with an empty measurement and no tags or fields.
pub const MIN_RECORD_LEN: usize = 1 + 8 + 1 + 2 + 2 + 2;

const TYPE_STRING: u8 = 0x01;
const TYPE_FLOAT: u8 = 0x02;
const TYPE_INTEGER: u8 = 0x03;
const TYPE_BOOLEAN: u8 = 0x04;

/// Encode a point.
///
/// Fails only when a name, string or collection does not fit its length prefix.
pub fn encode(point: &Point) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(encoded_len_hint(point));

    buf.put_u8(FORMAT_VERSION);
    buf.put_i64(point.timestamp);
    buf.put_u8(point.precision.tag());
    put_short_str(&mut buf, "measurement", &point.measurement)?;

    put_count(&mut buf, "tag set", point.tags.len())?;
    for (key, value) in &point.tags {
        put_short_str(&mut buf, "tag key", key)?;
        put_short_str(&mut buf, "tag value", value)?;
    }

    put_count(&mut buf, "field set", point.fields.len())?;
    for (name, value) in &point.fields {
        put_short_str(&mut buf, "field name", name)?;
        match value {
            FieldValue::String(s) => {
                buf.put_u8(TYPE_STRING);
                let len = u32::try_from(s.len()).map_err(|_| CodecError::TooLarge {
                    what: "string field",
                    len: s.len(),
                    max: u32::MAX as usize,
                })?;
                buf.put_u32(len);
                buf.put_slice(s.as_bytes());
            }
            FieldValue::Float(v) => {
                buf.put_u8(TYPE_FLOAT);
                buf.put_f64(*v);
            }
            FieldValue::Integer(v) => {
                buf.put_u8(TYPE_INTEGER);
                buf.put_i64(*v);
            }
            FieldValue::Boolean(v) => {
                buf.put_u8(TYPE_BOOLEAN);
                buf.put_u8(u8::from(*v));
            }
        }
    }

    Ok(buf.freeze())
}

/// Decode a record produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Point, CodecError> {
    if bytes.len() < MIN_RECORD_LEN {
        return Err(CodecError::Truncated {
            offset: 0,
            needed: MIN_RECORD_LEN,
            available: bytes.len(),
        });
    }

    let mut reader = Reader::new(bytes);

    let version = reader.u8()?;
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let timestamp = reader.i64()?;
    let unit_tag = reader.u8()?;
    let precision = TimeUnit::from_tag(unit_tag).ok_or(CodecError::UnknownTimeUnit(unit_tag))?;

    let measurement = reader.short_str()?;
    if measurement.is_empty() {
        return Err(CodecError::EmptyMeasurement);
    }

    let tag_count = reader.u16()?;
    let mut tags = BTreeMap::new();
    for _ in 0..tag_count {
        let key = reader.short_str()?;
        let value = reader.short_str()?;
        tags.insert(key, value);
    }

    let field_count = reader.u16()?;
    let mut fields = BTreeMap::new();
    for _ in 0..field_count {
        let name = reader.short_str()?;
        let tag = reader.u8()?;
        let value = match tag {
            TYPE_STRING => {
                let len = reader.u32()? as usize;
                FieldValue::String(reader.str(len)?)
            }
            TYPE_FLOAT => FieldValue::Float(reader.f64()?),
            TYPE_INTEGER => FieldValue::Integer(reader.i64()?),
            TYPE_BOOLEAN => match reader.u8()? {
                0 => FieldValue::Boolean(false),
                1 => FieldValue::Boolean(true),
                other => return Err(CodecError::InvalidBoolean(other)),
            },
            other => {
                return Err(CodecError::UnknownFieldType {
                    field: name,
                    tag: other,
                })
            }
        };
        fields.insert(name, value);
    }

    if reader.remaining() > 0 {
        return Err(CodecError::TrailingBytes(reader.remaining()));
    }

    Ok(Point {
        measurement,
        timestamp,
        precision,
        tags,
        fields,
    })
}

/// Decode an event body; an empty body is "no usable event", not an error.
pub fn decode_event(bytes: &[u8]) -> Result<Option<Point>, CodecError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    decode(bytes).map(Some)
}

fn encoded_len_hint(point: &Point) -> usize {
    let tags: usize = point.tags.iter().map(|(k, v)| 4 + k.len() + v.len()).sum();
    let fields: usize = point
        .fields
        .iter()
        .map(|(k, v)| {
            3 + k.len()
                + match v {
                    FieldValue::String(s) => 4 + s.len(),
                    FieldValue::Boolean(_) => 1,
                    _ => 8,
                }
        })
        .sum();
    MIN_RECORD_LEN + point.measurement.len() + tags + fields
}

fn put_short_str(buf: &mut BytesMut, what: &'static str, s: &str) -> Result<(), CodecError> {
    let len = u16::try_from(s.len()).map_err(|_| CodecError::TooLarge {
        what,
        len: s.len(),
        max: u16::MAX as usize,
    })?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn put_count(buf: &mut BytesMut, what: &'static str, count: usize) -> Result<(), CodecError> {
    let count = u16::try_from(count).map_err(|_| CodecError::TooLarge {
        what,
        len: count,
        max: u16::MAX as usize,
    })?;
    buf.put_u16(count);
    Ok(())
}

/// Bounds-checked cursor over the input.
struct Reader<'a> {
    buf: &'a [u8],
    len: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            len: buf.len(),
        }
    }

    fn offset(&self) -> usize {
        self.len - self.buf.remaining()
    }

    fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<(), CodecError> {
        if self.buf.remaining() < n {
            return Err(CodecError::Truncated {
                offset: self.offset(),
                needed: n,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    fn i64(&mut self) -> Result<i64, CodecError> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    fn f64(&mut self) -> Result<f64, CodecError> {
        self.need(8)?;
        Ok(self.buf.get_f64())
    }

    fn short_str(&mut self) -> Result<String, CodecError> {
        let len = self.u16()? as usize;
        self.str(len)
    }

    fn str(&mut self, len: usize) -> Result<String, CodecError> {
        self.need(len)?;
        let offset = self.offset();
        let s = std::str::from_utf8(&self.buf[..len])
            .map_err(|_| CodecError::InvalidUtf8(offset))?
            .to_string();
        self.buf.advance(len);
        Ok(s)
    }
}
