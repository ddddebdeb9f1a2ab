//! InfluxDB line protocol rendering.

use super::{FieldValue, Point};
use crate::Result;
use std::fmt::Write;

/// Render a point as one line protocol line with a nanosecond timestamp.
pub fn to_line_protocol(point: &Point) -> Result<String> {
    point.validate()?;
    let nanos = point.timestamp_nanos()?;

    let mut line = String::with_capacity(64);
    escape_into(&mut line, &point.measurement, &[',', ' ']);

    for (key, value) in &point.tags {
        // InfluxDB drops tags with empty values
        if value.is_empty() {
            continue;
        }
        line.push(',');
        escape_into(&mut line, key, &[',', '=', ' ']);
        line.push('=');
        escape_into(&mut line, value, &[',', '=', ' ']);
    }

    line.push(' ');
    for (i, (name, value)) in point.fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        escape_into(&mut line, name, &[',', '=', ' ']);
        line.push('=');
        match value {
            FieldValue::String(s) => {
                line.push('"');
                escape_into(&mut line, s, &['"', '\\']);
                line.push('"');
            }
            FieldValue::Float(v) => {
                let _ = write!(line, "{}", v);
            }
            FieldValue::Integer(v) => {
                let _ = write!(line, "{}i", v);
            }
            FieldValue::Boolean(v) => line.push_str(if *v { "true" } else { "false" }),
        }
    }

    let _ = write!(line, " {}", nanos);
    Ok(line)
}

fn escape_into(out: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}
