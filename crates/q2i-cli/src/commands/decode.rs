//! Decode command: spool file to JSON points.

use anyhow::{bail, Result};
use q2i_core::channel::{read_spool_file, Event};
use q2i_core::point::decode_event;
use std::io::{self, Write};
use std::path::Path;
use tracing::warn;

/// Counts from a decode run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    pub decoded: usize,
    pub empty: usize,
    pub invalid: usize,
}

/// Print every record of the spool file at `input` as one JSON line.
pub fn run(input: &Path, skip_invalid: bool) -> Result<()> {
    let events = read_spool_file(input)?;
    let stdout = io::stdout();
    let summary = write_points(&events, stdout.lock(), skip_invalid)?;
    eprintln!(
        "{} decoded, {} empty, {} invalid",
        summary.decoded, summary.empty, summary.invalid
    );
    Ok(())
}

pub fn write_points(
    events: &[Event],
    mut out: impl Write,
    skip_invalid: bool,
) -> Result<DecodeSummary> {
    let mut summary = DecodeSummary::default();
    for (index, event) in events.iter().enumerate() {
        match decode_event(event.body()) {
            Ok(Some(point)) => {
                serde_json::to_writer(&mut out, &point)?;
                out.write_all(b"\n")?;
                summary.decoded += 1;
            }
            Ok(None) => summary.empty += 1,
            Err(e) if skip_invalid => {
                warn!(
                    record = index,
                    length = event.body().len(),
                    error = %e,
                    "Skipping malformed record"
                );
                summary.invalid += 1;
            }
            Err(e) => bail!("Record {}: {}", index, e),
        }
    }
    Ok(summary)
}
