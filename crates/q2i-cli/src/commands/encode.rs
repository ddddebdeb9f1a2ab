//! Encode command: JSON points to a spool file.

use anyhow::{Context, Result};
use bytes::Bytes;
use q2i_core::channel::write_spool_file;
use q2i_core::point::{encode, Point};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Encode one JSON point per line from `input` (stdin if `None`) into the
/// spool file `output`.
pub fn run(input: Option<&Path>, output: &Path) -> Result<()> {
    let records = match input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            encode_lines(BufReader::new(file))?
        }
        None => encode_lines(io::stdin().lock())?,
    };

    let bytes = write_spool_file(output, records.iter().map(|r| r.as_ref()))?;
    info!(
        records = records.len(),
        bytes,
        output = %output.display(),
        "Spool file written"
    );
    println!("Encoded {} points into {}", records.len(), output.display());
    Ok(())
}

/// Encode every non-blank line as a point record.
pub fn encode_lines(reader: impl BufRead) -> Result<Vec<Bytes>> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let point: Point = serde_json::from_str(&line)
            .with_context(|| format!("Line {}: invalid point JSON", index + 1))?;
        point
            .validate()
            .with_context(|| format!("Line {}: invalid point", index + 1))?;
        let record = encode(&point).with_context(|| format!("Line {}", index + 1))?;
        records.push(record);
    }
    Ok(records)
}
