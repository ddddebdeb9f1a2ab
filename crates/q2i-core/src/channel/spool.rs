//! Spool files: a sequence of u32 big-endian length-prefixed event bodies.

use super::Event;
use crate::error::ChannelError;
use bytes::{Buf, BufMut, BytesMut};
use std::fs;
use std::path::Path;

/// Split spool bytes into events. Zero-length records become empty events.
pub fn read_spool(data: &[u8]) -> Result<Vec<Event>, ChannelError> {
    let mut buf = data;
    let mut events = Vec::new();

    while buf.has_remaining() {
        let offset = data.len() - buf.remaining();
        if buf.remaining() < 4 {
            return Err(ChannelError::Spool(format!(
                "truncated length prefix at offset {}",
                offset
            )));
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(ChannelError::Spool(format!(
                "record at offset {} declares {} bytes, {} available",
                offset,
                len,
                buf.remaining()
            )));
        }
        events.push(Event::new(buf.copy_to_bytes(len)));
    }

    Ok(events)
}

/// Serialize event bodies into spool bytes.
pub fn write_spool<'a>(
    bodies: impl IntoIterator<Item = &'a [u8]>,
) -> Result<BytesMut, ChannelError> {
    let mut out = BytesMut::new();
    for body in bodies {
        let len = u32::try_from(body.len())
            .map_err(|_| ChannelError::Spool(format!("record of {} bytes", body.len())))?;
        out.put_u32(len);
        out.put_slice(body);
    }
    Ok(out)
}

/// Read a spool file from disk.
pub fn read_spool_file(path: &Path) -> Result<Vec<Event>, ChannelError> {
    let data = fs::read(path)
        .map_err(|e| ChannelError::Spool(format!("{}: {}", path.display(), e)))?;
    read_spool(&data)
}

/// Write a spool file to disk.
pub fn write_spool_file<'a>(
    path: &Path,
    bodies: impl IntoIterator<Item = &'a [u8]>,
) -> Result<usize, ChannelError> {
    let data = write_spool(bodies)?;
    fs::write(path, &data)
        .map_err(|e| ChannelError::Spool(format!("{}: {}", path.display(), e)))?;
    Ok(data.len())
}
