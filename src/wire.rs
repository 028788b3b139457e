//! Wire framing for feed traffic over an ordered byte channel.
//!
//! The feed itself is transport-agnostic: a higher layer bridges a
//! subscription onto whatever ordered, reliable channel it has (a TCP
//! stream, a unix socket, a pipe). This module defines the frames that
//! cross that channel (entries downstream, credit grants and
//! cancellation upstream) and a length-prefixed, checksummed encoding
//! for them. Session establishment and reconnect are the higher
//! layer's concern.

use crate::error::{FeedError, Result};
use crate::types::{Cursor, LogEntry};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Sanity limit on a single frame (100MB).
const MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

/// Server-to-client frames.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// One matching log entry.
    Entry { entry: LogEntry },

    /// The stream ended. `error` is `None` on clean cancellation;
    /// otherwise it describes why the subscription failed and the
    /// client must assume mutations were missed after `last`.
    Closed {
        last: Cursor,
        error: Option<String>,
    },
}

/// Client-to-server control messages.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Control {
    /// Grant `n` more units of credit.
    Grant { n: u64 },

    /// Tear the subscription down.
    Cancel,
}

/// Write one frame: u32 length prefix, rmp body, crc32 trailer.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    write_message(writer, frame)
}

/// Read one frame.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    read_message(reader)
}

/// Write one control message (same encoding as frames).
pub fn write_control<W: Write>(writer: &mut W, control: &Control) -> Result<()> {
    write_message(writer, control)
}

/// Read one control message.
pub fn read_control<R: Read>(reader: &mut R) -> Result<Control> {
    read_message(reader)
}

fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let encoded = rmp_serde::to_vec(message)?;

    writer.write_all(&(encoded.len() as u32).to_le_bytes())?;
    writer.write_all(&encoded)?;

    let checksum = crc32fast::hash(&encoded);
    writer.write_all(&checksum.to_le_bytes())?;

    Ok(())
}

fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_FRAME_BYTES {
        return Err(FeedError::Corruption("frame too large".into()));
    }

    let mut encoded = vec![0u8; len];
    reader.read_exact(&mut encoded)?;

    let mut checksum_bytes = [0u8; 4];
    reader.read_exact(&mut checksum_bytes)?;
    let stored = u32::from_le_bytes(checksum_bytes);
    let computed = crc32fast::hash(&encoded);
    if stored != computed {
        return Err(FeedError::ChecksumMismatch {
            expected: stored,
            got: computed,
        });
    }

    Ok(rmp_serde::from_slice(&encoded)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangeKind;

    fn sample_entry() -> LogEntry {
        LogEntry {
            cursor: Cursor::ORIGIN.next(),
            table: "users".to_string(),
            key: b"row2".to_vec(),
            kind: ChangeKind::Put,
            value: Some(b"value2".to_vec()),
        }
    }

    #[test]
    fn test_frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Frame::Entry {
            entry: sample_entry(),
        })
        .unwrap();
        write_frame(&mut buf, &Frame::Closed {
            last: Cursor::ORIGIN.next(),
            error: None,
        })
        .unwrap();

        let mut reader = &buf[..];
        match read_frame(&mut reader).unwrap() {
            Frame::Entry { entry } => {
                assert_eq!(entry.table, "users");
                assert_eq!(entry.value.as_deref(), Some(&b"value2"[..]));
            }
            other => panic!("expected Entry, got {:?}", other),
        }
        match read_frame(&mut reader).unwrap() {
            Frame::Closed { error: None, .. } => {}
            other => panic!("expected clean Closed, got {:?}", other),
        }
    }

    #[test]
    fn test_control_roundtrip() {
        let mut buf = Vec::new();
        write_control(&mut buf, &Control::Grant { n: 4 }).unwrap();
        write_control(&mut buf, &Control::Cancel).unwrap();

        let mut reader = &buf[..];
        assert!(matches!(
            read_control(&mut reader).unwrap(),
            Control::Grant { n: 4 }
        ));
        assert!(matches!(read_control(&mut reader).unwrap(), Control::Cancel));
    }

    #[test]
    fn test_corrupt_frame_is_rejected() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Frame::Entry {
            entry: sample_entry(),
        })
        .unwrap();

        // Flip a byte in the body.
        let mid = buf.len() / 2;
        buf[mid] ^= 0xff;

        let mut reader = &buf[..];
        assert!(matches!(
            read_frame(&mut reader),
            Err(FeedError::ChecksumMismatch { .. }) | Err(FeedError::Deserialization(_))
        ));
    }
}
