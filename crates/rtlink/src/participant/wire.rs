// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datagram frame format.
//!
//! ```text
//! Offset  Size   Field
//! 0       4      magic "RTLK"
//! 4       1      version (1)
//! 5       1      flags (reserved, 0)
//! 6       2      domain id (LE)
//! 8       14     type id (MD5-14 of the type name)
//! 22      8      sequence number (LE)
//! 30      2      topic name length (LE)
//! 32      4      payload length (LE)
//! 36      n      topic name (UTF-8)
//! 36+n    m      payload
//! ```

use super::types::TypeId;
use std::fmt;

pub const MAGIC: [u8; 4] = *b"RTLK";
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 36;

/// Reasons a received datagram is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    TooShort(usize),
    BadMagic,
    UnsupportedVersion(u8),
    ForeignDomain(u16),
    LengthMismatch { declared: usize, actual: usize },
    BadTopicName,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort(len) => write!(f, "frame too short ({len} bytes)"),
            Self::BadMagic => write!(f, "bad magic"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported version {v}"),
            Self::ForeignDomain(d) => write!(f, "foreign domain {d}"),
            Self::LengthMismatch { declared, actual } => {
                write!(f, "declared {declared} bytes, received {actual}")
            }
            Self::BadTopicName => write!(f, "topic name is not UTF-8"),
        }
    }
}

/// Decoded view of a frame, borrowing the datagram.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub domain_id: u16,
    pub type_id: TypeId,
    pub sequence: u64,
    pub topic: &'a str,
    pub payload: &'a [u8],
}

/// Encoded frame size for a topic and payload.
pub fn frame_len(topic: &str, payload_len: usize) -> usize {
    HEADER_LEN + topic.len() + payload_len
}

/// Encode a frame into `out` (cleared first).
pub fn encode(
    out: &mut Vec<u8>,
    domain_id: u16,
    type_id: TypeId,
    sequence: u64,
    topic: &str,
    payload: &[u8],
) {
    out.clear();
    out.reserve(frame_len(topic, payload.len()));
    out.extend_from_slice(&MAGIC);
    out.push(VERSION);
    out.push(0);
    out.extend_from_slice(&domain_id.to_le_bytes());
    out.extend_from_slice(type_id.as_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&(topic.len() as u16).to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(topic.as_bytes());
    out.extend_from_slice(payload);
}

/// Decode a datagram, accepting only frames of `domain_id`.
pub fn decode(buf: &[u8], domain_id: u16) -> Result<Frame<'_>, FrameError> {
    if buf.len() < HEADER_LEN {
        return Err(FrameError::TooShort(buf.len()));
    }
    if buf[0..4] != MAGIC {
        return Err(FrameError::BadMagic);
    }
    if buf[4] != VERSION {
        return Err(FrameError::UnsupportedVersion(buf[4]));
    }
    let domain = u16::from_le_bytes([buf[6], buf[7]]);
    if domain != domain_id {
        return Err(FrameError::ForeignDomain(domain));
    }

    let mut type_id = [0u8; 14];
    type_id.copy_from_slice(&buf[8..22]);
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&buf[22..30]);
    let topic_len = u16::from_le_bytes([buf[30], buf[31]]) as usize;
    let payload_len = u32::from_le_bytes([buf[32], buf[33], buf[34], buf[35]]) as usize;

    let declared = HEADER_LEN + topic_len + payload_len;
    if declared != buf.len() {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: buf.len(),
        });
    }

    let topic_end = HEADER_LEN + topic_len;
    let topic =
        std::str::from_utf8(&buf[HEADER_LEN..topic_end]).map_err(|_| FrameError::BadTopicName)?;

    Ok(Frame {
        domain_id: domain,
        type_id: TypeId::from_bytes(type_id),
        sequence: u64::from_le_bytes(seq),
        topic,
        payload: &buf[topic_end..],
    })
}
