// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Element types carried by ports.
//!
//! Every element type has a stable type name used as the port type tag and a
//! little-endian byte encoding used by the shared-memory and network
//! transports. The in-process transport never encodes.
//!
//! # Encoding
//!
//! | Type | Encoding |
//! |------|----------|
//! | integers, floats | fixed-width little-endian |
//! | `bool` | one byte, `0` or `1` |
//! | `String` | `u32` LE length + UTF-8 bytes |
//! | `Vec<u8>` | `u32` LE length + bytes |
//! | `Timed<T>` | `i64` sec + `u32` nsec + `T` |

use std::borrow::Cow;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Errors decoding an element from bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended early.
    Truncated { need: usize, have: usize },
    /// String bytes are not UTF-8.
    InvalidUtf8,
    /// Bytes do not form a valid value of the type.
    InvalidValue(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { need, have } => {
                write!(f, "Truncated element: need {need} bytes, have {have}")
            }
            Self::InvalidUtf8 => write!(f, "Invalid UTF-8 in string element"),
            Self::InvalidValue(what) => write!(f, "Invalid element value: {what}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Data element that can travel through a port.
pub trait PortData: Clone + Send + Sync + 'static {
    /// Stable type name (port type tag).
    fn type_name() -> Cow<'static, str>;

    /// Append the encoding of `self` to `out`.
    fn encode(&self, out: &mut Vec<u8>);

    /// Decode a value from the start of `bytes`, returning it and the number of
    /// bytes consumed.
    fn decode_prefix(bytes: &[u8]) -> Result<(Self, usize), DecodeError>;

    /// Decode a value occupying `bytes` (trailing bytes are ignored).
    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::decode_prefix(bytes).map(|(value, _)| value)
    }

    /// Encode into a fresh buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

fn take<const N: usize>(bytes: &[u8]) -> Result<[u8; N], DecodeError> {
    bytes
        .get(..N)
        .and_then(|b| b.try_into().ok())
        .ok_or(DecodeError::Truncated {
            need: N,
            have: bytes.len(),
        })
}

macro_rules! impl_port_data_le {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl PortData for $ty {
                fn type_name() -> Cow<'static, str> {
                    Cow::Borrowed($name)
                }

                fn encode(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn decode_prefix(bytes: &[u8]) -> Result<(Self, usize), DecodeError> {
                    let raw = take::<{ std::mem::size_of::<$ty>() }>(bytes)?;
                    Ok((<$ty>::from_le_bytes(raw), std::mem::size_of::<$ty>()))
                }
            }
        )*
    };
}

impl_port_data_le! {
    i8 => "Octet",
    u8 => "UOctet",
    i16 => "Short",
    u16 => "UShort",
    i32 => "Long",
    u32 => "ULong",
    i64 => "LongLong",
    u64 => "ULongLong",
    f32 => "Float",
    f64 => "Double",
}

impl PortData for bool {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("Boolean")
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }

    fn decode_prefix(bytes: &[u8]) -> Result<(Self, usize), DecodeError> {
        match take::<1>(bytes)?[0] {
            0 => Ok((false, 1)),
            1 => Ok((true, 1)),
            _ => Err(DecodeError::InvalidValue("boolean byte not 0 or 1")),
        }
    }
}

fn encode_len(len: usize, out: &mut Vec<u8>) {
    // Payloads are bounded by the segment or datagram size, far below u32::MAX.
    out.extend_from_slice(&(len as u32).to_le_bytes());
}

fn decode_len_prefixed(bytes: &[u8]) -> Result<(&[u8], usize), DecodeError> {
    let len = u32::from_le_bytes(take::<4>(bytes)?) as usize;
    let end = 4 + len;
    let body = bytes.get(4..end).ok_or(DecodeError::Truncated {
        need: end,
        have: bytes.len(),
    })?;
    Ok((body, end))
}

impl PortData for String {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("String")
    }

    fn encode(&self, out: &mut Vec<u8>) {
        encode_len(self.len(), out);
        out.extend_from_slice(self.as_bytes());
    }

    fn decode_prefix(bytes: &[u8]) -> Result<(Self, usize), DecodeError> {
        let (body, used) = decode_len_prefixed(bytes)?;
        let s = std::str::from_utf8(body).map_err(|_| DecodeError::InvalidUtf8)?;
        Ok((s.to_string(), used))
    }
}

impl PortData for Vec<u8> {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("OctetSeq")
    }

    fn encode(&self, out: &mut Vec<u8>) {
        encode_len(self.len(), out);
        out.extend_from_slice(self);
    }

    fn decode_prefix(bytes: &[u8]) -> Result<(Self, usize), DecodeError> {
        let (body, used) = decode_len_prefixed(bytes)?;
        Ok((body.to_vec(), used))
    }
}

// =======================================================================
// Timestamped elements
// =======================================================================

/// Wall-clock timestamp carried with a [`Timed`] element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: u32,
}

impl Timestamp {
    /// Current wall-clock time (zero if the clock is before the epoch).
    pub fn now() -> Self {
        let since = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: since.as_secs() as i64,
            nsec: since.subsec_nanos(),
        }
    }
}

/// Element paired with the time it was produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Timed<T> {
    pub tm: Timestamp,
    pub data: T,
}

impl<T> Timed<T> {
    /// Stamp `data` with the current time.
    pub fn now(data: T) -> Self {
        Self {
            tm: Timestamp::now(),
            data,
        }
    }
}

impl<T: PortData> PortData for Timed<T> {
    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("Timed{}", T::type_name()))
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tm.sec.to_le_bytes());
        out.extend_from_slice(&self.tm.nsec.to_le_bytes());
        self.data.encode(out);
    }

    fn decode_prefix(bytes: &[u8]) -> Result<(Self, usize), DecodeError> {
        let sec = i64::from_le_bytes(take::<8>(bytes)?);
        let nsec = u32::from_le_bytes(take::<4>(&bytes[8..])?);
        if nsec >= 1_000_000_000 {
            return Err(DecodeError::InvalidValue("nanoseconds out of range"));
        }
        let (data, used) = T::decode_prefix(&bytes[12..])?;
        Ok((
            Self {
                tm: Timestamp { sec, nsec },
                data,
            },
            12 + used,
        ))
    }
}
