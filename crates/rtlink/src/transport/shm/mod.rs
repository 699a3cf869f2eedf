// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared-memory transport.
//!
//! # Architecture
//!
//! ```text
//! +------------------+              +------------------+
//! |   Producer       |   Shared     |   Consumer       |
//! |   Connector      |   Memory     |   (any process)  |
//! |        |         |   (mmap)     |        |         |
//! |        v         |              |        v         |
//! |   ShmPublisher --+--------------+-> ShmSubscriber  |
//! +------------------+   Futex      +------------------+
//!                       (wake)
//! ```
//!
//! - [`ShmSegment`]: named POSIX region with a create/open/read/write/close/unlink
//!   lifecycle and bounds-checked access.
//! - [`ShmPublisher`] / [`ShmSubscriber`]: single-slot channel inside one segment:
//!   a 64-byte header (magic, capacity, length, sequence counter, wake word)
//!   followed by the payload area for one serialized element.
//! - `ShmTransport`: the connector-side transport, one publisher plus one
//!   in-process subscriber per consumer buffer.

mod channel;
mod futex;
mod link;
mod segment;

pub use channel::{PollInfo, ShmPublisher, ShmSubscriber, HEADER_SIZE};
pub use segment::ShmSegment;

pub(crate) use link::ShmTransport;

use std::fmt;
use std::io;

/// Default segment size when the connector profile does not set one.
pub const DEFAULT_MEMORY_SIZE: usize = 64 * 1024;

/// Errors that can occur in shared-memory operations.
#[derive(Debug)]
pub enum ShmError {
    /// An OS call failed (`shm_open`, `ftruncate`, `mmap`, `fstat`, `shm_unlink`).
    Resource { op: &'static str, source: io::Error },

    /// Operation on a segment that is not open.
    NotOpen,

    /// Invalid segment name.
    InvalidName(String),

    /// Access outside the mapped region.
    OutOfRange { offset: usize, len: usize, size: usize },

    /// Payload too large for the channel slot.
    PayloadTooLarge { size: usize, capacity: usize },

    /// Segment does not hold a channel header.
    BadHeader(String),

    /// Could not obtain a consistent read (writer kept overwriting).
    Contended,
}

impl fmt::Display for ShmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource { op, source } => write!(f, "Shared memory {op} failed: {source}"),
            Self::NotOpen => write!(f, "Shared memory segment is not open"),
            Self::InvalidName(name) => write!(f, "Invalid segment name: {name}"),
            Self::OutOfRange { offset, len, size } => write!(
                f,
                "Access out of range: offset {offset} + len {len} exceeds segment size {size}"
            ),
            Self::PayloadTooLarge { size, capacity } => write!(
                f,
                "Payload too large: {size} bytes exceeds slot capacity {capacity}"
            ),
            Self::BadHeader(reason) => write!(f, "Invalid channel header: {reason}"),
            Self::Contended => write!(f, "Channel read contended by concurrent writes"),
        }
    }
}

impl std::error::Error for ShmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Resource { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl ShmError {
    pub(crate) fn os(op: &'static str) -> Self {
        Self::Resource {
            op,
            source: io::Error::last_os_error(),
        }
    }
}

/// Result type for shared-memory operations.
pub type Result<T> = std::result::Result<T, ShmError>;

/// Segment name used by a connector: `/rtlink_{pid}_{connector}`.
#[must_use]
pub fn connector_segment_name(connector_id: u64) -> String {
    format!("/rtlink_{}_{}", std::process::id(), connector_id)
}

/// Normalize a segment id to the POSIX form (leading `/`).
#[must_use]
pub fn normalize_name(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("seg1"), "/seg1");
        assert_eq!(normalize_name("/seg1"), "/seg1");
    }

    #[test]
    fn test_connector_segment_name() {
        let name = connector_segment_name(7);
        assert!(name.starts_with("/rtlink_"));
        assert!(name.ends_with("_7"));
        assert_eq!(name.matches('/').count(), 1);
    }
}
