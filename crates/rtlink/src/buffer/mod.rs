// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded buffers holding in-flight elements for one consumer of a connector.
//!
//! Each consumer endpoint of a [`Connector`](crate::Connector) owns exactly one
//! [`RingBuffer`]. Buffers are never shared across connectors.
//!
//! # Policies
//!
//! | Situation | Policy | Behavior |
//! |-----------|--------|----------|
//! | write, buffer full | [`FullPolicy::OverwriteOldest`] | drop oldest, always succeeds |
//! | write, buffer full | [`FullPolicy::RejectNew`] | `Err(Full)`, contents unchanged |
//! | write, buffer full | [`FullPolicy::BlockWriter`] | wait up to the write timeout |
//! | read, buffer empty | [`EmptyPolicy::ReturnLast`] | last element read again |
//! | read, buffer empty | [`EmptyPolicy::BlockReader`] | wait up to the read timeout |
//! | read, buffer empty | [`EmptyPolicy::Error`] | `Err(Empty)` |

mod policy;
mod ring;

pub use policy::{BufferConfig, EmptyPolicy, FullPolicy, DEFAULT_BUFFER_LENGTH};
pub use ring::RingBuffer;

use parking_lot::{Condvar, MutexGuard};
use std::fmt;
use std::time::{Duration, Instant};

/// Errors returned by buffer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// Buffer is full and the policy rejects new elements.
    Full,
    /// Buffer is empty and the policy reports it.
    Empty,
    /// A blocking read or write reached its deadline.
    Timeout,
    /// Buffer was closed (owning connector disconnected).
    Closed,
    /// Capacity must be at least 1.
    InvalidCapacity(usize),
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "Buffer full"),
            Self::Empty => write!(f, "Buffer empty"),
            Self::Timeout => write!(f, "Buffer operation timed out"),
            Self::Closed => write!(f, "Buffer closed"),
            Self::InvalidCapacity(cap) => write!(f, "Invalid buffer capacity: {cap} (must be >= 1)"),
        }
    }
}

impl std::error::Error for BufferError {}

/// Result type for buffer operations.
pub type Result<T> = std::result::Result<T, BufferError>;

/// Deadline `timeout` from now, `None` when it does not fit in an [`Instant`]
/// (waits without a deadline).
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Wait on `cv` until notified or `deadline` passes. Returns `true` on
/// timeout; never times out without a deadline.
pub(crate) fn wait_until<T: ?Sized>(
    cv: &Condvar,
    guard: &mut MutexGuard<'_, T>,
    deadline: Option<Instant>,
) -> bool {
    match deadline {
        Some(deadline) => cv.wait_until(guard, deadline).timed_out(),
        None => {
            cv.wait(guard);
            false
        }
    }
}
