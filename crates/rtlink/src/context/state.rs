// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lifecycle states and scheduling cadence.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique execution context identifier, passed to every callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ec-{}", self.0)
    }
}

/// Lifecycle state of one component within one execution context.
///
/// ```text
/// Created --attach--> Inactive --activate--> Active
///                        ^  <--deactivate--    |
///                        |                     | callback failure
///                      reset                   v
///                        +------------------ Error
///
/// any --detach--> Finalized
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Not attached yet. A handle only exists once `on_initialize` succeeded,
    /// so `state` never reports it.
    Created,
    Inactive,
    Active,
    Error,
    /// Detached. The handle is gone afterwards and `state` reports
    /// `UnknownHandle`.
    Finalized,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Inactive => "Inactive",
            Self::Active => "Active",
            Self::Error => "Error",
            Self::Finalized => "Finalized",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an execution context decides when to run a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Fixed period; the next cycle starts at `last_start + period`.
    Periodic(Duration),
    /// One cycle per explicit tick.
    Triggered,
}

impl Cadence {
    pub fn period(&self) -> Option<Duration> {
        match self {
            Self::Periodic(p) => Some(*p),
            Self::Triggered => None,
        }
    }

    /// Rate in Hz for periodic cadences.
    pub fn rate(&self) -> Option<f64> {
        self.period().map(|p| 1.0 / p.as_secs_f64())
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Periodic(p) => write!(f, "periodic({:?})", p),
            Self::Triggered => f.write_str("triggered"),
        }
    }
}
