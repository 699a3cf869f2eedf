// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # rtlink - Component execution and data-port middleware
//!
//! Independent computational units (components) are wired together at runtime
//! by directional data links, and each component's execution is driven by an
//! attachable scheduler.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtlink::{
//!     CallbackResult, Component, ConnectorProfile, ContextId, ExecutionContext, InPort,
//!     OutPort, TransportContext,
//! };
//! use parking_lot::Mutex;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Counter {
//!     out: OutPort<i64>,
//!     value: i64,
//! }
//!
//! impl Component for Counter {
//!     fn on_execute(&mut self, _ec: ContextId) -> CallbackResult {
//!         self.value += 1;
//!         // BufferFull on a reject-new buffer is a skipped sample, not a failure
//!         let _ = self.out.write(&self.value);
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let out = OutPort::<i64>::new("count");
//! let input = InPort::<i64>::new("count_in");
//! out.connect(&[&input], &ConnectorProfile::local("link"), &TransportContext::local())?;
//!
//! let ec = ExecutionContext::periodic("main", Duration::from_millis(10));
//! let counter = Arc::new(Mutex::new(Counter { out, value: 0 }));
//! let handle = ec.attach(counter)?;
//! ec.activate(handle)?;
//! ec.start()?;
//! std::thread::sleep(Duration::from_millis(50));
//! ec.stop()?;
//! println!("last value: {:?}", input.read());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                       Control boundary (ControlSurface)             |
//! +---------------------------------------------------------------------+
//! |   ExecutionContext (thread, lifecycle FSM)  |  ConfigSetRegistry    |
//! +---------------------------------------------------------------------+
//! |   OutPort<T> -> Connector<T> -> RingBuffer<T> (per consumer) -> InPort<T>
//! +---------------------------------------------------------------------+
//! |   Transport: Local | SharedMemory (ShmSegment) | Network (Participant)
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`context`] - Execution contexts and the component lifecycle
//! - [`port`] - Typed ports and the [`PortData`] element trait
//! - [`connector`] - Data channels between ports
//! - [`buffer`] - Bounded buffers with full/empty policies
//! - [`transport`] - Local, shared-memory and network transports
//! - [`participant`] - Process-wide network participant manager
//! - [`config`] - Configuration sets and the registry
//! - [`control`] - Control boundary used by remote callers

/// Bounded per-consumer buffers with configurable full/empty policies.
pub mod buffer;
/// Configuration sets, the registry and well-known keys.
pub mod config;
/// Connectors binding one producing port to one or more consuming ports.
pub mod connector;
/// Execution contexts driving component lifecycles.
pub mod context;
/// Control boundary consumed by the RPC layer.
pub mod control;
/// Network participant manager and datagram pub/sub substrate.
pub mod participant;
/// Typed ports and element serialization.
pub mod port;
/// Transports moving elements from producer to consumers.
pub mod transport;

pub use buffer::{BufferConfig, BufferError, EmptyPolicy, FullPolicy, RingBuffer};
pub use config::{ConfigError, ConfigEvent, ConfigSet, ConfigSetRegistry};
pub use connector::{
    Connector, ConnectorError, ConnectorId, ConnectorProfile, ConnectorState, ConsumerId,
};
pub use context::{
    CallbackError, CallbackResult, Cadence, Component, ComponentHandle, ContextError, ContextId,
    ExecutionContext, LifecycleState, SharedComponent,
};
pub use control::{ControlSurface, ReturnCode};
pub use participant::{
    Participant, ParticipantError, ParticipantManager, ParticipantProfile, Topic, TypeDescriptor,
};
pub use port::{DecodeError, InPort, OutPort, PortData, PortDirection, PortProfile, Timed};
pub use transport::shm::{ShmError, ShmPublisher, ShmSegment, ShmSubscriber};
pub use transport::{TransportContext, TransportKind};

/// rtlink version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
