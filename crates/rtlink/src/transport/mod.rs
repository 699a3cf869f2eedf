// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transports moving elements from a connector's producer to its consumers.
//!
//! A transport is selected once, when the connector is created, and lives
//! exactly as long as the connector holds it:
//!
//! | Kind | Deliver | Resource |
//! |------|---------|----------|
//! | [`TransportKind::Local`] | synchronous push into each consumer buffer | none |
//! | [`TransportKind::SharedMemory`] | encode, copy into segment, bump sequence, wake | one [`shm::ShmSegment`] |
//! | [`TransportKind::Network`] | encode, asynchronous datagram publish | topic on the process participant |
//!
//! Every variant exposes the same capability set: `acquire`, `deliver`,
//! `release`. `release` is idempotent and safe on a partially acquired
//! transport.

mod local;
mod network;
pub mod shm;

use crate::buffer::RingBuffer;
use crate::config::{keys, ConfigError};
use crate::connector::{ConnectorError, ConnectorId, ConnectorProfile};
use crate::participant::ParticipantManager;
use crate::port::{PortData, PortProfile};
use local::LocalTransport;
use network::NetworkTransport;
use shm::ShmTransport;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Transport selected for a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    /// Same-process, synchronous.
    #[default]
    Local,
    /// Same-host, through a named shared-memory segment.
    SharedMemory,
    /// Datagram pub/sub through the process participant.
    Network,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::SharedMemory => "shared_memory",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "inproc" => Ok(Self::Local),
            "shared_memory" | "shared-memory" | "shm" => Ok(Self::SharedMemory),
            "network" | "udp" => Ok(Self::Network),
            other => Err(ConfigError::InvalidValue {
                key: keys::INTERFACE_TYPE.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Process resources transports may need.
///
/// The network transport requires a [`ParticipantManager`]; the other kinds
/// need nothing.
#[derive(Debug, Clone, Default)]
pub struct TransportContext {
    participants: Option<Arc<ParticipantManager>>,
}

impl TransportContext {
    /// Context without a participant manager (local and shared-memory only).
    pub fn local() -> Self {
        Self::default()
    }

    /// Context handing `manager` to network connectors.
    pub fn with_participants(manager: Arc<ParticipantManager>) -> Self {
        Self {
            participants: Some(manager),
        }
    }

    pub fn participants(&self) -> Option<&Arc<ParticipantManager>> {
        self.participants.as_ref()
    }
}

/// Everything a transport needs at acquisition time.
pub(crate) struct TransportSetup<'a, T> {
    pub connector: ConnectorId,
    pub profile: &'a ConnectorProfile,
    pub producer: &'a PortProfile,
    pub sinks: &'a [Arc<RingBuffer<T>>],
    pub context: &'a TransportContext,
}

/// Tagged transport variant owned by one connector.
pub(crate) enum Transport<T: PortData> {
    Local(LocalTransport<T>),
    SharedMemory(ShmTransport<T>),
    Network(NetworkTransport<T>),
}

impl<T: PortData> Transport<T> {
    /// Acquire the resources for `setup.profile.kind`.
    ///
    /// On failure everything acquired so far is already released.
    pub fn acquire(setup: &TransportSetup<'_, T>) -> Result<Self, ConnectorError> {
        match setup.profile.kind {
            TransportKind::Local => Ok(Self::Local(LocalTransport::acquire(setup))),
            TransportKind::SharedMemory => ShmTransport::acquire(setup).map(Self::SharedMemory),
            TransportKind::Network => NetworkTransport::acquire(setup).map(Self::Network),
        }
    }

    /// Move one element toward every consumer.
    pub fn deliver(&mut self, value: &T) -> Result<(), ConnectorError> {
        match self {
            Self::Local(t) => t.deliver(value),
            Self::SharedMemory(t) => t.deliver(value),
            Self::Network(t) => t.deliver(value),
        }
    }

    /// Release every resource. Idempotent.
    pub fn release(&mut self) {
        match self {
            Self::Local(t) => t.release(),
            Self::SharedMemory(t) => t.release(),
            Self::Network(t) => t.release(),
        }
    }

    /// True while the underlying resource is held.
    pub fn is_live(&self) -> bool {
        match self {
            Self::Local(t) => t.is_live(),
            Self::SharedMemory(t) => t.is_live(),
            Self::Network(t) => t.is_live(),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Local(_) => TransportKind::Local,
            Self::SharedMemory(_) => TransportKind::SharedMemory,
            Self::Network(_) => TransportKind::Network,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_spellings() {
        assert_eq!("local".parse::<TransportKind>().ok(), Some(TransportKind::Local));
        assert_eq!(
            "shared-memory".parse::<TransportKind>().ok(),
            Some(TransportKind::SharedMemory)
        );
        assert_eq!(
            "SHARED_MEMORY".parse::<TransportKind>().ok(),
            Some(TransportKind::SharedMemory)
        );
        assert_eq!("network".parse::<TransportKind>().ok(), Some(TransportKind::Network));
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_transport_kind_display_roundtrip() {
        for kind in [TransportKind::Local, TransportKind::SharedMemory, TransportKind::Network] {
            assert_eq!(kind.to_string().parse::<TransportKind>().ok(), Some(kind));
        }
    }
}
