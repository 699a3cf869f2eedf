// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connectors: live data channels from one producing port to its consumers.
//!
//! # Architecture
//!
//! ```text
//! Connector<T>
//! +-- id, profile, producer/consumer port profiles
//! +-- buffers: one RingBuffer<T> per consumer (never shared)
//! +-- transport: Mutex<Transport<T>>  (Local | SharedMemory | Network)
//! +-- state: Connecting -> Connected -> Disconnecting -> Disconnected
//! ```
//!
//! # Concurrency
//!
//! - `write` holds the transport lock for one delivery.
//! - `read` only touches the consumer's buffer.
//! - `disconnect` marks the connector, closes every buffer (waking blocked
//!   readers and writers, which then report `Disconnected`), and only then
//!   takes the transport lock to release resources.

mod profile;

pub use profile::{ConnectorProfile, PROP_MEMORY_SIZE, PROP_TOPIC};

use crate::buffer::{BufferError, RingBuffer};
use crate::port::{DecodeError, PortData, PortDirection, PortProfile};
use crate::transport::{Transport, TransportContext, TransportKind, TransportSetup};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =======================================================================
// Identifiers and state
// =======================================================================

static NEXT_CONNECTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connector identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectorId(u64);

impl ConnectorId {
    fn next() -> Self {
        Self(NEXT_CONNECTOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Index of a consumer within its connector (attachment order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(pub usize);

/// Connector lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

// =======================================================================
// Errors
// =======================================================================

/// Errors from connector operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Port type tags differ.
    TypeMismatch { expected: String, found: String },
    /// Port has the wrong direction, or no consumer was given.
    InvalidPort(String),
    /// The transport resource could not be acquired or failed.
    TransportUnavailable(String),
    /// Consumer buffer full under the reject-new policy.
    BufferFull,
    /// Block-writer or block-reader deadline reached.
    Timeout,
    /// Connector is disconnected.
    Disconnected,
    /// Consumer buffer empty under the error policy (or nothing read yet).
    Empty,
    /// Encoded element does not fit the transport.
    PayloadTooLarge { size: usize, capacity: usize },
    /// Consumer id not part of this connector.
    UnknownConsumer(usize),
    /// Element bytes could not be decoded.
    Decode(DecodeError),
    /// Profile values cannot be used.
    InvalidConfig(String),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected '{}', found '{}'", expected, found)
            }
            Self::InvalidPort(msg) => write!(f, "Invalid port: {}", msg),
            Self::TransportUnavailable(msg) => write!(f, "Transport unavailable: {}", msg),
            Self::BufferFull => write!(f, "Buffer full"),
            Self::Timeout => write!(f, "Timed out"),
            Self::Disconnected => write!(f, "Connector disconnected"),
            Self::Empty => write!(f, "No data available"),
            Self::PayloadTooLarge { size, capacity } => write!(
                f,
                "Payload too large: {} bytes exceeds transport capacity {}",
                size, capacity
            ),
            Self::UnknownConsumer(idx) => write!(f, "Unknown consumer #{}", idx),
            Self::Decode(e) => write!(f, "Decode error: {}", e),
            Self::InvalidConfig(msg) => write!(f, "Invalid connector configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConnectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BufferError> for ConnectorError {
    fn from(e: BufferError) -> Self {
        match e {
            BufferError::Full => Self::BufferFull,
            BufferError::Empty => Self::Empty,
            BufferError::Timeout => Self::Timeout,
            BufferError::Closed => Self::Disconnected,
            BufferError::InvalidCapacity(cap) => {
                Self::InvalidConfig(format!("buffer capacity {cap}"))
            }
        }
    }
}

/// Result type for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;

// =======================================================================
// Connector
// =======================================================================

/// Live channel from one producing port to one or more consuming ports.
pub struct Connector<T: PortData> {
    id: ConnectorId,
    profile: ConnectorProfile,
    producer: PortProfile,
    consumers: Vec<PortProfile>,
    buffers: Vec<Arc<RingBuffer<T>>>,
    transport: Mutex<Transport<T>>,
    state: Mutex<ConnectorState>,
}

impl<T: PortData> Connector<T> {
    /// Validate the ports, create one buffer per consumer and acquire the
    /// transport.
    ///
    /// # Errors
    ///
    /// - [`ConnectorError::InvalidPort`]: producer not `Out`, a consumer not
    ///   `In`, or no consumer
    /// - [`ConnectorError::TypeMismatch`]: a port's type tag differs from `T`'s
    /// - [`ConnectorError::TransportUnavailable`]: transport acquisition failed
    ///   (nothing stays acquired)
    pub fn connect(
        producer: &PortProfile,
        consumers: &[PortProfile],
        profile: &ConnectorProfile,
        context: &TransportContext,
    ) -> Result<Arc<Self>> {
        Self::validate(producer, consumers)?;

        let buffers = consumers
            .iter()
            .map(|_| RingBuffer::new(profile.buffer.clone()).map(Arc::new))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let id = ConnectorId::next();
        log::debug!(
            "[Connector] {} '{}' connecting {} -> {} consumer(s) over {}",
            id,
            profile.name,
            producer.name,
            consumers.len(),
            profile.kind
        );

        let transport = Transport::acquire(&TransportSetup {
            connector: id,
            profile,
            producer,
            sinks: &buffers,
            context,
        })
        .map_err(|e| {
            log::warn!("[Connector] {} '{}' failed to connect: {}", id, profile.name, e);
            e
        })?;

        log::info!("[Connector] {} '{}' connected ({})", id, profile.name, profile.kind);
        Ok(Arc::new(Self {
            id,
            profile: profile.clone(),
            producer: producer.clone(),
            consumers: consumers.to_vec(),
            buffers,
            transport: Mutex::new(transport),
            state: Mutex::new(ConnectorState::Connected),
        }))
    }

    fn validate(producer: &PortProfile, consumers: &[PortProfile]) -> Result<()> {
        if producer.direction != PortDirection::Out {
            return Err(ConnectorError::InvalidPort(format!(
                "'{}' is not an output port",
                producer.name
            )));
        }
        if consumers.is_empty() {
            return Err(ConnectorError::InvalidPort(
                "at least one consuming port is required".to_string(),
            ));
        }

        let expected = T::type_name();
        for port in std::iter::once(producer).chain(consumers) {
            if port.type_tag.as_str() != &*expected {
                return Err(ConnectorError::TypeMismatch {
                    expected: expected.to_string(),
                    found: port.type_tag.to_string(),
                });
            }
        }
        for port in consumers {
            if port.direction != PortDirection::In {
                return Err(ConnectorError::InvalidPort(format!(
                    "'{}' is not an input port",
                    port.name
                )));
            }
        }
        Ok(())
    }

    pub fn id(&self) -> ConnectorId {
        self.id
    }

    pub fn profile(&self) -> &ConnectorProfile {
        &self.profile
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.lock().kind()
    }

    pub fn producer(&self) -> &PortProfile {
        &self.producer
    }

    pub fn consumers(&self) -> &[PortProfile] {
        &self.consumers
    }

    /// Current state. A `Connected` connector whose transport resource went
    /// away (participant shut down) is torn down here and reports
    /// `Disconnected`.
    pub fn state(&self) -> ConnectorState {
        let current = *self.state.lock();
        // A busy transport (writer in flight) is checked on a later call
        let lost = self.transport.try_lock().is_some_and(|t| !t.is_live());
        if current == ConnectorState::Connected && lost {
            self.transport_lost();
            return *self.state.lock();
        }
        current
    }

    /// True while `Connected` and the transport resource is live.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectorState::Connected
    }

    /// Buffer of a consumer.
    pub fn buffer(&self, consumer: ConsumerId) -> Option<&Arc<RingBuffer<T>>> {
        self.buffers.get(consumer.0)
    }

    /// Push one element toward every consumer.
    ///
    /// # Errors
    ///
    /// `BufferFull` (reject-new), `Timeout` (block-writer), `Disconnected`,
    /// `PayloadTooLarge`, or `TransportUnavailable`. Only a lost transport
    /// (`Disconnected`) changes the connector state, to `Disconnected`.
    pub fn write(&self, value: &T) -> Result<()> {
        if *self.state.lock() != ConnectorState::Connected {
            return Err(ConnectorError::Disconnected);
        }
        let result = {
            let mut transport = self.transport.lock();
            if *self.state.lock() != ConnectorState::Connected {
                return Err(ConnectorError::Disconnected);
            }
            transport.deliver(value)
        };
        if result == Err(ConnectorError::Disconnected) {
            self.transport_lost();
        }
        result
    }

    fn transport_lost(&self) {
        log::warn!(
            "[Connector] {} '{}' transport lost, disconnecting",
            self.id,
            self.profile.name
        );
        self.disconnect();
    }

    /// Pop one element for `consumer` according to its empty policy.
    ///
    /// `timeout` overrides the configured read timeout for block-reader.
    pub fn read(&self, consumer: ConsumerId, timeout: Option<Duration>) -> Result<T> {
        let buffer = self
            .buffers
            .get(consumer.0)
            .ok_or(ConnectorError::UnknownConsumer(consumer.0))?;
        if self.state() == ConnectorState::Disconnected {
            return Err(ConnectorError::Disconnected);
        }
        let result = match timeout {
            Some(t) => buffer.read_timeout(t),
            None => buffer.read(),
        };
        result.map_err(ConnectorError::from)
    }

    /// Pop one element for `consumer` if one is buffered.
    pub fn try_read(&self, consumer: ConsumerId) -> Option<T> {
        self.buffers.get(consumer.0)?.try_read()
    }

    /// True if `consumer` has buffered data.
    pub fn has_data(&self, consumer: ConsumerId) -> bool {
        self.buffers
            .get(consumer.0)
            .is_some_and(|b| !b.is_empty())
    }

    /// Release the transport, discard buffered data, force `Disconnected`.
    ///
    /// Idempotent. Blocked readers and writers return `Disconnected`.
    pub fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            if matches!(
                *state,
                ConnectorState::Disconnecting | ConnectorState::Disconnected
            ) {
                return;
            }
            *state = ConnectorState::Disconnecting;
        }

        for buffer in &self.buffers {
            buffer.close();
        }
        self.transport.lock().release();

        *self.state.lock() = ConnectorState::Disconnected;
        log::info!("[Connector] {} '{}' disconnected", self.id, self.profile.name);
    }
}

impl<T: PortData> Drop for Connector<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl<T: PortData> fmt::Debug for Connector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id)
            .field("name", &self.profile.name)
            .field("kind", &self.profile.kind)
            .field("producer", &self.producer.name)
            .field("consumers", &self.consumers.len())
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferConfig, EmptyPolicy, FullPolicy};
    use std::thread;

    fn ports(n: usize) -> (PortProfile, Vec<PortProfile>) {
        let producer = PortProfile::new::<i32>("out", PortDirection::Out);
        let consumers = (0..n)
            .map(|i| PortProfile::new::<i32>(format!("in{i}"), PortDirection::In))
            .collect();
        (producer, consumers)
    }

    fn local(buffer: BufferConfig) -> ConnectorProfile {
        ConnectorProfile::local("test").with_buffer(buffer)
    }

    #[test]
    fn test_local_fan_out() {
        let (producer, consumers) = ports(3);
        let conn = Connector::<i32>::connect(
            &producer,
            &consumers,
            &ConnectorProfile::local("fan"),
            &TransportContext::local(),
        )
        .expect("connect");
        assert_eq!(conn.state(), ConnectorState::Connected);

        conn.write(&7).expect("write");
        for i in 0..3 {
            assert_eq!(conn.read(ConsumerId(i), None), Ok(7));
        }
        assert_eq!(conn.read(ConsumerId(3), None), Err(ConnectorError::UnknownConsumer(3)));
    }

    #[test]
    fn test_type_mismatch() {
        let producer = PortProfile::new::<i32>("out", PortDirection::Out);
        let consumer = PortProfile::new::<f64>("in", PortDirection::In);
        let result = Connector::<i32>::connect(
            &producer,
            &[consumer],
            &ConnectorProfile::local("bad"),
            &TransportContext::local(),
        );
        assert!(matches!(result, Err(ConnectorError::TypeMismatch { .. })));
    }

    #[test]
    fn test_direction_validation() {
        let (producer, consumers) = ports(1);
        let ctx = TransportContext::local();
        let profile = ConnectorProfile::local("dir");

        let reversed = Connector::<i32>::connect(&consumers[0], &[producer.clone()], &profile, &ctx);
        assert!(matches!(reversed, Err(ConnectorError::InvalidPort(_))));

        let empty = Connector::<i32>::connect(&producer, &[], &profile, &ctx);
        assert!(matches!(empty, Err(ConnectorError::InvalidPort(_))));
    }

    #[test]
    fn test_reject_new_reports_buffer_full() {
        let (producer, consumers) = ports(1);
        let conn = Connector::<i32>::connect(
            &producer,
            &consumers,
            &local(BufferConfig::with_capacity(2).full_policy(FullPolicy::RejectNew)),
            &TransportContext::local(),
        )
        .expect("connect");

        conn.write(&1).expect("room");
        conn.write(&2).expect("room");
        assert_eq!(conn.write(&3), Err(ConnectorError::BufferFull));
        assert_eq!(conn.state(), ConnectorState::Connected);
        assert_eq!(conn.read(ConsumerId(0), None), Ok(1));
    }

    #[test]
    fn test_disconnect_idempotent() {
        let (producer, consumers) = ports(1);
        let conn = Connector::<i32>::connect(
            &producer,
            &consumers,
            &ConnectorProfile::local("idem"),
            &TransportContext::local(),
        )
        .expect("connect");
        conn.write(&1).expect("write");

        conn.disconnect();
        conn.disconnect();
        assert_eq!(conn.state(), ConnectorState::Disconnected);
        assert!(!conn.is_connected());
        assert_eq!(conn.write(&2), Err(ConnectorError::Disconnected));
        assert_eq!(conn.read(ConsumerId(0), None), Err(ConnectorError::Disconnected));
    }

    #[test]
    fn test_disconnect_wakes_blocked_reader() {
        let (producer, consumers) = ports(1);
        let conn = Connector::<i32>::connect(
            &producer,
            &consumers,
            &local(BufferConfig::default().empty_policy(EmptyPolicy::BlockReader)),
            &TransportContext::local(),
        )
        .expect("connect");

        let reader = {
            let conn = Arc::clone(&conn);
            thread::spawn(move || conn.read(ConsumerId(0), Some(Duration::from_secs(10))))
        };
        thread::sleep(Duration::from_millis(20));
        conn.disconnect();

        assert_eq!(reader.join().expect("reader thread"), Err(ConnectorError::Disconnected));
    }

    #[test]
    fn test_shm_round_trip() {
        let (producer, consumers) = ports(2);
        let conn = Connector::<i32>::connect(
            &producer,
            &consumers,
            &ConnectorProfile::shared_memory("shm").with_memory_size(256),
            &TransportContext::local(),
        )
        .expect("connect");

        conn.write(&-42).expect("write");
        assert_eq!(conn.read(ConsumerId(0), None), Ok(-42));
        assert_eq!(conn.read(ConsumerId(1), None), Ok(-42));
        conn.disconnect();
    }

    #[test]
    fn test_shm_too_small_segment() {
        let (producer, consumers) = ports(1);
        let result = Connector::<i32>::connect(
            &producer,
            &consumers,
            &ConnectorProfile::shared_memory("tiny").with_memory_size(16),
            &TransportContext::local(),
        );
        assert!(matches!(result, Err(ConnectorError::InvalidConfig(_))));
    }

    #[test]
    fn test_network_requires_manager() {
        let (producer, consumers) = ports(1);
        let result = Connector::<i32>::connect(
            &producer,
            &consumers,
            &ConnectorProfile::network("net"),
            &TransportContext::local(),
        );
        assert!(matches!(result, Err(ConnectorError::TransportUnavailable(_))));
    }
}
