// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datagram pub/sub participant.
//!
//! # Architecture
//!
//! ```text
//! Participant
//! +-- socket: UdpSocket (socket2, SO_REUSEADDR, read timeout)
//! +-- types:  DashMap<type name, TypeDescriptor>
//! +-- topics: DashMap<topic name, Arc<TopicEntry>>
//! |            +-- subscribers: RwLock<Vec<(SubscriptionId, Sink)>>
//! +-- receive thread: recv_from -> wire::decode -> topic lookup -> sinks
//! ```
//!
//! Publishing encodes one frame and sends it to every configured peer, or to
//! the participant's own socket when no peer is configured. Sinks run on the
//! receive thread and must not block for long.

use super::profile::ParticipantProfile;
use super::types::TypeDescriptor;
use super::wire;
use super::{ParticipantError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Callback receiving the payload of each frame on a topic.
pub type Sink = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Subscription registration handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct TopicEntry {
    name: Arc<str>,
    data_type: TypeDescriptor,
    subscribers: RwLock<Vec<(SubscriptionId, Sink)>>,
    sequence: AtomicU64,
}

/// Handle to a topic created on a participant.
#[derive(Clone)]
pub struct Topic {
    entry: Arc<TopicEntry>,
}

impl Topic {
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn data_type(&self) -> &TypeDescriptor {
        &self.entry.data_type
    }

    /// Number of local subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.entry.subscribers.read().len()
    }
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.entry.name)
            .field("type", &self.entry.data_type.name())
            .finish()
    }
}

struct Shared {
    profile: ParticipantProfile,
    types: DashMap<String, TypeDescriptor>,
    topics: DashMap<String, Arc<TopicEntry>>,
    running: AtomicBool,
    next_subscription: AtomicU64,
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
}

/// One participant identity: a UDP socket plus topic tables.
pub struct Participant {
    shared: Arc<Shared>,
    socket: UdpSocket,
    local_addr: SocketAddr,
    destinations: Vec<SocketAddr>,
    send_buf: Mutex<Vec<u8>>,
    recv_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Participant {
    /// Bind the socket and start the receive thread.
    pub fn new(profile: ParticipantProfile) -> Result<Arc<Self>> {
        profile.validate()?;
        let bind_addr = profile.bind_addr()?;

        let socket = Socket::new(Domain::for_address(bind_addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&bind_addr.into())?;
        socket.set_read_timeout(Some(profile.recv_timeout()))?;
        let socket: UdpSocket = socket.into();
        let local_addr = socket.local_addr()?;

        // Own subscribers always hear local publishes, peers or not
        let mut destinations = profile.peer_addrs()?;
        let own = loopback_of(local_addr);
        if !destinations.contains(&own) {
            destinations.insert(0, own);
        }

        log::info!(
            "[Participant] '{}' bound to {} (domain {}, {} destination(s))",
            profile.name,
            local_addr,
            profile.domain_id,
            destinations.len()
        );

        let shared = Arc::new(Shared {
            profile,
            types: DashMap::new(),
            topics: DashMap::new(),
            running: AtomicBool::new(true),
            next_subscription: AtomicU64::new(1),
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        });

        let rx_socket = socket.try_clone()?;
        let rx_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("rtlink-participant-rx".to_string())
            .spawn(move || receive_loop(&rx_shared, &rx_socket))?;

        Ok(Arc::new(Self {
            shared,
            socket,
            local_addr,
            destinations,
            send_buf: Mutex::new(Vec::new()),
            recv_thread: Mutex::new(Some(handle)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.shared.profile.name
    }

    pub fn domain_id(&self) -> u16 {
        self.shared.profile.domain_id
    }

    pub fn profile(&self) -> &ParticipantProfile {
        &self.shared.profile
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Register a data type. Returns `false` if it was already registered.
    pub fn register_type(&self, descriptor: TypeDescriptor) -> bool {
        match self.shared.types.entry(descriptor.name().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                log::debug!("[Participant] Registered type '{}'", descriptor.name());
                v.insert(descriptor);
                true
            }
        }
    }

    /// Unregister a data type. Returns `false` if it was not registered.
    pub fn unregister_type(&self, type_name: &str) -> bool {
        let removed = self.shared.types.remove(type_name).is_some();
        if removed {
            log::debug!("[Participant] Unregistered type '{}'", type_name);
        }
        removed
    }

    pub fn is_type_registered(&self, type_name: &str) -> bool {
        self.shared.types.contains_key(type_name)
    }

    /// Create a topic, or return the existing one with the same type.
    ///
    /// # Errors
    ///
    /// - [`ParticipantError::TypeNotRegistered`] if `type_name` is unknown
    /// - [`ParticipantError::TopicTypeConflict`] if the topic exists with another type
    pub fn create_topic(&self, topic_name: &str, type_name: &str) -> Result<Topic> {
        let data_type = self
            .shared
            .types
            .get(type_name)
            .map(|d| d.clone())
            .ok_or_else(|| ParticipantError::TypeNotRegistered(type_name.to_string()))?;

        match self.shared.topics.entry(topic_name.to_string()) {
            Entry::Occupied(o) => {
                let existing = o.get();
                if existing.data_type.name() != type_name {
                    return Err(ParticipantError::TopicTypeConflict {
                        topic: topic_name.to_string(),
                        existing: existing.data_type.name().to_string(),
                        requested: type_name.to_string(),
                    });
                }
                Ok(Topic {
                    entry: Arc::clone(existing),
                })
            }
            Entry::Vacant(v) => {
                let entry = Arc::new(TopicEntry {
                    name: Arc::from(topic_name),
                    data_type,
                    subscribers: RwLock::new(Vec::new()),
                    sequence: AtomicU64::new(0),
                });
                v.insert(Arc::clone(&entry));
                log::debug!("[Participant] Created topic '{}' ({})", topic_name, type_name);
                Ok(Topic { entry })
            }
        }
    }

    /// Names of all topics.
    pub fn topic_names(&self) -> Vec<String> {
        self.shared.topics.iter().map(|e| e.key().clone()).collect()
    }

    /// Deliver every frame received on `topic` to `sink`.
    pub fn subscribe<F>(&self, topic: &Topic, sink: F) -> SubscriptionId
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        topic.entry.subscribers.write().push((id, Arc::new(sink)));
        id
    }

    /// Remove a subscription. Returns `false` if unknown.
    pub fn unsubscribe(&self, topic: &Topic, id: SubscriptionId) -> bool {
        let mut subs = topic.entry.subscribers.write();
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        subs.len() != before
    }

    /// Send `payload` on `topic`. Returns the frame sequence number.
    ///
    /// # Errors
    ///
    /// - [`ParticipantError::Closed`] after [`close`](Self::close)
    /// - [`ParticipantError::PayloadTooLarge`] if the frame exceeds `max_datagram_size`
    /// - [`ParticipantError::Io`] if a send fails
    pub fn publish(&self, topic: &Topic, payload: &[u8]) -> Result<u64> {
        if !self.is_running() {
            return Err(ParticipantError::Closed);
        }
        let size = wire::frame_len(topic.name(), payload.len());
        let capacity = self.shared.profile.max_datagram_size;
        if size > capacity {
            return Err(ParticipantError::PayloadTooLarge { size, capacity });
        }

        let sequence = topic.entry.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let mut buf = self.send_buf.lock();
        wire::encode(
            &mut buf,
            self.shared.profile.domain_id,
            topic.data_type().type_id(),
            sequence,
            topic.name(),
            payload,
        );
        for dest in &self.destinations {
            self.socket.send_to(&buf, dest)?;
        }
        Ok(sequence)
    }

    /// Frames dispatched to at least the topic table.
    pub fn frames_received(&self) -> u64 {
        self.shared.frames_received.load(Ordering::Relaxed)
    }

    /// Frames dropped (foreign, malformed, unknown topic or type mismatch).
    pub fn frames_dropped(&self) -> u64 {
        self.shared.frames_dropped.load(Ordering::Relaxed)
    }

    /// Stop the receive thread and clear topic subscriptions. Idempotent.
    pub fn close(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.recv_thread.lock().take() {
            if handle.join().is_err() {
                log::error!("[Participant] receive thread panicked");
            }
        }
        self.shared.topics.clear();
        log::info!("[Participant] '{}' closed", self.shared.profile.name);
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("name", &self.shared.profile.name)
            .field("domain_id", &self.shared.profile.domain_id)
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Destination for self-addressed frames when bound to a wildcard address.
fn loopback_of(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

fn receive_loop(shared: &Shared, socket: &UdpSocket) {
    let mut buf = vec![0u8; shared.profile.max_datagram_size.max(wire::HEADER_LEN)];
    log::debug!("[Participant] receive thread started");

    while shared.running.load(Ordering::Acquire) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("[Participant] recv_from failed: {}", e);
                continue;
            }
        };

        let frame = match wire::decode(&buf[..len], shared.profile.domain_id) {
            Ok(frame) => frame,
            Err(e) => {
                shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("[Participant] dropped datagram from {}: {}", from, e);
                continue;
            }
        };

        let Some(entry) = shared.topics.get(frame.topic).map(|e| Arc::clone(e.value())) else {
            shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        };
        if entry.data_type.type_id() != frame.type_id {
            shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "[Participant] type mismatch on topic '{}' from {} (seq {})",
                frame.topic,
                from,
                frame.sequence
            );
            continue;
        }

        shared.frames_received.fetch_add(1, Ordering::Relaxed);
        let sinks: Vec<Sink> = entry
            .subscribers
            .read()
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for sink in sinks {
            sink(frame.payload);
        }
    }

    log::debug!("[Participant] receive thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn participant(domain: u16) -> Arc<Participant> {
        Participant::new(ParticipantProfile {
            domain_id: domain,
            recv_timeout_ms: 10,
            ..ParticipantProfile::default()
        })
        .expect("participant binds on loopback")
    }

    #[test]
    fn test_register_type_idempotent() {
        let p = participant(0);
        assert!(p.register_type(TypeDescriptor::new("Long")));
        assert!(!p.register_type(TypeDescriptor::new("Long")));
        assert!(p.unregister_type("Long"));
        assert!(!p.unregister_type("Long"));
    }

    #[test]
    fn test_create_topic_requires_registered_type() {
        let p = participant(0);
        assert!(matches!(
            p.create_topic("t", "Long"),
            Err(ParticipantError::TypeNotRegistered(_))
        ));

        p.register_type(TypeDescriptor::new("Long"));
        p.register_type(TypeDescriptor::new("Double"));
        let a = p.create_topic("t", "Long").expect("created");
        let b = p.create_topic("t", "Long").expect("existing returned");
        assert_eq!(a.name(), b.name());
        assert!(matches!(
            p.create_topic("t", "Double"),
            Err(ParticipantError::TopicTypeConflict { .. })
        ));
    }

    #[test]
    fn test_loopback_publish_subscribe() {
        let p = participant(5);
        p.register_type(TypeDescriptor::new("OctetSeq"));
        let topic = p.create_topic("loop", "OctetSeq").expect("created");

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        p.subscribe(&topic, move |payload| {
            let _ = tx.lock().send(payload.to_vec());
        });

        assert_eq!(p.publish(&topic, b"abc").expect("sent"), 1);
        let got = rx.recv_timeout(Duration::from_secs(2)).expect("frame looped back");
        assert_eq!(got, b"abc");
        assert!(p.frames_received() >= 1);
    }

    #[test]
    fn test_peers_and_self_both_receive() {
        let remote = participant(7);
        remote.register_type(TypeDescriptor::new("Long"));
        let remote_topic = remote.create_topic("shared", "Long").expect("created");
        let (remote_tx, remote_rx) = mpsc::channel();
        let remote_tx = Mutex::new(remote_tx);
        remote.subscribe(&remote_topic, move |payload| {
            let _ = remote_tx.lock().send(payload.to_vec());
        });

        let local = Participant::new(ParticipantProfile {
            domain_id: 7,
            recv_timeout_ms: 10,
            peers: vec![remote.local_addr().to_string()],
            ..ParticipantProfile::default()
        })
        .expect("participant binds on loopback");
        local.register_type(TypeDescriptor::new("Long"));
        let topic = local.create_topic("shared", "Long").expect("created");
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        local.subscribe(&topic, move |payload| {
            let _ = tx.lock().send(payload.to_vec());
        });

        local.publish(&topic, &[1, 0, 0, 0]).expect("sent");
        let own = rx.recv_timeout(Duration::from_secs(2)).expect("own subscriber");
        let peer = remote_rx.recv_timeout(Duration::from_secs(2)).expect("peer subscriber");
        assert_eq!(own, peer);
    }

    #[test]
    fn test_foreign_domain_dropped() {
        let receiver = participant(1);
        receiver.register_type(TypeDescriptor::new("Long"));
        let topic = receiver.create_topic("t", "Long").expect("created");
        let (tx, rx) = mpsc::channel::<()>();
        let tx = Mutex::new(tx);
        receiver.subscribe(&topic, move |_| {
            let _ = tx.lock().send(());
        });

        let sender = Participant::new(ParticipantProfile {
            domain_id: 2,
            peers: vec![receiver.local_addr().to_string()],
            ..ParticipantProfile::default()
        })
        .expect("sender binds");
        sender.register_type(TypeDescriptor::new("Long"));
        let out = sender.create_topic("t", "Long").expect("created");
        sender.publish(&out, &[0, 0, 0, 0]).expect("sent");

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_payload_too_large() {
        let p = Participant::new(ParticipantProfile {
            max_datagram_size: 64,
            ..ParticipantProfile::default()
        })
        .expect("binds");
        p.register_type(TypeDescriptor::new("OctetSeq"));
        let topic = p.create_topic("big", "OctetSeq").expect("created");
        assert!(matches!(
            p.publish(&topic, &[0u8; 64]),
            Err(ParticipantError::PayloadTooLarge { capacity: 64, .. })
        ));
    }

    #[test]
    fn test_publish_after_close() {
        let p = participant(0);
        p.register_type(TypeDescriptor::new("Long"));
        let topic = p.create_topic("t", "Long").expect("created");
        p.close();
        p.close();
        assert!(matches!(p.publish(&topic, &[1]), Err(ParticipantError::Closed)));
    }

    #[test]
    fn test_unsubscribe() {
        let p = participant(0);
        p.register_type(TypeDescriptor::new("Long"));
        let topic = p.create_topic("t", "Long").expect("created");
        let id = p.subscribe(&topic, |_| {});
        assert_eq!(topic.subscriber_count(), 1);
        assert!(p.unsubscribe(&topic, id));
        assert!(!p.unsubscribe(&topic, id));
    }
}
