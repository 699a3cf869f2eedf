// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed ports.
//!
//! An [`OutPort`] owns the connectors it produces into; an [`InPort`] keeps a
//! link `(connector, consumer id)` for every connector feeding it. Ports are
//! plain values owned by a component, so `write`/`read` take `&self` and are
//! safe to call from the context thread while control code connects or
//! disconnects.

mod data;

pub use data::{DecodeError, PortData, Timed, Timestamp};

use crate::config::{ConfigEvent, ConfigSetRegistry, ListenerId};
use crate::connector::{
    Connector, ConnectorError, ConnectorId, ConnectorProfile, ConnectorState, ConsumerId, Result,
};
use crate::transport::TransportContext;
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Port direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    In,
    Out,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => f.write_str("in"),
            Self::Out => f.write_str("out"),
        }
    }
}

/// Name, direction and element type tag of a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortProfile {
    pub name: String,
    pub direction: PortDirection,
    pub type_tag: String,
}

impl PortProfile {
    /// Profile whose type tag is `T::type_name()`.
    pub fn new<T: PortData>(name: impl Into<String>, direction: PortDirection) -> Self {
        Self::with_type_tag(name, direction, T::type_name())
    }

    /// Profile with an explicit type tag.
    pub fn with_type_tag(
        name: impl Into<String>,
        direction: PortDirection,
        type_tag: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            type_tag: type_tag.into(),
        }
    }
}

// =======================================================================
// OutPort
// =======================================================================

/// Producing port.
pub struct OutPort<T: PortData> {
    profile: PortProfile,
    connectors: RwLock<Vec<Arc<Connector<T>>>>,
    default_profile: ArcSwap<ConnectorProfile>,
}

impl<T: PortData> OutPort<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_profile(PortProfile::new::<T>(name, PortDirection::Out))
    }

    /// Port advertising `type_tag` instead of `T::type_name()`.
    pub fn with_type_tag(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self::from_profile(PortProfile::with_type_tag(name, PortDirection::Out, type_tag))
    }

    fn from_profile(profile: PortProfile) -> Self {
        let default_profile = ConnectorProfile::local(profile.name.clone());
        Self {
            profile,
            connectors: RwLock::new(Vec::new()),
            default_profile: ArcSwap::from_pointee(default_profile),
        }
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn profile(&self) -> &PortProfile {
        &self.profile
    }

    /// Connect this port to `consumers` through a new connector.
    ///
    /// Consumer `i` reads through `ConsumerId(i)` of the returned connector.
    pub fn connect(
        &self,
        consumers: &[&InPort<T>],
        profile: &ConnectorProfile,
        context: &TransportContext,
    ) -> Result<Arc<Connector<T>>> {
        let consumer_profiles: Vec<PortProfile> =
            consumers.iter().map(|p| p.profile.clone()).collect();
        let connector = Connector::connect(&self.profile, &consumer_profiles, profile, context)?;

        for (idx, port) in consumers.iter().enumerate() {
            port.link(Arc::clone(&connector), ConsumerId(idx));
        }
        self.connectors.write().push(Arc::clone(&connector));
        Ok(connector)
    }

    /// Connect with the port's current default profile (see [`follow`](Self::follow)).
    pub fn connect_default(
        &self,
        consumers: &[&InPort<T>],
        context: &TransportContext,
    ) -> Result<Arc<Connector<T>>> {
        let profile = self.default_profile.load_full();
        self.connect(consumers, &profile, context)
    }

    pub fn default_profile(&self) -> Arc<ConnectorProfile> {
        self.default_profile.load_full()
    }

    pub fn set_default_profile(&self, profile: ConnectorProfile) {
        self.default_profile.store(Arc::new(profile));
    }

    /// Write to every connector.
    ///
    /// Disconnected connectors are dropped from the port. With no connector
    /// the write is a no-op; if every connector is disconnected the result is
    /// `Disconnected`. Otherwise the first failure is returned after all
    /// connectors were tried.
    pub fn write(&self, value: &T) -> Result<()> {
        let connectors = self.connectors.read().clone();
        if connectors.is_empty() {
            return Ok(());
        }

        let mut first_err = None;
        let mut disconnected = 0usize;
        for connector in &connectors {
            match connector.write(value) {
                Ok(()) => {}
                Err(ConnectorError::Disconnected) => disconnected += 1,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        if disconnected > 0 {
            self.connectors
                .write()
                .retain(|c| c.state() != ConnectorState::Disconnected);
            if disconnected == connectors.len() {
                return Err(ConnectorError::Disconnected);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn connector_ids(&self) -> Vec<ConnectorId> {
        self.connectors.read().iter().map(|c| c.id()).collect()
    }

    pub fn connector(&self, id: ConnectorId) -> Option<Arc<Connector<T>>> {
        self.connectors.read().iter().find(|c| c.id() == id).cloned()
    }

    /// Disconnect and forget one connector. Returns `false` if unknown.
    pub fn disconnect(&self, id: ConnectorId) -> bool {
        let removed = {
            let mut connectors = self.connectors.write();
            connectors
                .iter()
                .position(|c| c.id() == id)
                .map(|idx| connectors.remove(idx))
        };
        match removed {
            Some(connector) => {
                connector.disconnect();
                true
            }
            None => false,
        }
    }

    pub fn disconnect_all(&self) {
        let connectors = std::mem::take(&mut *self.connectors.write());
        for connector in connectors {
            connector.disconnect();
        }
    }

    /// Track the registry's active set: every activation rebuilds the default
    /// connector profile from its `dataport.*` keys.
    ///
    /// The active set at call time, if any, is applied immediately. The
    /// listener holds a weak reference and goes quiet once the port is
    /// dropped.
    pub fn follow(self: &Arc<Self>, registry: &ConfigSetRegistry) -> ListenerId {
        if let Ok(active) = registry.get_active() {
            self.apply_set(&active);
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        registry.add_listener(move |event| {
            if let ConfigEvent::Activated(set) = event {
                if let Some(port) = weak.upgrade() {
                    port.apply_set(set);
                }
            }
        })
    }

    fn apply_set(&self, set: &crate::config::ConfigSet) {
        match ConnectorProfile::from_config_set(self.profile.name.clone(), set) {
            Ok(profile) => {
                log::debug!(
                    "[Connector] port '{}' default profile from set '{}' ({})",
                    self.profile.name,
                    set.id(),
                    profile.kind
                );
                self.default_profile.store(Arc::new(profile));
            }
            Err(e) => log::warn!(
                "[Connector] port '{}' ignoring set '{}': {}",
                self.profile.name,
                set.id(),
                e
            ),
        }
    }
}

impl<T: PortData> fmt::Debug for OutPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutPort")
            .field("profile", &self.profile)
            .field("connectors", &self.connectors.read().len())
            .finish()
    }
}

// =======================================================================
// InPort
// =======================================================================

/// Consuming port.
pub struct InPort<T: PortData> {
    profile: PortProfile,
    links: RwLock<Vec<(Arc<Connector<T>>, ConsumerId)>>,
}

impl<T: PortData> InPort<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            profile: PortProfile::new::<T>(name, PortDirection::In),
            links: RwLock::new(Vec::new()),
        }
    }

    /// Port advertising `type_tag` instead of `T::type_name()`.
    pub fn with_type_tag(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            profile: PortProfile::with_type_tag(name, PortDirection::In, type_tag),
            links: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn profile(&self) -> &PortProfile {
        &self.profile
    }

    fn link(&self, connector: Arc<Connector<T>>, consumer: ConsumerId) {
        let mut links = self.links.write();
        links.retain(|(c, _)| c.state() != ConnectorState::Disconnected);
        links.push((connector, consumer));
    }

    fn live_links(&self) -> Vec<(Arc<Connector<T>>, ConsumerId)> {
        self.links
            .read()
            .iter()
            .filter(|(c, _)| c.state() != ConnectorState::Disconnected)
            .cloned()
            .collect()
    }

    /// Read one element.
    ///
    /// Buffered data from any connector is returned first (in link order);
    /// otherwise the empty policy of the first connector decides.
    pub fn read(&self) -> Result<T> {
        self.read_with(None)
    }

    /// Like [`read`](Self::read), bounding a block-reader wait by `timeout`.
    pub fn read_timeout(&self, timeout: Duration) -> Result<T> {
        self.read_with(Some(timeout))
    }

    fn read_with(&self, timeout: Option<Duration>) -> Result<T> {
        let links = self.live_links();
        let Some((first, first_id)) = links.first() else {
            return Err(ConnectorError::Disconnected);
        };
        for (connector, consumer) in &links {
            if let Some(value) = connector.try_read(*consumer) {
                return Ok(value);
            }
        }
        first.read(*first_id, timeout)
    }

    /// True if any live connector has buffered data for this port.
    pub fn is_new(&self) -> bool {
        self.live_links()
            .iter()
            .any(|(c, consumer)| c.has_data(*consumer))
    }

    pub fn connector_ids(&self) -> Vec<ConnectorId> {
        self.live_links().iter().map(|(c, _)| c.id()).collect()
    }

    /// Disconnect every connector feeding this port.
    pub fn disconnect_all(&self) {
        let links = std::mem::take(&mut *self.links.write());
        for (connector, _) in links {
            connector.disconnect();
        }
    }
}

impl<T: PortData> fmt::Debug for InPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InPort")
            .field("profile", &self.profile)
            .field("links", &self.links.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferConfig, EmptyPolicy, FullPolicy};
    use crate::config::{keys, ConfigSet};
    use crate::transport::TransportKind;

    fn ctx() -> TransportContext {
        TransportContext::local()
    }

    #[test]
    fn test_write_read_local() {
        let out = OutPort::<String>::new("text");
        let a = InPort::<String>::new("a");
        let b = InPort::<String>::new("b");
        out.connect(&[&a, &b], &ConnectorProfile::local("ab"), &ctx())
            .expect("connect");

        out.write(&"hi".to_string()).expect("write");
        assert!(a.is_new());
        assert_eq!(a.read().as_deref(), Ok("hi"));
        assert_eq!(b.read().as_deref(), Ok("hi"));
        assert!(!a.is_new());
    }

    #[test]
    fn test_write_without_connectors_is_noop() {
        let out = OutPort::<u8>::new("lonely");
        assert_eq!(out.write(&1), Ok(()));

        let input = InPort::<u8>::new("unlinked");
        assert_eq!(input.read(), Err(ConnectorError::Disconnected));
    }

    #[test]
    fn test_read_timeout_without_bound() {
        let out = Arc::new(OutPort::<u32>::new("late"));
        let input = InPort::<u32>::new("late_in");
        let profile = ConnectorProfile::local("late")
            .with_buffer(BufferConfig::default().empty_policy(EmptyPolicy::BlockReader));
        out.connect(&[&input], &profile, &ctx()).expect("connect");

        let writer = {
            let out = Arc::clone(&out);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                out.write(&9)
            })
        };
        assert_eq!(input.read_timeout(Duration::MAX), Ok(9));
        assert_eq!(writer.join().expect("writer thread"), Ok(()));
    }

    #[test]
    fn test_type_tag_mismatch() {
        let out = OutPort::<i32>::new("out");
        let input = InPort::<i32>::with_type_tag("in", "Double");
        let result = out.connect(&[&input], &ConnectorProfile::local("x"), &ctx());
        assert!(matches!(result, Err(ConnectorError::TypeMismatch { .. })));
        assert!(out.connector_ids().is_empty());
    }

    #[test]
    fn test_readback_after_drain() {
        let out = OutPort::<i32>::new("out");
        let input = InPort::<i32>::new("in");
        out.connect(&[&input], &ConnectorProfile::local("x"), &ctx())
            .expect("connect");

        assert_eq!(input.read(), Err(ConnectorError::Empty));
        out.write(&5).expect("write");
        assert_eq!(input.read(), Ok(5));
        assert_eq!(input.read(), Ok(5));
    }

    #[test]
    fn test_reads_from_any_feeding_connector() {
        let first = OutPort::<i32>::new("first");
        let second = OutPort::<i32>::new("second");
        let input = InPort::<i32>::new("in");
        let profile = ConnectorProfile::local("x")
            .with_buffer(BufferConfig::default().empty_policy(EmptyPolicy::Error));
        first.connect(&[&input], &profile, &ctx()).expect("connect");
        second.connect(&[&input], &profile, &ctx()).expect("connect");

        second.write(&2).expect("write");
        assert_eq!(input.read(), Ok(2));
        assert_eq!(input.read(), Err(ConnectorError::Empty));
        assert_eq!(input.connector_ids().len(), 2);
    }

    #[test]
    fn test_first_error_reported_after_all_connectors() {
        let out = OutPort::<i32>::new("out");
        let strict = InPort::<i32>::new("strict");
        let lenient = InPort::<i32>::new("lenient");
        let reject = ConnectorProfile::local("reject")
            .with_buffer(BufferConfig::with_capacity(1).full_policy(FullPolicy::RejectNew));
        out.connect(&[&strict], &reject, &ctx()).expect("connect");
        out.connect(&[&lenient], &ConnectorProfile::local("ok"), &ctx())
            .expect("connect");

        out.write(&1).expect("room");
        assert_eq!(out.write(&2), Err(ConnectorError::BufferFull));
        // Second connector still received the sample
        assert_eq!(lenient.read(), Ok(1));
        assert_eq!(lenient.read(), Ok(2));
        assert_eq!(strict.read(), Ok(1));
    }

    #[test]
    fn test_disconnect_prunes() {
        let out = OutPort::<i32>::new("out");
        let input = InPort::<i32>::new("in");
        let conn = out
            .connect(&[&input], &ConnectorProfile::local("x"), &ctx())
            .expect("connect");

        assert!(out.disconnect(conn.id()));
        assert!(!out.disconnect(conn.id()));
        assert!(out.connector_ids().is_empty());
        assert!(input.connector_ids().is_empty());
        assert_eq!(input.read(), Err(ConnectorError::Disconnected));
    }

    #[test]
    fn test_write_reports_all_disconnected() {
        let out = OutPort::<i32>::new("out");
        let input = InPort::<i32>::new("in");
        out.connect(&[&input], &ConnectorProfile::local("x"), &ctx())
            .expect("connect");

        input.disconnect_all();
        assert_eq!(out.write(&1), Err(ConnectorError::Disconnected));
        assert!(out.connector_ids().is_empty());
        assert_eq!(out.write(&1), Ok(()));
    }

    #[test]
    fn test_follow_registry_activation() {
        let registry = ConfigSetRegistry::new();
        let mut set = ConfigSet::new("shm");
        set.set(keys::INTERFACE_TYPE, "shared_memory");
        set.set(keys::BUFFER_LENGTH, "3");
        registry.add(set).expect("add");

        let out = Arc::new(OutPort::<i32>::new("out"));
        out.follow(&registry);
        assert_eq!(out.default_profile().kind, TransportKind::Local);

        registry.activate("shm").expect("activate");
        let profile = out.default_profile();
        assert_eq!(profile.kind, TransportKind::SharedMemory);
        assert_eq!(profile.buffer.capacity, 3);
        assert_eq!(profile.name, "out");
    }
}
