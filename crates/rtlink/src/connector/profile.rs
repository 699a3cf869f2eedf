// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connector profile: transport selection, buffer policy and properties.

use super::ConnectorError;
use crate::buffer::BufferConfig;
use crate::config::{keys, values, ConfigError, ConfigSet};
use crate::transport::shm::DEFAULT_MEMORY_SIZE;
use crate::transport::TransportKind;
use std::collections::BTreeMap;

/// Property: shared-memory segment size in bytes (size spelling accepted).
pub const PROP_MEMORY_SIZE: &str = "shm.memory_size";

/// Property: network topic name.
pub const PROP_TOPIC: &str = "topic";

/// Everything needed to create a connector besides the ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorProfile {
    /// Connector name (diagnostics).
    pub name: String,
    /// Transport selected at connect time.
    pub kind: TransportKind,
    /// Buffer configuration applied to every consumer.
    pub buffer: BufferConfig,
    properties: BTreeMap<String, String>,
}

impl ConnectorProfile {
    pub fn new(name: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            name: name.into(),
            kind,
            buffer: BufferConfig::default(),
            properties: BTreeMap::new(),
        }
    }

    /// In-process connector.
    pub fn local(name: impl Into<String>) -> Self {
        Self::new(name, TransportKind::Local)
    }

    /// Shared-memory connector with the default segment size.
    pub fn shared_memory(name: impl Into<String>) -> Self {
        Self::new(name, TransportKind::SharedMemory)
    }

    /// Network connector; the topic defaults to the producing port name.
    pub fn network(name: impl Into<String>) -> Self {
        Self::new(name, TransportKind::Network)
    }

    #[must_use]
    pub fn with_buffer(mut self, buffer: BufferConfig) -> Self {
        self.buffer = buffer;
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_memory_size(self, bytes: usize) -> Self {
        self.with_property(PROP_MEMORY_SIZE, bytes.to_string())
    }

    #[must_use]
    pub fn with_topic(self, topic: impl Into<String>) -> Self {
        self.with_property(PROP_TOPIC, topic)
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Shared-memory segment size (header included).
    pub fn memory_size(&self) -> Result<usize, ConnectorError> {
        match self.property(PROP_MEMORY_SIZE) {
            None => Ok(DEFAULT_MEMORY_SIZE),
            Some(v) => values::parse_size(v).ok_or_else(|| {
                ConnectorError::InvalidConfig(format!("{PROP_MEMORY_SIZE} = '{v}'"))
            }),
        }
    }

    /// Explicit network topic, if set.
    pub fn topic(&self) -> Option<&str> {
        self.property(PROP_TOPIC)
    }

    /// Build from the `dataport.*` keys of a configuration set.
    pub fn from_config_set(name: impl Into<String>, set: &ConfigSet) -> Result<Self, ConfigError> {
        let kind = match set.get(keys::INTERFACE_TYPE) {
            Some(v) => v.parse()?,
            None => TransportKind::default(),
        };
        let mut profile =
            Self::new(name, kind).with_buffer(BufferConfig::from_config_set(set)?);

        if let Some(v) = set.get(keys::SHM_MEMORY_SIZE) {
            let bytes = values::parse_size(v).ok_or_else(|| ConfigError::InvalidValue {
                key: keys::SHM_MEMORY_SIZE.to_string(),
                value: v.to_string(),
            })?;
            profile = profile.with_memory_size(bytes);
        }
        if let Some(topic) = set.get(keys::TOPIC).filter(|t| !t.trim().is_empty()) {
            profile = profile.with_topic(topic.trim());
        }
        Ok(profile)
    }
}

impl Default for ConnectorProfile {
    fn default() -> Self {
        Self::local("default")
    }
}
