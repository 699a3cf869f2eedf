// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Buffer policies and their configuration-set bindings.

use crate::config::{keys, values, ConfigError, ConfigSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default buffer length (elements per consumer).
pub const DEFAULT_BUFFER_LENGTH: usize = 8;

/// Default timeout for blocking reads and writes.
pub const DEFAULT_BUFFER_TIMEOUT: Duration = Duration::from_secs(1);

/// Behavior of a write on a full buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FullPolicy {
    /// Drop the logically oldest element; the write always succeeds.
    #[default]
    OverwriteOldest,
    /// Refuse the write with `BufferFull`, leaving contents unchanged.
    RejectNew,
    /// Wait for room, up to the configured write timeout.
    BlockWriter,
}

/// Behavior of a read on an empty buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyPolicy {
    /// Return the element returned by the previous successful read.
    #[default]
    ReturnLast,
    /// Wait for data, up to the caller-supplied or configured read timeout.
    BlockReader,
    /// Report `Empty` immediately.
    Error,
}

impl FromStr for FullPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" | "overwrite_oldest" | "overwrite-oldest" => Ok(Self::OverwriteOldest),
            "do_nothing" | "reject" | "reject_new" | "reject-new" => Ok(Self::RejectNew),
            "block" | "block_writer" | "block-writer" => Ok(Self::BlockWriter),
            other => Err(ConfigError::InvalidValue {
                key: keys::BUFFER_WRITE_FULL_POLICY.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for EmptyPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "readback" | "return_last" | "return-last" => Ok(Self::ReturnLast),
            "block" | "block_reader" | "block-reader" => Ok(Self::BlockReader),
            "do_nothing" | "error" => Ok(Self::Error),
            other => Err(ConfigError::InvalidValue {
                key: keys::BUFFER_READ_EMPTY_POLICY.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for FullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OverwriteOldest => "overwrite",
            Self::RejectNew => "do_nothing",
            Self::BlockWriter => "block",
        })
    }
}

impl fmt::Display for EmptyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReturnLast => "readback",
            Self::BlockReader => "block",
            Self::Error => "do_nothing",
        })
    }
}

/// Buffer configuration applied to every consumer of a connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Maximum number of elements held (>= 1).
    pub capacity: usize,
    /// Policy when writing into a full buffer.
    pub full_policy: FullPolicy,
    /// Policy when reading from an empty buffer.
    pub empty_policy: EmptyPolicy,
    /// Deadline for [`FullPolicy::BlockWriter`].
    pub write_timeout: Duration,
    /// Default deadline for [`EmptyPolicy::BlockReader`].
    pub read_timeout: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_LENGTH,
            full_policy: FullPolicy::default(),
            empty_policy: EmptyPolicy::default(),
            write_timeout: DEFAULT_BUFFER_TIMEOUT,
            read_timeout: DEFAULT_BUFFER_TIMEOUT,
        }
    }
}

impl BufferConfig {
    /// Buffer of `capacity` elements with default policies.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Set the full policy.
    #[must_use]
    pub fn full_policy(mut self, policy: FullPolicy) -> Self {
        self.full_policy = policy;
        self
    }

    /// Set the empty policy.
    #[must_use]
    pub fn empty_policy(mut self, policy: EmptyPolicy) -> Self {
        self.empty_policy = policy;
        self
    }

    /// Set the blocking write deadline.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the default blocking read deadline.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Build from the `dataport.buffer.*` keys of a configuration set.
    ///
    /// Missing keys keep their default value.
    pub fn from_config_set(set: &ConfigSet) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = set.get(keys::BUFFER_LENGTH) {
            cfg.capacity = values::parse_size(v).ok_or_else(|| ConfigError::InvalidValue {
                key: keys::BUFFER_LENGTH.to_string(),
                value: v.to_string(),
            })?;
        }
        if let Some(v) = set.get(keys::BUFFER_WRITE_FULL_POLICY) {
            cfg.full_policy = v.parse()?;
        }
        if let Some(v) = set.get(keys::BUFFER_READ_EMPTY_POLICY) {
            cfg.empty_policy = v.parse()?;
        }
        if let Some(v) = set.get(keys::BUFFER_WRITE_TIMEOUT) {
            cfg.write_timeout = values::parse_seconds(v).ok_or_else(|| {
                ConfigError::InvalidValue {
                    key: keys::BUFFER_WRITE_TIMEOUT.to_string(),
                    value: v.to_string(),
                }
            })?;
        }
        if let Some(v) = set.get(keys::BUFFER_READ_TIMEOUT) {
            cfg.read_timeout = values::parse_seconds(v).ok_or_else(|| {
                ConfigError::InvalidValue {
                    key: keys::BUFFER_READ_TIMEOUT.to_string(),
                    value: v.to_string(),
                }
            })?;
        }

        if cfg.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: keys::BUFFER_LENGTH.to_string(),
                value: "0".to_string(),
            });
        }
        Ok(cfg)
    }
}
