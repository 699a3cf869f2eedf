// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YAML participant profile.
//!
//! # Example YAML
//!
//! ```yaml
//! # participant.yaml
//! name: sensor_node
//! domain_id: 3
//! bind_address: "0.0.0.0:7600"
//! peers:
//!   - "192.168.1.20:7600"
//!   - "192.168.1.21:7600"
//! recv_timeout_ms: 50
//! max_datagram_size: 65000
//! ```
//!
//! Every field is optional.

use super::{ParticipantError, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Upper bound for a UDP payload over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Participant settings, loaded once at participant creation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ParticipantProfile {
    /// Participant name (diagnostics only).
    pub name: String,
    /// Frames from other domains are dropped.
    pub domain_id: u16,
    /// Local UDP bind address.
    pub bind_address: String,
    /// Destinations for published frames besides this participant, which
    /// always receives its own publishes.
    pub peers: Vec<String>,
    /// Receive thread poll interval.
    pub recv_timeout_ms: u64,
    /// Largest frame sent or accepted.
    pub max_datagram_size: usize,
}

impl Default for ParticipantProfile {
    fn default() -> Self {
        Self {
            name: "rtlink_participant".to_string(),
            domain_id: 0,
            bind_address: "127.0.0.1:0".to_string(),
            peers: Vec::new(),
            recv_timeout_ms: 50,
            max_datagram_size: 65_000,
        }
    }
}

impl ParticipantProfile {
    /// Load a profile from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ParticipantError::Profile(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::parse_yaml(&content)
    }

    /// Parse a profile from a YAML string and validate it.
    pub fn parse_yaml(content: &str) -> Result<Self> {
        let profile: Self = serde_yaml::from_str(content)
            .map_err(|e| ParticipantError::Profile(format!("YAML parse error: {}", e)))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Check addresses and sizes.
    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;
        self.peer_addrs()?;
        if self.max_datagram_size == 0 || self.max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(ParticipantError::Profile(format!(
                "max_datagram_size {} outside 1..={}",
                self.max_datagram_size, MAX_UDP_PAYLOAD
            )));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind_address.parse().map_err(|_| {
            ParticipantError::Profile(format!("invalid bind_address '{}'", self.bind_address))
        })
    }

    pub fn peer_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.peers
            .iter()
            .map(|p| {
                p.parse()
                    .map_err(|_| ParticipantError::Profile(format!("invalid peer '{}'", p)))
            })
            .collect()
    }

    /// Receive poll interval (at least 1 ms).
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms.max(1))
    }
}
