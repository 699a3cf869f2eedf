// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network participant manager.
//!
//! The manager owns at most one [`Participant`] per process and is shared by
//! `Arc` with every network connector (through
//! [`TransportContext`](crate::TransportContext)) instead of living in a hidden
//! global.
//!
//! # Lifecycle
//!
//! 1. [`ParticipantManager::init`] creates the participant on first use,
//!    optionally from a profile; later calls return the existing participant
//!    and ignore the profile
//! 2. connectors register types and create topics on it
//! 3. [`ParticipantManager::shutdown`] closes and clears it (no-op if never
//!    initialized)
//!
//! # Thread Safety
//!
//! A single `parking_lot::Mutex` guards creation and shutdown. The participant
//! itself is internally synchronized (`DashMap` tables, receive thread).

mod profile;
mod runtime;
mod types;
pub mod wire;

pub use profile::{ParticipantProfile, MAX_UDP_PAYLOAD};
pub use runtime::{Participant, Sink, SubscriptionId, Topic};
pub use types::{TypeDescriptor, TypeId};

use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Errors from the participant and its manager.
#[derive(Debug)]
pub enum ParticipantError {
    /// Socket or thread creation failed.
    Io(io::Error),
    /// Profile could not be read, parsed or validated.
    Profile(String),
    /// Operation requires an initialized participant.
    NotInitialized,
    /// Topic created with a type that is not registered.
    TypeNotRegistered(String),
    /// Topic already exists with a different type.
    TopicTypeConflict {
        topic: String,
        existing: String,
        requested: String,
    },
    /// Encoded frame exceeds `max_datagram_size`.
    PayloadTooLarge { size: usize, capacity: usize },
    /// Participant was shut down.
    Closed,
}

impl fmt::Display for ParticipantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Participant I/O error: {}", e),
            Self::Profile(msg) => write!(f, "Invalid participant profile: {}", msg),
            Self::NotInitialized => write!(f, "Participant not initialized"),
            Self::TypeNotRegistered(name) => write!(f, "Type '{}' is not registered", name),
            Self::TopicTypeConflict {
                topic,
                existing,
                requested,
            } => write!(
                f,
                "Topic '{}' already exists with type '{}' (requested '{}')",
                topic, existing, requested
            ),
            Self::PayloadTooLarge { size, capacity } => write!(
                f,
                "Frame of {} bytes exceeds max datagram size {}",
                size, capacity
            ),
            Self::Closed => write!(f, "Participant closed"),
        }
    }
}

impl std::error::Error for ParticipantError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ParticipantError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Result type for participant operations.
pub type Result<T> = std::result::Result<T, ParticipantError>;

/// Process-wide owner of the network participant.
#[derive(Default)]
pub struct ParticipantManager {
    participant: Mutex<Option<Arc<Participant>>>,
    default_profile: Option<ParticipantProfile>,
}

impl ParticipantManager {
    /// Manager creating participants from the default profile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager whose lazily created participant uses `profile`.
    pub fn with_profile(profile: ParticipantProfile) -> Self {
        Self {
            participant: Mutex::new(None),
            default_profile: Some(profile),
        }
    }

    /// Create the participant if absent and return it.
    ///
    /// `profile` is only used when the participant is created by this call.
    ///
    /// # Errors
    ///
    /// Participant creation failure (socket bind, thread spawn, invalid
    /// profile) is returned to the caller and leaves the manager empty.
    pub fn init(&self, profile: Option<&ParticipantProfile>) -> Result<Arc<Participant>> {
        let mut slot = self.participant.lock();
        if let Some(existing) = slot.as_ref() {
            if profile.is_some() {
                log::debug!(
                    "[Participant] init: participant '{}' exists, profile ignored",
                    existing.name()
                );
            }
            return Ok(Arc::clone(existing));
        }

        let profile = profile
            .or(self.default_profile.as_ref())
            .cloned()
            .unwrap_or_default();
        let participant = Participant::new(profile)?;
        *slot = Some(Arc::clone(&participant));
        Ok(participant)
    }

    /// Like [`init`](Self::init), loading the profile from a YAML file only if
    /// the participant does not exist yet.
    pub fn init_from_file(&self, path: impl AsRef<Path>) -> Result<Arc<Participant>> {
        if let Some(existing) = self.participant() {
            return Ok(existing);
        }
        let profile = ParticipantProfile::load_from_file(path)?;
        self.init(Some(&profile))
    }

    /// Existing participant, or a new one from the default profile.
    pub fn get_or_init(&self) -> Result<Arc<Participant>> {
        self.init(None)
    }

    /// Existing participant, if any.
    pub fn participant(&self) -> Option<Arc<Participant>> {
        self.participant.lock().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.participant.lock().is_some()
    }

    /// Register a topic data type, creating the participant if needed.
    ///
    /// Registering an already registered type is a successful no-op.
    pub fn register_type(&self, descriptor: TypeDescriptor) -> Result<()> {
        let participant = self.get_or_init()?;
        participant.register_type(descriptor);
        Ok(())
    }

    /// Unregister a type. Returns `false` if it was not registered (or there
    /// is no participant).
    pub fn unregister_type(&self, type_name: &str) -> bool {
        self.participant()
            .is_some_and(|p| p.unregister_type(type_name))
    }

    /// Close and drop the participant. No-op if never initialized.
    pub fn shutdown(&self) {
        let taken = self.participant.lock().take();
        if let Some(participant) = taken {
            participant.close();
            log::info!("[Participant] manager shut down");
        }
    }
}

impl Drop for ParticipantManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ParticipantManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticipantManager")
            .field("participant", &self.participant.lock().as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}
