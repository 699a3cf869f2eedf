// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Configuration sets and the configuration set registry.
//!
//! A [`ConfigSet`] is a named, ordered key -> string mapping. The
//! [`ConfigSetRegistry`] holds many sets, at most one of them active.
//!
//! # Architecture
//!
//! - **Snapshots**: the set list and the active set live together in one
//!   immutable snapshot behind an `ArcSwap`. Readers load the snapshot without
//!   locking and never observe a half-applied mutation.
//! - **Writers**: mutations are serialized by a single `parking_lot::Mutex`,
//!   build a new snapshot, then publish it with one atomic store.
//! - **Listeners**: called after publication, outside the writer lock, so a
//!   listener may read the registry freely.
//!
//! # Example
//!
//! ```
//! use rtlink::config::{keys, ConfigSet, ConfigSetRegistry};
//!
//! let registry = ConfigSetRegistry::new();
//! let mut fast = ConfigSet::new("fast");
//! fast.set(keys::EXEC_PERIODIC_RATE, "1000");
//! registry.add(fast).unwrap();
//! registry.activate("fast").unwrap();
//! assert_eq!(registry.get_active().unwrap().get(keys::EXEC_PERIODIC_RATE), Some("1000"));
//! ```

pub mod keys;
mod record;
pub mod values;

pub use record::parse_records;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// =======================================================================
// Errors
// =======================================================================

/// Errors returned by configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// Empty id, or an operation refused in the current registry state.
    InvalidParameter,
    /// No configuration set with this id.
    NotFound(String),
    /// No configuration set is active.
    NotAvailable,
    /// A configuration set with this id already exists.
    AlreadyExists(String),
    /// A well-known key holds a value that cannot be interpreted.
    InvalidValue { key: String, value: String },
    /// Malformed text record.
    Parse { line: usize, reason: String },
    /// Reading a record file failed.
    Io(io::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter => write!(f, "Invalid configuration parameter"),
            Self::NotFound(id) => write!(f, "Configuration set '{}' not found", id),
            Self::NotAvailable => write!(f, "No active configuration set"),
            Self::AlreadyExists(id) => write!(f, "Configuration set '{}' already exists", id),
            Self::InvalidValue { key, value } => {
                write!(f, "Invalid value '{}' for key '{}'", value, key)
            }
            Self::Parse { line, reason } => write!(f, "Record parse error at line {}: {}", line, reason),
            Self::Io(e) => write!(f, "Configuration I/O error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

// =======================================================================
// ConfigSet
// =======================================================================

/// Named, ordered key -> string mapping.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigSet {
    id: String,
    description: String,
    values: Vec<(String, String)>,
}

impl ConfigSet {
    /// Empty set with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            values: Vec::new(),
        }
    }

    /// Set built from ordered pairs. Later duplicates replace earlier values.
    pub fn from_pairs<I, K, V>(id: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut set = Self::new(id);
        for (k, v) in pairs {
            set.set(k, v);
        }
        set
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Value of `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Insert or replace `key`. A new key is appended; a replaced key keeps
    /// its position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.values.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.values.push((key, value)),
        }
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.values.iter().position(|(k, _)| k == key)?;
        Some(self.values.remove(pos).1)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn normalize(&mut self) {
        if let Some(ports) = self.get(keys::EXPORTED_PORTS) {
            let normalized = values::normalize_exported_ports(ports);
            self.set(keys::EXPORTED_PORTS, normalized);
        }
    }
}

// =======================================================================
// Registry
// =======================================================================

/// Registry event delivered to listeners.
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    /// A set was added.
    Added(Arc<ConfigSet>),
    /// A set was removed (id).
    Removed(String),
    /// The values of a set were replaced.
    Updated(Arc<ConfigSet>),
    /// A set became active (snapshot after the swap).
    Activated(Arc<ConfigSet>),
}

/// Listener registration handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&ConfigEvent) + Send + Sync>;

#[derive(Default)]
struct Snapshot {
    sets: Vec<Arc<ConfigSet>>,
    active: Option<Arc<ConfigSet>>,
}

impl Snapshot {
    fn position(&self, id: &str) -> Option<usize> {
        self.sets.iter().position(|s| s.id() == id)
    }

    fn is_active(&self, id: &str) -> bool {
        self.active.as_ref().is_some_and(|a| a.id() == id)
    }
}

/// Registry of configuration sets with one atomically swappable active set.
pub struct ConfigSetRegistry {
    snapshot: ArcSwap<Snapshot>,
    write_lock: Mutex<()>,
    /// Taken before `write_lock` is released and held while listeners run, so
    /// events reach listeners in swap order.
    notify_lock: Mutex<()>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl ConfigSetRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            write_lock: Mutex::new(()),
            notify_lock: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Add a new set.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidParameter`] if the id is empty
    /// - [`ConfigError::AlreadyExists`] if the id is taken
    pub fn add(&self, mut set: ConfigSet) -> Result<Arc<ConfigSet>> {
        if set.id().is_empty() {
            return Err(ConfigError::InvalidParameter);
        }
        set.normalize();
        let set = Arc::new(set);

        let _notify = {
            let _guard = self.write_lock.lock();
            let current = self.snapshot.load_full();
            if current.position(set.id()).is_some() {
                return Err(ConfigError::AlreadyExists(set.id().to_string()));
            }
            let mut sets = current.sets.clone();
            sets.push(Arc::clone(&set));
            self.snapshot.store(Arc::new(Snapshot {
                sets,
                active: current.active.clone(),
            }));
            self.notify_lock.lock()
        };

        log::debug!("[ConfigAdmin] Added configuration set '{}'", set.id());
        self.notify(&ConfigEvent::Added(Arc::clone(&set)));
        Ok(set)
    }

    /// Remove a set. The active set cannot be removed.
    pub fn remove(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(ConfigError::InvalidParameter);
        }

        let _notify = {
            let _guard = self.write_lock.lock();
            let current = self.snapshot.load_full();
            let pos = current
                .position(id)
                .ok_or_else(|| ConfigError::NotFound(id.to_string()))?;
            if current.is_active(id) {
                log::warn!("[ConfigAdmin] Refusing to remove active configuration set '{}'", id);
                return Err(ConfigError::InvalidParameter);
            }
            let mut sets = current.sets.clone();
            sets.remove(pos);
            self.snapshot.store(Arc::new(Snapshot {
                sets,
                active: current.active.clone(),
            }));
            self.notify_lock.lock()
        };

        log::debug!("[ConfigAdmin] Removed configuration set '{}'", id);
        self.notify(&ConfigEvent::Removed(id.to_string()));
        Ok(())
    }

    /// Set with the given id.
    pub fn get(&self, id: &str) -> Result<Arc<ConfigSet>> {
        if id.is_empty() {
            return Err(ConfigError::InvalidParameter);
        }
        let current = self.snapshot.load();
        current
            .position(id)
            .map(|pos| Arc::clone(&current.sets[pos]))
            .ok_or_else(|| ConfigError::NotFound(id.to_string()))
    }

    /// All sets, in insertion order.
    pub fn list(&self) -> Vec<Arc<ConfigSet>> {
        self.snapshot.load().sets.clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.snapshot.load().position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().sets.is_empty()
    }

    /// Make `id` the active set (atomic swap).
    pub fn activate(&self, id: &str) -> Result<Arc<ConfigSet>> {
        if id.is_empty() {
            return Err(ConfigError::InvalidParameter);
        }

        let (set, _notify) = {
            let _guard = self.write_lock.lock();
            let current = self.snapshot.load_full();
            let pos = current
                .position(id)
                .ok_or_else(|| ConfigError::NotFound(id.to_string()))?;
            let set = Arc::clone(&current.sets[pos]);
            self.snapshot.store(Arc::new(Snapshot {
                sets: current.sets.clone(),
                active: Some(Arc::clone(&set)),
            }));
            (set, self.notify_lock.lock())
        };

        log::info!("[ConfigAdmin] Activated configuration set '{}'", id);
        self.notify(&ConfigEvent::Activated(Arc::clone(&set)));
        Ok(set)
    }

    /// The active set.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotAvailable`] when no set was activated.
    pub fn get_active(&self) -> Result<Arc<ConfigSet>> {
        self.snapshot
            .load()
            .active
            .clone()
            .ok_or(ConfigError::NotAvailable)
    }

    /// Id of the active set, if any.
    pub fn active_id(&self) -> Option<String> {
        self.snapshot.load().active.as_ref().map(|s| s.id().to_string())
    }

    /// Replace the whole mapping of set `id`, preserving the new insertion
    /// order. The description is kept. If `id` is active, the new values are
    /// re-published as the active snapshot in the same swap.
    pub fn set_values<I, K, V>(&self, id: &str, pairs: I) -> Result<Arc<ConfigSet>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if id.is_empty() {
            return Err(ConfigError::InvalidParameter);
        }
        let replacement = ConfigSet::from_pairs(id, pairs);

        let (set, republished, _notify) = {
            let _guard = self.write_lock.lock();
            let current = self.snapshot.load_full();
            let pos = current
                .position(id)
                .ok_or_else(|| ConfigError::NotFound(id.to_string()))?;

            let mut updated = replacement.with_description(current.sets[pos].description());
            updated.normalize();
            let updated = Arc::new(updated);

            let mut sets = current.sets.clone();
            sets[pos] = Arc::clone(&updated);
            let was_active = current.is_active(id);
            let active = if was_active {
                Some(Arc::clone(&updated))
            } else {
                current.active.clone()
            };
            self.snapshot.store(Arc::new(Snapshot { sets, active }));
            (updated, was_active, self.notify_lock.lock())
        };

        log::debug!(
            "[ConfigAdmin] Updated configuration set '{}' ({} values)",
            id,
            set.len()
        );
        self.notify(&ConfigEvent::Updated(Arc::clone(&set)));
        if republished {
            self.notify(&ConfigEvent::Activated(Arc::clone(&set)));
        }
        Ok(set)
    }

    /// Add several sets in one swap: either all are added or none is.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidParameter`] if an id is empty
    /// - [`ConfigError::AlreadyExists`] if an id is taken or repeated
    pub fn add_all(&self, sets: Vec<ConfigSet>) -> Result<Vec<Arc<ConfigSet>>> {
        let mut added = Vec::with_capacity(sets.len());
        for mut set in sets {
            if set.id().is_empty() {
                return Err(ConfigError::InvalidParameter);
            }
            if added.iter().any(|s: &Arc<ConfigSet>| s.id() == set.id()) {
                return Err(ConfigError::AlreadyExists(set.id().to_string()));
            }
            set.normalize();
            added.push(Arc::new(set));
        }

        let _notify = {
            let _guard = self.write_lock.lock();
            let current = self.snapshot.load_full();
            if let Some(taken) = added.iter().find(|s| current.position(s.id()).is_some()) {
                return Err(ConfigError::AlreadyExists(taken.id().to_string()));
            }
            let mut sets = current.sets.clone();
            sets.extend(added.iter().cloned());
            self.snapshot.store(Arc::new(Snapshot {
                sets,
                active: current.active.clone(),
            }));
            self.notify_lock.lock()
        };

        for set in &added {
            log::debug!("[ConfigAdmin] Added configuration set '{}'", set.id());
            self.notify(&ConfigEvent::Added(Arc::clone(set)));
        }
        Ok(added)
    }

    /// Add every record from a text file.
    ///
    /// The file is parsed and every id checked before any set is added.
    /// Returns the number added.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let count = self.add_all(parse_records(&text)?)?.len();
        log::info!(
            "[ConfigAdmin] Loaded {} configuration set(s) from {}",
            count,
            path.as_ref().display()
        );
        Ok(count)
    }

    /// Every set as concatenated text records.
    pub fn to_records(&self) -> String {
        self.snapshot
            .load()
            .sets
            .iter()
            .map(|s| s.to_record())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Register a listener for registry events.
    ///
    /// Listeners run on the mutating thread, one event at a time and in the
    /// order the snapshots were swapped. They may read the registry but must
    /// not mutate it.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConfigEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Unregister a listener. Returns `false` if unknown.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn notify(&self, event: &ConfigEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl Default for ConfigSetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConfigSetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot.load();
        f.debug_struct("ConfigSetRegistry")
            .field("sets", &snapshot.sets.len())
            .field("active", &snapshot.active.as_ref().map(|s| s.id().to_string()))
            .finish()
    }
}

// =======================================================================
// Tests
// =======================================================================
