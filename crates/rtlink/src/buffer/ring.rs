// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Mutex-guarded bounded ring buffer.
//!
//! Writers and readers may live on different threads (execution-context thread
//! on one side, transport receive thread or control caller on the other).
//! All mutation goes through one `parking_lot::Mutex`; blocking policies wait on
//! condition variables with an explicit deadline. A timeout too large to
//! form a deadline waits until an element moves or the buffer closes.

use super::{deadline_after, wait_until, BufferConfig, BufferError, EmptyPolicy, FullPolicy, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

struct State<T> {
    items: VecDeque<T>,
    /// Element returned by the last successful read (for `ReturnLast`)
    last_read: Option<T>,
    closed: bool,
    overwritten: u64,
}

/// Bounded FIFO for one consumer endpoint.
pub struct RingBuffer<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    config: BufferConfig,
}

impl<T: Clone> RingBuffer<T> {
    /// Create a buffer from its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::InvalidCapacity`] when `config.capacity == 0`.
    pub fn new(config: BufferConfig) -> Result<Self> {
        if config.capacity == 0 {
            return Err(BufferError::InvalidCapacity(0));
        }
        Ok(Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(config.capacity),
                last_read: None,
                closed: false,
                overwritten: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            config,
        })
    }

    /// Write using the configured full policy and write timeout.
    pub fn write(&self, value: T) -> Result<()> {
        self.write_timeout(value, self.config.write_timeout)
    }

    /// Write with an explicit deadline for [`FullPolicy::BlockWriter`].
    pub fn write_timeout(&self, value: T, timeout: Duration) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(BufferError::Closed);
        }

        if state.items.len() >= self.config.capacity {
            match self.config.full_policy {
                FullPolicy::OverwriteOldest => {
                    state.items.pop_front();
                    state.overwritten += 1;
                }
                FullPolicy::RejectNew => return Err(BufferError::Full),
                FullPolicy::BlockWriter => {
                    let deadline = deadline_after(timeout);
                    state = self.wait_for_room(state, deadline)?;
                }
            }
        }

        state.items.push_back(value);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    fn wait_for_room<'a>(
        &'a self,
        mut state: MutexGuard<'a, State<T>>,
        deadline: Option<Instant>,
    ) -> Result<MutexGuard<'a, State<T>>> {
        while state.items.len() >= self.config.capacity {
            if state.closed {
                return Err(BufferError::Closed);
            }
            if wait_until(&self.not_full, &mut state, deadline) {
                if state.closed {
                    return Err(BufferError::Closed);
                }
                if state.items.len() >= self.config.capacity {
                    return Err(BufferError::Timeout);
                }
            }
        }
        if state.closed {
            return Err(BufferError::Closed);
        }
        Ok(state)
    }

    /// Read using the configured empty policy and read timeout.
    pub fn read(&self) -> Result<T> {
        self.read_timeout(self.config.read_timeout)
    }

    /// Read with an explicit deadline for [`EmptyPolicy::BlockReader`].
    pub fn read_timeout(&self, timeout: Duration) -> Result<T> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(BufferError::Closed);
        }

        if state.items.is_empty() {
            match self.config.empty_policy {
                EmptyPolicy::ReturnLast => {
                    return state.last_read.clone().ok_or(BufferError::Empty);
                }
                EmptyPolicy::Error => return Err(BufferError::Empty),
                EmptyPolicy::BlockReader => {
                    let deadline = deadline_after(timeout);
                    while state.items.is_empty() {
                        if state.closed {
                            return Err(BufferError::Closed);
                        }
                        if wait_until(&self.not_empty, &mut state, deadline)
                            && state.items.is_empty()
                        {
                            return Err(if state.closed {
                                BufferError::Closed
                            } else {
                                BufferError::Timeout
                            });
                        }
                    }
                    if state.closed {
                        return Err(BufferError::Closed);
                    }
                }
            }
        }

        let value = state.items.pop_front().ok_or(BufferError::Empty)?;
        if self.config.empty_policy == EmptyPolicy::ReturnLast {
            state.last_read = Some(value.clone());
        }
        drop(state);
        self.not_full.notify_one();
        Ok(value)
    }

    /// Pop the oldest element if one is buffered, ignoring the empty policy.
    pub fn try_read(&self) -> Option<T> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        let value = state.items.pop_front()?;
        if self.config.empty_policy == EmptyPolicy::ReturnLast {
            state.last_read = Some(value.clone());
        }
        drop(state);
        self.not_full.notify_one();
        Some(value)
    }

    /// Clone of the oldest element without removing it.
    pub fn peek(&self) -> Option<T> {
        self.state.lock().items.front().cloned()
    }

    /// Snapshot of the buffered elements, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.state.lock().items.iter().cloned().collect()
    }
}

impl<T> RingBuffer<T> {
    /// Number of buffered elements.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// True when `len() == capacity()`.
    pub fn is_full(&self) -> bool {
        self.state.lock().items.len() >= self.config.capacity
    }

    /// Maximum number of elements.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Configuration this buffer was built with.
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Elements dropped by [`FullPolicy::OverwriteOldest`] so far.
    pub fn overwritten(&self) -> u64 {
        self.state.lock().overwritten
    }

    /// Discard all buffered elements.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        state.last_read = None;
        drop(state);
        self.not_full.notify_all();
    }

    /// Close the buffer: discard contents and wake every blocked caller.
    ///
    /// Subsequent reads and writes return [`BufferError::Closed`].
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.items.clear();
        state.last_read = None;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// True once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RingBuffer")
            .field("len", &state.items.len())
            .field("capacity", &self.config.capacity)
            .field("full_policy", &self.config.full_policy)
            .field("empty_policy", &self.config.empty_policy)
            .field("closed", &state.closed)
            .finish()
    }
}
