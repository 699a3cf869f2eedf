// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Execution contexts.
//!
//! An [`ExecutionContext`] owns one dedicated thread and drives the lifecycle
//! of every component attached to it.
//!
//! # Scheduling
//!
//! Each cycle increments the cycle counter, then runs every attached component
//! in attachment order:
//!
//! - `Active`: `on_execute`; failure (or panic) moves it to `Error` and
//!   calls `on_aborting`
//! - `Error`: `on_error`
//! - anything else: skipped
//!
//! Periodic contexts start the next cycle at `last_start + period` on the
//! monotonic clock. A cycle that ends after that point is an overrun: it is
//! logged, counted, and the next cycle starts immediately. Triggered contexts
//! run one cycle per [`ExecutionContext::tick`].
//!
//! # Locking
//!
//! Each attachment has its own state lock, held while any hook of that
//! attachment runs (`slot state -> component` lock order). Control operations
//! on one component therefore wait for its in-flight callback and never
//! observe a half-applied transition.
//!
//! A hook calling a lifecycle operation on its own attachment, or
//! `tick_and_wait`/`stop` on its own context, gets
//! [`ContextError::Unsupported`] instead of waiting on itself.

mod component;
mod state;

pub use component::{CallbackError, CallbackResult, Component, SharedComponent};
pub use state::{Cadence, ContextId, LifecycleState};

use crate::buffer::{deadline_after, wait_until};
use crate::config::{keys, values, ConfigEvent, ConfigSet, ConfigSetRegistry, ListenerId};
use component::invoke;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// =======================================================================
// Errors
// =======================================================================

/// Errors from execution context operations.
#[derive(Debug)]
pub enum ContextError {
    /// A lifecycle hook failed (the transition it guarded did not happen).
    CallbackFailed {
        hook: &'static str,
        source: CallbackError,
    },
    /// Transition not allowed from the current state; nothing changed.
    PreconditionNotMet { current: LifecycleState },
    /// Handle does not belong to this context or was detached.
    UnknownHandle,
    AlreadyRunning,
    NotRunning,
    /// Context thread could not be created.
    ThreadSpawn(io::Error),
    /// Period or rate is zero, negative or not finite.
    InvalidRate,
    /// Operation does not apply to this context's cadence or calling thread.
    Unsupported,
    Timeout,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CallbackFailed { hook, source } => write!(f, "{} failed: {}", hook, source),
            Self::PreconditionNotMet { current } => {
                write!(f, "Transition not allowed from state {}", current)
            }
            Self::UnknownHandle => write!(f, "Unknown component handle"),
            Self::AlreadyRunning => write!(f, "Execution context already running"),
            Self::NotRunning => write!(f, "Execution context not running"),
            Self::ThreadSpawn(e) => write!(f, "Failed to spawn context thread: {}", e),
            Self::InvalidRate => write!(f, "Invalid execution rate"),
            Self::Unsupported => write!(f, "Operation not supported by this context"),
            Self::Timeout => write!(f, "Timed out waiting for the context"),
        }
    }
}

impl std::error::Error for ContextError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CallbackFailed { source, .. } => Some(source),
            Self::ThreadSpawn(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for execution context operations.
pub type Result<T> = std::result::Result<T, ContextError>;

// =======================================================================
// Attachments
// =======================================================================

/// Handle to one component attachment within one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentHandle {
    context: ContextId,
    slot: u64,
}

impl ComponentHandle {
    pub fn context(&self) -> ContextId {
        self.context
    }
}

thread_local! {
    /// Context whose thread this is.
    static CONTEXT_THREAD: Cell<Option<ContextId>> = const { Cell::new(None) };
    /// Attachments whose state lock this thread holds.
    static HELD_SLOTS: RefCell<Vec<(ContextId, u64)>> = const { RefCell::new(Vec::new()) };
}

fn on_context_thread(ec: ContextId) -> bool {
    CONTEXT_THREAD.with(Cell::get) == Some(ec)
}

/// State lock of one attachment, tracked per thread while held.
struct StateGuard<'a> {
    guard: MutexGuard<'a, LifecycleState>,
    held: (ContextId, u64),
}

impl Deref for StateGuard<'_> {
    type Target = LifecycleState;

    fn deref(&self) -> &LifecycleState {
        &self.guard
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut LifecycleState {
        &mut self.guard
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        HELD_SLOTS.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|h| *h == self.held) {
                held.remove(pos);
            }
        });
    }
}

struct Slot {
    key: u64,
    component: SharedComponent,
    state: Mutex<LifecycleState>,
}

impl Slot {
    /// Lock the state, refusing when this thread already holds it (a hook
    /// calling back into its own attachment).
    fn lock_state(&self, ec: ContextId) -> Result<StateGuard<'_>> {
        let held = (ec, self.key);
        if HELD_SLOTS.with(|h| h.borrow().contains(&held)) {
            log::warn!(
                "[ExecutionContext] {} component #{} called back into its own attachment",
                ec,
                self.key
            );
            return Err(ContextError::Unsupported);
        }
        let guard = self.state.lock();
        HELD_SLOTS.with(|h| h.borrow_mut().push(held));
        Ok(StateGuard { guard, held })
    }

    /// Run one cycle for this attachment.
    fn execute(&self, ec: ContextId) {
        let Ok(mut state) = self.lock_state(ec) else {
            return;
        };
        match *state {
            LifecycleState::Active => {
                if let Err(e) = invoke(&self.component, |c| c.on_execute(ec)) {
                    log::error!("[ExecutionContext] {} on_execute failed: {}", ec, e);
                    self.enter_error(&mut state, ec);
                }
            }
            LifecycleState::Error => {
                if let Err(e) = invoke(&self.component, |c| c.on_error(ec)) {
                    log::debug!("[ExecutionContext] {} on_error failed: {}", ec, e);
                }
            }
            _ => {}
        }
    }

    fn enter_error(&self, state: &mut LifecycleState, ec: ContextId) {
        *state = LifecycleState::Error;
        if let Err(e) = invoke(&self.component, |c| c.on_aborting(ec)) {
            log::warn!("[ExecutionContext] {} on_aborting failed: {}", ec, e);
        }
    }
}

// =======================================================================
// Thread control
// =======================================================================

enum Wake {
    Tick,
    Cadence,
    Stop,
}

/// Sender side of the running thread, plus tick bookkeeping for
/// `tick_and_wait`.
#[derive(Default)]
struct Trigger {
    tx: Option<Sender<Wake>>,
    issued: u64,
}

struct Inner {
    id: ContextId,
    name: String,
    cadence: Mutex<Cadence>,
    slots: RwLock<Vec<Arc<Slot>>>,
    next_key: AtomicU64,
    running: AtomicBool,
    cycle_count: AtomicU64,
    overrun_count: AtomicU64,
    trigger: Mutex<Trigger>,
    ticks_done: Mutex<u64>,
    tick_cv: Condvar,
}

impl Inner {
    fn snapshot(&self) -> Vec<Arc<Slot>> {
        self.slots.read().clone()
    }

    fn run_cycle(&self) {
        let _cycle = self.cycle_count.fetch_add(1, Ordering::Relaxed) + 1;
        #[cfg(feature = "trace-cycles")]
        log::trace!("[ExecutionContext] {} cycle {}", self.id, _cycle);
        for slot in self.snapshot() {
            slot.execute(self.id);
        }
    }

    fn run(&self, rx: Receiver<Wake>) {
        CONTEXT_THREAD.with(|c| c.set(Some(self.id)));
        log::debug!("[ExecutionContext] {} '{}' thread started", self.id, self.name);
        let mut last_start = Instant::now();
        // None when the period is too long to form a deadline
        let mut next_start = Some(last_start);

        loop {
            let cadence = *self.cadence.lock();
            let wake = match cadence {
                Cadence::Periodic(_) => match next_start {
                    Some(due) => match rx.recv_deadline(due) {
                        Ok(w) => Some(w),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => Some(Wake::Stop),
                    },
                    None => Some(rx.recv().unwrap_or(Wake::Stop)),
                },
                Cadence::Triggered => Some(rx.recv().unwrap_or(Wake::Stop)),
            };

            let ticked = match wake {
                Some(Wake::Stop) => break,
                Some(Wake::Cadence) => {
                    if let Cadence::Periodic(period) = *self.cadence.lock() {
                        next_start = last_start.checked_add(period);
                    }
                    continue;
                }
                // Ticks are only honored in triggered mode
                Some(Wake::Tick) if cadence != Cadence::Triggered => continue,
                Some(Wake::Tick) => true,
                None => false,
            };

            last_start = Instant::now();
            self.run_cycle();

            if ticked {
                *self.ticks_done.lock() += 1;
                self.tick_cv.notify_all();
            }

            if let Cadence::Periodic(period) = *self.cadence.lock() {
                next_start = last_start.checked_add(period);
                let now = Instant::now();
                if let Some(due) = next_start.filter(|due| now > *due) {
                    let overruns = self.overrun_count.fetch_add(1, Ordering::Relaxed) + 1;
                    log::warn!(
                        "[ExecutionContext] {} '{}' overrun by {:?} (total {})",
                        self.id,
                        self.name,
                        now - due,
                        overruns
                    );
                    next_start = Some(now);
                }
            }
        }
        log::debug!("[ExecutionContext] {} '{}' thread exiting", self.id, self.name);
    }
}

// =======================================================================
// ExecutionContext
// =======================================================================

/// Scheduler owning one thread and the lifecycle of its attached components.
pub struct ExecutionContext {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionContext {
    fn with_cadence(name: impl Into<String>, cadence: Cadence) -> Self {
        let id = ContextId::next();
        let name = name.into();
        log::debug!("[ExecutionContext] {} '{}' created ({})", id, name, cadence);
        Self {
            inner: Arc::new(Inner {
                id,
                name,
                cadence: Mutex::new(cadence),
                slots: RwLock::new(Vec::new()),
                next_key: AtomicU64::new(1),
                running: AtomicBool::new(false),
                cycle_count: AtomicU64::new(0),
                overrun_count: AtomicU64::new(0),
                trigger: Mutex::new(Trigger::default()),
                ticks_done: Mutex::new(0),
                tick_cv: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Context running one cycle every `period`.
    ///
    /// A zero period is replaced by 1 ms; use [`set_period`](Self::set_period)
    /// for a checked change.
    pub fn periodic(name: impl Into<String>, period: Duration) -> Self {
        let period = if period.is_zero() {
            Duration::from_millis(1)
        } else {
            period
        };
        Self::with_cadence(name, Cadence::Periodic(period))
    }

    /// Context running one cycle per [`tick`](Self::tick).
    pub fn triggered(name: impl Into<String>) -> Self {
        Self::with_cadence(name, Cadence::Triggered)
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn cadence(&self) -> Cadence {
        *self.inner.cadence.lock()
    }

    /// Cycles run since creation.
    pub fn cycle_count(&self) -> u64 {
        self.inner.cycle_count.load(Ordering::Relaxed)
    }

    /// Periodic cycles that ended after the next cycle was due.
    pub fn overrun_count(&self) -> u64 {
        self.inner.overrun_count.load(Ordering::Relaxed)
    }

    pub fn component_count(&self) -> usize {
        self.inner.slots.read().len()
    }

    fn slot(&self, handle: ComponentHandle) -> Result<Arc<Slot>> {
        if handle.context != self.inner.id {
            return Err(ContextError::UnknownHandle);
        }
        self.inner
            .slots
            .read()
            .iter()
            .find(|s| s.key == handle.slot)
            .cloned()
            .ok_or(ContextError::UnknownHandle)
    }

    // ===== Lifecycle =====

    /// Attach a component: `on_initialize`, then `Inactive`.
    ///
    /// # Errors
    ///
    /// [`ContextError::CallbackFailed`] if `on_initialize` fails; the
    /// component is not attached.
    pub fn attach(&self, component: SharedComponent) -> Result<ComponentHandle> {
        if let Err(source) = invoke(&component, |c| c.on_initialize()) {
            log::warn!(
                "[ExecutionContext] {} attach refused: on_initialize failed: {}",
                self.inner.id,
                source
            );
            return Err(ContextError::CallbackFailed {
                hook: "on_initialize",
                source,
            });
        }

        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        self.inner.slots.write().push(Arc::new(Slot {
            key,
            component,
            state: Mutex::new(LifecycleState::Inactive),
        }));
        log::debug!("[ExecutionContext] {} attached component #{}", self.inner.id, key);
        Ok(ComponentHandle {
            context: self.inner.id,
            slot: key,
        })
    }

    /// Detach a component: deactivate it if `Active`, then `on_finalize`.
    ///
    /// The component is detached even if a hook fails; the failure is
    /// returned.
    pub fn detach(&self, handle: ComponentHandle) -> Result<()> {
        let slot = self.slot(handle)?;
        let ec = self.inner.id;
        let mut state = slot.lock_state(ec)?;
        {
            let mut slots = self.inner.slots.write();
            // A concurrent detach may have won while this one waited
            let idx = slots
                .iter()
                .position(|s| Arc::ptr_eq(s, &slot))
                .ok_or(ContextError::UnknownHandle)?;
            slots.remove(idx);
        }

        if *state == LifecycleState::Active {
            if let Err(e) = invoke(&slot.component, |c| c.on_deactivated(ec)) {
                log::warn!("[ExecutionContext] {} on_deactivated failed during detach: {}", ec, e);
            }
        }
        let finalized = invoke(&slot.component, |c| c.on_finalize());
        *state = LifecycleState::Finalized;
        log::debug!("[ExecutionContext] {} detached component #{}", ec, slot.key);

        finalized.map_err(|source| ContextError::CallbackFailed {
            hook: "on_finalize",
            source,
        })
    }

    /// `Inactive -> Active` via `on_activated`.
    ///
    /// A failing `on_activated` moves the component to `Error`.
    pub fn activate(&self, handle: ComponentHandle) -> Result<()> {
        let slot = self.slot(handle)?;
        let ec = self.inner.id;
        let mut state = slot.lock_state(ec)?;
        if *state != LifecycleState::Inactive {
            return Err(ContextError::PreconditionNotMet { current: *state });
        }
        match invoke(&slot.component, |c| c.on_activated(ec)) {
            Ok(()) => {
                *state = LifecycleState::Active;
                log::debug!("[ExecutionContext] {} component #{} Active", ec, slot.key);
                Ok(())
            }
            Err(source) => {
                log::error!("[ExecutionContext] {} on_activated failed: {}", ec, source);
                slot.enter_error(&mut state, ec);
                Err(ContextError::CallbackFailed {
                    hook: "on_activated",
                    source,
                })
            }
        }
    }

    /// `Active -> Inactive` via `on_deactivated`.
    pub fn deactivate(&self, handle: ComponentHandle) -> Result<()> {
        let slot = self.slot(handle)?;
        let ec = self.inner.id;
        let mut state = slot.lock_state(ec)?;
        if *state != LifecycleState::Active {
            return Err(ContextError::PreconditionNotMet { current: *state });
        }
        match invoke(&slot.component, |c| c.on_deactivated(ec)) {
            Ok(()) => {
                *state = LifecycleState::Inactive;
                log::debug!("[ExecutionContext] {} component #{} Inactive", ec, slot.key);
                Ok(())
            }
            Err(source) => {
                log::error!("[ExecutionContext] {} on_deactivated failed: {}", ec, source);
                slot.enter_error(&mut state, ec);
                Err(ContextError::CallbackFailed {
                    hook: "on_deactivated",
                    source,
                })
            }
        }
    }

    /// `Error -> Inactive` via `on_reset`. The component stays in `Error` if
    /// `on_reset` fails.
    pub fn reset(&self, handle: ComponentHandle) -> Result<()> {
        let slot = self.slot(handle)?;
        let ec = self.inner.id;
        let mut state = slot.lock_state(ec)?;
        if *state != LifecycleState::Error {
            return Err(ContextError::PreconditionNotMet { current: *state });
        }
        invoke(&slot.component, |c| c.on_reset(ec)).map_err(|source| {
            log::warn!("[ExecutionContext] {} on_reset failed: {}", ec, source);
            ContextError::CallbackFailed {
                hook: "on_reset",
                source,
            }
        })?;
        *state = LifecycleState::Inactive;
        log::debug!("[ExecutionContext] {} component #{} reset", ec, slot.key);
        Ok(())
    }

    /// Current state of an attachment.
    ///
    /// From one of that attachment's own hooks: [`ContextError::Unsupported`].
    pub fn state(&self, handle: ComponentHandle) -> Result<LifecycleState> {
        let slot = self.slot(handle)?;
        let state = *slot.lock_state(self.inner.id)?;
        Ok(state)
    }

    /// Handles in attachment order.
    pub fn handles(&self) -> Vec<ComponentHandle> {
        self.inner
            .slots
            .read()
            .iter()
            .map(|s| ComponentHandle {
                context: self.inner.id,
                slot: s.key,
            })
            .collect()
    }

    // ===== Running =====

    /// Call `on_startup` on every component, then spawn the context thread.
    ///
    /// # Errors
    ///
    /// - [`ContextError::AlreadyRunning`]
    /// - [`ContextError::ThreadSpawn`] (fatal, the context stays stopped)
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(ContextError::AlreadyRunning);
        }

        let ec = self.inner.id;
        for slot in self.inner.snapshot() {
            let Ok(mut state) = slot.lock_state(ec) else {
                continue;
            };
            if let Err(e) = invoke(&slot.component, |c| c.on_startup(ec)) {
                log::error!("[ExecutionContext] {} on_startup failed: {}", ec, e);
                slot.enter_error(&mut state, ec);
            }
        }

        let (tx, rx) = channel::unbounded();
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(format!("rtlink-{}", ec))
            .spawn(move || inner.run(rx))
            .map_err(|e| {
                log::error!("[ExecutionContext] {} failed to spawn thread: {}", ec, e);
                ContextError::ThreadSpawn(e)
            })?;

        *self.inner.ticks_done.lock() = 0;
        *self.inner.trigger.lock() = Trigger {
            tx: Some(tx),
            issued: 0,
        };
        self.inner.running.store(true, Ordering::Release);
        *worker = Some(handle);
        log::info!(
            "[ExecutionContext] {} '{}' started ({})",
            ec,
            self.inner.name,
            self.cadence()
        );
        Ok(())
    }

    /// Finish the current cycle, join the thread, then call `on_shutdown` on
    /// every component.
    ///
    /// Must not be called from one of this context's callbacks
    /// ([`ContextError::Unsupported`]).
    pub fn stop(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        let Some(handle) = worker.as_ref() else {
            return Err(ContextError::NotRunning);
        };
        if handle.thread().id() == thread::current().id() {
            return Err(ContextError::Unsupported);
        }

        if let Some(tx) = self.inner.trigger.lock().tx.take() {
            let _ = tx.send(Wake::Stop);
        }
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                log::error!("[ExecutionContext] {} thread panicked", self.inner.id);
            }
        }
        self.inner.running.store(false, Ordering::Release);
        {
            let _done = self.inner.ticks_done.lock();
            self.inner.tick_cv.notify_all();
        }

        let ec = self.inner.id;
        for slot in self.inner.snapshot() {
            let Ok(_state) = slot.lock_state(ec) else {
                continue;
            };
            if let Err(e) = invoke(&slot.component, |c| c.on_shutdown(ec)) {
                log::warn!("[ExecutionContext] {} on_shutdown failed: {}", ec, e);
            }
        }
        log::info!("[ExecutionContext] {} '{}' stopped", ec, self.inner.name);
        Ok(())
    }

    fn send_tick(&self) -> Result<u64> {
        if self.cadence() != Cadence::Triggered {
            return Err(ContextError::Unsupported);
        }
        let mut trigger = self.inner.trigger.lock();
        let tx = trigger.tx.as_ref().ok_or(ContextError::NotRunning)?;
        tx.send(Wake::Tick).map_err(|_| ContextError::NotRunning)?;
        trigger.issued += 1;
        Ok(trigger.issued)
    }

    /// Request one cycle of a triggered context.
    pub fn tick(&self) -> Result<()> {
        self.send_tick().map(|_| ())
    }

    /// Request one cycle and wait until it completed.
    ///
    /// From the context's own thread: [`ContextError::Unsupported`].
    pub fn tick_and_wait(&self, timeout: Duration) -> Result<()> {
        if on_context_thread(self.inner.id) {
            return Err(ContextError::Unsupported);
        }
        let ticket = self.send_tick()?;
        let deadline = deadline_after(timeout);
        let mut done = self.inner.ticks_done.lock();
        while *done < ticket {
            if !self.is_running() {
                return Err(ContextError::NotRunning);
            }
            if wait_until(&self.inner.tick_cv, &mut done, deadline) && *done < ticket {
                return Err(ContextError::Timeout);
            }
        }
        Ok(())
    }

    // ===== Cadence =====

    /// Switch to a periodic cadence with `period`.
    pub fn set_period(&self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(ContextError::InvalidRate);
        }
        self.set_cadence(Cadence::Periodic(period));
        Ok(())
    }

    /// Switch to a periodic cadence at `hz` cycles per second.
    pub fn set_rate(&self, hz: f64) -> Result<()> {
        if !hz.is_finite() || hz <= 0.0 {
            return Err(ContextError::InvalidRate);
        }
        let period = Duration::try_from_secs_f64(1.0 / hz).map_err(|_| ContextError::InvalidRate)?;
        self.set_period(period)
    }

    /// Rate in Hz, `None` for triggered contexts.
    pub fn rate(&self) -> Option<f64> {
        self.cadence().rate()
    }

    fn set_cadence(&self, cadence: Cadence) {
        {
            let mut current = self.inner.cadence.lock();
            if *current == cadence {
                return;
            }
            *current = cadence;
        }
        if let Some(tx) = self.inner.trigger.lock().tx.as_ref() {
            let _ = tx.send(Wake::Cadence);
        }
        log::debug!("[ExecutionContext] {} cadence now {}", self.inner.id, cadence);

        let ec = self.inner.id;
        for slot in self.inner.snapshot() {
            // Skips a component changing the rate from its own hook
            let Ok(_state) = slot.lock_state(ec) else {
                continue;
            };
            if let Err(e) = invoke(&slot.component, |c| c.on_rate_changed(ec)) {
                log::warn!("[ExecutionContext] {} on_rate_changed failed: {}", ec, e);
            }
        }
    }

    // ===== Configuration =====

    /// Apply `exec_cxt.periodic.rate` from `set`, if present.
    pub fn apply_config(&self, set: &ConfigSet) -> Result<()> {
        match set.get(keys::EXEC_PERIODIC_RATE) {
            None => Ok(()),
            Some(raw) => {
                let hz = values::parse_rate(raw).ok_or(ContextError::InvalidRate)?;
                self.set_rate(hz)
            }
        }
    }

    /// Apply the registry's active set now and on every activation.
    ///
    /// The listener holds a weak reference to the context.
    pub fn follow(self: &Arc<Self>, registry: &ConfigSetRegistry) -> ListenerId {
        if let Ok(active) = registry.get_active() {
            if let Err(e) = self.apply_config(&active) {
                log::warn!("[ExecutionContext] {} ignoring set '{}': {}", self.id(), active.id(), e);
            }
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        registry.add_listener(move |event| {
            if let ConfigEvent::Activated(set) = event {
                if let Some(ec) = weak.upgrade() {
                    if let Err(e) = ec.apply_config(set) {
                        log::warn!("[ExecutionContext] {} ignoring set '{}': {}", ec.id(), set.id(), e);
                    }
                }
            }
        })
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if self.worker.lock().is_some() {
            let _ = self.stop();
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("cadence", &self.cadence())
            .field("running", &self.is_running())
            .field("components", &self.component_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        hooks: Vec<&'static str>,
        fail_on: Option<&'static str>,
    }

    impl Recorder {
        fn failing(hook: &'static str) -> Self {
            Self {
                hooks: Vec::new(),
                fail_on: Some(hook),
            }
        }

        fn hit(&mut self, hook: &'static str) -> CallbackResult {
            self.hooks.push(hook);
            if self.fail_on == Some(hook) {
                Err(format!("{hook} refused").into())
            } else {
                Ok(())
            }
        }
    }

    impl Component for Recorder {
        fn on_initialize(&mut self) -> CallbackResult {
            self.hit("initialize")
        }
        fn on_finalize(&mut self) -> CallbackResult {
            self.hit("finalize")
        }
        fn on_activated(&mut self, _ec: ContextId) -> CallbackResult {
            self.hit("activated")
        }
        fn on_deactivated(&mut self, _ec: ContextId) -> CallbackResult {
            self.hit("deactivated")
        }
        fn on_aborting(&mut self, _ec: ContextId) -> CallbackResult {
            self.hit("aborting")
        }
        fn on_error(&mut self, _ec: ContextId) -> CallbackResult {
            self.hit("error")
        }
        fn on_reset(&mut self, _ec: ContextId) -> CallbackResult {
            self.hit("reset")
        }
        fn on_rate_changed(&mut self, _ec: ContextId) -> CallbackResult {
            self.hit("rate_changed")
        }
        fn on_execute(&mut self, _ec: ContextId) -> CallbackResult {
            self.hit("execute")
        }
    }

    fn recorder(r: Recorder) -> Arc<Mutex<Recorder>> {
        Arc::new(Mutex::new(r))
    }

    #[test]
    fn test_lifecycle_transitions() {
        let ec = ExecutionContext::triggered("lc");
        let comp = recorder(Recorder::default());
        let h = ec.attach(comp.clone()).expect("attach");
        assert_eq!(ec.state(h).expect("state"), LifecycleState::Inactive);

        assert!(matches!(
            ec.deactivate(h),
            Err(ContextError::PreconditionNotMet {
                current: LifecycleState::Inactive
            })
        ));
        ec.activate(h).expect("activate");
        assert_eq!(ec.state(h).expect("state"), LifecycleState::Active);
        ec.deactivate(h).expect("deactivate");
        assert!(matches!(ec.reset(h), Err(ContextError::PreconditionNotMet { .. })));

        ec.detach(h).expect("detach");
        assert!(matches!(ec.state(h), Err(ContextError::UnknownHandle)));
        assert_eq!(
            comp.lock().hooks,
            vec!["initialize", "activated", "deactivated", "finalize"]
        );
    }

    #[test]
    fn test_attach_fails_when_initialize_fails() {
        let ec = ExecutionContext::triggered("init");
        let result = ec.attach(recorder(Recorder::failing("initialize")));
        assert!(matches!(
            result,
            Err(ContextError::CallbackFailed {
                hook: "on_initialize",
                ..
            })
        ));
        assert_eq!(ec.component_count(), 0);
    }

    #[test]
    fn test_activation_failure_enters_error() {
        let ec = ExecutionContext::triggered("act");
        let comp = recorder(Recorder::failing("activated"));
        let h = ec.attach(comp.clone()).expect("attach");

        assert!(matches!(ec.activate(h), Err(ContextError::CallbackFailed { .. })));
        assert_eq!(ec.state(h).expect("state"), LifecycleState::Error);
        assert_eq!(comp.lock().hooks, vec!["initialize", "activated", "aborting"]);

        // Not retried
        assert!(matches!(
            ec.activate(h),
            Err(ContextError::PreconditionNotMet {
                current: LifecycleState::Error
            })
        ));
        ec.reset(h).expect("reset");
        assert_eq!(ec.state(h).expect("state"), LifecycleState::Inactive);
    }

    #[test]
    fn test_failed_reset_stays_in_error() {
        let ec = ExecutionContext::triggered("rst");
        let comp = recorder(Recorder {
            hooks: Vec::new(),
            fail_on: Some("activated"),
        });
        let h = ec.attach(comp.clone()).expect("attach");
        let _ = ec.activate(h);
        comp.lock().fail_on = Some("reset");

        assert!(matches!(ec.reset(h), Err(ContextError::CallbackFailed { hook: "on_reset", .. })));
        assert_eq!(ec.state(h).expect("state"), LifecycleState::Error);
    }

    #[test]
    fn test_detach_active_deactivates_first() {
        let ec = ExecutionContext::triggered("det");
        let comp = recorder(Recorder::default());
        let h = ec.attach(comp.clone()).expect("attach");
        ec.activate(h).expect("activate");
        ec.detach(h).expect("detach");
        assert!(matches!(ec.detach(h), Err(ContextError::UnknownHandle)));
        assert_eq!(
            comp.lock().hooks,
            vec!["initialize", "activated", "deactivated", "finalize"]
        );
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let a = ExecutionContext::triggered("a");
        let b = ExecutionContext::triggered("b");
        let h = a.attach(recorder(Recorder::default())).expect("attach");
        assert!(matches!(b.activate(h), Err(ContextError::UnknownHandle)));
        assert_eq!(h.context(), a.id());
    }

    #[test]
    fn test_tick_runs_one_cycle() {
        let ec = ExecutionContext::triggered("tick");
        let comp = recorder(Recorder::default());
        let h = ec.attach(comp.clone()).expect("attach");
        ec.activate(h).expect("activate");

        assert!(matches!(ec.tick(), Err(ContextError::NotRunning)));
        ec.start().expect("start");
        assert!(matches!(ec.start(), Err(ContextError::AlreadyRunning)));

        ec.tick_and_wait(Duration::from_secs(5)).expect("cycle 1");
        ec.tick_and_wait(Duration::from_secs(5)).expect("cycle 2");
        ec.stop().expect("stop");

        assert_eq!(ec.cycle_count(), 2);
        let executes = comp.lock().hooks.iter().filter(|h| **h == "execute").count();
        assert_eq!(executes, 2);
        assert!(matches!(ec.stop(), Err(ContextError::NotRunning)));
    }

    #[test]
    fn test_execute_failure_isolated() {
        let ec = ExecutionContext::triggered("iso");
        let bad = recorder(Recorder::failing("execute"));
        let good = recorder(Recorder::default());
        let hb = ec.attach(bad.clone()).expect("attach");
        let hg = ec.attach(good.clone()).expect("attach");
        ec.activate(hb).expect("activate");
        ec.activate(hg).expect("activate");
        ec.start().expect("start");

        for _ in 0..3 {
            ec.tick_and_wait(Duration::from_secs(5)).expect("cycle");
        }
        ec.stop().expect("stop");

        assert_eq!(ec.state(hb).expect("state"), LifecycleState::Error);
        assert_eq!(ec.state(hg).expect("state"), LifecycleState::Active);
        assert_eq!(
            bad.lock().hooks,
            vec!["initialize", "activated", "execute", "aborting", "error", "error"]
        );
        let executes = good.lock().hooks.iter().filter(|h| **h == "execute").count();
        assert_eq!(executes, 3);
    }

    #[test]
    fn test_periodic_runs_and_rate_change() {
        let ec = ExecutionContext::periodic("per", Duration::from_millis(5));
        let comp = recorder(Recorder::default());
        let h = ec.attach(comp.clone()).expect("attach");
        ec.activate(h).expect("activate");
        assert!(matches!(ec.tick(), Err(ContextError::Unsupported)));

        ec.start().expect("start");
        thread::sleep(Duration::from_millis(60));
        ec.set_rate(500.0).expect("rate");
        thread::sleep(Duration::from_millis(20));
        ec.stop().expect("stop");

        assert!(ec.cycle_count() >= 2);
        assert!(comp.lock().hooks.contains(&"rate_changed"));
        assert_eq!(ec.cadence(), Cadence::Periodic(Duration::from_millis(2)));
        assert!(matches!(ec.set_rate(0.0), Err(ContextError::InvalidRate)));
        assert!(matches!(ec.set_period(Duration::ZERO), Err(ContextError::InvalidRate)));
    }

    #[test]
    fn test_unbounded_period_and_tick_wait() {
        let ec = ExecutionContext::periodic("slow", Duration::MAX);
        let comp = recorder(Recorder::default());
        let h = ec.attach(comp.clone()).expect("attach");
        ec.activate(h).expect("activate");
        ec.start().expect("start");
        thread::sleep(Duration::from_millis(20));
        ec.stop().expect("stop");
        assert_eq!(ec.cycle_count(), 1);
        assert_eq!(ec.overrun_count(), 0);

        let trig = ExecutionContext::triggered("trig");
        trig.start().expect("start");
        trig.tick_and_wait(Duration::MAX).expect("cycle");
        trig.stop().expect("stop");
        assert_eq!(trig.cycle_count(), 1);
    }

    struct SelfCaller {
        ec: Weak<ExecutionContext>,
        handle: Option<ComponentHandle>,
        results: Vec<String>,
    }

    impl Component for SelfCaller {
        fn on_execute(&mut self, _ec: ContextId) -> CallbackResult {
            let (Some(ec), Some(handle)) = (self.ec.upgrade(), self.handle) else {
                return Ok(());
            };
            self.results.push(format!("{:?}", ec.state(handle)));
            self.results.push(format!("{:?}", ec.deactivate(handle)));
            self.results.push(format!("{:?}", ec.tick_and_wait(Duration::from_secs(1))));
            Ok(())
        }
    }

    #[test]
    fn test_hook_calling_own_context_is_refused() {
        let ec = Arc::new(ExecutionContext::triggered("self"));
        let comp = Arc::new(Mutex::new(SelfCaller {
            ec: Arc::downgrade(&ec),
            handle: None,
            results: Vec::new(),
        }));
        let h = ec.attach(comp.clone()).expect("attach");
        comp.lock().handle = Some(h);
        ec.activate(h).expect("activate");

        ec.start().expect("start");
        ec.tick_and_wait(Duration::from_secs(5)).expect("cycle completes");
        ec.stop().expect("stop");

        assert_eq!(
            comp.lock().results,
            vec!["Err(Unsupported)", "Err(Unsupported)", "Err(Unsupported)"]
        );
        // The refused calls left the component untouched
        assert_eq!(ec.state(h).expect("state"), LifecycleState::Active);
    }

    #[test]
    fn test_apply_config_rate() {
        let ec = ExecutionContext::periodic("cfg", Duration::from_millis(10));
        let mut set = ConfigSet::new("fast");
        set.set(keys::EXEC_PERIODIC_RATE, "200");
        ec.apply_config(&set).expect("apply");
        assert_eq!(ec.cadence(), Cadence::Periodic(Duration::from_millis(5)));

        set.set(keys::EXEC_PERIODIC_RATE, "-3");
        assert!(matches!(ec.apply_config(&set), Err(ContextError::InvalidRate)));
        assert!(ec.apply_config(&ConfigSet::new("empty")).is_ok());
    }

    #[test]
    fn test_drop_stops_running_context() {
        let comp = recorder(Recorder::default());
        let executes = || comp.lock().hooks.iter().filter(|h| **h == "execute").count();
        {
            let ec = ExecutionContext::periodic("drop", Duration::from_millis(1));
            let h = ec.attach(comp.clone()).expect("attach");
            ec.activate(h).expect("activate");
            ec.start().expect("start");
            thread::sleep(Duration::from_millis(20));
        }
        let after_drop = executes();
        assert!(after_drop > 0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(executes(), after_drop);
    }
}
