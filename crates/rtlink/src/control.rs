// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control boundary consumed by remote callers.
//!
//! [`ControlSurface`] maps component names to `(context, handle)` pairs and
//! exposes lifecycle and configuration operations with RTC-style
//! [`ReturnCode`]s. Query operations return typed results with a
//! `ReturnCode` error.

use crate::config::{ConfigError, ConfigSet, ConfigSetRegistry};
use crate::context::{ComponentHandle, ContextError, ExecutionContext, LifecycleState};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Outcome of a control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    Ok,
    Error,
    BadParameter,
    Unsupported,
    OutOfResources,
    PreconditionNotMet,
}

impl ReturnCode {
    pub fn is_ok(&self) -> bool {
        *self == Self::Ok
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "RTC_OK",
            Self::Error => "RTC_ERROR",
            Self::BadParameter => "BAD_PARAMETER",
            Self::Unsupported => "UNSUPPORTED",
            Self::OutOfResources => "OUT_OF_RESOURCES",
            Self::PreconditionNotMet => "PRECONDITION_NOT_MET",
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ContextError> for ReturnCode {
    fn from(e: ContextError) -> Self {
        match e {
            ContextError::CallbackFailed { .. } | ContextError::Timeout => Self::Error,
            ContextError::PreconditionNotMet { .. }
            | ContextError::AlreadyRunning
            | ContextError::NotRunning => Self::PreconditionNotMet,
            ContextError::UnknownHandle | ContextError::InvalidRate => Self::BadParameter,
            ContextError::ThreadSpawn(_) => Self::OutOfResources,
            ContextError::Unsupported => Self::Unsupported,
        }
    }
}

impl From<ConfigError> for ReturnCode {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::InvalidParameter
            | ConfigError::NotFound(_)
            | ConfigError::AlreadyExists(_)
            | ConfigError::InvalidValue { .. }
            | ConfigError::Parse { .. } => Self::BadParameter,
            ConfigError::NotAvailable => Self::PreconditionNotMet,
            ConfigError::Io(_) => Self::Error,
        }
    }
}

fn code<E: Into<ReturnCode>>(result: Result<(), E>) -> ReturnCode {
    match result {
        Ok(()) => ReturnCode::Ok,
        Err(e) => e.into(),
    }
}

#[derive(Clone)]
struct Binding {
    context: Arc<ExecutionContext>,
    handle: ComponentHandle,
}

/// Name-addressed lifecycle and configuration control.
pub struct ControlSurface {
    bindings: RwLock<HashMap<String, Binding>>,
    registry: Arc<ConfigSetRegistry>,
}

impl ControlSurface {
    pub fn new(registry: Arc<ConfigSetRegistry>) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ConfigSetRegistry> {
        &self.registry
    }

    /// Expose the attachment `handle` of `context` as `component_id`.
    ///
    /// `BadParameter` for an empty id or a handle the context does not know;
    /// `PreconditionNotMet` if the id is already bound.
    pub fn bind(
        &self,
        component_id: impl Into<String>,
        context: Arc<ExecutionContext>,
        handle: ComponentHandle,
    ) -> ReturnCode {
        let component_id = component_id.into();
        if component_id.is_empty() || context.state(handle).is_err() {
            return ReturnCode::BadParameter;
        }
        let mut bindings = self.bindings.write();
        if bindings.contains_key(&component_id) {
            return ReturnCode::PreconditionNotMet;
        }
        log::debug!("[Control] bound '{}' to {}", component_id, context.id());
        bindings.insert(component_id, Binding { context, handle });
        ReturnCode::Ok
    }

    pub fn unbind(&self, component_id: &str) -> ReturnCode {
        match self.bindings.write().remove(component_id) {
            Some(_) => ReturnCode::Ok,
            None => ReturnCode::BadParameter,
        }
    }

    /// Bound component ids, sorted.
    pub fn component_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.bindings.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn binding(&self, component_id: &str) -> Result<Binding, ReturnCode> {
        self.bindings
            .read()
            .get(component_id)
            .cloned()
            .ok_or(ReturnCode::BadParameter)
    }

    // ===== Lifecycle =====

    pub fn activate(&self, component_id: &str) -> ReturnCode {
        match self.binding(component_id) {
            Ok(b) => code(b.context.activate(b.handle)),
            Err(rc) => rc,
        }
    }

    pub fn deactivate(&self, component_id: &str) -> ReturnCode {
        match self.binding(component_id) {
            Ok(b) => code(b.context.deactivate(b.handle)),
            Err(rc) => rc,
        }
    }

    pub fn reset(&self, component_id: &str) -> ReturnCode {
        match self.binding(component_id) {
            Ok(b) => code(b.context.reset(b.handle)),
            Err(rc) => rc,
        }
    }

    pub fn get_component_state(&self, component_id: &str) -> Result<LifecycleState, ReturnCode> {
        let b = self.binding(component_id)?;
        b.context.state(b.handle).map_err(ReturnCode::from)
    }

    // ===== Configuration =====

    pub fn get_configuration_sets(&self) -> Vec<Arc<ConfigSet>> {
        self.registry.list()
    }

    pub fn get_configuration_set(&self, id: &str) -> Result<Arc<ConfigSet>, ReturnCode> {
        self.registry.get(id).map_err(ReturnCode::from)
    }

    /// Replace the values of set `id`.
    pub fn set_configuration_set_values(&self, id: &str, values: &[(String, String)]) -> ReturnCode {
        code(
            self.registry
                .set_values(id, values.iter().cloned())
                .map(|_| ()),
        )
    }

    pub fn add_configuration_set(&self, set: ConfigSet) -> ReturnCode {
        code(self.registry.add(set).map(|_| ()))
    }

    pub fn remove_configuration_set(&self, id: &str) -> ReturnCode {
        code(self.registry.remove(id))
    }

    pub fn activate_configuration_set(&self, id: &str) -> ReturnCode {
        code(self.registry.activate(id).map(|_| ()))
    }

    pub fn get_active_configuration_set(&self) -> Result<Arc<ConfigSet>, ReturnCode> {
        self.registry.get_active().map_err(ReturnCode::from)
    }
}

impl fmt::Debug for ControlSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlSurface")
            .field("components", &self.component_ids())
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CallbackResult, Component, ContextId};
    use parking_lot::Mutex;

    struct Idle;

    impl Component for Idle {
        fn on_execute(&mut self, _ec: ContextId) -> CallbackResult {
            Ok(())
        }
    }

    fn surface() -> (ControlSurface, Arc<ExecutionContext>, ComponentHandle) {
        let ec = Arc::new(ExecutionContext::triggered("ctl"));
        let handle = ec.attach(Arc::new(Mutex::new(Idle))).expect("attach");
        let surface = ControlSurface::new(Arc::new(ConfigSetRegistry::new()));
        assert_eq!(surface.bind("idle", Arc::clone(&ec), handle), ReturnCode::Ok);
        (surface, ec, handle)
    }

    #[test]
    fn test_lifecycle_codes() {
        let (surface, _ec, _h) = surface();
        assert_eq!(surface.activate("idle"), ReturnCode::Ok);
        assert_eq!(surface.get_component_state("idle"), Ok(LifecycleState::Active));
        assert_eq!(surface.activate("idle"), ReturnCode::PreconditionNotMet);
        assert_eq!(surface.deactivate("idle"), ReturnCode::Ok);
        assert_eq!(surface.reset("idle"), ReturnCode::PreconditionNotMet);
        assert_eq!(surface.activate("ghost"), ReturnCode::BadParameter);
    }

    #[test]
    fn test_bind_validation() {
        let (surface, ec, handle) = surface();
        assert_eq!(surface.bind("idle", Arc::clone(&ec), handle), ReturnCode::PreconditionNotMet);
        assert_eq!(surface.bind("", Arc::clone(&ec), handle), ReturnCode::BadParameter);

        let other = Arc::new(ExecutionContext::triggered("other"));
        assert_eq!(surface.bind("x", other, handle), ReturnCode::BadParameter);

        assert_eq!(surface.unbind("idle"), ReturnCode::Ok);
        assert_eq!(surface.unbind("idle"), ReturnCode::BadParameter);
        assert!(surface.component_ids().is_empty());
    }

    #[test]
    fn test_configuration_codes() {
        let (surface, _ec, _h) = surface();
        assert_eq!(
            surface.get_active_configuration_set().map(|s| s.id().to_string()),
            Err(ReturnCode::PreconditionNotMet)
        );
        assert_eq!(surface.add_configuration_set(ConfigSet::new("a")), ReturnCode::Ok);
        assert_eq!(
            surface.add_configuration_set(ConfigSet::new("a")),
            ReturnCode::BadParameter
        );
        assert_eq!(surface.activate_configuration_set("missing"), ReturnCode::BadParameter);
        assert_eq!(surface.activate_configuration_set("a"), ReturnCode::Ok);

        let values = vec![("k".to_string(), "v".to_string())];
        assert_eq!(surface.set_configuration_set_values("a", &values), ReturnCode::Ok);
        let active = surface.get_active_configuration_set().expect("active");
        assert_eq!(active.get("k"), Some("v"));

        assert_eq!(surface.remove_configuration_set("a"), ReturnCode::BadParameter);
        assert_eq!(surface.get_configuration_sets().len(), 1);
    }

    #[test]
    fn test_context_error_mapping() {
        assert_eq!(ReturnCode::from(ContextError::Unsupported), ReturnCode::Unsupported);
        assert_eq!(
            ReturnCode::from(ContextError::ThreadSpawn(std::io::Error::other("no threads"))),
            ReturnCode::OutOfResources
        );
        assert_eq!(ReturnCode::from(ConfigError::NotAvailable), ReturnCode::PreconditionNotMet);
    }
}
