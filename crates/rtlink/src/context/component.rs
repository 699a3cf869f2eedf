// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Component callback interface.

use super::ContextId;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Failure reported by a component callback (or a caught panic).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(format!("panicked: {detail}"))
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CallbackError {}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Result of every component callback.
pub type CallbackResult = Result<(), CallbackError>;

/// A schedulable unit of work.
///
/// Only [`on_execute`](Self::on_execute) is required; every other hook
/// defaults to success. Hooks receive the id of the calling context, so one
/// component attached to several contexts can tell them apart.
///
/// Callbacks must not call control operations of the context that is
/// invoking them.
pub trait Component: Send {
    /// Called once by `attach`. Failure aborts the attach.
    fn on_initialize(&mut self) -> CallbackResult {
        Ok(())
    }

    /// Called exactly once by `detach`.
    fn on_finalize(&mut self) -> CallbackResult {
        Ok(())
    }

    fn on_startup(&mut self, _ec: ContextId) -> CallbackResult {
        Ok(())
    }

    fn on_shutdown(&mut self, _ec: ContextId) -> CallbackResult {
        Ok(())
    }

    fn on_activated(&mut self, _ec: ContextId) -> CallbackResult {
        Ok(())
    }

    fn on_deactivated(&mut self, _ec: ContextId) -> CallbackResult {
        Ok(())
    }

    /// Called once when the component enters `Error`.
    fn on_aborting(&mut self, _ec: ContextId) -> CallbackResult {
        Ok(())
    }

    /// Called every cycle while the component is in `Error`.
    fn on_error(&mut self, _ec: ContextId) -> CallbackResult {
        Ok(())
    }

    /// Called by `reset`; success moves the component back to `Inactive`.
    fn on_reset(&mut self, _ec: ContextId) -> CallbackResult {
        Ok(())
    }

    fn on_rate_changed(&mut self, _ec: ContextId) -> CallbackResult {
        Ok(())
    }

    /// Called every cycle while the component is `Active`.
    fn on_execute(&mut self, ec: ContextId) -> CallbackResult;
}

/// Component shared between the caller and one or more contexts.
pub type SharedComponent = Arc<Mutex<dyn Component>>;

/// Run one hook under the component lock, converting a panic into an error.
pub(crate) fn invoke<F>(component: &SharedComponent, hook: F) -> CallbackResult
where
    F: FnOnce(&mut dyn Component) -> CallbackResult,
{
    let mut guard = component.lock();
    match panic::catch_unwind(AssertUnwindSafe(|| hook(&mut *guard))) {
        Ok(result) => result,
        Err(payload) => Err(CallbackError::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Panicky;

    impl Component for Panicky {
        fn on_execute(&mut self, _ec: ContextId) -> CallbackResult {
            panic!("boom");
        }
    }

    struct Plain;

    impl Component for Plain {
        fn on_execute(&mut self, _ec: ContextId) -> CallbackResult {
            Err("bad input".into())
        }
    }

    #[test]
    fn test_invoke_catches_panic() {
        let component: SharedComponent = Arc::new(Mutex::new(Panicky));
        let err = invoke(&component, |c| c.on_execute(ContextId::next()))
            .expect_err("panic converted");
        assert_eq!(err.message(), "panicked: boom");

        // Lock is usable after the panic
        assert!(invoke(&component, |c| c.on_reset(ContextId::next())).is_ok());
    }

    #[test]
    fn test_invoke_passes_errors() {
        let component: SharedComponent = Arc::new(Mutex::new(Plain));
        let err = invoke(&component, |c| c.on_execute(ContextId::next())).expect_err("error");
        assert_eq!(err, CallbackError::new("bad input"));
        assert!(invoke(&component, |c| c.on_initialize()).is_ok());
    }

    #[test]
    fn test_panic_payload_kinds() {
        let owned = CallbackError::from_panic(Box::new(String::from("owned")));
        assert_eq!(owned.message(), "panicked: owned");
        let other = CallbackError::from_panic(Box::new(42u32));
        assert_eq!(other.message(), "panicked: non-string panic payload");
    }
}
