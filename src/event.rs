//! The host→guest callback protocol.
//!
//! A guest-minted [`FuncWrapper`] is invoked by parking an [`Event`] in the
//! instance's single pending slot and re-entering the guest through its
//! `resume` export. Inside `resume` the guest reads `go._pendingEvent`,
//! clears it, runs the Go function, writes `event.result` and returns; the
//! host then reads the result straight off the event it still holds. Nested
//! host calls issued from inside `resume` run this same protocol
//! recursively, so the native call stack is the event stack.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;
use wasmer::StoreMut;

use crate::env::GoJsEnv;
use crate::errors::GoJsError;
use crate::values::{JsValue, ObjectArray};

/// A numeric callback handle minted by the guest via
/// `go._makeFuncWrapper(id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncWrapper {
    pub id: u32,
}

/// The single-slot message delivered through `go._pendingEvent`.
#[derive(Debug)]
pub struct Event {
    /// The guest-side callback id.
    pub id: u32,
    pub this: JsValue,
    pub args: Arc<ObjectArray>,
    /// Write-once slot the guest fills via `valueSet(event, "result", x)`.
    pub result: Mutex<Option<JsValue>>,
}

impl Event {
    pub(crate) fn result(&self) -> JsValue {
        self.lock_result().clone().unwrap_or(JsValue::Undefined)
    }

    pub(crate) fn set_result(&self, value: JsValue) {
        *self.lock_result() = Some(value);
    }

    fn lock_result(&self) -> MutexGuard<'_, Option<JsValue>> {
        self.result.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Invokes a guest callback and returns what the guest wrote to
/// `event.result`.
///
/// While an event is pending no second event may be raised; the guest
/// clears the slot before running the callback body, so nested invocations
/// from inside `resume` are fine.
pub(crate) fn invoke(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    func: &FuncWrapper,
    this: JsValue,
    args: Vec<JsValue>,
) -> Result<JsValue, GoJsError> {
    let event = Arc::new(Event {
        id: func.id,
        this,
        args: Arc::new(ObjectArray::new(args)),
        result: Mutex::new(None),
    });

    {
        let mut state = env.state();
        if state.pending_event.is_some() {
            return Err(GoJsError::protocol(
                "a callback event is already pending; the guest has not consumed it",
            ));
        }
        state.pending_event = Some(event.clone());
    }

    trace!(id = func.id, "resuming guest for callback");
    let resume = env.guest()?.resume.clone();
    if let Err(trap) = resume.call(store) {
        return Err(GoJsError::from_trap(trap));
    }

    Ok(event.result())
}
