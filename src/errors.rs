//! The two error planes of the bridge.
//!
//! Recoverable filesystem/network failures are translated into guest-visible
//! error values (see [`crate::vfs::FsError`] and [`CallError::Throw`]) and
//! never unwind the guest. Everything in [`GoJsError`] is a fatal invariant
//! violation or an exit request: it crosses the engine boundary as a user
//! trap, exactly like the `ExitCode` pattern in Wasmer's `early-exit`
//! example, and is recovered by [`crate::GoJsFunctionEnv::run`] via
//! [`RuntimeError::downcast`].

use thiserror::Error;
use wasmer::{ExportError, InstantiationError, MemoryAccessError, RuntimeError};

use crate::values::JsValue;
use crate::vfs::FsError;

/// A fatal host-import failure, or a guest exit.
///
/// Returned by every typed host function of the `"go"` namespace; the engine
/// converts it into a trap that unwinds the guest.
#[derive(Debug, Error)]
pub enum GoJsError {
    /// The guest called `runtime.wasmExit`. Code 0 is mapped back to success
    /// by the outermost caller.
    #[error("guest exited with code {0}")]
    Exit(u32),

    /// A required read or write of guest linear memory was out of bounds.
    #[error("out-of-bounds guest memory access")]
    Memory(#[from] MemoryAccessError),

    /// A ref named an id with no live value in the table.
    #[error("no value registered for ref id {0}")]
    InvalidRef(u32),

    /// `valueGet` on a property the receiver does not define.
    #[error("{receiver} has no property \"{property}\"")]
    UnknownProperty {
        receiver: &'static str,
        property: String,
    },

    /// `valueCall` with a method the receiver does not define.
    #[error("{receiver} has no method \"{method}\"")]
    UnknownMethod {
        receiver: &'static str,
        method: String,
    },

    /// `valueSet` on a receiver/property pair that is not writable.
    #[error("{receiver} property \"{property}\" is not settable")]
    NotSettable {
        receiver: &'static str,
        property: String,
    },

    /// An import the current bridge intentionally does not implement.
    #[error("\"{0}\" is not supported")]
    UnsupportedImport(&'static str),

    /// The guest broke the host-call protocol (wrong argument type or count,
    /// an event raised while one is already pending, ...).
    #[error("host call protocol violation: {0}")]
    Protocol(String),

    /// A host import ran before `initialize` bound the guest exports.
    #[error("guest instance is not initialized")]
    NotInitialized,

    /// argv/environ do not fit the reserved data region.
    #[error("argv/environ region overflow: need {0} bytes")]
    ArgsTooLarge(usize),

    /// Writing to stdio or an open descriptor failed at the host.
    #[error("host i/o failure")]
    Io(#[from] std::io::Error),

    /// A re-entrant guest call (`resume`, `getsp`) trapped for a reason of
    /// its own.
    #[error(transparent)]
    Guest(RuntimeError),
}

impl GoJsError {
    /// Recovers the typed error a host import raised through a guest trap.
    pub(crate) fn from_trap(trap: RuntimeError) -> Self {
        match trap.downcast::<GoJsError>() {
            Ok(err) => err,
            Err(trap) => GoJsError::Guest(trap),
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        GoJsError::Protocol(msg.into())
    }
}

/// Outcome of running a guest to completion.
#[derive(Debug, Error)]
pub enum GoJsRunError {
    /// The guest exited with a non-zero code. Exit code 0 is `Ok(())`.
    #[error("guest exited with code {0}")]
    Exit(u32),

    /// A guest export (`mem`, `run`, `resume`, `getsp`) is missing or has
    /// the wrong type.
    #[error(transparent)]
    Export(#[from] ExportError),

    /// Instantiation against the generated import object failed.
    #[error(transparent)]
    Instantiation(#[from] Box<InstantiationError>),

    /// The bridge itself gave up on a fatal invariant violation.
    #[error(transparent)]
    Fatal(GoJsError),

    /// The guest trapped for a reason the bridge did not cause.
    #[error(transparent)]
    Runtime(RuntimeError),
}

impl GoJsRunError {
    /// The guest exit code, if the run ended in an explicit `wasmExit`.
    pub fn exit_code(&self) -> Option<u32> {
        match self {
            GoJsRunError::Exit(code) => Some(*code),
            _ => None,
        }
    }

    /// Classifies the trap coming out of the guest's `run` export.
    pub(crate) fn from_run_trap(trap: RuntimeError) -> Result<(), Self> {
        match GoJsError::from_trap(trap) {
            GoJsError::Exit(0) => Ok(()),
            GoJsError::Exit(code) => Err(GoJsRunError::Exit(code)),
            GoJsError::Guest(trap) => Err(GoJsRunError::Runtime(trap)),
            fatal => Err(GoJsRunError::Fatal(fatal)),
        }
    }
}

/// A configuration rejected before the guest ever runs.
#[derive(Debug, Error)]
pub enum GoJsStateCreationError {
    /// argv plus environ exceed the reserved `[4096, 12288)` guest region.
    #[error("argv/environ do not fit the reserved guest region ({need} > {max} bytes)")]
    EnvironOverflow { need: usize, max: usize },
}

/// Result of dispatching a `valueCall`/`valueNew` receiver method.
///
/// `Throw` is the JavaScript-exception path: the value is handed back to the
/// guest with `ok=0` and the guest turns it into a Go error. `Fatal` traps.
#[derive(Debug)]
pub(crate) enum CallError {
    Throw(JsValue),
    Fatal(GoJsError),
}

impl From<GoJsError> for CallError {
    fn from(err: GoJsError) -> Self {
        CallError::Fatal(err)
    }
}

impl From<MemoryAccessError> for CallError {
    fn from(err: MemoryAccessError) -> Self {
        CallError::Fatal(err.into())
    }
}

impl From<FsError> for CallError {
    fn from(err: FsError) -> Self {
        CallError::Throw(JsValue::error(err))
    }
}
