//! A host bridge that runs WebAssembly modules built by the Go toolchain
//! for `GOOS=js GOARCH=wasm` on the Wasmer runtime.
//!
//! Such modules expect to be embedded in a JavaScript host: they import a
//! `"go"` namespace of support functions and talk to a synthetic global
//! object graph (`fs`, `process`, `crypto`, `fetch`, …) through NaN-boxed
//! value handles. This crate provides that namespace natively — no
//! JavaScript engine involved — backed by embedder-supplied capabilities:
//! a filesystem, stdio streams, clocks, randomness and an optional HTTP
//! transport.
//!
//! ```no_run
//! use wasmer::{Module, Store};
//! use wasmer_go_js::{Capture, GoJsEnv};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut store = Store::default();
//! let module = Module::new(&store, std::fs::read("main.wasm")?)?;
//!
//! let stdout = Capture::new();
//! GoJsEnv::builder("main")
//!     .arg("hello")
//!     .env("HOME", "/")
//!     .stdout(stdout.clone())
//!     .run_with_store(&module, &mut store)?;
//!
//! print!("{}", stdout.contents_string());
//! # Ok(())
//! # }
//! ```
//!
//! For finer control over instantiation, use the builder's
//! [`finalize`](GoJsEnvBuilder::finalize) and drive
//! [`GoJsFunctionEnv::import_object`], [`GoJsFunctionEnv::initialize`] and
//! [`GoJsFunctionEnv::run`] yourself.

mod args;
mod builtins;
mod env;
mod errors;
mod event;
mod fs;
mod mem;
mod process;
mod refs;
mod stdio;
mod syscalls;
mod table;
mod values;

pub mod http;
pub mod system;
pub mod vfs;

pub use crate::env::{GoJsEnv, GoJsEnvBuilder, GoJsFunctionEnv};
pub use crate::errors::{GoJsError, GoJsRunError, GoJsStateCreationError};
pub use crate::http::{HttpError, HttpRequest, HttpResponse, HttpTransport};
pub use crate::refs::{Ref, TypeFlag};
pub use crate::stdio::Capture;
pub use crate::syscalls::import_object;
pub use crate::system::{
    FixedClock, MonotonicClock, RandomSource, SeededRandom, SystemClock, SystemRandom, UserIdentity,
    WallClock,
};
pub use crate::vfs::{FileSystem, FsError, MemFs, OpenFile};

#[cfg(unix)]
pub use crate::vfs::HostFs;
