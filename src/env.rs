//! Per-instance environment, builder and run driver.
//!
//! The shapes mirror the WASI layer's `WasiEnv`/`WasiEnvBuilder`/
//! `WasiFunctionEnv` triple: a cheaply cloneable env handle lives inside a
//! `FunctionEnv` and is shared by every typed host function of one
//! instance; mutable state sits behind a mutex so re-entrant guest calls
//! (`resume` from inside a host import) never alias a `&mut`.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::debug;
use wasmer::{
    AsStoreMut, AsStoreRef, ExportError, FunctionEnv, Imports, Instance, Memory, MemoryView,
    Module, Store, TypedFunction,
};

use crate::args;
use crate::builtins;
use crate::errors::{GoJsError, GoJsRunError, GoJsStateCreationError};
use crate::event::Event;
use crate::fs::{path, FdTable};
use crate::http::HttpTransport;
use crate::refs::{id, Ref};
use crate::stdio::{self, SharedReader, SharedWriter};
use crate::system::{
    MonotonicClock, RandomSource, SystemClock, SystemRandom, UserIdentity, WallClock,
};
use crate::table::ValueTable;
use crate::values::JsValue;
use crate::vfs::{FileSystem, MemFs};

/// Immutable per-instance configuration.
pub(crate) struct GoJsConfig {
    pub(crate) args: Vec<String>,
    pub(crate) envs: Vec<(String, String)>,
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) http: Option<Arc<dyn HttpTransport>>,
    pub(crate) random: Arc<dyn RandomSource>,
    pub(crate) wall: Arc<dyn WallClock>,
    pub(crate) monotonic: Arc<dyn MonotonicClock>,
    pub(crate) identity: UserIdentity,
}

/// Mutable per-instance state, touched only while a host import runs.
pub(crate) struct GoJsState {
    pub(crate) table: ValueTable,
    pub(crate) fds: FdTable,
    pub(crate) cwd: String,
    pub(crate) umask: u32,
    pub(crate) pending_event: Option<Arc<Event>>,
    pub(crate) last_event: Option<Arc<Event>>,
    pub(crate) next_timeout_id: u32,
    pub(crate) exited: Option<u32>,
}

impl GoJsState {
    /// Clears everything on `wasmExit`: the table, open files, events.
    pub(crate) fn reset(&mut self, exit_code: u32) {
        self.table.reset();
        self.fds.clear_files();
        self.pending_event = None;
        self.last_event = None;
        self.exited = Some(exit_code);
    }
}

/// The guest exports the bridge drives.
pub(crate) struct GuestExports {
    pub(crate) memory: Memory,
    pub(crate) run: TypedFunction<(i32, i32), ()>,
    pub(crate) resume: TypedFunction<(), ()>,
    pub(crate) getsp: TypedFunction<(), i32>,
}

/// The environment handed to every `"go"` host import of one instance.
#[derive(Clone)]
pub struct GoJsEnv {
    pub(crate) config: Arc<GoJsConfig>,
    pub(crate) state: Arc<Mutex<GoJsState>>,
    pub(crate) guest: Arc<OnceLock<GuestExports>>,
}

impl GoJsEnv {
    /// Starts a builder with `program` as `argv[0]`.
    pub fn builder(program: impl Into<String>) -> GoJsEnvBuilder {
        GoJsEnvBuilder::new(program)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, GoJsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn guest(&self) -> Result<&GuestExports, GoJsError> {
        self.guest.get().ok_or(GoJsError::NotInitialized)
    }

    pub(crate) fn view<'a>(
        &self,
        store: &'a (impl AsStoreRef + ?Sized),
    ) -> Result<MemoryView<'a>, GoJsError> {
        Ok(self.guest()?.memory.view(store))
    }

    /// Re-reads the guest stack pointer after a call that may have grown the
    /// guest stack.
    pub(crate) fn refresh_sp(&self, store: &mut impl AsStoreMut) -> Result<u32, GoJsError> {
        let getsp = self.guest()?.getsp.clone();
        match getsp.call(store) {
            Ok(sp) => Ok(sp as u32),
            Err(trap) => Err(GoJsError::from_trap(trap)),
        }
    }

    /// Decodes a ref into a value: passthrough doubles, predefined ids, or
    /// a table lookup.
    pub(crate) fn load_value(&self, r: Ref) -> Result<JsValue, GoJsError> {
        if r == Ref::UNDEFINED {
            return Ok(JsValue::Undefined);
        }
        if let Some(float) = r.parse_float() {
            return Ok(JsValue::Number(float));
        }
        let value_id = r.id();
        if value_id < id::NEXT_ID {
            return builtins::predefined(value_id).ok_or(GoJsError::InvalidRef(value_id));
        }
        self.state().table.get(value_id)
    }

    /// Encodes a value into the tightest ref: predefined constants for
    /// scalars and builtins, passthrough for numbers, a table handle for
    /// everything else.
    pub(crate) fn store_ref(&self, value: JsValue) -> Ref {
        match value {
            JsValue::Undefined => Ref::UNDEFINED,
            JsValue::Null => crate::refs::VALUE_NULL,
            JsValue::Bool(true) => crate::refs::VALUE_TRUE,
            JsValue::Bool(false) => crate::refs::VALUE_FALSE,
            JsValue::Number(n) => Ref::from_f64(n),
            JsValue::Builtin(b) => b.to_ref(),
            other => {
                let flag = other.type_flag();
                let value_id = self.state().table.increment(other);
                Ref::boxed(value_id, flag)
            }
        }
    }

    /// Resolves a guest path against the current working directory.
    pub(crate) fn resolve_path(&self, p: &str) -> String {
        let state = self.state();
        path::resolve(&state.cwd, p)
    }
}

/// Builder for a [`GoJsEnv`], mirroring `WasiEnv::builder`.
pub struct GoJsEnvBuilder {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    stdin: SharedReader,
    stdout: SharedWriter,
    stderr: SharedWriter,
    fs: Arc<dyn FileSystem>,
    http: Option<Arc<dyn HttpTransport>>,
    random: Arc<dyn RandomSource>,
    wall: Arc<dyn WallClock>,
    monotonic: Arc<dyn MonotonicClock>,
    identity: UserIdentity,
    cwd: String,
}

impl GoJsEnvBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        let clock = Arc::new(SystemClock::new());
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            stdin: stdio::null_reader(),
            stdout: stdio::null_writer(),
            stderr: stdio::null_writer(),
            fs: Arc::new(MemFs::new()),
            http: None,
            random: Arc::new(SystemRandom),
            wall: clock.clone(),
            monotonic: clock,
            identity: UserIdentity::default(),
            cwd: "/".to_owned(),
        }
    }

    /// Appends a single program argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several program arguments.
    pub fn args<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends an environment variable; order is preserved.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Appends several environment variables.
    pub fn envs<K: Into<String>, V: Into<String>>(
        mut self,
        envs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.envs
            .extend(envs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn stdin(mut self, reader: impl std::io::Read + Send + 'static) -> Self {
        self.stdin = stdio::reader(reader);
        self
    }

    pub fn stdout(mut self, writer: impl std::io::Write + Send + 'static) -> Self {
        self.stdout = stdio::writer(writer);
        self
    }

    pub fn stderr(mut self, writer: impl std::io::Write + Send + 'static) -> Self {
        self.stderr = stdio::writer(writer);
        self
    }

    /// The filesystem the guest sees. Defaults to an empty [`MemFs`].
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Enables `fetch` by wiring in a transport.
    pub fn http_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.http = Some(transport);
        self
    }

    pub fn random_source(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn wall_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.wall = clock;
        self
    }

    pub fn monotonic_clock(mut self, clock: Arc<dyn MonotonicClock>) -> Self {
        self.monotonic = clock;
        self
    }

    /// The identity reported by `process.getuid` and friends. Defaults to
    /// all zeros.
    pub fn user_identity(mut self, identity: UserIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Reports the embedding process's own identity to the guest.
    pub fn use_host_identity(self) -> Self {
        let identity = UserIdentity::host();
        self.user_identity(identity)
    }

    /// The guest's initial working directory. Defaults to `/`.
    pub fn current_dir(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Starts the guest in the host process's working directory.
    pub fn use_host_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(dir) => {
                let cwd = dir.to_string_lossy().into_owned();
                self.current_dir(cwd)
            }
            Err(_) => self,
        }
    }

    /// Validates the configuration and registers the env in the store.
    pub fn finalize(
        self,
        store: &mut impl AsStoreMut,
    ) -> Result<GoJsFunctionEnv, GoJsStateCreationError> {
        let mut args = vec![self.program];
        args.extend(self.args);

        // Fail argv/environ overflow here rather than at run time.
        args::layout(&args, &self.envs)?;

        let config = Arc::new(GoJsConfig {
            args,
            envs: self.envs,
            fs: self.fs,
            http: self.http,
            random: self.random,
            wall: self.wall,
            monotonic: self.monotonic,
            identity: self.identity,
        });
        let state = GoJsState {
            table: ValueTable::new(),
            fds: FdTable::new(self.stdin, self.stdout, self.stderr),
            cwd: self.cwd,
            umask: 0o022,
            pending_event: None,
            last_event: None,
            next_timeout_id: 1,
            exited: None,
        };
        let env = GoJsEnv {
            config,
            state: Arc::new(Mutex::new(state)),
            guest: Arc::new(OnceLock::new()),
        };
        Ok(GoJsFunctionEnv {
            env: FunctionEnv::new(store, env),
        })
    }

    /// Convenience: finalize, instantiate, initialize and run in one go.
    pub fn run_with_store(self, module: &Module, store: &mut Store) -> Result<(), GoJsRunError> {
        let func_env = self
            .finalize(store)
            .map_err(|err| GoJsRunError::Fatal(GoJsError::protocol(err.to_string())))?;
        let imports = func_env.import_object(store);
        let instance = Instance::new(store, module, &imports)
            .map_err(|err| GoJsRunError::Instantiation(Box::new(err)))?;
        func_env.initialize(store, &instance)?;
        func_env.run(store)
    }
}

/// A finalized environment registered in a store.
pub struct GoJsFunctionEnv {
    pub env: FunctionEnv<GoJsEnv>,
}

impl GoJsFunctionEnv {
    /// The `"go"` namespace import object for this environment.
    pub fn import_object(&self, store: &mut impl AsStoreMut) -> Imports {
        crate::syscalls::import_object(store, &self.env)
    }

    /// Binds the guest exports (`mem`, `run`, `resume`, `getsp`).
    pub fn initialize(
        &self,
        store: &mut impl AsStoreMut,
        instance: &Instance,
    ) -> Result<(), ExportError> {
        let memory = instance.exports.get_memory("mem")?.clone();
        let run = instance.exports.get_typed_function(store, "run")?;
        let resume = instance.exports.get_typed_function(store, "resume")?;
        let getsp = instance.exports.get_typed_function(store, "getsp")?;

        let env = self.env.as_ref(store).clone();
        let _ = env.guest.set(GuestExports {
            memory,
            run,
            resume,
            getsp,
        });
        Ok(())
    }

    /// Writes argv/environ and invokes the guest's `run` export. Returns
    /// `Ok(())` on a clean exit (explicit code 0, or the guest parking
    /// itself with no event source left).
    pub fn run(&self, store: &mut impl AsStoreMut) -> Result<(), GoJsRunError> {
        let env = self.env.as_ref(store).clone();
        let guest = env.guest().map_err(GoJsRunError::Fatal)?;
        let run = guest.run.clone();

        let (argc, argv) = {
            let view = env.view(store).map_err(GoJsRunError::Fatal)?;
            args::write(&view, &env.config.args, &env.config.envs)
                .map_err(GoJsRunError::Fatal)?
        };

        debug!(argc, argv, "starting guest");
        match run.call(store, argc as i32, argv as i32) {
            Ok(()) => Ok(()),
            Err(trap) => GoJsRunError::from_run_trap(trap),
        }
    }

    /// The exit code recorded by `wasmExit`, if the guest exited.
    pub fn exit_code(&self, store: &impl AsStoreRef) -> Option<u32> {
        self.env.as_ref(store).state().exited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs;
    use crate::values::{ByteArray, ObjectArray};

    fn test_env() -> GoJsEnv {
        let clock = Arc::new(SystemClock::new());
        GoJsEnv {
            config: Arc::new(GoJsConfig {
                args: vec!["test".to_owned()],
                envs: Vec::new(),
                fs: Arc::new(MemFs::new()),
                http: None,
                random: Arc::new(SystemRandom),
                wall: clock.clone(),
                monotonic: clock,
                identity: UserIdentity::default(),
            }),
            state: Arc::new(Mutex::new(GoJsState {
                table: ValueTable::new(),
                fds: FdTable::new(
                    stdio::null_reader(),
                    stdio::null_writer(),
                    stdio::null_writer(),
                ),
                cwd: "/".to_owned(),
                umask: 0o022,
                pending_event: None,
                last_event: None,
                next_timeout_id: 1,
                exited: None,
            })),
            guest: Arc::new(OnceLock::new()),
        }
    }

    #[test]
    fn scalars_round_trip_without_the_table() {
        let env = test_env();
        for value in [
            JsValue::Undefined,
            JsValue::Null,
            JsValue::Bool(true),
            JsValue::Bool(false),
            JsValue::Number(0.0),
            JsValue::Number(f64::NAN),
            JsValue::Number(123.456),
            JsValue::Number(-1.0),
        ] {
            let r = env.store_ref(value.clone());
            assert_eq!(env.load_value(r).unwrap(), value);
        }
    }

    #[test]
    fn finite_nonzero_doubles_keep_their_bit_pattern() {
        let env = test_env();
        for x in [1.0_f64, -2.5, 1e-300, 4096.0] {
            let r = env.store_ref(JsValue::Number(x));
            assert_eq!(r.0, x.to_bits());
            assert_eq!(env.load_value(r).unwrap(), JsValue::Number(x));
        }
    }

    #[test]
    fn interned_values_round_trip_and_dedupe() {
        let env = test_env();
        let s = JsValue::string("hello");
        let a = env.store_ref(s.clone());
        let b = env.store_ref(s.clone());
        assert_eq!(a, b);
        assert_eq!(a.id(), refs::id::NEXT_ID);
        assert_eq!(env.load_value(a).unwrap(), s);

        let bytes = JsValue::Bytes(Arc::new(ByteArray::zeroed(4)));
        let r = env.store_ref(bytes.clone());
        assert_eq!(env.load_value(r).unwrap(), bytes);
        assert_ne!(r.id(), a.id());
    }

    #[test]
    fn type_flags_match_the_value_kind() {
        let env = test_env();
        let s = env.store_ref(JsValue::string("s"));
        assert_eq!(s.0 >> 32, (0x7FF8_0000 | 2) as u64);
        let arr = env.store_ref(JsValue::Array(Arc::new(ObjectArray::new(vec![]))));
        assert_eq!(arr.0 >> 32, (0x7FF8_0000 | 1) as u64);
    }

    #[test]
    fn predefined_refs_survive_a_reset() {
        let env = test_env();
        let interned = env.store_ref(JsValue::string("gone after reset"));
        env.state().reset(0);
        assert!(env.load_value(interned).is_err());
        assert_eq!(
            env.load_value(refs::GLOBAL).unwrap(),
            JsValue::Builtin(crate::builtins::Builtin::Global)
        );
        assert_eq!(env.load_value(refs::VALUE_NULL).unwrap(), JsValue::Null);
        assert_eq!(env.load_value(Ref::UNDEFINED).unwrap(), JsValue::Undefined);
    }

    #[test]
    fn builtins_encode_to_their_predefined_refs() {
        let env = test_env();
        let r = env.store_ref(JsValue::Builtin(crate::builtins::Builtin::Fs));
        assert_eq!(r, refs::FS);
        // Storing a builtin never touches the table.
        assert!(env.state().table.get(refs::id::NEXT_ID).is_err());
    }
}
