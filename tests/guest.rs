//! Integration tests driving the real `"go"` import object with small
//! wat-built guests.
//!
//! A Go-built module is too heavy for a test fixture, so these guests are
//! hand-written wat that speaks the same ABI: parameters in linear memory
//! at `sp+8`, the `mem`/`run`/`resume`/`getsp` export set, and NaN-boxed
//! refs for values.

use std::sync::Arc;

use wasmer::{wat2wasm, Instance, Module, Store};
use wasmer_go_js::{
    Capture, FixedClock, GoJsEnv, GoJsEnvBuilder, GoJsError, GoJsFunctionEnv, GoJsRunError,
    SeededRandom,
};

const SP: u32 = 16384;

struct Guest {
    store: Store,
    instance: Instance,
    func_env: GoJsFunctionEnv,
}

impl Guest {
    /// Compiles `wat`, instantiates it against the bridge and binds exports.
    fn new(wat: &str, builder: GoJsEnvBuilder) -> anyhow::Result<Self> {
        let mut store = Store::default();
        let module = Module::new(&store, wat2wasm(wat.as_bytes())?)?;
        let func_env = builder.finalize(&mut store)?;
        let imports = func_env.import_object(&mut store);
        let instance = Instance::new(&mut store, &module, &imports)?;
        func_env.initialize(&mut store, &instance)?;
        Ok(Self {
            store,
            instance,
            func_env,
        })
    }

    fn run(&mut self) -> Result<(), GoJsRunError> {
        self.func_env.run(&mut self.store)
    }

    fn read_memory(&self, addr: u64, len: usize) -> Vec<u8> {
        let memory = self.instance.exports.get_memory("mem").unwrap();
        let mut buf = vec![0u8; len];
        memory.view(&self.store).read(addr, &mut buf).unwrap();
        buf
    }
}

/// The standard export block every test guest carries.
fn exports_block() -> String {
    format!(
        r#"
  (memory (export "mem") 1)
  (func (export "resume"))
  (func (export "getsp") (result i32) (i32.const {SP}))
"#
    )
}

#[test]
fn instantiates_against_the_full_import_surface() -> anyhow::Result<()> {
    // One import of each name; a module that links is a module whose host
    // surface is complete.
    let imports = [
        "runtime.wasmExit",
        "runtime.wasmWrite",
        "runtime.resetMemoryDataView",
        "runtime.nanotime1",
        "runtime.walltime",
        "runtime.scheduleTimeoutEvent",
        "runtime.clearTimeoutEvent",
        "runtime.getRandomData",
        "syscall/js.finalizeRef",
        "syscall/js.stringVal",
        "syscall/js.valueGet",
        "syscall/js.valueSet",
        "syscall/js.valueDelete",
        "syscall/js.valueIndex",
        "syscall/js.valueSetIndex",
        "syscall/js.valueCall",
        "syscall/js.valueInvoke",
        "syscall/js.valueNew",
        "syscall/js.valueLength",
        "syscall/js.valuePrepareString",
        "syscall/js.valueLoadString",
        "syscall/js.valueInstanceOf",
        "syscall/js.copyBytesToGo",
        "syscall/js.copyBytesToJS",
        "debug",
    ];
    let import_decls: String = imports
        .iter()
        .enumerate()
        .map(|(i, name)| format!("  (import \"go\" \"{name}\" (func $f{i} (param i32)))\n"))
        .collect();
    let wat = format!(
        "(module\n{import_decls}{}\n  (func (export \"run\") (param i32 i32)))",
        exports_block()
    );

    let mut guest = Guest::new(&wat, GoJsEnv::builder("test"))?;
    guest.run()?;
    Ok(())
}

#[test]
fn wasm_exit_codes_propagate() -> anyhow::Result<()> {
    let wat = |code: u32| {
        format!(
            r#"(module
  (import "go" "runtime.wasmExit" (func $exit (param i32)))
{}
  (func (export "run") (param i32 i32)
    (i32.store (i32.const {code_addr}) (i32.const {code}))
    (call $exit (i32.const {SP}))))"#,
            exports_block(),
            code_addr = SP + 8,
        )
    };

    let mut clean = Guest::new(&wat(0), GoJsEnv::builder("test"))?;
    clean.run()?;
    assert_eq!(clean.func_env.exit_code(&clean.store), Some(0));

    let mut failing = Guest::new(&wat(7), GoJsEnv::builder("test"))?;
    match failing.run() {
        Err(GoJsRunError::Exit(7)) => {}
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(failing.func_env.exit_code(&failing.store), Some(7));
    Ok(())
}

#[test]
fn wasm_write_reaches_stdout_and_stderr() -> anyhow::Result<()> {
    let wat = format!(
        r#"(module
  (import "go" "runtime.wasmWrite" (func $write (param i32)))
  (import "go" "runtime.wasmExit" (func $exit (param i32)))
{}
  (data (i32.const 20000) "hello\n")
  (data (i32.const 20016) "oops\n")
  (func $emit (param $fd i64) (param $ptr i64) (param $len i32)
    (i64.store (i32.const {p0}) (local.get $fd))
    (i64.store (i32.const {p1}) (local.get $ptr))
    (i32.store (i32.const {p2}) (local.get $len))
    (call $write (i32.const {SP})))
  (func (export "run") (param i32 i32)
    (call $emit (i64.const 1) (i64.const 20000) (i32.const 6))
    (call $emit (i64.const 2) (i64.const 20016) (i32.const 5))
    (i32.store (i32.const {p0}) (i32.const 0))
    (call $exit (i32.const {SP}))))"#,
        exports_block(),
        p0 = SP + 8,
        p1 = SP + 16,
        p2 = SP + 24,
    );

    let stdout = Capture::new();
    let stderr = Capture::new();
    let mut guest = Guest::new(
        &wat,
        GoJsEnv::builder("test")
            .stdout(stdout.clone())
            .stderr(stderr.clone()),
    )?;
    guest.run()?;

    assert_eq!(stdout.contents_string(), "hello\n");
    assert_eq!(stderr.contents_string(), "oops\n");
    Ok(())
}

#[test]
fn argv_and_environ_are_laid_out_before_run() -> anyhow::Result<()> {
    let wat = format!(
        r#"(module
  (import "go" "runtime.wasmExit" (func $exit (param i32)))
{}
  (global $argc (mut i32) (i32.const -1))
  (global $argv (mut i32) (i32.const -1))
  (func (export "run") (param $argc i32) (param $argv i32)
    (global.set $argc (local.get $argc))
    (global.set $argv (local.get $argv))
    (i32.store (i32.const {code_addr}) (i32.const 0))
    (call $exit (i32.const {SP})))
  (export "argc" (global $argc))
  (export "argv" (global $argv)))"#,
        exports_block(),
        code_addr = SP + 8,
    );

    let mut guest = Guest::new(
        &wat,
        GoJsEnv::builder("test")
            .arg("argsenv")
            .env("c", "d")
            .env("a", "b"),
    )?;
    guest.run()?;

    let argc = guest
        .instance
        .exports
        .get_global("argc")?
        .get(&mut guest.store)
        .unwrap_i32();
    let argv = guest
        .instance
        .exports
        .get_global("argv")?
        .get(&mut guest.store)
        .unwrap_i32() as u64;
    assert_eq!(argc, 2);
    assert_eq!(argv % 8, 0);

    // Strings: each NUL-terminated and 8-byte padded, starting at 4096.
    assert_eq!(guest.read_memory(4096, 8), b"test\0\0\0\0");
    assert_eq!(guest.read_memory(4104, 8), b"argsenv\0");
    assert_eq!(guest.read_memory(4112, 8), b"c=d\0\0\0\0\0");
    assert_eq!(guest.read_memory(4120, 8), b"a=b\0\0\0\0\0");

    // Pointer array: argv entries, NUL, environ entries (insertion order),
    // NUL.
    let words: Vec<u64> = guest
        .read_memory(argv, 6 * 8)
        .chunks(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect();
    assert_eq!(words, [4096, 4104, 0, 4112, 4120, 0]);
    Ok(())
}

#[test]
fn get_random_data_is_deterministic_with_a_seeded_source() -> anyhow::Result<()> {
    let wat = format!(
        r#"(module
  (import "go" "runtime.getRandomData" (func $random (param i32)))
  (import "go" "runtime.wasmExit" (func $exit (param i32)))
{}
  (func (export "run") (param i32 i32)
    (i64.store (i32.const {p0}) (i64.const 24000))
    (i64.store (i32.const {p1}) (i64.const 5))
    (call $random (i32.const {SP}))
    (i32.store (i32.const {p0}) (i32.const 0))
    (call $exit (i32.const {SP}))))"#,
        exports_block(),
        p0 = SP + 8,
        p1 = SP + 16,
    );

    let mut first = Guest::new(
        &wat,
        GoJsEnv::builder("test").random_source(Arc::new(SeededRandom::new(7))),
    )?;
    first.run()?;
    let mut second = Guest::new(
        &wat,
        GoJsEnv::builder("test").random_source(Arc::new(SeededRandom::new(7))),
    )?;
    second.run()?;

    let a = first.read_memory(24000, 5);
    let b = second.read_memory(24000, 5);
    assert_eq!(a, b);

    let mut expected = [0u8; 5];
    use wasmer_go_js::RandomSource;
    SeededRandom::new(7).fill(&mut expected)?;
    assert_eq!(a, expected);
    Ok(())
}

#[test]
fn clocks_come_from_the_configured_sources() -> anyhow::Result<()> {
    let wat = format!(
        r#"(module
  (import "go" "runtime.walltime" (func $walltime (param i32)))
  (import "go" "runtime.nanotime1" (func $nanotime (param i32)))
  (import "go" "runtime.wasmExit" (func $exit (param i32)))
{}
  (func (export "run") (param i32 i32)
    (call $walltime (i32.const {SP}))
    ;; move (sec, nsec) out of the frame before the next call
    (i64.store (i32.const 24000) (i64.load (i32.const {p0})))
    (i32.store (i32.const 24008) (i32.load (i32.const {p1})))
    (call $nanotime (i32.const {SP}))
    (i64.store (i32.const 24016) (i64.load (i32.const {p0})))
    (i32.store (i32.const {p0}) (i32.const 0))
    (call $exit (i32.const {SP}))))"#,
        exports_block(),
        p0 = SP + 8,
        p1 = SP + 16,
    );

    let clock = Arc::new(FixedClock { sec: 42, nsec: 9 });
    let mut guest = Guest::new(
        &wat,
        GoJsEnv::builder("test")
            .wall_clock(clock.clone())
            .monotonic_clock(clock),
    )?;
    guest.run()?;

    let sec = u64::from_le_bytes(guest.read_memory(24000, 8).try_into().unwrap());
    let nsec = u32::from_le_bytes(guest.read_memory(24008, 4).try_into().unwrap());
    let nanos = u64::from_le_bytes(guest.read_memory(24016, 8).try_into().unwrap());
    assert_eq!((sec, nsec), (42, 9));
    assert_eq!(nanos, 42_000_000_009);
    Ok(())
}

#[test]
fn value_get_on_an_unknown_global_property_is_fatal() -> anyhow::Result<()> {
    // Ref of the predefined `global` object: object flag, id 5.
    let wat = format!(
        r#"(module
  (import "go" "syscall/js.valueGet" (func $get (param i32)))
{}
  (data (i32.const 20000) "nonsense")
  (func (export "run") (param i32 i32)
    (i64.store (i32.const {p0}) (i64.const 0x7FF8000100000005))
    (i64.store (i32.const {p1}) (i64.const 20000))
    (i64.store (i32.const {p2}) (i64.const 8))
    (call $get (i32.const {SP}))))"#,
        exports_block(),
        p0 = SP + 8,
        p1 = SP + 16,
        p2 = SP + 24,
    );

    let mut guest = Guest::new(&wat, GoJsEnv::builder("test"))?;
    match guest.run() {
        Err(GoJsRunError::Fatal(GoJsError::UnknownProperty { receiver, property })) => {
            assert_eq!(receiver, "global");
            assert_eq!(property, "nonsense");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    Ok(())
}

#[test]
fn value_call_dispatches_and_reports_results() -> anyhow::Result<()> {
    // process.umask(0o777) returns the previous umask (0o022 = 18.0) as a
    // passthrough double at the refreshed stack pointer.
    let wat = format!(
        r#"(module
  (import "go" "syscall/js.valueCall" (func $call (param i32)))
  (import "go" "runtime.wasmExit" (func $exit (param i32)))
{}
  (data (i32.const 20000) "umask")
  (func (export "run") (param i32 i32)
    ;; one argument: the number 511.0
    (i64.store (i32.const 21000) (i64.const 0x407FF00000000000))
    ;; receiver: predefined `process` (object flag, id 9)
    (i64.store (i32.const {p0}) (i64.const 0x7FF8000100000009))
    (i64.store (i32.const {p1}) (i64.const 20000))
    (i64.store (i32.const {p2}) (i64.const 5))
    (i64.store (i32.const {p3}) (i64.const 21000))
    (i64.store (i32.const {p4}) (i64.const 1))
    (call $call (i32.const {SP}))
    ;; stash (result, ok) and exit
    (i64.store (i32.const 24000) (i64.load (i32.const {res})))
    (i32.store (i32.const 24008) (i32.load8_u (i32.const {ok})))
    (i32.store (i32.const {p0}) (i32.const 0))
    (call $exit (i32.const {SP}))))"#,
        exports_block(),
        p0 = SP + 8,
        p1 = SP + 16,
        p2 = SP + 24,
        p3 = SP + 32,
        p4 = SP + 40,
        res = SP + 56,
        ok = SP + 64,
    );

    let mut guest = Guest::new(&wat, GoJsEnv::builder("test"))?;
    guest.run()?;

    let result = u64::from_le_bytes(guest.read_memory(24000, 8).try_into().unwrap());
    let ok = guest.read_memory(24008, 1)[0];
    assert_eq!(ok, 1);
    assert_eq!(f64::from_bits(result), 18.0);
    Ok(())
}

#[test]
fn byte_arrays_round_trip_through_copy_bytes() -> anyhow::Result<()> {
    // new Uint8Array(16); copyBytesToJS("abcdef"); copyBytesToGo back out.
    let wat = format!(
        r#"(module
  (import "go" "syscall/js.valueNew" (func $new (param i32)))
  (import "go" "syscall/js.copyBytesToJS" (func $tojs (param i32)))
  (import "go" "syscall/js.copyBytesToGo" (func $togo (param i32)))
  (import "go" "runtime.wasmExit" (func $exit (param i32)))
{}
  (data (i32.const 20000) "abcdef")
  (func (export "run") (param i32 i32)
    ;; new Uint8Array(16): ctor is predefined id 12 with the function flag
    (i64.store (i32.const 21000) (i64.const 0x4030000000000000)) ;; 16.0
    (i64.store (i32.const {p0}) (i64.const 0x7FF800040000000C))
    (i64.store (i32.const {p1}) (i64.const 21000))
    (i64.store (i32.const {p2}) (i64.const 1))
    (call $new (i32.const {SP}))
    ;; stash the new ref before result slots get reused
    (i64.store (i32.const 24000) (i64.load (i32.const {new_res})))

    ;; copyBytesToJS(buf, mem[20000..20006])
    (i64.store (i32.const {p0}) (i64.load (i32.const 24000)))
    (i64.store (i32.const {p1}) (i64.const 20000))
    (i64.store (i32.const {p2}) (i64.const 6))
    (i64.store (i32.const {p3}) (i64.const 6))
    (call $tojs (i32.const {SP}))
    (i64.store (i32.const 24016) (i64.load (i32.const {n_res})))

    ;; copyBytesToGo(mem[24032..24048], buf)
    (i64.store (i32.const {p0}) (i64.const 24032))
    (i64.store (i32.const {p1}) (i64.const 16))
    (i64.store (i32.const {p2}) (i64.const 16))
    (i64.store (i32.const {p3}) (i64.load (i32.const 24000)))
    (call $togo (i32.const {SP}))
    (i64.store (i32.const 24024) (i64.load (i32.const {n_res})))

    (i32.store (i32.const {p0}) (i32.const 0))
    (call $exit (i32.const {SP}))))"#,
        exports_block(),
        p0 = SP + 8,
        p1 = SP + 16,
        p2 = SP + 24,
        p3 = SP + 32,
        new_res = SP + 40,
        n_res = SP + 40,
    );

    let mut guest = Guest::new(&wat, GoJsEnv::builder("test"))?;
    guest.run()?;

    let to_js_n = u64::from_le_bytes(guest.read_memory(24016, 8).try_into().unwrap());
    let to_go_n = u64::from_le_bytes(guest.read_memory(24024, 8).try_into().unwrap());
    assert_eq!(to_js_n, 6);
    assert_eq!(to_go_n, 16);

    let copied = guest.read_memory(24032, 16);
    assert_eq!(&copied[..6], b"abcdef");
    assert_eq!(&copied[6..], &[0u8; 10]);
    Ok(())
}
