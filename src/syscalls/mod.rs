//! The `"go"` import namespace.
//!
//! Every import shares one wasm signature, `(i32 sp) -> ()`: the real
//! parameters live in linear memory at `sp+8, sp+16, …` and the proxies
//! here unpack them before handing off to the semantic layers in
//! [`js`] and [`runtime`].

pub(crate) mod js;
pub(crate) mod runtime;

use wasmer::{imports, AsStoreMut, Function, FunctionEnv, FunctionEnvMut, Imports};

use crate::env::GoJsEnv;
use crate::errors::GoJsError;

/// Wraps a semantic handler into a typed `(sp: i32)` host function.
macro_rules! go_import {
    ($store:expr, $env:expr, $handler:path) => {{
        fn proxy(mut ctx: FunctionEnvMut<GoJsEnv>, sp: i32) -> Result<(), GoJsError> {
            let env = ctx.data().clone();
            let mut store = ctx.as_store_mut();
            $handler(&env, &mut store, sp as u32)
        }
        Function::new_typed_with_env(&mut *$store, $env, proxy)
    }};
}

/// Builds the import object a Go `js/wasm` module links against.
pub fn import_object(store: &mut impl AsStoreMut, env: &FunctionEnv<GoJsEnv>) -> Imports {
    imports! {
        "go" => {
            "runtime.wasmExit" => go_import!(store, env, runtime::wasm_exit),
            "runtime.wasmWrite" => go_import!(store, env, runtime::wasm_write),
            "runtime.resetMemoryDataView" => go_import!(store, env, runtime::reset_memory_data_view),
            "runtime.nanotime1" => go_import!(store, env, runtime::nanotime1),
            "runtime.walltime" => go_import!(store, env, runtime::walltime),
            "runtime.scheduleTimeoutEvent" => go_import!(store, env, runtime::schedule_timeout_event),
            "runtime.clearTimeoutEvent" => go_import!(store, env, runtime::clear_timeout_event),
            "runtime.getRandomData" => go_import!(store, env, runtime::get_random_data),
            "syscall/js.finalizeRef" => go_import!(store, env, js::finalize_ref),
            "syscall/js.stringVal" => go_import!(store, env, js::string_val),
            "syscall/js.valueGet" => go_import!(store, env, js::value_get),
            "syscall/js.valueSet" => go_import!(store, env, js::value_set),
            "syscall/js.valueDelete" => go_import!(store, env, js::value_delete),
            "syscall/js.valueIndex" => go_import!(store, env, js::value_index),
            "syscall/js.valueSetIndex" => go_import!(store, env, js::value_set_index),
            "syscall/js.valueCall" => go_import!(store, env, js::value_call),
            "syscall/js.valueInvoke" => go_import!(store, env, js::value_invoke),
            "syscall/js.valueNew" => go_import!(store, env, js::value_new),
            "syscall/js.valueLength" => go_import!(store, env, js::value_length),
            "syscall/js.valuePrepareString" => go_import!(store, env, js::value_prepare_string),
            "syscall/js.valueLoadString" => go_import!(store, env, js::value_load_string),
            "syscall/js.valueInstanceOf" => go_import!(store, env, js::value_instance_of),
            "syscall/js.copyBytesToGo" => go_import!(store, env, js::copy_bytes_to_go),
            "syscall/js.copyBytesToJS" => go_import!(store, env, js::copy_bytes_to_js),
            "debug" => go_import!(store, env, runtime::debug),
        }
    }
}
