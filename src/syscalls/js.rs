//! Semantics of the `syscall/js.*` imports.
//!
//! Each entry point receives the guest stack pointer, unpacks its real
//! parameters from linear memory (8-byte slots starting at `sp+8`), runs
//! the polymorphic dispatch and writes results back. `valueCall` and
//! `valueNew` re-read the stack pointer through the guest's `getsp` export
//! before storing results, because dispatch may have re-entered the guest
//! and moved its stack.

use std::sync::Arc;

use tracing::trace;
use wasmer::{MemoryView, StoreMut};

use crate::builtins::Builtin;
use crate::env::GoJsEnv;
use crate::errors::{CallError, GoJsError};
use crate::event::FuncWrapper;
use crate::fs::mode::flags;
use crate::http;
use crate::mem;
use crate::process;
use crate::values::{coerce_string, ByteArray, JsDict, JsValue, ObjectArray};

pub(crate) fn finalize_ref(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let view = env.view(store)?;
    let r = mem::read_ref(&view, sp as u64 + 8)?;
    env.state().table.decrement(r.id())
}

pub(crate) fn string_val(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let view = env.view(store)?;
    let ptr = mem::read_u64(&view, sp as u64 + 8)?;
    let len = mem::read_u64(&view, sp as u64 + 16)?;
    let s = mem::read_string(&view, ptr, len)?;
    let r = env.store_ref(JsValue::string(s));
    mem::write_ref(&view, sp as u64 + 24, r)
}

pub(crate) fn value_get(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let view = env.view(store)?;
    let receiver = env.load_value(mem::read_ref(&view, sp as u64 + 8)?)?;
    let ptr = mem::read_u64(&view, sp as u64 + 16)?;
    let len = mem::read_u64(&view, sp as u64 + 24)?;
    let property = mem::read_string(&view, ptr, len)?;

    let result = get_property(env, &receiver, &property)?;
    trace!(receiver = receiver.kind(), %property, "valueGet");
    let r = env.store_ref(result);
    mem::write_ref(&view, sp as u64 + 32, r)
}

pub(crate) fn value_set(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let view = env.view(store)?;
    let receiver = env.load_value(mem::read_ref(&view, sp as u64 + 8)?)?;
    let ptr = mem::read_u64(&view, sp as u64 + 16)?;
    let len = mem::read_u64(&view, sp as u64 + 24)?;
    let property = mem::read_string(&view, ptr, len)?;
    let value = env.load_value(mem::read_ref(&view, sp as u64 + 32)?)?;

    trace!(receiver = receiver.kind(), %property, "valueSet");
    set_property(env, &receiver, &property, value)
}

pub(crate) fn value_delete(
    _env: &GoJsEnv,
    _store: &mut StoreMut<'_>,
    _sp: u32,
) -> Result<(), GoJsError> {
    Err(GoJsError::UnsupportedImport("syscall/js.valueDelete"))
}

pub(crate) fn value_index(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let view = env.view(store)?;
    let receiver = env.load_value(mem::read_ref(&view, sp as u64 + 8)?)?;
    let index = mem::read_u64(&view, sp as u64 + 16)? as usize;

    let element = match &receiver {
        JsValue::Array(array) => array.get(index).cloned().ok_or_else(|| {
            GoJsError::protocol(format!("index {index} out of range (len {})", array.len()))
        })?,
        other => {
            return Err(GoJsError::protocol(format!(
                "valueIndex on a {}",
                other.kind()
            )))
        }
    };
    let r = env.store_ref(element);
    mem::write_ref(&view, sp as u64 + 24, r)
}

pub(crate) fn value_set_index(
    _env: &GoJsEnv,
    _store: &mut StoreMut<'_>,
    _sp: u32,
) -> Result<(), GoJsError> {
    Err(GoJsError::UnsupportedImport("syscall/js.valueSetIndex"))
}

pub(crate) fn value_call(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let (receiver, method, args) = {
        let view = env.view(store)?;
        let receiver = env.load_value(mem::read_ref(&view, sp as u64 + 8)?)?;
        let ptr = mem::read_u64(&view, sp as u64 + 16)?;
        let len = mem::read_u64(&view, sp as u64 + 24)?;
        let method = mem::read_string(&view, ptr, len)?;
        let args = load_slice(env, &view, sp as u64 + 32)?;
        (receiver, method, args)
    };

    trace!(receiver = receiver.kind(), %method, "valueCall");
    let outcome = call_method(env, store, &receiver, &method, &args);

    // The dispatch may have re-entered the guest; results go to the
    // refreshed stack pointer.
    let sp = env.refresh_sp(store)?;
    let view = env.view(store)?;
    match outcome {
        Ok(value) => {
            let r = env.store_ref(value);
            mem::write_ref(&view, sp as u64 + 56, r)?;
            mem::write_u8(&view, sp as u64 + 64, 1)
        }
        Err(CallError::Throw(thrown)) => {
            let r = env.store_ref(thrown);
            mem::write_ref(&view, sp as u64 + 56, r)?;
            mem::write_u8(&view, sp as u64 + 64, 0)
        }
        Err(CallError::Fatal(fatal)) => Err(fatal),
    }
}

pub(crate) fn value_invoke(
    _env: &GoJsEnv,
    _store: &mut StoreMut<'_>,
    _sp: u32,
) -> Result<(), GoJsError> {
    Err(GoJsError::UnsupportedImport("syscall/js.valueInvoke"))
}

pub(crate) fn value_new(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let (ctor, args) = {
        let view = env.view(store)?;
        let ctor = env.load_value(mem::read_ref(&view, sp as u64 + 8)?)?;
        let args = load_slice(env, &view, sp as u64 + 16)?;
        (ctor, args)
    };

    trace!(ctor = ctor.kind(), "valueNew");
    let outcome = construct(&ctor, &args);

    let sp = env.refresh_sp(store)?;
    let view = env.view(store)?;
    match outcome {
        Ok(value) => {
            let r = env.store_ref(value);
            mem::write_ref(&view, sp as u64 + 40, r)?;
            mem::write_u8(&view, sp as u64 + 48, 1)
        }
        Err(CallError::Throw(thrown)) => {
            let r = env.store_ref(thrown);
            mem::write_ref(&view, sp as u64 + 40, r)?;
            mem::write_u8(&view, sp as u64 + 48, 0)
        }
        Err(CallError::Fatal(fatal)) => Err(fatal),
    }
}

pub(crate) fn value_length(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let view = env.view(store)?;
    let receiver = env.load_value(mem::read_ref(&view, sp as u64 + 8)?)?;
    let len = match &receiver {
        JsValue::Array(array) => array.len(),
        JsValue::Bytes(bytes) => bytes.len(),
        other => {
            return Err(GoJsError::protocol(format!(
                "valueLength on a {}",
                other.kind()
            )))
        }
    };
    mem::write_u64(&view, sp as u64 + 16, len as u64)
}

pub(crate) fn value_prepare_string(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let view = env.view(store)?;
    let value = env.load_value(mem::read_ref(&view, sp as u64 + 8)?)?;
    let s = coerce_string(&value)?;
    let len = s.len() as u64;
    let r = env.store_ref(JsValue::String(s));
    mem::write_ref(&view, sp as u64 + 16, r)?;
    mem::write_u64(&view, sp as u64 + 24, len)
}

pub(crate) fn value_load_string(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let view = env.view(store)?;
    let value = env.load_value(mem::read_ref(&view, sp as u64 + 8)?)?;
    let ptr = mem::read_u64(&view, sp as u64 + 16)?;
    let len = mem::read_u64(&view, sp as u64 + 24)? as usize;

    let s = value
        .as_str()
        .ok_or_else(|| GoJsError::protocol(format!("valueLoadString on a {}", value.kind())))?;
    let bytes = s.as_bytes();
    let n = bytes.len().min(len);
    mem::write_bytes(&view, ptr, &bytes[..n])
}

pub(crate) fn value_instance_of(
    _env: &GoJsEnv,
    _store: &mut StoreMut<'_>,
    _sp: u32,
) -> Result<(), GoJsError> {
    Err(GoJsError::UnsupportedImport("syscall/js.valueInstanceOf"))
}

pub(crate) fn copy_bytes_to_go(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let view = env.view(store)?;
    let dst_ptr = mem::read_u64(&view, sp as u64 + 8)?;
    let dst_len = mem::read_u64(&view, sp as u64 + 16)? as usize;
    let src = env.load_value(mem::read_ref(&view, sp as u64 + 32)?)?;

    match &src {
        JsValue::Bytes(bytes) => {
            let source = bytes.lock();
            let n = source.len().min(dst_len);
            mem::write_bytes(&view, dst_ptr, &source[..n])?;
            drop(source);
            mem::write_u64(&view, sp as u64 + 40, n as u64)?;
            mem::write_u8(&view, sp as u64 + 48, 1)
        }
        _ => mem::write_u8(&view, sp as u64 + 48, 0),
    }
}

pub(crate) fn copy_bytes_to_js(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let view = env.view(store)?;
    let dst = env.load_value(mem::read_ref(&view, sp as u64 + 8)?)?;
    let src_ptr = mem::read_u64(&view, sp as u64 + 16)?;
    let src_len = mem::read_u64(&view, sp as u64 + 24)? as usize;

    match &dst {
        JsValue::Bytes(bytes) => {
            let mut dest = bytes.lock();
            let n = dest.len().min(src_len);
            let source = mem::read_bytes(&view, src_ptr, n)?;
            dest[..n].copy_from_slice(&source);
            drop(dest);
            mem::write_u64(&view, sp as u64 + 40, n as u64)?;
            mem::write_u8(&view, sp as u64 + 48, 1)
        }
        _ => mem::write_u8(&view, sp as u64 + 48, 0),
    }
}

/// Reads a `(ptr, len)` slice of refs and decodes each element.
fn load_slice(
    env: &GoJsEnv,
    view: &MemoryView,
    addr: u64,
) -> Result<Vec<JsValue>, GoJsError> {
    let ptr = mem::read_u64(view, addr)?;
    let len = mem::read_u64(view, addr + 8)?;
    let mut values = Vec::with_capacity(len as usize);
    for i in 0..len {
        let r = mem::read_ref(view, ptr + 8 * i)?;
        values.push(env.load_value(r)?);
    }
    Ok(values)
}

/// `valueGet` dispatch.
fn get_property(env: &GoJsEnv, receiver: &JsValue, property: &str) -> Result<JsValue, GoJsError> {
    match receiver {
        JsValue::Builtin(builtin) => builtin_property(env, *builtin, property),
        JsValue::Event(event) => match property {
            "id" => Ok(JsValue::Number(event.id as f64)),
            "this" => Ok(event.this.clone()),
            "args" => Ok(JsValue::Array(event.args.clone())),
            _ => Err(unknown_property("event", property)),
        },
        JsValue::Error(error) => match property {
            "message" => Ok(JsValue::string(&error.message)),
            "code" => Ok(JsValue::string(error.code)),
            _ => Err(unknown_property("error", property)),
        },
        JsValue::Stat(stat) => stat.property(property),
        JsValue::Dict(dict) => dict
            .get(property)
            .ok_or_else(|| unknown_property("object", property)),
        JsValue::Bytes(bytes) => match property {
            "byteLength" => Ok(JsValue::Number(bytes.len() as f64)),
            _ => Err(unknown_property("Uint8Array", property)),
        },
        JsValue::FetchResult(result) => match property {
            "status" => Ok(JsValue::Number(result.status as f64)),
            "headers" => Ok(JsValue::ResponseHeaders(result.headers.clone())),
            "body" => Ok(JsValue::Undefined),
            _ => Err(unknown_property("fetch result", property)),
        },
        other => Err(unknown_property(other.kind(), property)),
    }
}

fn builtin_property(env: &GoJsEnv, builtin: Builtin, property: &str) -> Result<JsValue, GoJsError> {
    match builtin {
        Builtin::Global => match property {
            "Object" => Ok(JsValue::Builtin(Builtin::ObjectCtor)),
            "Array" => Ok(JsValue::Builtin(Builtin::ArrayCtor)),
            "crypto" => Ok(JsValue::Builtin(Builtin::Crypto)),
            "Uint8Array" => Ok(JsValue::Builtin(Builtin::Uint8ArrayCtor)),
            "Headers" => Ok(JsValue::Builtin(Builtin::HeadersCtor)),
            "process" => Ok(JsValue::Builtin(Builtin::Process)),
            "fs" => Ok(JsValue::Builtin(Builtin::Fs)),
            "Date" => Ok(JsValue::Builtin(Builtin::DateCtor)),
            // Feature-detected by the guest; absence reads as undefined.
            "AbortController" => Ok(JsValue::Undefined),
            "fetch" => Ok(if env.config.http.is_some() {
                JsValue::Builtin(Builtin::Fetch)
            } else {
                JsValue::Undefined
            }),
            _ => Err(unknown_property("global", property)),
        },
        Builtin::Go => match property {
            "_pendingEvent" => {
                let mut state = env.state();
                match state.pending_event.clone() {
                    Some(event) => {
                        state.last_event = Some(event.clone());
                        Ok(JsValue::Event(event))
                    }
                    None => Ok(JsValue::Null),
                }
            }
            _ => Err(unknown_property("go", property)),
        },
        Builtin::Fs => match property {
            "constants" => Ok(JsValue::Builtin(Builtin::FsConstants)),
            _ => Err(unknown_property("fs", property)),
        },
        Builtin::FsConstants => {
            let value = match property {
                "O_WRONLY" => flags::O_WRONLY,
                "O_RDWR" => flags::O_RDWR,
                "O_CREAT" => flags::O_CREAT,
                "O_TRUNC" => flags::O_TRUNC,
                "O_APPEND" => flags::O_APPEND,
                "O_EXCL" => flags::O_EXCL,
                "O_DIRECTORY" => flags::O_DIRECTORY,
                _ => return Err(unknown_property("fs.constants", property)),
            };
            Ok(JsValue::Number(value as f64))
        }
        Builtin::Process => match property {
            "pid" => Ok(JsValue::Number(1.0)),
            "ppid" => Ok(JsValue::Number(0.0)),
            _ => Err(unknown_property("process", property)),
        },
        other => Err(unknown_property(other.name(), property)),
    }
}

/// `valueSet` dispatch. Only three receivers are writable.
fn set_property(
    env: &GoJsEnv,
    receiver: &JsValue,
    property: &str,
    value: JsValue,
) -> Result<(), GoJsError> {
    match (receiver, property) {
        (JsValue::Builtin(Builtin::Go), "_pendingEvent") => {
            if !value.is_null_or_undefined() {
                return Err(GoJsError::protocol(
                    "go._pendingEvent may only be cleared by the guest",
                ));
            }
            env.state().pending_event = None;
            Ok(())
        }
        (JsValue::Event(event), "result") => {
            event.set_result(value);
            Ok(())
        }
        (JsValue::Dict(dict), _) => {
            dict.set(property, value);
            Ok(())
        }
        (other, _) => Err(GoJsError::NotSettable {
            receiver: other.kind(),
            property: property.to_owned(),
        }),
    }
}

/// `valueCall` dispatch.
fn call_method(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    receiver: &JsValue,
    method: &str,
    args: &[JsValue],
) -> Result<JsValue, CallError> {
    match receiver {
        JsValue::Builtin(Builtin::Go) => match method {
            "_makeFuncWrapper" => {
                let id = args
                    .first()
                    .and_then(JsValue::as_number)
                    .ok_or_else(|| GoJsError::protocol("_makeFuncWrapper expects an id"))?;
                Ok(JsValue::Func(Arc::new(FuncWrapper { id: id as u32 })))
            }
            other => Err(unknown_method("go", other).into()),
        },
        JsValue::Builtin(Builtin::Fs) => crate::fs::call(env, store, method, args),
        JsValue::Builtin(Builtin::Process) => process::call(env, method, args),
        JsValue::Builtin(Builtin::Crypto) => match method {
            "getRandomValues" => {
                let bytes = match args.first() {
                    Some(JsValue::Bytes(bytes)) => bytes.clone(),
                    _ => {
                        return Err(GoJsError::protocol(
                            "getRandomValues expects a Uint8Array",
                        )
                        .into())
                    }
                };
                let mut buffer = bytes.lock();
                env.config
                    .random
                    .fill(&mut buffer)
                    .map_err(GoJsError::Io)?;
                let n = buffer.len();
                drop(buffer);
                Ok(JsValue::Number(n as f64))
            }
            other => Err(unknown_method("crypto", other).into()),
        },
        JsValue::Builtin(Builtin::Date) => match method {
            // The bridge is UTC-only by design.
            "getTimezoneOffset" => Ok(JsValue::Number(0.0)),
            other => Err(unknown_method("Date instance", other).into()),
        },
        JsValue::Builtin(Builtin::Global) => match method {
            "fetch" => http::fetch(env, args),
            other => Err(unknown_method("global", other).into()),
        },
        JsValue::Stat(stat) => match method {
            "isDirectory" => Ok(JsValue::Bool(stat.is_dir)),
            other => Err(unknown_method("stat", other).into()),
        },
        JsValue::Headers(headers) => match method {
            "append" => {
                let name = args
                    .first()
                    .and_then(JsValue::as_str)
                    .ok_or_else(|| GoJsError::protocol("Headers.append expects a name"))?;
                let value = args
                    .get(1)
                    .and_then(JsValue::as_str)
                    .ok_or_else(|| GoJsError::protocol("Headers.append expects a value"))?;
                headers.append(name.to_owned(), value.to_owned());
                Ok(JsValue::Undefined)
            }
            other => Err(unknown_method("Headers", other).into()),
        },
        JsValue::FetchPromise(promise) => match method {
            "then" => http::fetch_then(env, store, promise, args),
            other => Err(unknown_method("fetch promise", other).into()),
        },
        JsValue::FetchResult(result) => match method {
            "arrayBuffer" => http::array_buffer(result),
            other => Err(unknown_method("fetch result", other).into()),
        },
        JsValue::ResponseHeaders(headers) => match method {
            "entries" => Ok(JsValue::ResponseHeaders(headers.clone())),
            "next" => Ok(headers.next_entry()),
            other => Err(unknown_method("response headers", other).into()),
        },
        JsValue::ArrayPromise(promise) => match method {
            "then" => http::array_then(env, store, promise, args),
            other => Err(unknown_method("arrayBuffer promise", other).into()),
        },
        other => Err(unknown_method(other.kind(), method).into()),
    }
}

/// `valueNew` dispatch, keyed on constructor identity.
fn construct(ctor: &JsValue, args: &[JsValue]) -> Result<JsValue, CallError> {
    match ctor {
        JsValue::Builtin(Builtin::ArrayCtor) => {
            Ok(JsValue::Array(Arc::new(ObjectArray::new(Vec::new()))))
        }
        JsValue::Builtin(Builtin::ObjectCtor) => Ok(JsValue::Dict(Arc::new(JsDict::new()))),
        JsValue::Builtin(Builtin::HeadersCtor) => {
            Ok(JsValue::Headers(Arc::new(Default::default())))
        }
        JsValue::Builtin(Builtin::DateCtor) => Ok(JsValue::Builtin(Builtin::Date)),
        JsValue::Builtin(Builtin::Uint8ArrayCtor) => match args.first() {
            None => Ok(JsValue::Bytes(Arc::new(ByteArray::zeroed(0)))),
            Some(JsValue::Number(len)) => {
                Ok(JsValue::Bytes(Arc::new(ByteArray::zeroed(*len as usize))))
            }
            // `new Uint8Array(arrayBuffer)` wraps the existing buffer.
            Some(JsValue::Bytes(bytes)) => Ok(JsValue::Bytes(bytes.clone())),
            Some(other) => Err(GoJsError::protocol(format!(
                "Uint8Array constructed from a {}",
                other.kind()
            ))
            .into()),
        },
        other => Err(GoJsError::protocol(format!("{} is not a constructor", other.kind())).into()),
    }
}

fn unknown_property(receiver: &'static str, property: &str) -> GoJsError {
    GoJsError::UnknownProperty {
        receiver,
        property: property.to_owned(),
    }
}

fn unknown_method(receiver: &'static str, method: &str) -> GoJsError {
    GoJsError::UnknownMethod {
        receiver,
        method: method.to_owned(),
    }
}
