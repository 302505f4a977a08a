//! Semantics of the `runtime.*` imports: exit, low-level writes, clocks,
//! randomness and the (stubbed) timer events.

use tracing::{debug, trace, warn};
use wasmer::StoreMut;

use crate::env::GoJsEnv;
use crate::errors::GoJsError;
use crate::fs::FdEntry;
use crate::mem;
use crate::stdio;

pub(crate) fn wasm_exit(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let code = {
        let view = env.view(store)?;
        mem::read_u32(&view, sp as u64 + 8)?
    };
    debug!(code, "wasmExit");
    env.state().reset(code);
    Err(GoJsError::Exit(code))
}

pub(crate) fn wasm_write(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let view = env.view(store)?;
    let fd = mem::read_u64(&view, sp as u64 + 8)?;
    let ptr = mem::read_u64(&view, sp as u64 + 16)?;
    let len = mem::read_u32(&view, sp as u64 + 24)?;
    let bytes = mem::read_bytes(&view, ptr, len as usize)?;

    // No error path exists on this import; any failure is fatal.
    let mut state = env.state();
    match state.fds.get_mut(fd as u32) {
        Ok(FdEntry::Stdout(writer)) | Ok(FdEntry::Stderr(writer)) => {
            let writer = writer.clone();
            drop(state);
            stdio::lock(&writer).write_all(&bytes)?;
            Ok(())
        }
        Ok(FdEntry::File(file)) => {
            let mut written = 0;
            while written < bytes.len() {
                let n = file
                    .write(&bytes[written..])
                    .map_err(|err| GoJsError::protocol(format!("wasmWrite to fd {fd}: {err}")))?;
                if n == 0 {
                    return Err(GoJsError::protocol(format!(
                        "wasmWrite to fd {fd}: wrote nothing"
                    )));
                }
                written += n;
            }
            Ok(())
        }
        Ok(FdEntry::Stdin(_)) | Err(_) => Err(GoJsError::protocol(format!(
            "wasmWrite to invalid fd {fd}"
        ))),
    }
}

pub(crate) fn reset_memory_data_view(
    _env: &GoJsEnv,
    _store: &mut StoreMut<'_>,
    _sp: u32,
) -> Result<(), GoJsError> {
    // Memory is re-read on every host call; nothing is cached.
    trace!("resetMemoryDataView");
    Ok(())
}

pub(crate) fn nanotime1(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let nanos = env.config.monotonic.nanotime();
    let view = env.view(store)?;
    mem::write_u64(&view, sp as u64 + 8, nanos as u64)
}

pub(crate) fn walltime(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let (sec, nsec) = env.config.wall.now();
    let view = env.view(store)?;
    mem::write_u64(&view, sp as u64 + 8, sec as u64)?;
    mem::write_u32(&view, sp as u64 + 16, nsec as u32)
}

pub(crate) fn schedule_timeout_event(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let view = env.view(store)?;
    let delay_ms = mem::read_u64(&view, sp as u64 + 8)?;

    // Timer delivery is not implemented: the id is minted but never fires.
    let id = {
        let mut state = env.state();
        let id = state.next_timeout_id;
        state.next_timeout_id += 1;
        id
    };
    warn!(delay_ms, id, "scheduleTimeoutEvent is stubbed; the event will never fire");
    mem::write_u32(&view, sp as u64 + 16, id)
}

pub(crate) fn clear_timeout_event(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let view = env.view(store)?;
    let id = mem::read_u32(&view, sp as u64 + 8)?;
    trace!(id, "clearTimeoutEvent");
    Ok(())
}

pub(crate) fn get_random_data(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    let view = env.view(store)?;
    let ptr = mem::read_u64(&view, sp as u64 + 8)?;
    let len = mem::read_u64(&view, sp as u64 + 16)?;

    let mut buffer = vec![0u8; len as usize];
    env.config.random.fill(&mut buffer)?;
    mem::write_bytes(&view, ptr, &buffer)
}

pub(crate) fn debug(
    _env: &GoJsEnv,
    _store: &mut StoreMut<'_>,
    sp: u32,
) -> Result<(), GoJsError> {
    debug!(sp, "guest debug");
    Ok(())
}
