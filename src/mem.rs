//! Bounds-checked little-endian access to guest linear memory.
//!
//! Every scalar the stack-pointer ABI moves is 8-byte-slotted and
//! little-endian; these helpers keep the `MemoryView::read`/`write` error
//! handling in one place.

use wasmer::MemoryView;

use crate::errors::GoJsError;
use crate::refs::Ref;

pub(crate) fn read_u8(view: &MemoryView, addr: u64) -> Result<u8, GoJsError> {
    let mut buf = [0u8; 1];
    view.read(addr, &mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_u32(view: &MemoryView, addr: u64) -> Result<u32, GoJsError> {
    let mut buf = [0u8; 4];
    view.read(addr, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64(view: &MemoryView, addr: u64) -> Result<u64, GoJsError> {
    let mut buf = [0u8; 8];
    view.read(addr, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_ref(view: &MemoryView, addr: u64) -> Result<Ref, GoJsError> {
    Ok(Ref(read_u64(view, addr)?))
}

pub(crate) fn read_bytes(view: &MemoryView, addr: u64, len: usize) -> Result<Vec<u8>, GoJsError> {
    let mut buf = vec![0u8; len];
    view.read(addr, &mut buf)?;
    Ok(buf)
}

/// Reads a guest `(ptr, len)` string. Go only ever writes UTF-8 here, so a
/// lossy decode never corrupts well-behaved guests.
pub(crate) fn read_string(view: &MemoryView, addr: u64, len: u64) -> Result<String, GoJsError> {
    let bytes = read_bytes(view, addr, len as usize)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub(crate) fn write_u8(view: &MemoryView, addr: u64, value: u8) -> Result<(), GoJsError> {
    view.write(addr, &[value])?;
    Ok(())
}

pub(crate) fn write_u32(view: &MemoryView, addr: u64, value: u32) -> Result<(), GoJsError> {
    view.write(addr, &value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_u64(view: &MemoryView, addr: u64, value: u64) -> Result<(), GoJsError> {
    view.write(addr, &value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_ref(view: &MemoryView, addr: u64, value: Ref) -> Result<(), GoJsError> {
    write_u64(view, addr, value.0)
}

pub(crate) fn write_bytes(view: &MemoryView, addr: u64, bytes: &[u8]) -> Result<(), GoJsError> {
    view.write(addr, bytes)?;
    Ok(())
}
