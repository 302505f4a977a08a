//! The `jsfs` bridge: the filesystem surface the guest's `syscall/js`
//! layer calls into.
//!
//! Every operation takes a trailing callback; the host performs the
//! filesystem work synchronously, then invokes the callback error-first
//! through the event protocol. End-of-file is not an error: reads at EOF
//! resolve with a zero count.

pub(crate) mod mode;
pub(crate) mod path;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;
use wasmer::StoreMut;

use crate::env::GoJsEnv;
use crate::errors::{CallError, GoJsError};
use crate::event::{self, FuncWrapper};
use crate::stdio::{self, SharedReader, SharedWriter};
use crate::values::{ByteArray, JsStat, JsValue, ObjectArray};
use crate::vfs::{FileKind, FileMode, FsError, FsResult, Metadata, OpenFile};

/// What a guest file descriptor points at.
pub(crate) enum FdEntry {
    Stdin(SharedReader),
    Stdout(SharedWriter),
    Stderr(SharedWriter),
    File(Box<dyn OpenFile>),
}

impl fmt::Debug for FdEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FdEntry::Stdin(_) => f.write_str("Stdin"),
            FdEntry::Stdout(_) => f.write_str("Stdout"),
            FdEntry::Stderr(_) => f.write_str("Stderr"),
            FdEntry::File(file) => write!(f, "File({file:?})"),
        }
    }
}

/// Guest descriptor table. 0/1/2 are preconnected to stdio; `insert` hands
/// out the lowest free descriptor at or above 3.
#[derive(Debug)]
pub(crate) struct FdTable {
    entries: BTreeMap<u32, FdEntry>,
}

impl FdTable {
    pub(crate) fn new(stdin: SharedReader, stdout: SharedWriter, stderr: SharedWriter) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(0, FdEntry::Stdin(stdin));
        entries.insert(1, FdEntry::Stdout(stdout));
        entries.insert(2, FdEntry::Stderr(stderr));
        Self { entries }
    }

    pub(crate) fn insert(&mut self, file: Box<dyn OpenFile>) -> u32 {
        let mut fd = 3;
        while self.entries.contains_key(&fd) {
            fd += 1;
        }
        self.entries.insert(fd, FdEntry::File(file));
        fd
    }

    pub(crate) fn get_mut(&mut self, fd: u32) -> FsResult<&mut FdEntry> {
        self.entries.get_mut(&fd).ok_or(FsError::BadFileDescriptor)
    }

    pub(crate) fn remove(&mut self, fd: u32) -> FsResult<FdEntry> {
        self.entries.remove(&fd).ok_or(FsError::BadFileDescriptor)
    }

    /// Drops every open file, keeping the stdio descriptors.
    pub(crate) fn clear_files(&mut self) {
        self.entries.retain(|fd, _| *fd < 3);
    }
}

/// Dispatches one `fs.<method>(args..., callback)` call.
pub(crate) fn call(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    method: &str,
    args: &[JsValue],
) -> Result<JsValue, CallError> {
    let callback = trailing_callback(method, args)?;
    let args = &args[..args.len() - 1];
    trace!(%method, "jsfs");

    let outcome = match method {
        "open" => op_open(env, args),
        "stat" => op_stat(env, args, true),
        "lstat" => op_stat(env, args, false),
        "fstat" => op_fstat(env, args),
        "close" => op_close(env, args),
        "read" => op_read(env, args),
        "write" => op_write(env, args),
        "readdir" => op_readdir(env, args),
        "mkdir" => op_mkdir(env, args),
        "rmdir" => op_path_only(env, "rmdir", args, |fs, p| fs.rmdir(p)),
        "rename" => op_two_paths(env, "rename", args, |fs, a, b| fs.rename(a, b)),
        "unlink" => op_path_only(env, "unlink", args, |fs, p| fs.unlink(p)),
        "utimes" => op_utimes(env, args),
        "chmod" => op_chmod(env, args),
        "fchmod" => op_fchmod(env, args),
        "chown" => op_chown(env, args, true),
        "lchown" => op_chown(env, args, false),
        "fchown" => op_fchown(env, args),
        "truncate" => op_truncate(env, args),
        "ftruncate" => op_ftruncate(env, args),
        "readlink" => op_readlink(env, args),
        "link" => op_two_paths(env, "link", args, |fs, a, b| fs.link(a, b)),
        "symlink" => op_symlink(env, args),
        "fsync" => op_fsync(env, args),
        other => {
            return Err(CallError::Fatal(GoJsError::UnknownMethod {
                receiver: "fs",
                method: other.to_owned(),
            }))
        }
    };

    let outcome = match outcome {
        Ok(value) => Ok(value),
        Err(OpError::Errno(errno)) => Err(errno),
        Err(OpError::Fatal(fatal)) => return Err(CallError::Fatal(fatal)),
    };
    deliver(env, store, &callback, outcome)?;
    Ok(JsValue::Undefined)
}

/// Invokes the callback error-first.
fn deliver(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    callback: &FuncWrapper,
    outcome: Result<JsValue, FsError>,
) -> Result<(), GoJsError> {
    let (err, result) = match outcome {
        Ok(value) => (JsValue::Null, value),
        Err(errno) => (JsValue::error(errno), JsValue::Undefined),
    };
    event::invoke(
        env,
        store,
        callback,
        JsValue::Builtin(crate::builtins::Builtin::Fs),
        vec![err, result],
    )?;
    Ok(())
}

/// An operation failure: a translated errno for the callback, or a fatal
/// protocol violation.
enum OpError {
    Errno(FsError),
    Fatal(GoJsError),
}

impl From<FsError> for OpError {
    fn from(err: FsError) -> Self {
        OpError::Errno(err)
    }
}

impl From<GoJsError> for OpError {
    fn from(err: GoJsError) -> Self {
        OpError::Fatal(err)
    }
}

type OpResult = Result<JsValue, OpError>;

fn trailing_callback(method: &str, args: &[JsValue]) -> Result<FuncWrapper, GoJsError> {
    match args.last() {
        Some(JsValue::Func(f)) => Ok(**f),
        _ => Err(GoJsError::protocol(format!(
            "fs.{method} is missing its trailing callback"
        ))),
    }
}

fn arg_str(method: &str, args: &[JsValue], index: usize) -> Result<String, GoJsError> {
    args.get(index)
        .and_then(JsValue::as_str)
        .map(str::to_owned)
        .ok_or_else(|| GoJsError::protocol(format!("fs.{method} argument {index} is not a string")))
}

fn arg_num(method: &str, args: &[JsValue], index: usize) -> Result<f64, GoJsError> {
    args.get(index)
        .and_then(JsValue::as_number)
        .ok_or_else(|| GoJsError::protocol(format!("fs.{method} argument {index} is not a number")))
}

fn arg_u32(method: &str, args: &[JsValue], index: usize) -> Result<u32, GoJsError> {
    Ok(arg_num(method, args, index)? as u32)
}

fn arg_bytes(
    method: &str,
    args: &[JsValue],
    index: usize,
) -> Result<Arc<ByteArray>, GoJsError> {
    match args.get(index) {
        Some(JsValue::Bytes(bytes)) => Ok(bytes.clone()),
        _ => Err(GoJsError::protocol(format!(
            "fs.{method} argument {index} is not a Uint8Array"
        ))),
    }
}

/// `null` means streaming; a number is an absolute file offset.
fn arg_position(method: &str, args: &[JsValue], index: usize) -> Result<Option<u64>, GoJsError> {
    match args.get(index) {
        Some(v) if v.is_null_or_undefined() => Ok(None),
        Some(JsValue::Number(n)) => Ok(Some(*n as u64)),
        _ => Err(GoJsError::protocol(format!(
            "fs.{method} argument {index} is not a position"
        ))),
    }
}

fn resolve_arg(env: &GoJsEnv, method: &str, args: &[JsValue], index: usize) -> Result<String, GoJsError> {
    let raw = arg_str(method, args, index)?;
    Ok(env.resolve_path(&raw))
}

fn op_open(env: &GoJsEnv, args: &[JsValue]) -> OpResult {
    let path = resolve_arg(env, "open", args, 0)?;
    let raw_flags = arg_u32("open", args, 1)?;
    let perm = arg_u32("open", args, 2)?;
    let flags = mode::decode_open_flags(raw_flags);
    let perm = perm & 0o777 & !env.state().umask;

    let file = env.config.fs.open(&path, flags, perm)?;
    let fd = env.state().fds.insert(file);
    Ok(JsValue::Number(fd as f64))
}

fn op_stat(env: &GoJsEnv, args: &[JsValue], follow: bool) -> OpResult {
    let method = if follow { "stat" } else { "lstat" };
    let path = resolve_arg(env, method, args, 0)?;
    let meta = if follow {
        env.config.fs.stat(&path)?
    } else {
        env.config.fs.lstat(&path)?
    };
    Ok(JsValue::Stat(Arc::new(JsStat::from_metadata(&meta))))
}

fn op_fstat(env: &GoJsEnv, args: &[JsValue]) -> OpResult {
    let fd = arg_u32("fstat", args, 0)?;
    let mut state = env.state();
    let meta = match state.fds.get_mut(fd)? {
        FdEntry::File(file) => file.metadata()?,
        FdEntry::Stdin(_) | FdEntry::Stdout(_) | FdEntry::Stderr(_) => stdio_metadata(),
    };
    drop(state);
    Ok(JsValue::Stat(Arc::new(JsStat::from_metadata(&meta))))
}

/// What `fstat` reports for the preconnected descriptors.
fn stdio_metadata() -> Metadata {
    Metadata {
        mode: FileMode {
            kind: FileKind::CharDevice,
            perm: 0o620,
            setuid: false,
            setgid: false,
            sticky: false,
        },
        dev: 0,
        ino: 0,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        size: 0,
        blksize: 4096,
        blocks: 0,
        atime_ns: 0,
        mtime_ns: 0,
        ctime_ns: 0,
    }
}

fn op_close(env: &GoJsEnv, args: &[JsValue]) -> OpResult {
    let fd = arg_u32("close", args, 0)?;
    let entry = env.state().fds.remove(fd)?;
    drop(entry);
    Ok(JsValue::Bool(true))
}

fn op_read(env: &GoJsEnv, args: &[JsValue]) -> OpResult {
    let fd = arg_u32("read", args, 0)?;
    let buffer = arg_bytes("read", args, 1)?;
    let offset = arg_u32("read", args, 2)? as usize;
    let length = arg_u32("read", args, 3)? as usize;
    let position = arg_position("read", args, 4)?;

    let mut scratch = vec![0u8; length];
    let n = {
        let mut state = env.state();
        match state.fds.get_mut(fd)? {
            FdEntry::File(file) => match position {
                Some(pos) => file.read_at(&mut scratch, pos)?,
                None => file.read(&mut scratch)?,
            },
            FdEntry::Stdin(reader) => {
                if position.is_some() {
                    return Err(FsError::InvalidArgument.into());
                }
                let reader = reader.clone();
                drop(state);
                let read_result = stdio::lock(&reader).read(&mut scratch).map_err(FsError::from)?;
                read_result
            }
            FdEntry::Stdout(_) | FdEntry::Stderr(_) => {
                return Err(FsError::BadFileDescriptor.into())
            }
        }
    };

    {
        let mut dest = buffer.lock();
        if dest.len() < offset + n {
            return Err(FsError::BadAddress.into());
        }
        dest[offset..offset + n].copy_from_slice(&scratch[..n]);
    }
    Ok(JsValue::Number(n as f64))
}

fn op_write(env: &GoJsEnv, args: &[JsValue]) -> OpResult {
    let fd = arg_u32("write", args, 0)?;
    let buffer = arg_bytes("write", args, 1)?;
    let offset = arg_u32("write", args, 2)? as usize;
    let length = arg_u32("write", args, 3)? as usize;
    let position = arg_position("write", args, 4)?;

    let data = {
        let source = buffer.lock();
        if source.len() < offset + length {
            return Err(FsError::BadAddress.into());
        }
        source[offset..offset + length].to_vec()
    };

    let n = {
        let mut state = env.state();
        match state.fds.get_mut(fd)? {
            FdEntry::File(file) => match position {
                Some(pos) => file.write_at(&data, pos)?,
                None => file.write(&data)?,
            },
            FdEntry::Stdout(writer) | FdEntry::Stderr(writer) => {
                if position.is_some() {
                    return Err(FsError::InvalidArgument.into());
                }
                let writer = writer.clone();
                drop(state);
                stdio::lock(&writer)
                    .write_all(&data)
                    .map_err(FsError::from)?;
                data.len()
            }
            FdEntry::Stdin(_) => return Err(FsError::BadFileDescriptor.into()),
        }
    };
    Ok(JsValue::Number(n as f64))
}

fn op_readdir(env: &GoJsEnv, args: &[JsValue]) -> OpResult {
    let path = resolve_arg(env, "readdir", args, 0)?;
    let names = env.config.fs.readdirnames(&path)?;
    let values = names.into_iter().map(JsValue::string).collect();
    Ok(JsValue::Array(Arc::new(ObjectArray::new(values))))
}

fn op_mkdir(env: &GoJsEnv, args: &[JsValue]) -> OpResult {
    let path = resolve_arg(env, "mkdir", args, 0)?;
    let perm = arg_u32("mkdir", args, 1)? & 0o777 & !env.state().umask;
    env.config.fs.mkdir(&path, perm)?;
    Ok(JsValue::Undefined)
}

fn op_path_only(
    env: &GoJsEnv,
    method: &str,
    args: &[JsValue],
    op: impl FnOnce(&dyn crate::vfs::FileSystem, &str) -> FsResult<()>,
) -> OpResult {
    let path = resolve_arg(env, method, args, 0)?;
    op(&*env.config.fs, &path)?;
    Ok(JsValue::Undefined)
}

fn op_two_paths(
    env: &GoJsEnv,
    method: &str,
    args: &[JsValue],
    op: impl FnOnce(&dyn crate::vfs::FileSystem, &str, &str) -> FsResult<()>,
) -> OpResult {
    let a = resolve_arg(env, method, args, 0)?;
    let b = resolve_arg(env, method, args, 1)?;
    op(&*env.config.fs, &a, &b)?;
    Ok(JsValue::Undefined)
}

fn op_utimes(env: &GoJsEnv, args: &[JsValue]) -> OpResult {
    let path = resolve_arg(env, "utimes", args, 0)?;
    let atime = arg_num("utimes", args, 1)? as i64;
    let mtime = arg_num("utimes", args, 2)? as i64;
    env.config
        .fs
        .utimens(&path, atime * 1_000_000_000, mtime * 1_000_000_000)?;
    Ok(JsValue::Undefined)
}

fn op_chmod(env: &GoJsEnv, args: &[JsValue]) -> OpResult {
    let path = resolve_arg(env, "chmod", args, 0)?;
    let perm = arg_u32("chmod", args, 1)? & 0o7777;
    env.config.fs.chmod(&path, perm)?;
    Ok(JsValue::Undefined)
}

fn op_fchmod(env: &GoJsEnv, args: &[JsValue]) -> OpResult {
    let fd = arg_u32("fchmod", args, 0)?;
    let perm = arg_u32("fchmod", args, 1)? & 0o7777;
    let mut state = env.state();
    match state.fds.get_mut(fd)? {
        FdEntry::File(file) => file.chmod(perm)?,
        _ => return Err(FsError::NotSupported.into()),
    }
    Ok(JsValue::Undefined)
}

fn op_chown(env: &GoJsEnv, args: &[JsValue], follow: bool) -> OpResult {
    let method = if follow { "chown" } else { "lchown" };
    let path = resolve_arg(env, method, args, 0)?;
    let uid = arg_u32(method, args, 1)?;
    let gid = arg_u32(method, args, 2)?;
    if follow {
        env.config.fs.chown(&path, uid, gid)?;
    } else {
        env.config.fs.lchown(&path, uid, gid)?;
    }
    Ok(JsValue::Undefined)
}

fn op_fchown(env: &GoJsEnv, args: &[JsValue]) -> OpResult {
    let fd = arg_u32("fchown", args, 0)?;
    let uid = arg_u32("fchown", args, 1)?;
    let gid = arg_u32("fchown", args, 2)?;
    let mut state = env.state();
    match state.fds.get_mut(fd)? {
        FdEntry::File(file) => file.chown(uid, gid)?,
        _ => return Err(FsError::NotSupported.into()),
    }
    Ok(JsValue::Undefined)
}

fn op_truncate(env: &GoJsEnv, args: &[JsValue]) -> OpResult {
    let path = resolve_arg(env, "truncate", args, 0)?;
    let size = arg_num("truncate", args, 1)? as u64;
    env.config.fs.truncate(&path, size)?;
    Ok(JsValue::Undefined)
}

fn op_ftruncate(env: &GoJsEnv, args: &[JsValue]) -> OpResult {
    let fd = arg_u32("ftruncate", args, 0)?;
    let size = arg_num("ftruncate", args, 1)? as u64;
    let mut state = env.state();
    match state.fds.get_mut(fd)? {
        FdEntry::File(file) => file.truncate(size)?,
        _ => return Err(FsError::InvalidArgument.into()),
    }
    Ok(JsValue::Undefined)
}

fn op_readlink(env: &GoJsEnv, args: &[JsValue]) -> OpResult {
    let path = resolve_arg(env, "readlink", args, 0)?;
    let target = env.config.fs.readlink(&path)?;
    Ok(JsValue::string(target))
}

fn op_symlink(env: &GoJsEnv, args: &[JsValue]) -> OpResult {
    // The target is stored verbatim; only the link path is resolved.
    let target = arg_str("symlink", args, 0)?;
    let link_path = resolve_arg(env, "symlink", args, 1)?;
    env.config.fs.symlink(&target, &link_path)?;
    Ok(JsValue::Undefined)
}

fn op_fsync(env: &GoJsEnv, args: &[JsValue]) -> OpResult {
    let fd = arg_u32("fsync", args, 0)?;
    let mut state = env.state();
    match state.fds.get_mut(fd)? {
        FdEntry::File(file) => file.sync()?,
        FdEntry::Stdout(writer) | FdEntry::Stderr(writer) => {
            let writer = writer.clone();
            drop(state);
            stdio::lock(&writer).flush().map_err(FsError::from)?;
        }
        FdEntry::Stdin(_) => {}
    }
    Ok(JsValue::Undefined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdio::{null_reader, null_writer};
    use crate::vfs::{MemFs, OpenFlags};
    use crate::vfs::FileSystem;

    fn table() -> FdTable {
        FdTable::new(null_reader(), null_writer(), null_writer())
    }

    fn open_one(fs: &MemFs, path: &str) -> Box<dyn OpenFile> {
        fs.add_file(path, b"x".to_vec()).unwrap();
        fs.open(
            path,
            OpenFlags {
                read: true,
                ..OpenFlags::default()
            },
            0,
        )
        .unwrap()
    }

    #[test]
    fn descriptors_start_at_three_and_reuse_the_lowest() {
        let fs = MemFs::new();
        let mut fds = table();
        let a = fds.insert(open_one(&fs, "/a"));
        let b = fds.insert(open_one(&fs, "/b"));
        let c = fds.insert(open_one(&fs, "/c"));
        assert_eq!((a, b, c), (3, 4, 5));

        fds.remove(4).unwrap();
        assert_eq!(fds.insert(open_one(&fs, "/d")), 4);
    }

    #[test]
    fn missing_descriptor_is_ebadf() {
        let mut fds = table();
        assert!(matches!(fds.get_mut(9), Err(FsError::BadFileDescriptor)));
        assert!(matches!(fds.remove(9), Err(FsError::BadFileDescriptor)));
    }

    #[test]
    fn stdio_descriptors_are_preconnected() {
        let mut fds = table();
        assert!(matches!(fds.get_mut(0), Ok(FdEntry::Stdin(_))));
        assert!(matches!(fds.get_mut(1), Ok(FdEntry::Stdout(_))));
        assert!(matches!(fds.get_mut(2), Ok(FdEntry::Stderr(_))));

        fds.clear_files();
        assert!(fds.get_mut(1).is_ok());
    }
}
