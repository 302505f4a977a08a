//! The host-side model of the JavaScript values the guest can see.
//!
//! Where the Go toolchain's browser glue leans on real JavaScript objects
//! and reflection, the bridge enumerates every shape the guest actually
//! touches as a tagged variant; property and method dispatch is a `match`,
//! and an unknown key is a guest bug that traps (see the fatal plane in
//! [`crate::errors`]).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::builtins::Builtin;
use crate::errors::GoJsError;
use crate::event::{Event, FuncWrapper};
use crate::http::{ArrayPromise, FetchPromise, FetchResult, RequestHeaders, ResponseHeaders};
use crate::refs::TypeFlag;
use crate::vfs::{FsError, Metadata};

/// A JavaScript value as the bridge models it.
///
/// Cloning is cheap: compound variants are `Arc` handles, and handle
/// identity is value identity for interning purposes.
#[derive(Clone, Debug)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    /// One of the fixed globals; all mutable state they expose lives in the
    /// per-instance [`crate::env::GoJsState`].
    Builtin(Builtin),
    /// Ordered sequence built by the host (event args, readdir names, ...).
    Array(Arc<ObjectArray>),
    /// A `Uint8Array` as far as the guest can tell.
    Bytes(Arc<ByteArray>),
    /// A plain `Object` used for named-argument marshalling (fetch options,
    /// iterator results).
    Dict(Arc<JsDict>),
    /// A guest-minted callback handle.
    Func(Arc<FuncWrapper>),
    /// The single-slot callback message (see [`crate::event`]).
    Event(Arc<Event>),
    /// An error value exposing `message` and `code`.
    Error(Arc<JsError>),
    /// A pre-flattened `stat` result.
    Stat(Arc<JsStat>),
    /// Request headers under construction by the guest.
    Headers(Arc<RequestHeaders>),
    FetchPromise(Arc<FetchPromise>),
    FetchResult(Arc<FetchResult>),
    ResponseHeaders(Arc<ResponseHeaders>),
    ArrayPromise(Arc<ArrayPromise>),
}

impl JsValue {
    pub fn string(s: impl AsRef<str>) -> JsValue {
        JsValue::String(Arc::from(s.as_ref()))
    }

    pub fn error(err: FsError) -> JsValue {
        JsValue::Error(Arc::new(JsError::new(err.to_string(), err.code())))
    }

    /// The receiver name used in fatal diagnostics.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            JsValue::Undefined => "undefined",
            JsValue::Null => "null",
            JsValue::Bool(_) => "boolean",
            JsValue::Number(_) => "number",
            JsValue::String(_) => "string",
            JsValue::Builtin(b) => b.name(),
            JsValue::Array(_) => "array",
            JsValue::Bytes(_) => "Uint8Array",
            JsValue::Dict(_) => "object",
            JsValue::Func(_) => "function",
            JsValue::Event(_) => "event",
            JsValue::Error(_) => "error",
            JsValue::Stat(_) => "stat",
            JsValue::Headers(_) => "Headers",
            JsValue::FetchPromise(_) => "fetch promise",
            JsValue::FetchResult(_) => "fetch result",
            JsValue::ResponseHeaders(_) => "response headers",
            JsValue::ArrayPromise(_) => "arrayBuffer promise",
        }
    }

    /// Type flag carried in the boxed ref for this value.
    pub(crate) fn type_flag(&self) -> TypeFlag {
        match self {
            JsValue::String(_) => TypeFlag::String,
            JsValue::Func(_) => TypeFlag::Function,
            _ => TypeFlag::Object,
        }
    }

    /// Identity under which this value deduplicates in the table, or `None`
    /// for values that are never interned (scalars and builtins).
    pub(crate) fn intern_key(&self) -> Option<InternKey> {
        match self {
            JsValue::Undefined
            | JsValue::Null
            | JsValue::Bool(_)
            | JsValue::Number(_)
            | JsValue::Builtin(_) => None,
            JsValue::String(s) => Some(InternKey::String(s.clone())),
            JsValue::Array(a) => Some(InternKey::identity(Arc::as_ptr(a))),
            JsValue::Bytes(b) => Some(InternKey::identity(Arc::as_ptr(b))),
            JsValue::Dict(d) => Some(InternKey::identity(Arc::as_ptr(d))),
            JsValue::Func(f) => Some(InternKey::identity(Arc::as_ptr(f))),
            JsValue::Event(e) => Some(InternKey::identity(Arc::as_ptr(e))),
            JsValue::Error(e) => Some(InternKey::identity(Arc::as_ptr(e))),
            JsValue::Stat(s) => Some(InternKey::identity(Arc::as_ptr(s))),
            JsValue::Headers(h) => Some(InternKey::identity(Arc::as_ptr(h))),
            JsValue::FetchPromise(p) => Some(InternKey::identity(Arc::as_ptr(p))),
            JsValue::FetchResult(r) => Some(InternKey::identity(Arc::as_ptr(r))),
            JsValue::ResponseHeaders(h) => Some(InternKey::identity(Arc::as_ptr(h))),
            JsValue::ArrayPromise(p) => Some(InternKey::identity(Arc::as_ptr(p))),
        }
    }

    pub(crate) fn as_number(&self) -> Option<f64> {
        match self {
            JsValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub(crate) fn as_str(&self) -> Option<&str> {
        match self {
            JsValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn is_null_or_undefined(&self) -> bool {
        matches!(self, JsValue::Null | JsValue::Undefined)
    }
}

impl PartialEq for JsValue {
    /// Bridge equality: content for scalars and strings, handle identity for
    /// everything else.
    fn eq(&self, other: &Self) -> bool {
        use JsValue::*;
        match (self, other) {
            (Undefined, Undefined) | (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Number(a), Number(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) => a == b,
            (Builtin(a), Builtin(b)) => a == b,
            (Array(a), Array(b)) => Arc::ptr_eq(a, b),
            (Bytes(a), Bytes(b)) => Arc::ptr_eq(a, b),
            (Dict(a), Dict(b)) => Arc::ptr_eq(a, b),
            (Func(a), Func(b)) => Arc::ptr_eq(a, b),
            (Event(a), Event(b)) => Arc::ptr_eq(a, b),
            (Error(a), Error(b)) => Arc::ptr_eq(a, b),
            (Stat(a), Stat(b)) => Arc::ptr_eq(a, b),
            (Headers(a), Headers(b)) => Arc::ptr_eq(a, b),
            (FetchPromise(a), FetchPromise(b)) => Arc::ptr_eq(a, b),
            (FetchResult(a), FetchResult(b)) => Arc::ptr_eq(a, b),
            (ResponseHeaders(a), ResponseHeaders(b)) => Arc::ptr_eq(a, b),
            (ArrayPromise(a), ArrayPromise(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Key under which interned values deduplicate: strings by content, compound
/// values by handle address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum InternKey {
    String(Arc<str>),
    Identity(usize),
}

impl InternKey {
    fn identity<T>(ptr: *const T) -> InternKey {
        InternKey::Identity(ptr as usize)
    }
}

/// Ordered sequence of values; the guest reads it with `valueIndex` and
/// `valueLength` only.
#[derive(Debug, Default)]
pub struct ObjectArray {
    values: Vec<JsValue>,
}

impl ObjectArray {
    pub fn new(values: Vec<JsValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&JsValue> {
        self.values.get(index)
    }
}

/// Host-owned byte buffer the guest sees as a `Uint8Array`.
#[derive(Debug)]
pub struct ByteArray {
    bytes: Mutex<Vec<u8>>,
}

impl ByteArray {
    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0; len]),
        }
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// String-keyed property bag, mutable through `valueSet`.
#[derive(Debug, Default)]
pub struct JsDict {
    entries: Mutex<BTreeMap<String, JsValue>>,
}

impl JsDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<JsValue> {
        self.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: JsValue) {
        self.lock().insert(key.into(), value);
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, JsValue>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Error value handed to the guest; `message` feeds `error.Error()` strings
/// and `code` feeds the errno mapping in `syscall/js`.
#[derive(Debug)]
pub struct JsError {
    pub message: String,
    pub code: &'static str,
}

impl JsError {
    pub fn new(message: impl Into<String>, code: &'static str) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }
}

/// The flat record `jsfs` stat calls resolve with. Field set and the
/// millisecond timestamps are fixed by the guest's `fs_js` decoder.
#[derive(Debug, Clone, Copy)]
pub struct JsStat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime_ms: i64,
    pub mtime_ms: i64,
    pub ctime_ms: i64,
    pub is_dir: bool,
}

impl JsStat {
    pub(crate) fn from_metadata(meta: &Metadata) -> Self {
        Self {
            dev: meta.dev,
            ino: meta.ino,
            mode: crate::fs::mode::to_js_mode(meta.mode),
            nlink: meta.nlink,
            uid: meta.uid,
            gid: meta.gid,
            rdev: meta.rdev,
            size: meta.size,
            blksize: meta.blksize,
            blocks: meta.blocks,
            atime_ms: meta.atime_ns / 1_000_000,
            mtime_ms: meta.mtime_ns / 1_000_000,
            ctime_ms: meta.ctime_ns / 1_000_000,
            is_dir: meta.mode.kind == crate::vfs::FileKind::Directory,
        }
    }

    pub(crate) fn property(&self, name: &str) -> Result<JsValue, GoJsError> {
        let n = match name {
            "dev" => self.dev as f64,
            "ino" => self.ino as f64,
            "mode" => self.mode as f64,
            "nlink" => self.nlink as f64,
            "uid" => self.uid as f64,
            "gid" => self.gid as f64,
            "rdev" => self.rdev as f64,
            "size" => self.size as f64,
            "blksize" => self.blksize as f64,
            "blocks" => self.blocks as f64,
            "atimeMs" => self.atime_ms as f64,
            "mtimeMs" => self.mtime_ms as f64,
            "ctimeMs" => self.ctime_ms as f64,
            _ => {
                return Err(GoJsError::UnknownProperty {
                    receiver: "stat",
                    property: name.to_owned(),
                })
            }
        };
        Ok(JsValue::Number(n))
    }
}

/// Best-effort string coercion for `valuePrepareString`. Compound objects
/// have no string form the guest could legitimately ask for.
pub(crate) fn coerce_string(value: &JsValue) -> Result<Arc<str>, GoJsError> {
    match value {
        JsValue::String(s) => Ok(s.clone()),
        JsValue::Error(e) => Ok(Arc::from(e.message.as_str())),
        JsValue::Undefined => Ok(Arc::from("undefined")),
        JsValue::Null => Ok(Arc::from("null")),
        JsValue::Bool(true) => Ok(Arc::from("true")),
        JsValue::Bool(false) => Ok(Arc::from("false")),
        JsValue::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                Ok(Arc::from(format!("{}", *n as i64).as_str()))
            } else {
                Ok(Arc::from(format!("{n}").as_str()))
            }
        }
        other => Err(GoJsError::protocol(format!(
            "cannot coerce a {} to a string",
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_dedupe_by_content() {
        let a = JsValue::string("hello");
        let b = JsValue::string("hello");
        assert_eq!(a.intern_key(), b.intern_key());
        assert_eq!(a, b);
    }

    #[test]
    fn compound_values_dedupe_by_identity() {
        let a = JsValue::Array(Arc::new(ObjectArray::new(vec![])));
        let b = JsValue::Array(Arc::new(ObjectArray::new(vec![])));
        assert_ne!(a.intern_key(), b.intern_key());
        assert_ne!(a, b);
        assert_eq!(a.intern_key(), a.clone().intern_key());
        assert_eq!(a, a.clone());
    }

    #[test]
    fn scalars_are_never_interned() {
        assert!(JsValue::Number(1.5).intern_key().is_none());
        assert!(JsValue::Bool(true).intern_key().is_none());
        assert!(JsValue::Undefined.intern_key().is_none());
    }

    #[test]
    fn string_coercion() {
        assert_eq!(&*coerce_string(&JsValue::Number(42.0)).unwrap(), "42");
        assert_eq!(&*coerce_string(&JsValue::Number(0.5)).unwrap(), "0.5");
        assert_eq!(&*coerce_string(&JsValue::Null).unwrap(), "null");
        assert!(coerce_string(&JsValue::Dict(Arc::new(JsDict::new()))).is_err());
    }
}
