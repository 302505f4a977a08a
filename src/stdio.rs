//! Stdio endpoints for the guest's descriptors 0, 1 and 2.
//!
//! `runtime.wasmWrite` and the `jsfs` read/write paths both land here.
//! Defaults discard output and present an empty stdin.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) type SharedReader = Arc<Mutex<dyn Read + Send>>;
pub(crate) type SharedWriter = Arc<Mutex<dyn Write + Send>>;

pub(crate) fn reader(r: impl Read + Send + 'static) -> SharedReader {
    Arc::new(Mutex::new(r))
}

pub(crate) fn writer(w: impl Write + Send + 'static) -> SharedWriter {
    Arc::new(Mutex::new(w))
}

pub(crate) fn null_reader() -> SharedReader {
    reader(io::empty())
}

pub(crate) fn null_writer() -> SharedWriter {
    writer(io::sink())
}

pub(crate) fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A cloneable in-memory sink, handy for capturing guest stdout/stderr.
///
/// ```
/// use wasmer_go_js::Capture;
/// use std::io::Write;
///
/// let capture = Capture::new();
/// let mut w = capture.clone();
/// w.write_all(b"hello").unwrap();
/// assert_eq!(capture.contents(), b"hello");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.buffer).clone()
    }

    /// Everything written so far, decoded lossily.
    pub fn contents_string(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.buffer).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
