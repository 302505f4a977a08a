//! The `fetch` bridge.
//!
//! The guest drives the browser fetch API shape: `fetch(url, opts)` returns
//! a promise, `then` resolves it, the result exposes `status`, an entries
//! iterator over headers and an `arrayBuffer()` promise for the body. The
//! transport itself is an embedder-supplied [`HttpTransport`]; every call is
//! performed synchronously on the calling thread and delivered through the
//! event protocol, which is all the single-threaded guest can observe.

use std::fmt;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::trace;
use wasmer::StoreMut;

use crate::env::GoJsEnv;
use crate::errors::{CallError, GoJsError};
use crate::event::{self, FuncWrapper};
use crate::values::{ByteArray, JsDict, JsError, JsValue, ObjectArray};

/// A request as the bridge hands it to the transport. `method` is always
/// present; the guest's `fetch` options require it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// A transport's answer. The body reader is drained (and dropped) when the
/// guest asks for `arrayBuffer()`.
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Box<dyn Read + Send>,
}

impl HttpResponse {
    /// A response with an in-memory body.
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body: Box::new(std::io::Cursor::new(body)),
        }
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// A transport failure; `message` is what the guest's `net/http` error
/// chain will print.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HttpError {
    pub message: String,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The HTTP client capability. Absent a transport, the `fetch` global is
/// `undefined` and the guest's `net/http` reports fetch as unavailable.
pub trait HttpTransport: Send + Sync {
    fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Request headers under construction via `new Headers()` + `append`.
#[derive(Debug, Default)]
pub struct RequestHeaders {
    entries: Mutex<Vec<(String, String)>>,
}

impl RequestHeaders {
    pub(crate) fn append(&self, name: String, value: String) {
        self.lock().push((name, value));
    }

    pub(crate) fn snapshot(&self) -> Vec<(String, String)> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, String)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The value `fetch(url, opts)` returns; `then` consumes the request.
#[derive(Debug)]
pub struct FetchPromise {
    request: Mutex<Option<HttpRequest>>,
}

/// A resolved response: `status`, a headers iterator, `arrayBuffer()`.
pub struct FetchResult {
    pub(crate) status: u16,
    pub(crate) headers: Arc<ResponseHeaders>,
    body: Mutex<Option<Box<dyn Read + Send>>>,
}

impl fmt::Debug for FetchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResult")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Response headers, iterated in sorted order: `entries()` returns the
/// receiver itself, `next()` yields `{done, value: [name, value]}`.
#[derive(Debug)]
pub struct ResponseHeaders {
    entries: Vec<(String, String)>,
    cursor: Mutex<usize>,
}

impl ResponseHeaders {
    fn new(mut entries: Vec<(String, String)>) -> Self {
        entries.sort();
        Self {
            entries,
            cursor: Mutex::new(0),
        }
    }

    pub(crate) fn next_entry(&self) -> JsValue {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let dict = JsDict::new();
        match self.entries.get(*cursor) {
            Some((name, value)) => {
                *cursor += 1;
                dict.set("done", JsValue::Bool(false));
                dict.set(
                    "value",
                    JsValue::Array(Arc::new(ObjectArray::new(vec![
                        JsValue::string(name),
                        JsValue::string(value),
                    ]))),
                );
            }
            None => dict.set("done", JsValue::Bool(true)),
        }
        JsValue::Dict(Arc::new(dict))
    }
}

/// The promise `arrayBuffer()` returns; `then` drains the body.
pub struct ArrayPromise {
    body: Mutex<Option<Box<dyn Read + Send>>>,
}

impl fmt::Debug for ArrayPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayPromise").finish_non_exhaustive()
    }
}

/// `fetch(url, opts)`: builds the request and parks it in a promise.
pub(crate) fn fetch(env: &GoJsEnv, args: &[JsValue]) -> Result<JsValue, CallError> {
    if env.config.http.is_none() {
        return Err(GoJsError::protocol("fetch called without an HTTP transport").into());
    }
    let url = args
        .first()
        .and_then(JsValue::as_str)
        .ok_or_else(|| GoJsError::protocol("fetch expects a url string"))?
        .to_owned();
    let opts = match args.get(1) {
        Some(JsValue::Dict(dict)) => dict.clone(),
        _ => return Err(GoJsError::protocol("fetch expects an options object").into()),
    };
    let method = opts
        .get("method")
        .as_ref()
        .and_then(JsValue::as_str)
        .ok_or_else(|| GoJsError::protocol("fetch options are missing \"method\""))?
        .to_owned();
    let headers = match opts.get("headers") {
        Some(JsValue::Headers(headers)) => headers.snapshot(),
        None => Vec::new(),
        Some(other) => {
            return Err(GoJsError::protocol(format!(
                "fetch \"headers\" option is a {}",
                other.kind()
            ))
            .into())
        }
    };
    let body = match opts.get("body") {
        Some(JsValue::Bytes(bytes)) => bytes.lock().clone(),
        None => Vec::new(),
        Some(other) => {
            return Err(GoJsError::protocol(format!(
                "fetch \"body\" option is a {}",
                other.kind()
            ))
            .into())
        }
    };

    trace!(%method, %url, "fetch");
    Ok(JsValue::FetchPromise(Arc::new(FetchPromise {
        request: Mutex::new(Some(HttpRequest {
            method,
            url,
            headers,
            body,
        })),
    })))
}

/// `FetchPromise.then(success, failure)`: performs the round trip.
pub(crate) fn fetch_then(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    promise: &FetchPromise,
    args: &[JsValue],
) -> Result<JsValue, CallError> {
    let (success, failure) = two_callbacks("FetchPromise.then", args)?;
    let request = promise
        .request
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .ok_or_else(|| GoJsError::protocol("fetch promise resolved twice"))?;
    let transport = env
        .config
        .http
        .clone()
        .ok_or_else(|| GoJsError::protocol("fetch called without an HTTP transport"))?;

    match transport.round_trip(request) {
        Ok(response) => {
            let result = JsValue::FetchResult(Arc::new(FetchResult {
                status: response.status,
                headers: Arc::new(ResponseHeaders::new(response.headers)),
                body: Mutex::new(Some(response.body)),
            }));
            event::invoke(env, store, &success, JsValue::Undefined, vec![result])?;
        }
        Err(err) => {
            let reason = JsValue::Error(Arc::new(JsError::new(err.message, "EIO")));
            event::invoke(env, store, &failure, JsValue::Undefined, vec![reason])?;
        }
    }
    Ok(JsValue::Undefined)
}

/// `FetchResult.arrayBuffer()`: moves the body reader into a new promise.
pub(crate) fn array_buffer(result: &FetchResult) -> Result<JsValue, CallError> {
    let body = result
        .body
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .ok_or_else(|| GoJsError::protocol("response body already consumed"))?;
    Ok(JsValue::ArrayPromise(Arc::new(ArrayPromise {
        body: Mutex::new(Some(body)),
    })))
}

/// `ArrayPromise.then(success, failure)`: drains and closes the body.
pub(crate) fn array_then(
    env: &GoJsEnv,
    store: &mut StoreMut<'_>,
    promise: &ArrayPromise,
    args: &[JsValue],
) -> Result<JsValue, CallError> {
    let (success, failure) = two_callbacks("ArrayPromise.then", args)?;
    let mut body = promise
        .body
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .ok_or_else(|| GoJsError::protocol("response body already consumed"))?;

    let mut bytes = Vec::new();
    let outcome = body.read_to_end(&mut bytes);
    drop(body);
    match outcome {
        Ok(_) => {
            let buffer = JsValue::Bytes(Arc::new(ByteArray::from_vec(bytes)));
            event::invoke(env, store, &success, JsValue::Undefined, vec![buffer])?;
        }
        Err(err) => {
            let reason = JsValue::Error(Arc::new(JsError::new(err.to_string(), "EIO")));
            event::invoke(env, store, &failure, JsValue::Undefined, vec![reason])?;
        }
    }
    Ok(JsValue::Undefined)
}

fn two_callbacks(
    what: &str,
    args: &[JsValue],
) -> Result<(FuncWrapper, FuncWrapper), GoJsError> {
    let func = |index: usize| -> Result<FuncWrapper, GoJsError> {
        match args.get(index) {
            Some(JsValue::Func(f)) => Ok(**f),
            other => Err(GoJsError::protocol(format!(
                "{what} callback {index} is {}",
                other.map_or("missing", |v| v.kind())
            ))),
        }
    };
    Ok((func(0)?, func(1)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_headers_iterate_sorted_then_finish() {
        let headers = ResponseHeaders::new(vec![
            ("zeta".into(), "1".into()),
            ("alpha".into(), "2".into()),
        ]);

        let first = headers.next_entry();
        let JsValue::Dict(dict) = &first else {
            panic!("expected a dict")
        };
        assert_eq!(dict.get("done"), Some(JsValue::Bool(false)));
        let Some(JsValue::Array(pair)) = dict.get("value") else {
            panic!("expected a pair")
        };
        assert_eq!(pair.get(0), Some(&JsValue::string("alpha")));
        assert_eq!(pair.get(1), Some(&JsValue::string("2")));

        let _second = headers.next_entry();
        let JsValue::Dict(done) = headers.next_entry() else {
            panic!("expected a dict")
        };
        assert_eq!(done.get("done"), Some(JsValue::Bool(true)));
        assert_eq!(done.get("value"), None);
    }

    #[test]
    fn request_headers_accumulate_in_order() {
        let headers = RequestHeaders::default();
        headers.append("b".into(), "2".into());
        headers.append("a".into(), "1".into());
        assert_eq!(
            headers.snapshot(),
            vec![("b".into(), "2".into()), ("a".into(), "1".into())]
        );
    }
}
