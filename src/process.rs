//! The `process` object: working directory, identity and umask.
//!
//! `chdir` failures surface as thrown error values (the guest wraps them in
//! `syscall` errors); everything else here is infallible by construction.

use crate::env::GoJsEnv;
use crate::errors::{CallError, GoJsError};
use crate::fs::path;
use crate::values::{JsValue, ObjectArray};
use crate::vfs::FsError;
use std::sync::Arc;

pub(crate) fn call(
    env: &GoJsEnv,
    method: &str,
    args: &[JsValue],
) -> Result<JsValue, CallError> {
    match method {
        "cwd" => {
            let cwd = env.state().cwd.clone();
            Ok(JsValue::string(cwd))
        }
        "chdir" => {
            let target = args
                .first()
                .and_then(JsValue::as_str)
                .ok_or_else(|| GoJsError::protocol("chdir expects a path string"))?
                .to_owned();
            let resolved = {
                let state = env.state();
                path::resolve(&state.cwd, &target)
            };
            let meta = env.config.fs.stat(&resolved)?;
            if !meta.is_dir() {
                return Err(FsError::NotADirectory.into());
            }
            let mut state = env.state();
            state.cwd = normalize_cwd(resolved);
            Ok(JsValue::Undefined)
        }
        "getuid" => Ok(JsValue::Number(env.config.identity.uid as f64)),
        "getgid" => Ok(JsValue::Number(env.config.identity.gid as f64)),
        "geteuid" => Ok(JsValue::Number(env.config.identity.euid as f64)),
        "getgroups" => {
            let groups = env
                .config
                .identity
                .groups
                .iter()
                .map(|g| JsValue::Number(*g as f64))
                .collect();
            Ok(JsValue::Array(Arc::new(ObjectArray::new(groups))))
        }
        "umask" => {
            let new_mask = args
                .first()
                .and_then(JsValue::as_number)
                .ok_or_else(|| GoJsError::protocol("umask expects a numeric mask"))?
                as u32
                & 0o777;
            let mut state = env.state();
            let old = state.umask;
            state.umask = new_mask;
            Ok(JsValue::Number(old as f64))
        }
        other => Err(CallError::Fatal(GoJsError::UnknownMethod {
            receiver: "process",
            method: other.to_owned(),
        })),
    }
}

/// The stored cwd never keeps a trailing slash (except the root itself).
fn normalize_cwd(mut cwd: String) -> String {
    while cwd.len() > 1 && cwd.ends_with('/') {
        cwd.pop();
    }
    cwd
}

#[cfg(test)]
mod tests {
    use super::normalize_cwd;

    #[test]
    fn cwd_loses_its_trailing_slash() {
        assert_eq!(normalize_cwd("/a/b/".into()), "/a/b");
        assert_eq!(normalize_cwd("/".into()), "/");
    }
}
