//! The synthetic globals the guest expects to find.
//!
//! Each builtin is a unit tag with a fixed predefined ref; the mutable state
//! any of them expose (`go._pendingEvent`, `process` cwd, the fd table) is
//! per-instance and lives in [`crate::env::GoJsState`], so instances never
//! alias each other. Property and method dispatch over these tags happens in
//! [`crate::syscalls::js`].

use crate::refs::{self, id, Ref};
use crate::values::JsValue;

/// One of the fixed objects in the synthetic global graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `globalThis`.
    Global,
    /// The `go` object carrying the event protocol.
    Go,
    /// The `Object` constructor.
    ObjectCtor,
    /// The `Array` constructor.
    ArrayCtor,
    /// `process`.
    Process,
    /// `fs`.
    Fs,
    /// `fs.constants`.
    FsConstants,
    /// The `Uint8Array` constructor.
    Uint8ArrayCtor,
    /// `crypto`.
    Crypto,
    /// The `Date` constructor.
    DateCtor,
    /// The shared `Date` instance (`new Date()` always resolves to it).
    Date,
    /// The `fetch` function.
    Fetch,
    /// The `Headers` constructor.
    HeadersCtor,
}

impl Builtin {
    /// The predefined ref this builtin travels as.
    pub(crate) fn to_ref(self) -> Ref {
        match self {
            Builtin::Global => refs::GLOBAL,
            Builtin::Go => refs::GO,
            Builtin::ObjectCtor => refs::OBJECT_CTOR,
            Builtin::ArrayCtor => refs::ARRAY_CTOR,
            Builtin::Process => refs::PROCESS,
            Builtin::Fs => refs::FS,
            Builtin::FsConstants => refs::FS_CONSTANTS,
            Builtin::Uint8ArrayCtor => refs::UINT8_ARRAY_CTOR,
            Builtin::Crypto => refs::CRYPTO,
            Builtin::DateCtor => refs::DATE_CTOR,
            Builtin::Date => refs::DATE,
            Builtin::Fetch => refs::FETCH,
            Builtin::HeadersCtor => refs::HEADERS_CTOR,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Builtin::Global => "global",
            Builtin::Go => "go",
            Builtin::ObjectCtor => "Object",
            Builtin::ArrayCtor => "Array",
            Builtin::Process => "process",
            Builtin::Fs => "fs",
            Builtin::FsConstants => "fs.constants",
            Builtin::Uint8ArrayCtor => "Uint8Array",
            Builtin::Crypto => "crypto",
            Builtin::DateCtor => "Date",
            Builtin::Date => "Date instance",
            Builtin::Fetch => "fetch",
            Builtin::HeadersCtor => "Headers",
        }
    }
}

/// Resolves a predefined id to its value. Ids at or above
/// [`id::NEXT_ID`] belong to the table and return `None` here.
pub(crate) fn predefined(predef_id: u32) -> Option<JsValue> {
    let value = match predef_id {
        id::VALUE_NAN => JsValue::Number(f64::NAN),
        id::VALUE_ZERO => JsValue::Number(0.0),
        id::VALUE_NULL => JsValue::Null,
        id::VALUE_TRUE => JsValue::Bool(true),
        id::VALUE_FALSE => JsValue::Bool(false),
        id::GLOBAL => JsValue::Builtin(Builtin::Global),
        id::GO => JsValue::Builtin(Builtin::Go),
        id::OBJECT_CTOR => JsValue::Builtin(Builtin::ObjectCtor),
        id::ARRAY_CTOR => JsValue::Builtin(Builtin::ArrayCtor),
        id::PROCESS => JsValue::Builtin(Builtin::Process),
        id::FS => JsValue::Builtin(Builtin::Fs),
        id::FS_CONSTANTS => JsValue::Builtin(Builtin::FsConstants),
        id::UINT8_ARRAY_CTOR => JsValue::Builtin(Builtin::Uint8ArrayCtor),
        id::CRYPTO => JsValue::Builtin(Builtin::Crypto),
        id::DATE_CTOR => JsValue::Builtin(Builtin::DateCtor),
        id::DATE => JsValue::Builtin(Builtin::Date),
        id::FETCH => JsValue::Builtin(Builtin::Fetch),
        id::HEADERS_CTOR => JsValue::Builtin(Builtin::HeadersCtor),
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_predefined_id_resolves() {
        for predef_id in 0..id::NEXT_ID {
            assert!(predefined(predef_id).is_some(), "id {predef_id}");
        }
        assert!(predefined(id::NEXT_ID).is_none());
    }

    #[test]
    fn builtin_refs_round_trip_through_predefined() {
        for builtin in [
            Builtin::Global,
            Builtin::Go,
            Builtin::Process,
            Builtin::Fs,
            Builtin::Fetch,
        ] {
            let r = builtin.to_ref();
            match predefined(r.id()) {
                Some(JsValue::Builtin(b)) => assert_eq!(b, builtin),
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}
