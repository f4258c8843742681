//! Integration tests for error translation at the host boundary
//!
//! Every native failure reaches the host as exactly one error of the
//! matching category with the message carried over.

use std::rc::Rc;

use hostlink::interp::{self, InterpGuard};
use hostlink::sdk::{ErrorKind, HostApi};
use hostlink::views::{Callable, Dict};
use hostlink::{builtins, BridgeError, BridgeResult, Handle};
use hostlink_host::MemoryHost;
use pretty_assertions::assert_eq;

fn setup() -> (Rc<MemoryHost>, InterpGuard) {
    let host = MemoryHost::new();
    let guard = interp::install(host.clone());
    (host, guard)
}

/// Call `f` from host code and return the error the host sees
fn raised_by(host: &MemoryHost, f: Callable) -> (ErrorKind, String) {
    let globals = Dict::empty().unwrap();
    globals.set("f", f.as_handle()).unwrap();
    let result = builtins::eval_in("f()", &globals, None);
    assert_eq!(result.unwrap_err(), BridgeError::HostRaised);
    let record = host.fetch_error().expect("error slot should be set");
    (record.kind, record.message)
}

#[test]
fn test_every_kind_reaches_the_host() {
    let (host, _guard) = setup();
    for kind in ErrorKind::ALL {
        let fail = Callable::from_fn("fail", move || -> BridgeResult<i64> {
            Err(BridgeError::new(kind, "bad input"))
        })
        .unwrap();
        assert_eq!(raised_by(&host, fail), (kind, "bad input".to_string()));
        assert_eq!(host.error_occurred(), None);
    }
}

#[test]
fn test_named_constructors() {
    let cases: [(fn(&'static str) -> BridgeError, ErrorKind); 8] = [
        (|m| BridgeError::value(m), ErrorKind::Value),
        (|m| BridgeError::type_error(m), ErrorKind::Type),
        (|m| BridgeError::key(m), ErrorKind::Key),
        (|m| BridgeError::index(m), ErrorKind::Index),
        (|m| BridgeError::zero_division(m), ErrorKind::ZeroDivision),
        (|m| BridgeError::not_implemented(m), ErrorKind::NotImplemented),
        (|m| BridgeError::os(m), ErrorKind::Os),
        (|m| BridgeError::syntax(m), ErrorKind::Syntax),
    ];
    for (make, kind) in cases {
        assert_eq!(make("bad input").kind(), Some(kind));
        assert_eq!(make("bad input").message(), "bad input");
    }
}

#[test]
fn test_standard_failures() {
    let (host, _guard) = setup();

    let parse = Callable::from_fn("parse", || "12x".parse::<i64>()).unwrap();
    let (kind, message) = raised_by(&host, parse);
    assert_eq!(kind, ErrorKind::Value);
    assert_eq!(message, "invalid digit found in string");

    let io = Callable::from_fn("io", || -> std::io::Result<i64> {
        Err(std::io::Error::new(std::io::ErrorKind::Other, "disk unplugged"))
    })
    .unwrap();
    assert_eq!(raised_by(&host, io), (ErrorKind::Io, "disk unplugged".to_string()));

    let any = Callable::from_fn("any", || -> anyhow::Result<i64> {
        anyhow::bail!("pipeline stalled")
    })
    .unwrap();
    assert_eq!(
        raised_by(&host, any),
        (ErrorKind::Runtime, "pipeline stalled".to_string())
    );

    let oom = Callable::from_fn("oom", || -> BridgeResult<i64> {
        let mut buffer = Vec::<u64>::new();
        buffer.try_reserve(usize::MAX)?;
        Ok(0)
    })
    .unwrap();
    assert_eq!(
        raised_by(&host, oom),
        (ErrorKind::Memory, hostlink::OUT_OF_MEMORY_MESSAGE.to_string())
    );
}

#[test]
fn test_panics() {
    let (host, _guard) = setup();

    let message = Callable::from_fn("message", || -> i64 {
        let limit = 3;
        panic!("limit {limit} exceeded")
    })
    .unwrap();
    assert_eq!(
        raised_by(&host, message),
        (ErrorKind::Runtime, "limit 3 exceeded".to_string())
    );

    let opaque = Callable::from_fn("opaque", || -> i64 { std::panic::panic_any(5u8) }).unwrap();
    assert_eq!(
        raised_by(&host, opaque),
        (ErrorKind::Runtime, hostlink::UNKNOWN_PANIC_MESSAGE.to_string())
    );
}

#[test]
fn test_host_errors_pass_through_unchanged() {
    let (host, _guard) = setup();
    let lookup = Callable::from_fn("lookup", || -> BridgeResult<Handle> {
        let empty = Dict::empty()?;
        empty.as_handle().getattr("missing")
    })
    .unwrap();
    let (kind, message) = raised_by(&host, lookup);
    assert_eq!(kind, ErrorKind::Attribute);
    assert!(message.contains("missing"), "{message}");
}

#[test]
fn test_fetch_takes_pending_error() {
    let (host, _guard) = setup();
    assert_eq!(BridgeError::fetch(), None);

    let dict = Dict::empty().unwrap();
    let err = dict.get::<i64>("absent").unwrap_err();
    assert_eq!(err, BridgeError::HostRaised);
    let fetched = BridgeError::fetch().unwrap();
    assert_eq!(fetched.kind(), Some(ErrorKind::Key));
    assert_eq!(host.error_occurred(), None);
}
