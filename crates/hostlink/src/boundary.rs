//! The host-facing edge of every bridged call
//!
//! Hooks registered with the host (method and function thunks, getters,
//! construction, module entry points) run their body through [`guard`].
//! It is the only place the bridge writes the host error slot. On return
//! exactly one of these holds: a valid new reference was returned, or the
//! result is null and the error slot is set.

use std::panic::{catch_unwind, AssertUnwindSafe};

use hostlink_sdk::{ErrorKind, RawRef};

use crate::error::{BridgeError, BridgeResult};
use crate::interp;

/// Raised when a body fails but neither it nor the host set an error
pub const MISSING_ERROR_MESSAGE: &str =
    "native code returned a host failure without setting an error";

/// Run `body` and translate its outcome for the host.
///
/// With `catch_panics`, a panic is converted like any other native
/// failure instead of unwinding into the host.
pub fn guard(catch_panics: bool, body: impl FnOnce() -> BridgeResult<RawRef>) -> RawRef {
    let outcome = if catch_panics {
        catch_unwind(AssertUnwindSafe(body))
            .unwrap_or_else(|payload| Err(BridgeError::from_panic(payload)))
    } else {
        body()
    };

    let Some(host) = interp::active() else {
        tracing::trace!("boundary crossed without an active runtime");
        return match outcome {
            Ok(raw) => raw,
            Err(_) => RawRef::NULL,
        };
    };

    let raw = match outcome {
        Ok(raw) if host.error_occurred().is_some() => {
            // A value and a pending error: the error wins
            if !raw.is_null() {
                host.decref(raw);
            }
            RawRef::NULL
        }
        Ok(raw) => raw,
        Err(err) => {
            err.restore(host.as_ref());
            RawRef::NULL
        }
    };
    if raw.is_null() && host.error_occurred().is_none() {
        tracing::warn!("native call failed without an error set");
        host.set_error(ErrorKind::Runtime, MISSING_ERROR_MESSAGE);
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Handle, ToHost};
    use hostlink_host::MemoryHost;
    use hostlink_sdk::HostApi;

    #[test]
    fn test_success_returns_reference() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let raw = guard(true, || Ok(5i64.to_host()?.into_raw()));
        assert!(!raw.is_null());
        assert_eq!(host.as_int(raw).unwrap(), 5);
        assert_eq!(host.error_occurred(), None);
        host.decref(raw);
    }

    #[test]
    fn test_error_sets_slot() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let raw = guard(true, || Err(BridgeError::value("bad input")));
        assert!(raw.is_null());
        let record = host.fetch_error().unwrap();
        assert_eq!(record.kind, ErrorKind::Value);
        assert_eq!(record.message, "bad input");
    }

    #[test]
    fn test_host_raised_is_not_overwritten() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let raw = guard(true, || {
            let missing = Handle::from_owned(host.new_dict()?)?;
            Ok(missing.getattr("nope")?.into_raw())
        });
        assert!(raw.is_null());
        assert_eq!(host.fetch_error().unwrap().kind, ErrorKind::Attribute);
    }

    #[test]
    fn test_null_result_always_sets_an_error() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let raw = guard(true, || Err(BridgeError::HostRaised));
        assert!(raw.is_null());
        let record = host.fetch_error().unwrap();
        assert_eq!(record.kind, ErrorKind::Runtime);
        assert_eq!(record.message, MISSING_ERROR_MESSAGE);

        let raw = guard(true, || Ok(Handle::from_owned(RawRef::NULL)?.into_raw()));
        assert!(raw.is_null());
        assert_eq!(host.fetch_error().unwrap().message, MISSING_ERROR_MESSAGE);

        let raw = guard(true, || Ok(RawRef::NULL));
        assert!(raw.is_null());
        assert_eq!(host.fetch_error().unwrap().kind, ErrorKind::Runtime);
    }

    #[test]
    fn test_panics_are_translated() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let raw = guard(true, || panic!("native code gave up"));
        assert!(raw.is_null());
        let record = host.fetch_error().unwrap();
        assert_eq!(record.kind, ErrorKind::Runtime);
        assert_eq!(record.message, "native code gave up");

        let raw = guard(true, || std::panic::panic_any(17u8));
        assert!(raw.is_null());
        let record = host.fetch_error().unwrap();
        assert_eq!(record.message, crate::error::UNKNOWN_PANIC_MESSAGE);
    }

    #[test]
    fn test_pending_error_wins_over_value() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());
        let before = host.live_objects();

        let raw = guard(true, || {
            let value = "leaked?".to_host()?;
            host.set_error(ErrorKind::Runtime, "late failure");
            Ok(value.into_raw())
        });
        assert!(raw.is_null());
        assert_eq!(host.fetch_error().unwrap().message, "late failure");
        assert_eq!(host.live_objects(), before);
    }
}
