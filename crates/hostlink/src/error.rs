//! Error domain of the bridge
//!
//! [`BridgeError`] is the one error type native code returns. It is turned
//! into host error state exactly once, at the outermost host-facing call
//! (see [`crate::boundary`]), by [`BridgeError::restore`].

use std::any::Any;
use std::collections::TryReserveError;
use std::convert::Infallible;
use std::num::{ParseFloatError, ParseIntError, TryFromIntError};

use hostlink_sdk::{ErrorKind, HostApi, HostRaised};

use crate::interp;

/// Result type used throughout the bridge
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Message used for allocation failures
pub const OUT_OF_MEMORY_MESSAGE: &str = "Failed memory allocation in native code";

/// Message used for panics without a string payload
pub const UNKNOWN_PANIC_MESSAGE: &str = "Unknown native panic occurred";

/// A failure crossing the native/host boundary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The error originated inside the host, whose error slot is already
    /// set. Translating it leaves the slot alone.
    #[error("error raised inside the host runtime")]
    HostRaised,

    /// A native error of a known category
    #[error("{kind}: {message}")]
    Raised {
        /// Host category
        kind: ErrorKind,
        /// Message carried over verbatim
        message: String,
    },

    /// A native standard failure (an `std::error::Error`, an
    /// `anyhow::Error`, or a panic with a string payload)
    #[error("{message}")]
    Foreign {
        /// Best-effort description
        message: String,
    },

    /// Native allocation failure
    #[error("Failed memory allocation in native code")]
    OutOfMemory,

    /// Unrecognized native failure
    #[error("Unknown native panic occurred")]
    Unknown,
}

macro_rules! kind_constructors {
    ($($(#[$doc:meta])* $fn_name:ident => $kind:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $fn_name(message: impl Into<String>) -> Self {
                Self::new(ErrorKind::$kind, message)
            }
        )*
    };
}

impl BridgeError {
    /// Error of the given category
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        BridgeError::Raised {
            kind,
            message: message.into(),
        }
    }

    kind_constructors! {
        /// General error
        exception => Exception,
        /// Arithmetic error
        arithmetic => Arithmetic,
        /// Floating point error
        floating_point => FloatingPoint,
        /// Overflow error
        overflow => Overflow,
        /// Division by zero
        zero_division => ZeroDivision,
        /// Failed assertion
        assertion => Assertion,
        /// Environment error
        environment => Environment,
        /// I/O error
        io => Io,
        /// OS error
        os => Os,
        /// Memory error with a custom message
        memory => Memory,
        /// Runtime error
        runtime => Runtime,
        /// Not implemented
        not_implemented => NotImplemented,
        /// Type error (`type` is a keyword)
        type_error => Type,
        /// Value error
        value => Value,
        /// Lookup error
        lookup => Lookup,
        /// Missing key
        key => Key,
        /// Index out of range
        index => Index,
        /// Attribute error
        attribute => Attribute,
        /// Unbound name
        name => Name,
        /// Import failure
        import => Import,
        /// Syntax error
        syntax => Syntax,
    }

    /// Wrap any standard error as a foreign failure
    pub fn foreign(err: impl std::error::Error) -> Self {
        BridgeError::Foreign {
            message: err.to_string(),
        }
    }

    /// Classify the payload of a caught panic
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        if let Some(message) = payload.downcast_ref::<&str>() {
            BridgeError::Foreign {
                message: (*message).to_string(),
            }
        } else if let Some(message) = payload.downcast_ref::<String>() {
            BridgeError::Foreign {
                message: message.clone(),
            }
        } else {
            BridgeError::Unknown
        }
    }

    /// Host category this error becomes, `None` for [`BridgeError::HostRaised`]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            BridgeError::HostRaised => None,
            BridgeError::Raised { kind, .. } => Some(*kind),
            BridgeError::Foreign { .. } | BridgeError::Unknown => Some(ErrorKind::Runtime),
            BridgeError::OutOfMemory => Some(ErrorKind::Memory),
        }
    }

    /// Message the host sees
    pub fn message(&self) -> String {
        match self {
            BridgeError::Raised { message, .. } | BridgeError::Foreign { message } => {
                message.clone()
            }
            other => other.to_string(),
        }
    }

    /// Set the host error slot from this error.
    ///
    /// `HostRaised` is a no-op: the slot already holds the original error.
    pub fn restore(self, host: &dyn HostApi) {
        let (kind, message) = match self {
            BridgeError::HostRaised => return,
            BridgeError::Raised { kind, message } => (kind, message),
            BridgeError::Foreign { message } => (ErrorKind::Runtime, message),
            BridgeError::OutOfMemory => (ErrorKind::Memory, OUT_OF_MEMORY_MESSAGE.to_string()),
            BridgeError::Unknown => (ErrorKind::Runtime, UNKNOWN_PANIC_MESSAGE.to_string()),
        };
        tracing::trace!(kind = %kind, message = %message, "translating native error");
        host.set_error(kind, &message);
    }

    /// Take the pending host error out of the slot of the active runtime
    pub fn fetch() -> Option<BridgeError> {
        let host = interp::active()?;
        let record = host.fetch_error()?;
        Some(BridgeError::Raised {
            kind: record.kind,
            message: record.message,
        })
    }
}

impl From<HostRaised> for BridgeError {
    fn from(_: HostRaised) -> Self {
        BridgeError::HostRaised
    }
}

impl From<Infallible> for BridgeError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::io(err.to_string())
    }
}

impl From<TryFromIntError> for BridgeError {
    fn from(err: TryFromIntError) -> Self {
        BridgeError::overflow(err.to_string())
    }
}

impl From<ParseIntError> for BridgeError {
    fn from(err: ParseIntError) -> Self {
        BridgeError::value(err.to_string())
    }
}

impl From<ParseFloatError> for BridgeError {
    fn from(err: ParseFloatError) -> Self {
        BridgeError::value(err.to_string())
    }
}

impl From<TryReserveError> for BridgeError {
    fn from(_: TryReserveError) -> Self {
        BridgeError::OutOfMemory
    }
}

impl From<anyhow::Error> for BridgeError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<BridgeError>() {
            Ok(bridge) => bridge,
            Err(err) => BridgeError::Foreign {
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(BridgeError::value("x").kind(), Some(ErrorKind::Value));
        assert_eq!(BridgeError::type_error("x").kind(), Some(ErrorKind::Type));
        assert_eq!(BridgeError::HostRaised.kind(), None);
        assert_eq!(BridgeError::OutOfMemory.kind(), Some(ErrorKind::Memory));
        assert_eq!(BridgeError::Unknown.kind(), Some(ErrorKind::Runtime));
        assert_eq!(
            BridgeError::Foreign {
                message: "boom".into()
            }
            .kind(),
            Some(ErrorKind::Runtime)
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(BridgeError::value("bad input").message(), "bad input");
        assert_eq!(BridgeError::value("bad input").to_string(), "ValueError: bad input");
        assert_eq!(BridgeError::OutOfMemory.message(), OUT_OF_MEMORY_MESSAGE);
        assert_eq!(BridgeError::Unknown.message(), UNKNOWN_PANIC_MESSAGE);
    }

    #[test]
    fn test_std_conversions() {
        let err: BridgeError = u8::try_from(300i64).unwrap_err().into();
        assert_eq!(err.kind(), Some(ErrorKind::Overflow));

        let err: BridgeError = "x1".parse::<i64>().unwrap_err().into();
        assert_eq!(err.kind(), Some(ErrorKind::Value));

        let err: BridgeError = "abc".parse::<f64>().unwrap_err().into();
        assert_eq!(err.kind(), Some(ErrorKind::Value));

        let err: BridgeError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing file").into();
        assert_eq!(err, BridgeError::io("missing file"));

        let err: BridgeError = Vec::<u64>::new().try_reserve(usize::MAX).unwrap_err().into();
        assert_eq!(err, BridgeError::OutOfMemory);
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: BridgeError = anyhow::Error::new(BridgeError::key("k")).into();
        assert_eq!(err, BridgeError::key("k"));

        let err: BridgeError = anyhow::anyhow!("disk on fire").into();
        assert_eq!(
            err,
            BridgeError::Foreign {
                message: "disk on fire".into()
            }
        );
    }

    #[test]
    fn test_panic_payloads() {
        let err = BridgeError::from_panic(Box::new("static message"));
        assert_eq!(err.message(), "static message");

        let err = BridgeError::from_panic(Box::new(String::from("owned message")));
        assert_eq!(err.message(), "owned message");

        let err = BridgeError::from_panic(Box::new(42u32));
        assert_eq!(err, BridgeError::Unknown);
    }
}
