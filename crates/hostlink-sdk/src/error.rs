//! Error categories shared by the host runtime and the bridge

use std::fmt;

/// Result type for host API calls
pub type HostResult<T> = Result<T, HostRaised>;

/// Marker returned by a host API call that failed.
///
/// The host has already stored the category and message in its error slot;
/// the marker itself carries nothing so that nobody is tempted to overwrite
/// that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("error raised inside the host runtime")]
pub struct HostRaised;

/// Error categories understood by both sides of the boundary.
///
/// This is a closed set. The hierarchy is encoded by [`ErrorKind::parent`]
/// rather than by nesting types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Root of the hierarchy
    Exception,
    /// Arithmetic failure
    Arithmetic,
    /// Floating point failure
    FloatingPoint,
    /// Result too large to be represented
    Overflow,
    /// Division or modulo by zero
    ZeroDivision,
    /// Failed assertion
    Assertion,
    /// Failure reported by the environment
    Environment,
    /// Input/output failure
    Io,
    /// Operating system failure
    Os,
    /// Allocation failure
    Memory,
    /// Generic runtime failure
    Runtime,
    /// Operation not implemented
    NotImplemented,
    /// Value of the wrong type
    Type,
    /// Value of the right type but wrong content
    Value,
    /// Failed lookup
    Lookup,
    /// Missing mapping key
    Key,
    /// Sequence index out of range
    Index,
    /// Missing or read-only attribute
    Attribute,
    /// Unbound name
    Name,
    /// Module could not be imported or initialized
    Import,
    /// Unparseable source text
    Syntax,
}

impl ErrorKind {
    /// Every kind, parents before refinements
    pub const ALL: [ErrorKind; 21] = [
        ErrorKind::Exception,
        ErrorKind::Arithmetic,
        ErrorKind::FloatingPoint,
        ErrorKind::Overflow,
        ErrorKind::ZeroDivision,
        ErrorKind::Assertion,
        ErrorKind::Environment,
        ErrorKind::Io,
        ErrorKind::Os,
        ErrorKind::Memory,
        ErrorKind::Runtime,
        ErrorKind::NotImplemented,
        ErrorKind::Type,
        ErrorKind::Value,
        ErrorKind::Lookup,
        ErrorKind::Key,
        ErrorKind::Index,
        ErrorKind::Attribute,
        ErrorKind::Name,
        ErrorKind::Import,
        ErrorKind::Syntax,
    ];

    /// Host-visible category name
    pub const fn name(self) -> &'static str {
        match self {
            ErrorKind::Exception => "Exception",
            ErrorKind::Arithmetic => "ArithmeticError",
            ErrorKind::FloatingPoint => "FloatingPointError",
            ErrorKind::Overflow => "OverflowError",
            ErrorKind::ZeroDivision => "ZeroDivisionError",
            ErrorKind::Assertion => "AssertionError",
            ErrorKind::Environment => "EnvironmentError",
            ErrorKind::Io => "IOError",
            ErrorKind::Os => "OSError",
            ErrorKind::Memory => "MemoryError",
            ErrorKind::Runtime => "RuntimeError",
            ErrorKind::NotImplemented => "NotImplementedError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Value => "ValueError",
            ErrorKind::Lookup => "LookupError",
            ErrorKind::Key => "KeyError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Attribute => "AttributeError",
            ErrorKind::Name => "NameError",
            ErrorKind::Import => "ImportError",
            ErrorKind::Syntax => "SyntaxError",
        }
    }

    /// Look a kind up by its host-visible name
    pub fn from_name(name: &str) -> Option<ErrorKind> {
        ErrorKind::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    /// The kind this one refines, `None` for the root
    pub const fn parent(self) -> Option<ErrorKind> {
        match self {
            ErrorKind::Exception => None,
            ErrorKind::FloatingPoint | ErrorKind::Overflow | ErrorKind::ZeroDivision => {
                Some(ErrorKind::Arithmetic)
            }
            ErrorKind::Io | ErrorKind::Os => Some(ErrorKind::Environment),
            ErrorKind::NotImplemented => Some(ErrorKind::Runtime),
            ErrorKind::Key | ErrorKind::Index => Some(ErrorKind::Lookup),
            _ => Some(ErrorKind::Exception),
        }
    }

    /// True if `self` is `ancestor` or one of its refinements
    pub fn is_a(self, ancestor: ErrorKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == ancestor {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Contents of the host error slot, taken out with
/// [`HostApi::fetch_error`](crate::HostApi::fetch_error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostErrorRecord {
    /// Error category
    pub kind: ErrorKind,
    /// Message text, exactly as raised
    pub message: String,
}

impl HostErrorRecord {
    /// Create a record
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for HostErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy() {
        assert!(ErrorKind::ZeroDivision.is_a(ErrorKind::Arithmetic));
        assert!(ErrorKind::ZeroDivision.is_a(ErrorKind::Exception));
        assert!(ErrorKind::NotImplemented.is_a(ErrorKind::Runtime));
        assert!(ErrorKind::Io.is_a(ErrorKind::Environment));
        assert!(ErrorKind::Key.is_a(ErrorKind::Lookup));
        assert!(!ErrorKind::Value.is_a(ErrorKind::Type));
        assert!(!ErrorKind::Arithmetic.is_a(ErrorKind::Overflow));
    }

    #[test]
    fn test_every_kind_reaches_root() {
        for kind in ErrorKind::ALL {
            assert!(kind.is_a(ErrorKind::Exception), "{kind} is detached");
        }
    }

    #[test]
    fn test_names_round_trip() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ErrorKind::from_name("NoSuchError"), None);
    }

    #[test]
    fn test_record_display() {
        let record = HostErrorRecord::new(ErrorKind::Value, "bad input");
        assert_eq!(record.to_string(), "ValueError: bad input");
    }
}
