//! RawRef: opaque reference to a host value
//!
//! The host runtime hands out `RawRef`s for every value it owns. The bridge
//! never looks inside one: it only passes it back to the host, and pairs
//! every acquired reference with exactly one release (see `hostlink::Handle`).
//!
//! # Encoding
//!
//! ```text
//! 0            → NULL (never a valid value; signals "error is set")
//! anything else → host-defined address or identifier
//! ```

use std::fmt;

/// Opaque, copyable reference to a value owned by the host runtime.
///
/// A `RawRef` carries no ownership by itself. Whether it counts as an owned
/// ("new") reference or a borrowed one is a property of the API that produced
/// it: every [`HostApi`](crate::HostApi) method returning a `RawRef` returns a
/// new reference, every `RawRef` parameter is borrowed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct RawRef(usize);

impl RawRef {
    /// The null reference
    pub const NULL: RawRef = RawRef(0);

    /// Create from a host-defined address
    #[inline(always)]
    pub const fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    /// Get the host-defined address
    #[inline(always)]
    pub const fn addr(self) -> usize {
        self.0
    }

    /// Check whether this is the null reference
    #[inline(always)]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// `None` for the null reference, `Some(self)` otherwise
    #[inline]
    pub const fn non_null(self) -> Option<RawRef> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Debug for RawRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "RawRef(NULL)")
        } else {
            write!(f, "RawRef({:#x})", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_and_non_null() {
        assert!(RawRef::NULL.is_null());
        assert!(RawRef::default().is_null());
        assert_eq!(RawRef::NULL.non_null(), None);

        let r = RawRef::from_addr(0x10);
        assert!(!r.is_null());
        assert_eq!(r.addr(), 0x10);
        assert_eq!(r.non_null(), Some(r));
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", RawRef::NULL), "RawRef(NULL)");
        assert_eq!(format!("{:?}", RawRef::from_addr(255)), "RawRef(0xff)");
    }
}
