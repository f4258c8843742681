//! Handle - owning reference to a host value
//!
//! Every `Handle` owns exactly one host reference: cloning acquires one,
//! dropping releases one, moving transfers it. Raw references enter
//! through [`Handle::from_owned`] (the caller's reference is taken over) or
//! [`Handle::from_borrowed`] (a fresh reference is acquired), and leave
//! through [`Handle::into_raw`].
//!
//! Because every intermediate value is a `Handle`, an operation that fails
//! part-way releases whatever it had acquired by unwinding normally.

use std::fmt;
use std::marker::PhantomData;

use hostlink_sdk::{HostApi, RawRef};

use crate::convert::{FromHost, ToHost};
use crate::error::{BridgeError, BridgeResult};
use crate::interp;

/// Owning reference to a host value
pub struct Handle {
    raw: RawRef,
    _not_send: PhantomData<*const ()>,
}

impl Handle {
    /// Take over an owned ("new") reference. Null means the host call that
    /// produced it failed and left its error set.
    pub fn from_owned(raw: RawRef) -> BridgeResult<Handle> {
        if raw.is_null() {
            return Err(BridgeError::HostRaised);
        }
        Ok(Handle {
            raw,
            _not_send: PhantomData,
        })
    }

    /// Acquire a new reference to a borrowed value
    pub fn from_borrowed(raw: RawRef) -> BridgeResult<Handle> {
        if raw.is_null() {
            return Err(BridgeError::HostRaised);
        }
        interp::host()?.incref(raw);
        Ok(Handle {
            raw,
            _not_send: PhantomData,
        })
    }

    /// The host "no value"
    pub fn none() -> BridgeResult<Handle> {
        Handle::from_owned(interp::host()?.none())
    }

    /// Hand the reference over to the caller
    pub fn into_raw(self) -> RawRef {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }

    /// The underlying raw reference, still owned by this handle
    pub fn as_raw(&self) -> RawRef {
        self.raw
    }

    /// Borrow without touching the reference count
    pub fn borrow(&self) -> BorrowedHandle<'_> {
        BorrowedHandle {
            raw: self.raw,
            _marker: PhantomData,
        }
    }

    /// Convert to a native value
    pub fn extract<T: FromHost>(&self) -> BridgeResult<T> {
        T::from_host(self)
    }

    /// Truthiness under the host's rules
    pub fn is_true(&self) -> BridgeResult<bool> {
        Ok(interp::host()?.is_true(self.raw)?)
    }

    /// True for the host "no value"
    pub fn is_none(&self) -> bool {
        interp::active().is_some_and(|host| host.is_none(self.raw))
    }

    /// Identity comparison
    pub fn is(&self, other: &Handle) -> bool {
        self.raw == other.raw
    }

    /// Current host reference count, 0 without an active runtime
    pub fn refcount(&self) -> isize {
        interp::active().map_or(0, |host| host.refcount(self.raw))
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// The host's `repr` of the value
    pub fn repr(&self) -> BridgeResult<String> {
        Ok(interp::host()?.repr(self.raw)?)
    }

    /// The host's `str` of the value
    pub fn str(&self) -> BridgeResult<String> {
        Ok(interp::host()?.str(self.raw)?)
    }

    /// Short name of the value's type
    pub fn type_name(&self) -> BridgeResult<String> {
        Ok(interp::host()?.type_name(self.raw))
    }

    /// The value's type object
    pub fn get_type(&self) -> BridgeResult<Handle> {
        Handle::from_owned(interp::host()?.type_of(self.raw))
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Attribute lookup
    pub fn getattr(&self, name: &str) -> BridgeResult<Handle> {
        Handle::from_owned(interp::host()?.get_attr(self.raw, name)?)
    }

    /// Attribute store
    pub fn setattr(&self, name: &str, value: impl ToHost) -> BridgeResult<()> {
        let host = interp::host()?;
        let value = value.to_host()?;
        Ok(host.set_attr(self.raw, name, value.raw)?)
    }

    /// Attribute presence; never fails
    pub fn hasattr(&self, name: &str) -> bool {
        interp::active().is_some_and(|host| host.has_attr(self.raw, name))
    }

    /// Attribute removal
    pub fn delattr(&self, name: &str) -> BridgeResult<()> {
        Ok(interp::host()?.del_attr(self.raw, name)?)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Call with positional arguments given as a tuple of native values
    pub fn call(&self, args: impl IntoArgs) -> BridgeResult<Handle> {
        let host = interp::host()?;
        let tuple = pack_args(host.as_ref(), args)?;
        Handle::from_owned(host.call(self.raw, tuple.raw, None)?)
    }

    /// Call with positional and named arguments
    pub fn call_with_kwargs(&self, args: impl IntoArgs, kwargs: &Handle) -> BridgeResult<Handle> {
        let host = interp::host()?;
        let tuple = pack_args(host.as_ref(), args)?;
        Handle::from_owned(host.call(self.raw, tuple.raw, Some(kwargs.raw))?)
    }

    /// Call without arguments
    pub fn call0(&self) -> BridgeResult<Handle> {
        self.call(())
    }

    /// Call with one argument
    pub fn call1<A: ToHost>(&self, a: A) -> BridgeResult<Handle> {
        self.call((a,))
    }

    /// Call with two arguments
    pub fn call2<A: ToHost, B: ToHost>(&self, a: A, b: B) -> BridgeResult<Handle> {
        self.call((a, b))
    }

    /// Call with three arguments
    pub fn call3<A: ToHost, B: ToHost, C: ToHost>(&self, a: A, b: B, c: C) -> BridgeResult<Handle> {
        self.call((a, b, c))
    }

    /// Call with four arguments
    pub fn call4<A: ToHost, B: ToHost, C: ToHost, D: ToHost>(
        &self,
        a: A,
        b: B,
        c: C,
        d: D,
    ) -> BridgeResult<Handle> {
        self.call((a, b, c, d))
    }

    /// Look a method up and call it
    pub fn call_method(&self, name: &str, args: impl IntoArgs) -> BridgeResult<Handle> {
        self.getattr(name)?.call(args)
    }
}

impl Clone for Handle {
    fn clone(&self) -> Self {
        match interp::active() {
            Some(host) => host.incref(self.raw),
            None => tracing::trace!(raw = ?self.raw, "cloned handle without an active runtime"),
        }
        Handle {
            raw: self.raw,
            _not_send: PhantomData,
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        match interp::active() {
            Some(host) => host.decref(self.raw),
            None => tracing::trace!(raw = ?self.raw, "released handle without an active runtime"),
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.raw).finish()
    }
}

/// Non-owning view of a host value, valid while the owner it was
/// borrowed from is alive
#[derive(Clone, Copy)]
pub struct BorrowedHandle<'a> {
    raw: RawRef,
    _marker: PhantomData<&'a Handle>,
}

impl<'a> BorrowedHandle<'a> {
    /// The underlying raw reference
    pub fn as_raw(&self) -> RawRef {
        self.raw
    }

    /// Acquire an owning handle
    pub fn to_handle(&self) -> BridgeResult<Handle> {
        Handle::from_borrowed(self.raw)
    }
}

impl fmt::Debug for BorrowedHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BorrowedHandle").field(&self.raw).finish()
    }
}

/// Positional argument lists: tuples of up to four native values
pub trait IntoArgs {
    /// Convert every argument, in order
    fn into_args(self) -> BridgeResult<Vec<Handle>>;
}

impl IntoArgs for () {
    fn into_args(self) -> BridgeResult<Vec<Handle>> {
        Ok(Vec::new())
    }
}

impl IntoArgs for Vec<Handle> {
    fn into_args(self) -> BridgeResult<Vec<Handle>> {
        Ok(self)
    }
}

macro_rules! impl_into_args {
    ($($ty:ident $var:ident),+) => {
        impl<$($ty: ToHost),+> IntoArgs for ($($ty,)+) {
            fn into_args(self) -> BridgeResult<Vec<Handle>> {
                let ($($var,)+) = self;
                let mut args = Vec::new();
                $(args.push($var.to_host()?);)+
                Ok(args)
            }
        }
    };
}

impl_into_args!(A a);
impl_into_args!(A a, B b);
impl_into_args!(A a, B b, C c);
impl_into_args!(A a, B b, C c, D d);

/// Build the host argument tuple; converted arguments are released if a
/// later one fails
pub(crate) fn pack_args(host: &dyn HostApi, args: impl IntoArgs) -> BridgeResult<Handle> {
    let args = args.into_args()?;
    let raws: Vec<RawRef> = args.iter().map(Handle::as_raw).collect();
    Handle::from_owned(host.new_tuple(&raws)?)
}
