//! Marshalling between native values and host values
//!
//! - [`ToHost`]: native → [`Handle`]; total for primitives (fails only when
//!   the host cannot allocate, or an unsigned value exceeds the host's
//!   integer range)
//! - [`FromHost`]: [`Handle`] → native; a type error when the value is not
//!   coercible, an overflow error when an integer does not fit
//! - [`IntoCallResult`]: what a bound native function may return

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use hostlink_sdk::RawRef;

use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;
use crate::interp;

/// Conversion of a native value into a host value
pub trait ToHost {
    /// Produce a new host reference holding this value
    fn to_host(&self) -> BridgeResult<Handle>;
}

/// Conversion of a host value into a native value
pub trait FromHost: Sized {
    /// Convert, failing with a type, value or overflow error
    fn from_host(handle: &Handle) -> BridgeResult<Self>;
}

/// Return values of bound native functions: any [`ToHost`] value, or a
/// `Result` of one whose error converts into [`BridgeError`]
pub trait IntoCallResult {
    /// Marshal the outcome of the native call
    fn into_call_result(self) -> BridgeResult<Handle>;
}

impl<T: ToHost> IntoCallResult for T {
    fn into_call_result(self) -> BridgeResult<Handle> {
        self.to_host()
    }
}

impl<T: ToHost, E: Into<BridgeError>> IntoCallResult for Result<T, E> {
    fn into_call_result(self) -> BridgeResult<Handle> {
        self.map_err(Into::into)?.to_host()
    }
}

pub(crate) fn type_mismatch(expected: &str, handle: &Handle) -> BridgeError {
    match handle.type_name() {
        Ok(got) => BridgeError::type_error(format!("expected {expected}, got '{got}'")),
        Err(err) => err,
    }
}

// ============================================================================
// References
// ============================================================================

impl<T: ToHost + ?Sized> ToHost for &T {
    fn to_host(&self) -> BridgeResult<Handle> {
        (**self).to_host()
    }
}

impl ToHost for Handle {
    fn to_host(&self) -> BridgeResult<Handle> {
        Ok(self.clone())
    }
}

impl FromHost for Handle {
    fn from_host(handle: &Handle) -> BridgeResult<Self> {
        Ok(handle.clone())
    }
}

// ============================================================================
// Primitives
// ============================================================================

impl ToHost for () {
    fn to_host(&self) -> BridgeResult<Handle> {
        Handle::none()
    }
}

impl ToHost for bool {
    fn to_host(&self) -> BridgeResult<Handle> {
        Handle::from_owned(interp::host()?.new_bool(*self))
    }
}

/// Truthiness, as the host itself tests conditions
impl FromHost for bool {
    fn from_host(handle: &Handle) -> BridgeResult<Self> {
        handle.is_true()
    }
}

macro_rules! impl_int {
    ($($ty:ty),*) => {
        $(
            impl ToHost for $ty {
                fn to_host(&self) -> BridgeResult<Handle> {
                    let value = i64::try_from(*self)?;
                    Handle::from_owned(interp::host()?.new_int(value)?)
                }
            }

            impl FromHost for $ty {
                fn from_host(handle: &Handle) -> BridgeResult<Self> {
                    let value = interp::host()?.as_int(handle.as_raw())?;
                    Ok(<$ty>::try_from(value)?)
                }
            }
        )*
    };
}

impl_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl ToHost for f64 {
    fn to_host(&self) -> BridgeResult<Handle> {
        Handle::from_owned(interp::host()?.new_float(*self)?)
    }
}

impl FromHost for f64 {
    fn from_host(handle: &Handle) -> BridgeResult<Self> {
        Ok(interp::host()?.as_float(handle.as_raw())?)
    }
}

impl ToHost for f32 {
    fn to_host(&self) -> BridgeResult<Handle> {
        f64::from(*self).to_host()
    }
}

impl FromHost for f32 {
    fn from_host(handle: &Handle) -> BridgeResult<Self> {
        Ok(f64::from_host(handle)? as f32)
    }
}

impl ToHost for str {
    fn to_host(&self) -> BridgeResult<Handle> {
        Handle::from_owned(interp::host()?.new_str(self)?)
    }
}

impl ToHost for String {
    fn to_host(&self) -> BridgeResult<Handle> {
        self.as_str().to_host()
    }
}

impl FromHost for String {
    fn from_host(handle: &Handle) -> BridgeResult<Self> {
        Ok(interp::host()?.as_str(handle.as_raw())?)
    }
}

// ============================================================================
// Option
// ============================================================================

impl<T: ToHost> ToHost for Option<T> {
    fn to_host(&self) -> BridgeResult<Handle> {
        match self {
            Some(value) => value.to_host(),
            None => Handle::none(),
        }
    }
}

impl<T: FromHost> FromHost for Option<T> {
    fn from_host(handle: &Handle) -> BridgeResult<Self> {
        if handle.is_none() {
            Ok(None)
        } else {
            T::from_host(handle).map(Some)
        }
    }
}

// ============================================================================
// Sequences
// ============================================================================

impl<T: ToHost> ToHost for [T] {
    fn to_host(&self) -> BridgeResult<Handle> {
        let host = interp::host()?;
        let items = self
            .iter()
            .map(ToHost::to_host)
            .collect::<BridgeResult<Vec<Handle>>>()?;
        let raws: Vec<RawRef> = items.iter().map(Handle::as_raw).collect();
        Handle::from_owned(host.new_list(&raws)?)
    }
}

impl<T: ToHost> ToHost for Vec<T> {
    fn to_host(&self) -> BridgeResult<Handle> {
        self.as_slice().to_host()
    }
}

impl<T: FromHost> FromHost for Vec<T> {
    fn from_host(handle: &Handle) -> BridgeResult<Self> {
        let host = interp::host()?;
        if !host.check_sequence(handle.as_raw()) {
            return Err(type_mismatch("a sequence", handle));
        }
        let len = host.len(handle.as_raw())?;
        let mut items = Vec::new();
        items.try_reserve(len)?;
        for index in 0..len {
            let item = Handle::from_owned(host.seq_get(handle.as_raw(), index as isize)?)?;
            items.push(T::from_host(&item)?);
        }
        Ok(items)
    }
}

// ============================================================================
// Mappings
// ============================================================================

fn dict_from_pairs<'a, T: ToHost + 'a>(
    pairs: impl Iterator<Item = (&'a String, &'a T)>,
) -> BridgeResult<Handle> {
    let host = interp::host()?;
    let dict = Handle::from_owned(host.new_dict()?)?;
    for (key, value) in pairs {
        let key = key.to_host()?;
        let value = value.to_host()?;
        host.set_item(dict.as_raw(), key.as_raw(), value.as_raw())?;
    }
    Ok(dict)
}

fn pairs_from_mapping<T: FromHost>(handle: &Handle) -> BridgeResult<Vec<(String, T)>> {
    let host = interp::host()?;
    if !host.check_mapping(handle.as_raw()) {
        return Err(type_mismatch("a mapping", handle));
    }
    let keys = Handle::from_owned(host.keys(handle.as_raw())?)?;
    let len = host.len(keys.as_raw())?;
    let mut pairs = Vec::with_capacity(len);
    for index in 0..len {
        let key = Handle::from_owned(host.seq_get(keys.as_raw(), index as isize)?)?;
        let value = Handle::from_owned(host.get_item(handle.as_raw(), key.as_raw())?)?;
        let key = String::from_host(&key)
            .map_err(|_| type_mismatch("str keys", &key))?;
        pairs.push((key, T::from_host(&value)?));
    }
    Ok(pairs)
}

impl<T: ToHost, S: BuildHasher> ToHost for HashMap<String, T, S> {
    fn to_host(&self) -> BridgeResult<Handle> {
        dict_from_pairs(self.iter())
    }
}

impl<T: FromHost, S: BuildHasher + Default> FromHost for HashMap<String, T, S> {
    fn from_host(handle: &Handle) -> BridgeResult<Self> {
        Ok(pairs_from_mapping(handle)?.into_iter().collect())
    }
}

impl<T: ToHost> ToHost for BTreeMap<String, T> {
    fn to_host(&self) -> BridgeResult<Handle> {
        dict_from_pairs(self.iter())
    }
}

impl<T: FromHost> FromHost for BTreeMap<String, T> {
    fn from_host(handle: &Handle) -> BridgeResult<Self> {
        Ok(pairs_from_mapping(handle)?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink_host::MemoryHost;
    use hostlink_sdk::{ErrorKind, HostApi};

    #[test]
    fn test_primitives() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        assert_eq!(42i32.to_host().unwrap().extract::<i32>().unwrap(), 42);
        assert_eq!(true.to_host().unwrap().extract::<bool>().unwrap(), true);
        assert_eq!(1.5f32.to_host().unwrap().extract::<f32>().unwrap(), 1.5);
        assert_eq!("hi".to_host().unwrap().extract::<String>().unwrap(), "hi");
        assert!(().to_host().unwrap().is_none());

        // ints unbox as floats, not the other way round
        assert_eq!(3i64.to_host().unwrap().extract::<f64>().unwrap(), 3.0);
        let err = 3.5f64.to_host().unwrap().extract::<i64>().unwrap_err();
        assert_eq!(err, BridgeError::HostRaised);
        assert_eq!(host.fetch_error().unwrap().kind, ErrorKind::Type);
    }

    #[test]
    fn test_narrowing_overflows() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let big = 300i64.to_host().unwrap();
        assert_eq!(big.extract::<u8>().unwrap_err().kind(), Some(ErrorKind::Overflow));
        assert_eq!(big.extract::<u16>().unwrap(), 300);

        let negative = (-1i64).to_host().unwrap();
        assert_eq!(
            negative.extract::<usize>().unwrap_err().kind(),
            Some(ErrorKind::Overflow)
        );
        assert_eq!(u64::MAX.to_host().unwrap_err().kind(), Some(ErrorKind::Overflow));
    }

    #[test]
    fn test_bool_follows_truthiness() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        assert!(1i64.to_host().unwrap().extract::<bool>().unwrap());
        assert!(!0i64.to_host().unwrap().extract::<bool>().unwrap());
        assert!(!"".to_host().unwrap().extract::<bool>().unwrap());
        assert!(vec![1i64].to_host().unwrap().extract::<bool>().unwrap());
        assert!(!Handle::none().unwrap().extract::<bool>().unwrap());
    }

    #[test]
    fn test_option() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let none = None::<i64>.to_host().unwrap();
        assert_eq!(none.extract::<Option<i64>>().unwrap(), None);
        let some = Some(5i64).to_host().unwrap();
        assert_eq!(some.extract::<Option<i64>>().unwrap(), Some(5));
    }

    #[test]
    fn test_call_results() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let ok: Result<i64, BridgeError> = Ok(7);
        assert_eq!(ok.into_call_result().unwrap().extract::<i64>().unwrap(), 7);

        let failed: Result<i64, std::num::ParseIntError> = "x".parse::<i64>();
        assert_eq!(
            failed.into_call_result().unwrap_err().kind(),
            Some(ErrorKind::Value)
        );
    }
}
