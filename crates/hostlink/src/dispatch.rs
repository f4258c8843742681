//! Dispatch thunks
//!
//! A host call arrives as `(self, args_tuple)`. The thunks here check the
//! argument count against the registered arity, convert each argument with
//! [`FromHost`], call the bound native closure, and convert the result
//! with [`IntoCallResult`]. Closures of arity 0 to 4 are supported:
//!
//! ```ignore
//! m.add_function("add", |a: i64, b: i64| a + b);
//! class.method("step", |sim: &mut Simulation, dt: f64| sim.step(dt));
//! ```

use hostlink_sdk::{CallHook, ErrorKind, HostApi, RawRef};
use std::rc::Rc;

use crate::boundary;
use crate::convert::{FromHost, IntoCallResult};
use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;
use crate::interp;

/// A native free function callable from the host
pub trait NativeFunction<Args>: 'static {
    /// Number of positional arguments
    const ARITY: usize;

    /// Convert the arguments, call, convert the result
    fn invoke(&self, args: &[Handle]) -> BridgeResult<Handle>;
}

/// A native method of `Cls` callable from the host
pub trait NativeMethod<Cls, Args>: 'static {
    /// Number of positional arguments, not counting the receiver
    const ARITY: usize;

    /// Convert the arguments, call on `this`, convert the result
    fn invoke(&self, this: &mut Cls, args: &[Handle]) -> BridgeResult<Handle>;
}

fn next_arg<'a>(args: &mut std::slice::Iter<'a, Handle>) -> BridgeResult<&'a Handle> {
    args.next()
        .ok_or_else(|| BridgeError::type_error("missing positional argument"))
}

/// Convert one argument. Whatever the conversion failed with, the caller
/// sees a type error carrying the same message.
fn argument<T: FromHost>(args: &mut std::slice::Iter<'_, Handle>) -> BridgeResult<T> {
    T::from_host(next_arg(args)?).map_err(as_argument_error)
}

fn as_argument_error(err: BridgeError) -> BridgeError {
    let err = match err {
        BridgeError::HostRaised => match BridgeError::fetch() {
            Some(raised) => raised,
            None => return BridgeError::HostRaised,
        },
        other => other,
    };
    match err.kind() {
        Some(kind) if kind.is_a(ErrorKind::Type) => err,
        Some(ErrorKind::Memory) => err,
        _ => BridgeError::type_error(err.message()),
    }
}

macro_rules! impl_native {
    ($arity:expr; $($arg:ident $var:ident),*) => {
        impl<Func, Ret, $($arg,)*> NativeFunction<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Ret + 'static,
            Ret: IntoCallResult,
            $($arg: FromHost,)*
        {
            const ARITY: usize = $arity;

            #[allow(unused_variables, unused_mut)]
            fn invoke(&self, args: &[Handle]) -> BridgeResult<Handle> {
                let mut args = args.iter();
                $(let $var = argument::<$arg>(&mut args)?;)*
                (self)($($var),*).into_call_result()
            }
        }

        impl<Func, Cls, Ret, $($arg,)*> NativeMethod<Cls, ($($arg,)*)> for Func
        where
            Func: Fn(&mut Cls, $($arg),*) -> Ret + 'static,
            Ret: IntoCallResult,
            $($arg: FromHost,)*
        {
            const ARITY: usize = $arity;

            #[allow(unused_variables, unused_mut)]
            fn invoke(&self, this: &mut Cls, args: &[Handle]) -> BridgeResult<Handle> {
                let mut args = args.iter();
                $(let $var = argument::<$arg>(&mut args)?;)*
                (self)(this, $($var),*).into_call_result()
            }
        }
    };
}

impl_native!(0;);
impl_native!(1; A a);
impl_native!(2; A a, B b);
impl_native!(3; A a, B b, C c);
impl_native!(4; A a, B b, C c, D d);

/// Check the argument count, then take a handle to every argument.
///
/// Runs before any native state is touched.
pub(crate) fn unpack_args(
    host: &dyn HostApi,
    name: &str,
    arity: usize,
    args: RawRef,
) -> BridgeResult<Vec<Handle>> {
    let given = host.len(args)?;
    if given != arity {
        let noun = if arity == 1 { "argument" } else { "arguments" };
        return Err(BridgeError::type_error(format!(
            "{name}() takes exactly {arity} {noun} ({given} given)"
        )));
    }
    (0..given)
        .map(|index| Handle::from_owned(host.seq_get(args, index as isize)?))
        .collect()
}

/// Host call hook running a native free function
pub(crate) fn function_hook<F, Args>(name: &str, f: F, catch_panics: bool) -> CallHook
where
    F: NativeFunction<Args>,
{
    let name = name.to_string();
    Rc::new(move |_module: RawRef, args: RawRef| {
        boundary::guard(catch_panics, || {
            let host = interp::host()?;
            let args = unpack_args(host.as_ref(), &name, F::ARITY, args)?;
            Ok(f.invoke(&args)?.into_raw())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToHost;
    use hostlink_host::MemoryHost;

    fn arity_of<F: NativeFunction<Args>, Args>(_: &F) -> usize {
        F::ARITY
    }

    #[test]
    fn test_arity_is_inferred() {
        assert_eq!(arity_of(&|| 1i64), 0);
        assert_eq!(arity_of(&|a: i64| a), 1);
        assert_eq!(arity_of(&|a: i64, b: String| format!("{a}{b}")), 2);
        assert_eq!(arity_of(&|_: f64, _: f64, _: f64, _: f64| ()), 4);
    }

    #[test]
    fn test_invoke_converts_arguments() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let add = |a: i64, b: i64| a + b;
        let args = vec![2i64.to_host().unwrap(), 3i64.to_host().unwrap()];
        let result = NativeFunction::invoke(&add, &args).unwrap();
        assert_eq!(result.extract::<i64>().unwrap(), 5);

        let args = vec![2i64.to_host().unwrap(), "x".to_host().unwrap()];
        assert!(NativeFunction::invoke(&add, &args).is_err());
    }

    #[test]
    fn test_argument_failures_are_type_errors() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let byte = |b: u8| b;
        let args = vec![300i64.to_host().unwrap()];
        let err = NativeFunction::invoke(&byte, &args).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Type));
        assert_eq!(err.message(), "out of range integral type conversion attempted");

        // Raised by the host while unboxing; re-raised as a type error
        let float = |x: f64| x;
        let args = vec!["x".to_host().unwrap()];
        let err = NativeFunction::invoke(&float, &args).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Type));
        assert_eq!(host.error_occurred(), None);
    }

    #[test]
    fn test_method_invoke() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let bump = |count: &mut i64, by: i64| {
            *count += by;
            *count
        };
        let mut count = 10;
        let args = vec![5i64.to_host().unwrap()];
        let result = NativeMethod::invoke(&bump, &mut count, &args).unwrap();
        assert_eq!(result.extract::<i64>().unwrap(), 15);
        assert_eq!(count, 15);
    }

    #[test]
    fn test_unpack_checks_arity() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let one = 1i64.to_host().unwrap();
        let tuple = Handle::from_owned(host.new_tuple(&[one.as_raw()]).unwrap()).unwrap();
        let err = unpack_args(&*host, "step", 2, tuple.as_raw()).unwrap_err();
        assert_eq!(
            err,
            BridgeError::type_error("step() takes exactly 2 arguments (1 given)")
        );
        let args = unpack_args(&*host, "step", 1, tuple.as_raw()).unwrap();
        assert_eq!(args.len(), 1);
    }
}
