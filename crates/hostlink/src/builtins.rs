//! Host builtins as native functions
//!
//! Thin wrappers over the host's attribute protocol, introspection and
//! evaluation, taking and returning [`Handle`]s.

use hostlink_sdk::EvalMode;

use crate::convert::ToHost;
use crate::error::BridgeResult;
use crate::handle::Handle;
use crate::interp;
use crate::views::{Dict, Mapping};

/// Evaluate an expression in the scopes of the executing host frame
pub fn eval(source: &str) -> BridgeResult<Handle> {
    run_in_frame(source, EvalMode::Expression)
}

/// Execute statements in the scopes of the executing host frame
pub fn exec(source: &str) -> BridgeResult<()> {
    run_in_frame(source, EvalMode::Statements).map(drop)
}

/// Evaluate an expression against explicit scopes.
///
/// `locals` defaults to `globals`. A `__builtins__` entry is added to
/// `globals` when it has none.
pub fn eval_in(source: &str, globals: &Dict, locals: Option<&Mapping>) -> BridgeResult<Handle> {
    run_in(source, EvalMode::Expression, globals, locals)
}

/// Execute statements against explicit scopes, as [`eval_in`]
pub fn exec_in(source: &str, globals: &Dict, locals: Option<&Mapping>) -> BridgeResult<()> {
    run_in(source, EvalMode::Statements, globals, locals).map(drop)
}

fn run_in_frame(source: &str, mode: EvalMode) -> BridgeResult<Handle> {
    let host = interp::host()?;
    let globals = Handle::from_owned(host.current_globals()?)?;
    let locals = Handle::from_owned(host.current_locals()?)?;
    Handle::from_owned(host.eval(source, mode, globals.as_raw(), locals.as_raw())?)
}

fn run_in(
    source: &str,
    mode: EvalMode,
    globals: &Dict,
    locals: Option<&Mapping>,
) -> BridgeResult<Handle> {
    let host = interp::host()?;
    if !globals.contains("__builtins__")? {
        let builtins = Handle::from_owned(host.builtins())?;
        globals.set("__builtins__", builtins)?;
    }
    let locals = locals.map_or(globals.as_raw(), |locals| locals.as_raw());
    Handle::from_owned(host.eval(source, mode, globals.as_raw(), locals)?)
}

/// `getattr(obj, name)`
pub fn getattr(obj: &Handle, name: &str) -> BridgeResult<Handle> {
    obj.getattr(name)
}

/// `setattr(obj, name, value)`
pub fn setattr(obj: &Handle, name: &str, value: impl ToHost) -> BridgeResult<()> {
    obj.setattr(name, value)
}

/// `hasattr(obj, name)`; never leaves an error behind
pub fn hasattr(obj: &Handle, name: &str) -> bool {
    obj.hasattr(name)
}

/// `delattr(obj, name)`
pub fn delattr(obj: &Handle, name: &str) -> BridgeResult<()> {
    obj.delattr(name)
}

/// `repr(obj)`
pub fn repr(obj: &Handle) -> BridgeResult<String> {
    obj.repr()
}

/// `str(obj)`
pub fn str(obj: &Handle) -> BridgeResult<String> {
    obj.str()
}

/// `type(obj)`
pub fn type_of(obj: &Handle) -> BridgeResult<Handle> {
    obj.get_type()
}

/// `isinstance(obj, cls)`
pub fn isinstance(obj: &Handle, cls: &Handle) -> BridgeResult<bool> {
    let host = interp::host()?;
    Ok(host.is_instance(obj.as_raw(), cls.as_raw())?)
}

/// `issubclass(derived, cls)`
pub fn issubclass(derived: &Handle, cls: &Handle) -> BridgeResult<bool> {
    let host = interp::host()?;
    Ok(host.is_subclass(derived.as_raw(), cls.as_raw())?)
}

/// `hash(obj)`
pub fn hash(obj: &Handle) -> BridgeResult<i64> {
    let host = interp::host()?;
    Ok(host.hash(obj.as_raw())?)
}

/// `len(obj)`
pub fn len(obj: &Handle) -> BridgeResult<usize> {
    let host = interp::host()?;
    Ok(host.len(obj.as_raw())?)
}

/// `callable(obj)`
pub fn callable(obj: &Handle) -> bool {
    interp::active().is_some_and(|host| host.is_callable(obj.as_raw()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::Callable;
    use hostlink_host::MemoryHost;
    use hostlink_sdk::{ErrorKind, HostApi};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_eval_in_inserts_builtins() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let globals = Dict::empty().unwrap();
        globals.set("x", 20i64).unwrap();
        let value = eval_in("x * 2 + 2", &globals, None).unwrap();
        assert_eq!(value.extract::<i64>().unwrap(), 42);
        assert!(globals.contains("__builtins__").unwrap());

        exec_in("y = len([1, 2, 3])", &globals, None).unwrap();
        assert_eq!(globals.get::<i64>("y").unwrap(), 3);
    }

    #[test]
    fn test_exec_in_separate_locals() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let globals = Dict::empty().unwrap();
        let locals = Dict::empty().unwrap();
        exec_in("z = 5", &globals, Some(&locals)).unwrap();
        assert_eq!(locals.get::<i64>("z").unwrap(), 5);
        assert!(!globals.contains("z").unwrap());
    }

    #[test]
    fn test_eval_uses_calling_frame() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let peek = Callable::from_fn("peek", || eval("base + 1")).unwrap();
        let globals = Handle::from_owned(host.new_globals().unwrap()).unwrap();
        let globals = Dict::new(globals).unwrap();
        globals.set("base", 9i64).unwrap();
        globals.set("peek", peek.as_handle()).unwrap();
        let value = eval_in("peek()", &globals, None).unwrap();
        assert_eq!(value.extract::<i64>().unwrap(), 10);
    }

    #[test]
    fn test_eval_outside_frame_fails() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let err = eval("1").unwrap_err();
        assert_eq!(err, crate::BridgeError::HostRaised);
        assert_eq!(host.fetch_error().unwrap().kind, ErrorKind::Runtime);
    }

    #[test]
    fn test_introspection() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let text = "abc".to_host().unwrap();
        assert_eq!(repr(&text).unwrap(), "'abc'");
        assert_eq!(str(&text).unwrap(), "abc");
        assert_eq!(len(&text).unwrap(), 3);
        assert!(!callable(&text));
        assert_eq!(hash(&text).unwrap(), hash(&"abc".to_host().unwrap()).unwrap());

        let str_type = type_of(&text).unwrap();
        assert!(isinstance(&text, &str_type).unwrap());
        assert!(issubclass(&str_type, &str_type).unwrap());
        assert!(callable(&str_type));
    }

    #[test]
    fn test_attribute_protocol() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let module = Handle::from_owned(host.new_module("scratch", None).unwrap()).unwrap();
        assert!(!hasattr(&module, "answer"));
        setattr(&module, "answer", 42i64).unwrap();
        assert_eq!(getattr(&module, "answer").unwrap().extract::<i64>().unwrap(), 42);
        delattr(&module, "answer").unwrap();
        assert!(!hasattr(&module, "answer"));
        assert_eq!(host.error_occurred(), None);
    }
}
