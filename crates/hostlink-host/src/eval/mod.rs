//! Evaluator for the host's small expression language
//!
//! Expressions: literals, names, attribute access, calls with positional
//! and keyword arguments, list/tuple/dict displays, subscripts, arithmetic,
//! comparisons, `and`/`or`/`not`, conditional expressions and `lambda`.
//! Statement mode adds assignment to names, attributes and subscripts.
//!
//! A lambda body sees its own parameters and the globals it was created
//! in; there are no closures over enclosing lambdas.

pub(crate) mod ast;
mod interp;
mod lexer;
mod parser;

use hostlink_sdk::{ErrorKind, EvalMode, HostApi, HostResult, RawRef};

use crate::host::MemoryHost;
use crate::object::ObjKind;
use interp::Scope;

/// Parse and run `source` inside a new frame with the given scopes
pub(crate) fn evaluate(
    host: &MemoryHost,
    source: &str,
    mode: EvalMode,
    globals: RawRef,
    locals: RawRef,
) -> HostResult<RawRef> {
    let scope = Scope { globals, locals };
    match mode {
        EvalMode::Expression => {
            let expr = match parser::parse_expression(source) {
                Ok(expr) => expr,
                Err(message) => return host.raise(ErrorKind::Syntax, message),
            };
            let _frame = host.push_frame(globals, locals);
            interp::eval_expr(host, &expr, scope)
        }
        EvalMode::Statements => {
            let stmts = match parser::parse_statements(source) {
                Ok(stmts) => stmts,
                Err(message) => return host.raise(ErrorKind::Syntax, message),
            };
            let _frame = host.push_frame(globals, locals);
            for stmt in &stmts {
                interp::exec_stmt(host, stmt, scope)?;
            }
            Ok(host.none())
        }
    }
}

/// Invoke a lambda object with already-unpacked arguments (borrowed)
pub(crate) fn call_lambda(
    host: &MemoryHost,
    lambda: RawRef,
    args: &[RawRef],
    kwargs: &[(String, RawRef)],
) -> HostResult<RawRef> {
    let parts = host.with(lambda, |kind| match kind {
        ObjKind::Lambda(data) => Some((data.params.clone(), data.body.clone(), data.globals)),
        _ => None,
    })?;
    let Some((params, body, globals)) = parts else {
        return host.raise(ErrorKind::Type, "expected a lambda");
    };

    if args.len() > params.len() {
        return host.raise(
            ErrorKind::Type,
            format!(
                "<lambda>() takes {} positional arguments but {} were given",
                params.len(),
                args.len()
            ),
        );
    }

    let locals = host.own(host.new_dict()?);
    for (param, &value) in params.iter().zip(args) {
        host.dict_set_str(locals.raw(), param, value)?;
    }
    for (name, value) in kwargs {
        let Some(position) = params.iter().position(|p| p == name) else {
            return host.raise(
                ErrorKind::Type,
                format!("<lambda>() got an unexpected keyword argument '{name}'"),
            );
        };
        if position < args.len() {
            return host.raise(
                ErrorKind::Type,
                format!("<lambda>() got multiple values for argument '{name}'"),
            );
        }
        host.dict_set_str(locals.raw(), name, *value)?;
    }
    if let Some(missing) = params
        .iter()
        .find(|p| host.dict_get_str(locals.raw(), p).map(|v| host.decref(v)).is_none())
    {
        return host.raise(
            ErrorKind::Type,
            format!("<lambda>() missing required argument: '{missing}'"),
        );
    }

    let _frame = host.push_frame(globals, locals.raw());
    interp::eval_expr(
        host,
        &body,
        Scope {
            globals,
            locals: locals.raw(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(host: &MemoryHost, source: &str) -> HostResult<String> {
        let globals = host.own(host.new_globals()?);
        let value = host.own(host.eval(source, EvalMode::Expression, globals.raw(), globals.raw())?);
        host.repr(value.raw())
    }

    #[test]
    fn test_arithmetic() {
        let host = MemoryHost::new();
        assert_eq!(run(&host, "1 + 2 * 3").unwrap(), "7");
        assert_eq!(run(&host, "7 // -2").unwrap(), "-4");
        assert_eq!(run(&host, "7 / 2").unwrap(), "3.5");
        assert_eq!(run(&host, "2 ** 10").unwrap(), "1024");
        assert_eq!(run(&host, "-2 ** 2").unwrap(), "-4");
        assert_eq!(run(&host, "'ab' * 2 + 'c'").unwrap(), "'ababc'");
    }

    #[test]
    fn test_displays_and_calls() {
        let host = MemoryHost::new();
        assert_eq!(run(&host, "[1, (2,), {'a': None}]").unwrap(), "[1, (2,), {'a': None}]");
        assert_eq!(run(&host, "len([1, 2, 3])").unwrap(), "3");
        assert_eq!(run(&host, "(lambda x, y: x - y)(5, y=2)").unwrap(), "3");
        assert_eq!(run(&host, "dict(a=1)['a']").unwrap(), "1");
        assert_eq!(run(&host, "isinstance(True, int)").unwrap(), "True");
    }

    #[test]
    fn test_logic() {
        let host = MemoryHost::new();
        assert_eq!(run(&host, "0 or 'x'").unwrap(), "'x'");
        assert_eq!(run(&host, "1 and []").unwrap(), "[]");
        assert_eq!(run(&host, "'yes' if 2 in [1, 2] else 'no'").unwrap(), "'yes'");
        assert_eq!(run(&host, "not 3 < 2").unwrap(), "True");
    }

    #[test]
    fn test_errors() {
        let host = MemoryHost::new();
        assert!(run(&host, "1 / 0").is_err());
        assert_eq!(host.fetch_error().unwrap().kind, ErrorKind::ZeroDivision);

        assert!(run(&host, "undefined").is_err());
        let record = host.fetch_error().unwrap();
        assert_eq!(record.kind, ErrorKind::Name);
        assert_eq!(record.message, "name 'undefined' is not defined");

        assert!(run(&host, "1 +").is_err());
        assert_eq!(host.fetch_error().unwrap().kind, ErrorKind::Syntax);

        assert!(run(&host, "1 + 'a'").is_err());
        assert_eq!(
            host.fetch_error().unwrap().message,
            "unsupported operand type(s) for +: 'int' and 'str'"
        );
    }

    #[test]
    fn test_statements_assign_into_locals() {
        let host = MemoryHost::new();
        let globals = host.own(host.new_globals().unwrap());
        let result = host
            .eval(
                "x = [3, 1, 2]; x.sort(); y = {}; y['k'] = x[0]",
                EvalMode::Statements,
                globals.raw(),
                globals.raw(),
            )
            .unwrap();
        assert!(host.is_none(result));
        host.decref(result);

        let y = host.own(host.dict_get_str(globals.raw(), "y").unwrap());
        assert_eq!(host.repr(y.raw()).unwrap(), "{'k': 1}");
    }

    #[test]
    fn test_no_leaks() {
        let host = MemoryHost::new();
        let before = host.live_objects();
        let _ = run(&host, "[x for x in 1]");
        host.clear_error();
        run(&host, "{'a': [1, 2], 'b': (lambda: 3)()}").unwrap();
        let _ = run(&host, "[1, 2, undefined]");
        host.clear_error();
        assert_eq!(host.live_objects(), before);
    }
}
