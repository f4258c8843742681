//! Tree-walking evaluator
//!
//! Every evaluation returns a new reference; intermediate values are held
//! in [`Ref`] guards so an error part-way through releases them.

use hostlink_sdk::{ErrorKind, HostApi, HostResult, RawRef};

use super::ast::{CmpOp, Expr, Stmt, Target};
use crate::host::{MemoryHost, Ref};
use crate::object::{BuiltinType, LambdaData, ObjKind};

/// Scopes of the code being evaluated (borrowed)
#[derive(Debug, Clone, Copy)]
pub(crate) struct Scope {
    pub globals: RawRef,
    pub locals: RawRef,
}

fn lookup_name(host: &MemoryHost, name: &str, scope: Scope) -> HostResult<RawRef> {
    if let Some(value) = host.dict_get_str(scope.locals, name) {
        return Ok(value);
    }
    if scope.globals != scope.locals {
        if let Some(value) = host.dict_get_str(scope.globals, name) {
            return Ok(value);
        }
    }

    let found = match host.dict_get_str(scope.globals, "__builtins__") {
        Some(builtins) => {
            let builtins = host.own(builtins);
            let namespace = match host.kind_of(builtins.raw()) {
                Some(BuiltinType::Module) => host.module_dict(builtins.raw()),
                _ => Some(builtins.raw()),
            };
            namespace.and_then(|ns| host.dict_get_str(ns, name))
        }
        None => host.dict_get_str(host.builtins_ref(), name),
    };
    match found {
        Some(value) => Ok(value),
        None => host.raise(ErrorKind::Name, format!("name '{name}' is not defined")),
    }
}

fn eval_all<'h>(host: &'h MemoryHost, exprs: &[Expr], scope: Scope) -> HostResult<Vec<Ref<'h>>> {
    exprs
        .iter()
        .map(|expr| eval_expr(host, expr, scope).map(|value| host.own(value)))
        .collect()
}

fn raws(values: &[Ref<'_>]) -> Vec<RawRef> {
    values.iter().map(Ref::raw).collect()
}

pub(crate) fn eval_expr(host: &MemoryHost, expr: &Expr, scope: Scope) -> HostResult<RawRef> {
    match expr {
        Expr::None => Ok(host.none()),
        Expr::Bool(value) => Ok(host.new_bool(*value)),
        Expr::Int(value) => host.new_int(*value),
        Expr::Float(value) => host.new_float(*value),
        Expr::Str(value) => host.new_str(value),
        Expr::Name(name) => lookup_name(host, name, scope),

        Expr::Attr(target, name) => {
            let target = host.own(eval_expr(host, target, scope)?);
            host.get_attr(target.raw(), name)
        }
        Expr::Subscript(target, key) => {
            let target = host.own(eval_expr(host, target, scope)?);
            let key = host.own(eval_expr(host, key, scope)?);
            host.get_item(target.raw(), key.raw())
        }
        Expr::Call { func, args, kwargs } => {
            let func = host.own(eval_expr(host, func, scope)?);
            let args = eval_all(host, args, scope)?;
            let args = host.own(host.new_tuple(&raws(&args))?);
            let kwargs = if kwargs.is_empty() {
                None
            } else {
                let dict = host.own(host.new_dict()?);
                for (name, value) in kwargs {
                    let value = host.own(eval_expr(host, value, scope)?);
                    host.dict_set_str(dict.raw(), name, value.raw())?;
                }
                Some(dict)
            };
            host.call(func.raw(), args.raw(), kwargs.as_ref().map(Ref::raw))
        }

        Expr::List(items) => {
            let items = eval_all(host, items, scope)?;
            host.new_list(&raws(&items))
        }
        Expr::Tuple(items) => {
            let items = eval_all(host, items, scope)?;
            host.new_tuple(&raws(&items))
        }
        Expr::Dict(entries) => {
            let dict = host.own(host.new_dict()?);
            for (key, value) in entries {
                let key = host.own(eval_expr(host, key, scope)?);
                let value = host.own(eval_expr(host, value, scope)?);
                host.set_item(dict.raw(), key.raw(), value.raw())?;
            }
            Ok(dict.into_raw())
        }

        Expr::Unary(op, operand) => {
            let operand = host.own(eval_expr(host, operand, scope)?);
            host.unary(*op, operand.raw())
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = host.own(eval_expr(host, lhs, scope)?);
            let rhs = host.own(eval_expr(host, rhs, scope)?);
            host.binary(*op, lhs.raw(), rhs.raw())
        }
        Expr::Compare(op, lhs, rhs) => {
            let lhs = host.own(eval_expr(host, lhs, scope)?);
            let rhs = host.own(eval_expr(host, rhs, scope)?);
            let (a, b) = (lhs.raw(), rhs.raw());
            let result = match op {
                CmpOp::Eq => host.values_equal(a, b)?,
                CmpOp::Ne => !host.values_equal(a, b)?,
                CmpOp::In => host.contains(b, a)?,
                CmpOp::NotIn => !host.contains(b, a)?,
                CmpOp::Lt => host.order(a, b, op.symbol())?.is_some_and(|o| o.is_lt()),
                CmpOp::Le => host.order(a, b, op.symbol())?.is_some_and(|o| o.is_le()),
                CmpOp::Gt => host.order(a, b, op.symbol())?.is_some_and(|o| o.is_gt()),
                CmpOp::Ge => host.order(a, b, op.symbol())?.is_some_and(|o| o.is_ge()),
            };
            Ok(host.new_bool(result))
        }
        Expr::And(lhs, rhs) => {
            let lhs = host.own(eval_expr(host, lhs, scope)?);
            if !host.is_true(lhs.raw())? {
                return Ok(lhs.into_raw());
            }
            drop(lhs);
            eval_expr(host, rhs, scope)
        }
        Expr::Or(lhs, rhs) => {
            let lhs = host.own(eval_expr(host, lhs, scope)?);
            if host.is_true(lhs.raw())? {
                return Ok(lhs.into_raw());
            }
            drop(lhs);
            eval_expr(host, rhs, scope)
        }
        Expr::IfElse {
            cond,
            then,
            otherwise,
        } => {
            let cond = host.own(eval_expr(host, cond, scope)?);
            if host.is_true(cond.raw())? {
                eval_expr(host, then, scope)
            } else {
                eval_expr(host, otherwise, scope)
            }
        }
        Expr::Lambda { params, body } => {
            let globals = host.ref_inc(scope.globals);
            Ok(host.alloc(ObjKind::Lambda(LambdaData {
                params: params.clone(),
                body: body.clone(),
                globals,
            })))
        }
    }
}

pub(crate) fn exec_stmt(host: &MemoryHost, stmt: &Stmt, scope: Scope) -> HostResult<()> {
    match stmt {
        Stmt::Pass => Ok(()),
        Stmt::Expr(expr) => {
            let value = eval_expr(host, expr, scope)?;
            host.decref(value);
            Ok(())
        }
        Stmt::Assign(target, value) => {
            let value = host.own(eval_expr(host, value, scope)?);
            match target {
                Target::Name(name) => {
                    let key = host.own(host.new_str(name)?);
                    host.set_item(scope.locals, key.raw(), value.raw())
                }
                Target::Attr(obj, name) => {
                    let obj = host.own(eval_expr(host, obj, scope)?);
                    host.set_attr(obj.raw(), name, value.raw())
                }
                Target::Subscript(obj, key) => {
                    let obj = host.own(eval_expr(host, obj, scope)?);
                    let key = host.own(eval_expr(host, key, scope)?);
                    host.set_item(obj.raw(), key.raw(), value.raw())
                }
            }
        }
    }
}
