//! Builtins namespace: free functions, type constructors, and the methods
//! of builtin containers

use hostlink_sdk::{ErrorKind, HostApi, HostResult, RawRef};

use crate::host::MemoryHost;
use crate::object::{BuiltinFunction, BuiltinType, ObjKind};
use crate::ops::{Num, Scalar};

/// Types reachable by name from evaluated code
const NAMED_TYPES: [BuiltinType; 9] = [
    BuiltinType::Object,
    BuiltinType::Type,
    BuiltinType::Bool,
    BuiltinType::Int,
    BuiltinType::Float,
    BuiltinType::Str,
    BuiltinType::Tuple,
    BuiltinType::List,
    BuiltinType::Dict,
];

const DICT_METHODS: [&str; 5] = ["update", "keys", "get", "items", "clear"];
const LIST_METHODS: [&str; 4] = ["append", "insert", "sort", "reverse"];

pub(crate) fn populate(host: &MemoryHost, dict: RawRef) -> HostResult<()> {
    for function in BuiltinFunction::ALL {
        let value = host.own(host.alloc(ObjKind::Builtin(function)));
        host.dict_set_str(dict, function.name(), value.raw())?;
    }
    for kind in NAMED_TYPES {
        host.dict_set_str(dict, kind.name(), host.type_ref(kind))?;
    }
    Ok(())
}

/// Canonical name of a container method, if `kind` has one called `name`
pub(crate) fn container_method_name(kind: BuiltinType, name: &str) -> Option<&'static str> {
    let table: &[&'static str] = match kind {
        BuiltinType::Dict => &DICT_METHODS,
        BuiltinType::List => &LIST_METHODS,
        _ => return None,
    };
    table.iter().copied().find(|method| *method == name)
}

fn no_keywords(host: &MemoryHost, name: &str, kwargs: &[(String, RawRef)]) -> HostResult<()> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        host.raise(
            ErrorKind::Type,
            format!("{name}() takes no keyword arguments"),
        )
    }
}

fn exact_args(host: &MemoryHost, name: &str, args: &[RawRef], expected: usize) -> HostResult<()> {
    if args.len() == expected {
        return Ok(());
    }
    let message = match expected {
        0 => format!("{name}() takes no arguments ({} given)", args.len()),
        1 => format!("{name}() takes exactly one argument ({} given)", args.len()),
        n => format!("{name}() takes exactly {n} arguments ({} given)", args.len()),
    };
    host.raise(ErrorKind::Type, message)
}

fn at_most_args(host: &MemoryHost, name: &str, args: &[RawRef], max: usize) -> HostResult<()> {
    if args.len() <= max {
        Ok(())
    } else {
        host.raise(
            ErrorKind::Type,
            format!("{name}() takes at most {max} argument(s) ({} given)", args.len()),
        )
    }
}

// ============================================================================
// Free functions
// ============================================================================

pub(crate) fn call_builtin(
    host: &MemoryHost,
    function: BuiltinFunction,
    args: &[RawRef],
    kwargs: &[(String, RawRef)],
) -> HostResult<RawRef> {
    let name = function.name();
    no_keywords(host, name, kwargs)?;
    let expected = if function == BuiltinFunction::IsInstance {
        2
    } else {
        1
    };
    exact_args(host, name, args, expected)?;

    match function {
        BuiltinFunction::Len => {
            let len = host.len(args[0])?;
            match i64::try_from(len) {
                Ok(len) => host.new_int(len),
                Err(_) => host.raise(ErrorKind::Overflow, "length too large"),
            }
        }
        BuiltinFunction::Repr => host.new_str(&host.repr(args[0])?),
        BuiltinFunction::Abs => match host.scalar(args[0]) {
            Scalar::Num(Num::Int(i)) => match i.checked_abs() {
                Some(value) => host.new_int(value),
                None => host.raise(ErrorKind::Overflow, "integer overflow"),
            },
            Scalar::Num(Num::Float(f)) => host.new_float(f.abs()),
            _ => host.raise(
                ErrorKind::Type,
                format!(
                    "bad operand type for abs(): '{}'",
                    host.short_type_name(args[0])
                ),
            ),
        },
        BuiltinFunction::IsInstance => {
            let result = host.is_instance(args[0], args[1])?;
            Ok(host.new_bool(result))
        }
        BuiltinFunction::Callable => Ok(host.new_bool(host.is_callable(args[0]))),
        BuiltinFunction::Hash => host.new_int(host.hash(args[0])?),
    }
}

// ============================================================================
// Constructors
// ============================================================================

pub(crate) fn construct(
    host: &MemoryHost,
    kind: BuiltinType,
    args: &[RawRef],
    kwargs: &[(String, RawRef)],
) -> HostResult<RawRef> {
    let name = kind.name();
    if kind != BuiltinType::Dict {
        no_keywords(host, name, kwargs)?;
    }
    let arg = args.first().copied();

    match kind {
        BuiltinType::Int => {
            at_most_args(host, name, args, 1)?;
            let Some(arg) = arg else {
                return host.new_int(0);
            };
            match host.scalar(arg) {
                Scalar::Num(Num::Int(i)) => host.new_int(i),
                Scalar::Num(Num::Float(f)) => {
                    if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                        host.new_int(f.trunc() as i64)
                    } else {
                        host.raise(
                            ErrorKind::Overflow,
                            "cannot convert float to integer",
                        )
                    }
                }
                Scalar::Str(text) => match text.trim().replace('_', "").parse::<i64>() {
                    Ok(value) => host.new_int(value),
                    Err(_) => host.raise(
                        ErrorKind::Value,
                        format!("invalid literal for int() with base 10: {}", host.repr(arg)?),
                    ),
                },
                _ => host.raise(
                    ErrorKind::Type,
                    format!(
                        "int() argument must be a string or a number, not '{}'",
                        host.short_type_name(arg)
                    ),
                ),
            }
        }
        BuiltinType::Float => {
            at_most_args(host, name, args, 1)?;
            let Some(arg) = arg else {
                return host.new_float(0.0);
            };
            match host.scalar(arg) {
                Scalar::Num(num) => host.new_float(num.as_f64()),
                Scalar::Str(text) => match text.trim().to_ascii_lowercase().parse::<f64>() {
                    Ok(value) => host.new_float(value),
                    Err(_) => host.raise(
                        ErrorKind::Value,
                        format!("could not convert string to float: {}", host.repr(arg)?),
                    ),
                },
                _ => host.raise(
                    ErrorKind::Type,
                    format!(
                        "float() argument must be a string or a number, not '{}'",
                        host.short_type_name(arg)
                    ),
                ),
            }
        }
        BuiltinType::Str => {
            at_most_args(host, name, args, 1)?;
            match arg {
                Some(arg) => host.new_str(&host.str(arg)?),
                None => host.new_str(""),
            }
        }
        BuiltinType::Bool => {
            at_most_args(host, name, args, 1)?;
            let value = match arg {
                Some(arg) => host.is_true(arg)?,
                None => false,
            };
            Ok(host.new_bool(value))
        }
        BuiltinType::List | BuiltinType::Tuple => {
            at_most_args(host, name, args, 1)?;
            let items = match arg {
                Some(arg) => iterate(host, arg)?,
                None => Vec::new(),
            };
            let items: Vec<RawRef> = items.iter().map(|item| item.raw()).collect();
            if kind == BuiltinType::List {
                host.new_list(&items)
            } else {
                host.new_tuple(&items)
            }
        }
        BuiltinType::Dict => {
            at_most_args(host, name, args, 1)?;
            let dict = host.own(host.new_dict()?);
            if let Some(arg) = arg {
                for (key, value) in host.dict_entries(arg)? {
                    host.dict_insert(dict.raw(), key, value)?;
                }
            }
            for (key, value) in kwargs {
                host.dict_set_str(dict.raw(), key, *value)?;
            }
            Ok(dict.into_raw())
        }
        BuiltinType::Type => {
            exact_args(host, name, args, 1)?;
            Ok(host.type_of(args[0]))
        }
        other => host.raise(
            ErrorKind::Type,
            format!("cannot create '{}' instances", other.name()),
        ),
    }
}

/// Items of an iterable builtin value (new references)
fn iterate<'h>(host: &'h MemoryHost, obj: RawRef) -> HostResult<Vec<crate::host::Ref<'h>>> {
    match host.kind_of(obj) {
        Some(BuiltinType::List | BuiltinType::Tuple) => Ok(host
            .seq_items(obj)?
            .into_iter()
            .map(|item| host.own(host.ref_inc(item)))
            .collect()),
        Some(BuiltinType::Dict) => Ok(host
            .dict_entries(obj)?
            .into_iter()
            .map(|(key, _)| host.own(host.ref_inc(key)))
            .collect()),
        Some(BuiltinType::Str) => {
            let Scalar::Str(text) = host.scalar(obj) else {
                return Ok(Vec::new());
            };
            let mut chars = Vec::new();
            for c in text.chars() {
                chars.push(host.own(host.new_str(c.encode_utf8(&mut [0; 4]))?));
            }
            Ok(chars)
        }
        _ => host.raise(
            ErrorKind::Type,
            format!("'{}' object is not iterable", host.short_type_name(obj)),
        ),
    }
}

// ============================================================================
// Container methods
// ============================================================================

pub(crate) fn call_container_method(
    host: &MemoryHost,
    receiver: RawRef,
    name: &str,
    args: &[RawRef],
    kwargs: &[(String, RawRef)],
) -> HostResult<RawRef> {
    if name != "update" {
        no_keywords(host, name, kwargs)?;
    }
    match name {
        "update" => {
            at_most_args(host, name, args, 1)?;
            if let Some(&other) = args.first() {
                for (key, value) in host.dict_entries(other)? {
                    host.dict_insert(receiver, key, value)?;
                }
            }
            for (key, value) in kwargs {
                host.dict_set_str(receiver, key, *value)?;
            }
        }
        "keys" => {
            exact_args(host, name, args, 0)?;
            return host.keys(receiver);
        }
        "get" => {
            if args.is_empty() || args.len() > 2 {
                return host.raise(
                    ErrorKind::Type,
                    format!("get expected 1 or 2 arguments, got {}", args.len()),
                );
            }
            return match host.dict_lookup(receiver, args[0])? {
                Some(value) => Ok(value),
                None => match args.get(1) {
                    Some(&default) => Ok(host.ref_inc(default)),
                    None => Ok(host.none()),
                },
            };
        }
        "items" => {
            exact_args(host, name, args, 0)?;
            let mut pairs = Vec::new();
            for (key, value) in host.dict_entries(receiver)? {
                pairs.push(host.own(host.new_tuple(&[key, value])?));
            }
            let pairs: Vec<RawRef> = pairs.iter().map(|pair| pair.raw()).collect();
            return host.new_list(&pairs);
        }
        "clear" => {
            exact_args(host, name, args, 0)?;
            host.dict_clear(receiver)?;
        }
        "append" => {
            exact_args(host, name, args, 1)?;
            host.list_append(receiver, args[0])?;
        }
        "insert" => {
            exact_args(host, name, args, 2)?;
            let index = host.as_int(args[0])?;
            let index = isize::try_from(index).unwrap_or(if index < 0 { isize::MIN } else { isize::MAX });
            host.list_insert(receiver, index, args[1])?;
        }
        "sort" => {
            exact_args(host, name, args, 0)?;
            host.list_sort(receiver)?;
        }
        "reverse" => {
            exact_args(host, name, args, 0)?;
            host.list_reverse(receiver)?;
        }
        other => {
            return host.raise(
                ErrorKind::Attribute,
                format!(
                    "'{}' object has no attribute '{other}'",
                    host.short_type_name(receiver)
                ),
            );
        }
    }
    Ok(host.none())
}
