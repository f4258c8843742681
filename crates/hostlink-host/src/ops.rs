//! Value semantics: truthiness, hashing, equality, ordering, arithmetic,
//! representation, and the dict/sequence primitives the rest of the host
//! is built on

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use hostlink_sdk::{ErrorKind, HostApi, HostResult, RawRef};
use rustc_hash::FxHasher;

use crate::eval::ast::{BinOp, UnaryOp};
use crate::host::MemoryHost;
use crate::object::{BuiltinType, DictEntry, HashKey, ObjKind};

/// Numeric value; booleans count as integers
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn num_cmp(a: Num, b: Num) -> Option<Ordering> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
        _ => a.as_f64().partial_cmp(&b.as_f64()),
    }
}

/// Copy of a value's content, detached from the heap
pub(crate) enum Scalar {
    None,
    Num(Num),
    Str(Rc<str>),
    Other(BuiltinType),
}

fn float_key(value: f64) -> HashKey {
    let integral = value.is_finite()
        && value.fract() == 0.0
        && value >= i64::MIN as f64
        && value < i64::MAX as f64;
    if integral {
        HashKey::Int(value as i64)
    } else {
        HashKey::Float(value.to_bits())
    }
}

pub(crate) fn float_repr(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

pub(crate) fn quote(text: &str) -> String {
    let delimiter = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(delimiter);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}

/// Resolve a possibly negative index against `len`
pub(crate) fn normalize_index(len: usize, index: isize) -> Option<usize> {
    let resolved = if index < 0 {
        index + len as isize
    } else {
        index
    };
    (0..len as isize).contains(&resolved).then_some(resolved as usize)
}

fn int_floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn int_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

enum Shape {
    Text(String),
    Instance,
    Seq {
        open: &'static str,
        close: &'static str,
        items: Vec<RawRef>,
        tuple: bool,
    },
    Dict(Vec<(RawRef, RawRef)>),
}

impl MemoryHost {
    // ========================================================================
    // Content
    // ========================================================================

    pub(crate) fn scalar(&self, obj: RawRef) -> Scalar {
        self.peek(obj, |kind| match kind {
            ObjKind::None => Scalar::None,
            ObjKind::Bool(b) => Scalar::Num(Num::Int(i64::from(*b))),
            ObjKind::Int(i) => Scalar::Num(Num::Int(*i)),
            ObjKind::Float(f) => Scalar::Num(Num::Float(*f)),
            ObjKind::Str(s) => Scalar::Str(s.clone()),
            other => Scalar::Other(other.builtin_type().unwrap_or(BuiltinType::Object)),
        })
        .unwrap_or(Scalar::Other(BuiltinType::Object))
    }

    pub(crate) fn truthy(&self, obj: RawRef) -> HostResult<bool> {
        self.with(obj, |kind| match kind {
            ObjKind::None => false,
            ObjKind::Bool(b) => *b,
            ObjKind::Int(i) => *i != 0,
            ObjKind::Float(f) => *f != 0.0,
            ObjKind::Str(s) => !s.is_empty(),
            ObjKind::Tuple(items) | ObjKind::List(items) => !items.is_empty(),
            ObjKind::Dict(dict) => !dict.entries.is_empty(),
            _ => true,
        })
    }

    /// Items of a list or tuple (borrowed)
    pub(crate) fn seq_items(&self, obj: RawRef) -> HostResult<Vec<RawRef>> {
        let items = self.with(obj, |kind| match kind {
            ObjKind::Tuple(items) | ObjKind::List(items) => Some(items.clone()),
            _ => None,
        })?;
        match items {
            Some(items) => Ok(items),
            None => self.raise(
                ErrorKind::Type,
                format!("'{}' object is not a sequence", self.short_type_name(obj)),
            ),
        }
    }

    // ========================================================================
    // Hashing
    // ========================================================================

    pub(crate) fn hash_key(&self, obj: RawRef) -> HostResult<HashKey> {
        enum Probe {
            Key(HashKey),
            Tuple(Vec<RawRef>),
            Unhashable,
        }
        let probe = self.with(obj, |kind| match kind {
            ObjKind::None => Probe::Key(HashKey::None),
            ObjKind::Bool(b) => Probe::Key(HashKey::Int(i64::from(*b))),
            ObjKind::Int(i) => Probe::Key(HashKey::Int(*i)),
            ObjKind::Float(f) => Probe::Key(float_key(*f)),
            ObjKind::Str(s) => Probe::Key(HashKey::Str(s.clone())),
            ObjKind::Tuple(items) => Probe::Tuple(items.clone()),
            ObjKind::List(_) | ObjKind::Dict(_) => Probe::Unhashable,
            _ => Probe::Key(HashKey::Ident(obj.addr())),
        })?;
        match probe {
            Probe::Key(key) => Ok(key),
            Probe::Tuple(items) => items
                .into_iter()
                .map(|item| self.hash_key(item))
                .collect::<HostResult<Vec<_>>>()
                .map(HashKey::Tuple),
            Probe::Unhashable => self.raise(
                ErrorKind::Type,
                format!("unhashable type: '{}'", self.short_type_name(obj)),
            ),
        }
    }

    pub(crate) fn hash_value(&self, obj: RawRef) -> HostResult<i64> {
        Ok(match self.hash_key(obj)? {
            HashKey::Int(-1) => -2,
            HashKey::Int(i) => i,
            other => {
                let mut hasher = FxHasher::default();
                other.hash(&mut hasher);
                hasher.finish() as i64
            }
        })
    }

    // ========================================================================
    // Comparison
    // ========================================================================

    pub(crate) fn values_equal(&self, a: RawRef, b: RawRef) -> HostResult<bool> {
        if a == b {
            return Ok(true);
        }
        match (self.scalar(a), self.scalar(b)) {
            (Scalar::None, Scalar::None) => Ok(true),
            (Scalar::Num(x), Scalar::Num(y)) => Ok(num_cmp(x, y) == Some(Ordering::Equal)),
            (Scalar::Str(x), Scalar::Str(y)) => Ok(x == y),
            (Scalar::Other(BuiltinType::List), Scalar::Other(BuiltinType::List))
            | (Scalar::Other(BuiltinType::Tuple), Scalar::Other(BuiltinType::Tuple)) => {
                let (left, right) = (self.seq_items(a)?, self.seq_items(b)?);
                if left.len() != right.len() {
                    return Ok(false);
                }
                for (x, y) in left.into_iter().zip(right) {
                    if !self.values_equal(x, y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Scalar::Other(BuiltinType::Dict), Scalar::Other(BuiltinType::Dict)) => {
                let left = self.dict_entries(a)?;
                if left.len() != self.dict_entries(b)?.len() {
                    return Ok(false);
                }
                for (key, value) in left {
                    let Some(other) = self.dict_lookup(b, key)? else {
                        return Ok(false);
                    };
                    let other = self.own(other);
                    if !self.values_equal(value, other.raw())? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Ordering of two values; `None` when unordered (NaN)
    pub(crate) fn order(&self, a: RawRef, b: RawRef, symbol: &str) -> HostResult<Option<Ordering>> {
        match (self.scalar(a), self.scalar(b)) {
            (Scalar::Num(x), Scalar::Num(y)) => Ok(num_cmp(x, y)),
            (Scalar::Str(x), Scalar::Str(y)) => Ok(Some(x.cmp(&y))),
            (Scalar::Other(BuiltinType::List), Scalar::Other(BuiltinType::List))
            | (Scalar::Other(BuiltinType::Tuple), Scalar::Other(BuiltinType::Tuple)) => {
                let (left, right) = (self.seq_items(a)?, self.seq_items(b)?);
                for (&x, &y) in left.iter().zip(&right) {
                    if !self.values_equal(x, y)? {
                        return self.order(x, y, symbol);
                    }
                }
                Ok(Some(left.len().cmp(&right.len())))
            }
            _ => self.raise(
                ErrorKind::Type,
                format!(
                    "'{symbol}' not supported between instances of '{}' and '{}'",
                    self.short_type_name(a),
                    self.short_type_name(b)
                ),
            ),
        }
    }

    // ========================================================================
    // Arithmetic
    // ========================================================================

    pub(crate) fn unary(&self, op: UnaryOp, operand: RawRef) -> HostResult<RawRef> {
        if op == UnaryOp::Not {
            let truth = self.truthy(operand)?;
            return Ok(self.new_bool(!truth));
        }
        match (op, self.scalar(operand)) {
            (UnaryOp::Neg, Scalar::Num(Num::Int(i))) => match i.checked_neg() {
                Some(value) => self.new_int(value),
                None => self.raise(ErrorKind::Overflow, "integer overflow"),
            },
            (UnaryOp::Neg, Scalar::Num(Num::Float(f))) => self.new_float(-f),
            (UnaryOp::Pos, Scalar::Num(Num::Int(i))) => self.new_int(i),
            (UnaryOp::Pos, Scalar::Num(Num::Float(f))) => self.new_float(f),
            _ => {
                let symbol = if op == UnaryOp::Neg { "-" } else { "+" };
                self.raise(
                    ErrorKind::Type,
                    format!(
                        "bad operand type for unary {symbol}: '{}'",
                        self.short_type_name(operand)
                    ),
                )
            }
        }
    }

    pub(crate) fn binary(&self, op: BinOp, a: RawRef, b: RawRef) -> HostResult<RawRef> {
        match (op, self.scalar(a), self.scalar(b)) {
            (_, Scalar::Num(x), Scalar::Num(y)) => self.numeric(op, x, y),
            (BinOp::Add, Scalar::Str(x), Scalar::Str(y)) => {
                self.new_str(&format!("{x}{y}"))
            }
            (BinOp::Mul, Scalar::Str(s), Scalar::Num(Num::Int(n)))
            | (BinOp::Mul, Scalar::Num(Num::Int(n)), Scalar::Str(s)) => {
                self.new_str(&s.repeat(usize::try_from(n).unwrap_or(0)))
            }
            (BinOp::Add, Scalar::Other(BuiltinType::List), Scalar::Other(BuiltinType::List)) => {
                let mut items = self.seq_items(a)?;
                items.extend(self.seq_items(b)?);
                self.new_list(&items)
            }
            (
                BinOp::Add,
                Scalar::Other(BuiltinType::Tuple),
                Scalar::Other(BuiltinType::Tuple),
            ) => {
                let mut items = self.seq_items(a)?;
                items.extend(self.seq_items(b)?);
                self.new_tuple(&items)
            }
            (BinOp::Mul, Scalar::Other(BuiltinType::List), Scalar::Num(Num::Int(n))) => {
                let items = self.seq_items(a)?;
                let count = usize::try_from(n).unwrap_or(0);
                let repeated: Vec<RawRef> = items
                    .iter()
                    .copied()
                    .cycle()
                    .take(items.len() * count)
                    .collect();
                self.new_list(&repeated)
            }
            _ => self.raise(
                ErrorKind::Type,
                format!(
                    "unsupported operand type(s) for {}: '{}' and '{}'",
                    op.symbol(),
                    self.short_type_name(a),
                    self.short_type_name(b)
                ),
            ),
        }
    }

    fn numeric(&self, op: BinOp, x: Num, y: Num) -> HostResult<RawRef> {
        if let (Num::Int(a), Num::Int(b)) = (x, y) {
            let checked = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => {
                    if b == 0 {
                        return self.raise(ErrorKind::ZeroDivision, "division by zero");
                    }
                    return self.new_float(a as f64 / b as f64);
                }
                BinOp::FloorDiv | BinOp::Mod if b == 0 => {
                    return self.raise(
                        ErrorKind::ZeroDivision,
                        "integer division or modulo by zero",
                    );
                }
                BinOp::FloorDiv => int_floor_div(a, b),
                BinOp::Mod => int_mod(a, b),
                BinOp::Pow if b < 0 => {
                    if a == 0 {
                        return self.raise(
                            ErrorKind::ZeroDivision,
                            "0.0 cannot be raised to a negative power",
                        );
                    }
                    return self.new_float((a as f64).powf(b as f64));
                }
                BinOp::Pow => u32::try_from(b).ok().and_then(|e| a.checked_pow(e)),
            };
            return match checked {
                Some(value) => self.new_int(value),
                None => self.raise(ErrorKind::Overflow, "integer overflow"),
            };
        }

        let (a, b) = (x.as_f64(), y.as_f64());
        let value = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div if b == 0.0 => {
                return self.raise(ErrorKind::ZeroDivision, "float division by zero");
            }
            BinOp::Div => a / b,
            BinOp::FloorDiv if b == 0.0 => {
                return self.raise(ErrorKind::ZeroDivision, "float floor division by zero");
            }
            BinOp::FloorDiv => (a / b).floor(),
            BinOp::Mod if b == 0.0 => {
                return self.raise(ErrorKind::ZeroDivision, "float modulo");
            }
            BinOp::Mod => {
                let r = a % b;
                if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                    r + b
                } else {
                    r
                }
            }
            BinOp::Pow if a == 0.0 && b < 0.0 => {
                return self.raise(
                    ErrorKind::ZeroDivision,
                    "0.0 cannot be raised to a negative power",
                );
            }
            BinOp::Pow => a.powf(b),
        };
        self.new_float(value)
    }

    // ========================================================================
    // Representation
    // ========================================================================

    pub(crate) fn repr_of(&self, obj: RawRef) -> HostResult<String> {
        let shape = self.with(obj, |kind| match kind {
            ObjKind::None => Shape::Text("None".to_string()),
            ObjKind::Bool(b) => Shape::Text(if *b { "True" } else { "False" }.to_string()),
            ObjKind::Int(i) => Shape::Text(i.to_string()),
            ObjKind::Float(f) => Shape::Text(float_repr(*f)),
            ObjKind::Str(s) => Shape::Text(quote(s)),
            ObjKind::Tuple(items) => Shape::Seq {
                open: "(",
                close: ")",
                items: items.clone(),
                tuple: true,
            },
            ObjKind::List(items) => Shape::Seq {
                open: "[",
                close: "]",
                items: items.clone(),
                tuple: false,
            },
            ObjKind::Dict(dict) => Shape::Dict(
                dict.entries
                    .iter()
                    .map(|entry| (entry.key, entry.value))
                    .collect(),
            ),
            ObjKind::Type(ty) => Shape::Text(format!("<class '{}'>", ty.name)),
            ObjKind::Instance(_) => Shape::Instance,
            ObjKind::Function(func) => {
                Shape::Text(format!("<built-in function {}>", func.def.name))
            }
            ObjKind::Builtin(builtin) => {
                Shape::Text(format!("<built-in function {}>", builtin.name()))
            }
            ObjKind::Lambda(_) => {
                Shape::Text(format!("<function <lambda> at {:#x}>", obj.addr()))
            }
            ObjKind::Module(module) => Shape::Text(format!("<module '{}'>", module.name)),
            ObjKind::BuiltinMethod(method) => {
                Shape::Text(format!("<built-in method {}>", method.name))
            }
        })?;

        let (items, dict, open, close, tuple) = match shape {
            Shape::Instance => {
                let ty = self.type_full_name(self.type_of_raw(obj));
                return Ok(format!("<{ty} object at {:#x}>", obj.addr()));
            }
            Shape::Text(text) => return Ok(text),
            Shape::Seq {
                open,
                close,
                items,
                tuple,
            } => (items, Vec::new(), open, close, tuple),
            Shape::Dict(entries) => (Vec::new(), entries, "{", "}", false),
        };

        if self.repr_stack.borrow().contains(&obj.addr()) {
            return Ok(format!("{open}...{close}"));
        }
        self.repr_stack.borrow_mut().push(obj.addr());
        let body = self.repr_items(&items, &dict);
        self.repr_stack.borrow_mut().pop();

        let body = body?;
        if tuple && items.len() == 1 {
            return Ok(format!("({body},)"));
        }
        Ok(format!("{open}{body}{close}"))
    }

    fn repr_items(&self, items: &[RawRef], entries: &[(RawRef, RawRef)]) -> HostResult<String> {
        let mut parts = Vec::with_capacity(items.len() + entries.len());
        for &item in items {
            parts.push(self.repr_of(item)?);
        }
        for &(key, value) in entries {
            parts.push(format!("{}: {}", self.repr_of(key)?, self.repr_of(value)?));
        }
        Ok(parts.join(", "))
    }

    pub(crate) fn str_of(&self, obj: RawRef) -> HostResult<String> {
        match self.scalar(obj) {
            Scalar::Str(text) => Ok(text.to_string()),
            _ => self.repr_of(obj),
        }
    }

    // ========================================================================
    // Dicts
    // ========================================================================

    /// Entries of a dict (borrowed)
    pub(crate) fn dict_entries(&self, dict: RawRef) -> HostResult<Vec<(RawRef, RawRef)>> {
        let entries = self.with(dict, |kind| match kind {
            ObjKind::Dict(d) => Some(d.entries.iter().map(|e| (e.key, e.value)).collect()),
            _ => None,
        })?;
        match entries {
            Some(entries) => Ok(entries),
            None => self.not_a_dict(dict),
        }
    }

    fn not_a_dict<T>(&self, obj: RawRef) -> HostResult<T> {
        self.raise(
            ErrorKind::Type,
            format!("expected dict, got '{}'", self.short_type_name(obj)),
        )
    }

    /// Value stored under `key` (new reference)
    pub(crate) fn dict_lookup(&self, dict: RawRef, key: RawRef) -> HostResult<Option<RawRef>> {
        let hash_key = self.hash_key(key)?;
        self.dict_lookup_key(dict, &hash_key)
    }

    fn dict_lookup_key(&self, dict: RawRef, key: &HashKey) -> HostResult<Option<RawRef>> {
        let found = self.with(dict, |kind| match kind {
            ObjKind::Dict(d) => Some(d.position(key).map(|i| d.entries[i].value)),
            _ => None,
        })?;
        match found {
            Some(value) => Ok(value.map(|v| self.ref_inc(v))),
            None => self.not_a_dict(dict),
        }
    }

    /// Value stored under a text key (new reference); never raises
    pub(crate) fn dict_get_str(&self, dict: RawRef, name: &str) -> Option<RawRef> {
        if self.kind_of(dict) != Some(BuiltinType::Dict) {
            return None;
        }
        self.dict_lookup_key(dict, &HashKey::Str(Rc::from(name)))
            .ok()
            .flatten()
    }

    pub(crate) fn dict_insert(&self, dict: RawRef, key: RawRef, value: RawRef) -> HostResult<()> {
        if self.kind_of(dict) != Some(BuiltinType::Dict) {
            return self.not_a_dict(dict);
        }
        let hash_key = self.hash_key(key)?;
        self.incref(key);
        self.incref(value);
        let replaced = self.with_mut(dict, |kind| {
            let ObjKind::Dict(d) = kind else {
                return None;
            };
            match d.position(&hash_key) {
                Some(i) => Some(std::mem::replace(&mut d.entries[i].value, value)),
                None => {
                    d.entries.push(DictEntry {
                        hash_key,
                        key,
                        value,
                    });
                    None
                }
            }
        })?;
        if let Some(old) = replaced {
            self.decref(key);
            self.decref(old);
        }
        Ok(())
    }

    pub(crate) fn dict_set_str(&self, dict: RawRef, name: &str, value: RawRef) -> HostResult<()> {
        let key = self.own(self.new_str(name)?);
        self.dict_insert(dict, key.raw(), value)
    }

    /// Remove `key`; `false` when absent
    pub(crate) fn dict_remove(&self, dict: RawRef, key: RawRef) -> HostResult<bool> {
        let hash_key = self.hash_key(key)?;
        let removed = self.with_mut(dict, |kind| match kind {
            ObjKind::Dict(d) => Some(d.position(&hash_key).map(|i| d.entries.remove(i))),
            _ => None,
        })?;
        match removed {
            Some(Some(entry)) => {
                self.decref(entry.key);
                self.decref(entry.value);
                Ok(true)
            }
            Some(None) => Ok(false),
            None => self.not_a_dict(dict),
        }
    }

    // ========================================================================
    // Lists
    // ========================================================================

    pub(crate) fn sort_items(&self, list: RawRef) -> HostResult<()> {
        let items = self.seq_items(list)?;
        let mut keyed = Vec::with_capacity(items.len());
        for &item in &items {
            keyed.push((self.scalar(item), item));
        }

        let mismatch = keyed.windows(2).find_map(|pair| {
            let same = matches!(
                (&pair[0].0, &pair[1].0),
                (Scalar::Num(_), Scalar::Num(_)) | (Scalar::Str(_), Scalar::Str(_))
            );
            (!same).then_some((pair[1].1, pair[0].1))
        });
        if let Some((a, b)) = mismatch {
            return self.raise(
                ErrorKind::Type,
                format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    self.short_type_name(a),
                    self.short_type_name(b)
                ),
            );
        }
        if let Some((Scalar::Other(_) | Scalar::None, item)) = keyed.first() {
            if keyed.len() > 1 {
                let name = self.short_type_name(*item);
                return self.raise(
                    ErrorKind::Type,
                    format!("'<' not supported between instances of '{name}' and '{name}'"),
                );
            }
        }

        keyed.sort_by(|(a, _), (b, _)| match (a, b) {
            (Scalar::Num(x), Scalar::Num(y)) => num_cmp(*x, *y).unwrap_or(Ordering::Equal),
            (Scalar::Str(x), Scalar::Str(y)) => x.cmp(y),
            _ => Ordering::Equal,
        });
        let sorted: Vec<RawRef> = keyed.into_iter().map(|(_, item)| item).collect();
        self.with_mut(list, |kind| {
            if let ObjKind::List(items) = kind {
                *items = sorted;
            }
        })
    }
}
