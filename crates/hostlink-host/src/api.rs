//! `HostApi` implementation of [`MemoryHost`]

use std::any::Any;
use std::rc::Rc;

use hostlink_sdk::{
    ErrorKind, EvalMode, HostApi, HostErrorRecord, HostResult, MethodDef, RawRef,
    TypeFlags, TypeSpec,
};

use crate::builtins;
use crate::eval;
use crate::host::MemoryHost;
use crate::object::{
    BuiltinMethodData, BuiltinType, FunctionData, InstanceData, ModuleData, ObjKind, TypeObject,
};
use crate::ops::{normalize_index, Scalar};

/// What a call dispatches to, copied out of the heap
enum Callee {
    Function(MethodDef, RawRef),
    Builtin(crate::object::BuiltinFunction),
    Type(RawRef, Option<BuiltinType>),
    Lambda,
    Method(RawRef, &'static str),
    Instance,
    NotCallable,
}

impl MemoryHost {
    fn seq_kind_error<T>(&self, obj: RawRef, what: &str) -> HostResult<T> {
        self.raise(
            ErrorKind::Type,
            format!("'{}' object {what}", self.short_type_name(obj)),
        )
    }

    fn index_error<T>(&self, obj: RawRef, assignment: bool) -> HostResult<T> {
        let kind = self.short_type_name(obj);
        let message = if assignment {
            format!("{kind} assignment index out of range")
        } else {
            format!("{kind} index out of range")
        };
        self.raise(ErrorKind::Index, message)
    }

    fn key_error<T>(&self, key: RawRef) -> HostResult<T> {
        let message = self.repr_of(key)?;
        self.raise(ErrorKind::Key, message)
    }

    /// `(name, value)` pairs of a kwargs dict (borrowed values)
    pub(crate) fn kwargs_pairs(&self, kwargs: Option<RawRef>) -> HostResult<Vec<(String, RawRef)>> {
        let Some(kwargs) = kwargs.and_then(RawRef::non_null) else {
            return Ok(Vec::new());
        };
        if kwargs == self.none_ref() {
            return Ok(Vec::new());
        }
        let mut pairs = Vec::new();
        for (key, value) in self.dict_entries(kwargs)? {
            match self.scalar(key) {
                Scalar::Str(name) => pairs.push((name.to_string(), value)),
                _ => return self.raise(ErrorKind::Type, "keywords must be strings"),
            }
        }
        Ok(pairs)
    }

    fn instance_lookup(&self, obj: RawRef, name: &str) -> HostResult<Option<RawRef>> {
        let ty = self.type_of_raw(obj);
        if let Some(getter) =
            self.find_in_chain(ty, |t| t.getset.iter().find(|g| g.name == name).map(|g| g.get.clone()))
        {
            let result = getter(obj);
            return self.hook_result(result, &format!("getter of '{name}'")).map(Some);
        }
        if let Some(def) =
            self.find_in_chain(ty, |t| t.methods.iter().find(|m| m.name == name).cloned())
        {
            self.incref(obj);
            let bound = self.alloc(ObjKind::Function(FunctionData {
                def,
                bound: Some(obj),
            }));
            return Ok(Some(bound));
        }
        Ok(None)
    }

    fn type_attr(&self, ty: RawRef, name: &str) -> HostResult<Option<RawRef>> {
        let (full, short, doc, base, basic_size) = self.with(ty, |kind| match kind {
            ObjKind::Type(t) => (
                t.name.clone(),
                t.short_name().to_string(),
                t.doc.clone(),
                t.base,
                t.basic_size,
            ),
            _ => (String::new(), String::new(), None, None, 0),
        })?;
        let value = match name {
            "__name__" => self.new_str(&short)?,
            "__basicsize__" => self.new_int(i64::try_from(basic_size).unwrap_or(i64::MAX))?,
            "__qualname__" => self.new_str(&full)?,
            "__module__" => match full.rsplit_once('.') {
                Some((module, _)) => self.new_str(module)?,
                None => self.new_str("builtins")?,
            },
            "__doc__" => match doc {
                Some(doc) => self.new_str(&doc)?,
                None => self.none(),
            },
            "__base__" => match base {
                Some(base) => self.ref_inc(base),
                None => self.none(),
            },
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn container_method(&self, obj: RawRef, name: &str) -> Option<RawRef> {
        let method = builtins::container_method_name(self.kind_of(obj)?, name)?;
        self.incref(obj);
        Some(self.alloc(ObjKind::BuiltinMethod(BuiltinMethodData {
            receiver: obj,
            name: method,
        })))
    }

    fn lookup_attr(&self, obj: RawRef, name: &str) -> HostResult<Option<RawRef>> {
        if name == "__class__" {
            return Ok(Some(self.type_of(obj)));
        }
        match self.kind_of(obj) {
            Some(BuiltinType::Module) => {
                let dict = self.with(obj, |kind| match kind {
                    ObjKind::Module(m) => m.dict,
                    _ => RawRef::NULL,
                })?;
                Ok(self.dict_get_str(dict, name))
            }
            Some(BuiltinType::Object) => self.instance_lookup(obj, name),
            Some(BuiltinType::Type) => self.type_attr(obj, name),
            Some(BuiltinType::Function | BuiltinType::Lambda) if name == "__name__" => {
                let function_name = self.with(obj, |kind| match kind {
                    ObjKind::Function(f) => f.def.name.clone(),
                    ObjKind::Builtin(b) => b.name().to_string(),
                    _ => "<lambda>".to_string(),
                })?;
                self.new_str(&function_name).map(Some)
            }
            Some(BuiltinType::Function) if name == "__doc__" => {
                let doc = self.with(obj, |kind| match kind {
                    ObjKind::Function(f) => f.def.doc.clone(),
                    _ => None,
                })?;
                match doc {
                    Some(doc) => self.new_str(&doc).map(Some),
                    None => Ok(Some(self.none())),
                }
            }
            Some(_) => Ok(self.container_method(obj, name)),
            None => self.with(obj, |_| None),
        }
    }

    fn attribute_error<T>(&self, obj: RawRef, name: &str) -> HostResult<T> {
        if self.kind_of(obj) == Some(BuiltinType::Module) {
            let module = self
                .with(obj, |kind| match kind {
                    ObjKind::Module(m) => m.name.clone(),
                    _ => String::new(),
                })
                .unwrap_or_default();
            return self.raise(
                ErrorKind::Attribute,
                format!("module '{module}' has no attribute '{name}'"),
            );
        }
        self.raise(
            ErrorKind::Attribute,
            format!(
                "'{}' object has no attribute '{name}'",
                self.short_type_name(obj)
            ),
        )
    }

    fn has_getset(&self, obj: RawRef, name: &str) -> bool {
        self.kind_of(obj) == Some(BuiltinType::Object)
            && self
                .find_in_chain(self.type_of_raw(obj), |t| {
                    t.getset.iter().any(|g| g.name == name).then_some(())
                })
                .is_some()
    }

    /// Namespace dict of a module (borrowed)
    pub(crate) fn module_dict(&self, obj: RawRef) -> Option<RawRef> {
        self.peek(obj, |kind| match kind {
            ObjKind::Module(m) => Some(m.dict),
            _ => None,
        })
        .flatten()
    }

    fn validate_spec(&self, spec: &TypeSpec) -> Result<(), String> {
        if spec.name.is_empty() {
            return Err("type name must be a non-empty string".to_string());
        }
        let mut seen = rustc_hash::FxHashSet::default();
        let names = spec
            .methods
            .iter()
            .map(|m| m.name.as_str())
            .chain(spec.getset.iter().map(|g| g.name.as_str()));
        for name in names {
            if !seen.insert(name) {
                return Err(format!(
                    "duplicate attribute '{name}' in type '{}'",
                    spec.short_name()
                ));
            }
        }
        if spec.flags.contains(TypeFlags::HAVE_GC) && spec.traverse.is_none() {
            return Err(format!(
                "type '{}' has HAVE_GC set but no traverse hook",
                spec.short_name()
            ));
        }
        if let Some(base) = spec.base {
            let acceptable = self.kind_of(base) == Some(BuiltinType::Type)
                && self.type_flags(base).contains(TypeFlags::BASETYPE);
            if !acceptable {
                return Err(format!(
                    "type '{}' is not an acceptable base type",
                    self.type_full_name(base)
                ));
            }
        }
        Ok(())
    }

    fn resolve_callee(&self, callable: RawRef) -> HostResult<Callee> {
        self.with(callable, |kind| match kind {
            ObjKind::Function(f) => Callee::Function(f.def.clone(), f.bound.unwrap_or(RawRef::NULL)),
            ObjKind::Builtin(b) => Callee::Builtin(*b),
            ObjKind::Type(t) => Callee::Type(callable, t.builtin),
            ObjKind::Lambda(_) => Callee::Lambda,
            ObjKind::BuiltinMethod(m) => Callee::Method(m.receiver, m.name),
            ObjKind::Instance(_) => Callee::Instance,
            _ => Callee::NotCallable,
        })
    }
}

impl HostApi for MemoryHost {
    // ========================================================================
    // Reference Counting
    // ========================================================================

    fn incref(&self, obj: RawRef) {
        self.incref_raw(obj);
    }

    fn decref(&self, obj: RawRef) {
        self.decref_raw(obj);
    }

    fn refcount(&self, obj: RawRef) -> isize {
        self.refcount_raw(obj)
    }

    // ========================================================================
    // Boxing
    // ========================================================================

    fn none(&self) -> RawRef {
        self.ref_inc(self.none_ref())
    }

    fn new_bool(&self, value: bool) -> RawRef {
        self.ref_inc(self.bool_ref(value))
    }

    fn new_int(&self, value: i64) -> HostResult<RawRef> {
        Ok(self.alloc(ObjKind::Int(value)))
    }

    fn new_float(&self, value: f64) -> HostResult<RawRef> {
        Ok(self.alloc(ObjKind::Float(value)))
    }

    fn new_str(&self, value: &str) -> HostResult<RawRef> {
        Ok(self.alloc(ObjKind::Str(Rc::from(value))))
    }

    // ========================================================================
    // Unboxing
    // ========================================================================

    fn is_none(&self, obj: RawRef) -> bool {
        obj == self.none_ref()
    }

    fn is_true(&self, obj: RawRef) -> HostResult<bool> {
        self.truthy(obj)
    }

    fn as_int(&self, obj: RawRef) -> HostResult<i64> {
        let value = self.with(obj, |kind| match kind {
            ObjKind::Int(i) => Some(*i),
            ObjKind::Bool(b) => Some(i64::from(*b)),
            _ => None,
        })?;
        match value {
            Some(value) => Ok(value),
            None => self.seq_kind_error(obj, "cannot be interpreted as an integer"),
        }
    }

    fn as_float(&self, obj: RawRef) -> HostResult<f64> {
        match self.scalar(obj) {
            Scalar::Num(num) => Ok(num.as_f64()),
            _ => self.raise(
                ErrorKind::Type,
                format!("must be real number, not {}", self.short_type_name(obj)),
            ),
        }
    }

    fn as_str(&self, obj: RawRef) -> HostResult<String> {
        match self.scalar(obj) {
            Scalar::Str(text) => Ok(text.to_string()),
            _ => self.raise(
                ErrorKind::Type,
                format!("expected str, got {}", self.short_type_name(obj)),
            ),
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    fn type_of(&self, obj: RawRef) -> RawRef {
        self.ref_inc(self.type_of_raw(obj))
    }

    fn type_name(&self, obj: RawRef) -> String {
        self.type_full_name(self.type_of_raw(obj))
    }

    fn repr(&self, obj: RawRef) -> HostResult<String> {
        self.repr_of(obj)
    }

    fn str(&self, obj: RawRef) -> HostResult<String> {
        self.str_of(obj)
    }

    fn hash(&self, obj: RawRef) -> HostResult<i64> {
        self.hash_value(obj)
    }

    fn is_instance(&self, obj: RawRef, cls: RawRef) -> HostResult<bool> {
        if self.kind_of(cls) == Some(BuiltinType::Tuple) {
            for candidate in self.seq_items(cls)? {
                if self.is_instance(obj, candidate)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        if self.kind_of(cls) != Some(BuiltinType::Type) {
            return self.raise(
                ErrorKind::Type,
                "isinstance() arg 2 must be a type or tuple of types",
            );
        }
        self.is_subclass(self.type_of_raw(obj), cls)
    }

    fn is_subclass(&self, derived: RawRef, cls: RawRef) -> HostResult<bool> {
        if self.kind_of(derived) != Some(BuiltinType::Type) {
            return self.raise(ErrorKind::Type, "issubclass() arg 1 must be a class");
        }
        if self.kind_of(cls) != Some(BuiltinType::Type) {
            return self.raise(ErrorKind::Type, "issubclass() arg 2 must be a class");
        }
        let mut current = Some(derived);
        while let Some(ty) = current {
            if ty == cls {
                return Ok(true);
            }
            current = self.with(ty, |kind| match kind {
                ObjKind::Type(t) => t.base,
                _ => None,
            })?;
        }
        Ok(false)
    }

    fn is_callable(&self, obj: RawRef) -> bool {
        match self.resolve_callee(obj) {
            Ok(Callee::NotCallable) => false,
            Ok(Callee::Instance) => self
                .find_in_chain(self.type_of_raw(obj), |t| {
                    t.methods.iter().any(|m| m.name == "__call__").then_some(())
                })
                .is_some(),
            Ok(_) => true,
            Err(_) => {
                self.clear_error();
                false
            }
        }
    }

    fn check_mapping(&self, obj: RawRef) -> bool {
        self.kind_of(obj) == Some(BuiltinType::Dict)
    }

    fn check_dict(&self, obj: RawRef) -> bool {
        self.kind_of(obj) == Some(BuiltinType::Dict)
    }

    fn check_sequence(&self, obj: RawRef) -> bool {
        matches!(
            self.kind_of(obj),
            Some(BuiltinType::List | BuiltinType::Tuple)
        )
    }

    fn check_list(&self, obj: RawRef) -> bool {
        self.kind_of(obj) == Some(BuiltinType::List)
    }

    fn check_tuple(&self, obj: RawRef) -> bool {
        self.kind_of(obj) == Some(BuiltinType::Tuple)
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    fn get_attr(&self, obj: RawRef, name: &str) -> HostResult<RawRef> {
        match self.lookup_attr(obj, name)? {
            Some(value) => Ok(value),
            None => self.attribute_error(obj, name),
        }
    }

    fn set_attr(&self, obj: RawRef, name: &str, value: RawRef) -> HostResult<()> {
        if let Some(dict) = self.module_dict(obj) {
            return self.dict_set_str(dict, name, value);
        }
        if self.has_getset(obj, name) {
            return self.raise(
                ErrorKind::Attribute,
                format!(
                    "attribute '{name}' of '{}' objects is not writable",
                    self.short_type_name(obj)
                ),
            );
        }
        self.attribute_error(obj, name)
    }

    fn has_attr(&self, obj: RawRef, name: &str) -> bool {
        let saved = self.error_slot().borrow_mut().take();
        let found = match self.lookup_attr(obj, name) {
            Ok(Some(value)) => {
                self.decref(value);
                true
            }
            _ => false,
        };
        *self.error_slot().borrow_mut() = saved;
        found
    }

    fn del_attr(&self, obj: RawRef, name: &str) -> HostResult<()> {
        if let Some(dict) = self.module_dict(obj) {
            let key = self.own(self.new_str(name)?);
            if self.dict_remove(dict, key.raw())? {
                return Ok(());
            }
            return self.attribute_error(obj, name);
        }
        if self.has_getset(obj, name) {
            return self.raise(
                ErrorKind::Attribute,
                format!(
                    "attribute '{name}' of '{}' objects is not writable",
                    self.short_type_name(obj)
                ),
            );
        }
        self.attribute_error(obj, name)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn call(&self, callable: RawRef, args: RawRef, kwargs: Option<RawRef>) -> HostResult<RawRef> {
        if self.kind_of(args) != Some(BuiltinType::Tuple) {
            return self.raise(ErrorKind::Type, "argument list must be a tuple");
        }
        let _depth = self.enter_call()?;
        let kwargs = kwargs.and_then(RawRef::non_null);

        match self.resolve_callee(callable)? {
            Callee::Function(def, receiver) => {
                if !self.kwargs_pairs(kwargs)?.is_empty() {
                    return self.raise(
                        ErrorKind::Type,
                        format!("{}() takes no keyword arguments", def.name),
                    );
                }
                let result = (def.call)(receiver, args);
                self.hook_result(result, &def.name)
            }
            Callee::Builtin(function) => {
                let items = self.seq_items(args)?;
                let kwargs = self.kwargs_pairs(kwargs)?;
                builtins::call_builtin(self, function, &items, &kwargs)
            }
            Callee::Type(_, Some(builtin)) => {
                let items = self.seq_items(args)?;
                let kwargs = self.kwargs_pairs(kwargs)?;
                builtins::construct(self, builtin, &items, &kwargs)
            }
            Callee::Type(ty, None) => match self.find_in_chain(ty, |t| t.new.clone()) {
                Some(hook) => {
                    let result = hook(ty, args, kwargs.unwrap_or(RawRef::NULL));
                    self.hook_result(result, "constructor")
                }
                None => self.raise(
                    ErrorKind::Type,
                    format!(
                        "cannot create '{}' instances",
                        self.type_full_name(ty)
                    ),
                ),
            },
            Callee::Lambda => {
                let items = self.seq_items(args)?;
                let kwargs = self.kwargs_pairs(kwargs)?;
                eval::call_lambda(self, callable, &items, &kwargs)
            }
            Callee::Method(receiver, name) => {
                let items = self.seq_items(args)?;
                let kwargs = self.kwargs_pairs(kwargs)?;
                builtins::call_container_method(self, receiver, name, &items, &kwargs)
            }
            Callee::Instance => {
                let method = self.instance_lookup(callable, "__call__")?;
                match method {
                    Some(method) => {
                        let method = self.own(method);
                        self.call(method.raw(), args, kwargs)
                    }
                    None => self.seq_kind_error(callable, "is not callable"),
                }
            }
            Callee::NotCallable => self.seq_kind_error(callable, "is not callable"),
        }
    }

    fn new_function(&self, def: MethodDef, module: Option<RawRef>) -> HostResult<RawRef> {
        let bound = module.and_then(RawRef::non_null).map(|m| self.ref_inc(m));
        Ok(self.alloc(ObjKind::Function(FunctionData { def, bound })))
    }

    // ========================================================================
    // Containers
    // ========================================================================

    fn new_tuple(&self, items: &[RawRef]) -> HostResult<RawRef> {
        for &item in items {
            self.incref(item);
        }
        Ok(self.alloc(ObjKind::Tuple(items.to_vec())))
    }

    fn new_list(&self, items: &[RawRef]) -> HostResult<RawRef> {
        for &item in items {
            self.incref(item);
        }
        Ok(self.alloc(ObjKind::List(items.to_vec())))
    }

    fn new_dict(&self) -> HostResult<RawRef> {
        Ok(self.alloc(ObjKind::Dict(Default::default())))
    }

    fn len(&self, obj: RawRef) -> HostResult<usize> {
        let len = self.with(obj, |kind| match kind {
            ObjKind::Str(s) => Some(s.chars().count()),
            ObjKind::Tuple(items) | ObjKind::List(items) => Some(items.len()),
            ObjKind::Dict(d) => Some(d.entries.len()),
            _ => None,
        })?;
        match len {
            Some(len) => Ok(len),
            None => self.raise(
                ErrorKind::Type,
                format!("object of type '{}' has no len()", self.short_type_name(obj)),
            ),
        }
    }

    fn get_item(&self, obj: RawRef, key: RawRef) -> HostResult<RawRef> {
        match self.kind_of(obj) {
            Some(BuiltinType::Dict) => match self.dict_lookup(obj, key)? {
                Some(value) => Ok(value),
                None => self.key_error(key),
            },
            Some(BuiltinType::List | BuiltinType::Tuple | BuiltinType::Str) => {
                match self.scalar(key) {
                    Scalar::Num(crate::ops::Num::Int(index)) => {
                        let index = isize::try_from(index).unwrap_or(isize::MAX);
                        self.seq_get(obj, index)
                    }
                    _ => self.raise(
                        ErrorKind::Type,
                        format!(
                            "{} indices must be integers, not {}",
                            self.short_type_name(obj),
                            self.short_type_name(key)
                        ),
                    ),
                }
            }
            _ => self.seq_kind_error(obj, "is not subscriptable"),
        }
    }

    fn set_item(&self, obj: RawRef, key: RawRef, value: RawRef) -> HostResult<()> {
        match self.kind_of(obj) {
            Some(BuiltinType::Dict) => self.dict_insert(obj, key, value),
            Some(BuiltinType::List) => match self.scalar(key) {
                Scalar::Num(crate::ops::Num::Int(index)) => {
                    let index = isize::try_from(index).unwrap_or(isize::MAX);
                    self.seq_set(obj, index, value)
                }
                _ => self.raise(
                    ErrorKind::Type,
                    format!(
                        "list indices must be integers, not {}",
                        self.short_type_name(key)
                    ),
                ),
            },
            _ => self.seq_kind_error(obj, "does not support item assignment"),
        }
    }

    fn del_item(&self, obj: RawRef, key: RawRef) -> HostResult<()> {
        match self.kind_of(obj) {
            Some(BuiltinType::Dict) => {
                if self.dict_remove(obj, key)? {
                    Ok(())
                } else {
                    self.key_error(key)
                }
            }
            Some(BuiltinType::List) => match self.scalar(key) {
                Scalar::Num(crate::ops::Num::Int(index)) => {
                    let index = isize::try_from(index).unwrap_or(isize::MAX);
                    self.seq_del(obj, index)
                }
                _ => self.raise(
                    ErrorKind::Type,
                    format!(
                        "list indices must be integers, not {}",
                        self.short_type_name(key)
                    ),
                ),
            },
            _ => self.seq_kind_error(obj, "doesn't support item deletion"),
        }
    }

    fn contains(&self, obj: RawRef, key: RawRef) -> HostResult<bool> {
        match self.kind_of(obj) {
            Some(BuiltinType::Dict) => Ok(self.dict_lookup(obj, key)?.map(|v| self.decref(v)).is_some()),
            Some(BuiltinType::List | BuiltinType::Tuple) => {
                for item in self.seq_items(obj)? {
                    if self.values_equal(item, key)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Some(BuiltinType::Str) => match (self.scalar(obj), self.scalar(key)) {
                (Scalar::Str(text), Scalar::Str(needle)) => Ok(text.contains(&*needle)),
                _ => self.raise(
                    ErrorKind::Type,
                    format!(
                        "'in <string>' requires string as left operand, not {}",
                        self.short_type_name(key)
                    ),
                ),
            },
            _ => self.raise(
                ErrorKind::Type,
                format!(
                    "argument of type '{}' is not iterable",
                    self.short_type_name(obj)
                ),
            ),
        }
    }

    fn keys(&self, obj: RawRef) -> HostResult<RawRef> {
        let keys: Vec<RawRef> = self.dict_entries(obj)?.into_iter().map(|(k, _)| k).collect();
        self.new_list(&keys)
    }

    fn seq_get(&self, obj: RawRef, index: isize) -> HostResult<RawRef> {
        enum Found {
            Item(RawRef),
            Char(char),
            OutOfRange,
            NotSequence,
        }
        let found = self.with(obj, |kind| match kind {
            ObjKind::Tuple(items) | ObjKind::List(items) => normalize_index(items.len(), index)
                .map_or(Found::OutOfRange, |i| Found::Item(items[i])),
            ObjKind::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                normalize_index(chars.len(), index).map_or(Found::OutOfRange, |i| Found::Char(chars[i]))
            }
            _ => Found::NotSequence,
        })?;
        match found {
            Found::Item(item) => Ok(self.ref_inc(item)),
            Found::Char(c) => self.new_str(c.encode_utf8(&mut [0; 4])),
            Found::OutOfRange => self.index_error(obj, false),
            Found::NotSequence => self.seq_kind_error(obj, "does not support indexing"),
        }
    }

    fn seq_set(&self, obj: RawRef, index: isize, value: RawRef) -> HostResult<()> {
        if self.kind_of(obj) != Some(BuiltinType::List) {
            return self.seq_kind_error(obj, "does not support item assignment");
        }
        self.incref(value);
        let replaced = self.with_mut(obj, |kind| match kind {
            ObjKind::List(items) => normalize_index(items.len(), index)
                .map(|i| std::mem::replace(&mut items[i], value)),
            _ => None,
        })?;
        match replaced {
            Some(old) => {
                self.decref(old);
                Ok(())
            }
            None => {
                self.decref(value);
                self.index_error(obj, true)
            }
        }
    }

    fn seq_del(&self, obj: RawRef, index: isize) -> HostResult<()> {
        if self.kind_of(obj) != Some(BuiltinType::List) {
            return self.seq_kind_error(obj, "doesn't support item deletion");
        }
        let removed = self.with_mut(obj, |kind| match kind {
            ObjKind::List(items) => normalize_index(items.len(), index).map(|i| items.remove(i)),
            _ => None,
        })?;
        match removed {
            Some(old) => {
                self.decref(old);
                Ok(())
            }
            None => self.index_error(obj, true),
        }
    }

    fn list_append(&self, list: RawRef, value: RawRef) -> HostResult<()> {
        if self.kind_of(list) != Some(BuiltinType::List) {
            return self.seq_kind_error(list, "has no attribute 'append'");
        }
        self.incref(value);
        self.with_mut(list, |kind| {
            if let ObjKind::List(items) = kind {
                items.push(value);
            }
        })
    }

    fn list_insert(&self, list: RawRef, index: isize, value: RawRef) -> HostResult<()> {
        if self.kind_of(list) != Some(BuiltinType::List) {
            return self.seq_kind_error(list, "has no attribute 'insert'");
        }
        self.incref(value);
        self.with_mut(list, |kind| {
            if let ObjKind::List(items) = kind {
                let len = items.len() as isize;
                let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
                items.insert(at as usize, value);
            }
        })
    }

    fn list_sort(&self, list: RawRef) -> HostResult<()> {
        if self.kind_of(list) != Some(BuiltinType::List) {
            return self.seq_kind_error(list, "has no attribute 'sort'");
        }
        self.sort_items(list)
    }

    fn list_reverse(&self, list: RawRef) -> HostResult<()> {
        if self.kind_of(list) != Some(BuiltinType::List) {
            return self.seq_kind_error(list, "has no attribute 'reverse'");
        }
        self.with_mut(list, |kind| {
            if let ObjKind::List(items) = kind {
                items.reverse();
            }
        })
    }

    fn dict_clear(&self, dict: RawRef) -> HostResult<()> {
        if self.kind_of(dict) != Some(BuiltinType::Dict) {
            return self.seq_kind_error(dict, "has no attribute 'clear'");
        }
        let entries = self.with_mut(dict, |kind| match kind {
            ObjKind::Dict(d) => std::mem::take(&mut d.entries),
            _ => Vec::new(),
        })?;
        for entry in entries {
            self.decref(entry.key);
            self.decref(entry.value);
        }
        Ok(())
    }

    // ========================================================================
    // Error State
    // ========================================================================

    fn set_error(&self, kind: ErrorKind, message: &str) {
        let _ = self.raise::<()>(kind, message);
    }

    fn error_occurred(&self) -> Option<ErrorKind> {
        self.error_slot().borrow().as_ref().map(|record| record.kind)
    }

    fn fetch_error(&self) -> Option<HostErrorRecord> {
        self.error_slot().borrow_mut().take()
    }

    // ========================================================================
    // Types and Instances
    // ========================================================================

    fn ready_type(&self, spec: TypeSpec) -> HostResult<RawRef> {
        if let Err(message) = self.validate_spec(&spec) {
            return self.raise(ErrorKind::Type, message);
        }
        let base = match spec.base {
            Some(base) => self.ref_inc(base),
            None => self.ref_inc(self.type_ref(BuiltinType::Object)),
        };
        tracing::debug!(
            name = %spec.name,
            methods = spec.methods.len(),
            attributes = spec.getset.len(),
            "type ready"
        );
        Ok(self.alloc(ObjKind::Type(TypeObject {
            name: spec.name,
            doc: spec.doc,
            basic_size: spec.basic_size,
            flags: spec.flags,
            base: Some(base),
            builtin: None,
            new: spec.new,
            dealloc: spec.dealloc,
            traverse: spec.traverse,
            methods: spec.methods,
            getset: spec.getset,
        })))
    }

    fn alloc_instance(&self, ty: RawRef) -> HostResult<RawRef> {
        let builtin = self.with(ty, |kind| match kind {
            ObjKind::Type(t) => Ok(t.builtin),
            _ => Err(()),
        })?;
        match builtin {
            Ok(None) => {
                self.incref(ty);
                Ok(self.alloc(ObjKind::Instance(InstanceData { ty, payload: None })))
            }
            Ok(Some(kind)) => self.raise(
                ErrorKind::Type,
                format!("cannot allocate an instance of builtin type '{}'", kind.name()),
            ),
            Err(()) => self.raise(ErrorKind::Type, "alloc_instance() requires a type"),
        }
    }

    fn set_payload(&self, obj: RawRef, payload: Rc<dyn Any>) -> HostResult<()> {
        let previous = self.with_mut(obj, |kind| match kind {
            ObjKind::Instance(inst) => Ok(inst.payload.replace(payload)),
            _ => Err(()),
        })?;
        match previous {
            Ok(old) => {
                drop(old);
                Ok(())
            }
            Err(()) => self.seq_kind_error(obj, "has no native payload"),
        }
    }

    fn payload(&self, obj: RawRef) -> Option<Rc<dyn Any>> {
        self.heap_payload(obj, false)
    }

    fn take_payload(&self, obj: RawRef) -> Option<Rc<dyn Any>> {
        self.heap_payload(obj, true)
    }

    fn free_instance(&self, obj: RawRef) {
        let state = self.peek(obj, |kind| matches!(kind, ObjKind::Instance(_)));
        match state {
            Some(true) if self.refcount(obj) <= 0 => self.release_instance(obj),
            Some(true) => {
                if self.config().strict_refcounts {
                    self.fatal_error(&format!("free_instance of live reference {obj:?}"));
                }
            }
            Some(false) => self.fatal_error(&format!("free_instance of non-instance {obj:?}")),
            None => self.refcount_misuse("free_instance", obj),
        }
    }

    // ========================================================================
    // Modules
    // ========================================================================

    fn new_module(&self, name: &str, doc: Option<&str>) -> HostResult<RawRef> {
        let dict = self.own(self.new_dict()?);
        let module_name = self.own(self.new_str(name)?);
        self.dict_set_str(dict.raw(), "__name__", module_name.raw())?;
        let doc = self.own(match doc {
            Some(doc) => self.new_str(doc)?,
            None => self.none(),
        });
        self.dict_set_str(dict.raw(), "__doc__", doc.raw())?;
        Ok(self.alloc(ObjKind::Module(ModuleData {
            name: name.to_string(),
            dict: dict.into_raw(),
        })))
    }

    fn module_add(&self, module: RawRef, name: &str, value: RawRef) -> HostResult<()> {
        match self.module_dict(module) {
            Some(dict) => self.dict_set_str(dict, name, value),
            None => self.seq_kind_error(module, "is not a module"),
        }
    }

    fn register_module(&self, name: &str, module: RawRef) -> HostResult<()> {
        if self.kind_of(module) != Some(BuiltinType::Module) {
            return self.seq_kind_error(module, "is not a module");
        }
        self.insert_module(name, module);
        Ok(())
    }

    fn fatal_error(&self, message: &str) {
        self.push_diagnostic(message);
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    fn eval(
        &self,
        source: &str,
        mode: EvalMode,
        globals: RawRef,
        locals: RawRef,
    ) -> HostResult<RawRef> {
        if self.kind_of(globals) != Some(BuiltinType::Dict) {
            return self.raise(ErrorKind::Type, "globals must be a dict");
        }
        if !self.check_mapping(locals) {
            return self.raise(ErrorKind::Type, "locals must be a mapping");
        }
        eval::evaluate(self, source, mode, globals, locals)
    }

    fn current_globals(&self) -> HostResult<RawRef> {
        match self.frame_scopes() {
            Some((globals, _)) => Ok(self.ref_inc(globals)),
            None => self.raise(ErrorKind::Runtime, "no host frame is executing"),
        }
    }

    fn current_locals(&self) -> HostResult<RawRef> {
        match self.frame_scopes() {
            Some((_, locals)) => Ok(self.ref_inc(locals)),
            None => self.raise(ErrorKind::Runtime, "no host frame is executing"),
        }
    }

    fn builtins(&self) -> RawRef {
        self.ref_inc(self.builtins_ref())
    }
}

impl MemoryHost {
    fn heap_payload(&self, obj: RawRef, take: bool) -> Option<Rc<dyn Any>> {
        self.peek_mut(obj, |kind| match kind {
            ObjKind::Instance(inst) if take => inst.payload.take(),
            ObjKind::Instance(inst) => inst.payload.clone(),
            _ => None,
        })
        .flatten()
    }
}
