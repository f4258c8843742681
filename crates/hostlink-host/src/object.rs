//! Object model of the reference host
//!
//! Every value lives in the heap as an [`Object`]: a reference count plus an
//! [`ObjKind`]. Container kinds store the `RawRef`s of their items; each
//! stored `RawRef` owns one reference that is released when the container
//! is cleared or freed.

use std::any::Any;
use std::rc::Rc;

use hostlink_sdk::{
    DeallocHook, GetSetDef, MethodDef, NewHook, RawRef, TraverseHook, TypeFlags,
};

use crate::eval::ast::Expr;

/// Builtin types known to the host at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinType {
    Object,
    Type,
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    Tuple,
    List,
    Dict,
    Function,
    Lambda,
    Module,
    Method,
}

impl BuiltinType {
    pub const ALL: [BuiltinType; 14] = [
        BuiltinType::Object,
        BuiltinType::Type,
        BuiltinType::NoneType,
        BuiltinType::Bool,
        BuiltinType::Int,
        BuiltinType::Float,
        BuiltinType::Str,
        BuiltinType::Tuple,
        BuiltinType::List,
        BuiltinType::Dict,
        BuiltinType::Function,
        BuiltinType::Lambda,
        BuiltinType::Module,
        BuiltinType::Method,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            BuiltinType::Object => "object",
            BuiltinType::Type => "type",
            BuiltinType::NoneType => "NoneType",
            BuiltinType::Bool => "bool",
            BuiltinType::Int => "int",
            BuiltinType::Float => "float",
            BuiltinType::Str => "str",
            BuiltinType::Tuple => "tuple",
            BuiltinType::List => "list",
            BuiltinType::Dict => "dict",
            BuiltinType::Function => "builtin_function_or_method",
            BuiltinType::Lambda => "function",
            BuiltinType::Module => "module",
            BuiltinType::Method => "method",
        }
    }
}

/// Functions available in the builtins namespace that are not types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFunction {
    Len,
    Repr,
    Abs,
    IsInstance,
    Callable,
    Hash,
}

impl BuiltinFunction {
    pub const ALL: [BuiltinFunction; 6] = [
        BuiltinFunction::Len,
        BuiltinFunction::Repr,
        BuiltinFunction::Abs,
        BuiltinFunction::IsInstance,
        BuiltinFunction::Callable,
        BuiltinFunction::Hash,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            BuiltinFunction::Len => "len",
            BuiltinFunction::Repr => "repr",
            BuiltinFunction::Abs => "abs",
            BuiltinFunction::IsInstance => "isinstance",
            BuiltinFunction::Callable => "callable",
            BuiltinFunction::Hash => "hash",
        }
    }
}

/// Type object
pub struct TypeObject {
    pub name: String,
    pub doc: Option<String>,
    pub basic_size: usize,
    pub flags: TypeFlags,
    /// Owned reference
    pub base: Option<RawRef>,
    pub builtin: Option<BuiltinType>,
    pub new: Option<NewHook>,
    pub dealloc: Option<DeallocHook>,
    pub traverse: Option<TraverseHook>,
    pub methods: Vec<MethodDef>,
    pub getset: Vec<GetSetDef>,
}

impl TypeObject {
    pub fn builtin(kind: BuiltinType, base: Option<RawRef>) -> Self {
        Self {
            name: kind.name().to_string(),
            doc: None,
            basic_size: 0,
            flags: TypeFlags::DEFAULT | TypeFlags::BASETYPE,
            base,
            builtin: Some(kind),
            new: None,
            dealloc: None,
            traverse: None,
            methods: Vec::new(),
            getset: Vec::new(),
        }
    }

    /// Short name, as used in error messages
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// Instance record of a synthesized type
pub struct InstanceData {
    /// Owned reference to the instance type
    pub ty: RawRef,
    pub payload: Option<Rc<dyn Any>>,
}

/// Native function object, optionally bound to a receiver
pub struct FunctionData {
    pub def: MethodDef,
    /// Owned reference
    pub bound: Option<RawRef>,
}

/// Function created by a `lambda` expression
pub struct LambdaData {
    pub params: Vec<String>,
    pub body: Rc<Expr>,
    /// Owned reference
    pub globals: RawRef,
}

/// Module object
pub struct ModuleData {
    pub name: String,
    /// Owned reference to the namespace dict
    pub dict: RawRef,
}

/// Method of a builtin container, bound to its receiver (`d.update`)
pub struct BuiltinMethodData {
    /// Owned reference
    pub receiver: RawRef,
    pub name: &'static str,
}

/// Dict storage: insertion-ordered entries
#[derive(Default)]
pub struct DictData {
    pub entries: Vec<DictEntry>,
}

pub struct DictEntry {
    pub hash_key: HashKey,
    /// Owned reference
    pub key: RawRef,
    /// Owned reference
    pub value: RawRef,
}

impl DictData {
    pub fn position(&self, key: &HashKey) -> Option<usize> {
        self.entries.iter().position(|entry| &entry.hash_key == key)
    }
}

/// Comparable identity of a hashable value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Ident(usize),
}

pub enum ObjKind {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Tuple(Vec<RawRef>),
    List(Vec<RawRef>),
    Dict(DictData),
    Type(TypeObject),
    Instance(InstanceData),
    Function(FunctionData),
    Builtin(BuiltinFunction),
    Lambda(LambdaData),
    Module(ModuleData),
    BuiltinMethod(BuiltinMethodData),
}

impl ObjKind {
    /// Builtin type of a non-instance, non-type value
    pub fn builtin_type(&self) -> Option<BuiltinType> {
        Some(match self {
            ObjKind::None => BuiltinType::NoneType,
            ObjKind::Bool(_) => BuiltinType::Bool,
            ObjKind::Int(_) => BuiltinType::Int,
            ObjKind::Float(_) => BuiltinType::Float,
            ObjKind::Str(_) => BuiltinType::Str,
            ObjKind::Tuple(_) => BuiltinType::Tuple,
            ObjKind::List(_) => BuiltinType::List,
            ObjKind::Dict(_) => BuiltinType::Dict,
            ObjKind::Type(_) => BuiltinType::Type,
            ObjKind::Function(_) | ObjKind::Builtin(_) => BuiltinType::Function,
            ObjKind::Lambda(_) => BuiltinType::Lambda,
            ObjKind::Module(_) => BuiltinType::Module,
            ObjKind::BuiltinMethod(_) => BuiltinType::Method,
            ObjKind::Instance(_) => return None,
        })
    }

    /// References owned by this value, excluding instance payloads
    pub fn children(&self) -> Vec<RawRef> {
        match self {
            ObjKind::Tuple(items) | ObjKind::List(items) => items.clone(),
            ObjKind::Dict(dict) => dict
                .entries
                .iter()
                .flat_map(|entry| [entry.key, entry.value])
                .collect(),
            ObjKind::Type(ty) => ty.base.into_iter().collect(),
            ObjKind::Instance(inst) => vec![inst.ty],
            ObjKind::Function(func) => func.bound.into_iter().collect(),
            ObjKind::Lambda(lambda) => vec![lambda.globals],
            ObjKind::Module(module) => vec![module.dict],
            ObjKind::BuiltinMethod(method) => vec![method.receiver],
            _ => Vec::new(),
        }
    }

    /// Whether the cycle collector tracks values of this kind.
    /// Instances are tracked only when their type has the GC flag.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            ObjKind::Tuple(_)
                | ObjKind::List(_)
                | ObjKind::Dict(_)
                | ObjKind::Function(_)
                | ObjKind::Lambda(_)
                | ObjKind::Module(_)
                | ObjKind::BuiltinMethod(_)
        )
    }
}

/// Heap slot
pub struct Object {
    pub refcount: isize,
    pub kind: ObjKind,
}

impl Object {
    pub fn new(kind: ObjKind) -> Self {
        Self { refcount: 1, kind }
    }
}
