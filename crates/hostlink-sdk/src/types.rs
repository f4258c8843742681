//! Type descriptors and hook signatures
//!
//! A bridge describes a new host type with a [`TypeSpec`] and hands it to
//! [`HostApi::ready_type`](crate::HostApi::ready_type). The hooks are plain
//! reference-counted closures following the host calling convention:
//!
//! - every `RawRef` argument is borrowed;
//! - a returned `RawRef` is a new reference, or `RawRef::NULL` with the host
//!   error slot set.

use std::fmt;
use std::rc::Rc;

use crate::raw::RawRef;

/// Call hook for methods and free functions: `(self_or_null, args_tuple)`.
///
/// For free functions the first argument is the module the function was
/// bound to (or null).
pub type CallHook = Rc<dyn Fn(RawRef, RawRef) -> RawRef>;

/// Construction hook: `(type, args_tuple, kwargs_dict_or_null)`
pub type NewHook = Rc<dyn Fn(RawRef, RawRef, RawRef) -> RawRef>;

/// Deallocation hook, invoked by the host when the last reference is
/// released. It must eventually call
/// [`HostApi::free_instance`](crate::HostApi::free_instance).
pub type DeallocHook = Rc<dyn Fn(RawRef)>;

/// GC traversal hook: report every host reference held by the instance
pub type TraverseHook = Rc<dyn Fn(RawRef, &mut dyn FnMut(RawRef))>;

/// Attribute getter hook
pub type GetterHook = Rc<dyn Fn(RawRef) -> RawRef>;

bitflags::bitflags! {
    /// Behaviour flags of a synthesized type
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeFlags: u32 {
        /// Ordinary type
        const DEFAULT = 1 << 0;
        /// Other types may extend this one
        const BASETYPE = 1 << 1;
        /// Instances participate in cycle collection
        const HAVE_GC = 1 << 2;
    }
}

impl Default for TypeFlags {
    fn default() -> Self {
        TypeFlags::DEFAULT
    }
}

/// One entry of a method or function table.
#[derive(Clone)]
pub struct MethodDef {
    /// Name as seen by host code
    pub name: String,
    /// Number of positional arguments accepted
    pub arity: usize,
    /// Documentation string
    pub doc: Option<String>,
    /// Dispatch hook
    pub call: CallHook,
}

impl MethodDef {
    /// Create a method entry
    pub fn new(name: impl Into<String>, arity: usize, call: CallHook) -> Self {
        Self {
            name: name.into(),
            arity,
            doc: None,
            call,
        }
    }

    /// Attach documentation
    pub fn with_doc(mut self, doc: Option<&str>) -> Self {
        self.doc = doc.map(str::to_string);
        self
    }
}

impl fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDef")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("doc", &self.doc)
            .finish_non_exhaustive()
    }
}

/// One entry of an attribute table. There is no setter: attributes
/// synthesized by the bridge are read-only.
#[derive(Clone)]
pub struct GetSetDef {
    /// Attribute name
    pub name: String,
    /// Documentation string
    pub doc: Option<String>,
    /// Getter hook
    pub get: GetterHook,
}

impl fmt::Debug for GetSetDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetSetDef")
            .field("name", &self.name)
            .field("doc", &self.doc)
            .finish_non_exhaustive()
    }
}

/// Complete description of a new host type.
#[derive(Clone, Default)]
pub struct TypeSpec {
    /// Qualified name (`module.Type`)
    pub name: String,
    /// Documentation string
    pub doc: Option<String>,
    /// Size hint for the native payload, in bytes
    pub basic_size: usize,
    /// Behaviour flags
    pub flags: TypeFlags,
    /// Construction hook; a type without one cannot be instantiated
    pub new: Option<NewHook>,
    /// Deallocation hook; the host frees the record itself when absent
    pub dealloc: Option<DeallocHook>,
    /// GC traversal hook
    pub traverse: Option<TraverseHook>,
    /// Method table
    pub methods: Vec<MethodDef>,
    /// Attribute table
    pub getset: Vec<GetSetDef>,
    /// Base type (borrowed; the host acquires its own reference)
    pub base: Option<RawRef>,
}

impl TypeSpec {
    /// Create an empty descriptor with the given qualified name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The unqualified part of the name
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

impl fmt::Debug for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeSpec")
            .field("name", &self.name)
            .field("basic_size", &self.basic_size)
            .field("flags", &self.flags)
            .field("has_new", &self.new.is_some())
            .field("has_dealloc", &self.dealloc.is_some())
            .field("has_traverse", &self.traverse.is_some())
            .field("methods", &self.methods)
            .field("getset", &self.getset)
            .field("base", &self.base)
            .finish()
    }
}

/// How [`HostApi::eval`](crate::HostApi::eval) treats its source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// A single expression; its value is returned
    Expression,
    /// A sequence of statements; the host "no value" is returned
    Statements,
}
