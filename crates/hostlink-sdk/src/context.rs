//! HostApi trait: the capability surface of the host runtime
//!
//! Defines the interface a host runtime implements. The bridge programs
//! against this trait only; it never depends on how the host allocates,
//! collects, or interprets.
//!
//! # Reference conventions
//!
//! - Every method returning a `RawRef` returns a **new** reference that the
//!   caller must eventually release with [`HostApi::decref`].
//! - Every `RawRef` parameter is **borrowed**; the host acquires its own
//!   reference if it keeps the value.
//! - A method returning `Err(HostRaised)` has set the host error slot.

use std::any::Any;
use std::rc::Rc;

use crate::error::{ErrorKind, HostErrorRecord, HostResult};
use crate::raw::RawRef;
use crate::types::{EvalMode, MethodDef, TypeSpec};

/// Abstract host runtime.
///
/// All methods take `&self`: the host is single-threaded and reentrant calls
/// (a hook calling back into the host) are the normal case, so
/// implementations use interior mutability and must not hold borrows across
/// hook invocations.
pub trait HostApi {
    // ========================================================================
    // Reference Counting
    // ========================================================================

    /// Acquire one reference
    fn incref(&self, obj: RawRef);

    /// Release one reference; may deallocate the value
    fn decref(&self, obj: RawRef);

    /// Current reference count (instrumentation only)
    fn refcount(&self, obj: RawRef) -> isize;

    // ========================================================================
    // Boxing
    // ========================================================================

    /// The "no value" singleton
    fn none(&self) -> RawRef;

    /// Box a boolean. Cannot fail: booleans are singletons.
    fn new_bool(&self, value: bool) -> RawRef;

    /// Box an integer
    fn new_int(&self, value: i64) -> HostResult<RawRef>;

    /// Box a floating point number
    fn new_float(&self, value: f64) -> HostResult<RawRef>;

    /// Box text
    fn new_str(&self, value: &str) -> HostResult<RawRef>;

    // ========================================================================
    // Unboxing (host coercion rules apply)
    // ========================================================================

    /// Check for the "no value" singleton
    fn is_none(&self, obj: RawRef) -> bool;

    /// Truth value
    fn is_true(&self, obj: RawRef) -> HostResult<bool>;

    /// Integer value
    fn as_int(&self, obj: RawRef) -> HostResult<i64>;

    /// Floating point value
    fn as_float(&self, obj: RawRef) -> HostResult<f64>;

    /// Text value
    fn as_str(&self, obj: RawRef) -> HostResult<String>;

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Type object of a value
    fn type_of(&self, obj: RawRef) -> RawRef;

    /// Qualified type name of a value
    fn type_name(&self, obj: RawRef) -> String;

    /// Developer representation
    fn repr(&self, obj: RawRef) -> HostResult<String>;

    /// Display representation
    fn str(&self, obj: RawRef) -> HostResult<String>;

    /// Hash value
    fn hash(&self, obj: RawRef) -> HostResult<i64>;

    /// `obj` is an instance of `cls` or of one of its subtypes
    fn is_instance(&self, obj: RawRef, cls: RawRef) -> HostResult<bool>;

    /// `derived` is `cls` or one of its subtypes
    fn is_subclass(&self, derived: RawRef, cls: RawRef) -> HostResult<bool>;

    /// Supports being called
    fn is_callable(&self, obj: RawRef) -> bool;

    /// Supports key lookup
    fn check_mapping(&self, obj: RawRef) -> bool;

    /// Is a dict
    fn check_dict(&self, obj: RawRef) -> bool;

    /// Supports indexed access
    fn check_sequence(&self, obj: RawRef) -> bool;

    /// Is a list
    fn check_list(&self, obj: RawRef) -> bool;

    /// Is a tuple
    fn check_tuple(&self, obj: RawRef) -> bool;

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Get attribute by name
    fn get_attr(&self, obj: RawRef, name: &str) -> HostResult<RawRef>;

    /// Set attribute by name
    fn set_attr(&self, obj: RawRef, name: &str, value: RawRef) -> HostResult<()>;

    /// Check attribute presence; never raises
    fn has_attr(&self, obj: RawRef, name: &str) -> bool;

    /// Delete attribute by name
    fn del_attr(&self, obj: RawRef, name: &str) -> HostResult<()>;

    // ========================================================================
    // Calls
    // ========================================================================

    /// Call with a positional tuple and optional named-argument dict
    fn call(&self, callable: RawRef, args: RawRef, kwargs: Option<RawRef>) -> HostResult<RawRef>;

    /// Create a native function object. `module` is passed to the hook as its
    /// first argument.
    fn new_function(&self, def: MethodDef, module: Option<RawRef>) -> HostResult<RawRef>;

    // ========================================================================
    // Containers
    // ========================================================================

    /// New tuple holding the given items
    fn new_tuple(&self, items: &[RawRef]) -> HostResult<RawRef>;

    /// New list holding the given items
    fn new_list(&self, items: &[RawRef]) -> HostResult<RawRef>;

    /// New empty dict
    fn new_dict(&self) -> HostResult<RawRef>;

    /// Number of items
    fn len(&self, obj: RawRef) -> HostResult<usize>;

    /// Item lookup by key (mapping protocol)
    fn get_item(&self, obj: RawRef, key: RawRef) -> HostResult<RawRef>;

    /// Item store by key (mapping protocol)
    fn set_item(&self, obj: RawRef, key: RawRef, value: RawRef) -> HostResult<()>;

    /// Item removal by key (mapping protocol)
    fn del_item(&self, obj: RawRef, key: RawRef) -> HostResult<()>;

    /// Key membership (mapping protocol)
    fn contains(&self, obj: RawRef, key: RawRef) -> HostResult<bool>;

    /// Keys of a mapping, as a list in iteration order
    fn keys(&self, obj: RawRef) -> HostResult<RawRef>;

    /// Item lookup by index; negative indexes count from the end
    fn seq_get(&self, obj: RawRef, index: isize) -> HostResult<RawRef>;

    /// Item store by index
    fn seq_set(&self, obj: RawRef, index: isize, value: RawRef) -> HostResult<()>;

    /// Item removal by index
    fn seq_del(&self, obj: RawRef, index: isize) -> HostResult<()>;

    /// Append to a list
    fn list_append(&self, list: RawRef, value: RawRef) -> HostResult<()>;

    /// Insert into a list before `index`
    fn list_insert(&self, list: RawRef, index: isize, value: RawRef) -> HostResult<()>;

    /// Sort a list in place
    fn list_sort(&self, list: RawRef) -> HostResult<()>;

    /// Reverse a list in place
    fn list_reverse(&self, list: RawRef) -> HostResult<()>;

    /// Remove every item of a dict
    fn dict_clear(&self, dict: RawRef) -> HostResult<()>;

    // ========================================================================
    // Error State
    // ========================================================================

    /// Set the error slot
    fn set_error(&self, kind: ErrorKind, message: &str);

    /// Category of the pending error, if any
    fn error_occurred(&self) -> Option<ErrorKind>;

    /// Take the pending error out of the slot
    fn fetch_error(&self) -> Option<HostErrorRecord>;

    /// Discard the pending error
    fn clear_error(&self) {
        let _ = self.fetch_error();
    }

    // ========================================================================
    // Types and Instances
    // ========================================================================

    /// Validate and complete a type descriptor, returning the type object.
    /// On failure nothing of the descriptor remains visible.
    fn ready_type(&self, spec: TypeSpec) -> HostResult<RawRef>;

    /// Allocate an instance record of `ty` with an empty payload
    fn alloc_instance(&self, ty: RawRef) -> HostResult<RawRef>;

    /// Store the native payload of an instance record
    fn set_payload(&self, obj: RawRef, payload: Rc<dyn Any>) -> HostResult<()>;

    /// Shared access to the native payload
    fn payload(&self, obj: RawRef) -> Option<Rc<dyn Any>>;

    /// Remove the native payload from an instance record
    fn take_payload(&self, obj: RawRef) -> Option<Rc<dyn Any>>;

    /// Untrack and release an instance record whose count reached zero.
    /// Only a deallocation hook may call this.
    fn free_instance(&self, obj: RawRef);

    // ========================================================================
    // Modules
    // ========================================================================

    /// Create a module object (not yet importable)
    fn new_module(&self, name: &str, doc: Option<&str>) -> HostResult<RawRef>;

    /// Bind `value` under `name` in a module namespace
    fn module_add(&self, module: RawRef, name: &str, value: RawRef) -> HostResult<()>;

    /// Make a module importable under `name`
    fn register_module(&self, name: &str, module: RawRef) -> HostResult<()>;

    /// Report an unrecoverable initialization problem on the host's
    /// diagnostic channel
    fn fatal_error(&self, message: &str);

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Evaluate source text with the given global and local scopes
    fn eval(
        &self,
        source: &str,
        mode: EvalMode,
        globals: RawRef,
        locals: RawRef,
    ) -> HostResult<RawRef>;

    /// Globals of the innermost executing host frame
    fn current_globals(&self) -> HostResult<RawRef>;

    /// Locals of the innermost executing host frame
    fn current_locals(&self) -> HostResult<RawRef>;

    /// The builtins namespace
    fn builtins(&self) -> RawRef;
}
