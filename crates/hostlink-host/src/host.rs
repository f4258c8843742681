//! MemoryHost: the in-memory reference host
//!
//! Objects live in a heap keyed by monotonically increasing ids; the id is
//! the `RawRef` address, so a stale reference is detected instead of
//! aliasing a newer value.
//!
//! # Borrow discipline
//!
//! The heap is a `RefCell`. No borrow is held while a hook, a payload
//! destructor, or any other method of the host runs: values are copied out
//! of the heap first, then acted upon.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use hostlink_sdk::{ErrorKind, HostApi, HostErrorRecord, HostRaised, HostResult, RawRef};
use rustc_hash::FxHashMap;

use crate::builtins;
use crate::config::HostConfig;
use crate::object::{BuiltinType, ObjKind, Object, TypeObject};

/// Entry point of a loadable module: returns the module (new reference),
/// or null with the error slot set.
pub type ModuleInit = extern "C" fn() -> RawRef;

/// Instrumentation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Successful reference acquisitions
    pub increfs: u64,
    /// Successful reference releases
    pub decrefs: u64,
    /// Objects created
    pub allocations: u64,
    /// Objects freed
    pub deallocations: u64,
}

/// Scopes of an executing evaluation; both references are owned
struct Frame {
    globals: RawRef,
    locals: RawRef,
}

/// Single-threaded host runtime with instrumented reference counts.
///
/// Create with [`MemoryHost::new`] and hand a clone of the `Rc` to the
/// bridge; every operation goes through [`HostApi`].
pub struct MemoryHost {
    config: HostConfig,
    heap: RefCell<FxHashMap<usize, Object>>,
    next_id: Cell<usize>,
    stats: Cell<HostStats>,
    error: RefCell<Option<HostErrorRecord>>,

    none: RawRef,
    true_: RawRef,
    false_: RawRef,
    builtins: RawRef,
    types: FxHashMap<BuiltinType, RawRef>,

    modules: RefCell<FxHashMap<String, RawRef>>,
    inittab: RefCell<FxHashMap<String, ModuleInit>>,
    frames: RefCell<Vec<Frame>>,
    diagnostics: RefCell<Vec<String>>,

    depth: Cell<usize>,
    pub(crate) repr_stack: RefCell<Vec<usize>>,
    allocs_since_collect: Cell<usize>,
    pub(crate) collecting: Cell<bool>,
}

impl MemoryHost {
    /// Create a host with the default configuration
    pub fn new() -> Rc<Self> {
        Self::with_config(HostConfig::default())
    }

    /// Create a host with the given configuration
    pub fn with_config(config: HostConfig) -> Rc<Self> {
        let mut host = Self {
            config,
            heap: RefCell::new(FxHashMap::default()),
            next_id: Cell::new(1),
            stats: Cell::new(HostStats::default()),
            error: RefCell::new(None),
            none: RawRef::NULL,
            true_: RawRef::NULL,
            false_: RawRef::NULL,
            builtins: RawRef::NULL,
            types: FxHashMap::default(),
            modules: RefCell::new(FxHashMap::default()),
            inittab: RefCell::new(FxHashMap::default()),
            frames: RefCell::new(Vec::new()),
            diagnostics: RefCell::new(Vec::new()),
            depth: Cell::new(0),
            repr_stack: RefCell::new(Vec::new()),
            allocs_since_collect: Cell::new(0),
            collecting: Cell::new(false),
        };
        host.bootstrap();
        tracing::debug!(objects = host.live_objects(), "host runtime ready");
        Rc::new(host)
    }

    fn bootstrap(&mut self) {
        self.none = self.alloc(ObjKind::None);
        self.false_ = self.alloc(ObjKind::Bool(false));
        self.true_ = self.alloc(ObjKind::Bool(true));

        let object = self.alloc(ObjKind::Type(TypeObject::builtin(BuiltinType::Object, None)));
        let mut types = FxHashMap::default();
        types.insert(BuiltinType::Object, object);
        for kind in BuiltinType::ALL {
            if matches!(kind, BuiltinType::Object | BuiltinType::Bool) {
                continue;
            }
            self.incref(object);
            let ty = self.alloc(ObjKind::Type(TypeObject::builtin(kind, Some(object))));
            types.insert(kind, ty);
        }
        let int = types[&BuiltinType::Int];
        self.incref(int);
        let mut bool_type = TypeObject::builtin(BuiltinType::Bool, Some(int));
        bool_type.flags.remove(hostlink_sdk::TypeFlags::BASETYPE);
        types.insert(BuiltinType::Bool, self.alloc(ObjKind::Type(bool_type)));
        self.types = types;

        self.builtins = self.alloc(ObjKind::Dict(Default::default()));
        if builtins::populate(self, self.builtins).is_err() {
            let message = self
                .error
                .borrow_mut()
                .take()
                .map(|record| record.to_string())
                .unwrap_or_default();
            self.fatal_error(&format!("failed to populate builtins: {message}"));
        }
    }

    // ========================================================================
    // Instrumentation
    // ========================================================================

    /// Configuration in effect
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Snapshot of the instrumentation counters
    pub fn stats(&self) -> HostStats {
        self.stats.get()
    }

    /// Number of objects currently alive, singletons and builtins included
    pub fn live_objects(&self) -> usize {
        self.heap.borrow().len()
    }

    /// Whether `obj` still refers to a live object
    pub fn is_alive(&self, obj: RawRef) -> bool {
        self.heap.borrow().contains_key(&obj.addr())
    }

    /// Messages reported on the fatal diagnostic channel, oldest first
    pub fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.borrow().clone()
    }

    fn bump(&self, f: impl FnOnce(&mut HostStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    // ========================================================================
    // Heap
    // ========================================================================

    pub(crate) fn alloc(&self, kind: ObjKind) -> RawRef {
        self.maybe_collect();
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.heap.borrow_mut().insert(id, Object::new(kind));
        self.bump(|s| s.allocations += 1);
        RawRef::from_addr(id)
    }

    fn maybe_collect(&self) {
        let threshold = self.config.gc_threshold;
        if threshold == 0 || self.builtins.is_null() || self.collecting.get() {
            return;
        }
        let count = self.allocs_since_collect.get() + 1;
        if count < threshold {
            self.allocs_since_collect.set(count);
            return;
        }
        self.allocs_since_collect.set(0);
        self.collect();
    }

    /// Run `f` on the kind of a live object
    pub(crate) fn with<R>(&self, obj: RawRef, f: impl FnOnce(&ObjKind) -> R) -> HostResult<R> {
        let result = self.heap.borrow().get(&obj.addr()).map(|o| f(&o.kind));
        match result {
            Some(value) => Ok(value),
            None => self.raise(ErrorKind::Runtime, format!("invalid reference {obj:?}")),
        }
    }

    /// Like [`MemoryHost::with`], without raising for a dead reference
    pub(crate) fn peek<R>(&self, obj: RawRef, f: impl FnOnce(&ObjKind) -> R) -> Option<R> {
        self.heap.borrow().get(&obj.addr()).map(|o| f(&o.kind))
    }

    pub(crate) fn peek_mut<R>(&self, obj: RawRef, f: impl FnOnce(&mut ObjKind) -> R) -> Option<R> {
        self.heap.borrow_mut().get_mut(&obj.addr()).map(|o| f(&mut o.kind))
    }

    /// Run `f` on the kind of a live object, mutably
    pub(crate) fn with_mut<R>(
        &self,
        obj: RawRef,
        f: impl FnOnce(&mut ObjKind) -> R,
    ) -> HostResult<R> {
        let result = self
            .heap
            .borrow_mut()
            .get_mut(&obj.addr())
            .map(|o| f(&mut o.kind));
        match result {
            Some(value) => Ok(value),
            None => self.raise(ErrorKind::Runtime, format!("invalid reference {obj:?}")),
        }
    }

    /// Builtin kind of a value; instances of synthesized types report
    /// `Object`, dead references `None`
    pub(crate) fn kind_of(&self, obj: RawRef) -> Option<BuiltinType> {
        self.heap
            .borrow()
            .get(&obj.addr())
            .map(|o| o.kind.builtin_type().unwrap_or(BuiltinType::Object))
    }

    /// Ids of every live object, in allocation order
    pub(crate) fn live_ids(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self.heap.borrow().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn ref_inc(&self, obj: RawRef) -> RawRef {
        self.incref(obj);
        obj
    }

    pub(crate) fn own(&self, obj: RawRef) -> Ref<'_> {
        Ref { host: self, raw: obj }
    }

    /// Release a value whose count reached zero
    fn deallocate(&self, obj: RawRef) {
        let instance_type = self
            .peek(obj, |kind| match kind {
                ObjKind::Instance(inst) => Some(inst.ty),
                _ => None,
            })
            .flatten();

        if let Some(ty) = instance_type {
            match self.find_in_chain(ty, |t| t.dealloc.clone()) {
                Some(hook) => hook(obj),
                None => self.release_instance(obj),
            }
            return;
        }

        let removed = self.heap.borrow_mut().remove(&obj.addr());
        if let Some(object) = removed {
            self.bump(|s| s.deallocations += 1);
            for child in object.kind.children() {
                self.decref(child);
            }
        }
    }

    pub(crate) fn release_instance(&self, obj: RawRef) {
        let removed = self.heap.borrow_mut().remove(&obj.addr());
        if let Some(object) = removed {
            self.bump(|s| s.deallocations += 1);
            let children = object.kind.children();
            drop(object);
            for child in children {
                self.decref(child);
            }
        }
    }

    pub(crate) fn refcount_misuse(&self, operation: &str, obj: RawRef) {
        if self.config.strict_refcounts {
            self.fatal_error(&format!("{operation} of dead reference {obj:?}"));
        }
    }

    pub(crate) fn incref_raw(&self, obj: RawRef) {
        let found = match self.heap.borrow_mut().get_mut(&obj.addr()) {
            Some(object) => {
                object.refcount += 1;
                true
            }
            None => false,
        };
        if found {
            self.bump(|s| s.increfs += 1);
        } else {
            self.refcount_misuse("incref", obj);
        }
    }

    pub(crate) fn decref_raw(&self, obj: RawRef) {
        let remaining = self.heap.borrow_mut().get_mut(&obj.addr()).map(|object| {
            object.refcount -= 1;
            object.refcount
        });
        match remaining {
            Some(count) => {
                self.bump(|s| s.decrefs += 1);
                if count == 0 {
                    self.deallocate(obj);
                }
            }
            None => self.refcount_misuse("decref", obj),
        }
    }

    pub(crate) fn refcount_raw(&self, obj: RawRef) -> isize {
        self.heap
            .borrow()
            .get(&obj.addr())
            .map_or(0, |object| object.refcount)
    }

    // ========================================================================
    // Singletons and types
    // ========================================================================

    pub(crate) fn none_ref(&self) -> RawRef {
        self.none
    }

    pub(crate) fn bool_ref(&self, value: bool) -> RawRef {
        if value {
            self.true_
        } else {
            self.false_
        }
    }

    pub(crate) fn builtins_ref(&self) -> RawRef {
        self.builtins
    }

    pub(crate) fn type_ref(&self, kind: BuiltinType) -> RawRef {
        self.types.get(&kind).copied().unwrap_or(RawRef::NULL)
    }

    /// Type object of a value (borrowed)
    pub(crate) fn type_of_raw(&self, obj: RawRef) -> RawRef {
        let kind = self.heap.borrow().get(&obj.addr()).map(|o| match &o.kind {
            ObjKind::Instance(inst) => Err(inst.ty),
            other => Ok(other.builtin_type().unwrap_or(BuiltinType::Object)),
        });
        match kind {
            Some(Err(ty)) => ty,
            Some(Ok(builtin)) => self.type_ref(builtin),
            None => self.type_ref(BuiltinType::Object),
        }
    }

    /// First value produced by `f` walking from `ty` through its bases
    pub(crate) fn find_in_chain<R>(
        &self,
        ty: RawRef,
        f: impl Fn(&TypeObject) -> Option<R>,
    ) -> Option<R> {
        let mut current = Some(ty);
        while let Some(ty) = current {
            let heap = self.heap.borrow();
            let ObjKind::Type(type_object) = &heap.get(&ty.addr())?.kind else {
                return None;
            };
            if let Some(found) = f(type_object) {
                return Some(found);
            }
            current = type_object.base;
        }
        None
    }

    pub(crate) fn type_full_name(&self, ty: RawRef) -> String {
        self.peek(ty, |kind| match kind {
            ObjKind::Type(t) => t.name.clone(),
            _ => String::from("?"),
        })
        .unwrap_or_else(|| String::from("?"))
    }

    /// Unqualified type name of a value, as used in error messages
    pub(crate) fn short_type_name(&self, obj: RawRef) -> String {
        let name = self.type_full_name(self.type_of_raw(obj));
        name.rsplit('.').next().unwrap_or(&name).to_string()
    }

    pub(crate) fn type_flags(&self, ty: RawRef) -> hostlink_sdk::TypeFlags {
        self.peek(ty, |kind| match kind {
            ObjKind::Type(t) => t.flags,
            _ => hostlink_sdk::TypeFlags::empty(),
        })
        .unwrap_or_else(hostlink_sdk::TypeFlags::empty)
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Set the error slot and fail
    pub(crate) fn raise<T>(&self, kind: ErrorKind, message: impl Into<String>) -> HostResult<T> {
        let message = message.into();
        tracing::trace!(%kind, %message, "host error raised");
        *self.error.borrow_mut() = Some(HostErrorRecord::new(kind, message));
        Err(HostRaised)
    }

    pub(crate) fn error_slot(&self) -> &RefCell<Option<HostErrorRecord>> {
        &self.error
    }

    /// Interpret the result of a hook following the host calling
    /// convention
    pub(crate) fn hook_result(&self, result: RawRef, what: &str) -> HostResult<RawRef> {
        let error_set = self.error.borrow().is_some();
        match (result.is_null(), error_set) {
            (false, false) => Ok(result),
            (false, true) => {
                self.decref(result);
                Err(HostRaised)
            }
            (true, true) => Err(HostRaised),
            (true, false) => self.raise(
                ErrorKind::Runtime,
                format!("{what} returned NULL without setting an error"),
            ),
        }
    }

    pub(crate) fn push_diagnostic(&self, message: &str) {
        tracing::warn!(%message, "fatal host diagnostic");
        self.diagnostics.borrow_mut().push(message.to_string());
    }

    // ========================================================================
    // Frames and recursion
    // ========================================================================

    pub(crate) fn enter_call(&self) -> HostResult<DepthGuard<'_>> {
        let depth = self.depth.get();
        if depth >= self.config.recursion_limit {
            return self.raise(ErrorKind::Runtime, "maximum recursion depth exceeded");
        }
        self.depth.set(depth + 1);
        Ok(DepthGuard { host: self })
    }

    pub(crate) fn push_frame(&self, globals: RawRef, locals: RawRef) -> FrameGuard<'_> {
        self.incref(globals);
        self.incref(locals);
        self.frames.borrow_mut().push(Frame { globals, locals });
        FrameGuard { host: self }
    }

    pub(crate) fn frame_scopes(&self) -> Option<(RawRef, RawRef)> {
        self.frames
            .borrow()
            .last()
            .map(|frame| (frame.globals, frame.locals))
    }

    // ========================================================================
    // Module table
    // ========================================================================

    /// Register a loadable entry point under `name` for [`MemoryHost::import`]
    pub fn append_inittab(&self, name: &str, init: ModuleInit) {
        self.inittab.borrow_mut().insert(name.to_string(), init);
    }

    /// Registered module by name (new reference)
    pub fn module(&self, name: &str) -> Option<RawRef> {
        let found = self.modules.borrow().get(name).copied();
        found.map(|module| self.ref_inc(module))
    }

    /// Names of every registered module, sorted
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Import a module: an already registered module is returned as is;
    /// otherwise its entry point is run and the result registered.
    pub fn import(&self, name: &str) -> HostResult<RawRef> {
        if let Some(module) = self.module(name) {
            return Ok(module);
        }
        let init = self.inittab.borrow().get(name).copied();
        let Some(init) = init else {
            return self.raise(ErrorKind::Import, format!("No module named '{name}'"));
        };

        tracing::debug!(module = name, "running module entry point");
        let module = init();
        if module.is_null() {
            if self.error.borrow().is_none() {
                return self.raise(
                    ErrorKind::Import,
                    format!("initialization of '{name}' failed without raising an exception"),
                );
            }
            return Err(HostRaised);
        }
        if !self.modules.borrow().contains_key(name) {
            if let Err(raised) = self.register_module(name, module) {
                self.decref(module);
                return Err(raised);
            }
        }
        Ok(module)
    }

    pub(crate) fn insert_module(&self, name: &str, module: RawRef) {
        self.incref(module);
        let replaced = self.modules.borrow_mut().insert(name.to_string(), module);
        if let Some(old) = replaced {
            self.decref(old);
        }
        tracing::debug!(module = name, "module registered");
    }

    /// A fresh globals dict for evaluating top-level code: `__name__` is
    /// `"__main__"` and `__builtins__` the builtins namespace.
    pub fn new_globals(&self) -> HostResult<RawRef> {
        let globals = self.own(self.alloc(ObjKind::Dict(Default::default())));
        let name = self.own(self.new_str("__main__")?);
        self.dict_set_str(globals.raw(), "__name__", name.raw())?;
        self.dict_set_str(globals.raw(), "__builtins__", self.builtins)?;
        Ok(globals.into_raw())
    }
}

impl Drop for MemoryHost {
    fn drop(&mut self) {
        let leaked = self
            .heap
            .get_mut()
            .values()
            .filter(|o| matches!(o.kind, ObjKind::Instance(_)))
            .count();
        if leaked > 0 {
            tracing::debug!(instances = leaked, "host torn down with live instances");
        }
    }
}

/// Owned reference released on drop
pub(crate) struct Ref<'h> {
    host: &'h MemoryHost,
    raw: RawRef,
}

impl Ref<'_> {
    pub(crate) fn raw(&self) -> RawRef {
        self.raw
    }

    /// Hand the reference over to the caller
    pub(crate) fn into_raw(self) -> RawRef {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }
}

impl Drop for Ref<'_> {
    fn drop(&mut self) {
        self.host.decref(self.raw);
    }
}

pub(crate) struct DepthGuard<'h> {
    host: &'h MemoryHost,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.host.depth.set(self.host.depth.get().saturating_sub(1));
    }
}

pub(crate) struct FrameGuard<'h> {
    host: &'h MemoryHost,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        let frame = self.host.frames.borrow_mut().pop();
        if let Some(frame) = frame {
            self.host.decref(frame.globals);
            self.host.decref(frame.locals);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_types() {
        let host = MemoryHost::new();
        let object = host.type_ref(BuiltinType::Object);
        for kind in BuiltinType::ALL {
            let ty = host.type_ref(kind);
            assert!(host.is_alive(ty), "{kind:?} missing");
            assert!(host.is_subclass(ty, object).unwrap());
        }
        let int = host.type_ref(BuiltinType::Int);
        assert!(host.is_subclass(host.type_ref(BuiltinType::Bool), int).unwrap());
        assert!(host.diagnostics().is_empty());
    }

    #[test]
    fn test_stale_reference_is_reported() {
        let host = MemoryHost::new();
        let value = host.new_int(7).unwrap();
        host.decref(value);
        assert!(!host.is_alive(value));
        host.decref(value);
        assert_eq!(host.diagnostics().len(), 1);
        assert!(host.diagnostics()[0].contains("decref of dead reference"));
    }

    #[test]
    fn test_lenient_refcounts() {
        let host = MemoryHost::with_config(HostConfig {
            strict_refcounts: false,
            ..HostConfig::default()
        });
        let value = host.new_int(7).unwrap();
        host.decref(value);
        host.decref(value);
        assert!(host.diagnostics().is_empty());
    }

    #[test]
    fn test_recursion_limit() {
        let host = MemoryHost::with_config(HostConfig {
            recursion_limit: 2,
            ..HostConfig::default()
        });
        let first = host.enter_call().unwrap();
        let _second = host.enter_call().unwrap();
        assert!(host.enter_call().is_err());
        assert_eq!(
            host.fetch_error().unwrap().message,
            "maximum recursion depth exceeded"
        );
        drop(first);
        assert!(host.enter_call().is_ok());
    }

    #[test]
    fn test_import_unknown_module() {
        let host = MemoryHost::new();
        assert!(host.import("nowhere").is_err());
        let record = host.fetch_error().unwrap();
        assert_eq!(record.kind, ErrorKind::Import);
        assert_eq!(record.message, "No module named 'nowhere'");
    }
}
