//! Type synthesizer
//!
//! Builds a host type for a native class at module-initialization time.
//!
//! ```text
//! ClassBuilder<Cls>        Building → Registering   (method/member/traverse/extends)
//!      │ finalize()
//!      ▼
//! SynthesizedType<Cls>     Finalized                (immutable)
//!      │ ModuleBuilder::add_type + publish()
//!      ▼
//!                          Published
//! ```
//!
//! The native instance lives in the host instance record as an
//! `Rc<RefCell<Cls>>` payload. Every method call borrows it mutably for the
//! duration of the call, so a reentrant call on the same instance fails
//! with a runtime error instead of aliasing.
//!
//! # Example
//!
//! ```ignore
//! let model = ClassBuilder::new(m, "Model", |config: &Config| {
//!     Ok::<_, BridgeError>(Model { dt: config.get_or("dt", 0.1)?, steps: 0 })
//! })
//! .method("step", |model: &mut Model| model.step())
//! .member("steps", |model: &Model| &model.steps)
//! .finalize()?;
//! m.add_type(&model);
//! ```

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use hostlink_sdk::{
    CallHook, DeallocHook, GetSetDef, GetterHook, HostApi, MethodDef, NewHook, RawRef,
    TraverseHook, TypeFlags, TypeSpec,
};

use crate::boundary;
use crate::convert::ToHost;
use crate::dispatch::{unpack_args, NativeMethod};
use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;
use crate::interp;
use crate::registry::ModuleBuilder;
use crate::views::{Config, DefaultsPolicy, Dict, Mapping};

/// Lifecycle of a synthesized type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeState {
    /// Builder created, nothing registered yet
    Building,
    /// Methods, members or a base have been registered
    Registering,
    /// Accepted by the host; immutable
    Finalized,
    /// Visible through a published module
    Published,
}

/// Per-class binding settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingOptions {
    /// What `Config::get_or` does with defaults in the constructor
    pub defaults_policy: DefaultsPolicy,
    /// Convert panics in native code into host errors
    pub catch_panics: bool,
}

impl Default for BindingOptions {
    fn default() -> Self {
        BindingOptions {
            defaults_policy: DefaultsPolicy::ReadOnly,
            catch_panics: true,
        }
    }
}

/// Projection from a derived native class to its base
pub trait Extends<Base> {
    /// Shared access to the base part
    fn base(&self) -> &Base;
    /// Exclusive access to the base part
    fn base_mut(&mut self) -> &mut Base;
}

/// Reports host references held by a native instance to the collector
pub struct Visit<'a> {
    visit: &'a mut dyn FnMut(RawRef),
}

impl Visit<'_> {
    /// Report one handle
    pub fn handle(&mut self, handle: &Handle) {
        (self.visit)(handle.as_raw());
    }

    /// Report a handle if present
    pub fn optional(&mut self, handle: Option<&Handle>) {
        if let Some(handle) = handle {
            self.handle(handle);
        }
    }
}

type MethodFn<Cls> = Rc<dyn Fn(&mut Cls, &[Handle]) -> BridgeResult<Handle>>;
type GetterFn<Cls> = Rc<dyn Fn(&Cls) -> BridgeResult<Handle>>;
type TraverseFn<Cls> = Rc<dyn Fn(&Cls, &mut Visit<'_>)>;
type Constructor<Cls> = Rc<dyn Fn(&Config) -> BridgeResult<Cls>>;

struct MethodEntry<Cls> {
    name: String,
    arity: usize,
    doc: Option<String>,
    call: MethodFn<Cls>,
}

struct MemberEntry<Cls> {
    name: String,
    doc: Option<String>,
    get: GetterFn<Cls>,
}

/// Everything a class exposes, in registration order
struct Members<Cls> {
    methods: Vec<MethodEntry<Cls>>,
    members: Vec<MemberEntry<Cls>>,
    traversals: Vec<TraverseFn<Cls>>,
}

impl<Cls> Default for Members<Cls> {
    fn default() -> Self {
        Members {
            methods: Vec::new(),
            members: Vec::new(),
            traversals: Vec::new(),
        }
    }
}

impl<Cls: 'static> Members<Cls> {
    /// Own entries plus the inherited ones they do not override
    fn merged(own: &Members<Cls>, inherited: &Members<Cls>) -> Members<Cls> {
        let mut merged = Members::default();
        for entry in own.methods.iter().chain(
            inherited
                .methods
                .iter()
                .filter(|m| !own.methods.iter().any(|o| o.name == m.name)),
        ) {
            merged.methods.push(MethodEntry {
                name: entry.name.clone(),
                arity: entry.arity,
                doc: entry.doc.clone(),
                call: entry.call.clone(),
            });
        }
        for entry in own.members.iter().chain(
            inherited
                .members
                .iter()
                .filter(|m| !own.members.iter().any(|o| o.name == m.name)),
        ) {
            merged.members.push(MemberEntry {
                name: entry.name.clone(),
                doc: entry.doc.clone(),
                get: entry.get.clone(),
            });
        }
        merged.traversals = inherited
            .traversals
            .iter()
            .chain(&own.traversals)
            .cloned()
            .collect();
        merged
    }

    /// Rebind every entry to a derived class through [`Extends`]
    fn project<Derived: Extends<Cls> + 'static>(&self) -> Members<Derived> {
        let methods = self
            .methods
            .iter()
            .map(|entry| {
                let call = entry.call.clone();
                MethodEntry {
                    name: entry.name.clone(),
                    arity: entry.arity,
                    doc: entry.doc.clone(),
                    call: Rc::new(move |this: &mut Derived, args: &[Handle]| {
                        call(this.base_mut(), args)
                    }) as MethodFn<Derived>,
                }
            })
            .collect();
        let members = self
            .members
            .iter()
            .map(|entry| {
                let get = entry.get.clone();
                MemberEntry {
                    name: entry.name.clone(),
                    doc: entry.doc.clone(),
                    get: Rc::new(move |this: &Derived| get(this.base())) as GetterFn<Derived>,
                }
            })
            .collect();
        let traversals = self
            .traversals
            .iter()
            .map(|traverse| {
                let traverse = traverse.clone();
                Rc::new(move |this: &Derived, visit: &mut Visit<'_>| traverse(this.base(), visit))
                    as TraverseFn<Derived>
            })
            .collect();
        Members {
            methods,
            members,
            traversals,
        }
    }
}

// ============================================================================
// ClassBuilder
// ============================================================================

/// Describes a native class before it is handed to the host
pub struct ClassBuilder<Cls: 'static> {
    qualified_name: String,
    doc: Option<String>,
    ctor: Constructor<Cls>,
    own: Members<Cls>,
    inherited: Members<Cls>,
    base: Option<Handle>,
    options: BindingOptions,
    state: TypeState,
}

impl<Cls: 'static> ClassBuilder<Cls> {
    /// Start describing `Cls`, exposed as `<module>.<name>` and built from
    /// the constructor's mapping by `ctor`
    pub fn new<F, E>(module: &ModuleBuilder, name: &str, ctor: F) -> Self
    where
        F: Fn(&Config) -> Result<Cls, E> + 'static,
        E: Into<BridgeError>,
    {
        ClassBuilder {
            qualified_name: format!("{}.{}", module.name(), name),
            doc: None,
            ctor: Rc::new(move |config: &Config| ctor(config).map_err(Into::into)),
            own: Members::default(),
            inherited: Members::default(),
            base: None,
            options: module.options(),
            state: TypeState::Building,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> TypeState {
        self.state
    }

    /// Set the docstring
    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = Some(doc.to_string());
        self
    }

    /// Override the binding options inherited from the module
    pub fn options(mut self, options: BindingOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a method of arity 0 to 4
    pub fn method<F, Args>(self, name: &str, f: F) -> Self
    where
        F: NativeMethod<Cls, Args>,
    {
        self.method_entry(name, None, f)
    }

    /// Register a documented method
    pub fn method_with_doc<F, Args>(self, name: &str, doc: &str, f: F) -> Self
    where
        F: NativeMethod<Cls, Args>,
    {
        self.method_entry(name, Some(doc), f)
    }

    fn method_entry<F, Args>(mut self, name: &str, doc: Option<&str>, f: F) -> Self
    where
        F: NativeMethod<Cls, Args>,
    {
        self.own.methods.push(MethodEntry {
            name: name.to_string(),
            arity: F::ARITY,
            doc: doc.map(str::to_string),
            call: Rc::new(move |this: &mut Cls, args: &[Handle]| f.invoke(this, args)),
        });
        self.state = TypeState::Registering;
        self
    }

    /// Expose a plain field as a read-only attribute; the value is
    /// converted on every access
    pub fn member<T, F>(mut self, name: &str, get: F) -> Self
    where
        T: ToHost + ?Sized,
        F: Fn(&Cls) -> &T + 'static,
    {
        self.own.members.push(MemberEntry {
            name: name.to_string(),
            doc: None,
            get: Rc::new(move |this: &Cls| get(this).to_host()),
        });
        self.state = TypeState::Registering;
        self
    }

    /// Expose a held host value as a read-only attribute and report it to
    /// the collector
    pub fn handle_member<F>(mut self, name: &str, get: F) -> Self
    where
        F: Fn(&Cls) -> &Handle + 'static,
    {
        let get = Rc::new(get);
        let getter = get.clone();
        self.own.members.push(MemberEntry {
            name: name.to_string(),
            doc: None,
            get: Rc::new(move |this: &Cls| Ok(getter(this).clone())),
        });
        self.own
            .traversals
            .push(Rc::new(move |this: &Cls, visit: &mut Visit<'_>| visit.handle(get(this))));
        self.state = TypeState::Registering;
        self
    }

    /// Report a held host value to the collector without exposing it
    pub fn hidden_handle_member<F>(mut self, get: F) -> Self
    where
        F: Fn(&Cls) -> &Handle + 'static,
    {
        self.own
            .traversals
            .push(Rc::new(move |this: &Cls, visit: &mut Visit<'_>| visit.handle(get(this))));
        self.state = TypeState::Registering;
        self
    }

    /// Custom traversal for host values the class holds in other shapes
    /// (optional members, collections)
    pub fn traverse<F>(mut self, f: F) -> Self
    where
        F: Fn(&Cls, &mut Visit<'_>) + 'static,
    {
        self.own.traversals.push(Rc::new(f));
        self.state = TypeState::Registering;
        self
    }

    /// Inherit the methods, members and traversal of `base`, and make it the
    /// host-level base type. Methods and members registered on this
    /// builder override inherited ones of the same name.
    pub fn extends<Base: 'static>(mut self, base: &SynthesizedType<Base>) -> Self
    where
        Cls: Extends<Base>,
    {
        self.inherited = base.members.project::<Cls>();
        self.base = Some(base.type_object.clone());
        self.state = TypeState::Registering;
        self
    }

    /// Hand the completed descriptor to the host. If the host rejects it,
    /// nothing is created.
    pub fn finalize(self) -> BridgeResult<SynthesizedType<Cls>> {
        let host = interp::host()?;
        let members = Members::merged(&self.own, &self.inherited);
        let short_name: Rc<str> = Rc::from(
            self.qualified_name
                .rsplit('.')
                .next()
                .unwrap_or(&self.qualified_name),
        );
        let catch_panics = self.options.catch_panics;

        let mut spec = TypeSpec::new(self.qualified_name.clone());
        spec.doc = self.doc.clone();
        spec.basic_size = std::mem::size_of::<Cls>();
        spec.flags = TypeFlags::DEFAULT | TypeFlags::BASETYPE;
        spec.base = self.base.as_ref().map(Handle::as_raw);
        spec.methods = members
            .methods
            .iter()
            .map(|entry| {
                MethodDef::new(
                    entry.name.clone(),
                    entry.arity,
                    method_hook(&short_name, entry, catch_panics),
                )
                .with_doc(entry.doc.as_deref())
            })
            .collect();
        spec.getset = members
            .members
            .iter()
            .map(|entry| GetSetDef {
                name: entry.name.clone(),
                doc: entry.doc.clone(),
                get: getter_hook(&short_name, entry, catch_panics),
            })
            .collect();
        if !members.traversals.is_empty() {
            spec.flags |= TypeFlags::HAVE_GC;
            spec.traverse = Some(traverse_hook(members.traversals.clone()));
        }
        spec.new = Some(new_hook(
            &short_name,
            self.ctor.clone(),
            self.options,
        ));
        spec.dealloc = Some(dealloc_hook::<Cls>(&short_name));

        let type_object = Handle::from_owned(host.ready_type(spec)?)?;
        tracing::debug!(
            ty = %self.qualified_name,
            methods = members.methods.len(),
            members = members.members.len(),
            gc = !members.traversals.is_empty(),
            "finalized native type"
        );

        Ok(SynthesizedType {
            type_object,
            name: short_name.to_string(),
            qualified_name: self.qualified_name,
            members,
            state: Rc::new(Cell::new(TypeState::Finalized)),
        })
    }
}

impl<Cls: 'static> fmt::Debug for ClassBuilder<Cls> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassBuilder")
            .field("name", &self.qualified_name)
            .field("state", &self.state)
            .field("methods", &self.own.methods.len())
            .field("members", &self.own.members.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SynthesizedType
// ============================================================================

/// A native class the host has accepted as a type
pub struct SynthesizedType<Cls: 'static> {
    type_object: Handle,
    name: String,
    qualified_name: String,
    members: Members<Cls>,
    state: Rc<Cell<TypeState>>,
}

impl<Cls: 'static> SynthesizedType<Cls> {
    /// The host type object
    pub fn type_object(&self) -> &Handle {
        &self.type_object
    }

    /// Unqualified name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `module.Name`
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Current lifecycle state
    pub fn state(&self) -> TypeState {
        self.state.get()
    }

    pub(crate) fn state_cell(&self) -> Rc<Cell<TypeState>> {
        self.state.clone()
    }

    /// Construct an instance from a config mapping
    pub fn create(&self, config: &Mapping) -> BridgeResult<Handle> {
        self.type_object.call1(config.as_handle())
    }

    /// Shared access to the native instance behind `obj`
    pub fn with_instance<R>(&self, obj: &Handle, f: impl FnOnce(&Cls) -> R) -> BridgeResult<R> {
        let host = interp::host()?;
        let cell = instance_cell::<Cls>(host.as_ref(), obj.as_raw(), &self.name)?;
        let native = cell.try_borrow().map_err(|_| reentrant(&self.name))?;
        let result = f(&*native);
        Ok(result)
    }

    /// Exclusive access to the native instance behind `obj`
    pub fn with_instance_mut<R>(
        &self,
        obj: &Handle,
        f: impl FnOnce(&mut Cls) -> R,
    ) -> BridgeResult<R> {
        let host = interp::host()?;
        let cell = instance_cell::<Cls>(host.as_ref(), obj.as_raw(), &self.name)?;
        let mut native = cell.try_borrow_mut().map_err(|_| reentrant(&self.name))?;
        let result = f(&mut *native);
        Ok(result)
    }
}

impl<Cls: 'static> fmt::Debug for SynthesizedType<Cls> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesizedType")
            .field("name", &self.qualified_name)
            .field("type_object", &self.type_object)
            .field("state", &self.state.get())
            .finish()
    }
}

// ============================================================================
// Host hooks
// ============================================================================

fn reentrant(type_name: &str) -> BridgeError {
    BridgeError::runtime(format!(
        "'{type_name}' instance is already in use by another call"
    ))
}

fn instance_cell<Cls: 'static>(
    host: &dyn HostApi,
    obj: RawRef,
    type_name: &str,
) -> BridgeResult<Rc<RefCell<Cls>>> {
    host.payload(obj)
        .and_then(|payload| payload.downcast::<RefCell<Cls>>().ok())
        .ok_or_else(|| {
            BridgeError::type_error(format!("descriptor requires a '{type_name}' object"))
        })
}

fn method_hook<Cls: 'static>(
    type_name: &Rc<str>,
    entry: &MethodEntry<Cls>,
    catch_panics: bool,
) -> CallHook {
    let type_name = type_name.clone();
    let name = entry.name.clone();
    let arity = entry.arity;
    let call = entry.call.clone();
    Rc::new(move |this: RawRef, args: RawRef| {
        boundary::guard(catch_panics, || {
            let host = interp::host()?;
            let args = unpack_args(host.as_ref(), &name, arity, args)?;
            let cell = instance_cell::<Cls>(host.as_ref(), this, &type_name)?;
            let mut native = cell.try_borrow_mut().map_err(|_| reentrant(&type_name))?;
            let result = call(&mut *native, &args)?;
            Ok(result.into_raw())
        })
    })
}

fn getter_hook<Cls: 'static>(
    type_name: &Rc<str>,
    entry: &MemberEntry<Cls>,
    catch_panics: bool,
) -> GetterHook {
    let type_name = type_name.clone();
    let get = entry.get.clone();
    Rc::new(move |this: RawRef| {
        boundary::guard(catch_panics, || {
            let host = interp::host()?;
            let cell = instance_cell::<Cls>(host.as_ref(), this, &type_name)?;
            let native = cell.try_borrow().map_err(|_| reentrant(&type_name))?;
            let value = get(&*native)?;
            Ok(value.into_raw())
        })
    })
}

fn traverse_hook<Cls: 'static>(traversals: Vec<TraverseFn<Cls>>) -> TraverseHook {
    Rc::new(move |this: RawRef, visit: &mut dyn FnMut(RawRef)| {
        let Some(host) = interp::active() else {
            return;
        };
        let Some(cell) = host
            .payload(this)
            .and_then(|payload| payload.downcast::<RefCell<Cls>>().ok())
        else {
            return;
        };
        // An instance busy in a method reports nothing and so stays alive
        let Ok(native) = cell.try_borrow() else {
            return;
        };
        let mut visitor = Visit { visit };
        for traverse in &traversals {
            traverse(&*native, &mut visitor);
        }
    })
}

/// Pick the mapping a constructor receives: at most one positional
/// mapping, merged with the named arguments
fn construction_config(
    host: &dyn HostApi,
    type_name: &str,
    args: RawRef,
    kwargs: RawRef,
    policy: DefaultsPolicy,
) -> BridgeResult<Config> {
    let given = host.len(args)?;
    if given > 1 {
        return Err(BridgeError::type_error(format!(
            "{type_name}() takes at most 1 positional argument ({given} given)"
        )));
    }

    let named = match kwargs.non_null() {
        Some(raw) => {
            let named = Dict::new(Handle::from_borrowed(raw)?)?;
            if named.is_empty()? {
                None
            } else {
                Some(named)
            }
        }
        None => None,
    };

    let mapping = if given == 1 {
        let positional = Handle::from_owned(host.seq_get(args, 0)?)?;
        if !host.check_mapping(positional.as_raw()) {
            return Err(BridgeError::type_error(format!(
                "{type_name}() argument must be a mapping, not '{}'",
                positional.type_name()?
            )));
        }
        let mapping = Mapping::new(positional)?;
        if let Some(named) = &named {
            mapping.call_method("update", (named.as_handle(),))?;
        }
        mapping
    } else if let Some(named) = named {
        named.into_mapping()
    } else {
        Dict::empty()?.into_mapping()
    };

    Ok(Config::new(mapping, policy))
}

fn new_hook<Cls: 'static>(
    type_name: &Rc<str>,
    ctor: Constructor<Cls>,
    options: BindingOptions,
) -> NewHook {
    let type_name = type_name.clone();
    Rc::new(move |ty: RawRef, args: RawRef, kwargs: RawRef| {
        boundary::guard(options.catch_panics, || {
            let host = interp::host()?;
            let config = construction_config(
                host.as_ref(),
                &type_name,
                args,
                kwargs,
                options.defaults_policy,
            )?;
            // Released through the dealloc hook if the constructor fails
            let instance = Handle::from_owned(host.alloc_instance(ty)?)?;
            let native = ctor(&config)?;
            let payload: Rc<dyn Any> = Rc::new(RefCell::new(native));
            host.set_payload(instance.as_raw(), payload)?;
            Ok(instance.into_raw())
        })
    })
}

fn dealloc_hook<Cls: 'static>(type_name: &Rc<str>) -> DeallocHook {
    let type_name = type_name.clone();
    Rc::new(move |this: RawRef| {
        let Some(host) = interp::active() else {
            tracing::trace!(ty = %type_name, "instance released without an active runtime");
            return;
        };
        let payload = host.take_payload(this);
        if catch_unwind(AssertUnwindSafe(move || drop(payload))).is_err() {
            tracing::warn!(ty = %type_name, "native destructor panicked");
        }
        host.free_instance(this);
    })
}
