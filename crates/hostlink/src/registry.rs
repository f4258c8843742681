//! Module registry
//!
//! Collects the functions, types and objects of one native module and
//! publishes them to the host as a single module object. Names are checked
//! for duplicates before anything is created, so a bad module registers
//! nothing at all.

use std::cell::Cell;
use std::rc::Rc;

use hostlink_sdk::{MethodDef, RawRef};
use rustc_hash::FxHashSet;

use crate::boundary;
use crate::class::{BindingOptions, SynthesizedType, TypeState};
use crate::convert::ToHost;
use crate::dispatch::{function_hook, NativeFunction};
use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;
use crate::interp;

struct TypeEntry {
    name: String,
    type_object: Handle,
    state: Rc<Cell<TypeState>>,
}

/// Everything one native module will expose
pub struct ModuleBuilder {
    name: String,
    doc: Option<String>,
    functions: Vec<MethodDef>,
    types: Vec<TypeEntry>,
    objects: Vec<(String, Handle)>,
    options: BindingOptions,
}

impl ModuleBuilder {
    /// Empty module named `name`
    pub fn new(name: &str) -> Self {
        ModuleBuilder {
            name: name.to_string(),
            doc: None,
            functions: Vec::new(),
            types: Vec::new(),
            objects: Vec::new(),
            options: BindingOptions::default(),
        }
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the module docstring
    pub fn doc(&mut self, doc: &str) -> &mut Self {
        self.doc = Some(doc.to_string());
        self
    }

    /// Options new classes and functions of this module start from
    pub fn options(&self) -> BindingOptions {
        self.options
    }

    /// Replace the module-wide binding options
    pub fn set_options(&mut self, options: BindingOptions) -> &mut Self {
        self.options = options;
        self
    }

    /// Expose a native free function of arity 0 to 4
    pub fn add_function<F, Args>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: NativeFunction<Args>,
    {
        self.function_entry(name, None, f)
    }

    /// Expose a documented native free function
    pub fn add_function_with_doc<F, Args>(&mut self, name: &str, doc: &str, f: F) -> &mut Self
    where
        F: NativeFunction<Args>,
    {
        self.function_entry(name, Some(doc), f)
    }

    fn function_entry<F, Args>(&mut self, name: &str, doc: Option<&str>, f: F) -> &mut Self
    where
        F: NativeFunction<Args>,
    {
        let call = function_hook(name, f, self.options.catch_panics);
        self.functions
            .push(MethodDef::new(name, F::ARITY, call).with_doc(doc));
        self
    }

    /// Expose a finalized type under its short name
    pub fn add_type<Cls: 'static>(&mut self, ty: &SynthesizedType<Cls>) -> &mut Self {
        self.types.push(TypeEntry {
            name: ty.name().to_string(),
            type_object: ty.type_object().clone(),
            state: ty.state_cell(),
        });
        self
    }

    /// Expose a constant value
    pub fn add_object(&mut self, name: &str, value: impl ToHost) -> BridgeResult<&mut Self> {
        let value = value.to_host()?;
        self.objects.push((name.to_string(), value));
        Ok(self)
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.functions
            .iter()
            .map(|def| def.name.as_str())
            .chain(self.types.iter().map(|ty| ty.name.as_str()))
            .chain(self.objects.iter().map(|(name, _)| name.as_str()))
    }

    /// Create the host module, populate it and register it under its name.
    ///
    /// A name used twice, or one that collides with an entry the host puts
    /// in every module namespace (`__name__`, `__doc__`), is a fatal
    /// registration failure: the host is told through its fatal-error
    /// channel and no module is registered.
    pub fn publish(self) -> BridgeResult<Handle> {
        let host = interp::host()?;
        let reject = |duplicate: &str| {
            let message = format!("duplicate name '{duplicate}' in module '{}'", self.name);
            tracing::warn!(module = %self.name, name = duplicate, "module registration failed");
            host.fatal_error(&message);
            BridgeError::import(message)
        };

        let mut seen = FxHashSet::default();
        if let Some(duplicate) = self.names().find(|name| !seen.insert(*name)) {
            return Err(reject(duplicate));
        }

        let module = Handle::from_owned(host.new_module(&self.name, self.doc.as_deref())?)?;
        if let Some(taken) = self.names().find(|name| host.has_attr(module.as_raw(), name)) {
            return Err(reject(taken));
        }

        let functions = self.functions.len();
        for def in self.functions {
            let name = def.name.clone();
            let function = Handle::from_owned(host.new_function(def, Some(module.as_raw()))?)?;
            host.module_add(module.as_raw(), &name, function.as_raw())?;
        }
        for ty in &self.types {
            host.module_add(module.as_raw(), &ty.name, ty.type_object.as_raw())?;
        }
        for (name, value) in &self.objects {
            host.module_add(module.as_raw(), name, value.as_raw())?;
        }
        host.register_module(&self.name, module.as_raw())?;

        for ty in &self.types {
            ty.state.set(TypeState::Published);
        }
        tracing::debug!(
            module = %self.name,
            functions,
            types = self.types.len(),
            objects = self.objects.len(),
            "published module"
        );
        Ok(module)
    }
}

impl std::fmt::Debug for ModuleBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleBuilder")
            .field("name", &self.name)
            .field("functions", &self.functions.len())
            .field("types", &self.types.len())
            .field("objects", &self.objects.len())
            .finish()
    }
}

/// Body of a generated module entry point.
///
/// Runs `init` against a fresh [`ModuleBuilder`] and publishes the result.
/// Returns the module as a new reference, or null with the host error slot
/// set.
pub fn init_module(
    name: &str,
    doc: Option<&str>,
    init: fn(&mut ModuleBuilder) -> BridgeResult<()>,
) -> RawRef {
    boundary::guard(true, || {
        let mut module = ModuleBuilder::new(name);
        if let Some(doc) = doc {
            module.doc(doc);
        }
        init(&mut module)?;
        Ok(module.publish()?.into_raw())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink_host::MemoryHost;
    use hostlink_sdk::HostApi;

    #[test]
    fn test_publish_registers_everything() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let mut module = ModuleBuilder::new("demo");
        module.doc("Demo module");
        module.add_function("add", |a: i64, b: i64| a + b);
        module.add_object("VERSION", "1.0").unwrap();
        let published = module.publish().unwrap();

        assert_eq!(host.module_names(), vec!["demo".to_string()]);
        let add = published.getattr("add").unwrap();
        assert_eq!(add.call2(2i64, 40i64).unwrap().extract::<i64>().unwrap(), 42);
        let version: String = published.getattr("VERSION").unwrap().extract().unwrap();
        assert_eq!(version, "1.0");
        let doc: String = published.getattr("__doc__").unwrap().extract().unwrap();
        assert_eq!(doc, "Demo module");
    }

    #[test]
    fn test_duplicate_name_registers_nothing() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());
        let before = host.live_objects();

        let mut module = ModuleBuilder::new("dup");
        module.add_function("f", || 1i64);
        module.add_object("f", 2i64).unwrap();
        let err = module.publish().unwrap_err();

        assert_eq!(err.kind(), Some(hostlink_sdk::ErrorKind::Import));
        assert!(host.module_names().is_empty());
        assert_eq!(
            host.diagnostics(),
            vec!["duplicate name 'f' in module 'dup'".to_string()]
        );
        assert_eq!(host.live_objects(), before);
        assert_eq!(host.error_occurred(), None);
    }

    #[test]
    fn test_reserved_module_names_are_not_overwritten() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());
        let before = host.live_objects();

        let mut module = ModuleBuilder::new("shadow");
        module.doc("original doc");
        module.add_object("__doc__", "clobbered").unwrap();
        let err = module.publish().unwrap_err();

        assert_eq!(err.kind(), Some(hostlink_sdk::ErrorKind::Import));
        assert_eq!(err.message(), "duplicate name '__doc__' in module 'shadow'");
        assert_eq!(
            host.diagnostics(),
            vec!["duplicate name '__doc__' in module 'shadow'".to_string()]
        );
        assert!(host.module_names().is_empty());
        assert_eq!(host.live_objects(), before);
    }

    #[test]
    fn test_init_module_failure_sets_error() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        fn failing(_: &mut ModuleBuilder) -> BridgeResult<()> {
            Err(BridgeError::runtime("cannot initialize"))
        }
        let raw = init_module("broken", None, failing);
        assert!(raw.is_null());
        assert_eq!(host.fetch_error().unwrap().message, "cannot initialize");
        assert!(host.module_names().is_empty());
    }
}
