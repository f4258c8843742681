//! Typed views over host containers
//!
//! Each view wraps a [`Handle`] it takes by value and validates the value
//! once, at construction. A view holds no reference of its own, so it
//! never keeps a value alive longer than the handle it was built from.
//!
//! ```text
//! Mapping  ← Dict       (key lookup / real dict)
//! Sequence ← List       (indexed access / real list)
//! Tuple, Callable
//! Config = Mapping + DefaultsPolicy
//! ```

use std::ops::Deref;

use hostlink_sdk::{HostApi, MethodDef, RawRef};

use crate::convert::{type_mismatch, FromHost, ToHost};
use crate::dispatch::{function_hook, NativeFunction};
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{Handle, IntoArgs};
use crate::interp;

macro_rules! view_conversions {
    ($view:ident) => {
        impl FromHost for $view {
            fn from_host(handle: &Handle) -> BridgeResult<Self> {
                $view::new(handle.clone())
            }
        }

        impl ToHost for $view {
            fn to_host(&self) -> BridgeResult<Handle> {
                Ok(self.as_handle().clone())
            }
        }
    };
}

fn check(
    handle: Handle,
    expected: &str,
    predicate: impl FnOnce(&dyn HostApi, RawRef) -> bool,
) -> BridgeResult<Handle> {
    let host = interp::host()?;
    if predicate(host.as_ref(), handle.as_raw()) {
        Ok(handle)
    } else {
        Err(type_mismatch(expected, &handle))
    }
}

// ============================================================================
// Mapping
// ============================================================================

/// A value supporting key lookup
#[derive(Debug, Clone)]
pub struct Mapping(Handle);

impl Mapping {
    /// Validate that `handle` supports key lookup
    pub fn new(handle: Handle) -> BridgeResult<Self> {
        check(handle, "a mapping", |host, raw| host.check_mapping(raw)).map(Mapping)
    }

    /// The wrapped handle
    pub fn as_handle(&self) -> &Handle {
        &self.0
    }

    /// Unwrap into the handle
    pub fn into_handle(self) -> Handle {
        self.0
    }

    /// Key membership
    pub fn contains(&self, key: impl ToHost) -> BridgeResult<bool> {
        let host = interp::host()?;
        let key = key.to_host()?;
        Ok(host.contains(self.0.as_raw(), key.as_raw())?)
    }

    /// Required entry; a missing key is a key error
    pub fn get<T: FromHost>(&self, key: impl ToHost) -> BridgeResult<T> {
        let host = interp::host()?;
        let key = key.to_host()?;
        let value = Handle::from_owned(host.get_item(self.0.as_raw(), key.as_raw())?)?;
        T::from_host(&value)
    }

    /// Entry with a fallback; never fails on a missing key and never
    /// writes to the mapping
    pub fn get_or<T: FromHost>(&self, key: impl ToHost, default: T) -> BridgeResult<T> {
        let host = interp::host()?;
        let key = key.to_host()?;
        if !host.contains(self.0.as_raw(), key.as_raw())? {
            return Ok(default);
        }
        let value = Handle::from_owned(host.get_item(self.0.as_raw(), key.as_raw())?)?;
        T::from_host(&value)
    }

    /// Store an entry
    pub fn set(&self, key: impl ToHost, value: impl ToHost) -> BridgeResult<()> {
        let host = interp::host()?;
        let key = key.to_host()?;
        let value = value.to_host()?;
        Ok(host.set_item(self.0.as_raw(), key.as_raw(), value.as_raw())?)
    }

    /// Remove an entry; a missing key is a key error
    pub fn del(&self, key: impl ToHost) -> BridgeResult<()> {
        let host = interp::host()?;
        let key = key.to_host()?;
        Ok(host.del_item(self.0.as_raw(), key.as_raw())?)
    }

    /// Keys in iteration order
    pub fn keys(&self) -> BridgeResult<List> {
        let host = interp::host()?;
        List::new(Handle::from_owned(host.keys(self.0.as_raw())?)?)
    }

    /// Number of entries
    pub fn len(&self) -> BridgeResult<usize> {
        Ok(interp::host()?.len(self.0.as_raw())?)
    }

    /// True if there are no entries
    pub fn is_empty(&self) -> BridgeResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl Deref for Mapping {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        &self.0
    }
}

view_conversions!(Mapping);

// ============================================================================
// Dict
// ============================================================================

/// A host dict
#[derive(Debug, Clone)]
pub struct Dict(Mapping);

impl Dict {
    /// Validate that `handle` is a dict
    pub fn new(handle: Handle) -> BridgeResult<Self> {
        let handle = check(handle, "dict", |host, raw| host.check_dict(raw))?;
        Ok(Dict(Mapping(handle)))
    }

    /// A fresh empty dict
    pub fn empty() -> BridgeResult<Self> {
        let host = interp::host()?;
        Ok(Dict(Mapping(Handle::from_owned(host.new_dict()?)?)))
    }

    /// Remove every entry
    pub fn clear(&self) -> BridgeResult<()> {
        Ok(interp::host()?.dict_clear(self.as_handle().as_raw())?)
    }

    /// Merge the entries of `other` into this dict; existing keys are
    /// overwritten
    pub fn update(&self, other: &Mapping) -> BridgeResult<()> {
        self.as_handle()
            .call_method("update", (other.as_handle(),))
            .map(drop)
    }

    /// Key/value pairs in iteration order
    pub fn items(&self) -> BridgeResult<Vec<(Handle, Handle)>> {
        let host = interp::host()?;
        let keys = self.keys()?;
        let mut items = Vec::with_capacity(keys.len()?);
        for index in 0..keys.len()? {
            let key: Handle = keys.get(index as isize)?;
            let value = Handle::from_owned(host.get_item(self.as_handle().as_raw(), key.as_raw())?)?;
            items.push((key, value));
        }
        Ok(items)
    }

    /// Widen to a mapping view
    pub fn into_mapping(self) -> Mapping {
        self.0
    }
}

impl Deref for Dict {
    type Target = Mapping;

    fn deref(&self) -> &Mapping {
        &self.0
    }
}

view_conversions!(Dict);

// ============================================================================
// Sequence
// ============================================================================

/// A value supporting indexed access
#[derive(Debug, Clone)]
pub struct Sequence(Handle);

impl Sequence {
    /// Validate that `handle` supports indexed access
    pub fn new(handle: Handle) -> BridgeResult<Self> {
        check(handle, "a sequence", |host, raw| host.check_sequence(raw)).map(Sequence)
    }

    /// The wrapped handle
    pub fn as_handle(&self) -> &Handle {
        &self.0
    }

    /// Unwrap into the handle
    pub fn into_handle(self) -> Handle {
        self.0
    }

    /// Number of items
    pub fn len(&self) -> BridgeResult<usize> {
        Ok(interp::host()?.len(self.0.as_raw())?)
    }

    /// True if there are no items
    pub fn is_empty(&self) -> BridgeResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Item at `index`; negative indexes count from the end
    pub fn get<T: FromHost>(&self, index: isize) -> BridgeResult<T> {
        let host = interp::host()?;
        let item = Handle::from_owned(host.seq_get(self.0.as_raw(), index)?)?;
        T::from_host(&item)
    }

    /// Replace the item at `index`
    pub fn set(&self, index: isize, value: impl ToHost) -> BridgeResult<()> {
        let host = interp::host()?;
        let value = value.to_host()?;
        Ok(host.seq_set(self.0.as_raw(), index, value.as_raw())?)
    }

    /// Remove the item at `index`
    pub fn del(&self, index: isize) -> BridgeResult<()> {
        Ok(interp::host()?.seq_del(self.0.as_raw(), index)?)
    }

    /// Convert every item; the first item that does not convert fails
    /// the whole conversion
    pub fn to_vec<T: FromHost>(&self) -> BridgeResult<Vec<T>> {
        Vec::<T>::from_host(&self.0)
    }
}

impl Deref for Sequence {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        &self.0
    }
}

view_conversions!(Sequence);

// ============================================================================
// List
// ============================================================================

/// A host list
#[derive(Debug, Clone)]
pub struct List(Sequence);

impl List {
    /// Validate that `handle` is a list
    pub fn new(handle: Handle) -> BridgeResult<Self> {
        let handle = check(handle, "list", |host, raw| host.check_list(raw))?;
        Ok(List(Sequence(handle)))
    }

    /// A fresh empty list
    pub fn empty() -> BridgeResult<Self> {
        let host = interp::host()?;
        Ok(List(Sequence(Handle::from_owned(host.new_list(&[])?)?)))
    }

    /// A new list holding converted copies of `items`
    pub fn from_slice<T: ToHost>(items: &[T]) -> BridgeResult<Self> {
        List::new(items.to_host()?)
    }

    /// Append to the end
    pub fn append(&self, value: impl ToHost) -> BridgeResult<()> {
        let host = interp::host()?;
        let value = value.to_host()?;
        Ok(host.list_append(self.as_handle().as_raw(), value.as_raw())?)
    }

    /// Insert before `index`
    pub fn insert(&self, index: isize, value: impl ToHost) -> BridgeResult<()> {
        let host = interp::host()?;
        let value = value.to_host()?;
        Ok(host.list_insert(self.as_handle().as_raw(), index, value.as_raw())?)
    }

    /// Sort in place using the host's ordering
    pub fn sort(&self) -> BridgeResult<()> {
        Ok(interp::host()?.list_sort(self.as_handle().as_raw())?)
    }

    /// Reverse in place
    pub fn reverse(&self) -> BridgeResult<()> {
        Ok(interp::host()?.list_reverse(self.as_handle().as_raw())?)
    }

    /// Widen to a sequence view
    pub fn into_sequence(self) -> Sequence {
        self.0
    }
}

impl Deref for List {
    type Target = Sequence;

    fn deref(&self) -> &Sequence {
        &self.0
    }
}

view_conversions!(List);

// ============================================================================
// Tuple
// ============================================================================

/// A host tuple
#[derive(Debug, Clone)]
pub struct Tuple(Handle);

impl Tuple {
    /// Validate that `handle` is a tuple
    pub fn new(handle: Handle) -> BridgeResult<Self> {
        check(handle, "tuple", |host, raw| host.check_tuple(raw)).map(Tuple)
    }

    /// A new tuple of converted values
    pub fn pack(items: impl IntoArgs) -> BridgeResult<Self> {
        let host = interp::host()?;
        let items = items.into_args()?;
        let raws: Vec<RawRef> = items.iter().map(Handle::as_raw).collect();
        Ok(Tuple(Handle::from_owned(host.new_tuple(&raws)?)?))
    }

    /// The wrapped handle
    pub fn as_handle(&self) -> &Handle {
        &self.0
    }

    /// Number of items
    pub fn len(&self) -> BridgeResult<usize> {
        Ok(interp::host()?.len(self.0.as_raw())?)
    }

    /// True for the empty tuple
    pub fn is_empty(&self) -> BridgeResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Item at `index`
    pub fn get<T: FromHost>(&self, index: isize) -> BridgeResult<T> {
        let host = interp::host()?;
        let item = Handle::from_owned(host.seq_get(self.0.as_raw(), index)?)?;
        T::from_host(&item)
    }
}

impl Deref for Tuple {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        &self.0
    }
}

view_conversions!(Tuple);

// ============================================================================
// Callable
// ============================================================================

/// A value that can be called
#[derive(Debug, Clone)]
pub struct Callable(Handle);

impl Callable {
    /// Validate that `handle` is invocable
    pub fn new(handle: Handle) -> BridgeResult<Self> {
        check(handle, "a callable", |host, raw| host.is_callable(raw)).map(Callable)
    }

    /// Expose a native closure to the host as a function object
    pub fn from_fn<F, Args>(name: &str, f: F) -> BridgeResult<Self>
    where
        F: NativeFunction<Args>,
    {
        let host = interp::host()?;
        let def = MethodDef::new(name, F::ARITY, function_hook(name, f, true));
        Ok(Callable(Handle::from_owned(host.new_function(def, None)?)?))
    }

    /// The wrapped handle
    pub fn as_handle(&self) -> &Handle {
        &self.0
    }
}

impl Deref for Callable {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        &self.0
    }
}

view_conversions!(Callable);

// ============================================================================
// Config
// ============================================================================

/// What [`Config::get_or`] does with the default of a missing key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultsPolicy {
    /// Return the default; the mapping is left untouched
    #[default]
    ReadOnly,
    /// Store the default into the mapping, then return it
    WriteBack,
}

/// The mapping a native constructor receives
#[derive(Debug, Clone)]
pub struct Config {
    mapping: Mapping,
    policy: DefaultsPolicy,
}

impl Config {
    /// Wrap a mapping
    pub fn new(mapping: Mapping, policy: DefaultsPolicy) -> Self {
        Config { mapping, policy }
    }

    /// A config over a fresh empty dict
    pub fn empty(policy: DefaultsPolicy) -> BridgeResult<Self> {
        Ok(Config::new(Dict::empty()?.into_mapping(), policy))
    }

    /// The policy in effect
    pub fn policy(&self) -> DefaultsPolicy {
        self.policy
    }

    /// The underlying mapping
    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    /// Entry with a fallback, obeying the [`DefaultsPolicy`]
    pub fn get_or<T: FromHost + ToHost>(&self, key: &str, default: T) -> BridgeResult<T> {
        match self.policy {
            DefaultsPolicy::ReadOnly => self.mapping.get_or(key, default),
            DefaultsPolicy::WriteBack => {
                if self.mapping.contains(key)? {
                    self.mapping.get(key)
                } else {
                    self.mapping.set(key, &default)?;
                    Ok(default)
                }
            }
        }
    }

    /// Required entry with a message naming the missing key
    pub fn require<T: FromHost>(&self, key: &str) -> BridgeResult<T> {
        if !self.mapping.contains(key)? {
            return Err(BridgeError::key(format!("missing required key '{key}'")));
        }
        self.mapping.get(key)
    }
}

impl Deref for Config {
    type Target = Mapping;

    fn deref(&self) -> &Mapping {
        &self.mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink_host::MemoryHost;
    use hostlink_sdk::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_validation() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let number = 3i64.to_host().unwrap();
        assert_eq!(
            Mapping::new(number.clone()).unwrap_err(),
            BridgeError::type_error("expected a mapping, got 'int'")
        );
        assert!(Sequence::new(number.clone()).is_err());
        assert!(Callable::new(number).is_err());

        let list = List::empty().unwrap();
        assert!(Sequence::new(list.as_handle().clone()).is_ok());
        assert!(Dict::new(list.as_handle().clone()).is_err());
    }

    #[test]
    fn test_views_hold_no_extra_reference() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let handle = Dict::empty().unwrap().into_mapping().into_handle();
        assert_eq!(handle.refcount(), 1);
        let view = Mapping::new(handle).unwrap();
        assert_eq!(view.refcount(), 1);
    }

    #[test]
    fn test_mapping_operations() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let dict = Dict::empty().unwrap();
        dict.set("dt", 0.5).unwrap();
        dict.set("steps", 10).unwrap();
        assert!(dict.contains("dt").unwrap());
        assert_eq!(dict.get::<f64>("dt").unwrap(), 0.5);
        assert_eq!(dict.get_or("missing", 7i64).unwrap(), 7);
        assert!(!dict.contains("missing").unwrap());
        assert_eq!(dict.keys().unwrap().to_vec::<String>().unwrap(), vec!["dt", "steps"]);

        assert_eq!(dict.get::<i64>("nope").unwrap_err(), BridgeError::HostRaised);
        assert_eq!(host.fetch_error().unwrap().kind, ErrorKind::Key);

        dict.del("dt").unwrap();
        assert_eq!(dict.len().unwrap(), 1);
        dict.clear().unwrap();
        assert!(dict.is_empty().unwrap());
    }

    #[test]
    fn test_list_operations() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let list = List::from_slice(&[3i64, 1, 2]).unwrap();
        list.sort().unwrap();
        assert_eq!(list.to_vec::<i64>().unwrap(), vec![1, 2, 3]);
        list.reverse().unwrap();
        list.append(0).unwrap();
        list.insert(0, 9).unwrap();
        assert_eq!(list.to_vec::<i64>().unwrap(), vec![9, 3, 2, 1, 0]);
        assert_eq!(list.get::<i64>(-1).unwrap(), 0);
        list.set(1, 4).unwrap();
        list.del(0).unwrap();
        assert_eq!(list.to_vec::<i64>().unwrap(), vec![4, 2, 1, 0]);

        assert!(list.get::<i64>(10).is_err());
        assert_eq!(host.fetch_error().unwrap().kind, ErrorKind::Index);
    }

    #[test]
    fn test_heterogeneous_sequence_fails_elementwise() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let list = List::empty().unwrap();
        list.append(1).unwrap();
        list.append("two").unwrap();
        assert!(list.to_vec::<i64>().is_err());
        assert_eq!(host.fetch_error().unwrap().kind, ErrorKind::Type);
        assert_eq!(list.len().unwrap(), 2);
    }

    #[test]
    fn test_tuple_and_callable() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let tuple = Tuple::pack((1i64, "a")).unwrap();
        assert_eq!(tuple.len().unwrap(), 2);
        assert_eq!(tuple.get::<String>(1).unwrap(), "a");

        let double = Callable::from_fn("double", |x: i64| x * 2).unwrap();
        assert_eq!(double.call1(21).unwrap().extract::<i64>().unwrap(), 42);
        assert!(double.call0().is_err());
        assert_eq!(
            host.fetch_error().unwrap().message,
            "double() takes exactly 1 argument (0 given)"
        );
    }

    #[test]
    fn test_defaults_policy() {
        let host = MemoryHost::new();
        let _guard = interp::install(host.clone());

        let read_only = Config::empty(DefaultsPolicy::ReadOnly).unwrap();
        assert_eq!(read_only.get_or("dt", 0.1).unwrap(), 0.1);
        assert!(!read_only.contains("dt").unwrap());

        let write_back = Config::empty(DefaultsPolicy::WriteBack).unwrap();
        assert_eq!(write_back.get_or("dt", 0.1).unwrap(), 0.1);
        assert_eq!(write_back.get::<f64>("dt").unwrap(), 0.1);
        write_back.set("dt", 0.2).unwrap();
        assert_eq!(write_back.get_or("dt", 0.1).unwrap(), 0.2);

        assert_eq!(
            read_only.require::<f64>("mass").unwrap_err(),
            BridgeError::key("missing required key 'mass'")
        );
    }
}
