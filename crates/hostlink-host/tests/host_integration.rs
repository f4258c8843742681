//! Integration tests for the reference host
//!
//! Tests cover:
//! - Reference counting and instrumentation counters
//! - Coercion rules and container protocols
//! - Type registration, instances, payloads and hooks
//! - Cycle collection through traversal hooks
//! - Module table and loadable entry points

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use hostlink_host::{HostConfig, MemoryHost};
use hostlink_sdk::{
    ErrorKind, EvalMode, GetSetDef, HostApi, MethodDef, RawRef, TypeFlags, TypeSpec,
};
use pretty_assertions::assert_eq;

fn error_of(host: &MemoryHost) -> (ErrorKind, String) {
    let record = host.fetch_error().expect("error slot should be set");
    (record.kind, record.message)
}

#[test]
fn test_refcount_instrumentation() {
    let host = MemoryHost::new();
    let start = host.stats();

    let value = host.new_int(42).unwrap();
    assert_eq!(host.refcount(value), 1);
    host.incref(value);
    host.incref(value);
    assert_eq!(host.refcount(value), 3);
    host.decref(value);
    host.decref(value);
    host.decref(value);

    let stats = host.stats();
    assert_eq!(stats.allocations - start.allocations, 1);
    assert_eq!(stats.deallocations - start.deallocations, 1);
    assert_eq!(stats.increfs - start.increfs, 2);
    assert_eq!(stats.decrefs - start.decrefs, 3);
    assert!(!host.is_alive(value));
}

#[test]
fn test_containers_release_items() {
    let host = MemoryHost::new();
    let before = host.live_objects();

    let a = host.new_str("a").unwrap();
    let list = host.new_list(&[a, a]).unwrap();
    assert_eq!(host.refcount(a), 3);
    host.decref(a);
    host.decref(list);

    assert_eq!(host.live_objects(), before);
}

#[test]
fn test_coercions() {
    let host = MemoryHost::new();
    let truth = host.new_bool(true);
    let float = host.new_float(2.5).unwrap();
    let text = host.new_str("7").unwrap();

    assert_eq!(host.as_int(truth).unwrap(), 1);
    assert_eq!(host.as_float(truth).unwrap(), 1.0);
    assert!(host.as_int(float).is_err());
    assert_eq!(
        error_of(&host),
        (
            ErrorKind::Type,
            "'float' object cannot be interpreted as an integer".to_string()
        )
    );
    assert!(host.as_float(text).is_err());
    assert_eq!(error_of(&host).0, ErrorKind::Type);
    assert!(host.as_str(float).is_err());
    assert_eq!(error_of(&host).0, ErrorKind::Type);
    assert_eq!(host.as_str(text).unwrap(), "7");

    for value in [truth, float, text] {
        host.decref(value);
    }
}

#[test]
fn test_sequence_protocol() {
    let host = MemoryHost::new();
    let items: Vec<RawRef> = [3, 1, 2].iter().map(|i| host.new_int(*i).unwrap()).collect();
    let list = host.new_list(&items).unwrap();
    for item in items {
        host.decref(item);
    }

    host.list_sort(list).unwrap();
    assert_eq!(host.repr(list).unwrap(), "[1, 2, 3]");
    host.list_reverse(list).unwrap();
    let last = host.seq_get(list, -1).unwrap();
    assert_eq!(host.as_int(last).unwrap(), 1);
    host.decref(last);

    let zero = host.new_int(0).unwrap();
    host.list_insert(list, -100, zero).unwrap();
    host.seq_del(list, 1).unwrap();
    assert_eq!(host.repr(list).unwrap(), "[0, 2, 1]");

    assert!(host.seq_get(list, 3).is_err());
    assert_eq!(
        error_of(&host),
        (ErrorKind::Index, "list index out of range".to_string())
    );

    let text = host.new_str("x").unwrap();
    host.list_append(list, text).unwrap();
    assert!(host.list_sort(list).is_err());
    assert_eq!(error_of(&host).0, ErrorKind::Type);

    host.decref(text);
    host.decref(zero);
    host.decref(list);
}

#[test]
fn test_mapping_protocol() {
    let host = MemoryHost::new();
    let dict = host.new_dict().unwrap();
    let key = host.new_str("alpha").unwrap();
    let one = host.new_int(1).unwrap();
    let one_float = host.new_float(1.0).unwrap();

    host.set_item(dict, key, one).unwrap();
    host.set_item(dict, one, key).unwrap();
    assert!(host.contains(dict, key).unwrap());
    // 1.0 and 1 are the same key
    assert!(host.contains(dict, one_float).unwrap());
    assert_eq!(host.len(dict).unwrap(), 2);
    assert_eq!(host.repr(dict).unwrap(), "{'alpha': 1, 1: 'alpha'}");

    let keys = host.keys(dict).unwrap();
    assert_eq!(host.repr(keys).unwrap(), "['alpha', 1]");
    host.decref(keys);

    let missing = host.new_str("beta").unwrap();
    assert!(host.get_item(dict, missing).is_err());
    assert_eq!(error_of(&host), (ErrorKind::Key, "'beta'".to_string()));

    let list = host.new_list(&[]).unwrap();
    assert!(host.set_item(dict, list, one).is_err());
    assert_eq!(
        error_of(&host),
        (ErrorKind::Type, "unhashable type: 'list'".to_string())
    );

    host.del_item(dict, key).unwrap();
    host.dict_clear(dict).unwrap();
    assert_eq!(host.len(dict).unwrap(), 0);

    for value in [dict, key, one, one_float, missing, list] {
        host.decref(value);
    }
}

#[test]
fn test_error_slot() {
    let host = MemoryHost::new();
    assert_eq!(host.error_occurred(), None);
    host.set_error(ErrorKind::Value, "bad input");
    assert_eq!(host.error_occurred(), Some(ErrorKind::Value));
    assert_eq!(error_of(&host), (ErrorKind::Value, "bad input".to_string()));
    assert_eq!(host.error_occurred(), None);
}

#[test]
fn test_has_attr_preserves_pending_error() {
    let host = MemoryHost::new();
    let value = host.new_int(1).unwrap();
    host.set_error(ErrorKind::Runtime, "pending");
    assert!(!host.has_attr(value, "nope"));
    assert_eq!(error_of(&host), (ErrorKind::Runtime, "pending".to_string()));
    host.decref(value);
}

// ============================================================================
// Types and instances
// ============================================================================

struct Counter {
    hits: Cell<usize>,
}

fn counter_of(host: &MemoryHost, obj: RawRef) -> Option<Rc<Counter>> {
    host.payload(obj)
        .and_then(|payload: Rc<dyn Any>| payload.downcast::<Counter>().ok())
}

fn counter_type(host: &Rc<MemoryHost>, deallocs: Rc<Cell<usize>>) -> RawRef {
    let weak: Weak<MemoryHost> = Rc::downgrade(host);
    let mut spec = TypeSpec::new("demo.Counter");
    spec.basic_size = std::mem::size_of::<Counter>();
    spec.flags = TypeFlags::DEFAULT | TypeFlags::BASETYPE;

    let w = weak.clone();
    spec.new = Some(Rc::new(move |ty: RawRef, _args: RawRef, _kwargs: RawRef| {
        let Some(host) = w.upgrade() else {
            return RawRef::NULL;
        };
        let Ok(obj) = host.alloc_instance(ty) else {
            return RawRef::NULL;
        };
        let payload: Rc<dyn Any> = Rc::new(Counter { hits: Cell::new(0) });
        if host.set_payload(obj, payload).is_err() {
            host.decref(obj);
            return RawRef::NULL;
        }
        obj
    }));

    let w = weak.clone();
    spec.dealloc = Some(Rc::new(move |obj: RawRef| {
        if let Some(host) = w.upgrade() {
            drop(host.take_payload(obj));
            deallocs.set(deallocs.get() + 1);
            host.free_instance(obj);
        }
    }));

    let w = weak.clone();
    spec.methods.push(MethodDef::new(
        "hit",
        0,
        Rc::new(move |this: RawRef, _args: RawRef| {
            let Some(host) = w.upgrade() else {
                return RawRef::NULL;
            };
            match counter_of(&host, this) {
                Some(counter) => {
                    counter.hits.set(counter.hits.get() + 1);
                    host.new_int(counter.hits.get() as i64).unwrap_or(RawRef::NULL)
                }
                None => {
                    host.set_error(ErrorKind::Runtime, "no payload");
                    RawRef::NULL
                }
            }
        }),
    ));

    let w = weak;
    spec.getset.push(GetSetDef {
        name: "hits".to_string(),
        doc: None,
        get: Rc::new(move |this: RawRef| {
            let Some(host) = w.upgrade() else {
                return RawRef::NULL;
            };
            let hits = counter_of(&host, this).map_or(0, |c| c.hits.get());
            host.new_int(hits as i64).unwrap_or(RawRef::NULL)
        }),
    });

    host.ready_type(spec).unwrap()
}

#[test]
fn test_synthesized_type_round_trip() {
    let host = MemoryHost::new();
    let deallocs = Rc::new(Cell::new(0));
    let ty = counter_type(&host, deallocs.clone());

    let globals = host.new_globals().unwrap();
    let key = host.new_str("Counter").unwrap();
    host.set_item(globals, key, ty).unwrap();
    host.decref(key);
    let value = host
        .eval(
            "c = Counter(); c.hit(); c.hit()",
            EvalMode::Statements,
            globals,
            globals,
        )
        .unwrap();
    host.decref(value);

    let hits = host
        .eval("c.hits", EvalMode::Expression, globals, globals)
        .unwrap();
    assert_eq!(host.as_int(hits).unwrap(), 2);
    host.decref(hits);

    let failed = host.eval("c.hits = 3", EvalMode::Statements, globals, globals);
    assert!(failed.is_err());
    assert_eq!(
        error_of(&host),
        (
            ErrorKind::Attribute,
            "attribute 'hits' of 'Counter' objects is not writable".to_string()
        )
    );

    let name = host
        .eval("type(c).__name__", EvalMode::Expression, globals, globals)
        .unwrap();
    assert_eq!(host.as_str(name).unwrap(), "Counter");
    host.decref(name);

    let size = host
        .eval("type(c).__basicsize__", EvalMode::Expression, globals, globals)
        .unwrap();
    assert_eq!(
        host.as_int(size).unwrap(),
        std::mem::size_of::<Counter>() as i64
    );
    host.decref(size);

    assert_eq!(deallocs.get(), 0);
    host.decref(globals);
    assert_eq!(deallocs.get(), 1);
    host.decref(ty);
}

#[test]
fn test_ready_type_rejections() {
    let host = MemoryHost::new();
    let call: hostlink_sdk::CallHook = Rc::new(|_, _| RawRef::NULL);

    let mut duplicate = TypeSpec::new("demo.Dup");
    duplicate.methods.push(MethodDef::new("x", 0, call.clone()));
    duplicate.methods.push(MethodDef::new("x", 1, call));
    assert!(host.ready_type(duplicate).is_err());
    assert_eq!(
        error_of(&host),
        (
            ErrorKind::Type,
            "duplicate attribute 'x' in type 'Dup'".to_string()
        )
    );

    let mut gc_without_traverse = TypeSpec::new("demo.Gc");
    gc_without_traverse.flags |= TypeFlags::HAVE_GC;
    assert!(host.ready_type(gc_without_traverse).is_err());
    host.clear_error();

    let globals = host.new_globals().unwrap();
    let bool_type = host
        .eval("bool", EvalMode::Expression, globals, globals)
        .unwrap();
    let mut bad_base = TypeSpec::new("demo.Sub");
    bad_base.base = Some(bool_type);
    assert!(host.ready_type(bad_base).is_err());
    assert_eq!(
        error_of(&host).1,
        "type 'bool' is not an acceptable base type"
    );
    host.decref(bool_type);
    host.decref(globals);
}

#[test]
fn test_cycle_through_traverse_hook() {
    let host = MemoryHost::new();
    let weak = Rc::downgrade(&host);

    let mut spec = TypeSpec::new("demo.Holder");
    spec.flags = TypeFlags::DEFAULT | TypeFlags::HAVE_GC;
    let w = weak.clone();
    spec.traverse = Some(Rc::new(move |obj: RawRef, visit: &mut dyn FnMut(RawRef)| {
        let Some(host) = w.upgrade() else { return };
        if let Some(held) = host
            .payload(obj)
            .and_then(|p| p.downcast::<RefCell<Option<RawRef>>>().ok())
        {
            if let Some(child) = *held.borrow() {
                visit(child);
            }
        }
    }));
    let w = weak;
    spec.dealloc = Some(Rc::new(move |obj: RawRef| {
        let Some(host) = w.upgrade() else { return };
        let held = host
            .take_payload(obj)
            .and_then(|p| p.downcast::<RefCell<Option<RawRef>>>().ok())
            .and_then(|held| held.borrow_mut().take());
        host.free_instance(obj);
        if let Some(child) = held {
            host.decref(child);
        }
    }));
    let ty = host.ready_type(spec).unwrap();
    let before = host.live_objects();

    // instance -> dict -> instance
    let obj = host.alloc_instance(ty).unwrap();
    let dict = host.new_dict().unwrap();
    let key = host.new_str("owner").unwrap();
    host.set_item(dict, key, obj).unwrap();
    host.decref(key);
    let payload: Rc<dyn Any> = Rc::new(RefCell::new(Some(dict)));
    host.set_payload(obj, payload).unwrap();
    host.decref(obj);

    assert!(host.is_alive(obj));
    let garbage = host.unreachable();
    assert!(garbage.contains(&obj));
    assert!(garbage.contains(&dict));

    let stats = host.collect();
    assert_eq!(stats.unreachable, 2);
    assert!(!host.is_alive(obj));
    assert!(!host.is_alive(dict));
    assert_eq!(host.live_objects(), before);
    host.decref(ty);
}

// ============================================================================
// Modules
// ============================================================================

thread_local! {
    static ACTIVE: RefCell<Option<Rc<MemoryHost>>> = const { RefCell::new(None) };
}

extern "C" fn init_demo() -> RawRef {
    ACTIVE.with(|active| {
        let Some(host) = active.borrow().clone() else {
            return RawRef::NULL;
        };
        let Ok(module) = host.new_module("demo", Some("Demo module")) else {
            return RawRef::NULL;
        };
        let answer = host.new_int(42).unwrap_or(RawRef::NULL);
        let added = host.module_add(module, "answer", answer);
        host.decref(answer);
        if added.is_err() {
            host.decref(module);
            return RawRef::NULL;
        }
        module
    })
}

extern "C" fn init_broken() -> RawRef {
    RawRef::NULL
}

#[test]
fn test_import_runs_entry_point_once() {
    let host = MemoryHost::new();
    ACTIVE.with(|active| *active.borrow_mut() = Some(host.clone()));
    host.append_inittab("demo", init_demo);

    let module = host.import("demo").unwrap();
    let again = host.import("demo").unwrap();
    assert_eq!(module, again);
    assert_eq!(host.module_names(), vec!["demo".to_string()]);

    let answer = host.get_attr(module, "answer").unwrap();
    assert_eq!(host.as_int(answer).unwrap(), 42);
    host.decref(answer);

    assert!(host.get_attr(module, "question").is_err());
    assert_eq!(
        error_of(&host),
        (
            ErrorKind::Attribute,
            "module 'demo' has no attribute 'question'".to_string()
        )
    );

    host.decref(module);
    host.decref(again);
    ACTIVE.with(|active| active.borrow_mut().take());
}

#[test]
fn test_import_failure_without_error() {
    let host = MemoryHost::new();
    host.append_inittab("broken", init_broken);
    assert!(host.import("broken").is_err());
    assert_eq!(error_of(&host).0, ErrorKind::Import);
    assert!(host.module("broken").is_none());
}

#[test]
fn test_config_from_toml() {
    let config = HostConfig::from_toml_str("recursion_limit = 8\nstrict_refcounts = false").unwrap();
    let host = MemoryHost::with_config(config);
    assert_eq!(host.config().recursion_limit, 8);

    let globals = host.new_globals().unwrap();
    let deep = host.eval(
        "(lambda f: f(f))(lambda f: f(f))",
        EvalMode::Expression,
        globals,
        globals,
    );
    assert!(deep.is_err());
    assert_eq!(
        error_of(&host),
        (
            ErrorKind::Runtime,
            "maximum recursion depth exceeded".to_string()
        )
    );
    host.decref(globals);
}
