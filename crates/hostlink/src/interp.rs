//! The active host runtime of the current thread
//!
//! Handles do not carry a pointer to their runtime. They reach it through
//! this per-thread slot, which the embedding code fills with [`install`]
//! before any value crosses the boundary.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use hostlink_sdk::HostApi;

use crate::error::{BridgeError, BridgeResult};

thread_local! {
    static ACTIVE: RefCell<Option<Rc<dyn HostApi>>> = const { RefCell::new(None) };
}

/// Restores the previously active runtime when dropped
#[must_use = "the runtime is uninstalled as soon as the guard is dropped"]
pub struct InterpGuard {
    previous: Option<Rc<dyn HostApi>>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for InterpGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let current = ACTIVE.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), previous));
        // Dropped outside the borrow: tearing a runtime down may release handles
        drop(current);
    }
}

/// Make `host` the active runtime of this thread
pub fn install(host: Rc<dyn HostApi>) -> InterpGuard {
    let previous = ACTIVE.with(|slot| slot.borrow_mut().replace(host));
    InterpGuard {
        previous,
        _not_send: PhantomData,
    }
}

/// The active runtime, if any
pub fn active() -> Option<Rc<dyn HostApi>> {
    ACTIVE.with(|slot| slot.borrow().clone())
}

/// The active runtime, or a runtime error when none is installed
pub fn host() -> BridgeResult<Rc<dyn HostApi>> {
    active().ok_or_else(|| BridgeError::runtime("no active host runtime"))
}

/// True if a runtime is installed on this thread
pub fn is_active() -> bool {
    ACTIVE.with(|slot| slot.borrow().is_some())
}
