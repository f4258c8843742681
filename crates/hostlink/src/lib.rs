//! Hostlink
//!
//! Exposes native Rust classes and functions to a reference-counted,
//! garbage-collected host runtime reached through [`sdk::HostApi`].
//!
//! # Architecture
//!
//! ```text
//! host call ──► boundary::guard ──► dispatch thunk ──► native closure
//!                    │                   │ FromHost / IntoCallResult
//!                    │                   ▼
//!                    │               Handle (one owned host reference)
//!                    ▼
//!          BridgeError → host error slot (exactly once)
//! ```
//!
//! - [`Handle`]: owned host reference, released on drop
//! - [`ToHost`] / [`FromHost`]: value conversion
//! - [`views`]: typed wrappers over mappings, sequences, tuples, callables
//! - [`ClassBuilder`]: turns a native class into a host type
//! - [`ModuleBuilder`] and [`module`]: publish a native module
//!
//! All host access goes through the runtime installed for the current
//! thread with [`interp::install`].
//!
//! # Example
//!
//! ```ignore
//! #[hostlink::module]
//! /// Numerical helpers
//! fn mathx(m: &mut hostlink::ModuleBuilder) -> hostlink::BridgeResult<()> {
//!     m.add_function("hypot", |a: f64, b: f64| (a * a + b * b).sqrt());
//!     Ok(())
//! }
//! ```

pub mod boundary;
pub mod builtins;
mod class;
mod convert;
mod dispatch;
mod error;
mod handle;
pub mod interp;
mod registry;
pub mod views;

pub use class::{BindingOptions, ClassBuilder, Extends, SynthesizedType, TypeState, Visit};
pub use convert::{FromHost, IntoCallResult, ToHost};
pub use dispatch::{NativeFunction, NativeMethod};
pub use error::{BridgeError, BridgeResult, OUT_OF_MEMORY_MESSAGE, UNKNOWN_PANIC_MESSAGE};
pub use handle::{BorrowedHandle, Handle, IntoArgs};
pub use registry::{init_module, ModuleBuilder};
pub use views::{Callable, Config, DefaultsPolicy, Dict, List, Mapping, Sequence, Tuple};

pub use hostlink_macros::module;
pub use hostlink_sdk as sdk;

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Install a `tracing` subscriber driven by `RUST_LOG`.
///
/// Does nothing when `RUST_LOG` is unset or a subscriber is already
/// installed. Safe to call more than once.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            // Another subscriber may already be installed by the embedder
            let _ = tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .try_init();
        }
    });
}
