//! Hostlink reference host
//!
//! [`MemoryHost`] is a complete, single-threaded implementation of
//! [`hostlink_sdk::HostApi`] that keeps every value in an instrumented
//! in-memory heap. It exists so bridges can be exercised end to end without
//! an external interpreter:
//!
//! - per-object reference counts plus global counters ([`HostStats`]);
//! - a cycle detector and collector ([`MemoryHost::unreachable`],
//!   [`MemoryHost::collect`]) that walks instances only through their
//!   traversal hooks;
//! - a small evaluator for expressions and assignment statements;
//! - a module table with loadable entry points ([`MemoryHost::append_inittab`],
//!   [`MemoryHost::import`]);
//! - a fatal diagnostic log ([`MemoryHost::diagnostics`]).
//!
//! # Example
//!
//! ```ignore
//! use hostlink_host::MemoryHost;
//! use hostlink_sdk::{EvalMode, HostApi};
//!
//! let host = MemoryHost::new();
//! let globals = host.new_globals()?;
//! let value = host.eval("1 + 2", EvalMode::Expression, globals, globals)?;
//! assert_eq!(host.as_int(value)?, 3);
//! ```

mod api;
mod builtins;
mod config;
mod eval;
mod gc;
mod host;
mod object;
mod ops;

pub use config::{HostConfig, HostConfigError};
pub use gc::CollectStats;
pub use host::{HostStats, MemoryHost, ModuleInit};
