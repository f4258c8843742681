//! Hostlink SDK - capability surface of a host runtime
//!
//! This crate holds the small set of types a dynamically-typed,
//! reference-counted host runtime must provide for a hostlink bridge:
//!
//! - [`RawRef`]: opaque reference to a host value
//! - [`HostApi`]: reference counting, boxing, protocols, error slot, type
//!   registration, modules and evaluation
//! - [`TypeSpec`] and the hook signatures used to synthesize new host types
//! - [`ErrorKind`]: the closed set of error categories shared by both sides
//!
//! Bridges depend on this crate and on `hostlink`; host runtimes depend on
//! this crate only.

#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod raw;
pub mod types;

pub use context::HostApi;
pub use error::{ErrorKind, HostErrorRecord, HostRaised, HostResult};
pub use raw::RawRef;
pub use types::{
    CallHook, DeallocHook, EvalMode, GetSetDef, GetterHook, MethodDef, NewHook, TraverseHook,
    TypeFlags, TypeSpec,
};
