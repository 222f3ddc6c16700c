//! Capability registry and invocation
//!
//! Diagnostic handlers and workload operations are exposed as named
//! capabilities. A handler may call another capability through the
//! [`ToolInvoker`], which applies the same confirmation and policy gates as a
//! top-level call.

pub mod builtin;
pub mod invoker;
pub mod registry;

pub use builtin::{DebugKind, builtin_registry, register_builtins};
pub use invoker::{InvokeOptions, ToolInvoker};
pub use registry::{Capability, CapabilityInfo, CapabilityRegistry, RegistryError, Safety};
