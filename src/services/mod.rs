//! Service layer for diagnostic requests
//!
//! Request-scoped context (user, cancellation, deadline) and the engine facade
//! that every handler and the CLI go through.

pub mod context;
pub mod diagnostic_service;

pub use context::{Interrupted, RequestContext};
pub use diagnostic_service::{DiagnosticService, EngineSettings};
