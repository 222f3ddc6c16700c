//! clusterlens library
//!
//! Relationship graphs and evidence-based diagnostics for Kubernetes
//! clusters. The binary is a thin CLI over this library; the test suite
//! drives it against [`kube::InMemoryCluster`].

pub mod analysis;
pub mod cli;
pub mod config;
pub mod constants;
pub mod diagnose;
pub mod error;
pub mod kube;
pub mod models;
pub mod policy;
pub mod resolve;
pub mod services;
pub mod tools;
pub mod trace;

pub use analysis::{Analysis, RenderedAnalysis, Severity};
pub use error::DiagnosticError;
pub use services::{DiagnosticService, EngineSettings, RequestContext};
pub use tools::{CapabilityRegistry, InvokeOptions, Safety, ToolInvoker};
