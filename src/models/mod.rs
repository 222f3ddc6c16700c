//! Resource model layer
//!
//! Built-in kind table and resolved resource identities shared by the
//! resolver, the graph builder and the diagnostic handlers.

pub mod builtin_kind;
pub mod identity;

pub use builtin_kind::BuiltinKind;
pub use identity::{ResourceIdentity, resource_ref, split_api_version};
