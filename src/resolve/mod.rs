//! Resource resolution
//!
//! Maps (kind, group hint) pairs to concrete [`ResourceIdentity`] values.
//!
//! [`ResourceIdentity`]: crate::models::ResourceIdentity

pub mod mapper;
pub mod resolver;

pub use mapper::RestMapper;
pub use resolver::{Resolution, ResolutionError, ResourceResolver};
