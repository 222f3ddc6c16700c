//! Domain diagnostics
//!
//! Each handler validates the namespace, passes the policy gate, then combines
//! graph data and direct reads into an [`Analysis`](crate::analysis::Analysis).
//! Targets are diagnosed independently: one failing target becomes evidence
//! and the rest are still analyzed.

pub mod common;
pub mod crashloop;
pub mod hpa;
pub mod mesh;
pub mod network;
pub mod permissions;
pub mod scheduling;
pub mod storage;
pub mod vpa;

pub use crashloop::{CrashLoopRequest, debug_crashloop};
pub use hpa::{HpaRequest, debug_hpa};
pub use mesh::{MeshRequest, debug_mesh};
pub use network::{NetworkRequest, debug_network};
pub use permissions::{PermissionsRequest, debug_permissions};
pub use scheduling::{SchedulingRequest, debug_scheduling};
pub use storage::{StorageRequest, debug_storage, find_matching_pvs};
pub use vpa::{VpaRequest, debug_vpa};
