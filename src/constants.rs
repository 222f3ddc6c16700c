//! Shared constants

/// Default TTL for cached graphs, in seconds
pub const DEFAULT_GRAPH_TTL_SECS: u64 = 30;

/// Default TTL for the cached discovery document, in seconds
pub const DEFAULT_DISCOVERY_TTL_SECS: u64 = 300;

/// Default traversal depth of the graph builder
pub const DEFAULT_MAX_HOPS: usize = 4;

/// Default per-request timeout, in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Evidence note recorded in place of a skipped cluster-scoped check
pub const REQUIRES_CLUSTER_ROLE: &str = "requires cluster role";

/// Replacement for redacted values
pub const REDACTED: &str = "<redacted>";

/// Evidence label for capabilities that are not registered
pub const CAPABILITY_UNAVAILABLE: &str = "capability unavailable";

/// Events attached per object
pub const MAX_EVENTS_PER_OBJECT: usize = 10;
