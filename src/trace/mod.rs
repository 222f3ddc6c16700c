//! Resource relationship graphs
//!
//! Builds a node/edge graph around a root object by following ownership,
//! label selectors, endpoints, ingress backends, network-policy peers and
//! (optionally) service-mesh routing, and caches built graphs per query shape.

pub mod cache;
pub mod graph;
pub mod graph_builder;
pub mod mesh;
pub mod network;
pub mod rules;
pub mod selectors;

pub use cache::{CacheLookup, CacheStats, GraphCache, GraphCacheKey};
pub use graph::{EdgeError, GraphEdge, GraphNode, Relation, ResourceGraph, node_id};
pub use graph_builder::{GraphBuilder, GraphError, GraphOutcome, GraphQuery};
pub use rules::{Reach, RelationRule, rules_for};
pub use selectors::{Selector, SelectorExt};
