//! Graph cache with TTL-based expiry
//!
//! Built graphs are stored per query shape and served until their TTL runs
//! out. Expiry is checked on read; there is no background sweeper. Concurrent
//! misses on the same key may each rebuild, and the last writer wins.
//! Warnings are never cached: a hit returns none.

use super::graph::ResourceGraph;
use super::graph_builder::GraphQuery;
use crate::models::BuiltinKind;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Everything that changes a built graph
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphCacheKey {
    /// Normalized kind ("svc" and "services" both become "Service")
    pub root_kind: String,
    pub namespace: String,
    pub name: String,
    pub include_mesh: bool,
}

impl GraphCacheKey {
    pub fn new(root_kind: &str, namespace: &str, name: &str, include_mesh: bool) -> Self {
        let root_kind = BuiltinKind::from_str_case_insensitive(root_kind)
            .map(|k| k.as_str().to_string())
            .unwrap_or_else(|| root_kind.to_lowercase());
        Self {
            root_kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            include_mesh,
        }
    }
}

impl From<&GraphQuery> for GraphCacheKey {
    fn from(query: &GraphQuery) -> Self {
        Self::new(
            &query.root_kind,
            &query.namespace,
            &query.name,
            query.include_mesh,
        )
    }
}

/// Cached graph entry
#[derive(Debug, Clone)]
struct CacheEntry {
    graph: Arc<ResourceGraph>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Result of a cache lookup
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub graph: Arc<ResourceGraph>,
    /// Empty on a cache hit
    pub warnings: Vec<String>,
    pub from_cache: bool,
}

/// Shared graph cache
///
/// Cloning yields another handle on the same store.
#[derive(Debug, Clone, Default)]
pub struct GraphCache {
    entries: Arc<RwLock<HashMap<GraphCacheKey, CacheEntry>>>,
}

impl GraphCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached graph for `key`, or build and store it
    ///
    /// A zero `ttl` disables caching: every call builds and nothing is stored.
    /// Build errors are returned as-is and never cached.
    pub async fn get_or_build<F, Fut, E>(
        &self,
        key: &GraphCacheKey,
        ttl: Duration,
        build: F,
    ) -> Result<CacheLookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(ResourceGraph, Vec<String>), E>>,
    {
        if !ttl.is_zero() {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(key).filter(|e| !e.is_expired()) {
                tracing::debug!("Graph cache hit for {:?}", key);
                return Ok(CacheLookup {
                    graph: entry.graph.clone(),
                    warnings: Vec::new(),
                    from_cache: true,
                });
            }
        }

        tracing::debug!("Graph cache miss for {:?}", key);
        let (graph, warnings) = build().await?;
        let graph = Arc::new(graph);

        if !ttl.is_zero() {
            let mut entries = self.entries.write().await;
            entries.insert(
                key.clone(),
                CacheEntry {
                    graph: graph.clone(),
                    expires_at: Instant::now() + ttl,
                },
            );
        }

        Ok(CacheLookup {
            graph,
            warnings,
            from_cache: false,
        })
    }

    /// Drop every entry
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let total_entries = entries.len();
        let expired_entries = entries.values().filter(|e| e.is_expired()).count();

        CacheStats {
            total_entries,
            expired_entries,
            fresh_entries: total_entries - expired_entries,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cached entries
    pub total_entries: usize,
    /// Number of expired entries (still stored until the next miss replaces them)
    pub expired_entries: usize,
    pub fresh_entries: usize,
}
