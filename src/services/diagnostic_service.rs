//! Diagnostic engine facade
//!
//! Owns the shared pieces a request needs (cluster handle, resolver, graph
//! builder, graph cache, policy gate) and exposes the gated entry points the
//! handlers and the CLI build on.

use crate::constants::{
    DEFAULT_DISCOVERY_TTL_SECS, DEFAULT_GRAPH_TTL_SECS, DEFAULT_MAX_HOPS,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
use crate::error::DiagnosticError;
use crate::kube::ClusterApi;
use crate::models::BuiltinKind;
use crate::policy::PolicyGate;
use crate::resolve::ResourceResolver;
use crate::services::context::RequestContext;
use crate::trace::{CacheLookup, GraphBuilder, GraphCache, GraphCacheKey, GraphQuery};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Engine tuning knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub graph_ttl: Duration,
    pub discovery_ttl: Duration,
    pub max_hops: usize,
    pub request_timeout: Duration,
    /// Default for graph requests that do not say
    pub include_mesh: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            graph_ttl: Duration::from_secs(DEFAULT_GRAPH_TTL_SECS),
            discovery_ttl: Duration::from_secs(DEFAULT_DISCOVERY_TTL_SECS),
            max_hops: DEFAULT_MAX_HOPS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            include_mesh: false,
        }
    }
}

pub struct DiagnosticService {
    cluster: Arc<dyn ClusterApi>,
    resolver: Arc<ResourceResolver>,
    builder: GraphBuilder,
    cache: GraphCache,
    policy: Arc<dyn PolicyGate>,
    settings: EngineSettings,
}

impl DiagnosticService {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        policy: Arc<dyn PolicyGate>,
        settings: EngineSettings,
    ) -> Self {
        Self::with_cache(cluster, policy, settings, GraphCache::new())
    }

    /// Use an existing cache handle, shared with other services
    pub fn with_cache(
        cluster: Arc<dyn ClusterApi>,
        policy: Arc<dyn PolicyGate>,
        settings: EngineSettings,
        cache: GraphCache,
    ) -> Self {
        let resolver = Arc::new(ResourceResolver::new(
            cluster.clone(),
            settings.discovery_ttl,
        ));
        let builder = GraphBuilder::new(cluster.clone(), resolver.clone(), settings.max_hops);
        Self {
            cluster,
            resolver,
            builder,
            cache,
            policy,
            settings,
        }
    }

    pub fn cluster(&self) -> &dyn ClusterApi {
        self.cluster.as_ref()
    }

    pub fn resolver(&self) -> &ResourceResolver {
        &self.resolver
    }

    pub fn builder(&self) -> &GraphBuilder {
        &self.builder
    }

    pub fn cache(&self) -> &GraphCache {
        &self.cache
    }

    pub fn policy(&self) -> &dyn PolicyGate {
        self.policy.as_ref()
    }

    pub fn policy_handle(&self) -> Arc<dyn PolicyGate> {
        self.policy.clone()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Validate and gate a namespaced request before any cluster read
    pub fn authorize(&self, ctx: &RequestContext, namespace: &str) -> Result<(), DiagnosticError> {
        if namespace.trim().is_empty() {
            return Err(DiagnosticError::validation("namespace is required"));
        }
        self.policy.check_namespace(&ctx.user, namespace, true)?;
        Ok(())
    }

    /// Whether cluster-scoped sub-checks may run for this caller
    pub fn has_cluster_scope(&self, ctx: &RequestContext) -> bool {
        self.policy.check_cluster_scope(&ctx.user).is_ok()
    }

    /// Build (or fetch from cache) the graph around one root object
    pub async fn build_graph(
        &self,
        ctx: &RequestContext,
        query: &GraphQuery,
    ) -> Result<CacheLookup, DiagnosticError> {
        if query.root_kind.trim().is_empty() {
            return Err(DiagnosticError::validation("kind is required"));
        }
        if query.name.trim().is_empty() {
            return Err(DiagnosticError::validation("name is required"));
        }
        let builtin = BuiltinKind::from_str_case_insensitive(&query.root_kind);
        if query.namespace.is_empty() {
            if builtin.is_some_and(|k| k.namespaced()) {
                return Err(DiagnosticError::validation("namespace is required"));
            }
            self.policy.check_cluster_scope(&ctx.user)?;
        } else {
            self.policy
                .check_namespace(&ctx.user, &query.namespace, true)?;
        }

        let key = GraphCacheKey::from(query);
        debug!(?key, user = %ctx.user.name, "Graph requested");
        let lookup = self
            .cache
            .get_or_build(&key, self.settings.graph_ttl, || async {
                self.builder
                    .build(ctx, query)
                    .await
                    .map(|outcome| (outcome.graph, outcome.warnings))
            })
            .await?;
        Ok(lookup)
    }

    /// Structured view of a graph lookup
    pub fn graph_payload(query: &GraphQuery, lookup: &CacheLookup) -> Value {
        json!({
            "query": query,
            "nodes": lookup.graph.nodes,
            "edges": lookup.graph.edges,
            "warnings": lookup.warnings,
            "fromCache": lookup.from_cache,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kube::InMemoryCluster;
    use crate::policy::{RolePolicy, User};
    use serde_json::json;

    fn service(cluster: InMemoryCluster) -> DiagnosticService {
        DiagnosticService::new(
            Arc::new(cluster),
            Arc::new(RolePolicy),
            EngineSettings::default(),
        )
    }

    fn web_service() -> InMemoryCluster {
        InMemoryCluster::new().with_object(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "web", "namespace": "shop"},
            "spec": {"selector": {"app": "web"}}
        }))
    }

    #[tokio::test]
    async fn test_empty_namespace_is_validation_error() {
        let svc = service(web_service());
        let ctx = RequestContext::new(User::cluster("ops"));
        let err = svc
            .build_graph(&ctx, &GraphQuery::new("service", "", "web"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[tokio::test]
    async fn test_policy_checked_before_reads() {
        let cluster = Arc::new(web_service());
        let svc = DiagnosticService::new(
            cluster.clone(),
            Arc::new(RolePolicy),
            EngineSettings::default(),
        );
        let ctx = RequestContext::new(User::namespaced("dev", &["team-a"]));
        let err = svc
            .build_graph(&ctx, &GraphQuery::new("service", "shop", "web"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "policy");
        assert_eq!(cluster.discover_calls(), 0);
    }

    #[tokio::test]
    async fn test_second_build_is_served_from_cache() {
        let svc = service(web_service());
        let ctx = RequestContext::new(User::cluster("ops"));
        let query = GraphQuery::new("svc", "shop", "web");

        let first = svc.build_graph(&ctx, &query).await.unwrap();
        let second = svc.build_graph(&ctx, &query).await.unwrap();
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert!(Arc::ptr_eq(&first.graph, &second.graph));
    }
}
