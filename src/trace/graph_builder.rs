//! Graph builder for discovering resource relationships
//!
//! Starting from a root object, the builder runs a bounded breadth-first
//! traversal. Each dequeued object is expanded by the relation rules declared
//! for its kind (see [`super::rules::rules_for`]); rule output is merged into
//! the graph and newly seen objects are queued one hop further out.
//!
//! Only failures on the root are fatal. A failing rule (missing CRD, list
//! error, dangling reference) becomes a warning and traversal continues.

use super::graph::{GraphNode, ResourceGraph};
use super::rules::{Reach, RelationRule, RuleOutput, rules_for};
use crate::kube::{ClusterApi, ClusterError, ListQuery, ObjectDoc};
use crate::models::{BuiltinKind, ResourceIdentity};
use crate::resolve::{ResolutionError, ResourceResolver};
use crate::services::context::{Interrupted, RequestContext};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("cannot resolve root kind: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("{reference} not found")]
    RootNotFound { reference: String },

    #[error("failed to fetch {reference}: {source}")]
    Root {
        reference: String,
        #[source]
        source: ClusterError,
    },

    #[error("graph build interrupted: {reason}")]
    Cancelled {
        reason: Interrupted,
        partial: ResourceGraph,
        warnings: Vec<String>,
    },
}

/// The shape of a graph request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQuery {
    pub root_kind: String,
    pub namespace: String,
    pub name: String,
    pub include_mesh: bool,
}

impl GraphQuery {
    pub fn new(root_kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            root_kind: root_kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            include_mesh: false,
        }
    }

    pub fn with_mesh(mut self, include_mesh: bool) -> Self {
        self.include_mesh = include_mesh;
        self
    }
}

/// A built graph plus non-fatal warnings
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphOutcome {
    pub graph: ResourceGraph,
    pub warnings: Vec<String>,
}

/// Failure of a single lookup made on behalf of a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    Interrupted(Interrupted),
    Failed(String),
}

impl From<Interrupted> for ScopeError {
    fn from(reason: Interrupted) -> Self {
        ScopeError::Interrupted(reason)
    }
}

impl From<ClusterError> for ScopeError {
    fn from(e: ClusterError) -> Self {
        ScopeError::Failed(e.to_string())
    }
}

type ListKey = (ResourceIdentity, String, ListQuery);
type GetKey = (ResourceIdentity, String, String);

/// Cluster access for one traversal
///
/// Lists, gets and resolutions are memoized so rules that need the same data
/// (every pod in a namespace, say) hit the API server once per build.
pub struct TraversalScope<'a> {
    cluster: &'a dyn ClusterApi,
    resolver: &'a ResourceResolver,
    ctx: &'a RequestContext,
    lists: HashMap<ListKey, Arc<Vec<ObjectDoc>>>,
    gets: HashMap<GetKey, Option<ObjectDoc>>,
    resolved: HashMap<(String, String), Result<ResourceIdentity, String>>,
    warnings: Vec<String>,
}

impl<'a> TraversalScope<'a> {
    pub fn new(
        cluster: &'a dyn ClusterApi,
        resolver: &'a ResourceResolver,
        ctx: &'a RequestContext,
    ) -> Self {
        Self {
            cluster,
            resolver,
            ctx,
            lists: HashMap::new(),
            gets: HashMap::new(),
            resolved: HashMap::new(),
            warnings: Vec::new(),
        }
    }

    fn scoped<'n>(identity: &ResourceIdentity, namespace: &'n str) -> Option<&'n str> {
        (identity.namespaced && !namespace.is_empty()).then_some(namespace)
    }

    /// List objects; `namespace` empty lists across all namespaces
    pub async fn list(
        &mut self,
        identity: &ResourceIdentity,
        namespace: &str,
        query: ListQuery,
    ) -> Result<Arc<Vec<ObjectDoc>>, ScopeError> {
        let key = (identity.clone(), namespace.to_string(), query);
        if let Some(hit) = self.lists.get(&key) {
            return Ok(hit.clone());
        }
        tracing::debug!("Listing {} in '{}' ({:?})", identity, namespace, key.2);
        let items = self
            .ctx
            .run(
                self.cluster
                    .list(identity, Self::scoped(identity, namespace), &key.2),
            )
            .await??;
        let items = Arc::new(items);
        self.lists.insert(key, items.clone());
        Ok(items)
    }

    pub async fn list_builtin(
        &mut self,
        kind: BuiltinKind,
        namespace: &str,
        query: ListQuery,
    ) -> Result<Arc<Vec<ObjectDoc>>, ScopeError> {
        self.list(&kind.identity(), namespace, query).await
    }

    pub async fn get(
        &mut self,
        identity: &ResourceIdentity,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObjectDoc>, ScopeError> {
        let key = (identity.clone(), namespace.to_string(), name.to_string());
        if let Some(hit) = self.gets.get(&key) {
            return Ok(hit.clone());
        }
        let found = self
            .ctx
            .run(
                self.cluster
                    .get(identity, Self::scoped(identity, namespace), name),
            )
            .await??;
        self.gets.insert(key, found.clone());
        Ok(found)
    }

    pub async fn get_builtin(
        &mut self,
        kind: BuiltinKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObjectDoc>, ScopeError> {
        self.get(&kind.identity(), namespace, name).await
    }

    /// Resolve a kind once per traversal; failures are remembered too
    pub async fn resolve(
        &mut self,
        kind: &str,
        group: &str,
    ) -> Result<ResourceIdentity, ScopeError> {
        let key = (kind.to_string(), group.to_string());
        if let Some(hit) = self.resolved.get(&key) {
            return hit.clone().map_err(ScopeError::Failed);
        }
        let result = self
            .ctx
            .run(self.resolver.resolve(kind, group))
            .await?
            .map(|resolution| {
                self.warnings.extend(resolution.warnings);
                resolution.identity
            })
            .map_err(|e| e.to_string());
        self.resolved.insert(key, result.clone());
        result.map_err(ScopeError::Failed)
    }

    fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}

/// Merges rule output into a graph, tracking warnings and visited nodes
struct Merge<'g> {
    graph: &'g mut ResourceGraph,
    warnings: Vec<String>,
    visited: HashSet<String>,
}

impl Merge<'_> {
    fn warn(&mut self, warning: String) {
        if !self.warnings.contains(&warning) {
            tracing::warn!("{}", warning);
            self.warnings.push(warning);
        }
    }

    /// Apply rule output; returns the objects not expanded yet
    fn apply(&mut self, output: RuleOutput) -> Vec<(ObjectDoc, Reach)> {
        let mut fresh = Vec::new();
        for (doc, reach) in output.objects {
            let id = self.graph.add_node(GraphNode::from_object(&doc));
            if self.visited.insert(id) {
                fresh.push((doc, reach));
            }
        }
        for leaf in output.leaves {
            self.graph.add_node(leaf);
        }
        for edge in output.edges {
            if let Err(e) = self.graph.add_edge(edge) {
                self.warn(e.to_string());
            }
        }
        for warning in output.warnings {
            self.warn(warning);
        }
        fresh
    }
}

/// Builds relationship graphs from a root object
pub struct GraphBuilder {
    cluster: Arc<dyn ClusterApi>,
    resolver: Arc<ResourceResolver>,
    max_hops: usize,
}

impl GraphBuilder {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        resolver: Arc<ResourceResolver>,
        max_hops: usize,
    ) -> Self {
        Self {
            cluster,
            resolver,
            max_hops,
        }
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterApi> {
        &self.cluster
    }

    pub fn resolver(&self) -> &Arc<ResourceResolver> {
        &self.resolver
    }

    /// Build the graph around the root object named by `query`
    pub async fn build(
        &self,
        ctx: &RequestContext,
        query: &GraphQuery,
    ) -> Result<GraphOutcome, GraphError> {
        let mut graph = ResourceGraph::new();
        let mut warnings = Vec::new();
        let interrupted = |reason, graph: ResourceGraph, warnings| GraphError::Cancelled {
            reason,
            partial: graph,
            warnings,
        };

        // Surface unreachable API groups even when every kind below is built in
        match ctx.run(self.resolver.discovery()).await {
            Ok(Ok(doc)) => warnings.extend(doc.warnings()),
            Ok(Err(e)) => warnings.push(e.to_string()),
            Err(reason) => return Err(interrupted(reason, graph, warnings)),
        }

        let resolution = match ctx.run(self.resolver.resolve(&query.root_kind, "")).await {
            Ok(result) => result?,
            Err(reason) => return Err(interrupted(reason, graph, warnings)),
        };
        let identity = resolution.identity;
        let namespace = if identity.namespaced {
            Some(query.namespace.as_str())
        } else {
            None
        };
        let reference = identity.reference(&query.namespace, &query.name);

        let root = match ctx
            .run(self.cluster.get(&identity, namespace, &query.name))
            .await
        {
            Ok(Ok(Some(root))) => root,
            Ok(Ok(None)) => return Err(GraphError::RootNotFound { reference }),
            Ok(Err(source)) => return Err(GraphError::Root { reference, source }),
            Err(reason) => return Err(interrupted(reason, graph, warnings)),
        };

        tracing::debug!("Building graph from {}", root.display_name());
        let mut scope = TraversalScope::new(self.cluster.as_ref(), &self.resolver, ctx);
        let mut merge = Merge {
            graph: &mut graph,
            warnings,
            visited: HashSet::new(),
        };
        merge
            .visited
            .insert(merge.graph.add_node(GraphNode::from_object(&root)));

        let mut queue = VecDeque::from([(root, Reach::Root, 0usize)]);
        while let Some((doc, reach, depth)) = queue.pop_front() {
            if depth >= self.max_hops {
                continue;
            }
            for rule in rules_for(doc.kind()) {
                if !rule.applies(reach, query.include_mesh) {
                    continue;
                }
                let output = match rule.apply(&mut scope, &doc).await {
                    Ok(output) => output,
                    Err(reason) => {
                        for warning in scope.take_warnings() {
                            merge.warn(warning);
                        }
                        let warnings = merge.warnings;
                        return Err(interrupted(reason, graph, warnings));
                    }
                };
                for warning in scope.take_warnings() {
                    merge.warn(warning);
                }
                for (next, next_reach) in merge.apply(output) {
                    queue.push_back((next, next_reach, depth + 1));
                }
            }
        }

        let warnings = merge.warnings;
        tracing::debug!(
            "Graph for {} has {} nodes, {} edges, {} warnings",
            reference,
            graph.nodes.len(),
            graph.edges.len(),
            warnings.len()
        );
        Ok(GraphOutcome { graph, warnings })
    }

    /// Apply a fixed set of rules to one object already in (or joining) `graph`
    ///
    /// Used to attach a single relation family to an existing graph without a
    /// full traversal. Returns the warnings produced.
    pub async fn expand(
        &self,
        ctx: &RequestContext,
        graph: &mut ResourceGraph,
        doc: &ObjectDoc,
        rules: &[RelationRule],
    ) -> Result<Vec<String>, Interrupted> {
        let mut scope = TraversalScope::new(self.cluster.as_ref(), &self.resolver, ctx);
        let mut merge = Merge {
            graph,
            warnings: Vec::new(),
            visited: HashSet::new(),
        };
        merge.graph.add_node(GraphNode::from_object(doc));
        for rule in rules {
            let output = rule.apply(&mut scope, doc).await?;
            for warning in scope.take_warnings() {
                merge.warn(warning);
            }
            merge.apply(output);
        }
        Ok(merge.warnings)
    }
}
