//! Graph data structures for resource relationships
//!
//! Nodes are identified by `"{kind}:{namespace}:{name}"`. Adding a node that is
//! already present merges its attributes into the existing node; adding an edge
//! requires both endpoints to exist and is a no-op when the same
//! (from, to, relation) triple is already present.

use crate::kube::ObjectDoc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Build the deterministic node ID for an object identity
pub fn node_id(kind: &str, namespace: &str, name: &str) -> String {
    format!("{}:{}:{}", kind, namespace, name)
}

/// A node in the resource graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Unique identifier for the node
    pub id: String,
    pub kind: String,
    pub name: String,
    /// Empty for cluster-scoped objects
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Readiness from the object's `Ready`/`Available` condition when it has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Short human-readable detail (CIDR, host, replica counts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl GraphNode {
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            id: node_id(kind, namespace, name),
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            labels: BTreeMap::new(),
            ready: None,
            phase: None,
            description: None,
        }
    }

    /// Build a node from a cluster object, deriving display attributes
    pub fn from_object(doc: &ObjectDoc) -> Self {
        let mut node = Self::new(doc.kind(), doc.namespace(), doc.name());
        node.labels = doc.labels();
        node.phase = doc.str_at(&["status", "phase"]).map(String::from);
        node.ready = readiness(doc);
        node.description = describe(doc);
        node
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Fill in attributes the existing node does not have yet
    fn merge(&mut self, other: GraphNode) {
        for (k, v) in other.labels {
            self.labels.entry(k).or_insert(v);
        }
        if self.ready.is_none() {
            self.ready = other.ready;
        }
        if self.phase.is_none() {
            self.phase = other.phase;
        }
        if self.description.is_none() {
            self.description = other.description;
        }
    }
}

fn readiness(doc: &ObjectDoc) -> Option<bool> {
    let status = doc
        .condition_status("Ready")
        .or_else(|| doc.condition_status("Available"))
        .or_else(|| doc.condition_status("Accepted"))?;
    Some(status == "True")
}

fn describe(doc: &ObjectDoc) -> Option<String> {
    match doc.kind() {
        "Deployment" | "ReplicaSet" | "StatefulSet" => {
            let desired = doc.i64_at(&["spec", "replicas"])?;
            let ready = doc.i64_at(&["status", "readyReplicas"]).unwrap_or(0);
            Some(format!("{}/{} ready", ready, desired))
        }
        "Pod" => doc.str_at(&["spec", "nodeName"]).map(|n| format!("node {}", n)),
        "Service" => doc.str_at(&["spec", "type"]).map(String::from),
        _ => None,
    }
}

/// Relationship between two nodes (closed vocabulary)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Relation {
    /// Child is owned by parent (owner reference)
    OwnedBy,
    /// Traffic routes from source to target
    RoutesTo,
    /// Source selects target by labels
    Selects,
    /// Network policy admits traffic from the target peer
    AllowsFrom,
    /// Network policy admits traffic to the target peer
    AllowsTo,
    /// Source is bound to target (Endpoints, parent Gateway, role bindings)
    Binds,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::OwnedBy => "owned-by",
            Relation::RoutesTo => "routes-to",
            Relation::Selects => "selects",
            Relation::AllowsFrom => "allows-from",
            Relation::AllowsTo => "allows-to",
            Relation::Binds => "binds",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed edge between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub relation: Relation,
}

impl GraphEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, relation: Relation) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EdgeError {
    #[error("edge {from} -{relation}-> {to} references missing node {missing}")]
    MissingNode {
        from: String,
        to: String,
        relation: Relation,
        missing: String,
    },
}

/// A graph representing resource relationships
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGraph {
    /// All nodes in insertion order
    pub nodes: Vec<GraphNode>,
    /// All edges in insertion order
    pub edges: Vec<GraphEdge>,
    /// Map from node ID to index in nodes vector
    #[serde(skip)]
    node_index: HashMap<String, usize>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, merging into an existing node with the same ID
    ///
    /// Returns the node ID.
    pub fn add_node(&mut self, node: GraphNode) -> String {
        let id = node.id.clone();
        match self.node_index.get(&id) {
            Some(&index) => self.nodes[index].merge(node),
            None => {
                self.node_index.insert(id.clone(), self.nodes.len());
                self.nodes.push(node);
            }
        }
        id
    }

    /// Add an edge; returns `Ok(false)` when the edge already existed
    pub fn add_edge(&mut self, edge: GraphEdge) -> Result<bool, EdgeError> {
        for endpoint in [&edge.from, &edge.to] {
            if !self.node_index.contains_key(endpoint) {
                return Err(EdgeError::MissingNode {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    relation: edge.relation,
                    missing: endpoint.clone(),
                });
            }
        }
        if self.edges.contains(&edge) {
            return Ok(false);
        }
        self.edges.push(edge);
        Ok(true)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn nodes_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a GraphNode> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    pub fn edges_with(&self, relation: Relation) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.relation == relation)
    }

    /// Nodes reached from `id` by outgoing edges of `relation`
    pub fn targets(&self, id: &str, relation: Relation) -> Vec<&GraphNode> {
        self.edges
            .iter()
            .filter(|e| e.from == id && e.relation == relation)
            .filter_map(|e| self.node(&e.to))
            .collect()
    }

    /// Nodes with outgoing edges of `relation` into `id`
    pub fn sources(&self, id: &str, relation: Relation) -> Vec<&GraphNode> {
        self.edges
            .iter()
            .filter(|e| e.to == id && e.relation == relation)
            .filter_map(|e| self.node(&e.from))
            .collect()
    }

    /// Rebuild the ID index (after deserializing a graph)
    pub fn reindex(&mut self) {
        self.node_index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
    }
}
