//! In-process cluster
//!
//! `InMemoryCluster` serves objects from a map of JSON documents. It backs the
//! test suite and the CLI `--snapshot` mode, where a multi-document YAML dump
//! (`kubectl get ... -o yaml` output, `List` objects included) is diagnosed
//! offline.

use super::cluster::{ClusterApi, ClusterError, ListQuery};
use super::discovery::{DiscoveredResource, DiscoveryDoc};
use super::object::{ObjectDoc, value_at};
use crate::models::{ResourceIdentity, split_api_version};
use crate::trace::selectors::{self, SelectorExt};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A write recorded by the in-memory cluster
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Patch { reference: String, patch: Value },
    Delete { reference: String },
}

/// (group, kind, namespace, name)
type ObjectKey = (String, String, String, String);

#[derive(Default)]
pub struct InMemoryCluster {
    discovery: RwLock<DiscoveryDoc>,
    objects: RwLock<BTreeMap<ObjectKey, ObjectDoc>>,
    list_failures: RwLock<HashSet<String>>,
    mutations: RwLock<Vec<Mutation>>,
    discover_calls: AtomicUsize,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryCluster {
    /// Empty cluster that serves every built-in kind
    pub fn new() -> Self {
        Self {
            discovery: RwLock::new(DiscoveryDoc::builtin()),
            ..Default::default()
        }
    }

    /// Load a multi-document YAML dump
    pub fn from_manifests(yaml: &str) -> Result<Self, ClusterError> {
        let cluster = Self::new();
        for document in serde_yaml::Deserializer::from_str(yaml) {
            let value = Value::deserialize(document)
                .map_err(|e| ClusterError::request("load", "snapshot", e.to_string()))?;
            if value.is_null() {
                continue;
            }
            cluster.insert_value(value);
        }
        Ok(cluster)
    }

    fn insert_value(&self, value: Value) {
        let doc = ObjectDoc::new(value);
        if doc.kind() == "List" || doc.kind().ends_with("List") {
            for item in doc.array_at(&["items"]) {
                self.insert_value(item.clone());
            }
            return;
        }
        if doc.kind() == "CustomResourceDefinition" {
            self.register_crd(&doc);
        }
        self.insert(doc);
    }

    /// Register the served version of a CRD object in discovery
    fn register_crd(&self, crd: &ObjectDoc) {
        let group = crd.str_at(&["spec", "group"]).unwrap_or_default();
        let kind = crd.str_at(&["spec", "names", "kind"]).unwrap_or_default();
        let plural = crd.str_at(&["spec", "names", "plural"]).unwrap_or_default();
        let namespaced = crd.str_at(&["spec", "scope"]) != Some("Cluster");
        let version = crd
            .array_at(&["spec", "versions"])
            .iter()
            .find(|v| v.get("storage").and_then(|s| s.as_bool()) == Some(true))
            .or_else(|| crd.array_at(&["spec", "versions"]).first())
            .and_then(|v| v.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("v1");
        if group.is_empty() || kind.is_empty() || plural.is_empty() {
            return;
        }
        let short_names: Vec<&str> = crd
            .array_at(&["spec", "names", "shortNames"])
            .iter()
            .filter_map(|s| s.as_str())
            .collect();
        self.register(
            DiscoveredResource::new(ResourceIdentity::new(
                group, version, plural, kind, namespaced,
            ))
            .with_short_names(&short_names),
        );
    }

    /// Add a resource to discovery (a CRD install)
    pub fn register(&self, resource: DiscoveredResource) {
        let mut discovery = write(&self.discovery);
        if !discovery
            .resources
            .iter()
            .any(|r| r.identity == resource.identity)
        {
            discovery.push(resource);
        }
    }

    pub fn with_crd(self, identity: ResourceIdentity) -> Self {
        self.register(DiscoveredResource::new(identity));
        self
    }

    /// Make discovery of a group fail; its resources disappear from discovery
    pub fn with_failed_group(self, group: &str, reason: &str) -> Self {
        {
            let mut discovery = write(&self.discovery);
            discovery.resources.retain(|r| r.identity.group != group);
            discovery.record_failure(group, reason);
        }
        self
    }

    /// Make every list call for a kind fail
    pub fn with_list_failure(self, kind: &str) -> Self {
        write(&self.list_failures).insert(kind.to_string());
        self
    }

    pub fn with_object(self, value: Value) -> Self {
        self.insert_value(value);
        self
    }

    /// Insert or replace an object; unknown kinds are added to discovery
    pub fn insert(&self, doc: ObjectDoc) {
        let (group, version) = split_api_version(doc.api_version());
        let known = read(&self.discovery)
            .resources
            .iter()
            .any(|r| r.identity.group == group && r.identity.kind == doc.kind());
        if !known && !doc.kind().is_empty() {
            let plural = format!("{}s", doc.kind().to_lowercase());
            self.register(DiscoveredResource::new(ResourceIdentity::new(
                group,
                version,
                plural,
                doc.kind(),
                !doc.namespace().is_empty(),
            )));
        }
        let key = (
            group.to_string(),
            doc.kind().to_string(),
            doc.namespace().to_string(),
            doc.name().to_string(),
        );
        write(&self.objects).insert(key, doc);
    }

    /// Every write performed so far, in order
    pub fn mutations(&self) -> Vec<Mutation> {
        read(&self.mutations).clone()
    }

    /// Number of discovery walks served
    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    fn key(identity: &ResourceIdentity, namespace: Option<&str>, name: &str) -> ObjectKey {
        let ns = if identity.namespaced {
            namespace.unwrap_or_default()
        } else {
            ""
        };
        (
            identity.group.clone(),
            identity.kind.clone(),
            ns.to_string(),
            name.to_string(),
        )
    }
}

/// Match a field selector such as `involvedObject.uid=abc,spec.nodeName!=n1`
fn matches_fields(doc: &ObjectDoc, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            let (path, expected, negate) = if let Some((p, v)) = term.split_once("!=") {
                (p, v, true)
            } else if let Some((p, v)) = term.split_once("==") {
                (p, v, false)
            } else if let Some((p, v)) = term.split_once('=') {
                (p, v, false)
            } else {
                return false;
            };
            let segments: Vec<&str> = path.trim().split('.').collect();
            let actual = match value_at(doc.value(), &segments) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            (actual == expected.trim()) != negate
        })
}

/// RFC 7386 JSON merge patch
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn discover(&self) -> Result<DiscoveryDoc, ClusterError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        Ok(read(&self.discovery).clone())
    }

    async fn get(
        &self,
        identity: &ResourceIdentity,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<ObjectDoc>, ClusterError> {
        let key = Self::key(identity, namespace, name);
        Ok(read(&self.objects).get(&key).cloned())
    }

    async fn list(
        &self,
        identity: &ResourceIdentity,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> Result<Vec<ObjectDoc>, ClusterError> {
        if read(&self.list_failures).contains(&identity.kind) {
            return Err(ClusterError::request(
                "list",
                identity.to_string(),
                "injected failure",
            ));
        }
        let labels = query
            .label_selector
            .as_deref()
            .map(selectors::parse)
            .transpose()
            .map_err(|e| ClusterError::request("list", identity.to_string(), e.to_string()))?;

        let objects = read(&self.objects);
        Ok(objects
            .iter()
            .filter(|((group, kind, ns, _), _)| {
                *group == identity.group
                    && *kind == identity.kind
                    && match namespace {
                        Some(wanted) if identity.namespaced => ns == wanted,
                        _ => true,
                    }
            })
            .map(|(_, doc)| doc)
            .filter(|doc| labels.as_ref().is_none_or(|s| s.matches(&doc.labels())))
            .filter(|doc| {
                query
                    .field_selector
                    .as_deref()
                    .is_none_or(|f| matches_fields(doc, f))
            })
            .cloned()
            .collect())
    }

    async fn patch_merge(
        &self,
        identity: &ResourceIdentity,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<ObjectDoc, ClusterError> {
        let key = Self::key(identity, namespace, name);
        let reference = identity.reference(&key.2, name);
        let updated = {
            let mut objects = write(&self.objects);
            let doc = objects
                .get_mut(&key)
                .ok_or_else(|| ClusterError::request("patch", reference.clone(), "not found"))?;
            let mut value = doc.value().clone();
            merge_patch(&mut value, patch);
            *doc = ObjectDoc::new(value);
            doc.clone()
        };
        write(&self.mutations).push(Mutation::Patch {
            reference,
            patch: patch.clone(),
        });
        Ok(updated)
    }

    async fn delete(
        &self,
        identity: &ResourceIdentity,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ClusterError> {
        let key = Self::key(identity, namespace, name);
        let reference = identity.reference(&key.2, name);
        if write(&self.objects).remove(&key).is_none() {
            return Err(ClusterError::request("delete", reference, "not found"));
        }
        write(&self.mutations).push(Mutation::Delete { reference });
        Ok(())
    }
}
