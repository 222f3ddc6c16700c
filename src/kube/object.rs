//! Loosely-typed Kubernetes objects
//!
//! Arbitrary CRD and mesh objects are read as JSON documents. `ObjectDoc` wraps
//! such a document and exposes nested-field lookups that never assume a field is
//! present: every accessor returns `Option` (or an empty collection).

use crate::models::{ResourceIdentity, split_api_version};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Look up a nested field by path, e.g. `["spec", "selector", "matchLabels"]`
pub fn value_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(key))
}

/// Look up a nested string field
pub fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    value_at(value, path).and_then(|v| v.as_str())
}

/// Convert a JSON object of string values into a sorted map
pub fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// An owner reference as found in `metadata.ownerReferences`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: Option<String>,
    pub controller: bool,
}

/// A Kubernetes object held as a JSON document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectDoc(Value);

impl ObjectDoc {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Serialize any typed object (k8s-openapi or kube DynamicObject) into a document
    pub fn from_typed<T: Serialize>(object: &T) -> serde_json::Result<Self> {
        serde_json::to_value(object).map(Self)
    }

    /// Deserialize into a typed k8s-openapi struct
    pub fn into_typed<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.0.clone())
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Fill in `kind`/`apiVersion` when the API omitted them (list items do)
    pub fn ensure_type_meta(&mut self, identity: &ResourceIdentity) {
        if let Some(map) = self.0.as_object_mut() {
            map.entry("kind")
                .or_insert_with(|| Value::String(identity.kind.clone()));
            map.entry("apiVersion")
                .or_insert_with(|| Value::String(identity.api_version()));
        }
    }

    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        value_at(&self.0, path)
    }

    pub fn str_at(&self, path: &[&str]) -> Option<&str> {
        str_at(&self.0, path)
    }

    pub fn i64_at(&self, path: &[&str]) -> Option<i64> {
        self.get(path).and_then(|v| v.as_i64())
    }

    pub fn bool_at(&self, path: &[&str]) -> Option<bool> {
        self.get(path).and_then(|v| v.as_bool())
    }

    /// Array at path, or an empty slice when absent or not an array
    pub fn array_at(&self, path: &[&str]) -> &[Value] {
        self.get(path)
            .and_then(|v| v.as_array())
            .map(|a| a.as_slice())
            .unwrap_or(&[])
    }

    pub fn string_map_at(&self, path: &[&str]) -> BTreeMap<String, String> {
        string_map(self.get(path))
    }

    pub fn kind(&self) -> &str {
        self.str_at(&["kind"]).unwrap_or_default()
    }

    pub fn api_version(&self) -> &str {
        self.str_at(&["apiVersion"]).unwrap_or_default()
    }

    /// API group parsed from `apiVersion`
    pub fn group(&self) -> &str {
        split_api_version(self.api_version()).0
    }

    pub fn name(&self) -> &str {
        self.str_at(&["metadata", "name"]).unwrap_or_default()
    }

    /// Namespace, empty for cluster-scoped objects
    pub fn namespace(&self) -> &str {
        self.str_at(&["metadata", "namespace"]).unwrap_or_default()
    }

    pub fn uid(&self) -> Option<&str> {
        self.str_at(&["metadata", "uid"])
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.string_map_at(&["metadata", "labels"])
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.string_map_at(&["metadata", "annotations"])
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.get(&["metadata", "annotations"])
            .and_then(|a| a.get(key))
            .and_then(|v| v.as_str())
    }

    /// Find a `status.conditions[]` entry by type
    pub fn condition(&self, condition_type: &str) -> Option<&Value> {
        self.array_at(&["status", "conditions"])
            .iter()
            .find(|c| c.get("type").and_then(|t| t.as_str()) == Some(condition_type))
    }

    /// `status` of a condition ("True", "False", "Unknown")
    pub fn condition_status(&self, condition_type: &str) -> Option<&str> {
        self.condition(condition_type)
            .and_then(|c| c.get("status"))
            .and_then(|s| s.as_str())
    }

    pub fn owner_references(&self) -> Vec<OwnerRef> {
        self.array_at(&["metadata", "ownerReferences"])
            .iter()
            .filter_map(|r| {
                Some(OwnerRef {
                    api_version: r.get("apiVersion")?.as_str()?.to_string(),
                    kind: r.get("kind")?.as_str()?.to_string(),
                    name: r.get("name")?.as_str()?.to_string(),
                    uid: r.get("uid").and_then(|u| u.as_str()).map(String::from),
                    controller: r
                        .get("controller")
                        .and_then(|c| c.as_bool())
                        .unwrap_or(false),
                })
            })
            .collect()
    }

    /// Whether this object lists `owner` among its owners
    ///
    /// UIDs are compared when both sides carry one; otherwise kind and name must match.
    pub fn is_owned_by(&self, owner: &ObjectDoc) -> bool {
        self.owner_references().iter().any(|r| {
            match (r.uid.as_deref(), owner.uid()) {
                (Some(ref_uid), Some(owner_uid)) => ref_uid == owner_uid,
                _ => r.kind == owner.kind() && r.name == owner.name(),
            }
        })
    }

    /// `kind/namespace/name` for log messages and warnings
    pub fn display_name(&self) -> String {
        if self.namespace().is_empty() {
            format!("{}/{}", self.kind(), self.name())
        } else {
            format!("{}/{}/{}", self.kind(), self.namespace(), self.name())
        }
    }
}

impl From<Value> for ObjectDoc {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
