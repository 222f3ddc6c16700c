//! Cluster access seam
//!
//! Everything the engine reads from (or writes to) a cluster goes through
//! [`ClusterApi`]. The live implementation is [`super::KubeCluster`]; tests and
//! offline snapshot mode use [`super::InMemoryCluster`].

use super::discovery::DiscoveryDoc;
use super::object::ObjectDoc;
use crate::models::ResourceIdentity;
use async_trait::async_trait;
use kube::core::Selector;
use serde_json::Value;
use thiserror::Error;

/// Errors returned by cluster calls
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{operation} {resource} failed: {message}")]
    Request {
        operation: &'static str,
        resource: String,
        message: String,
    },

    #[error("Failed to decode object: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Discovery failed: {0}")]
    Discovery(String),
}

impl ClusterError {
    pub fn request(
        operation: &'static str,
        resource: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ClusterError::Request {
            operation,
            resource: resource.into(),
            message: message.into(),
        }
    }
}

/// Label and field selectors for list calls
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListQuery {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl ListQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn labels(selector: impl Into<String>) -> Self {
        Self {
            label_selector: Some(selector.into()),
            field_selector: None,
        }
    }

    /// Label query rendered from a typed selector
    pub fn labels_from(selector: &Selector) -> Self {
        Self::labels(selector.to_string())
    }

    pub fn fields(selector: impl Into<String>) -> Self {
        Self {
            label_selector: None,
            field_selector: Some(selector.into()),
        }
    }
}

/// Read/write access to a Kubernetes cluster by dynamic resource identity
///
/// `namespace` is ignored for cluster-scoped identities. For `list`, `None` means
/// all namespaces.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Walk the discovery endpoints; per-group failures are recorded, not returned
    async fn discover(&self) -> Result<DiscoveryDoc, ClusterError>;

    /// Fetch one object, `Ok(None)` when it does not exist
    async fn get(
        &self,
        identity: &ResourceIdentity,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<ObjectDoc>, ClusterError>;

    async fn list(
        &self,
        identity: &ResourceIdentity,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> Result<Vec<ObjectDoc>, ClusterError>;

    /// Apply a JSON merge patch, returning the updated object
    async fn patch_merge(
        &self,
        identity: &ResourceIdentity,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<ObjectDoc, ClusterError>;

    async fn delete(
        &self,
        identity: &ResourceIdentity,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ClusterError>;
}
