//! Resolved resource identities
//!
//! A `ResourceIdentity` is what a user-facing kind string ("svc", "VirtualService",
//! "deployments") resolves to once discovery has been consulted. It is immutable
//! after creation and carries everything needed to build a dynamic API handle.

use kube::core::ApiResource;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Concrete API resource identity (group/version/resource plus kind and scope)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// API group, empty for the core group
    pub group: String,
    pub version: String,
    /// Plural resource name as used in REST paths
    pub resource: String,
    pub kind: String,
    pub namespaced: bool,
}

impl ResourceIdentity {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
        kind: impl Into<String>,
        namespaced: bool,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
            kind: kind.into(),
            namespaced,
        }
    }

    /// `apiVersion` string as it appears in manifests ("v1", "apps/v1")
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Convert to the kube-rs dynamic resource descriptor
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: self.kind.clone(),
            plural: self.resource.clone(),
        }
    }

    /// Build a resource reference string for an object of this resource
    ///
    /// Cluster-scoped objects drop the namespace segment.
    pub fn reference(&self, namespace: &str, name: &str) -> String {
        resource_ref(&self.resource, self.namespaced.then_some(namespace), name)
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

/// Format a `"<plural-or-kind>/<namespace>/<name>"` resource reference
pub fn resource_ref(plural_or_kind: &str, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}/{}/{}", plural_or_kind, ns, name),
        _ => format!("{}/{}", plural_or_kind, name),
    }
}

/// Split an `apiVersion` string into (group, version)
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_version_core_and_grouped() {
        let pods = ResourceIdentity::new("", "v1", "pods", "Pod", true);
        assert_eq!(pods.api_version(), "v1");

        let deploys = ResourceIdentity::new("apps", "v1", "deployments", "Deployment", true);
        assert_eq!(deploys.api_version(), "apps/v1");
        assert_eq!(deploys.api_resource().plural, "deployments");
    }

    #[test]
    fn test_reference_omits_namespace_for_cluster_scope() {
        let pv = ResourceIdentity::new("", "v1", "persistentvolumes", "PersistentVolume", false);
        assert_eq!(pv.reference("default", "pv-1"), "persistentvolumes/pv-1");

        let pvc = ResourceIdentity::new(
            "",
            "v1",
            "persistentvolumeclaims",
            "PersistentVolumeClaim",
            true,
        );
        assert_eq!(
            pvc.reference("default", "data"),
            "persistentvolumeclaims/default/data"
        );
    }

    #[test]
    fn test_split_api_version() {
        assert_eq!(split_api_version("v1"), ("", "v1"));
        assert_eq!(
            split_api_version("networking.istio.io/v1beta1"),
            ("networking.istio.io", "v1beta1")
        );
    }
}
