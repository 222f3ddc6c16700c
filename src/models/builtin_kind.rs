//! Built-in Kubernetes resource kinds
//!
//! This module provides a centralized enum for the core and extension kinds the
//! troubleshooting engine reads directly. Resolving one of these never needs a
//! discovery round-trip, which keeps the common paths (Service, Pod, PVC) fast
//! and independent of discovery failures in unrelated API groups.

use super::identity::ResourceIdentity;
use std::fmt;
use std::str::FromStr;

/// Enumeration of built-in resource kinds known without discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinKind {
    // core/v1
    Pod,
    Service,
    Endpoints,
    ConfigMap,
    Secret,
    ServiceAccount,
    Namespace,
    Node,
    Event,
    PersistentVolumeClaim,
    PersistentVolume,
    // apps/v1
    Deployment,
    ReplicaSet,
    StatefulSet,
    DaemonSet,
    // batch/v1
    Job,
    CronJob,
    // networking.k8s.io/v1
    Ingress,
    NetworkPolicy,
    // storage.k8s.io/v1
    StorageClass,
    VolumeAttachment,
    // autoscaling/v2
    HorizontalPodAutoscaler,
    // rbac.authorization.k8s.io/v1
    Role,
    RoleBinding,
    ClusterRole,
    ClusterRoleBinding,
    // admissionregistration.k8s.io/v1
    MutatingWebhookConfiguration,
}

impl BuiltinKind {
    /// Get the kind name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            BuiltinKind::Pod => "Pod",
            BuiltinKind::Service => "Service",
            BuiltinKind::Endpoints => "Endpoints",
            BuiltinKind::ConfigMap => "ConfigMap",
            BuiltinKind::Secret => "Secret",
            BuiltinKind::ServiceAccount => "ServiceAccount",
            BuiltinKind::Namespace => "Namespace",
            BuiltinKind::Node => "Node",
            BuiltinKind::Event => "Event",
            BuiltinKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            BuiltinKind::PersistentVolume => "PersistentVolume",
            BuiltinKind::Deployment => "Deployment",
            BuiltinKind::ReplicaSet => "ReplicaSet",
            BuiltinKind::StatefulSet => "StatefulSet",
            BuiltinKind::DaemonSet => "DaemonSet",
            BuiltinKind::Job => "Job",
            BuiltinKind::CronJob => "CronJob",
            BuiltinKind::Ingress => "Ingress",
            BuiltinKind::NetworkPolicy => "NetworkPolicy",
            BuiltinKind::StorageClass => "StorageClass",
            BuiltinKind::VolumeAttachment => "VolumeAttachment",
            BuiltinKind::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
            BuiltinKind::Role => "Role",
            BuiltinKind::RoleBinding => "RoleBinding",
            BuiltinKind::ClusterRole => "ClusterRole",
            BuiltinKind::ClusterRoleBinding => "ClusterRoleBinding",
            BuiltinKind::MutatingWebhookConfiguration => "MutatingWebhookConfiguration",
        }
    }

    /// Try to parse a string into a BuiltinKind, returning None if invalid
    pub fn parse_optional(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Get all built-in kinds
    pub fn all() -> &'static [Self] {
        &[
            BuiltinKind::Pod,
            BuiltinKind::Service,
            BuiltinKind::Endpoints,
            BuiltinKind::ConfigMap,
            BuiltinKind::Secret,
            BuiltinKind::ServiceAccount,
            BuiltinKind::Namespace,
            BuiltinKind::Node,
            BuiltinKind::Event,
            BuiltinKind::PersistentVolumeClaim,
            BuiltinKind::PersistentVolume,
            BuiltinKind::Deployment,
            BuiltinKind::ReplicaSet,
            BuiltinKind::StatefulSet,
            BuiltinKind::DaemonSet,
            BuiltinKind::Job,
            BuiltinKind::CronJob,
            BuiltinKind::Ingress,
            BuiltinKind::NetworkPolicy,
            BuiltinKind::StorageClass,
            BuiltinKind::VolumeAttachment,
            BuiltinKind::HorizontalPodAutoscaler,
            BuiltinKind::Role,
            BuiltinKind::RoleBinding,
            BuiltinKind::ClusterRole,
            BuiltinKind::ClusterRoleBinding,
            BuiltinKind::MutatingWebhookConfiguration,
        ]
    }

    /// API group ("" for core)
    pub fn group(&self) -> &'static str {
        match self {
            BuiltinKind::Pod
            | BuiltinKind::Service
            | BuiltinKind::Endpoints
            | BuiltinKind::ConfigMap
            | BuiltinKind::Secret
            | BuiltinKind::ServiceAccount
            | BuiltinKind::Namespace
            | BuiltinKind::Node
            | BuiltinKind::Event
            | BuiltinKind::PersistentVolumeClaim
            | BuiltinKind::PersistentVolume => "",
            BuiltinKind::Deployment
            | BuiltinKind::ReplicaSet
            | BuiltinKind::StatefulSet
            | BuiltinKind::DaemonSet => "apps",
            BuiltinKind::Job | BuiltinKind::CronJob => "batch",
            BuiltinKind::Ingress | BuiltinKind::NetworkPolicy => "networking.k8s.io",
            BuiltinKind::StorageClass | BuiltinKind::VolumeAttachment => "storage.k8s.io",
            BuiltinKind::HorizontalPodAutoscaler => "autoscaling",
            BuiltinKind::Role
            | BuiltinKind::RoleBinding
            | BuiltinKind::ClusterRole
            | BuiltinKind::ClusterRoleBinding => "rbac.authorization.k8s.io",
            BuiltinKind::MutatingWebhookConfiguration => "admissionregistration.k8s.io",
        }
    }

    pub fn version(&self) -> &'static str {
        match self {
            BuiltinKind::HorizontalPodAutoscaler => "v2",
            _ => "v1",
        }
    }

    /// Plural resource name used in REST paths
    pub fn plural(&self) -> &'static str {
        match self {
            BuiltinKind::Pod => "pods",
            BuiltinKind::Service => "services",
            BuiltinKind::Endpoints => "endpoints",
            BuiltinKind::ConfigMap => "configmaps",
            BuiltinKind::Secret => "secrets",
            BuiltinKind::ServiceAccount => "serviceaccounts",
            BuiltinKind::Namespace => "namespaces",
            BuiltinKind::Node => "nodes",
            BuiltinKind::Event => "events",
            BuiltinKind::PersistentVolumeClaim => "persistentvolumeclaims",
            BuiltinKind::PersistentVolume => "persistentvolumes",
            BuiltinKind::Deployment => "deployments",
            BuiltinKind::ReplicaSet => "replicasets",
            BuiltinKind::StatefulSet => "statefulsets",
            BuiltinKind::DaemonSet => "daemonsets",
            BuiltinKind::Job => "jobs",
            BuiltinKind::CronJob => "cronjobs",
            BuiltinKind::Ingress => "ingresses",
            BuiltinKind::NetworkPolicy => "networkpolicies",
            BuiltinKind::StorageClass => "storageclasses",
            BuiltinKind::VolumeAttachment => "volumeattachments",
            BuiltinKind::HorizontalPodAutoscaler => "horizontalpodautoscalers",
            BuiltinKind::Role => "roles",
            BuiltinKind::RoleBinding => "rolebindings",
            BuiltinKind::ClusterRole => "clusterroles",
            BuiltinKind::ClusterRoleBinding => "clusterrolebindings",
            BuiltinKind::MutatingWebhookConfiguration => "mutatingwebhookconfigurations",
        }
    }

    /// Whether objects of this kind live inside a namespace
    pub fn namespaced(&self) -> bool {
        !matches!(
            self,
            BuiltinKind::Namespace
                | BuiltinKind::Node
                | BuiltinKind::PersistentVolume
                | BuiltinKind::StorageClass
                | BuiltinKind::VolumeAttachment
                | BuiltinKind::ClusterRole
                | BuiltinKind::ClusterRoleBinding
                | BuiltinKind::MutatingWebhookConfiguration
        )
    }

    /// kubectl short names
    pub fn short_names(&self) -> &'static [&'static str] {
        match self {
            BuiltinKind::Pod => &["po"],
            BuiltinKind::Service => &["svc"],
            BuiltinKind::Endpoints => &["ep"],
            BuiltinKind::ConfigMap => &["cm"],
            BuiltinKind::ServiceAccount => &["sa"],
            BuiltinKind::Namespace => &["ns"],
            BuiltinKind::Node => &["no"],
            BuiltinKind::Event => &["ev"],
            BuiltinKind::PersistentVolumeClaim => &["pvc"],
            BuiltinKind::PersistentVolume => &["pv"],
            BuiltinKind::Deployment => &["deploy"],
            BuiltinKind::ReplicaSet => &["rs"],
            BuiltinKind::StatefulSet => &["sts"],
            BuiltinKind::DaemonSet => &["ds"],
            BuiltinKind::CronJob => &["cj"],
            BuiltinKind::Ingress => &["ing"],
            BuiltinKind::NetworkPolicy => &["netpol"],
            BuiltinKind::StorageClass => &["sc"],
            BuiltinKind::HorizontalPodAutoscaler => &["hpa"],
            _ => &[],
        }
    }

    /// The resolved identity for this kind
    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::new(
            self.group(),
            self.version(),
            self.plural(),
            self.as_str(),
            self.namespaced(),
        )
    }

    /// Try to parse a string (case-insensitive) into a BuiltinKind
    ///
    /// Accepts the kind, its plural, and kubectl short names.
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        let lower = s.to_lowercase();
        Self::all().iter().copied().find(|kind| {
            kind.as_str().eq_ignore_ascii_case(&lower)
                || kind.plural() == lower
                || kind.short_names().contains(&lower.as_str())
        })
    }
}

impl fmt::Display for BuiltinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<BuiltinKind> for String {
    fn from(kind: BuiltinKind) -> Self {
        kind.as_str().to_string()
    }
}

impl FromStr for BuiltinKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown built-in resource kind: {}", s))
    }
}
