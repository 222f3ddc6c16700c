//! API discovery documents
//!
//! A discovery document lists every resource the cluster serves, in the order the
//! API server reported them, together with the groups whose discovery failed.
//! A document with failed groups is a *partial* discovery: still usable for every
//! group that answered.

use crate::models::{BuiltinKind, ResourceIdentity};
use serde::{Deserialize, Serialize};

/// A single discovered API resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub identity: ResourceIdentity,
    /// Singular name ("deployment"), may be empty for older servers
    pub singular: String,
    pub short_names: Vec<String>,
}

impl DiscoveredResource {
    pub fn new(identity: ResourceIdentity) -> Self {
        let singular = identity.kind.to_lowercase();
        Self {
            identity,
            singular,
            short_names: Vec::new(),
        }
    }

    pub fn with_short_names(mut self, short_names: &[&str]) -> Self {
        self.short_names = short_names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Case-insensitive match on kind, plural, singular or short name
    pub fn matches(&self, name: &str) -> bool {
        self.identity.kind.eq_ignore_ascii_case(name)
            || self.identity.resource.eq_ignore_ascii_case(name)
            || (!self.singular.is_empty() && self.singular.eq_ignore_ascii_case(name))
            || self.short_names.iter().any(|s| s.eq_ignore_ascii_case(name))
    }
}

/// A group whose discovery request failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedGroup {
    pub group: String,
    pub reason: String,
}

/// Result of walking the cluster's discovery endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDoc {
    pub resources: Vec<DiscoveredResource>,
    pub failed_groups: Vec<FailedGroup>,
}

impl DiscoveryDoc {
    /// Discovery document containing every built-in kind
    pub fn builtin() -> Self {
        let resources = BuiltinKind::all()
            .iter()
            .map(|kind| {
                DiscoveredResource::new(kind.identity()).with_short_names(kind.short_names())
            })
            .collect();
        Self {
            resources,
            failed_groups: Vec::new(),
        }
    }

    pub fn push(&mut self, resource: DiscoveredResource) {
        self.resources.push(resource);
    }

    pub fn record_failure(&mut self, group: impl Into<String>, reason: impl Into<String>) {
        self.failed_groups.push(FailedGroup {
            group: group.into(),
            reason: reason.into(),
        });
    }

    /// Some groups failed but others answered
    pub fn is_partial(&self) -> bool {
        !self.failed_groups.is_empty() && !self.resources.is_empty()
    }

    /// Nothing answered at all
    pub fn is_total_failure(&self) -> bool {
        !self.failed_groups.is_empty() && self.resources.is_empty()
    }

    pub fn group_failed(&self, group: &str) -> Option<&FailedGroup> {
        self.failed_groups.iter().find(|f| f.group == group)
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.resources.iter().any(|r| r.identity.group == group)
    }

    /// Warning strings naming every unreachable group
    pub fn warnings(&self) -> Vec<String> {
        self.failed_groups
            .iter()
            .map(|f| format!("discovery failed for group {}: {}", f.group, f.reason))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_document_is_complete() {
        let doc = DiscoveryDoc::builtin();
        assert_eq!(doc.resources.len(), BuiltinKind::all().len());
        assert!(!doc.is_partial());
        assert!(doc.has_group("apps"));
    }

    #[test]
    fn test_partial_vs_total_failure() {
        let mut doc = DiscoveryDoc::default();
        doc.record_failure("metrics.k8s.io", "service unavailable");
        assert!(doc.is_total_failure());
        assert!(!doc.is_partial());

        doc.push(DiscoveredResource::new(BuiltinKind::Pod.identity()));
        assert!(doc.is_partial());
        assert_eq!(doc.warnings().len(), 1);
        assert!(doc.warnings()[0].contains("metrics.k8s.io"));
    }

    #[test]
    fn test_resource_matching_names() {
        let svc = DiscoveredResource::new(BuiltinKind::Service.identity()).with_short_names(&["svc"]);
        assert!(svc.matches("Service"));
        assert!(svc.matches("services"));
        assert!(svc.matches("SVC"));
        assert!(svc.matches("service"));
        assert!(!svc.matches("pods"));
    }
}
