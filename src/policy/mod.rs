//! Namespace visibility gate
//!
//! Every entry point asks the [`PolicyGate`] whether the requesting user may see
//! the target namespace (or cluster-scoped objects) before the first cluster read.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Visibility tier of a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May read every namespace and cluster-scoped objects
    #[default]
    Cluster,
    /// Limited to `allowed_namespaces`
    Namespace,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Cluster => "cluster",
            Role::Namespace => "namespace",
        }
    }

    pub fn parse_optional(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cluster" => Some(Role::Cluster),
            "namespace" | "namespaced" | "namespace-scoped" => Some(Role::Namespace),
            _ => None,
        }
    }
}

/// The caller of a request; supplied per request, never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub allowed_namespaces: Vec<String>,
}

impl User {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: Role::Cluster,
            allowed_namespaces: Vec::new(),
        }
    }

    pub fn namespaced(name: impl Into<String>, namespaces: &[&str]) -> Self {
        Self {
            name: name.into(),
            role: Role::Namespace,
            allowed_namespaces: namespaces.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn has_cluster_scope(&self) -> bool {
        self.role == Role::Cluster
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("namespace is required")]
    NamespaceRequired,

    #[error("user '{user}' may not access namespace '{namespace}'")]
    NamespaceDenied { user: String, namespace: String },

    #[error("user '{user}' may not access cluster-scoped resources")]
    ClusterScopeDenied { user: String },
}

/// Authorizer consulted before cluster reads
#[cfg_attr(test, mockall::automock)]
pub trait PolicyGate: Send + Sync {
    /// `namespace` empty means "all namespaces"; `require_explicit` rejects that
    fn check_namespace(
        &self,
        user: &User,
        namespace: &str,
        require_explicit: bool,
    ) -> Result<(), PolicyError>;

    fn check_cluster_scope(&self, user: &User) -> Result<(), PolicyError>;
}

/// Role-based gate: cluster users see everything, namespace users their list
///
/// An allowed-namespace entry of `*` admits every namespace but still not
/// cluster-scoped reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct RolePolicy;

impl PolicyGate for RolePolicy {
    fn check_namespace(
        &self,
        user: &User,
        namespace: &str,
        require_explicit: bool,
    ) -> Result<(), PolicyError> {
        if namespace.is_empty() {
            if require_explicit {
                return Err(PolicyError::NamespaceRequired);
            }
            return self.check_cluster_scope(user);
        }
        match user.role {
            Role::Cluster => Ok(()),
            Role::Namespace => {
                if user
                    .allowed_namespaces
                    .iter()
                    .any(|allowed| allowed == namespace || allowed == "*")
                {
                    Ok(())
                } else {
                    Err(PolicyError::NamespaceDenied {
                        user: user.name.clone(),
                        namespace: namespace.to_string(),
                    })
                }
            }
        }
    }

    fn check_cluster_scope(&self, user: &User) -> Result<(), PolicyError> {
        if user.has_cluster_scope() {
            Ok(())
        } else {
            Err(PolicyError::ClusterScopeDenied {
                user: user.name.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_user_sees_everything() {
        let user = User::cluster("admin");
        assert!(RolePolicy.check_namespace(&user, "kube-system", true).is_ok());
        assert!(RolePolicy.check_namespace(&user, "", false).is_ok());
        assert!(RolePolicy.check_cluster_scope(&user).is_ok());
    }

    #[test]
    fn test_namespace_user_limited_to_allowed() {
        let user = User::namespaced("dev", &["team-a"]);
        assert!(RolePolicy.check_namespace(&user, "team-a", true).is_ok());
        assert_eq!(
            RolePolicy.check_namespace(&user, "team-b", true),
            Err(PolicyError::NamespaceDenied {
                user: "dev".to_string(),
                namespace: "team-b".to_string()
            })
        );
        assert!(matches!(
            RolePolicy.check_namespace(&user, "", false),
            Err(PolicyError::ClusterScopeDenied { .. })
        ));
        assert_eq!(
            RolePolicy.check_namespace(&user, "", true),
            Err(PolicyError::NamespaceRequired)
        );
    }

    #[test]
    fn test_wildcard_namespace_is_not_cluster_scope() {
        let user = User::namespaced("ops", &["*"]);
        assert!(RolePolicy.check_namespace(&user, "anything", true).is_ok());
        assert!(RolePolicy.check_cluster_scope(&user).is_err());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse_optional("Cluster"), Some(Role::Cluster));
        assert_eq!(Role::parse_optional("namespaced"), Some(Role::Namespace));
        assert_eq!(Role::parse_optional("root"), None);
    }
}
