//! Configuration schema definitions
//!
//! Defines the structure of configuration files using serde for serialization.

use crate::analysis::OutputFormat;
use crate::constants::{
    DEFAULT_DISCOVERY_TTL_SECS, DEFAULT_GRAPH_TTL_SECS, DEFAULT_MAX_HOPS,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
use crate::policy::{Role, User};
use crate::services::EngineSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Namespace used when a command does not pass `-n`
    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    #[serde(default)]
    pub output: OutputFormat,

    /// Per-request deadline
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Identity the CLI acts as
    #[serde(default)]
    pub user: UserConfig,
}

/// Graph builder and cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GraphConfig {
    #[serde(default = "default_graph_ttl")]
    pub cache_ttl_seconds: u64,

    /// Traversal depth from the root object
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,

    /// Add Gateway API and service mesh edges by default
    #[serde(default)]
    pub include_mesh: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_graph_ttl(),
            max_hops: default_max_hops(),
            include_mesh: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_ttl")]
    pub ttl_seconds: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_discovery_ttl(),
        }
    }
}

/// Caller identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserConfig {
    #[serde(default = "default_user_name")]
    pub name: String,

    #[serde(default)]
    pub role: Role,

    /// Only consulted for the `namespace` role
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_namespaces: Vec<String>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            name: default_user_name(),
            role: Role::default(),
            allowed_namespaces: Vec::new(),
        }
    }
}

impl Config {
    /// Engine settings derived from this configuration
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            graph_ttl: Duration::from_secs(self.graph.cache_ttl_seconds),
            discovery_ttl: Duration::from_secs(self.discovery.ttl_seconds),
            max_hops: self.graph.max_hops,
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
            include_mesh: self.graph.include_mesh,
        }
    }

    pub fn user(&self) -> User {
        User {
            name: self.user.name.clone(),
            role: self.user.role,
            allowed_namespaces: self.user.allowed_namespaces.clone(),
        }
    }

    /// Semantic checks that serde cannot express
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_namespace.trim().is_empty() {
            anyhow::bail!("defaultNamespace must not be empty");
        }
        if self.request_timeout_seconds == 0 {
            anyhow::bail!("requestTimeoutSeconds must be greater than 0");
        }
        if self.graph.max_hops == 0 {
            anyhow::bail!("graph.maxHops must be at least 1");
        }
        if self.user.role == Role::Namespace && self.user.allowed_namespaces.is_empty() {
            anyhow::bail!("user.allowedNamespaces is required for the namespace role");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_namespace: default_namespace(),
            output: OutputFormat::default(),
            request_timeout_seconds: default_request_timeout(),
            graph: GraphConfig::default(),
            discovery: DiscoveryConfig::default(),
            user: UserConfig::default(),
        }
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_graph_ttl() -> u64 {
    DEFAULT_GRAPH_TTL_SECS
}

fn default_max_hops() -> usize {
    DEFAULT_MAX_HOPS
}

fn default_discovery_ttl() -> u64 {
    DEFAULT_DISCOVERY_TTL_SECS
}

fn default_user_name() -> String {
    "clusterlens".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.default_namespace, "default");
        assert_eq!(config.graph.cache_ttl_seconds, 30);
        assert_eq!(config.graph.max_hops, 4);
        assert!(!config.graph.include_mesh);
        assert_eq!(config.discovery.ttl_seconds, 300);
        assert_eq!(config.user.role, Role::Cluster);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
defaultNamespace: shop
graph:
  maxHops: 2
user:
  role: namespace
  allowedNamespaces: [shop]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.default_namespace, "shop");
        assert_eq!(config.graph.max_hops, 2);
        assert_eq!(config.graph.cache_ttl_seconds, 30);
        assert_eq!(config.output, OutputFormat::Json);
        assert!(!config.user().has_cluster_scope());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let yaml = "graph:\n  maxHop: 2\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_validate_namespace_role_needs_namespaces() {
        let mut config = Config::default();
        config.user.role = Role::Namespace;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("allowedNamespaces"));
    }

    #[test]
    fn test_engine_settings_conversion() {
        let mut config = Config::default();
        config.graph.cache_ttl_seconds = 5;
        config.graph.include_mesh = true;
        let settings = config.engine_settings();
        assert_eq!(settings.graph_ttl, Duration::from_secs(5));
        assert!(settings.include_mesh);
        assert_eq!(settings.max_hops, 4);
    }
}
