//! Configuration system for clusterlens
//!
//! A root YAML file, an optional per-context layer and environment overrides,
//! merged by [`ConfigLoader`].

pub mod loader;
pub mod paths;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{Config, DiscoveryConfig, GraphConfig, UserConfig};

use crate::policy::Role;
use anyhow::Context;

/// Keys understood by `config get` and `config set`
pub const CONFIG_KEYS: &[&str] = &[
    "defaultNamespace",
    "output",
    "requestTimeoutSeconds",
    "graph.cacheTtlSeconds",
    "graph.maxHops",
    "graph.includeMesh",
    "discovery.ttlSeconds",
    "user.name",
    "user.role",
    "user.allowedNamespaces",
];

/// Get a configuration value by key (dot notation)
pub fn get_config_value(config: &Config, key: &str) -> anyhow::Result<String> {
    match key {
        "defaultNamespace" => Ok(config.default_namespace.clone()),
        "output" => Ok(config.output.to_string()),
        "requestTimeoutSeconds" => Ok(config.request_timeout_seconds.to_string()),
        "graph.cacheTtlSeconds" => Ok(config.graph.cache_ttl_seconds.to_string()),
        "graph.maxHops" => Ok(config.graph.max_hops.to_string()),
        "graph.includeMesh" => Ok(config.graph.include_mesh.to_string()),
        "discovery.ttlSeconds" => Ok(config.discovery.ttl_seconds.to_string()),
        "user.name" => Ok(config.user.name.clone()),
        "user.role" => Ok(config.user.role.as_str().to_string()),
        "user.allowedNamespaces" => Ok(config.user.allowed_namespaces.join(",")),
        _ => Err(anyhow::anyhow!("Unknown configuration key: {}", key)),
    }
}

/// Set a configuration value by key (dot notation)
pub fn set_config_value(config: &mut Config, key: &str, value: &str) -> anyhow::Result<()> {
    match key {
        "defaultNamespace" => {
            config.default_namespace = value.to_string();
        }
        "output" => {
            config.output = value.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        }
        "requestTimeoutSeconds" => {
            config.request_timeout_seconds = value
                .parse()
                .context("requestTimeoutSeconds must be a number of seconds")?;
        }
        "graph.cacheTtlSeconds" => {
            config.graph.cache_ttl_seconds = value
                .parse()
                .context("graph.cacheTtlSeconds must be a number of seconds")?;
        }
        "graph.maxHops" => {
            config.graph.max_hops = value
                .parse()
                .context("graph.maxHops must be a positive number")?;
        }
        "graph.includeMesh" => {
            config.graph.include_mesh = value
                .parse()
                .context("graph.includeMesh must be 'true' or 'false'")?;
        }
        "discovery.ttlSeconds" => {
            config.discovery.ttl_seconds = value
                .parse()
                .context("discovery.ttlSeconds must be a number of seconds")?;
        }
        "user.name" => {
            config.user.name = value.to_string();
        }
        "user.role" => {
            config.user.role = Role::parse_optional(value).ok_or_else(|| {
                anyhow::anyhow!("user.role must be 'cluster' or 'namespace', got '{}'", value)
            })?;
        }
        "user.allowedNamespaces" => {
            config.user.allowed_namespaces = value
                .split(',')
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .map(str::to_string)
                .collect();
        }
        _ => {
            return Err(anyhow::anyhow!("Unknown configuration key: {}", key));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::OutputFormat;

    #[test]
    fn test_every_key_round_trips_through_get() {
        let config = Config::default();
        for key in CONFIG_KEYS {
            assert!(get_config_value(&config, key).is_ok(), "key {}", key);
        }
        assert!(get_config_value(&config, "ui.skin").is_err());
    }

    #[test]
    fn test_set_values() {
        let mut config = Config::default();
        set_config_value(&mut config, "output", "yaml").unwrap();
        set_config_value(&mut config, "graph.includeMesh", "true").unwrap();
        set_config_value(&mut config, "user.role", "namespace").unwrap();
        set_config_value(&mut config, "user.allowedNamespaces", "shop, payments").unwrap();

        assert_eq!(config.output, OutputFormat::Yaml);
        assert!(config.graph.include_mesh);
        assert_eq!(config.user.role, Role::Namespace);
        assert_eq!(
            get_config_value(&config, "user.allowedNamespaces").unwrap(),
            "shop,payments"
        );
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = Config::default();
        assert!(set_config_value(&mut config, "graph.maxHops", "many").is_err());
        assert!(set_config_value(&mut config, "user.role", "admin").is_err());
        assert!(set_config_value(&mut config, "output", "xml").is_err());
        assert_eq!(config, Config::default());
    }
}
