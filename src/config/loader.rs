//! Configuration loading and merging logic
//!
//! Layers are merged as YAML documents before deserializing, so a context
//! file only needs the keys it changes.

use super::{paths, schema::Config};
use crate::analysis::OutputFormat;
use anyhow::{Context, Result};
use serde_yaml::{Mapping, Value};
use std::path::Path;

pub const NAMESPACE_ENV: &str = "CLUSTERLENS_NAMESPACE";
pub const GRAPH_TTL_ENV: &str = "CLUSTERLENS_GRAPH_TTL";
pub const OUTPUT_ENV: &str = "CLUSTERLENS_OUTPUT";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with all layers merged
    ///
    /// Precedence order (highest to lowest):
    /// 1. Environment variable overrides
    /// 2. Context-specific config
    /// 3. Root config
    /// 4. Built-in defaults
    pub fn load(context: Option<&str>) -> Result<Config> {
        Self::load_from(&paths::config_dir(), context, |key| std::env::var(key).ok())
    }

    /// Load from an explicit config directory with an explicit environment
    pub fn load_from<F>(dir: &Path, context: Option<&str>, env: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = Value::Mapping(Mapping::new());

        if let Some(root) = Self::read_layer(&paths::root_config_path_in(dir))? {
            merge_values(&mut merged, root);
        }
        if let Some(context_name) = context {
            let path = paths::context_config_path_in(dir, context_name);
            if let Some(layer) = Self::read_layer(&path)? {
                tracing::debug!(context = context_name, "Applying context config layer");
                merge_values(&mut merged, layer);
            }
        }

        let config: Config =
            serde_yaml::from_value(merged).context("Failed to parse merged configuration")?;
        Ok(Self::apply_env_overrides(config, env))
    }

    /// Load configuration from a single file
    pub fn load_file(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load the merged configuration and run the semantic checks
    pub fn validate(context: Option<&str>) -> Result<Config> {
        let config = Self::load(context).context("Failed to load merged configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_defaults() -> Config {
        Config::default()
    }

    /// Raw YAML of one layer; a missing or empty file is no layer
    fn read_layer(path: &Path) -> Result<Option<Value>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let value: Value = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        match value {
            Value::Null => Ok(None),
            Value::Mapping(_) => Ok(Some(value)),
            _ => Err(anyhow::anyhow!(
                "Config file {} must contain a mapping",
                path.display()
            )),
        }
    }

    fn apply_env_overrides<F>(mut config: Config, env: F) -> Config
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(namespace) = env(NAMESPACE_ENV).filter(|ns| !ns.is_empty()) {
            config.default_namespace = namespace;
        }

        if let Some(ttl) = env(GRAPH_TTL_ENV) {
            match ttl.parse::<u64>() {
                Ok(secs) => config.graph.cache_ttl_seconds = secs,
                Err(_) => tracing::warn!(value = %ttl, "Ignoring invalid {}", GRAPH_TTL_ENV),
            }
        }

        if let Some(output) = env(OUTPUT_ENV) {
            match output.parse::<OutputFormat>() {
                Ok(format) => config.output = format,
                Err(e) => tracing::warn!("Ignoring {}: {}", OUTPUT_ENV, e),
            }
        }

        config
    }

    /// Save configuration to a file
    pub fn save(config: &Config, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            paths::ensure_dir(parent)?;
        }

        let yaml =
            serde_yaml::to_string(config).context("Failed to serialize configuration to YAML")?;

        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn save_root(config: &Config) -> Result<()> {
        Self::save(config, &paths::root_config_path())
    }
}

/// Deep-merge `overlay` into `base`; mappings merge key by key, anything else replaces
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
