//! `config` subcommand handlers

use crate::config::{self, ConfigLoader, paths};
use anyhow::{Context, Result};
use clap::Subcommand;

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigSubcommand {
    /// Get configuration value
    Get {
        /// Configuration key (e.g., "defaultNamespace", "graph.maxHops")
        key: Option<String>,
    },
    /// Set a value in the root configuration file
    Set {
        /// Configuration key (e.g., "defaultNamespace", "graph.maxHops")
        key: String,
        value: String,
    },
    /// List all configuration, merged
    List,
    /// Show configuration file path
    Path,
    /// Validate configuration
    Validate,
}

/// Handle configuration subcommands
///
/// `context` selects the per-context layer for reads.
pub fn handle_config_command(cmd: ConfigSubcommand, context: Option<&str>) -> Result<()> {
    match cmd {
        ConfigSubcommand::Get { key } => {
            let config = ConfigLoader::load(context).context("Failed to load configuration")?;
            match key {
                Some(key) => println!("{}", config::get_config_value(&config, &key)?),
                None => print!(
                    "{}",
                    serde_yaml::to_string(&config).context("Failed to serialize configuration")?
                ),
            }
        }
        ConfigSubcommand::Set { key, value } => {
            let root_path = paths::root_config_path();
            let mut config = if root_path.exists() {
                ConfigLoader::load_file(&root_path)?
            } else {
                ConfigLoader::load_defaults()
            };

            config::set_config_value(&mut config, &key, &value)
                .with_context(|| format!("Failed to set {} = {}", key, value))?;
            config.validate()?;

            ConfigLoader::save(&config, &root_path).context("Failed to save configuration")?;
            println!("Configuration saved");
        }
        ConfigSubcommand::List => {
            let config = ConfigLoader::load(context).context("Failed to load configuration")?;
            print!(
                "{}",
                serde_yaml::to_string(&config).context("Failed to serialize configuration")?
            );
        }
        ConfigSubcommand::Path => {
            println!("{}", paths::root_config_path().display());
            if let Some(context) = context {
                println!("{}", paths::context_config_path(context).display());
            }
        }
        ConfigSubcommand::Validate => {
            ConfigLoader::validate(context).context("Configuration validation failed")?;
            println!("Configuration is valid");
        }
    }

    Ok(())
}
