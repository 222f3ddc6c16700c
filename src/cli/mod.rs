//! CLI command handling module
//!
//! Handles all CLI subcommands and argument parsing.

mod commands;
mod config;
mod logging;
mod version;

pub use commands::{Command, DebugCommand, NamespaceArg, Session, ToolsCommand};
pub use config::{ConfigSubcommand, handle_config_command};
pub use logging::init_logging;
pub use version::display_version;
