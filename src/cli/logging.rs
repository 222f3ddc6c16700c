//! Logging initialization

use anyhow::{Context, Result};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
fn default_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("clusterlens=debug,kube=info")
        } else {
            EnvFilter::new("warn")
        }
    })
}

/// Initialize logging
///
/// Logs go to stderr so stdout stays machine-readable. With `log_file` they
/// are appended to that file instead, without ANSI codes.
pub fn init_logging(debug: bool, log_file: Option<&Path>) -> Result<()> {
    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory: {}", parent.display())
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;

            tracing_subscriber::fmt()
                .with_writer(file)
                .with_env_filter(default_filter(debug))
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(default_filter(debug))
                .with_target(debug)
                .init();
        }
    }
    Ok(())
}
