//! Cross-platform directory path resolution
//!
//! - Linux/macOS: XDG Base Directory specification (~/.config)
//! - Windows: Known Folder API (AppData\Roaming)

use std::path::{Path, PathBuf};

/// Environment variable that replaces the whole config directory
pub const CONFIG_DIR_ENV: &str = "CLUSTERLENS_CONFIG_DIR";

/// Get the configuration directory path
///
/// Checks CLUSTERLENS_CONFIG_DIR first, then falls back to:
/// - Unix (Linux/macOS): XDG_CONFIG_HOME/clusterlens or ~/.config/clusterlens
/// - Windows: %APPDATA%\clusterlens\config
pub fn config_dir() -> PathBuf {
    std::env::var(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(windows)]
            {
                use directories::ProjectDirs;
                ProjectDirs::from("", "", "clusterlens")
                    .map(|dirs| dirs.config_dir().to_path_buf())
                    .unwrap_or_else(|| PathBuf::from(".").join(".config").join("clusterlens"))
            }
            #[cfg(not(windows))]
            {
                use directories::BaseDirs;
                std::env::var("XDG_CONFIG_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        BaseDirs::new()
                            .map(|dirs| dirs.home_dir().join(".config"))
                            .unwrap_or_else(|| PathBuf::from(".").join(".config"))
                    })
                    .join("clusterlens")
            }
        })
}

/// Root config file inside `dir`
pub fn root_config_path_in(dir: &Path) -> PathBuf {
    dir.join("config.yaml")
}

/// Per-context config file inside `dir`
pub fn context_config_path_in(dir: &Path, context: &str) -> PathBuf {
    dir.join("contexts").join(format!("{}.yaml", context))
}

pub fn root_config_path() -> PathBuf {
    root_config_path_in(&config_dir())
}

pub fn context_config_path(context: &str) -> PathBuf {
    context_config_path_in(&config_dir(), context)
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
