//! Version command handler

use crate::analysis::{OutputFormat, Renderer};
use anyhow::Result;
use serde_json::{Value, json};

/// Kubernetes API level the typed client is compiled against
const KUBERNETES_API: &str = "1.31";

pub fn version_info() -> Value {
    json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "license": env!("CARGO_PKG_LICENSE"),
        "repository": env!("CARGO_PKG_REPOSITORY"),
        "kubernetesApi": KUBERNETES_API,
    })
}

/// Print version information in the selected output format
pub fn display_version(format: OutputFormat) -> Result<()> {
    let text = format.renderer().render_value(&version_info())?;
    println!("{}", text.trim_end());
    Ok(())
}
