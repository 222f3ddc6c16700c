//! Rendered analysis and output renderers

use super::evidence::Severity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Stable output shape of an analysis
///
/// Field order is fixed by declaration, so serialized output is deterministic
/// for a given sequence of accumulator calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedAnalysis {
    pub kind: String,
    pub namespace: String,
    pub evidence: Vec<RenderedEvidence>,
    pub resources: Vec<String>,
    pub likely_root_causes: Vec<RenderedCause>,
    pub next_checks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedEvidence {
    pub label: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedCause {
    pub title: String,
    pub detail: String,
    pub severity: Severity,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("JSON rendering failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML rendering failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Turns structured values into text
pub trait Renderer: Send + Sync {
    fn render_value(&self, value: &Value) -> Result<String, RenderError>;

    fn render_analysis(&self, analysis: &RenderedAnalysis) -> Result<String, RenderError>;
}

/// Pretty-printed JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render_value(&self, value: &Value) -> Result<String, RenderError> {
        Ok(serde_json::to_string_pretty(value)?)
    }

    fn render_analysis(&self, analysis: &RenderedAnalysis) -> Result<String, RenderError> {
        Ok(serde_json::to_string_pretty(analysis)?)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct YamlRenderer;

impl Renderer for YamlRenderer {
    fn render_value(&self, value: &Value) -> Result<String, RenderError> {
        Ok(serde_yaml::to_string(value)?)
    }

    fn render_analysis(&self, analysis: &RenderedAnalysis) -> Result<String, RenderError> {
        Ok(serde_yaml::to_string(analysis)?)
    }
}

/// Output format selected by configuration or `--output`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
        }
    }

    pub fn renderer(&self) -> Box<dyn Renderer> {
        match self {
            OutputFormat::Json => Box::new(JsonRenderer),
            OutputFormat::Yaml => Box::new(YamlRenderer),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            other => Err(format!("Unknown output format: {} (expected json or yaml)", other)),
        }
    }
}
