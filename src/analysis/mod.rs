//! Evidence and root-cause analysis
//!
//! Diagnostic handlers accumulate evidence into an [`Analysis`]; rendering
//! redacts payloads and ranks causes into a [`RenderedAnalysis`].

pub mod evidence;
pub mod redact;
pub mod render;

pub use evidence::{Analysis, Evidence, LikelyRootCause, Severity};
pub use redact::{NoRedaction, Redactor, SecretRedactor};
pub use render::{
    JsonRenderer, OutputFormat, RenderError, RenderedAnalysis, RenderedCause, RenderedEvidence,
    Renderer, YamlRenderer,
};
