//! Request-level error taxonomy
//!
//! Every fatal outcome of a diagnostic request or capability invocation is a
//! [`DiagnosticError`]. Callers present it through [`DiagnosticError::to_payload`]
//! instead of inspecting library errors.

use crate::analysis::{Analysis, Redactor};
use crate::kube::ClusterError;
use crate::policy::PolicyError;
use crate::resolve::ResolutionError;
use crate::services::context::Interrupted;
use crate::tools::Safety;
use crate::trace::GraphError;
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiagnosticError {
    /// Missing or malformed argument
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("access denied: {0}")]
    Policy(#[from] PolicyError),

    #[error("{0}")]
    Resolution(#[from] ResolutionError),

    /// The object a request is rooted at does not exist
    #[error("{reference} not found")]
    NotFound { reference: String },

    #[error("capability '{capability}' is classified {safety} and requires confirmation")]
    ConfirmationRequired { capability: String, safety: Safety },

    #[error("capability '{0}' is not registered")]
    CapabilityUnavailable(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Cancelled or timed out; carries whatever was accumulated so far
    #[error("{reason}")]
    Cancelled {
        reason: Interrupted,
        partial: Option<Box<Analysis>>,
    },
}

impl DiagnosticError {
    pub fn validation(message: impl Into<String>) -> Self {
        DiagnosticError::Validation(message.into())
    }

    pub fn cancelled(reason: Interrupted, partial: Analysis) -> Self {
        DiagnosticError::Cancelled {
            reason,
            partial: Some(Box::new(partial)),
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            DiagnosticError::Validation(_) => "validation",
            DiagnosticError::Policy(_) => "policy",
            DiagnosticError::Resolution(_) => "resolution",
            DiagnosticError::NotFound { .. } => "not_found",
            DiagnosticError::ConfirmationRequired { .. } => "confirmation_required",
            DiagnosticError::CapabilityUnavailable(_) => "capability_unavailable",
            DiagnosticError::Cluster(_) => "cluster",
            DiagnosticError::Cancelled { .. } => "cancelled",
        }
    }

    /// Structured error value, with the partial analysis when cancelled
    pub fn to_payload(&self, redactor: &dyn Redactor) -> Value {
        let mut payload = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        if let DiagnosticError::Cancelled {
            partial: Some(analysis),
            ..
        } = self
        {
            if let (Some(map), Ok(rendered)) = (
                payload.as_object_mut(),
                serde_json::to_value(analysis.render(redactor)),
            ) {
                map.insert("partial".to_string(), rendered);
            }
        }
        payload
    }

    /// Partial analysis carried by a cancellation
    pub fn partial(&self) -> Option<&Analysis> {
        match self {
            DiagnosticError::Cancelled { partial, .. } => partial.as_deref(),
            _ => None,
        }
    }
}

impl From<GraphError> for DiagnosticError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Resolution(e) => DiagnosticError::Resolution(e),
            GraphError::RootNotFound { reference } => DiagnosticError::NotFound { reference },
            GraphError::Root { source, .. } => DiagnosticError::Cluster(source),
            GraphError::Cancelled {
                reason,
                partial,
                warnings,
            } => {
                let mut analysis = Analysis::new("graph", "");
                analysis.add_evidence(
                    "partialGraph",
                    serde_json::to_value(&partial).unwrap_or(Value::Null),
                );
                if !warnings.is_empty() {
                    analysis.add_evidence("warnings", warnings);
                }
                DiagnosticError::cancelled(reason, analysis)
            }
        }
    }
}
