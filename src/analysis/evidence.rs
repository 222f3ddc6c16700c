//! Evidence accumulator
//!
//! An [`Analysis`] is created per request and only ever grows: evidence,
//! touched resources, likely root causes and next checks are appended in call
//! order and never removed.

use super::redact::Redactor;
use super::render::{RenderedAnalysis, RenderedCause, RenderedEvidence};
use crate::constants::REQUIRES_CLUSTER_ROLE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Severity of a likely root cause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One labelled fact; labels may repeat
#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
    pub label: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikelyRootCause {
    pub title: String,
    pub detail: String,
    pub severity: Severity,
}

/// Per-request evidence accumulator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    kind: String,
    namespace: String,
    evidence: Vec<Evidence>,
    resources: Vec<String>,
    causes: Vec<LikelyRootCause>,
    next_checks: Vec<String>,
}

impl Analysis {
    /// `kind` names the diagnostic ("storage", "crashloop", ...)
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn add_evidence(&mut self, label: impl Into<String>, payload: impl Into<Value>) {
        self.evidence.push(Evidence {
            label: label.into(),
            payload: payload.into(),
        });
    }

    /// Record a touched object; each reference is kept once
    pub fn add_resource(&mut self, reference: impl Into<String>) {
        let reference = reference.into();
        if !self.resources.contains(&reference) {
            self.resources.push(reference);
        }
    }

    /// Causes are kept as given, duplicates included
    pub fn add_cause(
        &mut self,
        title: impl Into<String>,
        detail: impl Into<String>,
        severity: Severity,
    ) {
        self.causes.push(LikelyRootCause {
            title: title.into(),
            detail: detail.into(),
            severity,
        });
    }

    /// Suggested follow-up; repeated suggestions are kept once
    pub fn add_next_check(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !self.next_checks.contains(&text) {
            self.next_checks.push(text);
        }
    }

    /// Append everything another analysis accumulated, keeping this one's kind
    pub fn absorb(&mut self, other: &Analysis) {
        self.evidence.extend(other.evidence.iter().cloned());
        for reference in &other.resources {
            self.add_resource(reference.clone());
        }
        self.causes.extend(other.causes.iter().cloned());
        for check in &other.next_checks {
            self.add_next_check(check.clone());
        }
    }

    /// Evidence entry for a cluster-scoped check the caller may not run
    pub fn add_requires_cluster_role(&mut self, label: impl Into<String>) {
        self.add_evidence(label, REQUIRES_CLUSTER_ROLE);
    }

    /// Make "nothing wrong" visible when no cause was recorded
    pub fn conclude(&mut self, what: &str) {
        if self.causes.is_empty() {
            self.add_evidence("summary", format!("no explicit {} found", what));
        }
    }

    pub fn evidence(&self) -> &[Evidence] {
        &self.evidence
    }

    pub fn evidence_with_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a Evidence> {
        self.evidence.iter().filter(move |e| e.label == label)
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn causes(&self) -> &[LikelyRootCause] {
        &self.causes
    }

    pub fn has_cause(&self, title: &str) -> bool {
        self.causes.iter().any(|c| c.title == title)
    }

    pub fn cause(&self, title: &str) -> Option<&LikelyRootCause> {
        self.causes.iter().find(|c| c.title == title)
    }

    pub fn next_checks(&self) -> &[String] {
        &self.next_checks
    }

    /// Render to the stable output shape
    ///
    /// Evidence payloads pass through `redactor`. Causes are ordered by
    /// severity, highest first, keeping call order within a severity.
    pub fn render(&self, redactor: &dyn Redactor) -> RenderedAnalysis {
        let mut causes: Vec<&LikelyRootCause> = self.causes.iter().collect();
        causes.sort_by(|a, b| b.severity.cmp(&a.severity));

        RenderedAnalysis {
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            evidence: self
                .evidence
                .iter()
                .map(|e| RenderedEvidence {
                    label: e.label.clone(),
                    payload: redactor.redact(&e.payload),
                })
                .collect(),
            resources: self.resources.clone(),
            likely_root_causes: causes
                .into_iter()
                .map(|c| RenderedCause {
                    title: c.title.clone(),
                    detail: c.detail.clone(),
                    severity: c.severity,
                })
                .collect(),
            next_checks: self.next_checks.clone(),
        }
    }
}
