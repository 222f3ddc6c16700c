//! Scheduling diagnostics
//!
//! Explains why pods stay `Pending`: the scheduler's `PodScheduled` condition
//! message is matched against known failure patterns, and node selectors are
//! checked against the node inventory when the caller may read nodes.

use super::common::{Probe, finish, isolate, record_missing};
use crate::analysis::{Analysis, Severity};
use crate::error::DiagnosticError;
use crate::kube::{ListQuery, ObjectDoc};
use crate::models::BuiltinKind;
use crate::services::{DiagnosticService, RequestContext};
use crate::trace::selectors::{self, SelectorExt};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingRequest {
    pub namespace: String,
    #[serde(default)]
    pub pod: Option<String>,
}

/// Scheduler message fragment → (cause title, severity)
const SCHEDULER_PATTERNS: &[(&str, &str, Severity)] = &[
    ("Insufficient", "Insufficient resources", Severity::High),
    ("didn't match Pod's node affinity", "Node selector/affinity mismatch", Severity::High),
    ("didn't match node selector", "Node selector/affinity mismatch", Severity::High),
    ("untolerated taint", "Untolerated taints", Severity::Medium),
    ("had taint", "Untolerated taints", Severity::Medium),
    ("unbound immediate PersistentVolumeClaims", "Unbound PVC", Severity::High),
    ("persistentvolumeclaim", "Unbound PVC", Severity::High),
    ("volume node affinity conflict", "Volume node affinity conflict", Severity::High),
];

/// Cause titles matched by a scheduler message, in pattern order, deduplicated
pub fn classify_scheduler_message(message: &str) -> Vec<(&'static str, Severity)> {
    let mut matched: Vec<(&'static str, Severity)> = Vec::new();
    for (needle, title, severity) in SCHEDULER_PATTERNS {
        if message.contains(*needle) && !matched.iter().any(|(t, _)| t == title) {
            matched.push((*title, *severity));
        }
    }
    matched
}

pub async fn debug_scheduling(
    service: &DiagnosticService,
    ctx: &RequestContext,
    request: &SchedulingRequest,
) -> Result<Analysis, DiagnosticError> {
    service.authorize(ctx, &request.namespace)?;
    let probe = Probe::new(service, ctx);
    let mut analysis = Analysis::new("scheduling", &request.namespace);
    let result = run(&probe, request, &mut analysis).await;
    finish(analysis, result, "scheduling issues")
}

async fn run(
    probe: &Probe<'_>,
    request: &SchedulingRequest,
    analysis: &mut Analysis,
) -> Result<(), DiagnosticError> {
    let ns = request.namespace.as_str();
    let pods = match request.pod.as_deref().filter(|p| !p.is_empty()) {
        Some(name) => match probe.get(BuiltinKind::Pod, ns, name).await? {
            Some(pod) => vec![pod],
            None => {
                record_missing(analysis, BuiltinKind::Pod, ns, name);
                return Ok(());
            }
        },
        None => {
            let mut pending: Vec<ObjectDoc> = probe
                .list(BuiltinKind::Pod, ns, ListQuery::fields("status.phase=Pending"))
                .await?;
            pending.sort_by(|a, b| a.name().cmp(b.name()));
            pending
        }
    };
    if pods.is_empty() {
        analysis.add_evidence("pods", "no pending pods in scope");
        return Ok(());
    }

    let nodes = if probe.has_cluster_scope() {
        Some(probe.list(BuiltinKind::Node, "", ListQuery::all()).await?)
    } else {
        analysis.add_requires_cluster_role("nodes");
        None
    };

    for pod in &pods {
        let reference = BuiltinKind::Pod.identity().reference(ns, pod.name());
        let result = diagnose_pod(probe, analysis, pod, &reference, nodes.as_deref()).await;
        isolate(analysis, &reference, result)?;
    }
    Ok(())
}

async fn diagnose_pod(
    probe: &Probe<'_>,
    analysis: &mut Analysis,
    pod: &ObjectDoc,
    reference: &str,
    nodes: Option<&[ObjectDoc]>,
) -> Result<(), DiagnosticError> {
    analysis.add_resource(reference);
    let phase = pod.str_at(&["status", "phase"]).unwrap_or("Unknown");
    let scheduled = pod.condition("PodScheduled");
    analysis.add_evidence(
        format!("pod:{}", pod.name()),
        json!({
            "phase": phase,
            "nodeName": pod.str_at(&["spec", "nodeName"]),
            "podScheduled": scheduled,
        }),
    );

    match scheduled.and_then(|c| c.get("status")).and_then(Value::as_str) {
        Some("False") => {
            let message = scheduled
                .and_then(|c| c.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("");
            let matched = classify_scheduler_message(message);
            if matched.is_empty() {
                analysis.add_cause(
                    "Unschedulable",
                    format!("{}: {}", pod.name(), message),
                    Severity::Medium,
                );
            }
            for (title, severity) in matched {
                analysis.add_cause(title, format!("{}: {}", pod.name(), message), severity);
                if title == "Unbound PVC" {
                    analysis.add_next_check(format!(
                        "run storage diagnostics with pod {}",
                        pod.name()
                    ));
                }
            }
        }
        Some("True") if phase == "Pending" => {
            analysis.add_evidence(
                format!("note:{}", pod.name()),
                "pod is scheduled but still pending; check image pulls and volume mounts",
            );
        }
        _ => {}
    }

    let node_selector = pod.string_map_at(&["spec", "nodeSelector"]);
    if !node_selector.is_empty() {
        if let Some(nodes) = nodes {
            let selector = selectors::from_map(&node_selector);
            let mut matching: Vec<String> = nodes
                .iter()
                .filter(|n| selector.matches(&n.labels()))
                .map(|n| n.name().to_string())
                .collect();
            matching.sort();
            if matching.is_empty() {
                analysis.add_cause(
                    "No node matches nodeSelector",
                    format!("no node carries labels {}", selector),
                    Severity::High,
                );
            }
            analysis.add_evidence(format!("nodesMatchingSelector:{}", pod.name()), matching);
        }
    }

    probe.attach_events(analysis, pod, reference).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_insufficient_and_taints() {
        let message = "0/3 nodes are available: 1 Insufficient cpu, 2 node(s) had untolerated taint {dedicated: gpu}.";
        let matched = classify_scheduler_message(message);
        assert_eq!(
            matched,
            vec![
                ("Insufficient resources", Severity::High),
                ("Untolerated taints", Severity::Medium)
            ]
        );
    }

    #[test]
    fn test_classify_unknown_message() {
        assert!(classify_scheduler_message("something else").is_empty());
    }
}
