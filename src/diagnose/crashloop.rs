//! Crash-loop diagnostics
//!
//! Inspects container statuses of the pods in scope for restart loops, OOM
//! kills, failing exits, image pulls and config errors, then adds pod events,
//! the owner chain from the relationship graph and, when a `pod_logs`
//! capability is registered, the previous container logs.

use super::common::{Probe, events_mention, finish, isolate, record_missing};
use crate::analysis::{Analysis, Severity};
use crate::error::DiagnosticError;
use crate::kube::{ListQuery, ObjectDoc};
use crate::models::BuiltinKind;
use crate::services::{DiagnosticService, RequestContext};
use crate::tools::ToolInvoker;
use crate::trace::{GraphQuery, Relation, node_id};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashLoopRequest {
    pub namespace: String,
    #[serde(default)]
    pub pod: Option<String>,
    /// Label selector narrowing the pods checked when no pod is named
    #[serde(default)]
    pub selector: Option<String>,
}

const IMAGE_PULL_REASONS: &[&str] = &["ImagePullBackOff", "ErrImagePull", "InvalidImageName"];

pub async fn debug_crashloop(
    service: &DiagnosticService,
    ctx: &RequestContext,
    request: &CrashLoopRequest,
    invoker: Option<&ToolInvoker>,
) -> Result<Analysis, DiagnosticError> {
    service.authorize(ctx, &request.namespace)?;
    let probe = Probe::new(service, ctx);
    let mut analysis = Analysis::new("crashloop", &request.namespace);
    let result = run(&probe, request, invoker, &mut analysis).await;
    finish(analysis, result, "crash loops")
}

async fn run(
    probe: &Probe<'_>,
    request: &CrashLoopRequest,
    invoker: Option<&ToolInvoker>,
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
            let query = match request.selector.as_deref() {
                Some(selector) if !selector.is_empty() => ListQuery::labels(selector),
                _ => ListQuery::all(),
            };
            let mut pods: Vec<ObjectDoc> = probe
                .list(BuiltinKind::Pod, ns, query)
                .await?
                .into_iter()
                .filter(is_unhealthy)
                .collect();
            pods.sort_by(|a, b| a.name().cmp(b.name()));
            pods
        }
    };
    if pods.is_empty() {
        analysis.add_evidence("pods", "no restarting or failing pods in scope");
        return Ok(());
    }

    for pod in &pods {
        let reference = BuiltinKind::Pod.identity().reference(ns, pod.name());
        let result = diagnose_pod(probe, analysis, pod, &reference, invoker).await;
        isolate(analysis, &reference, result)?;
    }
    Ok(())
}

fn container_statuses(pod: &ObjectDoc) -> impl Iterator<Item = &Value> {
    pod.array_at(&["status", "initContainerStatuses"])
        .iter()
        .chain(pod.array_at(&["status", "containerStatuses"]))
}

fn waiting_reason(status: &Value) -> Option<&str> {
    status.pointer("/state/waiting/reason").and_then(Value::as_str)
}

/// Pods worth a look: restarts, waiting on an error, or failed
fn is_unhealthy(pod: &ObjectDoc) -> bool {
    pod.str_at(&["status", "phase"]) == Some("Failed")
        || container_statuses(pod).any(|s| {
            s.get("restartCount").and_then(Value::as_i64).unwrap_or(0) > 0
                || waiting_reason(s).is_some_and(|r| r != "ContainerCreating" && r != "PodInitializing")
        })
}

async fn diagnose_pod(
    probe: &Probe<'_>,
    analysis: &mut Analysis,
    pod: &ObjectDoc,
    reference: &str,
    invoker: Option<&ToolInvoker>,
) -> Result<(), DiagnosticError> {
    analysis.add_resource(reference);
    let events = probe.attach_events(analysis, pod, reference).await?;
    let pod_name = pod.name();

    for status in container_statuses(pod) {
        let container = status.get("name").and_then(Value::as_str).unwrap_or("?");
        let restarts = status.get("restartCount").and_then(Value::as_i64).unwrap_or(0);
        analysis.add_evidence(
            format!("container:{}/{}", pod_name, container),
            json!({
                "ready": status.get("ready"),
                "restartCount": restarts,
                "state": status.get("state"),
                "lastState": status.get("lastState"),
            }),
        );

        match waiting_reason(status) {
            Some("CrashLoopBackOff") => analysis.add_cause(
                "CrashLoopBackOff",
                format!(
                    "container {} in pod {} restarted {} times",
                    container, pod_name, restarts
                ),
                Severity::High,
            ),
            Some(reason) if IMAGE_PULL_REASONS.contains(&reason) => analysis.add_cause(
                "Image pull failure",
                format!(
                    "container {} in pod {}: {}",
                    container,
                    pod_name,
                    status
                        .pointer("/state/waiting/message")
                        .and_then(Value::as_str)
                        .unwrap_or(reason)
                ),
                Severity::High,
            ),
            Some("CreateContainerConfigError") => {
                analysis.add_cause(
                    "Container config error",
                    format!(
                        "container {} in pod {}: {}",
                        container,
                        pod_name,
                        status
                            .pointer("/state/waiting/message")
                            .and_then(Value::as_str)
                            .unwrap_or("referenced ConfigMap or Secret is missing")
                    ),
                    Severity::High,
                );
                analysis.add_next_check("check ConfigMaps and Secrets referenced by the pod");
            }
            _ => {}
        }

        let terminated = status
            .pointer("/lastState/terminated")
            .or_else(|| status.pointer("/state/terminated"));
        if let Some(terminated) = terminated {
            let reason = terminated.get("reason").and_then(Value::as_str).unwrap_or("");
            let exit_code = terminated.get("exitCode").and_then(Value::as_i64).unwrap_or(0);
            if reason == "OOMKilled" {
                analysis.add_cause(
                    "OOMKilled",
                    format!("container {} in pod {} ran out of memory", container, pod_name),
                    Severity::High,
                );
                analysis.add_next_check(format!(
                    "raise the memory limit of container {} or reduce its usage",
                    container
                ));
            } else if exit_code != 0 {
                analysis.add_cause(
                    "Non-zero exit",
                    format!(
                        "container {} in pod {} exited with code {}{}",
                        container,
                        pod_name,
                        exit_code,
                        if reason.is_empty() {
                            String::new()
                        } else {
                            format!(" ({})", reason)
                        }
                    ),
                    Severity::Medium,
                );
            }
        }

        if restarts > 0 && has_liveness_probe(pod, container) {
            if events_mention(&events, "Liveness probe failed") {
                analysis.add_cause(
                    "Liveness probe failing",
                    format!("liveness probe of container {} keeps failing", container),
                    Severity::Medium,
                );
            } else {
                analysis.add_next_check(format!(
                    "container {} has a liveness probe; confirm its thresholds fit startup time",
                    container
                ));
            }
        }

        if let Some(invoker) = invoker {
            if restarts > 0 {
                if let Some(logs) = invoker
                    .try_invoke(
                        probe.ctx(),
                        analysis,
                        "pod_logs",
                        json!({
                            "namespace": pod.namespace(),
                            "pod": pod_name,
                            "container": container,
                            "previous": true,
                        }),
                    )
                    .await?
                {
                    analysis.add_evidence(format!("logs:{}/{}", pod_name, container), logs);
                }
            }
        }
    }

    owner_chain(probe, analysis, pod).await
}

fn has_liveness_probe(pod: &ObjectDoc, container: &str) -> bool {
    pod.array_at(&["spec", "containers"]).iter().any(|c| {
        c.get("name").and_then(Value::as_str) == Some(container) && c.get("livenessProbe").is_some()
    })
}

/// Pod → ReplicaSet → Deployment (or whatever owns it), from the graph
async fn owner_chain(
    probe: &Probe<'_>,
    analysis: &mut Analysis,
    pod: &ObjectDoc,
) -> Result<(), DiagnosticError> {
    let query = GraphQuery::new("Pod", pod.namespace(), pod.name());
    let lookup = match probe.graph(&query).await {
        Ok(lookup) => lookup,
        Err(err @ DiagnosticError::Cancelled { .. }) => return Err(err),
        Err(err) => {
            analysis.add_evidence(format!("ownerChain:{}", pod.name()), err.to_string());
            return Ok(());
        }
    };

    let mut chain = Vec::new();
    let mut current = node_id("Pod", pod.namespace(), pod.name());
    loop {
        let Some(owner) = lookup
            .graph
            .targets(&current, Relation::OwnedBy)
            .first()
            .map(|n| n.id.clone())
        else {
            break;
        };
        if chain.contains(&owner) {
            break;
        }
        chain.push(owner.clone());
        current = owner;
    }
    if !chain.is_empty() {
        analysis.add_evidence(format!("ownerChain:{}", pod.name()), chain);
    }
    Ok(())
}
