//! HorizontalPodAutoscaler diagnostics

use super::common::{Probe, finish, isolate, record_missing};
use crate::analysis::{Analysis, Severity};
use crate::error::DiagnosticError;
use crate::kube::{ListQuery, ObjectDoc};
use crate::models::{BuiltinKind, split_api_version};
use crate::services::{DiagnosticService, RequestContext};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeSet;

const METRICS_API_GROUP: &str = "metrics.k8s.io";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HpaRequest {
    pub namespace: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub async fn debug_hpa(
    service: &DiagnosticService,
    ctx: &RequestContext,
    request: &HpaRequest,
) -> Result<Analysis, DiagnosticError> {
    service.authorize(ctx, &request.namespace)?;
    let probe = Probe::new(service, ctx);
    let mut analysis = Analysis::new("hpa", &request.namespace);
    let result = run(&probe, request, &mut analysis).await;
    finish(analysis, result, "autoscaling issues")
}

async fn run(
    probe: &Probe<'_>,
    request: &HpaRequest,
    analysis: &mut Analysis,
) -> Result<(), DiagnosticError> {
    let ns = request.namespace.as_str();
    let kind = BuiltinKind::HorizontalPodAutoscaler;
    let hpas = match request.name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => match probe.get(kind, ns, name).await? {
            Some(hpa) => vec![hpa],
            None => {
                record_missing(analysis, kind, ns, name);
                return Ok(());
            }
        },
        None => {
            let mut all = probe.list(kind, ns, ListQuery::all()).await?;
            all.sort_by(|a, b| a.name().cmp(b.name()));
            all
        }
    };
    if hpas.is_empty() {
        analysis.add_evidence("hpas", "no HorizontalPodAutoscalers in scope");
        return Ok(());
    }

    let metrics_api = probe.has_api_group(METRICS_API_GROUP).await?;
    analysis.add_evidence(
        "metricsApi",
        if metrics_api { "available" } else { "unavailable" },
    );

    for hpa in &hpas {
        let reference = kind.identity().reference(ns, hpa.name());
        let result = diagnose_hpa(probe, analysis, hpa, &reference, metrics_api).await;
        isolate(analysis, &reference, result)?;
    }
    Ok(())
}

/// Resource names (cpu, memory) the HPA scales on
pub fn resource_metrics(hpa: &ObjectDoc) -> BTreeSet<String> {
    hpa.array_at(&["spec", "metrics"])
        .iter()
        .filter_map(|m| {
            m.pointer("/resource/name")
                .or_else(|| m.pointer("/containerResource/name"))
                .and_then(Value::as_str)
        })
        .map(String::from)
        .collect()
}

/// Containers of a workload template missing a request for `resource`
pub fn containers_missing_request(workload: &ObjectDoc, resource: &str) -> Vec<String> {
    workload
        .array_at(&["spec", "template", "spec", "containers"])
        .iter()
        .filter(|c| {
            c.pointer(&format!("/resources/requests/{}", resource))
                .is_none()
        })
        .filter_map(|c| c.get("name").and_then(Value::as_str))
        .map(String::from)
        .collect()
}

async fn diagnose_hpa(
    probe: &Probe<'_>,
    analysis: &mut Analysis,
    hpa: &ObjectDoc,
    reference: &str,
    metrics_api: bool,
) -> Result<(), DiagnosticError> {
    analysis.add_resource(reference);
    let name = hpa.name();
    let min = hpa.i64_at(&["spec", "minReplicas"]).unwrap_or(1);
    let max = hpa.i64_at(&["spec", "maxReplicas"]).unwrap_or(0);
    let current = hpa.i64_at(&["status", "currentReplicas"]).unwrap_or(0);
    let desired = hpa.i64_at(&["status", "desiredReplicas"]).unwrap_or(current);
    analysis.add_evidence(
        format!("hpa:{}", name),
        json!({
            "minReplicas": min,
            "maxReplicas": max,
            "currentReplicas": current,
            "desiredReplicas": desired,
            "scaleTargetRef": hpa.get(&["spec", "scaleTargetRef"]),
            "conditions": hpa.get(&["status", "conditions"]),
        }),
    );

    let message = |condition: &str| -> String {
        hpa.condition(condition)
            .and_then(|c| c.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    };
    if hpa.condition_status("AbleToScale") == Some("False") {
        analysis.add_cause(
            "HPA unable to scale",
            format!("{}: {}", name, message("AbleToScale")),
            Severity::High,
        );
    }
    if hpa.condition_status("ScalingActive") == Some("False") {
        let detail = message("ScalingActive");
        if detail.contains("metrics") {
            analysis.add_next_check("check metrics-server and the metrics APIs");
        }
        analysis.add_cause(
            "HPA scaling inactive",
            format!("{}: {}", name, detail),
            Severity::High,
        );
    }
    if hpa.condition_status("ScalingLimited") == Some("True") {
        analysis.add_cause(
            "HPA scaling limited",
            format!("{}: {}", name, message("ScalingLimited")),
            Severity::Low,
        );
    }
    if max > 0 && current >= max && desired >= max {
        analysis.add_cause(
            "HPA at max replicas",
            format!("{} runs {} of at most {} replicas", name, current, max),
            Severity::Medium,
        );
        analysis.add_next_check(format!("consider raising maxReplicas of {}", name));
    }

    let metrics = resource_metrics(hpa);
    if !metrics.is_empty() && !metrics_api {
        analysis.add_cause(
            "Metrics API unavailable",
            format!(
                "{} scales on {} but {} is not served",
                name,
                metrics.iter().cloned().collect::<Vec<_>>().join(", "),
                METRICS_API_GROUP
            ),
            Severity::High,
        );
    }

    check_scale_target(probe, analysis, hpa, &metrics).await
}

async fn check_scale_target(
    probe: &Probe<'_>,
    analysis: &mut Analysis,
    hpa: &ObjectDoc,
    metrics: &BTreeSet<String>,
) -> Result<(), DiagnosticError> {
    let (Some(kind), Some(target)) = (
        hpa.str_at(&["spec", "scaleTargetRef", "kind"]),
        hpa.str_at(&["spec", "scaleTargetRef", "name"]),
    ) else {
        analysis.add_cause(
            "Scale target missing",
            format!("{} has no scaleTargetRef", hpa.name()),
            Severity::High,
        );
        return Ok(());
    };
    let (group, _) =
        split_api_version(hpa.str_at(&["spec", "scaleTargetRef", "apiVersion"]).unwrap_or(""));
    let identity = probe.resolve(kind, group).await?.identity;

    let Some(workload) = probe.get_identity(&identity, hpa.namespace(), target).await? else {
        analysis.add_cause(
            "Scale target missing",
            format!("{} {} targeted by {} does not exist", kind, target, hpa.name()),
            Severity::High,
        );
        return Ok(());
    };
    analysis.add_resource(identity.reference(hpa.namespace(), target));

    for resource in metrics {
        let missing = containers_missing_request(&workload, resource);
        if !missing.is_empty() {
            analysis.add_cause(
                "Missing resource requests",
                format!(
                    "containers {} of {} {} set no {} request",
                    missing.join(", "),
                    kind,
                    target,
                    resource
                ),
                Severity::High,
            );
        }
    }
    Ok(())
}
