//! VerticalPodAutoscaler diagnostics
//!
//! The VPA is a CRD, so its presence is established through the resolver
//! first. The admission webhook that applies recommendations is configured
//! cluster-wide and only checked for callers holding the cluster role.

use super::common::{Probe, finish, isolate};
use crate::analysis::{Analysis, Severity};
use crate::error::DiagnosticError;
use crate::kube::{ListQuery, ObjectDoc};
use crate::models::{BuiltinKind, ResourceIdentity, split_api_version};
use crate::services::{DiagnosticService, RequestContext};
use serde::Deserialize;
use serde_json::json;

pub const VPA_GROUP: &str = "autoscaling.k8s.io";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpaRequest {
    pub namespace: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub async fn debug_vpa(
    service: &DiagnosticService,
    ctx: &RequestContext,
    request: &VpaRequest,
) -> Result<Analysis, DiagnosticError> {
    service.authorize(ctx, &request.namespace)?;
    let probe = Probe::new(service, ctx);
    let mut analysis = Analysis::new("vpa", &request.namespace);
    let result = run(&probe, request, &mut analysis).await;
    finish(analysis, result, "VPA issues")
}

async fn run(
    probe: &Probe<'_>,
    request: &VpaRequest,
    analysis: &mut Analysis,
) -> Result<(), DiagnosticError> {
    let ns = request.namespace.as_str();
    let identity = match probe.resolve("VerticalPodAutoscaler", VPA_GROUP).await {
        Ok(resolution) => {
            for warning in resolution.warnings {
                analysis.add_evidence("discoveryWarning", warning);
            }
            resolution.identity
        }
        Err(err @ DiagnosticError::Cancelled { .. }) => return Err(err),
        Err(err) => {
            analysis.add_evidence("vpaCrd", format!("not installed: {}", err));
            analysis.add_cause(
                "VPA CRD missing",
                format!("VerticalPodAutoscaler ({}) is not served by the cluster", VPA_GROUP),
                Severity::High,
            );
            return Ok(());
        }
    };
    analysis.add_evidence("vpaCrd", identity.api_version());

    let vpas = match request.name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => match probe.get_identity(&identity, ns, name).await? {
            Some(vpa) => vec![vpa],
            None => {
                let reference = identity.reference(ns, name);
                analysis.add_evidence("notFound", format!("{} not found", reference));
                analysis.add_cause(
                    "VerticalPodAutoscaler not found",
                    format!("{} does not exist", reference),
                    Severity::Medium,
                );
                return Ok(());
            }
        },
        None => {
            let mut all = probe.list_identity(&identity, ns, ListQuery::all()).await?;
            all.sort_by(|a, b| a.name().cmp(b.name()));
            all
        }
    };
    if vpas.is_empty() {
        analysis.add_evidence("vpas", "no VerticalPodAutoscalers in scope");
        return Ok(());
    }

    let mut applies_updates = false;
    for vpa in &vpas {
        let reference = identity.reference(ns, vpa.name());
        applies_updates |= update_mode(vpa) != "Off";
        let result = diagnose_vpa(probe, analysis, vpa, &reference).await;
        isolate(analysis, &reference, result)?;
    }

    if probe.has_cluster_scope() {
        check_admission_webhook(probe, analysis, applies_updates).await?;
    } else {
        analysis.add_requires_cluster_role("admissionWebhook");
    }
    Ok(())
}

/// `spec.updatePolicy.updateMode`, defaulting to `Auto`
pub fn update_mode(vpa: &ObjectDoc) -> &str {
    vpa.str_at(&["spec", "updatePolicy", "updateMode"])
        .unwrap_or("Auto")
}

async fn diagnose_vpa(
    probe: &Probe<'_>,
    analysis: &mut Analysis,
    vpa: &ObjectDoc,
    reference: &str,
) -> Result<(), DiagnosticError> {
    analysis.add_resource(reference);
    let name = vpa.name();
    let mode = update_mode(vpa);
    let recommendations = vpa.array_at(&["status", "recommendation", "containerRecommendations"]);
    analysis.add_evidence(
        format!("vpa:{}", name),
        json!({
            "updateMode": mode,
            "targetRef": vpa.get(&["spec", "targetRef"]),
            "recommendations": recommendations,
            "conditions": vpa.get(&["status", "conditions"]),
        }),
    );

    if mode == "Off" {
        analysis.add_cause(
            "VPA in recommendation-only mode",
            format!("{} has updateMode Off; recommendations are not applied", name),
            Severity::Low,
        );
    }
    if recommendations.is_empty() {
        let why = vpa
            .condition("RecommendationProvided")
            .and_then(|c| c.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("recommender has not produced one yet");
        analysis.add_cause(
            "No VPA recommendation",
            format!("{}: {}", name, why),
            Severity::Medium,
        );
        analysis.add_next_check("check that the vpa-recommender deployment is running");
    }

    let (Some(kind), Some(target)) = (
        vpa.str_at(&["spec", "targetRef", "kind"]),
        vpa.str_at(&["spec", "targetRef", "name"]),
    ) else {
        analysis.add_cause(
            "VPA target missing",
            format!("{} has no targetRef", name),
            Severity::High,
        );
        return Ok(());
    };
    let (group, _) =
        split_api_version(vpa.str_at(&["spec", "targetRef", "apiVersion"]).unwrap_or(""));
    let target_identity: ResourceIdentity = probe.resolve(kind, group).await?.identity;
    match probe
        .get_identity(&target_identity, vpa.namespace(), target)
        .await?
    {
        Some(_) => analysis.add_resource(target_identity.reference(vpa.namespace(), target)),
        None => analysis.add_cause(
            "VPA target missing",
            format!("{} {} targeted by {} does not exist", kind, target, name),
            Severity::High,
        ),
    }
    Ok(())
}

async fn check_admission_webhook(
    probe: &Probe<'_>,
    analysis: &mut Analysis,
    applies_updates: bool,
) -> Result<(), DiagnosticError> {
    let webhooks = probe
        .list(BuiltinKind::MutatingWebhookConfiguration, "", ListQuery::all())
        .await?;
    let mut vpa_hooks: Vec<String> = webhooks
        .iter()
        .filter(|w| w.name().contains("vpa"))
        .map(|w| w.name().to_string())
        .collect();
    vpa_hooks.sort();
    if vpa_hooks.is_empty() && applies_updates {
        analysis.add_cause(
            "VPA admission webhook missing",
            "no vpa mutating webhook is configured; new pods will not receive recommendations",
            Severity::Medium,
        );
    }
    analysis.add_evidence("admissionWebhook", vpa_hooks);
    Ok(())
}
