//! Storage diagnostics
//!
//! Walks PersistentVolumeClaims in scope and checks each one against the usual
//! failure signatures: a claim stuck in `Pending`, a StorageClass that does not
//! exist, a bound volume that is not `Bound`, and VolumeAttachments reporting
//! an attach error. StorageClass, PersistentVolume and VolumeAttachment are
//! cluster-scoped and only read for callers holding the cluster role.

use super::common::{Probe, finish, isolate, record_missing, typed};
use crate::analysis::{Analysis, Severity};
use crate::error::DiagnosticError;
use crate::kube::ListQuery;
use crate::models::BuiltinKind;
use crate::services::{DiagnosticService, RequestContext};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::{StorageClass, VolumeAttachment};
use kube::ResourceExt;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRequest {
    pub namespace: String,
    /// Only the claims mounted by this pod
    #[serde(default)]
    pub pod: Option<String>,
    /// A single claim
    #[serde(default)]
    pub pvc: Option<String>,
}

pub async fn debug_storage(
    service: &DiagnosticService,
    ctx: &RequestContext,
    request: &StorageRequest,
) -> Result<Analysis, DiagnosticError> {
    service.authorize(ctx, &request.namespace)?;
    let probe = Probe::new(service, ctx);
    let mut analysis = Analysis::new("storage", &request.namespace);
    let result = run(&probe, request, &mut analysis).await;
    finish(analysis, result, "storage issues")
}

async fn run(
    probe: &Probe<'_>,
    request: &StorageRequest,
    analysis: &mut Analysis,
) -> Result<(), DiagnosticError> {
    let ns = request.namespace.as_str();
    let claims = claims_in_scope(probe, request, analysis).await?;
    if claims.is_empty() {
        analysis.add_evidence("pvcs", "no PersistentVolumeClaims in scope");
        return Ok(());
    }

    let cluster_scope = probe.has_cluster_scope();
    if !cluster_scope {
        analysis.add_requires_cluster_role("storageClass");
        analysis.add_requires_cluster_role("persistentVolume");
    }
    for name in claims {
        let reference = BuiltinKind::PersistentVolumeClaim
            .identity()
            .reference(ns, &name);
        let result = diagnose_claim(probe, analysis, ns, &name, cluster_scope).await;
        isolate(analysis, &reference, result)?;
    }
    Ok(())
}

async fn claims_in_scope(
    probe: &Probe<'_>,
    request: &StorageRequest,
    analysis: &mut Analysis,
) -> Result<Vec<String>, DiagnosticError> {
    let ns = request.namespace.as_str();
    if let Some(pvc) = request.pvc.as_deref().filter(|p| !p.is_empty() && *p != "all") {
        return Ok(vec![pvc.to_string()]);
    }
    if let Some(pod_name) = request.pod.as_deref().filter(|p| !p.is_empty()) {
        let Some(pod) = probe
            .get_typed::<Pod>(BuiltinKind::Pod, ns, pod_name)
            .await?
        else {
            record_missing(analysis, BuiltinKind::Pod, ns, pod_name);
            return Ok(Vec::new());
        };
        analysis.add_resource(BuiltinKind::Pod.identity().reference(ns, pod_name));
        let claims = pod
            .spec
            .and_then(|spec| spec.volumes)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|volume| volume.persistent_volume_claim)
            .map(|source| source.claim_name)
            .collect();
        return Ok(claims);
    }
    let mut names: Vec<String> = probe
        .list_typed::<PersistentVolumeClaim>(BuiltinKind::PersistentVolumeClaim, ns, ListQuery::all())
        .await?
        .iter()
        .map(ResourceExt::name_any)
        .collect();
    names.sort();
    Ok(names)
}

async fn diagnose_claim(
    probe: &Probe<'_>,
    analysis: &mut Analysis,
    ns: &str,
    name: &str,
    cluster_scope: bool,
) -> Result<(), DiagnosticError> {
    let Some(doc) = probe
        .get(BuiltinKind::PersistentVolumeClaim, ns, name)
        .await?
    else {
        record_missing(analysis, BuiltinKind::PersistentVolumeClaim, ns, name);
        return Ok(());
    };
    let pvc: PersistentVolumeClaim = typed(&doc)?;
    let reference = BuiltinKind::PersistentVolumeClaim
        .identity()
        .reference(ns, name);
    analysis.add_resource(&reference);

    let phase = pvc
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown");
    let spec = pvc.spec.clone().unwrap_or_default();
    let storage_class = claim_storage_class(&pvc);
    let volume_name = spec.volume_name.as_deref().filter(|v| !v.is_empty());
    let requested = spec
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get("storage"))
        .map(|q| q.0.as_str());
    analysis.add_evidence(
        "pvc",
        json!({
            "name": name,
            "phase": phase,
            "storageClassName": storage_class,
            "volumeName": volume_name,
            "accessModes": spec.access_modes.clone().unwrap_or_default(),
            "volumeMode": volume_mode(spec.volume_mode.as_deref()),
            "requested": requested,
        }),
    );

    if phase == "Pending" {
        analysis.add_cause(
            "PVC pending",
            format!("claim {}/{} is Pending and not bound to a volume", ns, name),
            Severity::High,
        );
        analysis.add_next_check(format!("kubectl describe pvc {} -n {}", name, ns));
    }
    probe.attach_events(analysis, &doc, &reference).await?;

    if !cluster_scope {
        return Ok(());
    }

    if let Some(class_name) = storage_class.filter(|c| !c.is_empty()) {
        check_storage_class(probe, analysis, class_name, phase).await?;
    }

    match volume_name {
        Some(volume) => check_volume(probe, analysis, volume).await?,
        None if phase == "Pending" => {
            let pvs: Vec<PersistentVolume> = probe
                .list_typed(BuiltinKind::PersistentVolume, "", ListQuery::all())
                .await?;
            let candidates = find_matching_pvs(&pvc, &pvs);
            if candidates.is_empty() {
                analysis.add_next_check(format!(
                    "no Available PersistentVolume fits {}; check dynamic provisioning",
                    reference
                ));
            }
            analysis.add_evidence(format!("matchingPVs:{}", name), candidates);
        }
        None => {}
    }
    Ok(())
}

async fn check_storage_class(
    probe: &Probe<'_>,
    analysis: &mut Analysis,
    class_name: &str,
    claim_phase: &str,
) -> Result<(), DiagnosticError> {
    let class: Option<StorageClass> = probe
        .get_typed(BuiltinKind::StorageClass, "", class_name)
        .await?;
    match class {
        None => {
            analysis.add_cause(
                "StorageClass missing",
                format!("StorageClass {} does not exist", class_name),
                Severity::High,
            );
            analysis.add_next_check("kubectl get storageclass");
        }
        Some(class) => {
            analysis.add_resource(BuiltinKind::StorageClass.identity().reference("", class_name));
            let binding_mode = class
                .volume_binding_mode
                .as_deref()
                .unwrap_or("Immediate");
            analysis.add_evidence(
                "storageClass",
                json!({
                    "name": class_name,
                    "provisioner": class.provisioner,
                    "volumeBindingMode": binding_mode,
                }),
            );
            if claim_phase == "Pending" && binding_mode == "WaitForFirstConsumer" {
                analysis.add_next_check(
                    "binding waits for first consumer: check that a pod using the claim is scheduled",
                );
            }
        }
    }
    Ok(())
}

async fn check_volume(
    probe: &Probe<'_>,
    analysis: &mut Analysis,
    volume: &str,
) -> Result<(), DiagnosticError> {
    let pv: Option<PersistentVolume> = probe
        .get_typed(BuiltinKind::PersistentVolume, "", volume)
        .await?;
    let Some(pv) = pv else {
        analysis.add_cause(
            "PV not bound",
            format!("PersistentVolume {} referenced by the claim does not exist", volume),
            Severity::Medium,
        );
        return Ok(());
    };
    analysis.add_resource(BuiltinKind::PersistentVolume.identity().reference("", volume));
    let pv_phase = pv
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown");
    let pv_spec = pv.spec.as_ref();
    analysis.add_evidence(
        "pv",
        json!({
            "name": volume,
            "phase": pv_phase,
            "storageClassName": pv_spec.and_then(|s| s.storage_class_name.as_deref()),
            "reclaimPolicy": pv_spec.and_then(|s| s.persistent_volume_reclaim_policy.as_deref()),
        }),
    );
    if pv_phase != "Bound" {
        analysis.add_cause(
            "PV not bound",
            format!("PersistentVolume {} is {}", volume, pv_phase),
            Severity::Medium,
        );
    }

    let attachments: Vec<VolumeAttachment> = probe
        .list_typed(BuiltinKind::VolumeAttachment, "", ListQuery::all())
        .await?;
    for attachment in attachments
        .iter()
        .filter(|a| a.spec.source.persistent_volume_name.as_deref() == Some(volume))
    {
        let attachment_name = attachment.name_any();
        analysis.add_resource(
            BuiltinKind::VolumeAttachment
                .identity()
                .reference("", &attachment_name),
        );
        let status = attachment.status.as_ref();
        if let Some(message) = status
            .and_then(|s| s.attach_error.as_ref())
            .and_then(|e| e.message.as_deref())
        {
            analysis.add_cause(
                "VolumeAttachment error",
                format!(
                    "{} on node {}: {}",
                    attachment_name, attachment.spec.node_name, message
                ),
                Severity::High,
            );
        }
        if let Some(message) = status
            .and_then(|s| s.detach_error.as_ref())
            .and_then(|e| e.message.as_deref())
        {
            analysis.add_evidence(
                "detachError",
                json!({"attachment": attachment_name, "message": message}),
            );
        }
    }
    Ok(())
}

fn claim_storage_class(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.spec
        .as_ref()
        .and_then(|s| s.storage_class_name.as_deref())
        .or_else(|| {
            pvc.annotations()
                .get("volume.beta.kubernetes.io/storage-class")
                .map(String::as_str)
        })
}

fn volume_mode(mode: Option<&str>) -> &str {
    mode.unwrap_or("Filesystem")
}

/// Available volumes a pending claim could bind to, sorted by name
///
/// A candidate is phase `Available`, has the claim's storage class and volume
/// mode, and offers every access mode the claim requests.
pub fn find_matching_pvs(pvc: &PersistentVolumeClaim, pvs: &[PersistentVolume]) -> Vec<String> {
    let class = claim_storage_class(pvc).unwrap_or("");
    let claim_spec = pvc.spec.clone().unwrap_or_default();
    let mode = volume_mode(claim_spec.volume_mode.as_deref());
    let wanted = claim_spec.access_modes.unwrap_or_default();

    let mut names: Vec<String> = pvs
        .iter()
        .filter(|pv| pv.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Available"))
        .filter(|pv| {
            let spec = pv.spec.clone().unwrap_or_default();
            let offered = spec.access_modes.unwrap_or_default();
            spec.storage_class_name.as_deref().unwrap_or("") == class
                && volume_mode(spec.volume_mode.as_deref()) == mode
                && wanted.iter().all(|m| offered.contains(m))
        })
        .map(ResourceExt::name_any)
        .collect();
    names.sort();
    names
}
