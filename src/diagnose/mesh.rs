//! Service-mesh diagnostics
//!
//! Checks which mesh APIs the cluster serves, then looks at the mesh objects
//! around a Service: HTTPRoutes whose parent Gateway is gone, Istio
//! AuthorizationPolicies that deny traffic to the backends, and backend pods
//! running without a proxy.

use super::common::{Probe, finish, record_missing};
use crate::analysis::{Analysis, Severity};
use crate::error::DiagnosticError;
use crate::kube::{ListQuery, ObjectDoc};
use crate::models::BuiltinKind;
use crate::services::{DiagnosticService, RequestContext};
use crate::trace::mesh::{
    GATEWAY_API_GROUP, ISTIO_NETWORKING_GROUP, ISTIO_SECURITY_GROUP, LINKERD_GROUP,
    LINKERD_POLICY_GROUP, MESH_KINDS, route_parent_gateways,
};
use crate::trace::selectors::{self, SelectorExt};
use crate::trace::{GraphQuery, Relation, node_id};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeSet;

const PROXY_CONTAINERS: &[&str] = &["istio-proxy", "linkerd-proxy"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshRequest {
    pub namespace: String,
    pub service: String,
}

pub async fn debug_mesh(
    service: &DiagnosticService,
    ctx: &RequestContext,
    request: &MeshRequest,
) -> Result<Analysis, DiagnosticError> {
    service.authorize(ctx, &request.namespace)?;
    if request.service.is_empty() {
        return Err(DiagnosticError::validation("service is required"));
    }
    let probe = Probe::new(service, ctx);
    let mut analysis = Analysis::new("mesh", &request.namespace);
    let result = run(&probe, request, &mut analysis).await;
    finish(analysis, result, "mesh issues")
}

/// Whether the pod runs a mesh proxy, as a container or a native sidecar
pub fn has_proxy(pod: &ObjectDoc) -> bool {
    pod.array_at(&["spec", "containers"])
        .iter()
        .chain(pod.array_at(&["spec", "initContainers"]))
        .filter_map(|c| c.get("name").and_then(Value::as_str))
        .any(|name| PROXY_CONTAINERS.contains(&name))
}

/// Istio semantics: an ALLOW policy without rules matches nothing, so it denies all
pub fn authorization_effect(policy: &ObjectDoc) -> Option<(&'static str, Severity)> {
    let action = policy.str_at(&["spec", "action"]).unwrap_or("ALLOW");
    let has_rules = !policy.array_at(&["spec", "rules"]).is_empty();
    match action {
        "DENY" => Some(("Istio DENY policy", Severity::Medium)),
        "ALLOW" if !has_rules => Some(("Istio allow-nothing policy", Severity::High)),
        _ => None,
    }
}

async fn run(
    probe: &Probe<'_>,
    request: &MeshRequest,
    analysis: &mut Analysis,
) -> Result<(), DiagnosticError> {
    let ns = request.namespace.as_str();
    let name = request.service.as_str();
    let Some(svc) = probe.get(BuiltinKind::Service, ns, name).await? else {
        record_missing(analysis, BuiltinKind::Service, ns, name);
        return Ok(());
    };
    analysis.add_resource(BuiltinKind::Service.identity().reference(ns, name));

    let mut installed = BTreeSet::new();
    let mut missing = Vec::new();
    let resolutions = join_all(
        MESH_KINDS
            .iter()
            .map(|(kind, group)| probe.resolve(kind, group)),
    )
    .await;
    for ((kind, group), resolution) in MESH_KINDS.iter().zip(resolutions) {
        match resolution {
            Ok(_) => {
                installed.insert(*group);
            }
            Err(err @ DiagnosticError::Cancelled { .. }) => return Err(err),
            Err(_) => missing.push(format!("{}.{}", kind, group)),
        }
    }
    analysis.add_evidence(
        "meshCrds",
        json!({"installedGroups": installed, "missing": missing}),
    );
    if installed.is_empty() {
        analysis.add_evidence("mesh", "no service mesh or Gateway API resources are installed");
        return Ok(());
    }

    let lookup = probe
        .graph(&GraphQuery::new("Service", ns, name).with_mesh(true))
        .await?;
    let svc_id = node_id("Service", ns, name);
    let mesh_objects: Vec<String> = lookup
        .graph
        .nodes
        .iter()
        .filter(|n| MESH_KINDS.iter().any(|(kind, _)| *kind == n.kind))
        .map(|n| n.id.clone())
        .collect();
    analysis.add_evidence("meshObjects", mesh_objects.clone());
    if !lookup.warnings.is_empty() {
        analysis.add_evidence("graphWarnings", lookup.warnings.clone());
    }

    if installed.contains(GATEWAY_API_GROUP) {
        let routes: Vec<(String, String)> = lookup
            .graph
            .sources(&svc_id, Relation::RoutesTo)
            .into_iter()
            .filter(|n| n.kind == "HTTPRoute")
            .map(|n| (n.namespace.clone(), n.name.clone()))
            .collect();
        check_route_parents(probe, analysis, &routes).await?;
    }

    let selector = svc.string_map_at(&["spec", "selector"]);
    if selector.is_empty() {
        return Ok(());
    }
    let backends = probe
        .list(
            BuiltinKind::Pod,
            ns,
            ListQuery::labels_from(&selectors::from_map(&selector)),
        )
        .await?;

    if installed.contains(ISTIO_SECURITY_GROUP) {
        check_authorization_policies(probe, analysis, ns, &backends).await?;
    }

    let proxied_mesh = installed.contains(ISTIO_SECURITY_GROUP)
        || installed.contains(LINKERD_GROUP)
        || installed.contains(LINKERD_POLICY_GROUP)
        || installed.contains(ISTIO_NETWORKING_GROUP);
    if proxied_mesh && !backends.is_empty() {
        let mut unproxied: Vec<String> = backends
            .iter()
            .filter(|p| !has_proxy(p))
            .map(|p| p.name().to_string())
            .collect();
        unproxied.sort();
        let meshed = unproxied.len() < backends.len() || !mesh_objects.is_empty();
        if meshed && !unproxied.is_empty() {
            analysis.add_cause(
                "Pods missing mesh proxy",
                format!("backend pods without a proxy: {}", unproxied.join(", ")),
                Severity::Medium,
            );
            analysis.add_next_check(format!(
                "check sidecar injection labels on namespace {} and restart the pods",
                ns
            ));
        }
    }
    Ok(())
}

async fn check_route_parents(
    probe: &Probe<'_>,
    analysis: &mut Analysis,
    routes: &[(String, String)],
) -> Result<(), DiagnosticError> {
    if routes.is_empty() {
        return Ok(());
    }
    let route_identity = probe.resolve("HTTPRoute", GATEWAY_API_GROUP).await?.identity;
    let gateway_identity = probe.resolve("Gateway", GATEWAY_API_GROUP).await?.identity;
    for (namespace, name) in routes {
        let Some(route) = probe.get_identity(&route_identity, namespace, name).await? else {
            continue;
        };
        analysis.add_resource(route_identity.reference(namespace, name));
        for (gw_namespace, gw_name) in route_parent_gateways(&route) {
            match probe
                .get_identity(&gateway_identity, &gw_namespace, &gw_name)
                .await?
            {
                Some(_) => analysis.add_resource(gateway_identity.reference(&gw_namespace, &gw_name)),
                None => analysis.add_cause(
                    "Gateway missing",
                    format!(
                        "HTTPRoute {}/{} attaches to Gateway {}/{} which does not exist",
                        namespace, name, gw_namespace, gw_name
                    ),
                    Severity::High,
                ),
            }
        }
    }
    Ok(())
}

async fn check_authorization_policies(
    probe: &Probe<'_>,
    analysis: &mut Analysis,
    ns: &str,
    backends: &[ObjectDoc],
) -> Result<(), DiagnosticError> {
    let identity = probe
        .resolve("AuthorizationPolicy", ISTIO_SECURITY_GROUP)
        .await?
        .identity;
    let mut policies = probe.list_identity(&identity, ns, ListQuery::all()).await?;
    policies.sort_by(|a, b| a.name().cmp(b.name()));
    for policy in &policies {
        let selects_backend = match policy.get(&["spec", "selector"]) {
            None => true,
            Some(selector) => selectors::from_value(selector)
                .is_ok_and(|s| backends.iter().any(|p| s.matches(&p.labels()))),
        };
        if !selects_backend {
            continue;
        }
        analysis.add_resource(identity.reference(ns, policy.name()));
        if let Some((title, severity)) = authorization_effect(policy) {
            analysis.add_cause(
                title,
                format!("AuthorizationPolicy {} applies to the backends", policy.name()),
                severity,
            );
        }
    }
    Ok(())
}
