//! Service connectivity diagnostics
//!
//! Reads the relationship graph around a Service and checks the path a request
//! takes: selector to pods, ready endpoints, target ports, and NetworkPolicies
//! that may drop ingress to the backends.

use super::common::{Probe, finish, record_missing};
use crate::analysis::{Analysis, Severity};
use crate::error::DiagnosticError;
use crate::kube::{ListQuery, ObjectDoc};
use crate::models::BuiltinKind;
use crate::services::{DiagnosticService, RequestContext};
use crate::trace::network::{is_default_deny_ingress, policy_pod_selector};
use crate::trace::selectors::{self, SelectorExt};
use crate::trace::{GraphQuery, Relation, ResourceGraph, node_id};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequest {
    pub namespace: String,
    pub service: String,
}

pub async fn debug_network(
    service: &DiagnosticService,
    ctx: &RequestContext,
    request: &NetworkRequest,
) -> Result<Analysis, DiagnosticError> {
    service.authorize(ctx, &request.namespace)?;
    if request.service.is_empty() {
        return Err(DiagnosticError::validation("service is required"));
    }
    let probe = Probe::new(service, ctx);
    let mut analysis = Analysis::new("network", &request.namespace);
    let result = run(&probe, request, &mut analysis).await;
    finish(analysis, result, "connectivity issues")
}

/// (ready, not ready) endpoint addresses
pub fn endpoint_counts(endpoints: &ObjectDoc) -> (usize, usize) {
    endpoints
        .array_at(&["subsets"])
        .iter()
        .fold((0, 0), |(ready, not_ready), subset| {
            let count = |key: &str| {
                subset
                    .get(key)
                    .and_then(Value::as_array)
                    .map_or(0, |a| a.len())
            };
            (ready + count("addresses"), not_ready + count("notReadyAddresses"))
        })
}

/// Whether some container of the pod declares the target port
///
/// Pods declaring no ports at all are given the benefit of the doubt for
/// numeric targets.
pub fn pod_exposes(pod: &ObjectDoc, target: &Value) -> bool {
    let ports: Vec<&Value> = pod
        .array_at(&["spec", "containers"])
        .iter()
        .flat_map(|c| c.get("ports").and_then(Value::as_array).into_iter().flatten())
        .collect();
    match target {
        Value::String(name) => ports
            .iter()
            .any(|p| p.get("name").and_then(Value::as_str) == Some(name.as_str())),
        Value::Number(number) => {
            ports.is_empty()
                || ports
                    .iter()
                    .any(|p| p.get("containerPort").and_then(Value::as_i64) == number.as_i64())
        }
        _ => true,
    }
}

async fn run(
    probe: &Probe<'_>,
    request: &NetworkRequest,
    analysis: &mut Analysis,
) -> Result<(), DiagnosticError> {
    let ns = request.namespace.as_str();
    let name = request.service.as_str();
    let Some(svc) = probe.get(BuiltinKind::Service, ns, name).await? else {
        record_missing(analysis, BuiltinKind::Service, ns, name);
        return Ok(());
    };
    analysis.add_resource(BuiltinKind::Service.identity().reference(ns, name));

    let lookup = probe.graph(&GraphQuery::new("Service", ns, name)).await?;
    analysis.add_evidence(
        "graph",
        json!({
            "nodes": lookup.graph.nodes.len(),
            "edges": lookup.graph.edges.len(),
            "fromCache": lookup.from_cache,
        }),
    );
    if !lookup.warnings.is_empty() {
        analysis.add_evidence("graphWarnings", lookup.warnings.clone());
    }

    let svc_id = node_id("Service", ns, name);
    let selector = svc.string_map_at(&["spec", "selector"]);
    let service_type = svc.str_at(&["spec", "type"]).unwrap_or("ClusterIP");
    if selector.is_empty() {
        analysis.add_evidence(
            "selector",
            "service has no selector; endpoints are managed outside the service",
        );
    } else if lookup.graph.targets(&svc_id, Relation::Selects).is_empty() {
        analysis.add_cause(
            "Selector matches no pods",
            format!(
                "no pod in {} carries labels {}",
                ns,
                selectors::from_map(&selector)
            ),
            Severity::High,
        );
        analysis.add_next_check(format!("kubectl get pods -n {} --show-labels", ns));
    }

    if service_type != "ExternalName" {
        match probe.get(BuiltinKind::Endpoints, ns, name).await? {
            Some(endpoints) => {
                let (ready, not_ready) = endpoint_counts(&endpoints);
                analysis.add_resource(BuiltinKind::Endpoints.identity().reference(ns, name));
                analysis.add_evidence("endpoints", json!({"ready": ready, "notReady": not_ready}));
                if ready == 0 {
                    analysis.add_cause(
                        "No ready endpoints",
                        format!(
                            "service {} has {} ready and {} not-ready addresses",
                            name, ready, not_ready
                        ),
                        Severity::High,
                    );
                }
            }
            None => analysis.add_cause(
                "No ready endpoints",
                format!("service {} has no Endpoints object", name),
                Severity::High,
            ),
        }
    }

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

    for port in svc.array_at(&["spec", "ports"]) {
        let target = port
            .get("targetPort")
            .or_else(|| port.get("port"))
            .cloned()
            .unwrap_or(Value::Null);
        if !backends.is_empty() && !backends.iter().any(|p| pod_exposes(p, &target)) {
            analysis.add_cause(
                "targetPort not exposed",
                format!("no backend pod of {} declares port {}", name, target),
                Severity::Medium,
            );
        }
    }

    check_policies(probe, analysis, ns, &backends, &lookup.graph).await
}

async fn check_policies(
    probe: &Probe<'_>,
    analysis: &mut Analysis,
    ns: &str,
    backends: &[ObjectDoc],
    graph: &ResourceGraph,
) -> Result<(), DiagnosticError> {
    let mut policies = probe
        .list(BuiltinKind::NetworkPolicy, ns, ListQuery::all())
        .await?;
    policies.sort_by(|a, b| a.name().cmp(b.name()));

    let mut peers_graph = graph.clone();
    for policy in &policies {
        let Ok(selector) = policy_pod_selector(policy) else {
            continue;
        };
        if !backends.iter().any(|pod| selector.matches(&pod.labels())) {
            continue;
        }
        analysis.add_resource(BuiltinKind::NetworkPolicy.identity().reference(ns, policy.name()));
        if is_default_deny_ingress(policy) {
            analysis.add_cause(
                "Default-deny NetworkPolicy",
                format!(
                    "NetworkPolicy {} selects the backends and allows no ingress",
                    policy.name()
                ),
                Severity::High,
            );
        }

        let warnings = probe
            .service()
            .builder()
            .add_network_policy_peer_edges(probe.ctx(), &mut peers_graph, policy)
            .await
            .map_err(|reason| DiagnosticError::Cancelled {
                reason,
                partial: None,
            })?;
        let policy_id = node_id("NetworkPolicy", ns, policy.name());
        let ids = |relation| -> Vec<String> {
            peers_graph
                .targets(&policy_id, relation)
                .into_iter()
                .map(|n| n.id.clone())
                .collect()
        };
        analysis.add_evidence(
            format!("networkPolicy:{}", policy.name()),
            json!({
                "allowsFrom": ids(Relation::AllowsFrom),
                "allowsTo": ids(Relation::AllowsTo),
                "warnings": warnings,
            }),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_counts() {
        let endpoints = ObjectDoc::new(json!({
            "subsets": [
                {"addresses": [{"ip": "10.0.0.1"}], "notReadyAddresses": [{"ip": "10.0.0.2"}]},
                {"addresses": [{"ip": "10.0.0.3"}]}
            ]
        }));
        assert_eq!(endpoint_counts(&endpoints), (2, 1));
    }

    #[test]
    fn test_named_and_numeric_target_ports() {
        let pod = ObjectDoc::new(json!({
            "spec": {"containers": [{"name": "app", "ports": [{"name": "http", "containerPort": 8080}]}]}
        }));
        assert!(pod_exposes(&pod, &json!("http")));
        assert!(!pod_exposes(&pod, &json!("grpc")));
        assert!(pod_exposes(&pod, &json!(8080)));
        assert!(!pod_exposes(&pod, &json!(9090)));
    }
}
