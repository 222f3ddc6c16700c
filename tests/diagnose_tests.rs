//! Diagnostic handler tests
//!
//! Crash loops, scheduling, network and permissions, plus the validation and
//! policy gates every handler passes first.

mod common;

use clusterlens::analysis::Severity;
use clusterlens::diagnose::{
    CrashLoopRequest, HpaRequest, NetworkRequest, PermissionsRequest, SchedulingRequest,
    VpaRequest, debug_crashloop, debug_hpa, debug_network, debug_permissions, debug_scheduling,
    debug_vpa,
};
use clusterlens::kube::InMemoryCluster;
use clusterlens::tools::InvokeOptions;
use clusterlens::trace::node_id;
use common::*;
use serde_json::{Value, json};
use std::sync::Arc;

fn crashing_pod(ns: &str, name: &str) -> Value {
    let mut doc = pod(ns, name, "web", Some(("web-5d8f", "rs-web")));
    doc["status"]["containerStatuses"] = json!([{
        "name": "app",
        "ready": false,
        "restartCount": 5,
        "state": {"waiting": {"reason": "CrashLoopBackOff", "message": "back-off 5m0s"}},
        "lastState": {"terminated": {"exitCode": 1, "reason": "Error"}}
    }]);
    doc
}

fn pending_pod(ns: &str, name: &str, message: &str) -> Value {
    let mut doc = pod(ns, name, "batch", None);
    doc["status"] = json!({
        "phase": "Pending",
        "conditions": [{
            "type": "PodScheduled",
            "status": "False",
            "reason": "Unschedulable",
            "message": message
        }]
    });
    doc
}

fn network(service: &str) -> NetworkRequest {
    NetworkRequest {
        namespace: "shop".to_string(),
        service: service.to_string(),
    }
}

#[tokio::test]
async fn test_crashloop_detects_backoff_and_exit_code() {
    let cluster = web_stack().with_object(crashing_pod("shop", "web-5d8f-zzzzz"));
    let svc = service(Arc::new(cluster));

    let analysis = debug_crashloop(
        &svc,
        &admin(),
        &CrashLoopRequest {
            namespace: "shop".to_string(),
            ..Default::default()
        },
        None,
    )
    .await
    .unwrap();

    let backoff = analysis.cause("CrashLoopBackOff").expect("backoff cause");
    assert_eq!(backoff.severity, Severity::High);
    assert!(backoff.detail.contains("restarted 5 times"));
    assert_eq!(analysis.cause("Non-zero exit").unwrap().severity, Severity::Medium);

    // only the unhealthy pod is examined
    assert_eq!(
        analysis.resources(),
        &["pods/shop/web-5d8f-zzzzz".to_string()]
    );

    let chain = analysis
        .evidence_with_label("ownerChain:web-5d8f-zzzzz")
        .next()
        .expect("owner chain");
    assert_eq!(
        chain.payload,
        json!([
            node_id("ReplicaSet", "shop", "web-5d8f"),
            node_id("Deployment", "shop", "web")
        ])
    );
}

#[tokio::test]
async fn test_crashloop_through_invoker_notes_missing_logs() {
    let cluster = InMemoryCluster::new().with_object(crashing_pod("shop", "web-1"));
    let invoker = invoker(Arc::new(cluster));

    let rendered = invoker
        .invoke(
            &admin(),
            "debug_crashloop",
            json!({"namespace": "shop", "pod": "web-1"}),
            InvokeOptions::default(),
        )
        .await
        .unwrap();

    let evidence = rendered["evidence"].as_array().unwrap();
    assert!(evidence.iter().any(|e| {
        e["label"] == "pod_logs" && e["payload"] == "capability unavailable"
    }));
    assert_eq!(rendered["likelyRootCauses"][0]["title"], "CrashLoopBackOff");
}

#[tokio::test]
async fn test_crashloop_healthy_namespace() {
    let svc = service(Arc::new(web_stack()));
    let analysis = debug_crashloop(
        &svc,
        &admin(),
        &CrashLoopRequest {
            namespace: "shop".to_string(),
            ..Default::default()
        },
        None,
    )
    .await
    .unwrap();

    assert!(analysis.causes().is_empty());
    assert_eq!(
        analysis.evidence_with_label("summary").next().unwrap().payload,
        "no explicit crash loops found"
    );
}

#[tokio::test]
async fn test_scheduling_insufficient_resources() {
    let cluster = web_stack().with_object(pending_pod(
        "shop",
        "batch-1",
        "0/3 nodes are available: 3 Insufficient cpu.",
    ));
    let svc = service(Arc::new(cluster));

    let analysis = debug_scheduling(
        &svc,
        &admin(),
        &SchedulingRequest {
            namespace: "shop".to_string(),
            pod: None,
        },
    )
    .await
    .unwrap();

    let cause = analysis.cause("Insufficient resources").expect("cause");
    assert_eq!(cause.severity, Severity::High);
    assert!(cause.detail.starts_with("batch-1:"));
    // running pods are not listed
    assert_eq!(analysis.resources(), &["pods/shop/batch-1".to_string()]);
}

#[tokio::test]
async fn test_scheduling_node_selector_without_match() {
    let mut doc = pending_pod("shop", "gpu-job", "0/1 nodes are available: 1 node(s) didn't match Pod's node affinity/selector.");
    doc["spec"]["nodeSelector"] = json!({"pool": "gpu"});
    let cluster = InMemoryCluster::new().with_object(doc).with_object(json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": {"name": "worker-1", "labels": {"pool": "general"}}
    }));
    let svc = service(Arc::new(cluster));

    let analysis = debug_scheduling(
        &svc,
        &admin(),
        &SchedulingRequest {
            namespace: "shop".to_string(),
            pod: Some("gpu-job".to_string()),
        },
    )
    .await
    .unwrap();

    assert!(analysis.has_cause("Node selector/affinity mismatch"));
    assert!(analysis.has_cause("No node matches nodeSelector"));
    let matching = analysis
        .evidence_with_label("nodesMatchingSelector:gpu-job")
        .next()
        .unwrap();
    assert_eq!(matching.payload, json!([]));
}

#[tokio::test]
async fn test_scheduling_namespaced_user_cannot_read_nodes() {
    let cluster = InMemoryCluster::new().with_object(pending_pod(
        "shop",
        "batch-1",
        "0/3 nodes are available: 3 Insufficient memory.",
    ));
    let svc = service(Arc::new(cluster));

    let analysis = debug_scheduling(
        &svc,
        &namespaced(&["shop"]),
        &SchedulingRequest {
            namespace: "shop".to_string(),
            pod: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(
        analysis.evidence_with_label("nodes").next().unwrap().payload,
        "requires cluster role"
    );
    assert!(analysis.has_cause("Insufficient resources"));
}

#[tokio::test]
async fn test_network_selector_matches_no_pods() {
    let cluster = InMemoryCluster::new()
        .with_object(service_object("shop", "api", "api"))
        .with_object(json!({
            "apiVersion": "v1",
            "kind": "Endpoints",
            "metadata": {"name": "api", "namespace": "shop"},
            "subsets": []
        }));
    let svc = service(Arc::new(cluster));

    let analysis = debug_network(&svc, &admin(), &network("api")).await.unwrap();

    assert!(analysis.has_cause("Selector matches no pods"));
    assert!(analysis.has_cause("No ready endpoints"));
    assert_eq!(
        analysis.evidence_with_label("endpoints").next().unwrap().payload,
        json!({"ready": 0, "notReady": 0})
    );
}

#[tokio::test]
async fn test_network_healthy_service() {
    let svc = service(Arc::new(web_stack()));
    let analysis = debug_network(&svc, &admin(), &network("web")).await.unwrap();

    assert!(analysis.causes().is_empty(), "{:?}", analysis.causes());
    assert_eq!(
        analysis.evidence_with_label("summary").next().unwrap().payload,
        "no explicit connectivity issues found"
    );
}

#[tokio::test]
async fn test_network_default_deny_policy() {
    let cluster = web_stack().with_object(json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "NetworkPolicy",
        "metadata": {"name": "deny-all", "namespace": "shop"},
        "spec": {"podSelector": {}, "policyTypes": ["Ingress"]}
    }));
    let svc = service(Arc::new(cluster));

    let analysis = debug_network(&svc, &admin(), &network("web")).await.unwrap();

    assert!(analysis.has_cause("Default-deny NetworkPolicy"));
    assert!(
        analysis
            .resources()
            .contains(&"networkpolicies/shop/deny-all".to_string())
    );
}

#[tokio::test]
async fn test_network_missing_service() {
    let svc = service(Arc::new(web_stack()));
    let analysis = debug_network(&svc, &admin(), &network("api")).await.unwrap();
    assert!(analysis.has_cause("Service not found"));
    assert_eq!(analysis.evidence_with_label("notFound").count(), 1);
}

fn rbac_cluster() -> InMemoryCluster {
    InMemoryCluster::new()
        .with_object(json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": {
                "name": "builder",
                "namespace": "shop",
                "annotations": {"eks.amazonaws.com/role-arn": "arn:aws:iam::123456789012:role/builder"}
            }
        }))
        .with_object(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "Role",
            "metadata": {"name": "pod-reader", "namespace": "shop"},
            "rules": [{"apiGroups": [""], "resources": ["pods"], "verbs": ["get", "list", "watch"]}]
        }))
        .with_object(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "RoleBinding",
            "metadata": {"name": "builder-read", "namespace": "shop"},
            "roleRef": {"apiGroup": "rbac.authorization.k8s.io", "kind": "Role", "name": "pod-reader"},
            "subjects": [{"kind": "ServiceAccount", "name": "builder", "namespace": "shop"}]
        }))
}

fn permissions(verb: &str) -> PermissionsRequest {
    PermissionsRequest {
        namespace: "shop".to_string(),
        service_account: "builder".to_string(),
        verb: Some(verb.to_string()),
        resource: Some("pods".to_string()),
        api_group: None,
    }
}

#[tokio::test]
async fn test_permissions_granted_and_denied() {
    let svc = service(Arc::new(rbac_cluster()));

    let granted = debug_permissions(&svc, &admin(), &permissions("list"), None)
        .await
        .unwrap();
    assert!(granted.causes().is_empty());
    assert_eq!(
        granted.evidence_with_label("grantedBy").next().unwrap().payload,
        json!(["Role/shop/pod-reader"])
    );

    let denied = debug_permissions(&svc, &admin(), &permissions("delete"), None)
        .await
        .unwrap();
    let cause = denied.cause("No rule grants delete on pods").expect("cause");
    assert_eq!(cause.severity, Severity::High);
}

#[tokio::test]
async fn test_permissions_namespaced_caller_and_cloud_lookup() {
    let invoker = invoker(Arc::new(rbac_cluster()));

    let rendered = invoker
        .invoke(
            &namespaced(&["shop"]),
            "debug_permissions",
            json!({"namespace": "shop", "serviceAccount": "builder"}),
            InvokeOptions::default(),
        )
        .await
        .unwrap();

    let evidence = rendered["evidence"].as_array().unwrap();
    let payload_of = |label: &str| {
        evidence
            .iter()
            .find(|e| e["label"] == label)
            .map(|e| e["payload"].clone())
    };
    assert_eq!(
        payload_of("clusterRoleBindings"),
        Some(json!("requires cluster role"))
    );
    assert_eq!(
        payload_of("cloud_iam_role_lookup"),
        Some(json!("capability unavailable"))
    );
}

#[tokio::test]
async fn test_unbound_account_for_namespaced_caller_is_not_a_cause() {
    let cluster = InMemoryCluster::new().with_object(json!({
        "apiVersion": "v1",
        "kind": "ServiceAccount",
        "metadata": {"name": "lonely", "namespace": "shop"}
    }));
    let svc = service(Arc::new(cluster));
    let request = PermissionsRequest {
        namespace: "shop".to_string(),
        service_account: "lonely".to_string(),
        ..Default::default()
    };

    let scoped = debug_permissions(&svc, &namespaced(&["shop"]), &request, None)
        .await
        .unwrap();
    assert!(!scoped.has_cause("No bindings for ServiceAccount"));
    assert_eq!(
        scoped.evidence_with_label("roleBindingsOnly").next().unwrap().payload,
        json!("no RoleBinding in shop grants lonely a role")
    );
    assert_eq!(
        scoped.evidence_with_label("clusterRoleBindings").next().unwrap().payload,
        json!("requires cluster role")
    );

    let full = debug_permissions(&svc, &admin(), &request, None)
        .await
        .unwrap();
    let cause = full.cause("No bindings for ServiceAccount").expect("cause");
    assert_eq!(cause.severity, Severity::Medium);
}

#[tokio::test]
async fn test_missing_service_account() {
    let svc = service(Arc::new(InMemoryCluster::new()));
    let analysis = debug_permissions(
        &svc,
        &admin(),
        &PermissionsRequest {
            namespace: "shop".to_string(),
            service_account: "ghost".to_string(),
            ..Default::default()
        },
        None,
    )
    .await
    .unwrap();
    assert!(analysis.has_cause("ServiceAccount not found"));
    assert!(
        analysis
            .next_checks()
            .contains(&"kubectl create serviceaccount ghost -n shop".to_string())
    );
}

#[tokio::test]
async fn test_handlers_validate_and_gate_namespace() {
    let svc = service(Arc::new(web_stack()));

    let err = debug_network(
        &svc,
        &admin(),
        &NetworkRequest {
            namespace: String::new(),
            service: "web".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "validation");

    let err = debug_network(&svc, &admin(), &network(""))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation");

    let err = debug_network(&svc, &namespaced(&["payments"]), &network("web"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "policy");

    let err = debug_scheduling(
        &svc,
        &namespaced(&["payments"]),
        &SchedulingRequest {
            namespace: "shop".to_string(),
            pod: None,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "policy");
}

#[tokio::test]
async fn test_cancelled_handler_returns_partial() {
    let svc = service(Arc::new(web_stack()));
    let ctx = admin();
    ctx.cancel();

    let err = debug_network(&svc, &ctx, &network("web")).await.unwrap_err();
    assert_eq!(err.code(), "cancelled");
    assert_eq!(err.partial().map(|a| a.kind()), Some("network"));
}

#[tokio::test]
async fn test_cancel_inside_graph_build_keeps_handler_analysis() {
    let cluster = CancelOnList::new(web_stack(), "Pod");
    let ctx = cluster.context();
    let svc = cluster.into_service();

    let err = debug_network(&svc, &ctx, &network("web")).await.unwrap_err();
    assert_eq!(err.code(), "cancelled");

    let partial = err.partial().expect("partial analysis");
    assert_eq!(partial.kind(), "network");
    assert_eq!(partial.namespace(), "shop");
    assert!(partial.resources().contains(&"services/shop/web".to_string()));
    let graph = &partial
        .evidence_with_label("partialGraph")
        .next()
        .expect("nested partial graph")
        .payload;
    assert!(
        graph["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .any(|n| n["id"] == "Service:shop:web")
    );
}

#[tokio::test]
async fn test_hpa_without_metrics_api() {
    let cluster = web_stack().with_object(json!({
        "apiVersion": "autoscaling/v2",
        "kind": "HorizontalPodAutoscaler",
        "metadata": {"name": "web", "namespace": "shop"},
        "spec": {
            "scaleTargetRef": {"apiVersion": "apps/v1", "kind": "Deployment", "name": "web"},
            "minReplicas": 1,
            "maxReplicas": 3,
            "metrics": [{"type": "Resource", "resource": {"name": "cpu",
                "target": {"type": "Utilization", "averageUtilization": 70}}}]
        },
        "status": {"currentReplicas": 1, "desiredReplicas": 1}
    }));
    let svc = service(Arc::new(cluster));

    let analysis = debug_hpa(
        &svc,
        &admin(),
        &HpaRequest {
            namespace: "shop".to_string(),
            name: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(
        analysis.evidence_with_label("metricsApi").next().unwrap().payload,
        "unavailable"
    );
    assert_eq!(
        analysis.cause("Metrics API unavailable").unwrap().severity,
        Severity::High
    );
    assert!(
        analysis
            .resources()
            .contains(&"deployments/shop/web".to_string())
    );
}

#[tokio::test]
async fn test_vpa_crd_missing() {
    let svc = service(Arc::new(web_stack()));
    let analysis = debug_vpa(
        &svc,
        &admin(),
        &VpaRequest {
            namespace: "shop".to_string(),
            name: None,
        },
    )
    .await
    .unwrap();
    assert!(analysis.has_cause("VPA CRD missing"));
}

#[tokio::test]
async fn test_vpa_recommendation_only_mode() {
    let cluster = web_stack().with_object(json!({
        "apiVersion": "autoscaling.k8s.io/v1",
        "kind": "VerticalPodAutoscaler",
        "metadata": {"name": "web", "namespace": "shop"},
        "spec": {
            "targetRef": {"apiVersion": "apps/v1", "kind": "Deployment", "name": "web"},
            "updatePolicy": {"updateMode": "Off"}
        },
        "status": {"recommendation": {"containerRecommendations": [
            {"containerName": "app", "target": {"cpu": "250m", "memory": "256Mi"}}
        ]}}
    }));
    let svc = service(Arc::new(cluster));

    let analysis = debug_vpa(
        &svc,
        &namespaced(&["shop"]),
        &VpaRequest {
            namespace: "shop".to_string(),
            name: Some("web".to_string()),
        },
    )
    .await
    .unwrap();

    let titles: Vec<&str> = analysis.causes().iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, ["VPA in recommendation-only mode"]);
    assert_eq!(
        analysis.evidence_with_label("admissionWebhook").next().unwrap().payload,
        "requires cluster role"
    );
    assert!(
        analysis
            .resources()
            .contains(&"deployments/shop/web".to_string())
    );
}
