//! Graph building tests
//!
//! Relationship traversal around Services, Deployments and Pods, plus the
//! validation, policy and partial-failure behaviour of graph requests.

mod common;

use clusterlens::kube::InMemoryCluster;
use clusterlens::models::ResourceIdentity;
use clusterlens::services::EngineSettings;
use clusterlens::trace::{GraphQuery, Relation, node_id};
use common::*;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_service_graph_follows_endpoints_and_owners() {
    let svc = service(Arc::new(web_stack()));
    let lookup = svc
        .build_graph(&admin(), &GraphQuery::new("Service", "shop", "web"))
        .await
        .unwrap();
    let graph = &lookup.graph;

    assert!(graph.nodes.len() >= 4);
    assert!(graph.contains(&node_id("Service", "shop", "web")));
    assert!(graph.contains(&node_id("Endpoints", "shop", "web")));
    assert!(graph.contains(&node_id("ReplicaSet", "shop", "web-5d8f")));
    assert!(graph.contains(&node_id("Deployment", "shop", "web")));

    let routes: Vec<_> = graph.edges_with(Relation::RoutesTo).collect();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].from, node_id("Service", "shop", "web"));
    assert_eq!(routes[0].to, node_id("Pod", "shop", "web-5d8f-abcde"));

    assert_eq!(graph.edges_with(Relation::OwnedBy).count(), 2);
    assert!(lookup.warnings.is_empty());
    assert!(!lookup.from_cache);

    for edge in &graph.edges {
        assert!(graph.contains(&edge.from) && graph.contains(&edge.to), "{:?}", edge);
    }
}

#[tokio::test]
async fn test_missing_mesh_apis_are_warnings() {
    let svc = service(Arc::new(web_stack()));
    let lookup = svc
        .build_graph(
            &admin(),
            &GraphQuery::new("Service", "shop", "web").with_mesh(true),
        )
        .await
        .unwrap();

    assert!(lookup.graph.contains(&node_id("Deployment", "shop", "web")));
    assert!(!lookup.warnings.is_empty());
}

fn http_route(ns: &str, name: &str, backend: serde_json::Value) -> serde_json::Value {
    json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "HTTPRoute",
        "metadata": {"name": name, "namespace": ns},
        "spec": {"rules": [{"backendRefs": [backend]}]}
    })
}

#[tokio::test]
async fn test_http_route_in_another_namespace_reaches_service() {
    let cluster = web_stack()
        .with_crd(ResourceIdentity::new(
            "gateway.networking.k8s.io",
            "v1",
            "httproutes",
            "HTTPRoute",
            true,
        ))
        .with_object(http_route(
            "edge",
            "storefront",
            json!({"name": "web", "namespace": "shop", "port": 80}),
        ))
        // same Service name, but resolves to the route's own namespace
        .with_object(http_route("other", "lookalike", json!({"name": "web", "port": 80})));
    let svc = service(Arc::new(cluster));

    let lookup = svc
        .build_graph(
            &admin(),
            &GraphQuery::new("Service", "shop", "web").with_mesh(true),
        )
        .await
        .unwrap();
    let graph = &lookup.graph;

    assert!(graph.contains(&node_id("HTTPRoute", "edge", "storefront")));
    assert!(!graph.contains(&node_id("HTTPRoute", "other", "lookalike")));
    assert!(graph.edges_with(Relation::RoutesTo).any(|e| {
        e.from == node_id("HTTPRoute", "edge", "storefront")
            && e.to == node_id("Service", "shop", "web")
    }));
}

#[tokio::test]
async fn test_short_name_resolves_root() {
    let svc = service(Arc::new(web_stack()));
    let lookup = svc
        .build_graph(&admin(), &GraphQuery::new("svc", "shop", "web"))
        .await
        .unwrap();
    assert!(lookup.graph.contains(&node_id("Service", "shop", "web")));
}

#[tokio::test]
async fn test_deployment_graph_walks_down_ownership() {
    let svc = service(Arc::new(web_stack()));
    let lookup = svc
        .build_graph(&admin(), &GraphQuery::new("Deployment", "shop", "web"))
        .await
        .unwrap();
    let graph = &lookup.graph;

    assert_eq!(graph.nodes.len(), 3);
    let pod_id = node_id("Pod", "shop", "web-5d8f-abcde");
    let owners = graph.targets(&pod_id, Relation::OwnedBy);
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "ReplicaSet");
    // pods reached downwards do not pull in Services
    assert_eq!(graph.nodes_of_kind("Service").count(), 0);
}

#[tokio::test]
async fn test_pod_graph_finds_selecting_service() {
    let svc = service(Arc::new(web_stack()));
    let lookup = svc
        .build_graph(&admin(), &GraphQuery::new("Pod", "shop", "web-5d8f-abcde"))
        .await
        .unwrap();
    let pod_id = node_id("Pod", "shop", "web-5d8f-abcde");
    let selecting = lookup.graph.sources(&pod_id, Relation::Selects);
    assert_eq!(selecting.len(), 1);
    assert_eq!(selecting[0].name, "web");
}

#[tokio::test]
async fn test_max_hops_bounds_traversal() {
    let settings = EngineSettings {
        max_hops: 1,
        ..EngineSettings::default()
    };
    let svc = service_with(Arc::new(web_stack()), settings);
    let lookup = svc
        .build_graph(&admin(), &GraphQuery::new("Service", "shop", "web"))
        .await
        .unwrap();
    assert!(lookup.graph.contains(&node_id("Pod", "shop", "web-5d8f-abcde")));
    assert_eq!(lookup.graph.edges_with(Relation::OwnedBy).count(), 0);
}

#[tokio::test]
async fn test_partial_discovery_is_reported_as_warning() {
    let cluster = web_stack().with_failed_group("metrics.k8s.io", "service unavailable");
    let svc = service(Arc::new(cluster));
    let lookup = svc
        .build_graph(&admin(), &GraphQuery::new("Service", "shop", "web"))
        .await
        .unwrap();

    assert!(lookup.graph.nodes.len() >= 4);
    assert!(
        lookup
            .warnings
            .iter()
            .any(|w| w.contains("metrics.k8s.io") && w.contains("service unavailable"))
    );
}

#[tokio::test]
async fn test_failed_list_becomes_warning() {
    let cluster = web_stack().with_list_failure("Ingress");
    let svc = service(Arc::new(cluster));
    let lookup = svc
        .build_graph(&admin(), &GraphQuery::new("Service", "shop", "web"))
        .await
        .unwrap();

    assert!(lookup.graph.contains(&node_id("Deployment", "shop", "web")));
    assert!(lookup.warnings.iter().any(|w| w.contains("list ingresses")));
}

#[tokio::test]
async fn test_ingress_routes_to_service() {
    let cluster = web_stack().with_object(json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": {"name": "shop", "namespace": "shop"},
        "spec": {"rules": [{"host": "shop.example.com", "http": {"paths": [
            {"path": "/", "pathType": "Prefix",
             "backend": {"service": {"name": "web", "port": {"number": 80}}}}
        ]}}]}
    }));
    let svc = service(Arc::new(cluster));
    let lookup = svc
        .build_graph(&admin(), &GraphQuery::new("Ingress", "shop", "shop"))
        .await
        .unwrap();

    let ingress_id = node_id("Ingress", "shop", "shop");
    let backends = lookup.graph.targets(&ingress_id, Relation::RoutesTo);
    assert_eq!(backends.len(), 1);
    assert_eq!(backends[0].id, node_id("Service", "shop", "web"));
}

#[tokio::test]
async fn test_network_policy_peers() {
    let cluster = web_stack()
        .with_object(pod("shop", "frontend-0", "frontend", None))
        .with_object(json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "NetworkPolicy",
            "metadata": {"name": "web-ingress", "namespace": "shop"},
            "spec": {
                "podSelector": {"matchLabels": {"app": "web"}},
                "ingress": [{"from": [
                    {"podSelector": {"matchLabels": {"app": "frontend"}}},
                    {"ipBlock": {"cidr": "10.0.0.0/8", "except": ["10.1.0.0/16"]}}
                ]}]
            }
        }));
    let svc = service(Arc::new(cluster));
    let lookup = svc
        .build_graph(&admin(), &GraphQuery::new("NetworkPolicy", "shop", "web-ingress"))
        .await
        .unwrap();
    let graph = &lookup.graph;
    let policy_id = node_id("NetworkPolicy", "shop", "web-ingress");

    let selected = graph.targets(&policy_id, Relation::Selects);
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].id, node_id("Pod", "shop", "web-5d8f-abcde"));

    let mut peers: Vec<String> = graph
        .targets(&policy_id, Relation::AllowsFrom)
        .iter()
        .map(|n| n.id.clone())
        .collect();
    peers.sort();
    assert_eq!(
        peers,
        vec![
            node_id("IPBlock", "", "10.0.0.0/8"),
            node_id("Pod", "shop", "frontend-0"),
        ]
    );

    // the selected pod is walked up to its owners
    assert!(graph.contains(&node_id("Deployment", "shop", "web")));
    for edge in &graph.edges {
        assert!(graph.contains(&edge.from) && graph.contains(&edge.to), "{:?}", edge);
    }
}

#[tokio::test]
async fn test_graph_request_validation() {
    let svc = service(Arc::new(web_stack()));

    let err = svc
        .build_graph(&admin(), &GraphQuery::new("Service", "", "web"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation");

    let err = svc
        .build_graph(&admin(), &GraphQuery::new("Service", "shop", ""))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation");
}

#[tokio::test]
async fn test_unknown_kind_and_missing_root() {
    let svc = service(Arc::new(web_stack()));

    let err = svc
        .build_graph(&admin(), &GraphQuery::new("Widget", "shop", "web"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "resolution");

    let err = svc
        .build_graph(&admin(), &GraphQuery::new("Service", "shop", "api"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
    assert!(err.to_string().contains("api"));
}

#[tokio::test]
async fn test_namespaced_user_is_gated() {
    let svc = service(Arc::new(web_stack()));

    let err = svc
        .build_graph(&namespaced(&["payments"]), &GraphQuery::new("Service", "shop", "web"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "policy");

    let err = svc
        .build_graph(&namespaced(&["shop"]), &GraphQuery::new("Node", "", "worker-1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "policy");

    assert!(
        svc.build_graph(&namespaced(&["shop"]), &GraphQuery::new("Service", "shop", "web"))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_cancelled_build_carries_partial_result() {
    let svc = service(Arc::new(web_stack()));
    let ctx = admin();
    ctx.cancel();

    let err = svc
        .build_graph(&ctx, &GraphQuery::new("Service", "shop", "web"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "cancelled");
    let partial = err.partial().expect("partial analysis");
    assert_eq!(partial.kind(), "graph");
    assert!(partial.evidence_with_label("partialGraph").next().is_some());
}

#[tokio::test]
async fn test_cancel_during_traversal_keeps_built_nodes() {
    let cluster = CancelOnList::new(web_stack(), "Pod");
    let ctx = cluster.context();
    let svc = cluster.into_service();

    let err = svc
        .build_graph(&ctx, &GraphQuery::new("Service", "shop", "web"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "cancelled");

    let partial = err.partial().expect("partial analysis");
    let graph = &partial
        .evidence_with_label("partialGraph")
        .next()
        .expect("partial graph")
        .payload;
    let ids: Vec<&str> = graph["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|n| n["id"].as_str())
        .collect();
    assert!(ids.contains(&"Service:shop:web"), "{:?}", ids);
    // owners are never reached once the pod listing cancels the request
    assert!(!ids.contains(&"Deployment:shop:web"), "{:?}", ids);
}

#[tokio::test]
async fn test_cluster_scoped_root_for_cluster_user() {
    let cluster = InMemoryCluster::new().with_object(json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": {"name": "worker-1", "labels": {"pool": "general"}}
    }));
    let svc = service(Arc::new(cluster));
    let lookup = svc
        .build_graph(&admin(), &GraphQuery::new("nodes", "", "worker-1"))
        .await
        .unwrap();
    assert!(lookup.graph.contains(&node_id("Node", "", "worker-1")));
}
