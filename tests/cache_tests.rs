//! Graph cache tests
//!
//! Run with paused tokio time so TTL expiry is deterministic.

mod common;

use clusterlens::services::{DiagnosticService, EngineSettings};
use clusterlens::policy::RolePolicy;
use clusterlens::trace::{GraphCache, GraphCacheKey, GraphQuery, ResourceGraph};
use common::*;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_second_request_is_served_from_cache() {
    let cluster = Arc::new(web_stack());
    let svc = service(cluster.clone());
    let query = GraphQuery::new("Service", "shop", "web");

    let first = svc.build_graph(&admin(), &query).await.unwrap();
    let second = svc.build_graph(&admin(), &query).await.unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.graph.nodes, second.graph.nodes);

    let stats = svc.cache().stats().await;
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.fresh_entries, 1);
}

async fn counted(
    cache: &GraphCache,
    key: &GraphCacheKey,
    builds: &AtomicUsize,
) -> bool {
    let lookup = cache
        .get_or_build(key, Duration::from_secs(30), || async {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>((ResourceGraph::new(), vec!["built".to_string()]))
        })
        .await
        .unwrap();
    lookup.from_cache
}

#[tokio::test(start_paused = true)]
async fn test_build_runs_once_per_ttl_window() {
    let cache = GraphCache::new();
    let key = GraphCacheKey::new("svc", "shop", "web", false);
    let builds = AtomicUsize::new(0);

    assert!(!counted(&cache, &key, &builds).await);
    assert!(counted(&cache, &key, &builds).await);
    assert_eq!(builds.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(!counted(&cache, &key, &builds).await);
    assert!(counted(&cache, &key, &builds).await);
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_entry_expires_after_ttl() {
    let svc = service(Arc::new(web_stack()));
    let query = GraphQuery::new("Service", "shop", "web");

    svc.build_graph(&admin(), &query).await.unwrap();
    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(svc.build_graph(&admin(), &query).await.unwrap().from_cache);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(svc.cache().stats().await.expired_entries, 1);
    let rebuilt = svc.build_graph(&admin(), &query).await.unwrap();
    assert!(!rebuilt.from_cache);
    assert_eq!(svc.cache().stats().await.fresh_entries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_ttl_disables_caching() {
    let settings = EngineSettings {
        graph_ttl: Duration::ZERO,
        ..EngineSettings::default()
    };
    let svc = service_with(Arc::new(web_stack()), settings);
    let query = GraphQuery::new("Service", "shop", "web");

    assert!(!svc.build_graph(&admin(), &query).await.unwrap().from_cache);
    assert!(!svc.build_graph(&admin(), &query).await.unwrap().from_cache);
    assert_eq!(svc.cache().stats().await.total_entries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_key_normalizes_kind_and_separates_mesh() {
    let svc = service(Arc::new(web_stack()));

    svc.build_graph(&admin(), &GraphQuery::new("Service", "shop", "web"))
        .await
        .unwrap();
    let alias = svc
        .build_graph(&admin(), &GraphQuery::new("svc", "shop", "web"))
        .await
        .unwrap();
    assert!(alias.from_cache);

    let mesh = svc
        .build_graph(
            &admin(),
            &GraphQuery::new("Service", "shop", "web").with_mesh(true),
        )
        .await
        .unwrap();
    assert!(!mesh.from_cache);
    assert_eq!(svc.cache().stats().await.total_entries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_cache_is_shared_across_users_after_policy_check() {
    let svc = service(Arc::new(web_stack()));
    let query = GraphQuery::new("Service", "shop", "web");

    svc.build_graph(&admin(), &query).await.unwrap();
    let hit = svc
        .build_graph(&namespaced(&["shop"]), &query)
        .await
        .unwrap();
    assert!(hit.from_cache);

    // the gate still runs before the cache is consulted
    let denied = svc.build_graph(&namespaced(&["payments"]), &query).await;
    assert_eq!(denied.unwrap_err().code(), "policy");
}

#[tokio::test(start_paused = true)]
async fn test_hit_carries_no_warnings() {
    let cluster = web_stack().with_failed_group("metrics.k8s.io", "timeout");
    let svc = service(Arc::new(cluster));
    let query = GraphQuery::new("Service", "shop", "web");

    let first = svc.build_graph(&admin(), &query).await.unwrap();
    assert!(!first.warnings.is_empty());
    let second = svc.build_graph(&admin(), &query).await.unwrap();
    assert!(second.from_cache);
    assert!(second.warnings.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_errors_are_not_cached() {
    let svc = service(Arc::new(web_stack()));
    let query = GraphQuery::new("Service", "shop", "api");

    assert_eq!(
        svc.build_graph(&admin(), &query).await.unwrap_err().code(),
        "not_found"
    );
    assert_eq!(svc.cache().stats().await.total_entries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_services_can_share_a_cache_handle() {
    let cache = GraphCache::new();
    let cluster = Arc::new(web_stack());
    let one = DiagnosticService::with_cache(
        cluster.clone(),
        Arc::new(RolePolicy),
        EngineSettings::default(),
        cache.clone(),
    );
    let two = DiagnosticService::with_cache(
        cluster,
        Arc::new(RolePolicy),
        EngineSettings::default(),
        cache.clone(),
    );
    let query = GraphQuery::new("Service", "shop", "web");

    one.build_graph(&admin(), &query).await.unwrap();
    assert!(two.build_graph(&admin(), &query).await.unwrap().from_cache);

    cache.clear().await;
    assert!(!two.build_graph(&admin(), &query).await.unwrap().from_cache);
}
