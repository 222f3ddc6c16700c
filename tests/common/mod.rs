//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use clusterlens::analysis::NoRedaction;
use clusterlens::kube::{ClusterApi, ClusterError, DiscoveryDoc, InMemoryCluster, ListQuery, ObjectDoc};
use clusterlens::models::ResourceIdentity;
use clusterlens::policy::{RolePolicy, User};
use clusterlens::services::{DiagnosticService, EngineSettings, RequestContext};
use clusterlens::tools::{ToolInvoker, builtin_registry};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub fn service_with(cluster: Arc<InMemoryCluster>, settings: EngineSettings) -> DiagnosticService {
    DiagnosticService::new(cluster, Arc::new(RolePolicy), settings)
}

pub fn service(cluster: Arc<InMemoryCluster>) -> DiagnosticService {
    service_with(cluster, EngineSettings::default())
}

/// Invoker over every built-in capability, without redaction
pub fn invoker(cluster: Arc<InMemoryCluster>) -> ToolInvoker {
    let service = Arc::new(service(cluster));
    let registry = builtin_registry(service, Arc::new(NoRedaction)).unwrap();
    ToolInvoker::new(Arc::new(registry), Arc::new(RolePolicy))
}

/// Cluster that cancels the request the first time `kind` is listed
///
/// The list itself still answers; the next call made under the token sees the
/// cancellation, so traversal stops mid-way with real partial state.
pub struct CancelOnList {
    inner: Arc<InMemoryCluster>,
    kind: &'static str,
    token: CancellationToken,
}

impl CancelOnList {
    pub fn new(inner: InMemoryCluster, kind: &'static str) -> Self {
        Self {
            inner: Arc::new(inner),
            kind,
            token: CancellationToken::new(),
        }
    }

    /// Admin context bound to the cancelling token
    pub fn context(&self) -> RequestContext {
        admin().with_token(self.token.clone())
    }

    pub fn into_service(self) -> DiagnosticService {
        DiagnosticService::new(Arc::new(self), Arc::new(RolePolicy), EngineSettings::default())
    }
}

#[async_trait]
impl ClusterApi for CancelOnList {
    async fn discover(&self) -> Result<DiscoveryDoc, ClusterError> {
        self.inner.discover().await
    }

    async fn get(
        &self,
        identity: &ResourceIdentity,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<ObjectDoc>, ClusterError> {
        self.inner.get(identity, namespace, name).await
    }

    async fn list(
        &self,
        identity: &ResourceIdentity,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> Result<Vec<ObjectDoc>, ClusterError> {
        if identity.kind == self.kind {
            self.token.cancel();
        }
        self.inner.list(identity, namespace, query).await
    }

    async fn patch_merge(
        &self,
        identity: &ResourceIdentity,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<ObjectDoc, ClusterError> {
        self.inner.patch_merge(identity, namespace, name, patch).await
    }

    async fn delete(
        &self,
        identity: &ResourceIdentity,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.inner.delete(identity, namespace, name).await
    }
}

pub fn admin() -> RequestContext {
    RequestContext::new(User::cluster("admin"))
}

pub fn namespaced(namespaces: &[&str]) -> RequestContext {
    RequestContext::new(User::namespaced("dev", namespaces))
}

pub fn deployment(ns: &str, name: &str, uid: &str, replicas: i64) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": ns, "uid": uid},
        "spec": {
            "replicas": replicas,
            "selector": {"matchLabels": {"app": name}},
            "template": {"metadata": {"labels": {"app": name}}}
        },
        "status": {"readyReplicas": replicas}
    })
}

pub fn replica_set(ns: &str, name: &str, uid: &str, owner: &str, owner_uid: &str) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "ReplicaSet",
        "metadata": {
            "name": name,
            "namespace": ns,
            "uid": uid,
            "ownerReferences": [{
                "apiVersion": "apps/v1", "kind": "Deployment",
                "name": owner, "uid": owner_uid, "controller": true
            }]
        },
        "spec": {"replicas": 1}
    })
}

pub fn pod(ns: &str, name: &str, app: &str, owner: Option<(&str, &str)>) -> Value {
    let mut pod = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": name, "namespace": ns, "uid": format!("uid-{}", name), "labels": {"app": app}},
        "spec": {"containers": [{"name": "app", "image": "nginx", "ports": [{"containerPort": 8080}]}]},
        "status": {"phase": "Running"}
    });
    if let Some((rs, rs_uid)) = owner {
        pod["metadata"]["ownerReferences"] = json!([{
            "apiVersion": "apps/v1", "kind": "ReplicaSet",
            "name": rs, "uid": rs_uid, "controller": true
        }]);
    }
    pod
}

pub fn service_object(ns: &str, name: &str, app: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": name, "namespace": ns},
        "spec": {
            "type": "ClusterIP",
            "selector": {"app": app},
            "ports": [{"port": 80, "targetPort": 8080}]
        }
    })
}

pub fn endpoints(ns: &str, name: &str, pods: &[&str]) -> Value {
    let addresses: Vec<Value> = pods
        .iter()
        .enumerate()
        .map(|(i, p)| {
            json!({
                "ip": format!("10.0.0.{}", i + 10),
                "targetRef": {"kind": "Pod", "name": p, "namespace": ns}
            })
        })
        .collect();
    json!({
        "apiVersion": "v1",
        "kind": "Endpoints",
        "metadata": {"name": name, "namespace": ns},
        "subsets": [{"addresses": addresses, "ports": [{"port": 8080}]}]
    })
}

/// Service `web` in `shop` routing to one pod owned by ReplicaSet → Deployment
pub fn web_stack() -> InMemoryCluster {
    InMemoryCluster::new()
        .with_object(deployment("shop", "web", "dep-web", 1))
        .with_object(replica_set("shop", "web-5d8f", "rs-web", "web", "dep-web"))
        .with_object(pod("shop", "web-5d8f-abcde", "web", Some(("web-5d8f", "rs-web"))))
        .with_object(service_object("shop", "web", "web"))
        .with_object(endpoints("shop", "web", &["web-5d8f-abcde"]))
}

pub fn pvc(ns: &str, name: &str, class: &str, phase: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": {"name": name, "namespace": ns, "uid": format!("uid-{}", name)},
        "spec": {
            "storageClassName": class,
            "accessModes": ["ReadWriteOnce"],
            "resources": {"requests": {"storage": "10Gi"}}
        },
        "status": {"phase": phase}
    })
}

pub fn event(ns: &str, name: &str, involved_uid: &str, reason: &str, message: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Event",
        "metadata": {"name": name, "namespace": ns},
        "involvedObject": {"uid": involved_uid},
        "type": "Warning",
        "reason": reason,
        "message": message,
        "count": 3,
        "lastTimestamp": "2026-01-01T00:00:00Z"
    })
}
