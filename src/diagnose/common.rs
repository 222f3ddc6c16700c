//! Shared plumbing for diagnostic handlers
//!
//! A [`Probe`] performs the direct cluster reads a handler makes, racing each
//! one against the request context. Cancellation surfaces as
//! [`DiagnosticError::Cancelled`]; [`finish`] attaches the analysis
//! accumulated so far, folding in any partial graph a nested build returned.

use crate::analysis::{Analysis, Severity};
use crate::constants::MAX_EVENTS_PER_OBJECT;
use crate::error::DiagnosticError;
use crate::kube::{ClusterError, ListQuery, ObjectDoc};
use crate::models::{BuiltinKind, ResourceIdentity};
use crate::resolve::Resolution;
use crate::services::{DiagnosticService, RequestContext};
use crate::trace::{CacheLookup, GraphQuery};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::future::Future;

pub struct Probe<'a> {
    service: &'a DiagnosticService,
    ctx: &'a RequestContext,
}

fn scoped<'n>(identity: &ResourceIdentity, namespace: &'n str) -> Option<&'n str> {
    (identity.namespaced && !namespace.is_empty()).then_some(namespace)
}

impl<'a> Probe<'a> {
    pub fn new(service: &'a DiagnosticService, ctx: &'a RequestContext) -> Self {
        Self { service, ctx }
    }

    pub fn ctx(&self) -> &RequestContext {
        self.ctx
    }

    pub fn service(&self) -> &DiagnosticService {
        self.service
    }

    pub fn has_cluster_scope(&self) -> bool {
        self.service.has_cluster_scope(self.ctx)
    }

    async fn call<T, F>(&self, future: F) -> Result<T, DiagnosticError>
    where
        F: Future<Output = Result<T, ClusterError>>,
    {
        match self.ctx.run(future).await {
            Ok(result) => Ok(result?),
            Err(reason) => Err(DiagnosticError::Cancelled {
                reason,
                partial: None,
            }),
        }
    }

    pub async fn get_identity(
        &self,
        identity: &ResourceIdentity,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObjectDoc>, DiagnosticError> {
        self.call(
            self.service
                .cluster()
                .get(identity, scoped(identity, namespace), name),
        )
        .await
    }

    pub async fn get(
        &self,
        kind: BuiltinKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObjectDoc>, DiagnosticError> {
        self.get_identity(&kind.identity(), namespace, name).await
    }

    pub async fn list_identity(
        &self,
        identity: &ResourceIdentity,
        namespace: &str,
        query: ListQuery,
    ) -> Result<Vec<ObjectDoc>, DiagnosticError> {
        self.call(
            self.service
                .cluster()
                .list(identity, scoped(identity, namespace), &query),
        )
        .await
    }

    pub async fn list(
        &self,
        kind: BuiltinKind,
        namespace: &str,
        query: ListQuery,
    ) -> Result<Vec<ObjectDoc>, DiagnosticError> {
        self.list_identity(&kind.identity(), namespace, query).await
    }

    /// Fetch a built-in object decoded into its k8s-openapi type
    pub async fn get_typed<K: DeserializeOwned>(
        &self,
        kind: BuiltinKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, DiagnosticError> {
        self.get(kind, namespace, name)
            .await?
            .as_ref()
            .map(typed)
            .transpose()
    }

    pub async fn list_typed<K: DeserializeOwned>(
        &self,
        kind: BuiltinKind,
        namespace: &str,
        query: ListQuery,
    ) -> Result<Vec<K>, DiagnosticError> {
        self.list(kind, namespace, query)
            .await?
            .iter()
            .map(typed)
            .collect()
    }

    pub async fn resolve(&self, kind: &str, group: &str) -> Result<Resolution, DiagnosticError> {
        match self.ctx.run(self.service.resolver().resolve(kind, group)).await {
            Ok(result) => Ok(result?),
            Err(reason) => Err(DiagnosticError::Cancelled {
                reason,
                partial: None,
            }),
        }
    }

    /// Whether discovery lists the API group at all
    pub async fn has_api_group(&self, group: &str) -> Result<bool, DiagnosticError> {
        match self.ctx.run(self.service.resolver().discovery()).await {
            Ok(Ok(doc)) => Ok(doc.has_group(group)),
            Ok(Err(_)) => Ok(false),
            Err(reason) => Err(DiagnosticError::Cancelled {
                reason,
                partial: None,
            }),
        }
    }

    pub async fn graph(&self, query: &GraphQuery) -> Result<CacheLookup, DiagnosticError> {
        self.service.build_graph(self.ctx, query).await
    }

    /// Most recent events involving `doc`, oldest first
    pub async fn events_for(&self, doc: &ObjectDoc) -> Result<Vec<Value>, DiagnosticError> {
        let selector = match doc.uid() {
            Some(uid) => format!("involvedObject.uid={}", uid),
            None => format!(
                "involvedObject.kind={},involvedObject.name={}",
                doc.kind(),
                doc.name()
            ),
        };
        let mut events = self
            .list(BuiltinKind::Event, doc.namespace(), ListQuery::fields(selector))
            .await?;
        events.sort_by(|a, b| event_time(a).cmp(event_time(b)));
        let skip = events.len().saturating_sub(MAX_EVENTS_PER_OBJECT);
        Ok(events.iter().skip(skip).map(event_summary).collect())
    }

    /// Events for `doc` recorded under `events:<reference>`, when there are any
    pub async fn attach_events(
        &self,
        analysis: &mut Analysis,
        doc: &ObjectDoc,
        reference: &str,
    ) -> Result<Vec<Value>, DiagnosticError> {
        let events = self.events_for(doc).await?;
        if !events.is_empty() {
            analysis.add_evidence(format!("events:{}", reference), events.clone());
        }
        Ok(events)
    }
}

fn event_time(event: &ObjectDoc) -> &str {
    event
        .str_at(&["lastTimestamp"])
        .or_else(|| event.str_at(&["eventTime"]))
        .or_else(|| event.str_at(&["metadata", "creationTimestamp"]))
        .unwrap_or("")
}

fn event_summary(event: &ObjectDoc) -> Value {
    json!({
        "type": event.str_at(&["type"]).unwrap_or("Normal"),
        "reason": event.str_at(&["reason"]).unwrap_or(""),
        "message": event.str_at(&["message"]).unwrap_or(""),
        "count": event.i64_at(&["count"]).unwrap_or(1),
    })
}

/// Whether any summarized event mentions `needle` in its reason or message
pub fn events_mention(events: &[Value], needle: &str) -> bool {
    events.iter().any(|e| {
        ["reason", "message"]
            .iter()
            .filter_map(|k| e.get(*k).and_then(Value::as_str))
            .any(|s| s.contains(needle))
    })
}

/// Decode a document into its k8s-openapi type
pub fn typed<K: DeserializeOwned>(doc: &ObjectDoc) -> Result<K, DiagnosticError> {
    doc.into_typed()
        .map_err(|e| DiagnosticError::Cluster(ClusterError::from(e)))
}

/// Record a target that does not exist
pub fn record_missing(analysis: &mut Analysis, kind: BuiltinKind, namespace: &str, name: &str) {
    let reference = kind.identity().reference(namespace, name);
    analysis.add_evidence("notFound", format!("{} not found", reference));
    analysis.add_cause(
        format!("{} not found", kind.as_str()),
        format!("{} does not exist", reference),
        Severity::Medium,
    );
}

/// Keep one target's failure from aborting the rest
///
/// Cancellation still propagates.
pub fn isolate(
    analysis: &mut Analysis,
    reference: &str,
    result: Result<(), DiagnosticError>,
) -> Result<(), DiagnosticError> {
    match result {
        Ok(()) => Ok(()),
        Err(err @ DiagnosticError::Cancelled { .. }) => Err(err),
        Err(err) => {
            tracing::warn!(target_ref = %reference, error = %err, "Target check failed");
            analysis.add_evidence(
                format!("error:{}", reference),
                json!({"code": err.code(), "message": err.to_string()}),
            );
            Ok(())
        }
    }
}

/// Close out a handler run
///
/// On success an empty cause list becomes a "no explicit ... found" entry;
/// on cancellation the analysis rides along as the partial result.
pub fn finish(
    mut analysis: Analysis,
    result: Result<(), DiagnosticError>,
    what: &str,
) -> Result<Analysis, DiagnosticError> {
    match result {
        Ok(()) => {
            analysis.conclude(what);
            Ok(analysis)
        }
        Err(DiagnosticError::Cancelled { reason, partial }) => {
            // a nested graph build brings its own partial; keep it inside this one
            if let Some(inner) = partial {
                analysis.absorb(&inner);
            }
            Err(DiagnosticError::cancelled(reason, analysis))
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Interrupted;

    #[test]
    fn test_finish_concludes_or_attaches_partial() {
        let done = finish(Analysis::new("hpa", "default"), Ok(()), "autoscaling issues").unwrap();
        assert_eq!(
            done.evidence()[0].payload,
            Value::from("no explicit autoscaling issues found")
        );

        let mut partial = Analysis::new("hpa", "default");
        partial.add_evidence("hpa", "web");
        let err = finish(
            partial,
            Err(DiagnosticError::Cancelled {
                reason: Interrupted::Cancelled,
                partial: None,
            }),
            "autoscaling issues",
        )
        .unwrap_err();
        assert_eq!(err.partial().map(|a| a.evidence().len()), Some(1));
    }

    #[test]
    fn test_finish_folds_nested_graph_partial() {
        let mut network = Analysis::new("network", "shop");
        network.add_resource("services/shop/web");
        network.add_evidence("service", "web");

        let mut graph = Analysis::new("graph", "");
        graph.add_evidence("partialGraph", json!({"nodes": [], "edges": []}));
        graph.add_evidence("warnings", json!(["list pods: interrupted"]));

        let err = finish(
            network,
            Err(DiagnosticError::cancelled(Interrupted::Cancelled, graph)),
            "connectivity issues",
        )
        .unwrap_err();
        let partial = err.partial().unwrap();
        assert_eq!(partial.kind(), "network");
        assert_eq!(partial.resources(), ["services/shop/web"]);
        let labels: Vec<&str> = partial.evidence().iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, ["service", "partialGraph", "warnings"]);
    }

    #[test]
    fn test_isolate_records_failures_as_evidence() {
        let mut analysis = Analysis::new("storage", "default");
        isolate(
            &mut analysis,
            "persistentvolumeclaims/default/data",
            Err(DiagnosticError::validation("bad")),
        )
        .unwrap();
        assert_eq!(
            analysis.evidence()[0].label,
            "error:persistentvolumeclaims/default/data"
        );
    }

    #[test]
    fn test_events_mention() {
        let events = vec![json!({"reason": "Unhealthy", "message": "Liveness probe failed: 500"})];
        assert!(events_mention(&events, "Liveness probe failed"));
        assert!(!events_mention(&events, "Readiness"));
    }
}
