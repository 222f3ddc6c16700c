//! Declarative relation rules
//!
//! `rules_for(kind)` lists the rules that expand an object of that kind. A rule
//! looks at one object, reads whatever it needs through the traversal scope and
//! returns new objects, leaf nodes, edges and warnings; it never touches the
//! graph itself, so the driver stays generic.

use super::graph::{GraphEdge, GraphNode, Relation, node_id};
use super::graph_builder::{ScopeError, TraversalScope};
use super::selectors::{self, SelectorExt};
use crate::kube::{ListQuery, ObjectDoc, OwnerRef};
use crate::models::{BuiltinKind, split_api_version};
use crate::services::context::Interrupted;
use std::collections::BTreeSet;

/// How the traversal arrived at an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reach {
    /// The object the graph was requested for
    Root,
    /// Followed an owner reference upwards
    Up,
    /// Followed ownership downwards (owned children)
    Down,
    /// Followed a routing, selector or policy relation
    Lateral,
}

/// Every relation rule the builder knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationRule {
    /// Child → owner via `metadata.ownerReferences`
    Owners,
    /// Deployment → owned ReplicaSets
    OwnedReplicaSets,
    /// ReplicaSet/StatefulSet/DaemonSet/Job → owned Pods
    OwnedPods,
    /// CronJob → owned Jobs
    OwnedJobs,
    /// Service → Endpoints (binds) and Endpoints targets (routes-to)
    ServiceEndpoints,
    /// Service → Pods matching `spec.selector`
    ServiceSelector,
    /// Ingresses whose backends name the Service
    IngressesForService,
    /// Services whose selector matches the Pod
    ServicesForPod,
    /// Ingress → backend Services
    IngressBackends,
    /// NetworkPolicy → Pods matched by `spec.podSelector`
    PolicyTargets,
    /// NetworkPolicy → ingress/egress peers
    PolicyPeers,
    /// NetworkPolicies whose pod selector matches the Pod
    PoliciesForPod,
    /// Gateway API HTTPRoutes with the Service as backend
    HttpRoutesForService,
    /// HTTPRoute → parent Gateways
    RouteParents,
    /// HTTPRoute → backend Services
    RouteBackends,
    /// Istio VirtualServices routing to the Service host
    VirtualServicesForService,
    /// VirtualService → destination Services
    VirtualServiceDestinations,
    /// Istio AuthorizationPolicies selecting the Service's pods
    AuthorizationPoliciesForService,
    /// Linkerd ServiceProfile named after the Service FQDN
    ServiceProfileForService,
    /// Linkerd Servers selecting the Service's pods
    ServersForService,
    /// Linkerd Server → selected Pods
    ServerTargets,
    /// Linkerd ServerAuthorizations referencing the Server
    ServerAuthorizations,
}

/// Rule table keyed by source kind
pub fn rules_for(kind: &str) -> &'static [RelationRule] {
    use RelationRule::*;
    match kind {
        "Service" => &[
            Owners,
            ServiceEndpoints,
            ServiceSelector,
            IngressesForService,
            HttpRoutesForService,
            VirtualServicesForService,
            AuthorizationPoliciesForService,
            ServiceProfileForService,
            ServersForService,
        ],
        "Pod" => &[Owners, ServicesForPod, PoliciesForPod],
        "ReplicaSet" | "StatefulSet" | "DaemonSet" | "Job" => &[Owners, OwnedPods],
        "Deployment" => &[Owners, OwnedReplicaSets],
        "CronJob" => &[Owners, OwnedJobs],
        "Ingress" => &[IngressBackends],
        "NetworkPolicy" => &[PolicyTargets, PolicyPeers],
        "HTTPRoute" => &[RouteParents, RouteBackends],
        "VirtualService" => &[VirtualServiceDestinations],
        "Server" => &[ServerTargets, ServerAuthorizations],
        "Endpoints" | "EndpointSlice" => &[],
        _ => &[Owners],
    }
}

impl RelationRule {
    /// Rules that only run when mesh resources were requested
    pub fn is_mesh(&self) -> bool {
        matches!(
            self,
            RelationRule::HttpRoutesForService
                | RelationRule::VirtualServicesForService
                | RelationRule::AuthorizationPoliciesForService
                | RelationRule::ServiceProfileForService
                | RelationRule::ServersForService
        )
    }

    /// Whether the rule runs for an object reached this way
    pub fn applies(&self, reach: Reach, include_mesh: bool) -> bool {
        use RelationRule::*;
        if self.is_mesh() && !include_mesh {
            return false;
        }
        match self {
            Owners => reach != Reach::Down,
            OwnedReplicaSets | OwnedPods | OwnedJobs => matches!(reach, Reach::Root | Reach::Down),
            ServiceEndpoints
            | ServiceSelector
            | IngressBackends
            | PolicyPeers
            | RouteParents
            | VirtualServiceDestinations
            | ServerAuthorizations => matches!(reach, Reach::Root | Reach::Lateral),
            _ => reach == Reach::Root,
        }
    }

    pub async fn apply(
        &self,
        scope: &mut TraversalScope<'_>,
        doc: &ObjectDoc,
    ) -> Result<RuleOutput, Interrupted> {
        use RelationRule::*;
        match self {
            Owners => owners(scope, doc).await,
            OwnedReplicaSets => owned(scope, doc, BuiltinKind::ReplicaSet).await,
            OwnedPods => owned(scope, doc, BuiltinKind::Pod).await,
            OwnedJobs => owned(scope, doc, BuiltinKind::Job).await,
            ServiceEndpoints => service_endpoints(scope, doc).await,
            ServiceSelector => service_selector(scope, doc).await,
            IngressesForService => ingresses_for_service(scope, doc).await,
            ServicesForPod => services_for_pod(scope, doc).await,
            IngressBackends => ingress_backends(scope, doc).await,
            PolicyTargets => super::network::policy_targets(scope, doc).await,
            PolicyPeers => super::network::policy_peers(scope, doc).await,
            PoliciesForPod => super::network::policies_for_pod(scope, doc).await,
            HttpRoutesForService => super::mesh::http_routes_for_service(scope, doc).await,
            RouteParents => super::mesh::route_parents(scope, doc).await,
            RouteBackends => super::mesh::route_backends(scope, doc).await,
            VirtualServicesForService => {
                super::mesh::virtual_services_for_service(scope, doc).await
            }
            VirtualServiceDestinations => {
                super::mesh::virtual_service_destinations(scope, doc).await
            }
            AuthorizationPoliciesForService => {
                super::mesh::authorization_policies_for_service(scope, doc).await
            }
            ServiceProfileForService => super::mesh::service_profile_for_service(scope, doc).await,
            ServersForService => super::mesh::servers_for_service(scope, doc).await,
            ServerTargets => super::mesh::server_targets(scope, doc).await,
            ServerAuthorizations => super::mesh::server_authorizations(scope, doc).await,
        }
    }
}

/// What a rule contributes to the graph
#[derive(Debug, Default)]
pub struct RuleOutput {
    /// Objects to add and keep traversing from
    pub objects: Vec<(ObjectDoc, Reach)>,
    /// Nodes that are added but never expanded
    pub leaves: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub warnings: Vec<String>,
}

impl RuleOutput {
    /// Unwrap a scope result, turning lookup failures into warnings
    ///
    /// `Ok(None)` means the lookup failed and a warning was recorded.
    pub fn check<T>(
        &mut self,
        result: Result<T, ScopeError>,
        what: impl FnOnce() -> String,
    ) -> Result<Option<T>, Interrupted> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(ScopeError::Interrupted(reason)) => Err(reason),
            Err(ScopeError::Failed(message)) => {
                self.warnings.push(format!("{}: {}", what(), message));
                Ok(None)
            }
        }
    }

    pub fn object(&mut self, doc: ObjectDoc, reach: Reach) {
        self.objects.push((doc, reach));
    }

    pub fn edge(&mut self, from: &ObjectDoc, to: &ObjectDoc, relation: Relation) {
        self.edges.push(GraphEdge::new(id_of(from), id_of(to), relation));
    }

    pub fn edge_ids(&mut self, from: String, to: String, relation: Relation) {
        self.edges.push(GraphEdge::new(from, to, relation));
    }
}

pub fn id_of(doc: &ObjectDoc) -> String {
    node_id(doc.kind(), doc.namespace(), doc.name())
}

async fn owners(scope: &mut TraversalScope<'_>, doc: &ObjectDoc) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    for owner_ref in doc.owner_references() {
        let OwnerRef {
            api_version,
            kind,
            name,
            ..
        } = &owner_ref;
        let (group, _) = split_api_version(api_version);
        let Some(identity) = out.check(scope.resolve(kind, group).await, || {
            format!("owner {} of {}", kind, doc.display_name())
        })?
        else {
            continue;
        };
        let Some(found) = out.check(scope.get(&identity, doc.namespace(), name).await, || {
            format!("get owner {}/{} of {}", kind, name, doc.display_name())
        })?
        else {
            continue;
        };
        match found {
            Some(owner) if doc.is_owned_by(&owner) => {
                out.edge(doc, &owner, Relation::OwnedBy);
                out.object(owner, Reach::Up);
            }
            Some(_) => out.warnings.push(format!(
                "owner {}/{} of {} has a different UID",
                kind,
                name,
                doc.display_name()
            )),
            None => out.warnings.push(format!(
                "owner {}/{} of {} not found",
                kind,
                name,
                doc.display_name()
            )),
        }
    }
    Ok(out)
}

async fn owned(
    scope: &mut TraversalScope<'_>,
    doc: &ObjectDoc,
    child: BuiltinKind,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let Some(items) = out.check(
        scope
            .list_builtin(child, doc.namespace(), ListQuery::all())
            .await,
        || format!("list {} owned by {}", child.plural(), doc.display_name()),
    )?
    else {
        return Ok(out);
    };
    for item in items.iter().filter(|item| item.is_owned_by(doc)) {
        out.edge(item, doc, Relation::OwnedBy);
        out.object(item.clone(), Reach::Down);
    }
    Ok(out)
}

async fn service_endpoints(
    scope: &mut TraversalScope<'_>,
    svc: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let Some(found) = out.check(
        scope
            .get_builtin(BuiltinKind::Endpoints, svc.namespace(), svc.name())
            .await,
        || format!("get endpoints for {}", svc.display_name()),
    )?
    else {
        return Ok(out);
    };
    let Some(endpoints) = found else {
        return Ok(out);
    };

    out.leaves.push(GraphNode::from_object(&endpoints));
    out.edge(svc, &endpoints, Relation::Binds);

    let mut seen = BTreeSet::new();
    for subset in endpoints.array_at(&["subsets"]) {
        let addresses = subset
            .get("addresses")
            .and_then(|a| a.as_array())
            .map(|a| a.as_slice())
            .unwrap_or(&[]);
        for address in addresses {
            let Some(target) = address.get("targetRef") else {
                continue;
            };
            if target.get("kind").and_then(|k| k.as_str()) != Some("Pod") {
                continue;
            }
            let Some(pod_name) = target.get("name").and_then(|n| n.as_str()) else {
                continue;
            };
            let pod_ns = target
                .get("namespace")
                .and_then(|n| n.as_str())
                .unwrap_or(svc.namespace());
            if !seen.insert((pod_ns.to_string(), pod_name.to_string())) {
                continue;
            }
            let Some(found) = out.check(
                scope.get_builtin(BuiltinKind::Pod, pod_ns, pod_name).await,
                || format!("get endpoint pod {}/{}", pod_ns, pod_name),
            )?
            else {
                continue;
            };
            match found {
                Some(pod) => {
                    out.edge(svc, &pod, Relation::RoutesTo);
                    out.object(pod, Reach::Lateral);
                }
                None => out.warnings.push(format!(
                    "endpoint pod {}/{} of {} not found",
                    pod_ns,
                    pod_name,
                    svc.display_name()
                )),
            }
        }
    }
    Ok(out)
}

async fn service_selector(
    scope: &mut TraversalScope<'_>,
    svc: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let selector = svc.string_map_at(&["spec", "selector"]);
    if selector.is_empty() {
        return Ok(out);
    }
    let query = ListQuery::labels_from(&selectors::from_map(&selector));
    let Some(pods) = out.check(
        scope
            .list_builtin(BuiltinKind::Pod, svc.namespace(), query)
            .await,
        || format!("list pods selected by {}", svc.display_name()),
    )?
    else {
        return Ok(out);
    };
    for pod in pods.iter() {
        out.edge(svc, pod, Relation::Selects);
        out.object(pod.clone(), Reach::Lateral);
    }
    Ok(out)
}

/// Service names referenced by an Ingress (rules and default backend)
pub fn ingress_backend_services(ingress: &ObjectDoc) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    if let Some(name) = ingress.str_at(&["spec", "defaultBackend", "service", "name"]) {
        names.insert(name.to_string());
    }
    for rule in ingress.array_at(&["spec", "rules"]) {
        let paths = rule
            .pointer("/http/paths")
            .and_then(|p| p.as_array())
            .map(|p| p.as_slice())
            .unwrap_or(&[]);
        for path in paths {
            if let Some(name) = path.pointer("/backend/service/name").and_then(|n| n.as_str()) {
                names.insert(name.to_string());
            }
        }
    }
    names
}

async fn ingress_backends(
    scope: &mut TraversalScope<'_>,
    ingress: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    for name in ingress_backend_services(ingress) {
        let Some(found) = out.check(
            scope
                .get_builtin(BuiltinKind::Service, ingress.namespace(), &name)
                .await,
            || format!("get backend service {} of {}", name, ingress.display_name()),
        )?
        else {
            continue;
        };
        match found {
            Some(svc) => {
                out.edge(ingress, &svc, Relation::RoutesTo);
                out.object(svc, Reach::Lateral);
            }
            None => out.warnings.push(format!(
                "backend service {}/{} of {} not found",
                ingress.namespace(),
                name,
                ingress.display_name()
            )),
        }
    }
    Ok(out)
}

async fn ingresses_for_service(
    scope: &mut TraversalScope<'_>,
    svc: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let Some(ingresses) = out.check(
        scope
            .list_builtin(BuiltinKind::Ingress, svc.namespace(), ListQuery::all())
            .await,
        || format!("list ingresses for {}", svc.display_name()),
    )?
    else {
        return Ok(out);
    };
    for ingress in ingresses
        .iter()
        .filter(|i| ingress_backend_services(i).contains(svc.name()))
    {
        out.edge(ingress, svc, Relation::RoutesTo);
        out.object(ingress.clone(), Reach::Lateral);
    }
    Ok(out)
}

async fn services_for_pod(
    scope: &mut TraversalScope<'_>,
    pod: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let Some(services) = out.check(
        scope
            .list_builtin(BuiltinKind::Service, pod.namespace(), ListQuery::all())
            .await,
        || format!("list services for {}", pod.display_name()),
    )?
    else {
        return Ok(out);
    };
    let labels = pod.labels();
    for svc in services.iter() {
        let selector = svc.string_map_at(&["spec", "selector"]);
        if !selector.is_empty() && selectors::from_map(&selector).matches(&labels) {
            out.edge(svc, pod, Relation::Selects);
            out.object(svc.clone(), Reach::Lateral);
        }
    }
    Ok(out)
}
