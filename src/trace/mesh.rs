//! Service-mesh relations
//!
//! Gateway API, Istio and Linkerd objects are CRDs resolved at traversal time.
//! Any of them may be missing from a cluster; a kind that fails to resolve is
//! reported once as a warning and its rules contribute nothing.

use super::graph::{GraphNode, Relation, ResourceGraph};
use super::graph_builder::{GraphBuilder, TraversalScope};
use super::rules::{Reach, RelationRule, RuleOutput};
use super::selectors::{self, Selector, SelectorExt};
use crate::kube::{ListQuery, ObjectDoc};
use crate::models::{BuiltinKind, ResourceIdentity};
use crate::services::context::{Interrupted, RequestContext};
use std::collections::BTreeSet;
use std::sync::Arc;

pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";
pub const ISTIO_NETWORKING_GROUP: &str = "networking.istio.io";
pub const ISTIO_SECURITY_GROUP: &str = "security.istio.io";
pub const LINKERD_GROUP: &str = "linkerd.io";
pub const LINKERD_POLICY_GROUP: &str = "policy.linkerd.io";

/// Every optional mesh kind as (kind, group)
pub const MESH_KINDS: &[(&str, &str)] = &[
    ("Gateway", GATEWAY_API_GROUP),
    ("HTTPRoute", GATEWAY_API_GROUP),
    ("VirtualService", ISTIO_NETWORKING_GROUP),
    ("AuthorizationPolicy", ISTIO_SECURITY_GROUP),
    ("ServiceProfile", LINKERD_GROUP),
    ("Server", LINKERD_POLICY_GROUP),
    ("ServerAuthorization", LINKERD_POLICY_GROUP),
];

/// Rules attached to a Service when mesh resources are requested
pub const SERVICE_MESH_RULES: &[RelationRule] = &[
    RelationRule::HttpRoutesForService,
    RelationRule::VirtualServicesForService,
    RelationRule::AuthorizationPoliciesForService,
    RelationRule::ServiceProfileForService,
    RelationRule::ServersForService,
];

async fn mesh_kind(
    scope: &mut TraversalScope<'_>,
    out: &mut RuleOutput,
    kind: &str,
    group: &str,
) -> Result<Option<ResourceIdentity>, Interrupted> {
    out.check(scope.resolve(kind, group).await, || {
        format!("mesh kind {} ({}) unavailable", kind, group)
    })
}

async fn list_mesh(
    scope: &mut TraversalScope<'_>,
    out: &mut RuleOutput,
    kind: &str,
    group: &str,
    namespace: &str,
) -> Result<Option<Arc<Vec<ObjectDoc>>>, Interrupted> {
    let Some(identity) = mesh_kind(scope, out, kind, group).await? else {
        return Ok(None);
    };
    out.check(
        scope.list(&identity, namespace, ListQuery::all()).await,
        || format!("list {} in {}", kind, namespace),
    )
}

async fn service_pods(
    scope: &mut TraversalScope<'_>,
    out: &mut RuleOutput,
    svc: &ObjectDoc,
) -> Result<Vec<ObjectDoc>, Interrupted> {
    let selector = svc.string_map_at(&["spec", "selector"]);
    if selector.is_empty() {
        return Ok(Vec::new());
    }
    let query = ListQuery::labels_from(&selectors::from_map(&selector));
    let pods = out.check(
        scope
            .list_builtin(BuiltinKind::Pod, svc.namespace(), query)
            .await,
        || format!("list pods selected by {}", svc.display_name()),
    )?;
    Ok(pods.map(|p| p.as_ref().clone()).unwrap_or_default())
}

/// Backend Services of an HTTPRoute as (namespace, name)
pub fn route_backend_services(route: &ObjectDoc) -> BTreeSet<(String, String)> {
    let mut backends = BTreeSet::new();
    for rule in route.array_at(&["spec", "rules"]) {
        let refs = rule
            .get("backendRefs")
            .and_then(|b| b.as_array())
            .map(|b| b.as_slice())
            .unwrap_or(&[]);
        for backend in refs {
            let kind = backend.get("kind").and_then(|k| k.as_str()).unwrap_or("Service");
            let group = backend.get("group").and_then(|g| g.as_str()).unwrap_or("");
            if kind != "Service" || !group.is_empty() {
                continue;
            }
            let Some(name) = backend.get("name").and_then(|n| n.as_str()) else {
                continue;
            };
            let namespace = backend
                .get("namespace")
                .and_then(|n| n.as_str())
                .unwrap_or(route.namespace());
            backends.insert((namespace.to_string(), name.to_string()));
        }
    }
    backends
}

/// Parent Gateways of an HTTPRoute as (namespace, name)
pub fn route_parent_gateways(route: &ObjectDoc) -> Vec<(String, String)> {
    route
        .array_at(&["spec", "parentRefs"])
        .iter()
        .filter(|p| {
            p.get("kind").and_then(|k| k.as_str()).unwrap_or("Gateway") == "Gateway"
                && p.get("group")
                    .and_then(|g| g.as_str())
                    .unwrap_or(GATEWAY_API_GROUP)
                    == GATEWAY_API_GROUP
        })
        .filter_map(|p| {
            let name = p.get("name")?.as_str()?;
            let namespace = p
                .get("namespace")
                .and_then(|n| n.as_str())
                .unwrap_or(route.namespace());
            Some((namespace.to_string(), name.to_string()))
        })
        .collect()
}

/// Destination hosts of a VirtualService (http, tcp and tls routes)
pub fn virtual_service_hosts(vs: &ObjectDoc) -> BTreeSet<String> {
    let mut hosts = BTreeSet::new();
    for section in ["http", "tcp", "tls"] {
        for route in vs.array_at(&["spec", section]) {
            let destinations = route
                .get("route")
                .and_then(|r| r.as_array())
                .map(|r| r.as_slice())
                .unwrap_or(&[]);
            for destination in destinations {
                if let Some(host) = destination.pointer("/destination/host").and_then(|h| h.as_str())
                {
                    hosts.insert(host.to_string());
                }
            }
        }
    }
    hosts
}

/// Map a mesh host to an in-cluster Service (namespace, name)
///
/// Accepts `name`, `name.ns`, `name.ns.svc` and `name.ns.svc.cluster.local`;
/// wildcards and external hosts map to nothing.
pub fn host_to_service(host: &str, default_namespace: &str) -> Option<(String, String)> {
    if host.contains('*') {
        return None;
    }
    let parts: Vec<&str> = host.split('.').collect();
    match parts.as_slice() {
        [name] => Some((default_namespace.to_string(), name.to_string())),
        [name, ns] => Some((ns.to_string(), name.to_string())),
        [name, ns, "svc", ..] => Some((ns.to_string(), name.to_string())),
        _ => None,
    }
}

pub(super) async fn http_routes_for_service(
    scope: &mut TraversalScope<'_>,
    svc: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let Some(identity) = mesh_kind(scope, &mut out, "HTTPRoute", GATEWAY_API_GROUP).await? else {
        return Ok(out);
    };
    // backendRefs may cross namespaces; callers that cannot list cluster-wide
    // still see the routes next to the Service
    let everywhere = out.check(scope.list(&identity, "", ListQuery::all()).await, || {
        "list HTTPRoute in all namespaces".to_string()
    })?;
    let routes = match everywhere {
        Some(routes) => routes,
        None => match out.check(
            scope.list(&identity, svc.namespace(), ListQuery::all()).await,
            || format!("list HTTPRoute in {}", svc.namespace()),
        )? {
            Some(local) => local,
            None => return Ok(out),
        },
    };
    let target = (svc.namespace().to_string(), svc.name().to_string());
    for route in routes
        .iter()
        .filter(|r| route_backend_services(r).contains(&target))
    {
        out.edge(route, svc, Relation::RoutesTo);
        out.object(route.clone(), Reach::Lateral);
    }
    Ok(out)
}

pub(super) async fn route_parents(
    scope: &mut TraversalScope<'_>,
    route: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let parents = route_parent_gateways(route);
    if parents.is_empty() {
        return Ok(out);
    }
    let Some(identity) = mesh_kind(scope, &mut out, "Gateway", GATEWAY_API_GROUP).await? else {
        return Ok(out);
    };
    for (namespace, name) in parents {
        let Some(found) = out.check(scope.get(&identity, &namespace, &name).await, || {
            format!("get Gateway {}/{}", namespace, name)
        })?
        else {
            continue;
        };
        match found {
            Some(gateway) => {
                out.leaves.push(GraphNode::from_object(&gateway));
                out.edge(route, &gateway, Relation::Binds);
            }
            None => out.warnings.push(format!(
                "parent Gateway {}/{} of {} not found",
                namespace,
                name,
                route.display_name()
            )),
        }
    }
    Ok(out)
}

async fn route_to_services(
    scope: &mut TraversalScope<'_>,
    out: &mut RuleOutput,
    source: &ObjectDoc,
    services: BTreeSet<(String, String)>,
) -> Result<(), Interrupted> {
    for (namespace, name) in services {
        let Some(found) = out.check(
            scope
                .get_builtin(BuiltinKind::Service, &namespace, &name)
                .await,
            || format!("get Service {}/{}", namespace, name),
        )?
        else {
            continue;
        };
        match found {
            Some(svc) => {
                out.edge(source, &svc, Relation::RoutesTo);
                out.object(svc, Reach::Lateral);
            }
            None => out.warnings.push(format!(
                "backend Service {}/{} of {} not found",
                namespace,
                name,
                source.display_name()
            )),
        }
    }
    Ok(())
}

pub(super) async fn route_backends(
    scope: &mut TraversalScope<'_>,
    route: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    route_to_services(scope, &mut out, route, route_backend_services(route)).await?;
    Ok(out)
}

pub(super) async fn virtual_services_for_service(
    scope: &mut TraversalScope<'_>,
    svc: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let Some(virtual_services) = list_mesh(
        scope,
        &mut out,
        "VirtualService",
        ISTIO_NETWORKING_GROUP,
        svc.namespace(),
    )
    .await?
    else {
        return Ok(out);
    };
    let target = (svc.namespace().to_string(), svc.name().to_string());
    for vs in virtual_services.iter() {
        let routes_here = virtual_service_hosts(vs)
            .iter()
            .filter_map(|h| host_to_service(h, vs.namespace()))
            .any(|s| s == target);
        if routes_here {
            out.edge(vs, svc, Relation::RoutesTo);
            out.object(vs.clone(), Reach::Lateral);
        }
    }
    Ok(out)
}

pub(super) async fn virtual_service_destinations(
    scope: &mut TraversalScope<'_>,
    vs: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let services = virtual_service_hosts(vs)
        .iter()
        .filter_map(|h| host_to_service(h, vs.namespace()))
        .collect();
    route_to_services(scope, &mut out, vs, services).await?;
    Ok(out)
}

pub(super) async fn authorization_policies_for_service(
    scope: &mut TraversalScope<'_>,
    svc: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let Some(policies) = list_mesh(
        scope,
        &mut out,
        "AuthorizationPolicy",
        ISTIO_SECURITY_GROUP,
        svc.namespace(),
    )
    .await?
    else {
        return Ok(out);
    };
    if policies.is_empty() {
        return Ok(out);
    }
    let pods = service_pods(scope, &mut out, svc).await?;
    for policy in policies.iter() {
        // No selector means the policy covers the whole namespace
        let selector =
            selectors::from_map(&policy.string_map_at(&["spec", "selector", "matchLabels"]));
        let selected: Vec<&ObjectDoc> =
            pods.iter().filter(|p| selector.matches(&p.labels())).collect();
        if selected.is_empty() {
            continue;
        }
        let action = policy.str_at(&["spec", "action"]).unwrap_or("ALLOW");
        out.leaves
            .push(GraphNode::from_object(policy).with_description(action));
        for pod in selected {
            out.edge(policy, pod, Relation::Selects);
            out.object(pod.clone(), Reach::Lateral);
        }
    }
    Ok(out)
}

/// Name Linkerd expects for a Service's profile
pub fn service_profile_name(svc: &ObjectDoc) -> String {
    format!("{}.{}.svc.cluster.local", svc.name(), svc.namespace())
}

pub(super) async fn service_profile_for_service(
    scope: &mut TraversalScope<'_>,
    svc: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let Some(identity) = mesh_kind(scope, &mut out, "ServiceProfile", LINKERD_GROUP).await? else {
        return Ok(out);
    };
    let name = service_profile_name(svc);
    let Some(found) = out.check(
        scope.get(&identity, svc.namespace(), &name).await,
        || format!("get ServiceProfile {}", name),
    )?
    else {
        return Ok(out);
    };
    if let Some(profile) = found {
        out.leaves.push(GraphNode::from_object(&profile));
        out.edge(&profile, svc, Relation::Binds);
    }
    Ok(out)
}

fn server_selector(server: &ObjectDoc) -> Option<Selector> {
    server
        .get(&["spec", "podSelector"])
        .and_then(|s| selectors::from_value(s).ok())
}

pub(super) async fn servers_for_service(
    scope: &mut TraversalScope<'_>,
    svc: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let Some(servers) =
        list_mesh(scope, &mut out, "Server", LINKERD_POLICY_GROUP, svc.namespace()).await?
    else {
        return Ok(out);
    };
    if servers.is_empty() {
        return Ok(out);
    }
    let pods = service_pods(scope, &mut out, svc).await?;
    for server in servers.iter() {
        let Some(selector) = server_selector(server) else {
            continue;
        };
        let selected: Vec<&ObjectDoc> =
            pods.iter().filter(|p| selector.matches(&p.labels())).collect();
        if selected.is_empty() {
            continue;
        }
        for pod in selected {
            out.edge(server, pod, Relation::Selects);
            out.object(pod.clone(), Reach::Lateral);
        }
        out.object(server.clone(), Reach::Lateral);
    }
    Ok(out)
}

pub(super) async fn server_targets(
    scope: &mut TraversalScope<'_>,
    server: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let Some(selector) = server_selector(server) else {
        out.warnings
            .push(format!("{} has no usable podSelector", server.display_name()));
        return Ok(out);
    };
    let Some(pods) = out.check(
        scope
            .list_builtin(BuiltinKind::Pod, server.namespace(), ListQuery::all())
            .await,
        || format!("list pods for {}", server.display_name()),
    )?
    else {
        return Ok(out);
    };
    for pod in pods.iter().filter(|p| selector.matches(&p.labels())) {
        out.edge(server, pod, Relation::Selects);
        out.object(pod.clone(), Reach::Lateral);
    }
    Ok(out)
}

pub(super) async fn server_authorizations(
    scope: &mut TraversalScope<'_>,
    server: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let Some(authorizations) = list_mesh(
        scope,
        &mut out,
        "ServerAuthorization",
        LINKERD_POLICY_GROUP,
        server.namespace(),
    )
    .await?
    else {
        return Ok(out);
    };
    let server_labels = server.labels();
    for authz in authorizations.iter() {
        let by_name = authz.str_at(&["spec", "server", "name"]) == Some(server.name());
        let by_selector = authz
            .get(&["spec", "server", "selector"])
            .and_then(|s| selectors::from_value(s).ok())
            .is_some_and(|s| s.matches(&server_labels));
        if by_name || by_selector {
            out.leaves.push(GraphNode::from_object(authz));
            out.edge(authz, server, Relation::Binds);
        }
    }
    Ok(out)
}

impl GraphBuilder {
    /// Attach every mesh object related to a Service to `graph`
    pub async fn add_mesh_graph(
        &self,
        ctx: &RequestContext,
        graph: &mut ResourceGraph,
        service: &ObjectDoc,
    ) -> Result<Vec<String>, Interrupted> {
        self.expand(ctx, graph, service, SERVICE_MESH_RULES).await
    }
}
