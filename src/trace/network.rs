//! NetworkPolicy relations
//!
//! A policy `selects` the pods its `podSelector` matches. Each ingress `from`
//! peer becomes an `allows-from` edge and each egress `to` peer an `allows-to`
//! edge, pointing at a Pod, a Namespace, or a synthetic `IPBlock` node for CIDR
//! peers. Peers are leaf nodes: they are shown but not traversed further.

use super::graph::{GraphNode, Relation, ResourceGraph, node_id};
use super::graph_builder::{GraphBuilder, TraversalScope};
use super::rules::{Reach, RelationRule, RuleOutput, id_of};
use super::selectors::{self, Selector, SelectorExt};
use crate::kube::{ListQuery, ObjectDoc};
use crate::models::BuiltinKind;
use crate::services::context::{Interrupted, RequestContext};
use serde_json::Value;

/// Kind used for CIDR peer nodes
pub const IP_BLOCK_KIND: &str = "IPBlock";

/// Pod selector of a policy; an absent selector selects every pod
pub fn policy_pod_selector(policy: &ObjectDoc) -> Result<Selector, String> {
    match policy.get(&["spec", "podSelector"]) {
        Some(selector) => selectors::from_value(selector).map_err(|e| e.to_string()),
        None => Ok(Selector::default()),
    }
}

/// Policy types in effect (`Ingress` is implied when unset)
pub fn policy_types(policy: &ObjectDoc) -> Vec<String> {
    let declared: Vec<String> = policy
        .array_at(&["spec", "policyTypes"])
        .iter()
        .filter_map(|t| t.as_str().map(String::from))
        .collect();
    if !declared.is_empty() {
        return declared;
    }
    let mut implied = vec!["Ingress".to_string()];
    if policy.get(&["spec", "egress"]).is_some() {
        implied.push("Egress".to_string());
    }
    implied
}

/// A policy that selects pods but admits no ingress traffic at all
pub fn is_default_deny_ingress(policy: &ObjectDoc) -> bool {
    policy_types(policy).iter().any(|t| t == "Ingress")
        && policy.array_at(&["spec", "ingress"]).is_empty()
}

pub(super) async fn policy_targets(
    scope: &mut TraversalScope<'_>,
    policy: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let selector = match policy_pod_selector(policy) {
        Ok(selector) => selector,
        Err(e) => {
            out.warnings
                .push(format!("invalid podSelector on {}: {}", policy.display_name(), e));
            return Ok(out);
        }
    };
    let Some(pods) = out.check(
        scope
            .list_builtin(BuiltinKind::Pod, policy.namespace(), ListQuery::all())
            .await,
        || format!("list pods for {}", policy.display_name()),
    )?
    else {
        return Ok(out);
    };
    for pod in pods.iter().filter(|p| selector.matches(&p.labels())) {
        out.edge(policy, pod, Relation::Selects);
        out.object(pod.clone(), Reach::Lateral);
    }
    Ok(out)
}

pub(super) async fn policies_for_pod(
    scope: &mut TraversalScope<'_>,
    pod: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let Some(policies) = out.check(
        scope
            .list_builtin(BuiltinKind::NetworkPolicy, pod.namespace(), ListQuery::all())
            .await,
        || format!("list network policies for {}", pod.display_name()),
    )?
    else {
        return Ok(out);
    };
    let labels = pod.labels();
    for policy in policies.iter() {
        match policy_pod_selector(policy) {
            Ok(selector) if selector.matches(&labels) => {
                out.edge(policy, pod, Relation::Selects);
                out.object(policy.clone(), Reach::Lateral);
            }
            Ok(_) => {}
            Err(e) => out
                .warnings
                .push(format!("invalid podSelector on {}: {}", policy.display_name(), e)),
        }
    }
    Ok(out)
}

pub(super) async fn policy_peers(
    scope: &mut TraversalScope<'_>,
    policy: &ObjectDoc,
) -> Result<RuleOutput, Interrupted> {
    let mut out = RuleOutput::default();
    let directions = [
        ("ingress", "from", Relation::AllowsFrom),
        ("egress", "to", Relation::AllowsTo),
    ];
    for (section, field, relation) in directions {
        for rule in policy.array_at(&["spec", section]) {
            let peers = rule
                .get(field)
                .and_then(|p| p.as_array())
                .map(|p| p.as_slice())
                .unwrap_or(&[]);
            for peer in peers {
                add_peer(scope, &mut out, policy, peer, relation).await?;
            }
        }
    }
    Ok(out)
}

async fn add_peer(
    scope: &mut TraversalScope<'_>,
    out: &mut RuleOutput,
    policy: &ObjectDoc,
    peer: &Value,
    relation: Relation,
) -> Result<(), Interrupted> {
    let policy_id = id_of(policy);

    if let Some(block) = peer.get("ipBlock") {
        let Some(cidr) = block.get("cidr").and_then(|c| c.as_str()) else {
            out.warnings
                .push(format!("ipBlock without cidr on {}", policy.display_name()));
            return Ok(());
        };
        let except: Vec<&str> = block
            .get("except")
            .and_then(|e| e.as_array())
            .map(|e| e.iter().filter_map(|c| c.as_str()).collect())
            .unwrap_or_default();
        let mut node = GraphNode::new(IP_BLOCK_KIND, "", cidr);
        if !except.is_empty() {
            node = node.with_description(format!("except {}", except.join(", ")));
        }
        let id = node.id.clone();
        out.leaves.push(node);
        out.edge_ids(policy_id, id, relation);
        return Ok(());
    }

    let pod_selector = match peer.get("podSelector").map(selectors::from_value) {
        Some(Ok(selector)) => Some(selector),
        Some(Err(e)) => {
            out.warnings
                .push(format!("invalid peer podSelector on {}: {}", policy.display_name(), e));
            return Ok(());
        }
        None => None,
    };

    // Without a namespaceSelector the peer is limited to the policy's namespace
    let namespaces: Vec<(String, Option<ObjectDoc>)> = match peer.get("namespaceSelector") {
        None => vec![(policy.namespace().to_string(), None)],
        Some(selector) => {
            let selector = match selectors::from_value(selector) {
                Ok(selector) => selector,
                Err(e) => {
                    out.warnings.push(format!(
                        "invalid peer namespaceSelector on {}: {}",
                        policy.display_name(),
                        e
                    ));
                    return Ok(());
                }
            };
            let query = if selector.selects_all() {
                ListQuery::all()
            } else {
                ListQuery::labels_from(&selector)
            };
            let Some(found) = out.check(
                scope.list_builtin(BuiltinKind::Namespace, "", query).await,
                || format!("list peer namespaces for {}", policy.display_name()),
            )?
            else {
                return Ok(());
            };
            found
                .iter()
                .map(|ns| (ns.name().to_string(), Some(ns.clone())))
                .collect()
        }
    };

    for (namespace, namespace_doc) in namespaces {
        match (&pod_selector, namespace_doc) {
            (None, Some(ns)) => {
                out.leaves.push(GraphNode::from_object(&ns));
                out.edge_ids(policy_id.clone(), id_of(&ns), relation);
            }
            (None, None) => {
                let id = node_id(BuiltinKind::Namespace.as_str(), "", &namespace);
                out.leaves
                    .push(GraphNode::new(BuiltinKind::Namespace.as_str(), "", &namespace));
                out.edge_ids(policy_id.clone(), id, relation);
            }
            (Some(selector), _) => {
                let query = if selector.selects_all() {
                    ListQuery::all()
                } else {
                    ListQuery::labels_from(selector)
                };
                let Some(pods) = out.check(
                    scope
                        .list_builtin(BuiltinKind::Pod, &namespace, query)
                        .await,
                    || format!("list peer pods in {} for {}", namespace, policy.display_name()),
                )?
                else {
                    continue;
                };
                for pod in pods.iter() {
                    out.leaves.push(GraphNode::from_object(pod));
                    out.edge_ids(policy_id.clone(), id_of(pod), relation);
                }
            }
        }
    }
    Ok(())
}

impl GraphBuilder {
    /// Attach a NetworkPolicy's selected pods and peer edges to `graph`
    pub async fn add_network_policy_peer_edges(
        &self,
        ctx: &RequestContext,
        graph: &mut ResourceGraph,
        policy: &ObjectDoc,
    ) -> Result<Vec<String>, Interrupted> {
        self.expand(
            ctx,
            graph,
            policy,
            &[RelationRule::PolicyTargets, RelationRule::PolicyPeers],
        )
        .await
    }
}
