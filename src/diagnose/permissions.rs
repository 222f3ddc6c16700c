//! ServiceAccount permission diagnostics
//!
//! Follows a ServiceAccount through the RoleBindings and ClusterRoleBindings
//! naming it to the rules they grant. Workload-identity annotations hand off to
//! an optional `cloud_iam_role_lookup` capability for the cloud side.

use super::common::{Probe, finish, record_missing};
use crate::analysis::{Analysis, Severity};
use crate::error::DiagnosticError;
use crate::kube::{ListQuery, ObjectDoc};
use crate::models::BuiltinKind;
use crate::services::{DiagnosticService, RequestContext};
use crate::tools::ToolInvoker;
use serde::Deserialize;
use serde_json::{Value, json};

/// Annotations that bind a ServiceAccount to a cloud identity
pub const WORKLOAD_IDENTITY_ANNOTATIONS: &[&str] = &[
    "eks.amazonaws.com/role-arn",
    "iam.gke.io/gcp-service-account",
    "azure.workload.identity/client-id",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsRequest {
    pub namespace: String,
    #[serde(default = "default_service_account")]
    pub service_account: String,
    /// Verb to check, e.g. `list`
    #[serde(default)]
    pub verb: Option<String>,
    /// Resource to check, e.g. `pods`
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub api_group: Option<String>,
}

fn default_service_account() -> String {
    "default".to_string()
}

pub async fn debug_permissions(
    service: &DiagnosticService,
    ctx: &RequestContext,
    request: &PermissionsRequest,
    invoker: Option<&ToolInvoker>,
) -> Result<Analysis, DiagnosticError> {
    service.authorize(ctx, &request.namespace)?;
    let probe = Probe::new(service, ctx);
    let mut analysis = Analysis::new("permissions", &request.namespace);
    let result = run(&probe, request, invoker, &mut analysis).await;
    finish(analysis, result, "permission issues")
}

/// Whether a binding's subjects include the ServiceAccount
pub fn binds_service_account(binding: &ObjectDoc, namespace: &str, name: &str) -> bool {
    binding.array_at(&["subjects"]).iter().any(|s| {
        s.get("kind").and_then(Value::as_str) == Some("ServiceAccount")
            && s.get("name").and_then(Value::as_str) == Some(name)
            && s.get("namespace")
                .and_then(Value::as_str)
                .is_none_or(|ns| ns == namespace)
    })
}

fn list_contains(rule: &Value, field: &str, wanted: &str) -> bool {
    rule.get(field)
        .and_then(Value::as_array)
        .is_some_and(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .any(|item| item == "*" || item == wanted)
        })
}

/// Whether any rule of a Role/ClusterRole grants `verb` on `group/resource`
pub fn role_grants(role: &ObjectDoc, verb: &str, group: &str, resource: &str) -> bool {
    role.array_at(&["rules"]).iter().any(|rule| {
        list_contains(rule, "verbs", verb)
            && list_contains(rule, "resources", resource)
            && list_contains(rule, "apiGroups", group)
    })
}

struct RoleLookup {
    /// "Role/ns/name" or "ClusterRole/name"
    label: String,
    role: Option<ObjectDoc>,
}

async fn run(
    probe: &Probe<'_>,
    request: &PermissionsRequest,
    invoker: Option<&ToolInvoker>,
    analysis: &mut Analysis,
) -> Result<(), DiagnosticError> {
    let ns = request.namespace.as_str();
    let sa_name = request.service_account.as_str();
    let Some(account) = probe.get(BuiltinKind::ServiceAccount, ns, sa_name).await? else {
        record_missing(analysis, BuiltinKind::ServiceAccount, ns, sa_name);
        analysis.add_next_check(format!("kubectl create serviceaccount {} -n {}", sa_name, ns));
        return Ok(());
    };
    analysis.add_resource(BuiltinKind::ServiceAccount.identity().reference(ns, sa_name));

    let identity_annotations: Vec<(&str, &str)> = WORKLOAD_IDENTITY_ANNOTATIONS
        .iter()
        .filter_map(|key| account.annotation(key).map(|v| (*key, v)))
        .collect();
    analysis.add_evidence(
        "serviceAccount",
        json!({
            "name": sa_name,
            "automountServiceAccountToken": account.bool_at(&["automountServiceAccountToken"]),
            "workloadIdentity": identity_annotations
                .iter()
                .map(|(k, v)| json!({"annotation": k, "value": v}))
                .collect::<Vec<_>>(),
        }),
    );

    let mut lookups: Vec<RoleLookup> = Vec::new();
    let mut role_bindings: Vec<ObjectDoc> = probe
        .list(BuiltinKind::RoleBinding, ns, ListQuery::all())
        .await?
        .into_iter()
        .filter(|b| binds_service_account(b, ns, sa_name))
        .collect();
    role_bindings.sort_by(|a, b| a.name().cmp(b.name()));
    analysis.add_evidence(
        "roleBindings",
        role_bindings
            .iter()
            .map(|b| b.name().to_string())
            .collect::<Vec<_>>(),
    );

    let cluster_scope = probe.has_cluster_scope();
    for binding in &role_bindings {
        analysis.add_resource(BuiltinKind::RoleBinding.identity().reference(ns, binding.name()));
        let role_kind = binding.str_at(&["roleRef", "kind"]).unwrap_or("Role");
        let role_name = binding.str_at(&["roleRef", "name"]).unwrap_or("");
        if role_kind == "ClusterRole" {
            if cluster_scope {
                lookups.push(cluster_role(probe, analysis, role_name, binding.name()).await?);
            } else {
                analysis.add_requires_cluster_role(format!("clusterRole:{}", role_name));
            }
            continue;
        }
        let role = probe.get(BuiltinKind::Role, ns, role_name).await?;
        if role.is_none() {
            analysis.add_cause(
                "Role missing",
                format!(
                    "RoleBinding {} references Role {} which does not exist",
                    binding.name(),
                    role_name
                ),
                Severity::High,
            );
        }
        lookups.push(RoleLookup {
            label: format!("Role/{}/{}", ns, role_name),
            role,
        });
    }

    let mut cluster_bindings = Vec::new();
    if cluster_scope {
        cluster_bindings = probe
            .list(BuiltinKind::ClusterRoleBinding, "", ListQuery::all())
            .await?
            .into_iter()
            .filter(|b| binds_service_account(b, ns, sa_name))
            .collect();
        cluster_bindings.sort_by(|a, b| a.name().cmp(b.name()));
        analysis.add_evidence(
            "clusterRoleBindings",
            cluster_bindings
                .iter()
                .map(|b| b.name().to_string())
                .collect::<Vec<_>>(),
        );
        for binding in &cluster_bindings {
            let role_name = binding.str_at(&["roleRef", "name"]).unwrap_or("");
            lookups.push(cluster_role(probe, analysis, role_name, binding.name()).await?);
        }
    } else {
        analysis.add_requires_cluster_role("clusterRoleBindings");
    }

    if role_bindings.is_empty() && cluster_bindings.is_empty() {
        if cluster_scope {
            analysis.add_cause(
                "No bindings for ServiceAccount",
                format!("nothing grants {}/{} any role", ns, sa_name),
                Severity::Medium,
            );
        } else {
            // ClusterRoleBindings were not read
            analysis.add_evidence(
                "roleBindingsOnly",
                format!("no RoleBinding in {} grants {} a role", ns, sa_name),
            );
        }
    }

    if let (Some(verb), Some(resource)) = (request.verb.as_deref(), request.resource.as_deref()) {
        let group = request.api_group.as_deref().unwrap_or("");
        let granted_by: Vec<String> = lookups
            .iter()
            .filter(|l| l.role.as_ref().is_some_and(|r| role_grants(r, verb, group, resource)))
            .map(|l| l.label.clone())
            .collect();
        if granted_by.is_empty() {
            analysis.add_cause(
                format!("No rule grants {} on {}", verb, resource),
                format!(
                    "none of the roles bound to {} allows {} {}{}",
                    sa_name,
                    verb,
                    if group.is_empty() { String::new() } else { format!("{}/", group) },
                    resource
                ),
                Severity::High,
            );
            if !cluster_scope {
                analysis.add_next_check(
                    "ClusterRole grants were not inspected; rerun with the cluster role",
                );
            }
        }
        analysis.add_evidence("grantedBy", granted_by);
    }

    if let (Some(invoker), Some((annotation, role))) = (invoker, identity_annotations.first()) {
        if let Some(found) = invoker
            .try_invoke(
                probe.ctx(),
                analysis,
                "cloud_iam_role_lookup",
                json!({
                    "namespace": ns,
                    "serviceAccount": sa_name,
                    "annotation": annotation,
                    "role": role,
                }),
            )
            .await?
        {
            analysis.add_evidence("cloudIamRole", found);
        }
    }
    Ok(())
}

async fn cluster_role(
    probe: &Probe<'_>,
    analysis: &mut Analysis,
    role_name: &str,
    binding: &str,
) -> Result<RoleLookup, DiagnosticError> {
    let role = probe.get(BuiltinKind::ClusterRole, "", role_name).await?;
    if role.is_none() {
        analysis.add_cause(
            "ClusterRole missing",
            format!(
                "binding {} references ClusterRole {} which does not exist",
                binding, role_name
            ),
            Severity::High,
        );
    }
    Ok(RoleLookup {
        label: format!("ClusterRole/{}", role_name),
        role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binds_service_account_matches_namespace() {
        let binding = ObjectDoc::new(json!({
            "subjects": [
                {"kind": "ServiceAccount", "name": "builder", "namespace": "ci"},
                {"kind": "User", "name": "alice"}
            ]
        }));
        assert!(binds_service_account(&binding, "ci", "builder"));
        assert!(!binds_service_account(&binding, "prod", "builder"));
        assert!(!binds_service_account(&binding, "ci", "alice"));
    }

    #[test]
    fn test_role_grants_with_wildcards() {
        let role = ObjectDoc::new(json!({
            "rules": [
                {"apiGroups": [""], "resources": ["pods"], "verbs": ["get", "list"]},
                {"apiGroups": ["apps"], "resources": ["*"], "verbs": ["get"]}
            ]
        }));
        assert!(role_grants(&role, "list", "", "pods"));
        assert!(!role_grants(&role, "delete", "", "pods"));
        assert!(role_grants(&role, "get", "apps", "deployments"));
        assert!(!role_grants(&role, "list", "apps", "deployments"));
    }
}
