//! Built-in capabilities
//!
//! The graph builder and every diagnostic handler are registered read-only.
//! Workload mutations are registered with their safety tier so the invoker
//! gates them behind confirmation.

use super::invoker::ToolInvoker;
use super::registry::{Capability, CapabilityRegistry, RegistryError, Safety};
use crate::analysis::{Analysis, Redactor};
use crate::diagnose::{
    CrashLoopRequest, HpaRequest, MeshRequest, NetworkRequest, PermissionsRequest,
    SchedulingRequest, StorageRequest, VpaRequest, debug_crashloop, debug_hpa, debug_mesh,
    debug_network, debug_permissions, debug_scheduling, debug_storage, debug_vpa,
};
use crate::error::DiagnosticError;
use crate::kube::ClusterError;
use crate::models::BuiltinKind;
use crate::services::{DiagnosticService, RequestContext};
use crate::trace::GraphQuery;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

fn parse_args<T: DeserializeOwned>(capability: &str, args: Value) -> Result<T, DiagnosticError> {
    serde_json::from_value(args)
        .map_err(|e| DiagnosticError::validation(format!("{}: {}", capability, e)))
}

fn render(analysis: &Analysis, redactor: &dyn Redactor) -> Result<Value, DiagnosticError> {
    serde_json::to_value(analysis.render(redactor))
        .map_err(|e| DiagnosticError::Cluster(ClusterError::from(e)))
}

async fn guarded<T, F>(ctx: &RequestContext, future: F) -> Result<T, DiagnosticError>
where
    F: Future<Output = Result<T, ClusterError>>,
{
    match ctx.run(future).await {
        Ok(result) => Ok(result?),
        Err(reason) => Err(DiagnosticError::Cancelled {
            reason,
            partial: None,
        }),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphArgs {
    kind: String,
    #[serde(default)]
    namespace: String,
    name: String,
    #[serde(default)]
    include_mesh: Option<bool>,
}

/// `build_graph`: relationship graph around one object
pub struct BuildGraph {
    service: Arc<DiagnosticService>,
}

#[async_trait]
impl Capability for BuildGraph {
    fn name(&self) -> &str {
        "build_graph"
    }

    fn description(&self) -> &str {
        "Build the relationship graph around a resource"
    }

    fn safety(&self) -> Safety {
        Safety::ReadOnly
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: Value,
        _invoker: &ToolInvoker,
    ) -> Result<Value, DiagnosticError> {
        let args: GraphArgs = parse_args(self.name(), args)?;
        let query = GraphQuery::new(&args.kind, &args.namespace, &args.name).with_mesh(
            args.include_mesh
                .unwrap_or(self.service.settings().include_mesh),
        );
        let lookup = self.service.build_graph(ctx, &query).await?;
        Ok(DiagnosticService::graph_payload(&query, &lookup))
    }
}

/// Which handler a [`DebugCapability`] runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugKind {
    Storage,
    CrashLoop,
    Scheduling,
    Hpa,
    Vpa,
    Permissions,
    Network,
    Mesh,
}

impl DebugKind {
    pub fn all() -> &'static [DebugKind] {
        &[
            DebugKind::Storage,
            DebugKind::CrashLoop,
            DebugKind::Scheduling,
            DebugKind::Hpa,
            DebugKind::Vpa,
            DebugKind::Permissions,
            DebugKind::Network,
            DebugKind::Mesh,
        ]
    }

    pub fn capability_name(&self) -> &'static str {
        match self {
            DebugKind::Storage => "debug_storage",
            DebugKind::CrashLoop => "debug_crashloop",
            DebugKind::Scheduling => "debug_scheduling",
            DebugKind::Hpa => "debug_hpa",
            DebugKind::Vpa => "debug_vpa",
            DebugKind::Permissions => "debug_permissions",
            DebugKind::Network => "debug_network",
            DebugKind::Mesh => "debug_mesh",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            DebugKind::Storage => "Diagnose PVC, PV, StorageClass and attachment problems",
            DebugKind::CrashLoop => "Diagnose restarting and failing containers",
            DebugKind::Scheduling => "Explain why pods stay Pending",
            DebugKind::Hpa => "Diagnose HorizontalPodAutoscaler behaviour",
            DebugKind::Vpa => "Diagnose VerticalPodAutoscaler setup",
            DebugKind::Permissions => "Trace ServiceAccount RBAC bindings and grants",
            DebugKind::Network => "Diagnose Service selectors, endpoints and NetworkPolicies",
            DebugKind::Mesh => "Diagnose Gateway API, Istio and Linkerd configuration",
        }
    }
}

/// A diagnostic handler exposed as a capability
pub struct DebugCapability {
    kind: DebugKind,
    service: Arc<DiagnosticService>,
    redactor: Arc<dyn Redactor>,
}

impl DebugCapability {
    pub fn new(
        kind: DebugKind,
        service: Arc<DiagnosticService>,
        redactor: Arc<dyn Redactor>,
    ) -> Self {
        Self {
            kind,
            service,
            redactor,
        }
    }

    async fn analyze(
        &self,
        ctx: &RequestContext,
        args: Value,
        invoker: &ToolInvoker,
    ) -> Result<Analysis, DiagnosticError> {
        let name = self.kind.capability_name();
        let svc = self.service.as_ref();
        match self.kind {
            DebugKind::Storage => {
                debug_storage(svc, ctx, &parse_args::<StorageRequest>(name, args)?).await
            }
            DebugKind::CrashLoop => {
                let request: CrashLoopRequest = parse_args(name, args)?;
                debug_crashloop(svc, ctx, &request, Some(invoker)).await
            }
            DebugKind::Scheduling => {
                debug_scheduling(svc, ctx, &parse_args::<SchedulingRequest>(name, args)?).await
            }
            DebugKind::Hpa => debug_hpa(svc, ctx, &parse_args::<HpaRequest>(name, args)?).await,
            DebugKind::Vpa => debug_vpa(svc, ctx, &parse_args::<VpaRequest>(name, args)?).await,
            DebugKind::Permissions => {
                let request: PermissionsRequest = parse_args(name, args)?;
                debug_permissions(svc, ctx, &request, Some(invoker)).await
            }
            DebugKind::Network => {
                debug_network(svc, ctx, &parse_args::<NetworkRequest>(name, args)?).await
            }
            DebugKind::Mesh => {
                debug_mesh(svc, ctx, &parse_args::<MeshRequest>(name, args)?).await
            }
        }
    }
}

#[async_trait]
impl Capability for DebugCapability {
    fn name(&self) -> &str {
        self.kind.capability_name()
    }

    fn description(&self) -> &str {
        self.kind.description()
    }

    fn safety(&self) -> Safety {
        Safety::ReadOnly
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: Value,
        invoker: &ToolInvoker,
    ) -> Result<Value, DiagnosticError> {
        let analysis = self.analyze(ctx, args, invoker).await?;
        render(&analysis, self.redactor.as_ref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkloadArgs {
    namespace: String,
    #[serde(default = "default_workload_kind")]
    kind: String,
    name: String,
    #[serde(default)]
    replicas: Option<i64>,
}

fn default_workload_kind() -> String {
    "Deployment".to_string()
}

fn workload_kind(args: &WorkloadArgs, allowed: &[BuiltinKind]) -> Result<BuiltinKind, DiagnosticError> {
    BuiltinKind::from_str_case_insensitive(&args.kind)
        .filter(|k| allowed.contains(k))
        .ok_or_else(|| {
            DiagnosticError::validation(format!(
                "kind must be one of {}",
                allowed
                    .iter()
                    .map(|k| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
}

/// The three mutations exposed as capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadAction {
    Scale,
    Restart,
    DeletePod,
}

pub struct Workload {
    action: WorkloadAction,
    service: Arc<DiagnosticService>,
}

impl Workload {
    pub fn new(action: WorkloadAction, service: Arc<DiagnosticService>) -> Self {
        Self { action, service }
    }
}

#[async_trait]
impl Capability for Workload {
    fn name(&self) -> &str {
        match self.action {
            WorkloadAction::Scale => "scale_workload",
            WorkloadAction::Restart => "restart_workload",
            WorkloadAction::DeletePod => "delete_pod",
        }
    }

    fn description(&self) -> &str {
        match self.action {
            WorkloadAction::Scale => "Set the replica count of a Deployment, StatefulSet or ReplicaSet",
            WorkloadAction::Restart => "Roll the pods of a Deployment, StatefulSet or DaemonSet",
            WorkloadAction::DeletePod => "Delete a pod",
        }
    }

    fn safety(&self) -> Safety {
        match self.action {
            WorkloadAction::Scale => Safety::Write,
            WorkloadAction::Restart => Safety::RiskyWrite,
            WorkloadAction::DeletePod => Safety::Destructive,
        }
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: Value,
        _invoker: &ToolInvoker,
    ) -> Result<Value, DiagnosticError> {
        let name = self.name().to_string();
        let args: WorkloadArgs = parse_args(&name, args)?;
        self.service.authorize(ctx, &args.namespace)?;
        let cluster = self.service.cluster();
        let ns = args.namespace.as_str();

        match self.action {
            WorkloadAction::Scale => {
                let kind = workload_kind(
                    &args,
                    &[
                        BuiltinKind::Deployment,
                        BuiltinKind::StatefulSet,
                        BuiltinKind::ReplicaSet,
                    ],
                )?;
                let replicas = args
                    .replicas
                    .filter(|r| *r >= 0)
                    .ok_or_else(|| DiagnosticError::validation("replicas must be >= 0"))?;
                let identity = kind.identity();
                let patch = json!({"spec": {"replicas": replicas}});
                guarded(ctx, cluster.patch_merge(&identity, Some(ns), &args.name, &patch)).await?;
                info!(kind = %kind.as_str(), namespace = %ns, name = %args.name, replicas, "Scaled workload");
                Ok(json!({"scaled": identity.reference(ns, &args.name), "replicas": replicas}))
            }
            WorkloadAction::Restart => {
                let kind = workload_kind(
                    &args,
                    &[
                        BuiltinKind::Deployment,
                        BuiltinKind::StatefulSet,
                        BuiltinKind::DaemonSet,
                    ],
                )?;
                let identity = kind.identity();
                let restarted_at = chrono::Utc::now().to_rfc3339();
                let patch = json!({"spec": {"template": {"metadata": {"annotations": {
                    "kubectl.kubernetes.io/restartedAt": restarted_at
                }}}}});
                guarded(ctx, cluster.patch_merge(&identity, Some(ns), &args.name, &patch)).await?;
                info!(kind = %kind.as_str(), namespace = %ns, name = %args.name, "Restarted workload");
                Ok(json!({"restarted": identity.reference(ns, &args.name), "restartedAt": restarted_at}))
            }
            WorkloadAction::DeletePod => {
                let identity = BuiltinKind::Pod.identity();
                guarded(ctx, cluster.delete(&identity, Some(ns), &args.name)).await?;
                info!(namespace = %ns, name = %args.name, "Deleted pod");
                Ok(json!({"deleted": identity.reference(ns, &args.name)}))
            }
        }
    }
}

/// Registry holding every built-in capability
pub fn builtin_registry(
    service: Arc<DiagnosticService>,
    redactor: Arc<dyn Redactor>,
) -> Result<CapabilityRegistry, RegistryError> {
    let mut registry = CapabilityRegistry::new();
    register_builtins(&mut registry, service, redactor)?;
    Ok(registry)
}

/// Add the built-in capabilities to an existing registry
pub fn register_builtins(
    registry: &mut CapabilityRegistry,
    service: Arc<DiagnosticService>,
    redactor: Arc<dyn Redactor>,
) -> Result<(), RegistryError> {
    registry.register(Arc::new(BuildGraph {
        service: service.clone(),
    }))?;
    for kind in DebugKind::all() {
        registry.register(Arc::new(DebugCapability::new(
            *kind,
            service.clone(),
            redactor.clone(),
        )))?;
    }
    for action in [
        WorkloadAction::Scale,
        WorkloadAction::Restart,
        WorkloadAction::DeletePod,
    ] {
        registry.register(Arc::new(Workload::new(action, service.clone())))?;
    }
    Ok(())
}
