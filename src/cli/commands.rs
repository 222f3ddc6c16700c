//! Engine subcommands
//!
//! Every engine command goes through the [`ToolInvoker`], so the CLI gets the
//! same validation, policy and confirmation gates as any other caller.

use super::config::ConfigSubcommand;
use crate::analysis::SecretRedactor;
use crate::config::Config;
use crate::error::DiagnosticError;
use crate::kube::ClusterApi;
use crate::policy::{PolicyGate, RolePolicy};
use crate::services::{DiagnosticService, RequestContext};
use crate::tools::{DebugKind, InvokeOptions, ToolInvoker, builtin_registry};
use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// Main commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the relationship graph around a resource
    Graph {
        /// Kind, plural or short name (e.g. Service, deploy, httproutes)
        kind: String,
        name: String,
        /// Namespace; omit for cluster-scoped kinds
        #[arg(short = 'n', long)]
        namespace: Option<String>,
        /// Include Gateway API and service mesh edges
        #[arg(long)]
        mesh: bool,
    },
    /// Run a domain diagnostic
    Debug {
        #[command(subcommand)]
        target: DebugCommand,
    },
    /// List or invoke registered capabilities
    Tools {
        #[command(subcommand)]
        command: ToolsCommand,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
    /// Display version information
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct NamespaceArg {
    /// Namespace to diagnose (defaults to the configured defaultNamespace)
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum DebugCommand {
    /// PVC, PV, StorageClass and volume attachment problems
    Storage {
        #[command(flatten)]
        ns: NamespaceArg,
        #[arg(long)]
        pod: Option<String>,
        #[arg(long)]
        pvc: Option<String>,
    },
    /// Restarting and failing containers
    Crashloop {
        #[command(flatten)]
        ns: NamespaceArg,
        #[arg(long)]
        pod: Option<String>,
        /// Label selector for the pods to check
        #[arg(short = 'l', long)]
        selector: Option<String>,
    },
    /// Pods stuck in Pending
    Scheduling {
        #[command(flatten)]
        ns: NamespaceArg,
        #[arg(long)]
        pod: Option<String>,
    },
    /// HorizontalPodAutoscaler behaviour
    Hpa {
        #[command(flatten)]
        ns: NamespaceArg,
        name: Option<String>,
    },
    /// VerticalPodAutoscaler setup
    Vpa {
        #[command(flatten)]
        ns: NamespaceArg,
        name: Option<String>,
    },
    /// ServiceAccount RBAC bindings and grants
    Permissions {
        #[command(flatten)]
        ns: NamespaceArg,
        #[arg(long = "service-account", short = 's', default_value = "default")]
        service_account: String,
        #[arg(long)]
        verb: Option<String>,
        #[arg(long)]
        resource: Option<String>,
        #[arg(long = "api-group")]
        api_group: Option<String>,
    },
    /// Service selectors, endpoints and NetworkPolicies
    Network {
        #[command(flatten)]
        ns: NamespaceArg,
        service: String,
    },
    /// Gateway API, Istio and Linkerd configuration
    Mesh {
        #[command(flatten)]
        ns: NamespaceArg,
        service: String,
    },
}

impl DebugCommand {
    /// Capability to invoke and its arguments
    pub fn to_invocation(&self, default_namespace: &str) -> (DebugKind, Value) {
        let namespace = |ns: &NamespaceArg| {
            ns.namespace
                .clone()
                .unwrap_or_else(|| default_namespace.to_string())
        };
        let mut args = Map::new();
        let kind = match self {
            DebugCommand::Storage { ns, pod, pvc } => {
                args.insert("namespace".into(), namespace(ns).into());
                insert_opt(&mut args, "pod", pod);
                insert_opt(&mut args, "pvc", pvc);
                DebugKind::Storage
            }
            DebugCommand::Crashloop { ns, pod, selector } => {
                args.insert("namespace".into(), namespace(ns).into());
                insert_opt(&mut args, "pod", pod);
                insert_opt(&mut args, "selector", selector);
                DebugKind::CrashLoop
            }
            DebugCommand::Scheduling { ns, pod } => {
                args.insert("namespace".into(), namespace(ns).into());
                insert_opt(&mut args, "pod", pod);
                DebugKind::Scheduling
            }
            DebugCommand::Hpa { ns, name } => {
                args.insert("namespace".into(), namespace(ns).into());
                insert_opt(&mut args, "name", name);
                DebugKind::Hpa
            }
            DebugCommand::Vpa { ns, name } => {
                args.insert("namespace".into(), namespace(ns).into());
                insert_opt(&mut args, "name", name);
                DebugKind::Vpa
            }
            DebugCommand::Permissions {
                ns,
                service_account,
                verb,
                resource,
                api_group,
            } => {
                args.insert("namespace".into(), namespace(ns).into());
                args.insert("serviceAccount".into(), service_account.clone().into());
                insert_opt(&mut args, "verb", verb);
                insert_opt(&mut args, "resource", resource);
                insert_opt(&mut args, "apiGroup", api_group);
                DebugKind::Permissions
            }
            DebugCommand::Network { ns, service } => {
                args.insert("namespace".into(), namespace(ns).into());
                args.insert("service".into(), service.clone().into());
                DebugKind::Network
            }
            DebugCommand::Mesh { ns, service } => {
                args.insert("namespace".into(), namespace(ns).into());
                args.insert("service".into(), service.clone().into());
                DebugKind::Mesh
            }
        };
        (kind, Value::Object(args))
    }
}

fn insert_opt(args: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        args.insert(key.to_string(), Value::String(value.clone()));
    }
}

#[derive(Subcommand, Debug)]
pub enum ToolsCommand {
    /// List registered capabilities with their safety tier
    List,
    /// Invoke a capability by name
    Invoke {
        name: String,
        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
        /// Confirm a risky-write or destructive capability
        #[arg(long)]
        confirm: bool,
    },
}

/// Engine wiring for one CLI run
pub struct Session {
    config: Config,
    invoker: ToolInvoker,
}

impl Session {
    pub fn new(cluster: Arc<dyn ClusterApi>, config: Config) -> Result<Self> {
        let policy: Arc<dyn PolicyGate> = Arc::new(RolePolicy);
        let service = Arc::new(DiagnosticService::new(
            cluster,
            policy.clone(),
            config.engine_settings(),
        ));
        let registry = builtin_registry(service, Arc::new(SecretRedactor))?;
        Ok(Self {
            config,
            invoker: ToolInvoker::new(Arc::new(registry), policy),
        })
    }

    pub fn invoker(&self) -> &ToolInvoker {
        &self.invoker
    }

    /// Fresh request context for the configured user, with the configured deadline
    pub fn request_context(&self) -> RequestContext {
        RequestContext::new(self.config.user())
            .with_timeout(self.config.engine_settings().request_timeout)
    }

    /// Run an engine command to its structured result
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        command: Command,
    ) -> Result<Value, DiagnosticError> {
        match command {
            Command::Graph {
                kind,
                name,
                namespace,
                mesh,
            } => {
                let mut args = json!({
                    "kind": kind,
                    "name": name,
                    "namespace": namespace.unwrap_or_default(),
                });
                if mesh {
                    args["includeMesh"] = Value::Bool(true);
                }
                self.invoker
                    .invoke(ctx, "build_graph", args, InvokeOptions::default())
                    .await
            }
            Command::Debug { target } => {
                let (kind, args) = target.to_invocation(&self.config.default_namespace);
                self.invoker
                    .invoke(ctx, kind.capability_name(), args, InvokeOptions::default())
                    .await
            }
            Command::Tools {
                command: ToolsCommand::List,
            } => Ok(json!({ "capabilities": self.invoker.registry().describe() })),
            Command::Tools {
                command:
                    ToolsCommand::Invoke {
                        name,
                        args,
                        confirm,
                    },
            } => {
                let args: Value = serde_json::from_str(&args).map_err(|e| {
                    DiagnosticError::validation(format!("--args is not valid JSON: {}", e))
                })?;
                if !args.is_object() {
                    return Err(DiagnosticError::validation("--args must be a JSON object"));
                }
                self.invoker
                    .invoke(ctx, &name, args, InvokeOptions { confirm })
                    .await
            }
            Command::Config { .. } | Command::Version => Err(DiagnosticError::validation(
                "command does not need a cluster session",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_invocation_uses_default_namespace() {
        let command = DebugCommand::Storage {
            ns: NamespaceArg { namespace: None },
            pod: None,
            pvc: Some("data".to_string()),
        };
        let (kind, args) = command.to_invocation("shop");
        assert_eq!(kind, DebugKind::Storage);
        assert_eq!(args, json!({"namespace": "shop", "pvc": "data"}));
    }

    #[test]
    fn test_permissions_invocation_args() {
        let command = DebugCommand::Permissions {
            ns: NamespaceArg {
                namespace: Some("payments".to_string()),
            },
            service_account: "api".to_string(),
            verb: Some("list".to_string()),
            resource: Some("pods".to_string()),
            api_group: None,
        };
        let (kind, args) = command.to_invocation("default");
        assert_eq!(kind.capability_name(), "debug_permissions");
        assert_eq!(
            args,
            json!({"namespace": "payments", "serviceAccount": "api", "verb": "list", "resource": "pods"})
        );
    }
}
