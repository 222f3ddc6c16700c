//! Capability invocation
//!
//! Every invocation, whether it comes from the CLI or from another capability,
//! goes through the same gates: registration, confirmation for mutating tiers,
//! and the policy gate for the namespace named in the arguments.

use super::registry::{CapabilityRegistry, Safety};
use crate::analysis::Analysis;
use crate::constants::CAPABILITY_UNAVAILABLE;
use crate::error::DiagnosticError;
use crate::policy::PolicyGate;
use crate::services::context::RequestContext;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvokeOptions {
    /// Caller explicitly confirmed a mutating call
    pub confirm: bool,
}

impl InvokeOptions {
    pub fn confirmed() -> Self {
        Self { confirm: true }
    }
}

#[derive(Clone)]
pub struct ToolInvoker {
    registry: Arc<CapabilityRegistry>,
    policy: Arc<dyn PolicyGate>,
}

impl ToolInvoker {
    pub fn new(registry: Arc<CapabilityRegistry>, policy: Arc<dyn PolicyGate>) -> Self {
        Self { registry, policy }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn safety_of(&self, name: &str) -> Option<Safety> {
        self.registry.get(name).map(|c| c.safety())
    }

    /// Invoke a capability by name on behalf of `ctx.user`
    ///
    /// The call runs under a child of `ctx`, so cancelling the parent request
    /// aborts it.
    pub async fn invoke(
        &self,
        ctx: &RequestContext,
        name: &str,
        args: Value,
        options: InvokeOptions,
    ) -> Result<Value, DiagnosticError> {
        let capability = self
            .registry
            .get(name)
            .ok_or_else(|| DiagnosticError::CapabilityUnavailable(name.to_string()))?;

        let safety = capability.safety();
        if safety.requires_confirmation() && !options.confirm {
            return Err(DiagnosticError::ConfirmationRequired {
                capability: name.to_string(),
                safety,
            });
        }

        if capability.cluster_scoped() {
            self.policy.check_cluster_scope(&ctx.user)?;
        } else {
            let namespace = args.get("namespace").and_then(Value::as_str).unwrap_or("");
            self.policy.check_namespace(&ctx.user, namespace, false)?;
        }

        debug!(capability = %name, user = %ctx.user.name, %safety, "Invoking capability");
        let nested = ctx.child();
        nested
            .run(capability.call(&nested, args, self))
            .await
            .map_err(|reason| DiagnosticError::Cancelled {
                reason,
                partial: None,
            })?
    }

    /// Optional enrichment: failures become evidence instead of errors
    ///
    /// Only cancellation propagates. A missing capability is recorded as
    /// `"capability unavailable"` under its own name.
    pub async fn try_invoke(
        &self,
        ctx: &RequestContext,
        analysis: &mut Analysis,
        name: &str,
        args: Value,
    ) -> Result<Option<Value>, DiagnosticError> {
        match self.invoke(ctx, name, args, InvokeOptions::default()).await {
            Ok(value) => Ok(Some(value)),
            Err(DiagnosticError::CapabilityUnavailable(_)) => {
                debug!(capability = %name, "Optional capability not registered");
                analysis.add_evidence(name, CAPABILITY_UNAVAILABLE);
                Ok(None)
            }
            Err(err @ DiagnosticError::Cancelled { .. }) => Err(err),
            Err(err) => {
                warn!(capability = %name, error = %err, "Optional capability failed");
                analysis.add_evidence(name, format!("capability failed: {}", err));
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{MockPolicyGate, PolicyError, RolePolicy, User};
    use crate::tools::registry::Capability;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: &'static str,
        safety: Safety,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Capability for Counting {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "counts calls"
        }

        fn safety(&self) -> Safety {
            self.safety
        }

        async fn call(
            &self,
            _ctx: &RequestContext,
            _args: Value,
            _invoker: &ToolInvoker,
        ) -> Result<Value, DiagnosticError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"ok": true}))
        }
    }

    /// Calls `inner` in a fixed namespace
    struct Nested;

    #[async_trait]
    impl Capability for Nested {
        fn name(&self) -> &str {
            "outer"
        }

        fn description(&self) -> &str {
            "invokes inner"
        }

        fn safety(&self) -> Safety {
            Safety::ReadOnly
        }

        async fn call(
            &self,
            ctx: &RequestContext,
            _args: Value,
            invoker: &ToolInvoker,
        ) -> Result<Value, DiagnosticError> {
            invoker
                .invoke(
                    ctx,
                    "inner",
                    json!({"namespace": "kube-system"}),
                    InvokeOptions::default(),
                )
                .await
        }
    }

    fn registry_with(safety: Safety, calls: Arc<AtomicUsize>) -> Arc<CapabilityRegistry> {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(Arc::new(Counting {
                name: "inner",
                safety,
                calls,
            }))
            .unwrap();
        registry.register(Arc::new(Nested)).unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_destructive_requires_confirmation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let invoker = ToolInvoker::new(
            registry_with(Safety::Destructive, calls.clone()),
            Arc::new(RolePolicy),
        );
        let ctx = RequestContext::new(User::cluster("ops"));

        let err = invoker
            .invoke(&ctx, "inner", json!({"namespace": "default"}), InvokeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DiagnosticError::ConfirmationRequired {
                safety: Safety::Destructive,
                ..
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        invoker
            .invoke(&ctx, "inner", json!({"namespace": "default"}), InvokeOptions::confirmed())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nested_invocation_is_policy_checked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut policy = MockPolicyGate::new();
        policy
            .expect_check_namespace()
            .withf(|_, ns, _| ns.to_string() == "team-a")
            .times(1)
            .returning(|_, _, _| Ok(()));
        policy
            .expect_check_namespace()
            .withf(|_, ns, _| ns.to_string() == "kube-system")
            .times(1)
            .returning(|user, ns, _| {
                Err(PolicyError::NamespaceDenied {
                    user: user.name.clone(),
                    namespace: ns.to_string(),
                })
            });

        let invoker = ToolInvoker::new(
            registry_with(Safety::ReadOnly, calls.clone()),
            Arc::new(policy),
        );
        let ctx = RequestContext::new(User::namespaced("dev", &["team-a"]));

        let err = invoker
            .invoke(&ctx, "outer", json!({"namespace": "team-a"}), InvokeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "policy");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_try_invoke_records_unavailable_capability() {
        let invoker = ToolInvoker::new(Arc::new(CapabilityRegistry::new()), Arc::new(RolePolicy));
        let ctx = RequestContext::new(User::cluster("ops"));
        let mut analysis = Analysis::new("permissions", "default");

        let result = invoker
            .try_invoke(&ctx, &mut analysis, "cloud_iam_role_lookup", json!({}))
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(
            analysis.evidence()[0].payload,
            Value::from(CAPABILITY_UNAVAILABLE)
        );
    }

    #[tokio::test]
    async fn test_cancelled_parent_aborts_invocation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let invoker = ToolInvoker::new(
            registry_with(Safety::ReadOnly, calls.clone()),
            Arc::new(RolePolicy),
        );
        let ctx = RequestContext::new(User::cluster("ops"));
        ctx.cancel();

        let err = invoker
            .invoke(&ctx, "inner", json!({"namespace": "default"}), InvokeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "cancelled");
    }
}
