//! Capability registry
//!
//! Maps capability names to their handlers. Every capability declares a
//! [`Safety`] tier which the invoker uses to gate mutating calls behind an
//! explicit confirmation.

use super::invoker::ToolInvoker;
use crate::error::DiagnosticError;
use crate::services::context::RequestContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Mutation risk tier of a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Safety {
    ReadOnly,
    Write,
    RiskyWrite,
    Destructive,
}

impl Safety {
    pub fn as_str(&self) -> &'static str {
        match self {
            Safety::ReadOnly => "read-only",
            Safety::Write => "write",
            Safety::RiskyWrite => "risky-write",
            Safety::Destructive => "destructive",
        }
    }

    /// Anything but read-only needs an explicit confirmation flag
    pub fn requires_confirmation(&self) -> bool {
        !matches!(self, Safety::ReadOnly)
    }
}

impl fmt::Display for Safety {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, invocable unit of work
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn safety(&self) -> Safety;

    /// Whether the capability reads or writes cluster-scoped objects only
    fn cluster_scoped(&self) -> bool {
        false
    }

    /// Run the capability; `invoker` is available for nested calls
    async fn call(
        &self,
        ctx: &RequestContext,
        args: Value,
        invoker: &ToolInvoker,
    ) -> Result<Value, DiagnosticError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("capability '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Summary row for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityInfo {
    pub name: String,
    pub description: String,
    pub safety: Safety,
    pub cluster_scoped: bool,
}

#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability; names are unique
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<(), RegistryError> {
        let name = capability.name().to_string();
        if self.capabilities.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        debug!(capability = %name, safety = %capability.safety(), "Registering capability");
        self.capabilities.insert(name, capability);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    /// Registered names in ascending order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn describe(&self) -> Vec<CapabilityInfo> {
        self.names()
            .into_iter()
            .filter_map(|name| self.capabilities.get(&name))
            .map(|c| CapabilityInfo {
                name: c.name().to_string(),
                description: c.description().to_string(),
                safety: c.safety(),
                cluster_scoped: c.cluster_scoped(),
            })
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.names())
            .finish()
    }
}
