//! Resource resolution with cached discovery
//!
//! Built-in kinds resolve without touching the API server. Everything else goes
//! through a discovery document cached for a configurable TTL. A discovery walk
//! where some groups failed is still used: unreachable groups are surfaced as
//! warnings, and resolution only fails when the group being asked for is one of
//! them.

use super::mapper::RestMapper;
use crate::kube::{ClusterApi, DiscoveryDoc};
use crate::models::{BuiltinKind, ResourceIdentity};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("no resource matches '{kind}'{}", group_suffix(.group_hint))]
    NotFound { kind: String, group_hint: String },

    #[error("API group {group} is unavailable: {reason}")]
    GroupUnavailable { group: String, reason: String },

    #[error("API discovery failed: {0}")]
    DiscoveryFailed(String),
}

fn group_suffix(group: &str) -> String {
    if group.is_empty() {
        String::new()
    } else {
        format!(" in group {}", group)
    }
}

/// A resolved identity plus any partial-discovery warnings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub identity: ResourceIdentity,
    pub warnings: Vec<String>,
}

struct CachedDiscovery {
    doc: Arc<DiscoveryDoc>,
    fetched_at: Instant,
}

pub struct ResourceResolver {
    cluster: Arc<dyn ClusterApi>,
    ttl: Duration,
    cached: RwLock<Option<CachedDiscovery>>,
}

impl ResourceResolver {
    pub fn new(cluster: Arc<dyn ClusterApi>, ttl: Duration) -> Self {
        Self {
            cluster,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Resolve a kind, plural, or short name, preferring `group_hint` on ambiguity
    pub async fn resolve(
        &self,
        kind: &str,
        group_hint: &str,
    ) -> Result<Resolution, ResolutionError> {
        if let Some(builtin) = BuiltinKind::from_str_case_insensitive(kind) {
            if group_hint.is_empty() || group_hint == builtin.group() {
                return Ok(Resolution {
                    identity: builtin.identity(),
                    warnings: Vec::new(),
                });
            }
        }

        let doc = self.discovery().await?;
        if !group_hint.is_empty() {
            if let Some(failed) = doc.group_failed(group_hint) {
                return Err(ResolutionError::GroupUnavailable {
                    group: failed.group.clone(),
                    reason: failed.reason.clone(),
                });
            }
        }

        let mapper = RestMapper::new(&doc);
        let found = mapper
            .map(kind, group_hint)
            .ok_or_else(|| ResolutionError::NotFound {
                kind: kind.to_string(),
                group_hint: group_hint.to_string(),
            })?;

        tracing::debug!("Resolved {} (hint '{}') to {}", kind, group_hint, found.identity);
        Ok(Resolution {
            identity: found.identity.clone(),
            warnings: doc.warnings(),
        })
    }

    /// Current discovery document, refreshed when older than the TTL
    pub async fn discovery(&self) -> Result<Arc<DiscoveryDoc>, ResolutionError> {
        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref() {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.doc.clone());
                }
            }
        }

        let doc = self
            .cluster
            .discover()
            .await
            .map_err(|e| ResolutionError::DiscoveryFailed(e.to_string()))?;
        if doc.is_total_failure() {
            return Err(ResolutionError::DiscoveryFailed(doc.warnings().join("; ")));
        }
        for warning in doc.warnings() {
            tracing::warn!("{}", warning);
        }

        let doc = Arc::new(doc);
        *self.cached.write().await = Some(CachedDiscovery {
            doc: doc.clone(),
            fetched_at: Instant::now(),
        });
        Ok(doc)
    }

    /// Drop the cached discovery document
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}
