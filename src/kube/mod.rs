//! Kubernetes access module
//!
//! Connects to the API server and exposes the [`ClusterApi`] seam the engine
//! reads through, with a live ([`KubeCluster`]) and an in-process
//! ([`InMemoryCluster`]) implementation.
//!
//! Client configuration follows the usual kubeconfig loading strategy:
//! 1. In-cluster config (if running in a pod)
//! 2. KUBECONFIG environment variable
//! 3. ~/.kube/config
//!
//! Proxy settings (`HTTP_PROXY`, `HTTPS_PROXY`, `NO_PROXY`) are honoured by the
//! underlying client.

pub mod client;
pub mod cluster;
pub mod discovery;
pub mod memory;
pub mod object;

pub use client::KubeCluster;
pub use cluster::{ClusterApi, ClusterError, ListQuery};
pub use discovery::{DiscoveredResource, DiscoveryDoc, FailedGroup};
pub use memory::{InMemoryCluster, Mutation};
pub use object::{ObjectDoc, OwnerRef};

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

/// Initialize a Kubernetes client, optionally for a specific kubeconfig context
pub async fn create_client(context: Option<&str>) -> Result<Client> {
    let config = match context {
        Some(context) => {
            let options = KubeConfigOptions {
                context: Some(context.to_string()),
                ..Default::default()
            };
            Config::from_kubeconfig(&options)
                .await
                .with_context(|| format!("Failed to load kubeconfig context '{}'", context))?
        }
        None => Config::infer()
            .await
            .context("Failed to infer Kubernetes configuration")?,
    };

    tracing::debug!("Connecting to cluster at {}", config.cluster_url);
    let client = Client::try_from(config).context("Failed to create Kubernetes client")?;
    Ok(client)
}

/// Name of the current kubeconfig context, if a kubeconfig is present
pub fn current_context() -> Option<String> {
    match Kubeconfig::read() {
        Ok(kubeconfig) => kubeconfig.current_context,
        Err(e) => {
            tracing::debug!("No kubeconfig available: {}", e);
            None
        }
    }
}
