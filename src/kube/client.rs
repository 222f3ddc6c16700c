//! Live cluster access over kube-rs
//!
//! All reads go through `Api<DynamicObject>` built from the resolved
//! `ApiResource`, so built-in kinds and CRDs share one code path.

use super::cluster::{ClusterApi, ClusterError, ListQuery};
use super::discovery::{DiscoveredResource, DiscoveryDoc};
use super::object::ObjectDoc;
use crate::models::ResourceIdentity;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::Client;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use serde_json::Value;

/// [`ClusterApi`] backed by a kube-rs client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, identity: &ResourceIdentity, namespace: Option<&str>) -> Api<DynamicObject> {
        let api_resource = identity.api_resource();
        match namespace {
            Some(ns) if identity.namespaced => {
                Api::namespaced_with(self.client.clone(), ns, &api_resource)
            }
            _ => Api::all_with(self.client.clone(), &api_resource),
        }
    }
}

fn to_doc(object: DynamicObject, identity: &ResourceIdentity) -> Result<ObjectDoc, ClusterError> {
    let mut doc = ObjectDoc::from_typed(&object)?;
    doc.ensure_type_meta(identity);
    Ok(doc)
}

/// Append every top-level (non-subresource) entry of a resource list
fn push_resources(doc: &mut DiscoveryDoc, group: &str, version: &str, list: APIResourceList) {
    for resource in list.resources {
        if resource.name.contains('/') {
            continue;
        }
        doc.push(DiscoveredResource {
            identity: ResourceIdentity::new(
                group,
                version,
                resource.name,
                resource.kind,
                resource.namespaced,
            ),
            singular: resource.singular_name,
            short_names: resource.short_names.unwrap_or_default(),
        });
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn discover(&self) -> Result<DiscoveryDoc, ClusterError> {
        let mut doc = DiscoveryDoc::default();

        match self.client.list_core_api_resources("v1").await {
            Ok(list) => push_resources(&mut doc, "", "v1", list),
            Err(e) => {
                tracing::warn!("Core API discovery failed: {}", e);
                doc.record_failure("", e.to_string());
            }
        }

        let groups = self
            .client
            .list_api_groups()
            .await
            .map_err(|e| ClusterError::Discovery(e.to_string()))?;

        for group in groups.groups {
            let Some(preferred) = group
                .preferred_version
                .or_else(|| group.versions.first().cloned())
            else {
                continue;
            };
            match self
                .client
                .list_api_group_resources(&preferred.group_version)
                .await
            {
                Ok(list) => push_resources(&mut doc, &group.name, &preferred.version, list),
                Err(e) => {
                    tracing::warn!("Discovery failed for group {}: {}", group.name, e);
                    doc.record_failure(group.name, e.to_string());
                }
            }
        }

        tracing::debug!(
            "Discovered {} resources ({} failed groups)",
            doc.resources.len(),
            doc.failed_groups.len()
        );
        Ok(doc)
    }

    async fn get(
        &self,
        identity: &ResourceIdentity,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<ObjectDoc>, ClusterError> {
        let api = self.api(identity, namespace);
        match api.get_opt(name).await? {
            Some(object) => to_doc(object, identity).map(Some),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        identity: &ResourceIdentity,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> Result<Vec<ObjectDoc>, ClusterError> {
        let api = self.api(identity, namespace);
        let mut params = ListParams::default();
        if let Some(labels) = &query.label_selector {
            params = params.labels(labels);
        }
        if let Some(fields) = &query.field_selector {
            params = params.fields(fields);
        }
        let list = api.list(&params).await?;
        list.items
            .into_iter()
            .map(|object| to_doc(object, identity))
            .collect()
    }

    async fn patch_merge(
        &self,
        identity: &ResourceIdentity,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<ObjectDoc, ClusterError> {
        let api = self.api(identity, namespace);
        let updated = api
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        to_doc(updated, identity)
    }

    async fn delete(
        &self,
        identity: &ResourceIdentity,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ClusterError> {
        let api = self.api(identity, namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}
