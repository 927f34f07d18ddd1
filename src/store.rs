use async_trait::async_trait;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Pod};
use kube::{
    api::{ListParams, Patch, PatchParams, PostParams},
    Api, Client,
};
use serde_json::json;
use thiserror::Error;

use crate::{
    resources::{NamespacedReference, Plex, PlexStatus},
    MANAGER,
};

/// The outcomes of a store call the reconciler cares to tell apart
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("Kube Error: {0}")]
    Kube(#[source] kube::Error),
}

impl From<kube::Error> for StoreError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response) if response.code == 404 => Self::NotFound(response.message),
            kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
                Self::AlreadyExists(response.message)
            }
            kube::Error::Api(response) if response.code == 409 => Self::Conflict(response.message),
            other => Self::Kube(other),
        }
    }
}

/// Versioned reads and writes against the objects a plex is made of.
///
/// Every write that names a `resource_version` must be rejected with
/// [`StoreError::Conflict`] when the stored object has moved on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_plex(&self, key: &NamespacedReference) -> Result<Plex, StoreError>;

    async fn update_plex_status(
        &self,
        key: &NamespacedReference,
        resource_version: &str,
        status: &PlexStatus,
    ) -> Result<Plex, StoreError>;

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, StoreError>;

    async fn get_deployment(&self, key: &NamespacedReference) -> Result<Deployment, StoreError>;

    /// Set only the replica count of a deployment
    async fn scale_deployment(
        &self,
        key: &NamespacedReference,
        resource_version: &str,
        replicas: i32,
    ) -> Result<Deployment, StoreError>;

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, StoreError>;
}

/// The store as seen through the kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn params() -> PatchParams {
        PatchParams {
            field_manager: Some(MANAGER.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_plex(&self, key: &NamespacedReference) -> Result<Plex, StoreError> {
        let plexes = Api::<Plex>::namespaced(self.client.clone(), &key.namespace);
        Ok(plexes.get(&key.name).await?)
    }

    async fn update_plex_status(
        &self,
        key: &NamespacedReference,
        resource_version: &str,
        status: &PlexStatus,
    ) -> Result<Plex, StoreError> {
        let plexes = Api::<Plex>::namespaced(self.client.clone(), &key.namespace);

        // The resource version turns the merge into a compare-and-swap
        let patch = Patch::Merge(json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        }));
        Ok(plexes.patch_status(&key.name, &Self::params(), &patch).await?)
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let deployments = Api::<Deployment>::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(MANAGER.into()),
            ..Default::default()
        };

        Ok(deployments.create(&params, deployment).await?)
    }

    async fn get_deployment(&self, key: &NamespacedReference) -> Result<Deployment, StoreError> {
        let deployments = Api::<Deployment>::namespaced(self.client.clone(), &key.namespace);
        Ok(deployments.get(&key.name).await?)
    }

    async fn scale_deployment(
        &self,
        key: &NamespacedReference,
        resource_version: &str,
        replicas: i32,
    ) -> Result<Deployment, StoreError> {
        let deployments = Api::<Deployment>::namespaced(self.client.clone(), &key.namespace);
        let patch = Patch::Merge(json!({
            "metadata": { "resourceVersion": resource_version },
            "spec": { "replicas": replicas },
        }));

        Ok(deployments.patch(&key.name, &Self::params(), &patch).await?)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, StoreError> {
        let pods = Api::<Pod>::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default().labels(label_selector)).await?;

        Ok(list.items)
    }
}
