//! Helper objects and an in-memory store for unit tests
use std::{collections::BTreeMap, sync::Mutex};

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::{Deployment, DeploymentSpec},
    core::v1::Pod,
};
use kube::ResourceExt;

use crate::{
    resources::{NamespacedReference, Plex, PlexSpec, PlexStatus},
    store::{ObjectStore, StoreError},
};

/// A defaulted spec asking for `size` replicas
pub fn spec_fixture(size: i32) -> PlexSpec {
    PlexSpec {
        size,
        ..Default::default()
    }
    .defaulted()
}

/// A stored plex with an empty spec apart from its size
pub fn plex_fixture(namespace: &str, name: &str, size: i32) -> Plex {
    let mut plex = Plex::new(
        name,
        PlexSpec {
            size,
            ..Default::default()
        },
    );
    plex.metadata.namespace = Some(namespace.into());
    plex.metadata.uid = Some(format!("uid-{namespace}-{name}"));
    plex.metadata.resource_version = Some("1".into());
    plex
}

/// A running plex pod
pub fn pod_fixture(namespace: &str, name: &str) -> Pod {
    Pod {
        metadata: meta! {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            labels: Some(labels!())
        },
        ..Default::default()
    }
}

pub fn deployment_fixture(namespace: &str, name: &str, replicas: i32) -> Deployment {
    Deployment {
        metadata: meta! {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            resource_version: Some("42".into())
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Calls the [`MemoryStore`] can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    GetPlex,
    UpdateStatus,
    CreateDeployment,
    GetDeployment,
    ScaleDeployment,
    ListPods,
}

/// Writes that went through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    CreateDeployment(String),
    ScaleDeployment(String, i32),
    UpdateStatus(String),
}

#[derive(Default)]
struct Objects {
    plexes: BTreeMap<NamespacedReference, Plex>,
    deployments: BTreeMap<NamespacedReference, Deployment>,
    pods: Vec<Pod>,
    writes: Vec<Write>,
    failures: Vec<(Op, StoreError)>,
    version: u64,
}

impl Objects {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn failure(&mut self, op: Op) -> Result<(), StoreError> {
        match self.failures.iter().position(|(o, _)| *o == op) {
            Some(index) => Err(self.failures.remove(index).1),
            None => Ok(()),
        }
    }
}

/// An object store kept in memory, with the same optimistic concurrency rules as the API server
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<Objects>,
}

fn key_of<K: ResourceExt>(object: &K, namespace: &str) -> NamespacedReference {
    NamespacedReference::new(namespace, object.name_any())
}

impl MemoryStore {
    fn with<T>(&self, f: impl FnOnce(&mut Objects) -> T) -> T {
        f(&mut self.objects.lock().unwrap())
    }

    pub fn put_plex(&self, mut plex: Plex) {
        self.with(|o| {
            plex.metadata.resource_version = Some(o.next_version());
            let namespace = plex.namespace().unwrap();
            o.plexes.insert(key_of(&plex, &namespace), plex);
        })
    }

    pub fn plex(&self, key: &NamespacedReference) -> Option<Plex> {
        self.with(|o| o.plexes.get(key).cloned())
    }

    /// Change a plex the way another client would
    pub fn edit_plex(&self, key: &NamespacedReference, edit: impl FnOnce(&mut Plex)) {
        self.with(|o| {
            let version = o.next_version();
            let plex = o.plexes.get_mut(key).unwrap();
            edit(plex);
            plex.metadata.resource_version = Some(version);
        })
    }

    pub fn deployment(&self, key: &NamespacedReference) -> Option<Deployment> {
        self.with(|o| o.deployments.get(key).cloned())
    }

    pub fn deployment_count(&self) -> usize {
        self.with(|o| o.deployments.len())
    }

    /// Change a deployment the way another client would
    pub fn edit_deployment(&self, key: &NamespacedReference, edit: impl FnOnce(&mut Deployment)) {
        self.with(|o| {
            let version = o.next_version();
            let deployment = o.deployments.get_mut(key).unwrap();
            edit(deployment);
            deployment.metadata.resource_version = Some(version);
        })
    }

    pub fn scale_out_of_band(&self, key: &NamespacedReference, replicas: i32) {
        self.edit_deployment(key, |d| {
            d.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
        })
    }

    pub fn add_pod(&self, pod: Pod) {
        self.with(|o| o.pods.push(pod))
    }

    pub fn writes(&self) -> Vec<Write> {
        self.with(|o| o.writes.clone())
    }

    /// Make the next call of kind `op` fail with `error`
    pub fn fail_next(&self, op: Op, error: StoreError) {
        self.with(|o| o.failures.push((op, error)))
    }
}

fn matches_selector(pod: &Pod, selector: &str) -> bool {
    let labels = pod.labels();

    selector
        .split(',')
        .filter_map(|term| term.split_once('='))
        .all(|(key, value)| labels.get(key).map(String::as_str) == Some(value))
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_plex(&self, key: &NamespacedReference) -> Result<Plex, StoreError> {
        self.with(|o| {
            o.failure(Op::GetPlex)?;
            o.plexes
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(key.to_string()))
        })
    }

    async fn update_plex_status(
        &self,
        key: &NamespacedReference,
        resource_version: &str,
        status: &PlexStatus,
    ) -> Result<Plex, StoreError> {
        self.with(|o| {
            o.failure(Op::UpdateStatus)?;
            let version = o.next_version();
            let plex = o
                .plexes
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            if plex.resource_version().as_deref() != Some(resource_version) {
                return Err(StoreError::Conflict(key.to_string()));
            }

            plex.status = Some(status.clone());
            plex.metadata.resource_version = Some(version);
            let plex = plex.clone();
            o.writes.push(Write::UpdateStatus(key.name.clone()));
            Ok(plex)
        })
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, StoreError> {
        self.with(|o| {
            o.failure(Op::CreateDeployment)?;
            let key = key_of(deployment, namespace);
            if o.deployments.contains_key(&key) {
                return Err(StoreError::AlreadyExists(key.to_string()));
            }

            let mut created = deployment.clone();
            created.metadata.resource_version = Some(o.next_version());
            created.metadata.uid = Some(format!("uid-deployment-{key}"));
            o.deployments.insert(key.clone(), created.clone());
            o.writes.push(Write::CreateDeployment(key.name));
            Ok(created)
        })
    }

    async fn get_deployment(&self, key: &NamespacedReference) -> Result<Deployment, StoreError> {
        self.with(|o| {
            o.failure(Op::GetDeployment)?;
            o.deployments
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(key.to_string()))
        })
    }

    async fn scale_deployment(
        &self,
        key: &NamespacedReference,
        resource_version: &str,
        replicas: i32,
    ) -> Result<Deployment, StoreError> {
        self.with(|o| {
            o.failure(Op::ScaleDeployment)?;
            let version = o.next_version();
            let deployment = o
                .deployments
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            if deployment.resource_version().as_deref() != Some(resource_version) {
                return Err(StoreError::Conflict(key.to_string()));
            }

            deployment.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
            deployment.metadata.resource_version = Some(version);
            let deployment = deployment.clone();
            o.writes.push(Write::ScaleDeployment(key.name.clone(), replicas));
            Ok(deployment)
        })
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, StoreError> {
        self.with(|o| {
            o.failure(Op::ListPods)?;
            Ok(o.pods
                .iter()
                .filter(|pod| pod.namespace().as_deref() == Some(namespace))
                .filter(|pod| matches_selector(pod, label_selector))
                .cloned()
                .collect())
        })
    }
}
