use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt as _;
use tracing::{debug, info};

use super::{
    desired::desired_deployment,
    ownership::{attach_owner, owner_reference},
};
use crate::{
    resources::{Plex, PlexSpec},
    store::{ObjectStore, StoreError},
    Error, Result,
};

/// Replica count the cluster assumes when a deployment does not set one
const DEFAULT_REPLICAS: i32 = 1;

/// What a sync did to the deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildChange {
    /// The deployment did not exist and was created
    Created,

    /// The deployment existed with the wrong replica count and was rescaled
    Scaled { from: i32, to: i32 },

    /// The deployment already matched
    Unchanged,
}

/// Make sure the deployment of `plex` exists and runs `spec.size` replicas.
///
/// Only the replica count is ever brought back in line; every other field of an
/// existing deployment is left as found.
pub async fn sync_child<S>(store: &S, plex: &Plex, spec: &PlexSpec) -> Result<(Deployment, ChildChange)>
where
    S: ObjectStore + ?Sized,
{
    let key = plex.key()?;

    let mut desired = desired_deployment(&key, spec);
    attach_owner(&mut desired.metadata, owner_reference(plex)?);

    let created = match store.create_deployment(&key.namespace, &desired).await {
        Ok(_) => {
            info!(r#"Created deployment "{key}""#);
            true
        }
        Err(StoreError::AlreadyExists(_)) => false,
        Err(e) => return Err(Error::CreateChild(e)),
    };

    // Always read back, the create response may already be stale
    let current = match store.get_deployment(&key).await {
        Ok(deployment) => deployment,
        Err(StoreError::NotFound(_)) => return Err(Error::ChildVanished(key.to_string())),
        Err(e) => return Err(Error::FetchChild(e)),
    };

    let observed = current
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(DEFAULT_REPLICAS);
    if observed == spec.size {
        debug!(r#"Deployment "{key}" already runs {observed} replicas"#);
        let change = if created {
            ChildChange::Created
        } else {
            ChildChange::Unchanged
        };
        return Ok((current, change));
    }

    let resource_version = current
        .resource_version()
        .ok_or_else(|| Error::MissingResourceVersion(format!("deployment {key}")))?;
    let scaled = store
        .scale_deployment(&key, &resource_version, spec.size)
        .await
        .map_err(Error::ScaleChild)?;
    info!(
        r#"Scaled deployment "{key}" from {observed} to {} replicas"#,
        spec.size
    );

    Ok((
        scaled,
        ChildChange::Scaled {
            from: observed,
            to: spec.size,
        },
    ))
}
