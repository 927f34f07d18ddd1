use kube::{Resource as _, ResourceExt as _};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::{
    resources::NamespacedReference,
    store::{ObjectStore, StoreError},
    Error, Result,
};

pub mod child;
pub mod desired;
pub mod ownership;
pub mod status;

pub use child::ChildChange;

/// Where a plex stands in its lifecycle, as observed by one reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// The plex does not exist (any more)
    Absent,

    /// The deployment was missing and has just been created
    Creating,

    /// The deployment ran the wrong number of replicas and has been rescaled
    Converging,

    /// The deployment matches and the status reflects its pods
    Converged,

    /// The plex is being deleted, garbage collection takes it from here
    Deleting,
}

/// The result of one reconcile pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub phase: Phase,

    /// Whether the pass should be repeated soon even without a new event
    pub requeue: bool,

    /// What happened to the deployment, if it was looked at
    pub child: Option<ChildChange>,

    /// Whether a new status was written
    pub status_written: bool,
}

impl Outcome {
    fn idle(phase: Phase) -> Self {
        Self {
            phase,
            requeue: false,
            child: None,
            status_written: false,
        }
    }
}

/// Bring the plex addressed by `key` in line with its spec.
///
/// Every call is a full, independent pass: it reads what it needs from the
/// store, issues only the writes that are missing and never retries. Errors
/// are handed back untouched for the caller to schedule a retry.
#[instrument(skip(store), fields(plex = %key))]
pub async fn reconcile<S>(store: &S, key: &NamespacedReference) -> Result<Outcome>
where
    S: ObjectStore + ?Sized,
{
    let plex = match store.get_plex(key).await {
        Ok(plex) => plex,
        Err(StoreError::NotFound(_)) => {
            debug!("Plex is gone, nothing to do");
            return Ok(Outcome::idle(Phase::Absent));
        }
        Err(e) => return Err(Error::FetchResource(e)),
    };

    // Owned objects are collected through their owner references
    if plex.meta().deletion_timestamp.is_some() {
        debug!("Plex is being deleted, leaving cleanup to the garbage collector");
        return Ok(Outcome::idle(Phase::Deleting));
    }

    let spec = plex.spec.defaulted();
    let (_, change) = child::sync_child(store, &plex, &spec).await?;

    let pods = store
        .list_pods(&key.namespace, &desired::selector())
        .await
        .map_err(Error::ListPods)?;

    let (new_status, changed) = status::project(&plex, &pods);
    if changed {
        let resource_version = plex
            .resource_version()
            .ok_or_else(|| Error::MissingResourceVersion(format!("plex {key}")))?;
        store
            .update_plex_status(key, &resource_version, &new_status)
            .await
            .map_err(Error::UpdateStatus)?;
        info!(pods = ?new_status.pods, "Updated plex status");
    }

    let phase = match change {
        ChildChange::Created => Phase::Creating,
        ChildChange::Scaled { .. } => Phase::Converging,
        ChildChange::Unchanged => Phase::Converged,
    };

    Ok(Outcome {
        phase,
        requeue: matches!(phase, Phase::Creating | Phase::Converging),
        child: Some(change),
        status_written: changed,
    })
}
