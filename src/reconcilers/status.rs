use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt as _;

use crate::resources::{Plex, PlexStatus};

/// Compute the status `plex` should report for the observed `pods`.
///
/// Returns the new status and whether it differs from the one currently stored.
/// Pod names keep their listing order and are compared order included.
/// External addresses are carried over untouched.
pub fn project(plex: &Plex, pods: &[Pod]) -> (PlexStatus, bool) {
    let previous = plex.status.clone().unwrap_or_default();
    let names: Vec<String> = pods.iter().map(|pod| pod.name_any()).collect();

    let changed = names != previous.pods;
    let status = PlexStatus {
        pods: names,
        external_addresses: previous.external_addresses,
    };

    (status, changed)
}
