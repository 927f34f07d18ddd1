use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{core::ObjectMeta, Resource as _, ResourceExt as _};

use crate::{resources::Plex, Error, Result};

/// The controller reference pointing back at `plex`
pub fn owner_reference(plex: &Plex) -> Result<OwnerReference> {
    plex.controller_owner_ref(&())
        .ok_or_else(|| Error::IllegalPlex(plex.name_any(), "missing uid".into()))
}

/// Make `owner` the one controller of the object described by `meta`.
///
/// Attaching the same reference twice is a no-op. Any other controller
/// reference is dropped, non-controller references are left alone.
pub fn attach_owner(meta: &mut ObjectMeta, owner: OwnerReference) {
    let owners = meta.owner_references.get_or_insert_with(Vec::new);

    owners.retain(|existing| existing.controller != Some(true) || existing.uid == owner.uid);
    if !owners.contains(&owner) {
        owners.retain(|existing| existing.uid != owner.uid);
        owners.push(owner);
    }
}
