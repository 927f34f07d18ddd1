use std::fmt;

use kube::ResourceExt;
use serde::{Deserialize, Serialize};

mod plex;

pub use plex::*;

use crate::{Error, Result};

/// Reference to a namespaced object
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedReference {
    /// The name of the resource
    pub name: String,

    /// The containing namespace.
    pub namespace: String,
}

impl NamespacedReference {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for NamespacedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl Plex {
    /// The key this plex (and its deployment) is addressed by
    pub fn key(&self) -> Result<NamespacedReference> {
        let name = self.name_any();
        let namespace = self
            .namespace()
            .ok_or_else(|| Error::IllegalPlex(name.clone(), "missing namespace".into()))?;

        Ok(NamespacedReference { name, namespace })
    }
}
