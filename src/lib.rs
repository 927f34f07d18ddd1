use thiserror::Error;

#[macro_use]
mod macros;

/// Expose all controller components used by main
pub mod resources;

/// The reconciliation core
pub mod reconcilers;

/// Access to the object store backing the cluster
pub mod store;

/// Controller wiring, shared state and diagnostics
pub mod operator;

/// Environment driven configuration
pub mod config;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;
pub use metrics::Metrics;

#[cfg(test)]
mod fixtures;

use store::StoreError;

/// Field manager recorded on every write made by the operator
pub const MANAGER: &str = "plex-operator";

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to fetch plex: {0}")]
    FetchResource(#[source] StoreError),

    #[error("failed to create deployment: {0}")]
    CreateChild(#[source] StoreError),

    #[error("failed to get deployment: {0}")]
    FetchChild(#[source] StoreError),

    #[error("deployment {0} disappeared after create")]
    ChildVanished(String),

    #[error("failed to update deployment: {0}")]
    ScaleChild(#[source] StoreError),

    #[error("failed to list pods: {0}")]
    ListPods(#[source] StoreError),

    #[error("failed to update plex status: {0}")]
    UpdateStatus(#[source] StoreError),

    #[error("{0} carries no resource version")]
    MissingResourceVersion(String),

    #[error("IllegalPlex {0}: {1}")]
    IllegalPlex(String, String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> String {
        let label = match self {
            Self::FetchResource(_) => "fetch_resource",
            Self::CreateChild(_) => "create_child",
            Self::FetchChild(_) => "fetch_child",
            Self::ChildVanished(_) => "child_vanished",
            Self::ScaleChild(_) => "scale_child",
            Self::ListPods(_) => "list_pods",
            Self::UpdateStatus(_) => "update_status",
            Self::MissingResourceVersion(_) => "missing_resource_version",
            Self::IllegalPlex(..) => "illegal_plex",
        };

        label.into()
    }

    /// Whether this failure was a stale write that lost an optimistic concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::ScaleChild(StoreError::Conflict(_)) | Self::UpdateStatus(StoreError::Conflict(_))
        )
    }
}
