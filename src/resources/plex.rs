use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a Plex media server deployment
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    kind = "Plex",
    plural = "plexes",
    group = "plex.madorn.com",
    version = "v1alpha1",
    status = "PlexStatus",
    doc = "A Plex media server deployment",
    namespaced,
    printcolumn = r#"{ "name": "size", "type": "integer", "description": "requested replicas", "jsonPath": ".spec.size" }"#,
    printcolumn = r#"{ "name": "image", "type": "string", "description": "server image", "jsonPath": ".spec.image" }"#,
    printcolumn = r#"{ "name": "version", "type": "string", "description": "server image version", "jsonPath": ".spec.imageVersion" }"#
)]
#[serde(default, rename_all = "camelCase")]
pub struct PlexSpec {
    /// Container image to run, without a tag.
    pub image: String,

    /// Tag of the image to run.
    pub image_version: String,

    /// Time zone handed to the server through `TZ`.
    pub time_zone: String,

    /// Claim token used by the server to obtain a real server token.
    ///
    /// May be left empty, in which case the server starts unclaimed.
    pub claim_token: String,

    /// Name of the ConfigMap holding the initial `Preferences.xml`.
    pub config_object_name: String,

    /// Where the config volume is mounted inside the server container.
    pub config_mount_path: String,

    /// Where the media data volume is mounted inside the server container.
    pub data_mount_path: String,

    /// Where the transcode scratch volume is mounted inside the server container.
    pub transcode_mount_path: String,

    /// Number of server replicas.
    #[schemars(range(min = 0))]
    pub size: i32,

    /// Policy for the pods run on behalf of this server.
    ///
    /// Only read when the deployment is first created.
    pub pod: Option<PlexPodPolicy>,
}

/// Policy for the pods owned by a `Plex`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlexPodPolicy {
    /// Resource requirements of the server container, replacing the built-in ones.
    pub resources: Option<ResourceRequirements>,
}

/// Observed state of a `Plex`
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PlexStatus {
    /// Names of the server pods, in listing order.
    pub pods: Vec<String>,

    /// Addresses the server is reachable at, keyed by label.
    ///
    /// Filled in by service discovery; the operator only carries it along.
    pub external_addresses: BTreeMap<String, String>,
}

impl PlexSpec {
    /// Replace every empty field with its default, returning whether anything changed.
    ///
    /// Applying this twice changes nothing the second time.
    pub fn set_defaults(&mut self) -> bool {
        let fields = [
            (&mut self.image, defaults::IMAGE),
            (&mut self.image_version, defaults::IMAGE_VERSION),
            (&mut self.time_zone, defaults::TIME_ZONE),
            (&mut self.claim_token, defaults::CLAIM_TOKEN),
            (&mut self.config_object_name, defaults::CONFIG_OBJECT_NAME),
            (&mut self.config_mount_path, defaults::CONFIG_MOUNT_PATH),
            (&mut self.data_mount_path, defaults::DATA_MOUNT_PATH),
            (&mut self.transcode_mount_path, defaults::TRANSCODE_MOUNT_PATH),
        ];

        fields
            .into_iter()
            .fold(false, |changed, (field, default)| {
                if field.is_empty() && !default.is_empty() {
                    *field = default.into();
                    true
                } else {
                    changed
                }
            })
    }

    /// A copy of this spec with defaults filled in
    pub fn defaulted(&self) -> Self {
        let mut spec = self.clone();
        spec.set_defaults();
        spec
    }

    /// The full image reference, including its tag
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.image_version)
    }
}

pub mod defaults {
    pub const IMAGE: &str = "plexinc/pms-docker";
    pub const IMAGE_VERSION: &str = "1.13.0.5023-31d3c0c65";
    pub const TIME_ZONE: &str = "America/New_York";
    pub const CLAIM_TOKEN: &str = "";
    pub const CONFIG_OBJECT_NAME: &str = "plex-preferences-cm";
    pub const CONFIG_MOUNT_PATH: &str = "/config";
    pub const TRANSCODE_MOUNT_PATH: &str = "/transcode";
    pub const DATA_MOUNT_PATH: &str = "/data";
}
