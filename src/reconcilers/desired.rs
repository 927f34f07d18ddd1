//! The deployment a plex spec asks for.
//!
//! Everything here is pure: the same spec always yields the same deployment,
//! which is what lets the synchronizer compare desired against observed state.

use std::collections::BTreeMap;

use indoc::formatdoc;
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            ConfigMapVolumeSource, Container, ContainerPort, EnvVar, ExecAction, HTTPGetAction,
            PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
            Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity, apis::meta::v1::LabelSelector, util::intstr::IntOrString,
    },
};

use crate::resources::{NamespacedReference, PlexSpec};

/// Port serving the web UI, also probed for liveness
pub const UI_PORT: i32 = 32400;

/// Every port the server listens on, as (name, protocol, port)
pub const PORTS: [(&str, &str, i32); 9] = [
    ("plex-ui", "TCP", UI_PORT),
    ("plex-home", "TCP", 3005),
    ("plex-roku", "TCP", 8324),
    ("plex-dlna-tcp", "TCP", 32469),
    ("plex-dlna-udp", "UDP", 1900),
    ("plex-discovery1", "UDP", 32410),
    ("plex-discovery2", "UDP", 32412),
    ("plex-discovery3", "UDP", 32413),
    ("plex-discovery4", "UDP", 32414),
];

pub const SERVICE_ACCOUNT: &str = "useroot";
pub const INIT_IMAGE: &str = "busybox:1.29";

const CONFIG_VOLUME: &str = "plex-config";
const TRANSCODE_VOLUME: &str = "plex-transcode";
const DATA_VOLUME: &str = "plex-data";
const PREFERENCES_VOLUME: &str = "plex-preferences";
const PREFERENCES_MOUNT_PATH: &str = "/etc/plex";

const SANITY_CHECK: &str = "LD_LIBRARY_PATH=/usr/lib/plexmediaserver '/usr/lib/plexmediaserver/Plex Media Server Tests' --gtest_filter=SanityChecks";

/// The label selector string matching every plex pod
pub fn selector() -> String {
    let labels: BTreeMap<String, String> = labels!();

    labels
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Build the deployment for the plex addressed by `key`.
///
/// The spec is expected to already carry its defaults. Ownership is attached separately.
pub fn desired_deployment(key: &NamespacedReference, spec: &PlexSpec) -> Deployment {
    let labels = labels!();

    Deployment {
        metadata: meta! {
            name: Some(key.name.clone()),
            namespace: Some(key.namespace.clone()),
            labels: Some(labels.clone())
        },
        spec: Some(DeploymentSpec {
            replicas: Some(spec.size),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                match_expressions: None,
            },
            template: PodTemplateSpec {
                metadata: Some(meta! { labels: Some(labels) }),
                spec: Some(PodSpec {
                    service_account_name: Some(SERVICE_ACCOUNT.into()),
                    init_containers: Some(vec![init_container(spec)]),
                    containers: vec![server_container(spec)],
                    volumes: Some(volumes(spec)),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn server_container(spec: &PlexSpec) -> Container {
    let resources = spec
        .pod
        .as_ref()
        .and_then(|policy| policy.resources.clone())
        .unwrap_or_else(default_resources);

    Container {
        name: "plex".into(),
        image: Some(spec.image_ref()),
        image_pull_policy: Some("Always".into()),
        resources: Some(resources),
        ports: Some(
            PORTS
                .into_iter()
                .map(|(name, protocol, port)| ContainerPort {
                    name: Some(name.into()),
                    protocol: Some(protocol.into()),
                    container_port: port,
                    ..Default::default()
                })
                .collect(),
        ),
        env: Some(vec![
            EnvVar {
                name: "TZ".into(),
                value: Some(spec.time_zone.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "CLAIM_TOKEN".into(),
                value: Some(spec.claim_token.clone()),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: CONFIG_VOLUME.into(),
                mount_path: spec.config_mount_path.clone(),
                ..Default::default()
            },
            VolumeMount {
                name: TRANSCODE_VOLUME.into(),
                mount_path: spec.transcode_mount_path.clone(),
                ..Default::default()
            },
            VolumeMount {
                name: DATA_VOLUME.into(),
                mount_path: spec.data_mount_path.clone(),
                ..Default::default()
            },
        ]),
        readiness_probe: Some(Probe {
            exec: Some(ExecAction {
                command: Some(vec!["/bin/sh".into(), "-c".into(), SANITY_CHECK.into()]),
            }),
            initial_delay_seconds: Some(5),
            period_seconds: Some(10),
            ..Default::default()
        }),
        liveness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/".into()),
                port: IntOrString::Int(UI_PORT),
                scheme: Some("HTTP".into()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(15),
            period_seconds: Some(20),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Seeds the config volume with the preferences held in the referenced ConfigMap
fn init_container(spec: &PlexSpec) -> Container {
    let target = format!(
        "{}/Library/Application Support/Plex Media Server",
        spec.config_mount_path
    );
    let script = formatdoc! {r#"
            set -e
            mkdir -p "{target}"
            cp {source}/Preferences.xml "{target}/Preferences.xml"
        "#,
        source = PREFERENCES_MOUNT_PATH,
        target = target,
    };

    Container {
        name: "init".into(),
        image: Some(INIT_IMAGE.into()),
        image_pull_policy: Some("Always".into()),
        resources: Some(default_resources()),
        command: Some(vec!["/bin/sh".into(), "-c".into(), script]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: CONFIG_VOLUME.into(),
                mount_path: spec.config_mount_path.clone(),
                ..Default::default()
            },
            VolumeMount {
                name: PREFERENCES_VOLUME.into(),
                mount_path: PREFERENCES_MOUNT_PATH.into(),
                read_only: Some(true),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

fn volumes(spec: &PlexSpec) -> Vec<Volume> {
    let claim = |name: &str| Volume {
        name: name.into(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: name.into(),
            read_only: None,
        }),
        ..Default::default()
    };

    vec![
        claim(CONFIG_VOLUME),
        claim(TRANSCODE_VOLUME),
        claim(DATA_VOLUME),
        Volume {
            name: PREFERENCES_VOLUME.into(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(spec.config_object_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        },
    ]
}

fn default_resources() -> ResourceRequirements {
    let quantities = |cpu: &str, memory: &str| {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.into())),
            ("memory".to_string(), Quantity(memory.into())),
        ])
    };

    ResourceRequirements {
        requests: Some(quantities("250m", "64Mi")),
        limits: Some(quantities("500m", "128Mi")),
        ..Default::default()
    }
}
