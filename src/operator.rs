use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::{
    api::{apps::v1::Deployment, core::v1::Pod},
    NamespaceResourceScope,
};
use kube::{
    api::ListParams,
    runtime::{
        controller::Action,
        events::{Event, EventType, Recorder, Reporter},
        reflector::ObjectRef,
        watcher::Config as WatcherConfig,
        Controller,
    },
    Api, Client, Resource, ResourceExt,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, field, info, instrument, warn, Span};

use crate::{
    config::Config,
    reconcilers::{self, desired, ChildChange, Outcome},
    resources::Plex,
    store::KubeStore,
    telemetry, Error, Metrics, Result, MANAGER,
};

/// Label the deployment controller puts on every pod of a ReplicaSet
const POD_TEMPLATE_HASH: &str = "pod-template-hash";

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: MANAGER.into(),
        }
    }
}
impl Diagnostics {
    pub fn recorder(&self, client: Client, plex: &Plex) -> Recorder {
        Recorder::new(client, self.reporter.clone(), plex.object_ref(&()))
    }
}

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub(crate) fn to_context(&self, client: Client, config: Config) -> Result<Arc<Context>, prometheus::Error> {
        Ok(Arc::new(Context {
            store: KubeStore::new(client.clone()),
            client,
            metrics: Metrics::new(&self.registry)?,
            diagnostics: self.diagnostics.clone(),
            config,
        }))
    }
}

/// The context handed to every reconcile
pub struct Context {
    /// Kubernetes client
    pub client: Client,

    /// Object store the reconciler reads and writes through
    pub store: KubeStore,

    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,

    /// Prometheus metrics
    pub metrics: Metrics,

    /// Operator settings
    pub config: Config,
}

pub struct PlexController {
    state: State,
}

impl PlexController {
    pub fn new(state: State) -> Self {
        Self { state }
    }

    /// Initialize the controller and shared state (given the crd is installed)
    pub async fn run(self, config: Config) -> Result<(), anyhow::Error> {
        // Get a k8s client for communicating with the cluster
        let client = Client::try_default().await?;
        let namespace = config.namespace.clone();

        // Create fetchers to our CRD and the objects it is made of
        let plexes = scoped_api::<Plex>(client.clone(), namespace.as_deref());
        let deployments = scoped_api::<Deployment>(client.clone(), namespace.as_deref());
        let pods = scoped_api::<Pod>(client.clone(), namespace.as_deref());

        // Test that we can actually query for our CRD (a.k.a. it is installed)
        if let Err(e) = plexes.list(&ListParams::default().limit(1)).await {
            error!("CRD is not queryable; {e:?}. Is the CRD installed?");
            info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
            return Err(e.into());
        }

        let context = self.state.to_context(client, config)?;

        // Create a new k8s controller for our CRD resources
        let watching_config = WatcherConfig::default().any_semantic();
        Controller::new(plexes, watching_config.clone())
            .shutdown_on_signal()
            .owns(deployments, watching_config.clone())
            .watches(
                pods,
                watching_config.labels(&desired::selector()),
                |pod| plex_for_pod(&pod),
            )
            .run(reconcile, error_policy, context)
            .filter_map(|x| async move { Result::ok(x) })
            .for_each(|_| futures::future::ready(()))
            .await;

        Ok(())
    }
}

fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    }
}

/// Find the plex a pod runs for.
///
/// Pods belong to a ReplicaSet named `<deployment>-<pod-template-hash>` and the
/// deployment carries the name of its plex, so the plex can be recovered from the
/// pod alone. Pods without such an owner map to nothing.
pub fn plex_for_pod(pod: &Pod) -> Option<ObjectRef<Plex>> {
    let namespace = pod.namespace()?;
    let hash = pod.labels().get(POD_TEMPLATE_HASH)?;
    let owner = pod
        .owner_references()
        .iter()
        .find(|owner| owner.kind == "ReplicaSet" && owner.controller == Some(true))?;

    let name = owner.name.strip_suffix(hash.as_str())?.strip_suffix('-')?;
    if name.is_empty() {
        return None;
    }

    Some(ObjectRef::new(name).within(&namespace))
}

/// What the controller should do after a successful pass
pub fn action_for(outcome: &Outcome, config: &Config) -> Action {
    if outcome.requeue {
        Action::requeue(config.requeue_after)
    } else {
        Action::await_change()
    }
}

/// How long to wait before retrying a failed pass
pub fn retry_delay(error: &Error, config: &Config) -> Duration {
    if error.is_conflict() {
        Duration::from_secs(1)
    } else {
        config.retry_after
    }
}

/// The event announcing a change made to the deployment, if any
fn event_for(change: ChildChange, name: &str) -> Option<Event> {
    let (reason, note, action) = match change {
        ChildChange::Created => ("Created", format!("Created deployment `{name}`"), "Creating"),
        ChildChange::Scaled { from, to } => (
            "Scaled",
            format!("Scaled deployment `{name}` from {from} to {to} replicas"),
            "Scaling",
        ),
        ChildChange::Unchanged => return None,
    };

    Some(Event {
        type_: EventType::Normal,
        reason: reason.into(),
        note: Some(note),
        action: action.into(),
        secondary: None,
    })
}

// Error handler for failed reconciliations
fn error_policy(plex: Arc<Plex>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(&plex, error);
    Action::requeue(retry_delay(error, &ctx.config))
}

/// Controller entry point, handing each plex key to the reconciler
#[instrument(skip(ctx, plex), fields(trace_id))]
async fn reconcile(plex: Arc<Plex>, ctx: Arc<Context>) -> Result<Action> {
    // Add some tracing for debugging's sake
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));

    // Take some metrics to see the average reconcile time
    let _timer = ctx.metrics.count_and_measure();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let key = plex.key()?;
    info!(r#"Starting Plex reconciliation for "{key}""#);

    let outcome = reconcilers::reconcile(&ctx.store, &key).await?;
    ctx.metrics.record_writes(&outcome);

    if let Some(event) = outcome.child.and_then(|change| event_for(change, &key.name)) {
        let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone(), &plex);
        if let Err(e) = recorder.publish(event).await {
            warn!(r#"Could not publish event for "{key}": {e}"#);
        }
    }

    Ok(action_for(&outcome, &ctx.config))
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    use super::*;
    use crate::{reconcilers::Phase, store::StoreError};

    fn pod(owner: Option<(&str, &str)>, hash: Option<&str>) -> Pod {
        let mut labels = std::collections::BTreeMap::new();
        if let Some(hash) = hash {
            labels.insert(POD_TEMPLATE_HASH.to_string(), hash.to_string());
        }

        Pod {
            metadata: meta! {
                name: Some("living-room-5d8f7c9b6-x2x7q".into()),
                namespace: Some("media".into()),
                labels: Some(labels),
                owner_references: owner.map(|(kind, name)| {
                    vec![OwnerReference {
                        api_version: "apps/v1".into(),
                        kind: kind.into(),
                        name: name.into(),
                        uid: "rs-uid".into(),
                        controller: Some(true),
                        block_owner_deletion: Some(true),
                    }]
                })
            },
            ..Default::default()
        }
    }

    fn outcome(phase: Phase, requeue: bool) -> Outcome {
        Outcome {
            phase,
            requeue,
            child: None,
            status_written: false,
        }
    }

    #[test]
    fn pod_maps_back_to_its_plex() {
        let pod = pod(
            Some(("ReplicaSet", "living-room-5d8f7c9b6")),
            Some("5d8f7c9b6"),
        );

        assert_eq!(
            plex_for_pod(&pod),
            Some(ObjectRef::new("living-room").within("media"))
        );
    }

    #[test]
    fn pods_without_a_replicaset_owner_map_to_nothing() {
        assert_eq!(plex_for_pod(&pod(None, Some("5d8f7c9b6"))), None);
        assert_eq!(
            plex_for_pod(&pod(Some(("StatefulSet", "living-room")), Some("5d8f7c9b6"))),
            None
        );
        assert_eq!(
            plex_for_pod(&pod(Some(("ReplicaSet", "living-room-5d8f7c9b6")), None)),
            None
        );
        assert_eq!(
            plex_for_pod(&pod(Some(("ReplicaSet", "unrelated-name")), Some("5d8f7c9b6"))),
            None
        );
    }

    #[test]
    fn only_pending_convergence_is_requeued() {
        let config = Config::default();

        assert_eq!(
            action_for(&outcome(Phase::Creating, true), &config),
            Action::requeue(config.requeue_after)
        );
        assert_eq!(
            action_for(&outcome(Phase::Converged, false), &config),
            Action::await_change()
        );
        assert_eq!(
            action_for(&outcome(Phase::Absent, false), &config),
            Action::await_change()
        );
    }

    #[test]
    fn conflicts_retry_sooner() {
        let config = Config::default();

        assert_eq!(
            retry_delay(&Error::ScaleChild(StoreError::Conflict("stale".into())), &config),
            Duration::from_secs(1)
        );
        assert_eq!(
            retry_delay(&Error::ListPods(StoreError::NotFound("pods".into())), &config),
            config.retry_after
        );
    }

    #[test]
    fn events_describe_deployment_changes() {
        let created = event_for(ChildChange::Created, "den").unwrap();
        assert_eq!(created.reason, "Created");
        assert_eq!(created.note.as_deref(), Some("Created deployment `den`"));

        let scaled = event_for(ChildChange::Scaled { from: 3, to: 2 }, "den").unwrap();
        assert_eq!(scaled.reason, "Scaled");
        assert_eq!(
            scaled.note.as_deref(),
            Some("Scaled deployment `den` from 3 to 2 replicas")
        );

        assert!(event_for(ChildChange::Unchanged, "den").is_none());
    }

    #[tokio::test]
    async fn diagnostics_start_with_the_operator_reporter() {
        let state = State::default();

        let diagnostics = state.diagnostics().await;

        assert_eq!(diagnostics.reporter.controller, MANAGER);
    }
}
