use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::{
    Api, Resource, ResourceExt,
    api::{ListParams, ObjectMeta},
    client::Client,
    runtime::{Controller, WatchStreamExt, controller::Action, reflector, watcher},
};
use tokio_stream::StreamExt;

use crate::{
    crd::{AppPhase, PredictApp, PredictAppSpec, ServiceType},
    error::Error,
    filter,
    store::{KubeStore, ObjectKey, ObjectStore},
    webhook::Defaulter,
};

pub mod deployment;
pub mod service;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGER_NAME: &str = "predict-app-operator";

static CYCLES: AtomicU64 = AtomicU64::new(0);

/// Number of reconciliation cycles started by this process. Advisory only.
pub fn cycles_executed() -> u64 {
    CYCLES.load(Ordering::Relaxed)
}

#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Fixed delay before retrying a failed cycle.
    pub requeue_interval: Duration,
    /// Pause at the start of each cycle so logs of simultaneous cycles
    /// don't interleave. Zero disables it.
    pub start_delay: Duration,
    pub cluster_domain: String,
    /// Fallbacks for records that never went through admission.
    pub defaults: Defaulter,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            requeue_interval: Duration::from_secs(60),
            start_delay: Duration::from_millis(100),
            cluster_domain: "svc.cluster.local".to_string(),
            defaults: Defaulter::default(),
        }
    }
}

impl ReconcilerConfig {
    pub fn desired_replicas(&self, spec: &PredictAppSpec) -> i32 {
        spec.replicas.unwrap_or(self.defaults.default_replicas)
    }

    pub fn desired_service_port(&self, spec: &PredictAppSpec) -> i32 {
        if spec.service_port == 0 {
            self.defaults.default_service_port
        } else {
            spec.service_port
        }
    }

    pub fn desired_service_type(&self, spec: &PredictAppSpec) -> ServiceType {
        spec.service_type
            .clone()
            .unwrap_or_else(|| self.defaults.default_service_type.clone())
    }
}

#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub store: Arc<dyn ObjectStore>,
    pub config: ReconcilerConfig,
}

impl Context {
    pub fn new(client: Client, config: ReconcilerConfig) -> Self {
        Self {
            store: Arc::new(KubeStore::new(client.clone())),
            client,
            config,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// The record is gone; its owned resources are removed by cascade delete.
    Deleted,
    Converged(Box<PredictApp>),
}

/// One reconciliation cycle for the record identified by `key`.
///
/// Safe to call repeatedly for the same key: every step only writes when the
/// observed state differs from the desired state (the workload status write
/// being the exception). The caller must not run two cycles for the same key
/// at once.
#[instrument(skip_all, fields(app = %key))]
pub async fn reconcile_app<S>(
    store: &S,
    key: &ObjectKey,
    config: &ReconcilerConfig,
) -> Result<Outcome, Error>
where
    S: ObjectStore + ?Sized,
{
    if !config.start_delay.is_zero() {
        tokio::time::sleep(config.start_delay).await;
    }

    let cycle = CYCLES.fetch_add(1, Ordering::Relaxed) + 1;
    info!(cycle, "start PredictApp reconcile");

    let Some(app) = store.get_app(key).await? else {
        info!("PredictApp not found, nothing to reconcile");
        return Ok(Outcome::Deleted);
    };

    let app = deployment::reconcile_deployment(store, key, &app, config).await?;
    let app = service::reconcile_service(store, key, &app, config).await?;

    info!(cycle, "all resources have been reconciled");
    Ok(Outcome::Converged(Box::new(app)))
}

/// What the controller does after a successful cycle.
///
/// Readiness and endpoint allocation only show up in owned objects' status,
/// which never triggers a cycle, so a record that hasn't settled is polled.
pub fn next_action(outcome: &Outcome, config: &ReconcilerConfig) -> Action {
    let Outcome::Converged(app) = outcome else {
        return Action::await_change();
    };
    let status = app.status.clone().unwrap_or_default();
    let has_endpoint = matches!(
        config.desired_service_type(&app.spec),
        ServiceType::ClusterIp | ServiceType::NodePort
    );

    if status.phase != Some(AppPhase::Running)
        || (has_endpoint && status.service_endpoint.is_none())
    {
        Action::requeue(config.requeue_interval)
    } else {
        Action::await_change()
    }
}

#[instrument(skip_all)]
async fn reconcile(app: Arc<PredictApp>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = ObjectKey::of(app.as_ref())?;
    let outcome = reconcile_app(ctx.store.as_ref(), &key, &ctx.config).await?;
    Ok(next_action(&outcome, &ctx.config))
}

#[instrument(skip_all)]
fn error_policy(app: Arc<PredictApp>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        name = app.name_any(),
        namespace = app.namespace(),
        "error occurred on reconcile loop, will requeue"
    );
    Action::requeue(ctx.config.requeue_interval)
}

#[instrument(skip_all)]
pub async fn run(ctx: Context) -> Result<(), Error> {
    let apps = Api::<PredictApp>::all(ctx.client.clone());
    let deployments = Api::<Deployment>::all(ctx.client.clone());
    let services = Api::<Service>::all(ctx.client.clone());

    info!("checking if CRDs are installed");
    let _ = apps.list(&ListParams::default().limit(1)).await?;
    info!("confirmed that CRDs are installed");

    let owned = watcher::Config::default().labels(&format!("{MANAGED_BY_LABEL}={MANAGER_NAME}"));

    let (reader, writer) = reflector::store();
    let app_triggers = filter::triggers(
        watcher(apps, watcher::Config::default().any_semantic())
            .default_backoff()
            .reflect(writer),
    );
    let deployment_triggers =
        filter::triggers(watcher(deployments, owned.clone()).default_backoff());
    let service_triggers = filter::triggers(watcher(services, owned).default_backoff());

    let stream = Controller::for_stream(app_triggers, reader)
        .owns_stream(deployment_triggers)
        .owns_stream(service_triggers)
        .shutdown_on_signal()
        .run(reconcile, error_policy, Arc::new(ctx));
    let mut stream = std::pin::pin!(stream);

    info!("starting up controller loop process");
    while let Some(res) = stream.next().await {
        match res {
            Ok((obj, _)) => debug!(object = %obj, "reconciled"),
            Err(e) => error!(error = ?e, "error occurred on controller loop"),
        }
    }

    info!("controller has been terminated");

    Ok(())
}

/// Selector shared by the Deployment's pods and the Service.
pub fn selector_labels(app: &PredictApp) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app.name_any())])
}

/// Metadata for a resource owned by `app`: same name and namespace, the
/// owner's labels plus the managed-by label, and a controller reference.
pub fn owned_metadata(app: &PredictApp) -> Result<ObjectMeta, Error> {
    let oref = app
        .controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey("uid"))?;

    let mut labels = app.labels().clone();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGER_NAME.to_string());

    Ok(ObjectMeta {
        name: Some(app.name_any()),
        namespace: Some(app.namespace().ok_or(Error::MissingObjectKey("namespace"))?),
        labels: Some(labels),
        owner_references: Some(vec![oref]),
        ..Default::default()
    })
}
