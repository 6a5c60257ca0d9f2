//! Converges the Deployment owned by a `PredictApp` and projects its readiness
//! into the record's status.

use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec, ResourceRequirements},
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, Time},
    },
    chrono::{DateTime, Utc},
};
use kube::api::ObjectMeta;

use super::{ReconcilerConfig, owned_metadata, selector_labels};
use crate::{
    crd::{AppPhase, PredictApp},
    error::Error,
    store::{ObjectKey, ObjectStore},
};

pub const CONTAINER_NAME: &str = "predict-app";

/// Ensure the Deployment exists and matches the spec, then write the
/// workload part of the status. Returns the record as stored after the
/// status write.
#[instrument(skip_all, fields(app = %key))]
pub async fn reconcile_deployment<S>(
    store: &S,
    key: &ObjectKey,
    app: &PredictApp,
    config: &ReconcilerConfig,
) -> Result<PredictApp, Error>
where
    S: ObjectStore + ?Sized,
{
    let replicas = config.desired_replicas(&app.spec);

    let observed = match store.get_deployment(key).await? {
        Some(mut dp) => {
            if converge(&mut dp, app, replicas) {
                let dp = store.replace_deployment(&dp).await?;
                info!("deployment updated");
                dp
            } else {
                debug!("deployment already up to date");
                dp
            }
        }
        None => {
            let dp = store.create_deployment(&build(app, replicas)?).await?;
            info!("deployment created");
            dp
        }
    };

    let mut app = app.clone();
    project_status(&mut app, &observed, replicas, Utc::now());
    let app = store.replace_app_status(&app).await?;
    debug!(
        ready = app.status.as_ref().map(|s| s.ready_replicas),
        "workload status updated"
    );
    Ok(app)
}

/// Desired Deployment for a record that has none yet.
pub fn build(app: &PredictApp, replicas: i32) -> Result<Deployment, Error> {
    let labels = selector_labels(app);

    let mut container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(app.spec.app_image.clone()),
        ports: Some(vec![ContainerPort {
            container_port: app.spec.container_port,
            ..Default::default()
        }]),
        ..Default::default()
    };
    // no declared resources means no limits, not zero limits
    if !app.spec.resources_empty() {
        container.resources = app.spec.resources.clone();
    }

    Ok(Deployment {
        metadata: owned_metadata(app)?,
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Bring the convergeable fields of `dp` in line with the spec.
/// Returns whether anything was changed.
pub fn converge(dp: &mut Deployment, app: &PredictApp, replicas: i32) -> bool {
    let mut changed = false;
    let spec = dp.spec.get_or_insert_with(Default::default);

    if spec.replicas != Some(replicas) {
        spec.replicas = Some(replicas);
        changed = true;
    }

    let pod = spec.template.spec.get_or_insert_with(Default::default);
    if pod.containers.is_empty() {
        pod.containers.push(Container {
            name: CONTAINER_NAME.to_string(),
            ..Default::default()
        });
        changed = true;
    }
    let container = &mut pod.containers[0];

    if container.image.as_deref() != Some(app.spec.app_image.as_str()) {
        container.image = Some(app.spec.app_image.clone());
        changed = true;
    }

    let ports = container.ports.get_or_insert_with(Vec::new);
    match ports.first_mut() {
        Some(port) if port.container_port == app.spec.container_port => {}
        Some(port) => {
            port.container_port = app.spec.container_port;
            changed = true;
        }
        None => {
            ports.push(ContainerPort {
                container_port: app.spec.container_port,
                ..Default::default()
            });
            changed = true;
        }
    }

    if let Some(wanted) = app.spec.resources.as_ref().filter(|_| !app.spec.resources_empty()) {
        if !resources_match(wanted, container.resources.as_ref()) {
            container.resources = Some(wanted.clone());
            changed = true;
        }
    }

    changed
}

/// The API server rewrites quantities in canonical form ("0.5" comes back
/// as "500m"), so limits and requests are compared by value.
fn resources_match(
    wanted: &ResourceRequirements,
    observed: Option<&ResourceRequirements>,
) -> bool {
    let none = ResourceRequirements::default();
    let observed = observed.unwrap_or(&none);
    quantities_match(wanted.limits.as_ref(), observed.limits.as_ref())
        && quantities_match(wanted.requests.as_ref(), observed.requests.as_ref())
}

fn quantities_match(
    wanted: Option<&BTreeMap<String, Quantity>>,
    observed: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let none = BTreeMap::new();
    let wanted = wanted.unwrap_or(&none);
    let observed = observed.unwrap_or(&none);
    wanted.len() == observed.len()
        && wanted
            .iter()
            .all(|(name, q)| observed.get(name).is_some_and(|seen| same_quantity(q, seen)))
}

fn same_quantity(a: &Quantity, b: &Quantity) -> bool {
    match (quantity_value(&a.0), quantity_value(&b.0)) {
        (Some(x), Some(y)) => (x - y).abs() <= 1e-9 * x.abs().max(y.abs()),
        _ => a == b,
    }
}

/// Numeric value of a quantity string, e.g. "500m" is 0.5 and "1Ki" is 1024.
fn quantity_value(qty: &str) -> Option<f64> {
    const BINARY: [(&str, f64); 6] = [
        ("Ki", 1024.0),
        ("Mi", 1_048_576.0),
        ("Gi", 1_073_741_824.0),
        ("Ti", 1_099_511_627_776.0),
        ("Pi", 1_125_899_906_842_624.0),
        ("Ei", 1_152_921_504_606_846_976.0),
    ];
    const DECIMAL: [(char, f64); 9] = [
        ('n', 1e-9),
        ('u', 1e-6),
        ('m', 1e-3),
        ('k', 1e3),
        ('M', 1e6),
        ('G', 1e9),
        ('T', 1e12),
        ('P', 1e15),
        ('E', 1e18),
    ];

    let qty = qty.trim();
    if let Some((number, scale)) = BINARY
        .iter()
        .find_map(|(suffix, scale)| qty.strip_suffix(suffix).map(|n| (n, *scale)))
    {
        return number.parse::<f64>().ok().map(|n| n * scale);
    }
    if let Some((number, scale)) = DECIMAL
        .iter()
        .find_map(|(suffix, scale)| qty.strip_suffix(*suffix).map(|n| (n, *scale)))
    {
        return number.parse::<f64>().ok().map(|n| n * scale);
    }
    // plain numbers, including exponent forms like "1e3"
    qty.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Copy observed readiness into the record status and refresh the timestamp.
pub fn project_status(
    app: &mut PredictApp,
    observed: &Deployment,
    replicas: i32,
    now: DateTime<Utc>,
) {
    let ready = observed
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);

    let status = app.status.get_or_insert_with(Default::default);
    status.ready_replicas = ready;
    status.phase = Some(if ready == replicas {
        AppPhase::Running
    } else {
        AppPhase::Pending
    });

    // never move the timestamp backwards, even if the clock does
    let stamp = match &status.last_update_time {
        Some(Time(prev)) if *prev > now => *prev,
        _ => now,
    };
    status.last_update_time = Some(Time(stamp));
}
