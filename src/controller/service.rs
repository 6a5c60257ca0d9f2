//! Converges the Service owned by a `PredictApp` and derives the endpoint
//! reported in the record's status.

use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::ResourceExt;

use super::{ReconcilerConfig, owned_metadata, selector_labels};
use crate::{
    crd::{PredictApp, ServiceType},
    error::Error,
    store::{ObjectKey, ObjectStore},
};

#[instrument(skip_all, fields(app = %key))]
pub async fn reconcile_service<S>(
    store: &S,
    key: &ObjectKey,
    app: &PredictApp,
    config: &ReconcilerConfig,
) -> Result<PredictApp, Error>
where
    S: ObjectStore + ?Sized,
{
    let observed = match store.get_service(key).await? {
        Some(mut svc) => {
            if converge(&mut svc, app, config) {
                let svc = store.replace_service(&svc).await?;
                info!("service updated");
                svc
            } else {
                debug!("service already up to date");
                svc
            }
        }
        None => {
            let svc = store.create_service(&build(app, config)?).await?;
            info!("service created");
            svc
        }
    };

    let derived = endpoint(&observed, &config.cluster_domain);
    let recorded = app.status.as_ref().and_then(|s| s.service_endpoint.as_ref());
    if derived.as_ref() == recorded {
        return Ok(app.clone());
    }

    info!(endpoint = ?derived, "service endpoint changed");
    let mut app = app.clone();
    app.status.get_or_insert_with(Default::default).service_endpoint = derived;
    store.replace_app_status(&app).await
}

pub fn build(app: &PredictApp, config: &ReconcilerConfig) -> Result<Service, Error> {
    Ok(Service {
        metadata: owned_metadata(app)?,
        spec: Some(ServiceSpec {
            type_: Some(config.desired_service_type(&app.spec).to_string()),
            selector: Some(selector_labels(app)),
            ports: Some(vec![ServicePort {
                port: config.desired_service_port(&app.spec),
                target_port: Some(IntOrString::Int(app.spec.container_port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Bring the Service in line with the spec. Returns whether a write is needed.
pub fn converge(svc: &mut Service, app: &PredictApp, config: &ReconcilerConfig) -> bool {
    let port = config.desired_service_port(&app.spec);
    let service_type = config.desired_service_type(&app.spec);
    let target = IntOrString::Int(app.spec.container_port);

    let mut changed = false;
    let spec = svc.spec.get_or_insert_with(Default::default);
    let ports = spec.ports.get_or_insert_with(Vec::new);
    if ports.is_empty() {
        ports.push(ServicePort {
            port,
            ..Default::default()
        });
        changed = true;
    }
    let first = &mut ports[0];

    // targetPort always mirrors the container port
    if first.target_port.as_ref() != Some(&target) {
        changed = true;
    }
    first.target_port = Some(target);

    if first.port != port {
        first.port = port;
        changed = true;
    }

    if spec.type_.as_deref() != Some(service_type.as_str()) {
        spec.type_ = Some(service_type.to_string());
        if service_type == ServiceType::ClusterIp {
            first.node_port = None;
        }
        changed = true;
    }

    changed
}

/// Endpoint derived from the observed Service, if its type has one.
pub fn endpoint(svc: &Service, cluster_domain: &str) -> Option<String> {
    let spec = svc.spec.as_ref()?;
    let port = spec.ports.as_ref()?.first()?;
    let service_type = ServiceType::from(spec.type_.as_deref().unwrap_or("ClusterIP"));

    match service_type {
        ServiceType::ClusterIp => Some(format!(
            "{}.{}.{}:{}",
            svc.name_any(),
            svc.namespace()?,
            cluster_domain,
            port.port
        )),
        ServiceType::NodePort => {
            let address = spec
                .cluster_ip
                .as_deref()
                .filter(|ip| !ip.is_empty() && *ip != "None")?;
            let node_port = port.node_port?;
            Some(format!("{address}:{node_port}"))
        }
        ServiceType::LoadBalancer | ServiceType::ExternalName | ServiceType::Other(_) => None,
    }
}
