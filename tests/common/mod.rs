//! In-memory object store with resourceVersion conflict checks and cascade
//! delete, standing in for the API server.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::{Deployment, DeploymentStatus},
    core::v1::Service,
};
use kube::ResourceExt;

use predict_app_operator::{
    crd::PredictApp,
    error::Error,
    store::{ObjectKey, ObjectStore},
};

#[derive(Default)]
struct Objects {
    apps: HashMap<ObjectKey, PredictApp>,
    deployments: HashMap<ObjectKey, Deployment>,
    services: HashMap<ObjectKey, Service>,
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<Objects>,
    version: AtomicU64,
    pub owned_writes: AtomicU64,
    pub status_writes: AtomicU64,
}

fn key<K: ResourceExt>(obj: &K) -> ObjectKey {
    ObjectKey::of(obj).expect("object has namespace and name")
}

fn check_version<K: ResourceExt>(stored: &K, incoming: &K) -> Result<(), Error> {
    if stored.resource_version() != incoming.resource_version() {
        return Err(Error::Conflict(format!("{}", key(incoming))));
    }
    Ok(())
}

impl MemoryStore {
    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Persist a record as the API server would after admission.
    pub fn put_app(&self, mut app: PredictApp) -> PredictApp {
        let k = key(&app);
        let mut objects = self.objects.lock().unwrap();
        if app.metadata.uid.is_none() {
            app.metadata.uid = Some(format!("uid-{}", k.name));
        }
        if let Some(stored) = objects.apps.get(&k) {
            app.status = stored.status.clone();
        }
        app.metadata.resource_version = Some(self.next_version());
        objects.apps.insert(k, app.clone());
        app
    }

    pub fn app(&self, k: &ObjectKey) -> Option<PredictApp> {
        self.objects.lock().unwrap().apps.get(k).cloned()
    }

    pub fn deployment(&self, k: &ObjectKey) -> Option<Deployment> {
        self.objects.lock().unwrap().deployments.get(k).cloned()
    }

    pub fn service(&self, k: &ObjectKey) -> Option<Service> {
        self.objects.lock().unwrap().services.get(k).cloned()
    }

    /// Deleting the owner removes everything it owns.
    pub fn delete_app(&self, k: &ObjectKey) {
        let mut objects = self.objects.lock().unwrap();
        objects.apps.remove(k);
        objects.deployments.remove(k);
        objects.services.remove(k);
    }

    pub fn delete_deployment(&self, k: &ObjectKey) -> Option<Deployment> {
        self.objects.lock().unwrap().deployments.remove(k)
    }

    /// Simulate the deployment controller reporting readiness.
    pub fn set_ready_replicas(&self, k: &ObjectKey, ready: i32) {
        let version = self.next_version();
        let mut objects = self.objects.lock().unwrap();
        let dp = objects.deployments.get_mut(k).expect("deployment exists");
        dp.status = Some(DeploymentStatus {
            ready_replicas: Some(ready),
            ..Default::default()
        });
        dp.metadata.resource_version = Some(version);
    }

    /// Simulate an external edit of the stored Deployment.
    pub fn edit_deployment(&self, k: &ObjectKey, edit: impl FnOnce(&mut Deployment)) {
        let version = self.next_version();
        let mut objects = self.objects.lock().unwrap();
        let dp = objects.deployments.get_mut(k).expect("deployment exists");
        edit(dp);
        dp.metadata.resource_version = Some(version);
    }

    pub fn edit_service(&self, k: &ObjectKey, edit: impl FnOnce(&mut Service)) {
        let version = self.next_version();
        let mut objects = self.objects.lock().unwrap();
        let svc = objects.services.get_mut(k).expect("service exists");
        edit(svc);
        svc.metadata.resource_version = Some(version);
    }

    pub fn owned_writes(&self) -> u64 {
        self.owned_writes.load(Ordering::SeqCst)
    }

    pub fn status_writes(&self) -> u64 {
        self.status_writes.load(Ordering::SeqCst)
    }

    fn allocate_service_fields(&self, svc: &mut Service) {
        let spec = svc.spec.get_or_insert_with(Default::default);
        if spec.cluster_ip.is_none() {
            spec.cluster_ip = Some("10.96.0.10".to_string());
        }
        if spec.type_.as_deref() == Some("NodePort") {
            for port in spec.ports.iter_mut().flatten() {
                if port.node_port.is_none() {
                    port.node_port = Some(31080);
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_app(&self, k: &ObjectKey) -> Result<Option<PredictApp>, Error> {
        Ok(self.app(k))
    }

    async fn replace_app_status(&self, app: &PredictApp) -> Result<PredictApp, Error> {
        let k = key(app);
        let version = self.next_version();
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .apps
            .get_mut(&k)
            .ok_or_else(|| Error::Conflict(k.to_string()))?;
        check_version(stored, app)?;
        stored.status = app.status.clone();
        stored.metadata.resource_version = Some(version);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }

    async fn get_deployment(&self, k: &ObjectKey) -> Result<Option<Deployment>, Error> {
        Ok(self.deployment(k))
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error> {
        let k = key(deployment);
        let mut created = deployment.clone();
        created.metadata.resource_version = Some(self.next_version());
        let mut objects = self.objects.lock().unwrap();
        if objects.deployments.contains_key(&k) {
            return Err(Error::Conflict(k.to_string()));
        }
        objects.deployments.insert(k, created.clone());
        self.owned_writes.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error> {
        let k = key(deployment);
        let version = self.next_version();
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .deployments
            .get_mut(&k)
            .ok_or_else(|| Error::Conflict(k.to_string()))?;
        check_version(stored, deployment)?;
        stored.spec = deployment.spec.clone();
        stored.metadata.resource_version = Some(version);
        self.owned_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }

    async fn get_service(&self, k: &ObjectKey) -> Result<Option<Service>, Error> {
        Ok(self.service(k))
    }

    async fn create_service(&self, service: &Service) -> Result<Service, Error> {
        let k = key(service);
        let mut created = service.clone();
        self.allocate_service_fields(&mut created);
        created.metadata.resource_version = Some(self.next_version());
        let mut objects = self.objects.lock().unwrap();
        if objects.services.contains_key(&k) {
            return Err(Error::Conflict(k.to_string()));
        }
        objects.services.insert(k, created.clone());
        self.owned_writes.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn replace_service(&self, service: &Service) -> Result<Service, Error> {
        let k = key(service);
        let mut updated = service.clone();
        self.allocate_service_fields(&mut updated);
        let version = self.next_version();
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .services
            .get_mut(&k)
            .ok_or_else(|| Error::Conflict(k.to_string()))?;
        check_version(stored, service)?;
        stored.spec = updated.spec;
        stored.metadata.resource_version = Some(version);
        self.owned_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }
}
