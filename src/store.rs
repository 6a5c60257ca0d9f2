//! Object store seam.
//!
//! Every read and write the reconcilers perform goes through [`ObjectStore`],
//! keyed by namespace and name. Writes carry the `resourceVersion` of the
//! object they were derived from, so a write based on stale state fails with
//! [`Error::Conflict`] instead of overwriting a newer version.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::{Api, ResourceExt, api::PostParams, client::Client};

#[cfg(test)]
use mockall::automock;

use crate::{crd::PredictApp, error::Error};

/// Identity of a record and of the resources derived from it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: ResourceExt>(obj: &K) -> Result<Self, Error> {
        let namespace = obj.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let name = obj
            .meta()
            .name
            .clone()
            .ok_or(Error::MissingObjectKey("name"))?;
        Ok(Self { namespace, name })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_app(&self, key: &ObjectKey) -> Result<Option<PredictApp>, Error>;

    /// Write the status subresource of `app`.
    async fn replace_app_status(&self, app: &PredictApp) -> Result<PredictApp, Error>;

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Option<Deployment>, Error>;

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error>;

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error>;

    async fn get_service(&self, key: &ObjectKey) -> Result<Option<Service>, Error>;

    async fn create_service(&self, service: &Service) -> Result<Service, Error>;

    async fn replace_service(&self, service: &Service) -> Result<Service, Error>;
}

/// [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_app(&self, key: &ObjectKey) -> Result<Option<PredictApp>, Error> {
        Ok(self.api::<PredictApp>(&key.namespace).get_opt(&key.name).await?)
    }

    async fn replace_app_status(&self, app: &PredictApp) -> Result<PredictApp, Error> {
        let key = ObjectKey::of(app)?;
        let data = serde_json::to_vec(app)?;
        self.api::<PredictApp>(&key.namespace)
            .replace_status(&key.name, &PostParams::default(), data)
            .await
            .map_err(|e| Error::from_kube(e, format!("PredictApp {key}")))
    }

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Option<Deployment>, Error> {
        Ok(self.api::<Deployment>(&key.namespace).get_opt(&key.name).await?)
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error> {
        let key = ObjectKey::of(deployment)?;
        self.api::<Deployment>(&key.namespace)
            .create(&PostParams::default(), deployment)
            .await
            .map_err(|e| Error::from_kube(e, format!("Deployment {key}")))
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error> {
        let key = ObjectKey::of(deployment)?;
        self.api::<Deployment>(&key.namespace)
            .replace(&key.name, &PostParams::default(), deployment)
            .await
            .map_err(|e| Error::from_kube(e, format!("Deployment {key}")))
    }

    async fn get_service(&self, key: &ObjectKey) -> Result<Option<Service>, Error> {
        Ok(self.api::<Service>(&key.namespace).get_opt(&key.name).await?)
    }

    async fn create_service(&self, service: &Service) -> Result<Service, Error> {
        let key = ObjectKey::of(service)?;
        self.api::<Service>(&key.namespace)
            .create(&PostParams::default(), service)
            .await
            .map_err(|e| Error::from_kube(e, format!("Service {key}")))
    }

    async fn replace_service(&self, service: &Service) -> Result<Service, Error> {
        let key = ObjectKey::of(service)?;
        self.api::<Service>(&key.namespace)
            .replace(&key.name, &PostParams::default(), service)
            .await
            .map_err(|e| Error::from_kube(e, format!("Service {key}")))
    }
}
