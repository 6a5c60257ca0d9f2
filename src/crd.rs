use std::fmt;

use k8s_openapi::{
    api::core::v1::ResourceRequirements, apimachinery::pkg::apis::meta::v1::Time,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    kind = "PredictApp",
    group = "apps.predictor.dev",
    version = "v1",
    namespaced,
    shortname = "pa",
    status = "PredictAppStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.serviceEndpoint"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PredictAppSpec {
    pub app_image: String,
    pub container_port: i32,

    /// Filled in by the admission defaulter when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Zero means unset.
    #[serde(default)]
    pub service_port: i32,

    /// An empty string counts as unset.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<String>")]
    pub service_type: Option<ServiceType>,
}

impl PredictAppSpec {
    /// True when neither limits nor requests are declared.
    pub fn resources_empty(&self) -> bool {
        resources_empty(self.resources.as_ref())
    }
}

fn resources_empty(resources: Option<&ResourceRequirements>) -> bool {
    match resources {
        None => true,
        Some(r) => {
            r.limits.as_ref().is_none_or(|l| l.is_empty())
                && r.requests.as_ref().is_none_or(|l| l.is_empty())
        }
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<ServiceType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(ServiceType::from))
}

/// How the Service fronting the workload is exposed.
///
/// Any string is accepted on the wire; names outside the Kubernetes set end
/// up in `Other` and are turned away by admission.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum ServiceType {
    ClusterIp,
    NodePort,
    LoadBalancer,
    ExternalName,
    Other(String),
}

impl ServiceType {
    pub fn as_str(&self) -> &str {
        match self {
            ServiceType::ClusterIp => "ClusterIP",
            ServiceType::NodePort => "NodePort",
            ServiceType::LoadBalancer => "LoadBalancer",
            ServiceType::ExternalName => "ExternalName",
            ServiceType::Other(name) => name,
        }
    }
}

impl From<&str> for ServiceType {
    fn from(s: &str) -> Self {
        match s {
            "ClusterIP" => ServiceType::ClusterIp,
            "NodePort" => ServiceType::NodePort,
            "LoadBalancer" => ServiceType::LoadBalancer,
            "ExternalName" => ServiceType::ExternalName,
            other => ServiceType::Other(other.to_string()),
        }
    }
}

impl From<String> for ServiceType {
    fn from(s: String) -> Self {
        ServiceType::from(s.as_str())
    }
}

impl From<ServiceType> for String {
    fn from(t: ServiceType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum AppPhase {
    #[default]
    Pending,
    Running,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PredictAppStatus {
    #[serde(default)]
    pub ready_replicas: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<AppPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<Time>,
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    use super::*;

    #[test]
    fn service_type_uses_kubernetes_names() {
        let json = serde_json::to_string(&ServiceType::ClusterIp).unwrap();
        assert_eq!(json, "\"ClusterIP\"");
        assert_eq!(ServiceType::from("NodePort"), ServiceType::NodePort);
        assert_eq!(
            ServiceType::from("clusterip"),
            ServiceType::Other("clusterip".to_string())
        );
        assert_eq!(ServiceType::LoadBalancer.to_string(), "LoadBalancer");
    }

    #[test]
    fn empty_resources_detection() {
        let mut spec = PredictAppSpec::default();
        assert!(spec.resources_empty());

        spec.resources = Some(ResourceRequirements::default());
        assert!(spec.resources_empty());

        spec.resources = Some(ResourceRequirements {
            limits: Some(BTreeMap::new()),
            ..Default::default()
        });
        assert!(spec.resources_empty());

        spec.resources = Some(ResourceRequirements {
            requests: Some(BTreeMap::from([(
                "cpu".to_string(),
                Quantity("50m".to_string()),
            )])),
            ..Default::default()
        });
        assert!(!spec.resources_empty());
    }
}
