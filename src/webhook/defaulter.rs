use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::ResourceRequirements, apimachinery::pkg::api::resource::Quantity,
};

use crate::crd::{PredictAppSpec, ServiceType};

/// Fills in the fields a user may leave out of a `PredictApp`.
///
/// Each field is defaulted on its own and only when it is at its zero value,
/// so running the defaulter over an already defaulted spec changes nothing.
#[derive(Clone, Debug)]
pub struct Defaulter {
    pub default_replicas: i32,
    pub default_service_port: i32,
    pub default_service_type: ServiceType,
    /// Replaces the resources block when neither limits nor requests are set.
    pub min_resources: ResourceRequirements,
}

impl Default for Defaulter {
    fn default() -> Self {
        Self {
            default_replicas: 1,
            default_service_port: 8001,
            default_service_type: ServiceType::ClusterIp,
            min_resources: ResourceRequirements {
                requests: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity("100m".to_string())),
                    ("memory".to_string(), Quantity("128Mi".to_string())),
                ])),
                ..Default::default()
            },
        }
    }
}

impl Defaulter {
    pub fn apply(&self, spec: &mut PredictAppSpec) {
        if spec.replicas.is_none() {
            spec.replicas = Some(self.default_replicas);
        }
        // a partially declared block is the user's choice and is kept as is
        if spec.resources_empty() {
            spec.resources = Some(self.min_resources.clone());
        }
        if spec.service_type.is_none() {
            spec.service_type = Some(self.default_service_type.clone());
        }
        if spec.service_port == 0 {
            spec.service_port = self.default_service_port;
        }
    }
}
