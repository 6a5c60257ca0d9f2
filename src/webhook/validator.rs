use crate::crd::{PredictAppSpec, ServiceType};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("replicas must be set")]
    MissingReplicas,

    #[error("replicas can't be < {min}, got {got}")]
    TooFewReplicas { min: i32, got: i32 },

    #[error("replicas can't be > {max}, got {got}")]
    TooManyReplicas { max: i32, got: i32 },

    #[error("servicePort {got} is illegal, need to be < {max}")]
    ServicePortOutOfRange { max: i32, got: i32 },

    #[error("serviceType is unsupported, should be in {allowed}")]
    UnsupportedServiceType { allowed: String },
}

/// Admission checks run after defaulting. Never mutates the spec.
#[derive(Clone, Debug)]
pub struct Validator {
    pub min_replicas: i32,
    pub max_replicas: i32,
    /// Exclusive upper bound for `servicePort`.
    pub max_port: i32,
    pub allowed_service_types: Vec<ServiceType>,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 10,
            max_port: 30000,
            allowed_service_types: vec![ServiceType::ClusterIp, ServiceType::NodePort],
        }
    }
}

impl Validator {
    pub fn validate(&self, spec: &PredictAppSpec) -> Result<(), ValidationError> {
        let replicas = spec.replicas.ok_or(ValidationError::MissingReplicas)?;
        if replicas < self.min_replicas {
            return Err(ValidationError::TooFewReplicas {
                min: self.min_replicas,
                got: replicas,
            });
        }
        if replicas > self.max_replicas {
            return Err(ValidationError::TooManyReplicas {
                max: self.max_replicas,
                got: replicas,
            });
        }

        if spec.service_port >= self.max_port {
            return Err(ValidationError::ServicePortOutOfRange {
                max: self.max_port,
                got: spec.service_port,
            });
        }

        match &spec.service_type {
            Some(t) if self.allowed_service_types.contains(t) => Ok(()),
            _ => Err(ValidationError::UnsupportedServiceType {
                allowed: self.allowed_list(),
            }),
        }
    }

    fn allowed_list(&self) -> String {
        let names: Vec<&str> = self
            .allowed_service_types
            .iter()
            .map(ServiceType::as_str)
            .collect();
        format!("{{{}}}", names.join("/"))
    }
}
