use crate::webhook::ValidationError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Conflict: {0} was modified concurrently")]
    Conflict(String),

    #[error("object has no {0}")]
    MissingObjectKey(&'static str),

    #[error("Validation Error: {0}")]
    Validation(#[from] ValidationError),
}

impl Error {
    /// Reconcile failures are retried with the fixed requeue interval;
    /// only admission rejections are final.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Validation(_))
    }

    pub(crate) fn from_kube(err: kube::Error, what: impl Into<String>) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 409 => Error::Conflict(what.into()),
            other => Error::KubeError(other),
        }
    }
}
