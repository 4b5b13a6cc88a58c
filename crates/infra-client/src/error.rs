//! Object-store client errors

use thiserror::Error;

/// Errors that can occur when talking to the Kubernetes API
#[derive(Debug, Error)]
pub enum InfraError {
    /// Kubernetes API or transport error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Conditional write lost against a concurrent writer (HTTP 409 on update)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Create of an object that already exists (HTTP 409 on create)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Request rejected before reaching the API (e.g. object without a name)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl InfraError {
    /// Whether the error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Maps an API error from an update or patch
    pub(crate) fn from_write(err: kube::Error, what: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict(format!("{}: {}", what, ae.message)),
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound(what.to_string()),
            other => Self::Kube(other),
        }
    }

    /// Maps an API error from a create
    pub(crate) fn from_create(err: kube::Error, what: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 => Self::AlreadyExists(what.to_string()),
            other => Self::Kube(other),
        }
    }
}
