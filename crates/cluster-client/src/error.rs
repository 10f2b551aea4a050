//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the Kubernetes API server
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create rejected because an object with the same name exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency check failed (stale resourceVersion)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Object rejected by the API server or missing required metadata
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// API server unreachable or failing
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other Kubernetes client error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl ClusterError {
    /// Classifies a kube error by HTTP status and reason.
    ///
    /// `what` names the object the request was about and ends up in the message.
    pub fn from_kube(err: kube::Error, what: &str) -> Self {
        match err {
            kube::Error::Api(ae) => match (ae.code, ae.reason.as_str()) {
                (404, _) => Self::NotFound(format!("{what}: {}", ae.message)),
                (409, "AlreadyExists") => Self::AlreadyExists(format!("{what}: {}", ae.message)),
                (409, _) => Self::Conflict(format!("{what}: {}", ae.message)),
                (400 | 422, _) => Self::InvalidObject(format!("{what}: {}", ae.message)),
                (code, _) if code >= 500 => Self::Unavailable(format!("{what}: {}", ae.message)),
                _ => Self::Kube(kube::Error::Api(ae)),
            },
            other => Self::Kube(other),
        }
    }

    /// True when the object the request targeted does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True when a create lost the race against an existing object.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}
