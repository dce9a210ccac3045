//! Error types for cluster resource operations.

use thiserror::Error;

/// Result type alias for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors that can occur while talking to the cluster API.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("cluster API error on {kind} {name}: {message}")]
    Api {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("cluster client configuration error: {0}")]
    Config(String),
}

impl ClusterError {
    /// Classify a kube error for the given resource.
    pub fn from_kube(err: kube::Error, kind: &'static str, name: &str) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => ClusterError::NotFound {
                kind,
                name: name.to_string(),
            },
            kube::Error::Api(ref resp) if resp.code == 409 => ClusterError::AlreadyExists {
                kind,
                name: name.to_string(),
            },
            other => ClusterError::Api {
                kind,
                name: name.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Whether this error means the addressed object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}
