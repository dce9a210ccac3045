//! Cloud API error types.

use thiserror::Error;

/// Result type alias for cloud operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors returned by the cloud disk API.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("cloud resource not found: {resource}")]
    NotFound { resource: String },

    #[error("cloud resource already exists: {resource}")]
    AlreadyExists { resource: String },

    #[error("cloud API returned {status} for {resource}: {message}")]
    Api {
        status: u16,
        resource: String,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("operation {operation} failed: {error}")]
    OperationFailed { operation: String, error: String },
}

impl CloudError {
    /// Classify a non-2xx response.
    pub fn from_status(status: u16, resource: &str, message: String) -> Self {
        match status {
            404 => CloudError::NotFound {
                resource: resource.to_string(),
            },
            409 => CloudError::AlreadyExists {
                resource: resource.to_string(),
            },
            _ => CloudError::Api {
                status,
                resource: resource.to_string(),
                message,
            },
        }
    }

    /// Whether this error means the addressed resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }
}
