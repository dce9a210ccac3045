//! Starter error types.

use std::time::Duration;

use thiserror::Error;

use dbstarter_cloud::CloudError;
use dbstarter_cluster::ClusterError;
use dbstarter_watch::WatchError;

pub type StarterResult<T> = Result<T, StarterError>;

/// Coarse classification of a starter failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The source disk has no snapshot to clone from.
    NoSnapshotAvailable,
    /// A cluster or cloud object does not exist.
    NotFound,
    /// Any other remote failure (network, auth, quota, conflict, timeout).
    RemoteOperationFailed,
    /// The clone never became reachable.
    TargetUnavailable,
}

#[derive(Debug, Error)]
pub enum StarterError {
    #[error("no snapshot available for disk {disk}")]
    NoSnapshotAvailable { disk: String },

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("{kind} {name} has no {field}")]
    InvalidResource {
        kind: &'static str,
        name: String,
        field: &'static str,
    },

    #[error("disk {disk} exists but is {status}")]
    DiskBusy { disk: String, status: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl StarterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StarterError::NoSnapshotAvailable { .. } => ErrorKind::NoSnapshotAvailable,
            StarterError::Cluster(e) if e.is_not_found() => ErrorKind::NotFound,
            StarterError::Cloud(e) if e.is_not_found() => ErrorKind::NotFound,
            StarterError::Watch(WatchError::TargetUnavailable { .. }) => {
                ErrorKind::TargetUnavailable
            }
            StarterError::Cluster(_)
            | StarterError::Cloud(_)
            | StarterError::InvalidResource { .. }
            | StarterError::DiskBusy { .. }
            | StarterError::Timeout { .. } => ErrorKind::RemoteOperationFailed,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
