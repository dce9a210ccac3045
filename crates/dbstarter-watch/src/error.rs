//! Watcher error types.

use std::time::Duration;

use thiserror::Error;

pub type WatchResult<T> = Result<T, WatchError>;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("target {target} not available after {waited:?}")]
    TargetUnavailable { target: String, waited: Duration },
}
