//! Polling of long-running zone operations.

use std::time::Duration;

use tracing::debug;

use crate::client::CloudDiskApi;
use crate::error::{CloudError, CloudResult};
use crate::types::{Operation, OperationStatus};

/// Interval between operation polls.
pub const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Poll `operation` every `interval` until it is `DONE`.
///
/// An error payload on the finished operation is returned as
/// [`CloudError::OperationFailed`].
pub async fn wait_for_operation(
    api: &dyn CloudDiskApi,
    operation: &str,
    interval: Duration,
) -> CloudResult<Operation> {
    loop {
        let result = api.get_operation(operation).await?;

        if result.status == OperationStatus::Done {
            if let Some(err) = &result.error {
                return Err(CloudError::OperationFailed {
                    operation: operation.to_string(),
                    error: err.to_string(),
                });
            }
            debug!(%operation, "operation done");
            return Ok(result);
        }

        debug!(%operation, status = ?result.status, "operation still running");
        tokio::time::sleep(interval).await;
    }
}
