//! The cloud disk seam.

use async_trait::async_trait;

use crate::error::CloudResult;
use crate::types::{Disk, DiskInsert, Operation, SnapshotPage};

/// Block-storage operations on the cloud provider, scoped to one
/// project and zone.
#[async_trait]
pub trait CloudDiskApi: Send + Sync {
    /// Look up a disk by name.
    async fn get_disk(&self, name: &str) -> CloudResult<Disk>;

    /// One page of snapshots matching `filter`.
    async fn list_snapshots_page(
        &self,
        filter: &str,
        page_token: Option<&str>,
    ) -> CloudResult<SnapshotPage>;

    /// Start creating a disk from a snapshot.
    async fn insert_disk(&self, disk: &DiskInsert) -> CloudResult<Operation>;

    /// Start deleting a disk.
    async fn delete_disk(&self, name: &str) -> CloudResult<Operation>;

    /// Fetch the current state of a zone operation.
    async fn get_operation(&self, name: &str) -> CloudResult<Operation>;
}
