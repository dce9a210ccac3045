//! The cluster resource seam.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Service};

use crate::error::ClusterResult;

/// Cluster resource operations needed to provision and release a clone.
///
/// Mirrors the synchronous read/patch/create/delete surface of the
/// orchestrator. Patches are JSON merge patches built with
/// [`crate::resources`].
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Read a volume claim.
    async fn read_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<PersistentVolumeClaim>;

    /// Read a cluster-scoped persistent volume.
    async fn read_persistent_volume(&self, name: &str) -> ClusterResult<PersistentVolume>;

    /// Create a cluster-scoped persistent volume.
    async fn create_persistent_volume(&self, volume: PersistentVolume)
        -> ClusterResult<PersistentVolume>;

    /// Delete a cluster-scoped persistent volume.
    async fn delete_persistent_volume(&self, name: &str) -> ClusterResult<()>;

    /// Create a volume claim in `namespace`.
    async fn create_persistent_volume_claim(
        &self,
        namespace: &str,
        claim: PersistentVolumeClaim,
    ) -> ClusterResult<PersistentVolumeClaim>;

    /// Delete a volume claim. Missing claims surface as `NotFound`.
    async fn delete_persistent_volume_claim(&self, namespace: &str, name: &str)
        -> ClusterResult<()>;

    /// Read a deployment.
    async fn read_deployment(&self, namespace: &str, name: &str) -> ClusterResult<Deployment>;

    /// Apply a merge patch to a deployment.
    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> ClusterResult<Deployment>;

    /// Read a service.
    async fn read_service(&self, namespace: &str, name: &str) -> ClusterResult<Service>;

    /// Apply a merge patch to a service.
    async fn patch_service(
        &self,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> ClusterResult<Service>;
}
