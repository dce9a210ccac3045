//! Production `ClusterApi` backed by the kube crate.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Service};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Config};
use tracing::{debug, instrument};

use crate::client::ClusterApi;
use crate::error::{ClusterError, ClusterResult};

/// Address of a local `kubectl proxy`, used when not running in-cluster.
pub const LOCAL_PROXY_URL: &str = "http://127.0.0.1:8001";

const PVC: &str = "PersistentVolumeClaim";
const PV: &str = "PersistentVolume";
const DEPLOYMENT: &str = "Deployment";
const SERVICE: &str = "Service";

/// Kubernetes-backed cluster client.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Wrap an existing kube client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Use the pod's service account credentials.
    pub fn in_cluster() -> ClusterResult<Self> {
        let config = Config::incluster().map_err(|e| ClusterError::Config(e.to_string()))?;
        let client = Client::try_from(config).map_err(|e| ClusterError::Config(e.to_string()))?;
        debug!("in-cluster kube client initialized");
        Ok(Self { client })
    }

    /// Talk to a `kubectl proxy` on localhost (no credentials).
    pub fn local_proxy() -> ClusterResult<Self> {
        let url: http::Uri = LOCAL_PROXY_URL
            .parse()
            .map_err(|e: http::uri::InvalidUri| ClusterError::Config(e.to_string()))?;
        let client = Client::try_from(Config::new(url))
            .map_err(|e| ClusterError::Config(e.to_string()))?;
        debug!(url = LOCAL_PROXY_URL, "local proxy kube client initialized");
        Ok(Self { client })
    }

    fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn volumes(&self) -> Api<PersistentVolume> {
        Api::all(self.client.clone())
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    #[instrument(skip(self))]
    async fn read_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<PersistentVolumeClaim> {
        self.claims(namespace)
            .get(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, PVC, name))
    }

    #[instrument(skip(self))]
    async fn read_persistent_volume(&self, name: &str) -> ClusterResult<PersistentVolume> {
        self.volumes()
            .get(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, PV, name))
    }

    #[instrument(skip(self, volume))]
    async fn create_persistent_volume(
        &self,
        volume: PersistentVolume,
    ) -> ClusterResult<PersistentVolume> {
        let name = volume.metadata.name.clone().unwrap_or_default();
        self.volumes()
            .create(&PostParams::default(), &volume)
            .await
            .map_err(|e| ClusterError::from_kube(e, PV, &name))
    }

    #[instrument(skip(self))]
    async fn delete_persistent_volume(&self, name: &str) -> ClusterResult<()> {
        self.volumes()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| ClusterError::from_kube(e, PV, name))
    }

    #[instrument(skip(self, claim))]
    async fn create_persistent_volume_claim(
        &self,
        namespace: &str,
        claim: PersistentVolumeClaim,
    ) -> ClusterResult<PersistentVolumeClaim> {
        let name = claim.metadata.name.clone().unwrap_or_default();
        self.claims(namespace)
            .create(&PostParams::default(), &claim)
            .await
            .map_err(|e| ClusterError::from_kube(e, PVC, &name))
    }

    #[instrument(skip(self))]
    async fn delete_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<()> {
        self.claims(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| ClusterError::from_kube(e, PVC, name))
    }

    #[instrument(skip(self))]
    async fn read_deployment(&self, namespace: &str, name: &str) -> ClusterResult<Deployment> {
        self.deployments(namespace)
            .get(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, DEPLOYMENT, name))
    }

    #[instrument(skip(self, patch))]
    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> ClusterResult<Deployment> {
        self.deployments(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ClusterError::from_kube(e, DEPLOYMENT, name))
    }

    #[instrument(skip(self))]
    async fn read_service(&self, namespace: &str, name: &str) -> ClusterResult<Service> {
        self.services(namespace)
            .get(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, SERVICE, name))
    }

    #[instrument(skip(self, patch))]
    async fn patch_service(
        &self,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> ClusterResult<Service> {
        self.services(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ClusterError::from_kube(e, SERVICE, name))
    }
}
