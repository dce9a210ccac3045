//! In-memory fakes of the cluster, cloud, and check seams.
//!
//! Each fake records the calls it receives (as short strings such as
//! `"create_pv db-starter--pv-src"`) and can be told to fail one named
//! operation, so workflow tests can assert on ordering and compensation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    GCEPersistentDiskVolumeSource, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeSpec, Service, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde_json::Value;

use dbstarter_cloud::{
    CloudDiskApi, CloudError, CloudResult, Disk, DiskInsert, Operation, OperationStatus, Snapshot,
    SnapshotPage, source_disk_filter,
};
use dbstarter_cluster::{ClusterApi, ClusterError, ClusterResult};
use dbstarter_watch::{ActivityCheck, CheckResult};

use crate::config::StarterConfig;

/// Name of the source volume in the seeded cluster.
pub const SOURCE_VOLUME: &str = "pv-src";
/// Name of the source disk in the seeded cloud.
pub const SOURCE_DISK: &str = "gke-pd-src";

pub fn source_disk_link(config: &StarterConfig) -> String {
    format!(
        "https://www.googleapis.com/compute/v1/projects/{}/zones/{}/disks/{SOURCE_DISK}",
        config.gcp_project, config.gcp_zone
    )
}

fn labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app.to_string())])
}

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

// ── Cluster ─────────────────────────────────────────────────────

#[derive(Default)]
struct ClusterObjects {
    claims: HashMap<Key, PersistentVolumeClaim>,
    volumes: HashMap<String, PersistentVolume>,
    deployments: HashMap<Key, Deployment>,
    services: HashMap<Key, Service>,
}

/// Cluster API backed by in-memory maps.
#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<ClusterObjects>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeCluster {
    /// A cluster holding the source claim/volume, the clone deployment
    /// (scaled to zero), the starter's own deployment, and the service
    /// routed to the starter.
    pub fn seeded(config: &StarterConfig) -> Self {
        let cluster = Self::default();
        {
            let mut objects = cluster.objects.lock().unwrap();

            objects.claims.insert(
                key(&config.src_pvc_namespace, &config.src_pvc_name),
                PersistentVolumeClaim {
                    metadata: meta(&config.src_pvc_name),
                    spec: Some(PersistentVolumeClaimSpec {
                        volume_name: Some(SOURCE_VOLUME.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            );

            objects.volumes.insert(
                SOURCE_VOLUME.to_string(),
                PersistentVolume {
                    metadata: meta(SOURCE_VOLUME),
                    spec: Some(PersistentVolumeSpec {
                        capacity: Some(BTreeMap::from([(
                            "storage".to_string(),
                            Quantity("50Gi".to_string()),
                        )])),
                        gce_persistent_disk: Some(GCEPersistentDiskVolumeSource {
                            pd_name: SOURCE_DISK.to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            );

            for (name, replicas) in [
                (config.target_deployment_name.as_str(), 0),
                (config.self_deployment_name.as_str(), 1),
            ] {
                objects.deployments.insert(
                    key(&config.target_namespace, name),
                    Deployment {
                        metadata: meta(name),
                        spec: Some(DeploymentSpec {
                            replicas: Some(replicas),
                            selector: LabelSelector {
                                match_labels: Some(labels(name)),
                                ..Default::default()
                            },
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                );
            }

            objects.services.insert(
                key(&config.target_namespace, &config.service_name),
                Service {
                    metadata: meta(&config.service_name),
                    spec: Some(ServiceSpec {
                        selector: Some(labels(&config.self_deployment_name)),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            );
        }
        cluster
    }

    /// Make every call to `operation` fail with an API error.
    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Delay every call by `delay` (use with paused time).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn replicas(&self, namespace: &str, name: &str) -> Option<i32> {
        let objects = self.objects.lock().unwrap();
        objects.deployments.get(&key(namespace, name))?.spec.as_ref()?.replicas
    }

    pub fn service_selector(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        let objects = self.objects.lock().unwrap();
        objects.services.get(&key(namespace, name))?.spec.as_ref()?.selector.clone()
    }

    pub fn has_claim(&self, namespace: &str, name: &str) -> bool {
        self.objects.lock().unwrap().claims.contains_key(&key(namespace, name))
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.objects.lock().unwrap().volumes.contains_key(name)
    }

    async fn enter(&self, operation: &'static str, subject: String) -> ClusterResult<()> {
        self.calls.lock().unwrap().push(format!("{operation} {subject}"));
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(operation) {
            return Err(ClusterError::Api {
                kind: operation,
                name: subject,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

fn not_found(kind: &'static str, name: &str) -> ClusterError {
    ClusterError::NotFound {
        kind,
        name: name.to_string(),
    }
}

fn merge_labels(target: &mut Option<BTreeMap<String, String>>, patch: Option<&Value>) {
    let Some(map) = patch.and_then(Value::as_object) else {
        return;
    };
    let labels = target.get_or_insert_with(BTreeMap::new);
    for (k, v) in map {
        match v.as_str() {
            Some(v) => {
                labels.insert(k.clone(), v.to_string());
            }
            None => {
                labels.remove(k);
            }
        }
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn read_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<PersistentVolumeClaim> {
        self.enter("read_pvc", format!("{namespace}/{name}")).await?;
        let objects = self.objects.lock().unwrap();
        objects
            .claims
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("PersistentVolumeClaim", name))
    }

    async fn read_persistent_volume(&self, name: &str) -> ClusterResult<PersistentVolume> {
        self.enter("read_pv", name.to_string()).await?;
        let objects = self.objects.lock().unwrap();
        objects
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("PersistentVolume", name))
    }

    async fn create_persistent_volume(
        &self,
        volume: PersistentVolume,
    ) -> ClusterResult<PersistentVolume> {
        let name = volume.metadata.name.clone().unwrap_or_default();
        self.enter("create_pv", name.clone()).await?;
        let mut objects = self.objects.lock().unwrap();
        if objects.volumes.contains_key(&name) {
            return Err(ClusterError::AlreadyExists {
                kind: "PersistentVolume",
                name,
            });
        }
        objects.volumes.insert(name, volume.clone());
        Ok(volume)
    }

    async fn delete_persistent_volume(&self, name: &str) -> ClusterResult<()> {
        self.enter("delete_pv", name.to_string()).await?;
        let mut objects = self.objects.lock().unwrap();
        objects
            .volumes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("PersistentVolume", name))
    }

    async fn create_persistent_volume_claim(
        &self,
        namespace: &str,
        claim: PersistentVolumeClaim,
    ) -> ClusterResult<PersistentVolumeClaim> {
        let name = claim.metadata.name.clone().unwrap_or_default();
        self.enter("create_pvc", format!("{namespace}/{name}")).await?;
        let mut objects = self.objects.lock().unwrap();
        if objects.claims.contains_key(&key(namespace, &name)) {
            return Err(ClusterError::AlreadyExists {
                kind: "PersistentVolumeClaim",
                name,
            });
        }
        objects.claims.insert(key(namespace, &name), claim.clone());
        Ok(claim)
    }

    async fn delete_persistent_volume_claim(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.enter("delete_pvc", format!("{namespace}/{name}")).await?;
        let mut objects = self.objects.lock().unwrap();
        objects
            .claims
            .remove(&key(namespace, name))
            .ok_or_else(|| not_found("PersistentVolumeClaim", name))?;

        // Reclaim volumes bound to the claim with a Delete policy.
        objects.volumes.retain(|_, volume| {
            let Some(spec) = &volume.spec else {
                return true;
            };
            let bound = spec.claim_ref.as_ref().is_some_and(|r| {
                r.namespace.as_deref() == Some(namespace) && r.name.as_deref() == Some(name)
            });
            !(bound && spec.persistent_volume_reclaim_policy.as_deref() == Some("Delete"))
        });
        Ok(())
    }

    async fn read_deployment(&self, namespace: &str, name: &str) -> ClusterResult<Deployment> {
        self.enter("read_deployment", format!("{namespace}/{name}")).await?;
        let objects = self.objects.lock().unwrap();
        objects
            .deployments
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("Deployment", name))
    }

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: Value,
    ) -> ClusterResult<Deployment> {
        self.enter("patch_deployment", format!("{namespace}/{name}")).await?;
        let mut objects = self.objects.lock().unwrap();
        let deployment = objects
            .deployments
            .get_mut(&key(namespace, name))
            .ok_or_else(|| not_found("Deployment", name))?;
        if let Some(replicas) = patch.pointer("/spec/replicas").and_then(Value::as_i64) {
            let spec = deployment.spec.get_or_insert_with(Default::default);
            spec.replicas = i32::try_from(replicas).ok();
        }
        Ok(deployment.clone())
    }

    async fn read_service(&self, namespace: &str, name: &str) -> ClusterResult<Service> {
        self.enter("read_service", format!("{namespace}/{name}")).await?;
        let objects = self.objects.lock().unwrap();
        objects
            .services
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("Service", name))
    }

    async fn patch_service(&self, namespace: &str, name: &str, patch: Value) -> ClusterResult<Service> {
        self.enter("patch_service", format!("{namespace}/{name}")).await?;
        let mut objects = self.objects.lock().unwrap();
        let service = objects
            .services
            .get_mut(&key(namespace, name))
            .ok_or_else(|| not_found("Service", name))?;
        let spec = service.spec.get_or_insert_with(Default::default);
        merge_labels(&mut spec.selector, patch.pointer("/spec/selector"));
        Ok(service.clone())
    }
}

// ── Cloud ───────────────────────────────────────────────────────

#[derive(Default)]
struct CloudObjects {
    disks: HashMap<String, Disk>,
    snapshots: Vec<Snapshot>,
}

/// Compute API backed by in-memory disks and snapshots.
///
/// Snapshot listings are served two per page to exercise pagination.
#[derive(Default)]
pub struct FakeCloud {
    objects: Mutex<CloudObjects>,
    inserts: Mutex<Vec<DiskInsert>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl FakeCloud {
    /// The source disk plus the given `(name, creationTimestamp)` snapshots of it.
    pub fn seeded(config: &StarterConfig, snapshots: &[(&str, &str)]) -> Self {
        let cloud = Self::default();
        let link = source_disk_link(config);
        {
            let mut objects = cloud.objects.lock().unwrap();
            objects.disks.insert(
                SOURCE_DISK.to_string(),
                Disk {
                    name: SOURCE_DISK.to_string(),
                    self_link: link.clone(),
                    size_gb: Some("50".to_string()),
                    status: Some("READY".to_string()),
                },
            );
            for (name, created) in snapshots {
                objects.snapshots.push(Snapshot {
                    id: None,
                    name: name.to_string(),
                    creation_timestamp: chrono::DateTime::parse_from_rfc3339(created).unwrap(),
                    self_link: format!(
                        "https://www.googleapis.com/compute/v1/projects/{}/global/snapshots/{name}",
                        config.gcp_project
                    ),
                    source_disk: Some(link.clone()),
                });
            }
        }
        cloud
    }

    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Every disk-insert request received, in order.
    pub fn inserts(&self) -> Vec<DiskInsert> {
        self.inserts.lock().unwrap().clone()
    }

    pub fn has_disk(&self, name: &str) -> bool {
        self.objects.lock().unwrap().disks.contains_key(name)
    }

    /// Add a disk directly, as if left over from an earlier run.
    pub fn insert_existing_disk(&self, name: &str) {
        self.objects.lock().unwrap().disks.insert(
            name.to_string(),
            Disk {
                name: name.to_string(),
                self_link: format!("disks/{name}"),
                size_gb: None,
                status: Some("READY".to_string()),
            },
        );
    }

    /// Change the reported status of an existing disk.
    pub fn set_disk_status(&self, name: &str, status: &str) {
        if let Some(disk) = self.objects.lock().unwrap().disks.get_mut(name) {
            disk.status = Some(status.to_string());
        }
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn enter(&self, operation: &'static str, subject: &str) -> CloudResult<()> {
        self.calls.lock().unwrap().push(format!("{operation} {subject}"));
        if self.failing.lock().unwrap().contains(operation) {
            return Err(CloudError::Api {
                status: 500,
                resource: subject.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

fn done(name: &str, target: &str) -> Operation {
    Operation {
        name: format!("operation-{name}"),
        status: OperationStatus::Done,
        target_link: Some(target.to_string()),
        error: None,
    }
}

#[async_trait]
impl CloudDiskApi for FakeCloud {
    async fn get_disk(&self, name: &str) -> CloudResult<Disk> {
        self.enter("get_disk", name)?;
        self.objects
            .lock()
            .unwrap()
            .disks
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::NotFound {
                resource: format!("disks/{name}"),
            })
    }

    async fn list_snapshots_page(
        &self,
        filter: &str,
        page_token: Option<&str>,
    ) -> CloudResult<SnapshotPage> {
        self.enter("list_snapshots", page_token.unwrap_or("-"))?;
        let objects = self.objects.lock().unwrap();
        let matching: Vec<_> = objects
            .snapshots
            .iter()
            .filter(|s| {
                s.source_disk
                    .as_deref()
                    .is_some_and(|link| source_disk_filter(link) == filter)
            })
            .cloned()
            .collect();

        let start: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + 2).min(matching.len());
        Ok(SnapshotPage {
            items: matching.get(start..end).map(<[Snapshot]>::to_vec).unwrap_or_default(),
            next_page_token: (end < matching.len()).then(|| end.to_string()),
        })
    }

    async fn insert_disk(&self, disk: &DiskInsert) -> CloudResult<Operation> {
        self.enter("insert_disk", &disk.name)?;
        self.inserts.lock().unwrap().push(disk.clone());
        let mut objects = self.objects.lock().unwrap();
        if objects.disks.contains_key(&disk.name) {
            return Err(CloudError::AlreadyExists {
                resource: format!("disks/{}", disk.name),
            });
        }
        objects.disks.insert(
            disk.name.clone(),
            Disk {
                name: disk.name.clone(),
                self_link: format!("disks/{}", disk.name),
                size_gb: None,
                status: Some("CREATING".to_string()),
            },
        );
        Ok(done(&disk.name, &format!("disks/{}", disk.name)))
    }

    async fn delete_disk(&self, name: &str) -> CloudResult<Operation> {
        self.enter("delete_disk", name)?;
        let mut objects = self.objects.lock().unwrap();
        objects
            .disks
            .remove(name)
            .map(|_| done(name, &format!("disks/{name}")))
            .ok_or_else(|| CloudError::NotFound {
                resource: format!("disks/{name}"),
            })
    }

    async fn get_operation(&self, name: &str) -> CloudResult<Operation> {
        self.enter("get_operation", name)?;
        Ok(Operation {
            name: name.to_string(),
            status: OperationStatus::Done,
            target_link: None,
            error: None,
        })
    }
}

// ── Check ───────────────────────────────────────────────────────

/// Check returning whatever result it was last told to.
pub struct FakeCheck {
    result: Mutex<CheckResult>,
    checks: Mutex<u32>,
}

impl FakeCheck {
    pub fn new(result: CheckResult) -> Self {
        Self {
            result: Mutex::new(result),
            checks: Mutex::new(0),
        }
    }

    pub fn set(&self, result: CheckResult) {
        *self.result.lock().unwrap() = result;
    }

    pub fn checks(&self) -> u32 {
        *self.checks.lock().unwrap()
    }
}

#[async_trait]
impl ActivityCheck for FakeCheck {
    async fn check(&self, _target: &str) -> CheckResult {
        *self.checks.lock().unwrap() += 1;
        *self.result.lock().unwrap()
    }
}
