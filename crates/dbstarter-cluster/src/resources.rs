//! Builders for the cluster objects the starter creates and patches.
//!
//! Kept free of I/O so the exact request bodies can be unit-tested.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    GCEPersistentDiskVolumeSource, ObjectReference, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeSpec, Service, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{json, Map, Value};

/// CSI driver name of the GCE persistent disk driver.
pub const GCE_PD_CSI_DRIVER: &str = "pd.csi.storage.gke.io";

const READ_WRITE_ONCE: &str = "ReadWriteOnce";

/// Storage capacity map as carried by volumes and claims.
pub type Capacity = BTreeMap<String, Quantity>;

/// Label map used by selectors.
pub type Labels = BTreeMap<String, String>;

/// Name of the cloud disk backing a volume.
///
/// Understands both the in-tree `gcePersistentDisk` source and the GCE
/// PD CSI driver, whose volume handle is
/// `projects/<project>/zones/<zone>/disks/<name>`.
pub fn source_disk_name(volume: &PersistentVolume) -> Option<String> {
    let spec = volume.spec.as_ref()?;

    if let Some(gce) = &spec.gce_persistent_disk {
        return Some(gce.pd_name.clone());
    }

    let csi = spec.csi.as_ref()?;
    if csi.driver != GCE_PD_CSI_DRIVER {
        return None;
    }
    csi.volume_handle
        .rsplit_once("/disks/")
        .map(|(_, name)| name.to_string())
        .filter(|name| !name.is_empty())
}

/// Capacity of a volume (`spec.capacity`).
pub fn volume_capacity(volume: &PersistentVolume) -> Option<&Capacity> {
    volume.spec.as_ref()?.capacity.as_ref()
}

/// A reclaim-on-delete volume bound to `disk_name` and pre-bound to the
/// claim `claim_namespace/claim_name`.
pub fn clone_volume(
    disk_name: &str,
    capacity: &Capacity,
    claim_namespace: &str,
    claim_name: &str,
) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(disk_name.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            access_modes: Some(vec![READ_WRITE_ONCE.to_string()]),
            capacity: Some(capacity.clone()),
            claim_ref: Some(ObjectReference {
                api_version: Some("v1".to_string()),
                kind: Some("PersistentVolumeClaim".to_string()),
                namespace: Some(claim_namespace.to_string()),
                name: Some(claim_name.to_string()),
                ..Default::default()
            }),
            gce_persistent_disk: Some(GCEPersistentDiskVolumeSource {
                pd_name: disk_name.to_string(),
                ..Default::default()
            }),
            persistent_volume_reclaim_policy: Some("Delete".to_string()),
            storage_class_name: Some(String::new()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A claim requesting `capacity`, bound explicitly to `volume_name`.
pub fn clone_claim(claim_name: &str, capacity: &Capacity, volume_name: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(claim_name.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![READ_WRITE_ONCE.to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(capacity.clone()),
                ..Default::default()
            }),
            // Empty class disables dynamic provisioning for this claim.
            storage_class_name: Some(String::new()),
            volume_name: Some(volume_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod-selector labels of a deployment (`spec.selector.matchLabels`).
pub fn deployment_selector(deployment: &Deployment) -> Option<&Labels> {
    deployment.spec.as_ref()?.selector.match_labels.as_ref()
}

/// Routing selector of a service (`spec.selector`).
pub fn service_selector(service: &Service) -> Option<&Labels> {
    service.spec.as_ref()?.selector.as_ref()
}

/// Merge patch setting `spec.replicas`.
pub fn replicas_patch(replicas: i32) -> Value {
    json!({ "spec": { "replicas": replicas } })
}

/// Merge patch that *replaces* a service selector.
///
/// Merge patches merge maps key by key, so labels present in `current`
/// but absent from `desired` are nulled out explicitly.
pub fn selector_patch(current: Option<&Labels>, desired: &Labels) -> Value {
    let mut selector = Map::new();
    if let Some(current) = current {
        for key in current.keys().filter(|k| !desired.contains_key(*k)) {
            selector.insert(key.clone(), Value::Null);
        }
    }
    for (key, value) in desired {
        selector.insert(key.clone(), Value::String(value.clone()));
    }
    json!({ "spec": { "selector": selector } })
}

/// In-cluster DNS name of a service.
pub fn service_dns_name(service: &str, namespace: &str) -> String {
    format!("{service}.{namespace}.svc.cluster.local")
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::CSIPersistentVolumeSource;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn capacity(size: &str) -> Capacity {
        BTreeMap::from([("storage".to_string(), Quantity(size.to_string()))])
    }

    #[test]
    fn disk_name_from_in_tree_source() {
        let pv = PersistentVolume {
            spec: Some(PersistentVolumeSpec {
                gce_persistent_disk: Some(GCEPersistentDiskVolumeSource {
                    pd_name: "gke-postgres-pd".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(source_disk_name(&pv).as_deref(), Some("gke-postgres-pd"));
    }

    #[test]
    fn disk_name_from_csi_handle() {
        let pv = PersistentVolume {
            spec: Some(PersistentVolumeSpec {
                csi: Some(CSIPersistentVolumeSource {
                    driver: GCE_PD_CSI_DRIVER.to_string(),
                    volume_handle: "projects/acme/zones/europe-west1-b/disks/pvc-1234".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(source_disk_name(&pv).as_deref(), Some("pvc-1234"));
    }

    #[test]
    fn disk_name_missing_for_foreign_driver() {
        let pv = PersistentVolume {
            spec: Some(PersistentVolumeSpec {
                csi: Some(CSIPersistentVolumeSource {
                    driver: "ebs.csi.aws.com".to_string(),
                    volume_handle: "vol-0abc".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(source_disk_name(&pv), None);
        assert_eq!(source_disk_name(&PersistentVolume::default()), None);
    }

    #[test]
    fn clone_volume_is_prebound_and_reclaimed_on_delete() {
        let pv = clone_volume("db-starter--pv-src", &capacity("50Gi"), "default", "postgres-clone");
        assert_eq!(pv.metadata.name.as_deref(), Some("db-starter--pv-src"));

        let spec = pv.spec.unwrap();
        assert_eq!(spec.persistent_volume_reclaim_policy.as_deref(), Some("Delete"));
        assert_eq!(spec.capacity, Some(capacity("50Gi")));
        assert_eq!(spec.gce_persistent_disk.unwrap().pd_name, "db-starter--pv-src");

        let claim_ref = spec.claim_ref.unwrap();
        assert_eq!(claim_ref.namespace.as_deref(), Some("default"));
        assert_eq!(claim_ref.name.as_deref(), Some("postgres-clone"));
    }

    #[test]
    fn clone_claim_requests_source_capacity() {
        let pvc = clone_claim("postgres-clone", &capacity("50Gi"), "db-starter--pv-src");
        let spec = pvc.spec.unwrap();
        assert_eq!(spec.resources.unwrap().requests, Some(capacity("50Gi")));
        assert_eq!(spec.volume_name.as_deref(), Some("db-starter--pv-src"));
    }

    #[test]
    fn selector_patch_replaces_keys() {
        let current = labels(&[("app", "db-starter"), ("tier", "idle")]);
        let desired = labels(&[("app", "postgres-clone")]);

        let patch = selector_patch(Some(&current), &desired);
        assert_eq!(
            patch,
            json!({ "spec": { "selector": { "app": "postgres-clone", "tier": null } } })
        );
    }

    #[test]
    fn selector_patch_without_current_selector() {
        let desired = labels(&[("app", "postgres-clone")]);
        let patch = selector_patch(None, &desired);
        assert_eq!(patch, json!({ "spec": { "selector": { "app": "postgres-clone" } } }));
    }

    #[test]
    fn replicas_patch_body() {
        assert_eq!(replicas_patch(0), json!({ "spec": { "replicas": 0 } }));
    }

    #[test]
    fn dns_name() {
        assert_eq!(
            service_dns_name("postgres-clone", "default"),
            "postgres-clone.default.svc.cluster.local"
        );
    }
}
