//! Starter configuration.

use std::time::Duration;

use dbstarter_cluster::resources::service_dns_name;

/// Identifiers of the source, the clone, and the cloud location.
///
/// Built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarterConfig {
    pub src_pvc_namespace: String,
    pub src_pvc_name: String,
    pub target_namespace: String,
    pub target_pvc_name: String,
    pub target_deployment_name: String,
    pub self_deployment_name: String,
    pub service_name: String,
    pub gcp_project: String,
    pub gcp_zone: String,
    /// Prefix of the cloned disk name (`<prefix>--<source volume>`).
    pub disk_prefix: String,
    /// Disk type of the clone.
    pub disk_type: String,
}

impl StarterConfig {
    /// Config with the stock resource names for `project`/`zone`.
    pub fn new(gcp_project: impl Into<String>, gcp_zone: impl Into<String>) -> Self {
        Self {
            src_pvc_namespace: "default".to_string(),
            src_pvc_name: "postgres".to_string(),
            target_namespace: "default".to_string(),
            target_pvc_name: "postgres-clone".to_string(),
            target_deployment_name: "postgres-clone".to_string(),
            self_deployment_name: "db-starter".to_string(),
            service_name: "postgres-clone".to_string(),
            gcp_project: gcp_project.into(),
            gcp_zone: gcp_zone.into(),
            disk_prefix: "db-starter".to_string(),
            disk_type: "pd-ssd".to_string(),
        }
    }

    /// Deterministic name of the disk cloned from `source_volume`.
    pub fn clone_disk_name(&self, source_volume: &str) -> String {
        format!("{}--{source_volume}", self.disk_prefix)
    }

    /// Zone-qualified disk type path.
    pub fn disk_type_path(&self) -> String {
        format!(
            "projects/{}/zones/{}/diskTypes/{}",
            self.gcp_project, self.gcp_zone, self.disk_type
        )
    }

    /// Host name the clone is reachable at once traffic is cut over.
    pub fn clone_host(&self) -> String {
        service_dns_name(&self.service_name, &self.target_namespace)
    }
}

/// Timing knobs of the engage/disengage workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarterTimings {
    /// Continuous inactivity after which the clone is released.
    pub idle_threshold: Duration,
    /// Interval between activity checks.
    pub poll_interval: Duration,
    /// Bound on each cluster/cloud call.
    pub call_timeout: Duration,
    /// Bound on waiting for the disk-insert operation.
    pub operation_timeout: Duration,
    /// Poll the disk-insert operation before creating the volume.
    pub wait_for_disk: bool,
    /// Wait for the clone to accept connections before `Engaged`.
    pub wait_availability: bool,
    pub availability_retry: Duration,
    pub availability_ceiling: Duration,
}

impl Default for StarterTimings {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::from_secs(10 * 60),
            poll_interval: dbstarter_watch::watcher::POLL_INTERVAL,
            call_timeout: Duration::from_secs(60),
            operation_timeout: Duration::from_secs(5 * 60),
            wait_for_disk: false,
            wait_availability: false,
            availability_retry: dbstarter_watch::watcher::AVAILABILITY_RETRY,
            availability_ceiling: dbstarter_watch::watcher::AVAILABILITY_CEILING,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_name_is_deterministic() {
        let config = StarterConfig::new("acme", "europe-west1-b");
        assert_eq!(config.clone_disk_name("pv-src"), "db-starter--pv-src");
        assert_eq!(config.clone_disk_name("pv-src"), config.clone_disk_name("pv-src"));
    }

    #[test]
    fn disk_type_is_zone_qualified() {
        let config = StarterConfig::new("acme", "europe-west1-b");
        assert_eq!(
            config.disk_type_path(),
            "projects/acme/zones/europe-west1-b/diskTypes/pd-ssd"
        );
    }

    #[test]
    fn clone_host_is_service_dns() {
        let config = StarterConfig::new("acme", "z");
        assert_eq!(config.clone_host(), "postgres-clone.default.svc.cluster.local");
    }

    #[test]
    fn default_timings() {
        let timings = StarterTimings::default();
        assert_eq!(timings.idle_threshold, Duration::from_secs(600));
        assert_eq!(timings.poll_interval, Duration::from_secs(60));
        assert!(!timings.wait_availability);
    }
}
