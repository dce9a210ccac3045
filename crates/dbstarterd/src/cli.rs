//! Command-line flags of the daemon and their mapping onto the engine's
//! configuration.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use dbstarter_engine::{StarterConfig, StarterTimings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "dbstarterd",
    about = "Starts a cloned database from the latest snapshot on first connection"
)]
pub struct Cli {
    /// Address the trigger listener binds to.
    #[arg(long, default_value = "0.0.0.0")]
    pub listen_address: IpAddr,

    /// Port the trigger listener binds to.
    #[arg(long, default_value_t = 5432)]
    pub listen_port: u16,

    /// Namespace of the source volume claim.
    #[arg(long, default_value = "default")]
    pub src_pvc_namespace: String,

    /// Name of the source volume claim.
    #[arg(long, default_value = "postgres")]
    pub src_pvc_name: String,

    /// Namespace of the clone's claim, deployment, and service.
    #[arg(long, default_value = "default")]
    pub target_namespace: String,

    #[arg(long, default_value = "postgres-clone")]
    pub target_pvc_name: String,

    #[arg(long, default_value = "postgres-clone")]
    pub target_deployment_name: String,

    /// Deployment running this process; traffic returns here when idle.
    #[arg(long, default_value = "db-starter")]
    pub self_deployment_name: String,

    /// Service whose selector is cut over between the two deployments.
    #[arg(long, default_value = "postgres-clone")]
    pub service_name: String,

    #[arg(long)]
    pub gcp_project: String,

    #[arg(long)]
    pub gcp_zone: String,

    /// Use the pod's service account instead of a local `kubectl proxy`.
    #[arg(long)]
    pub in_cluster: bool,

    /// Prefix of the cloned disk's name.
    #[arg(long, default_value = "db-starter")]
    pub disk_prefix: String,

    #[arg(long, default_value = "pd-ssd")]
    pub disk_type: String,

    /// Minutes without client sessions before the clone is released.
    #[arg(long, default_value_t = 10)]
    pub idle_minutes: u64,

    #[arg(long, default_value_t = 60)]
    pub poll_interval_secs: u64,

    /// Timeout for each cluster or cloud API call.
    #[arg(long, default_value_t = 60)]
    pub call_timeout_secs: u64,

    /// Wait for the clone to accept connections before reporting it engaged.
    #[arg(long)]
    pub wait_availability: bool,

    /// Wait for the disk-insert operation to finish before creating the volume.
    #[arg(long)]
    pub wait_for_disk: bool,

    /// Delay before a trigger connection gets its reply.
    #[arg(long, default_value_t = 100)]
    pub reply_delay_ms: u64,

    #[arg(long, default_value_t = 5432)]
    pub db_port: u16,

    #[arg(long, default_value = "postgres")]
    pub db_user: String,

    #[arg(long, default_value = "postgres")]
    pub db_name: String,

    /// Default log directive; `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.listen_port)
    }

    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.reply_delay_ms)
    }

    pub fn starter_config(&self) -> StarterConfig {
        StarterConfig {
            src_pvc_namespace: self.src_pvc_namespace.clone(),
            src_pvc_name: self.src_pvc_name.clone(),
            target_namespace: self.target_namespace.clone(),
            target_pvc_name: self.target_pvc_name.clone(),
            target_deployment_name: self.target_deployment_name.clone(),
            self_deployment_name: self.self_deployment_name.clone(),
            service_name: self.service_name.clone(),
            gcp_project: self.gcp_project.clone(),
            gcp_zone: self.gcp_zone.clone(),
            disk_prefix: self.disk_prefix.clone(),
            disk_type: self.disk_type.clone(),
        }
    }

    pub fn starter_timings(&self) -> StarterTimings {
        StarterTimings {
            idle_threshold: Duration::from_secs(self.idle_minutes.saturating_mul(60)),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            wait_for_disk: self.wait_for_disk,
            wait_availability: self.wait_availability,
            ..StarterTimings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["dbstarterd", "--gcp-project", "acme", "--gcp-zone", "europe-west1-b"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_stock_deployment() {
        let cli = parse(&[]);
        assert_eq!(cli.listen_addr(), "0.0.0.0:5432".parse().unwrap());
        assert!(!cli.in_cluster);
        assert_eq!(cli.log_format, LogFormat::Text);

        let config = cli.starter_config();
        assert_eq!(config, StarterConfig::new("acme", "europe-west1-b"));

        let timings = cli.starter_timings();
        assert_eq!(timings, StarterTimings::default());
    }

    #[test]
    fn huge_idle_minutes_saturate() {
        let max = u64::MAX.to_string();
        let cli = parse(&["--idle-minutes", &max]);
        assert_eq!(cli.starter_timings().idle_threshold, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn project_and_zone_are_required() {
        assert!(Cli::try_parse_from(["dbstarterd"]).is_err());
        assert!(Cli::try_parse_from(["dbstarterd", "--gcp-project", "acme"]).is_err());
    }

    #[test]
    fn overrides_flow_into_config() {
        let cli = parse(&[
            "--listen-port",
            "15432",
            "--target-namespace",
            "staging",
            "--idle-minutes",
            "3",
            "--wait-availability",
            "--log-format",
            "json",
        ]);
        assert_eq!(cli.listen_addr().port(), 15432);
        assert_eq!(cli.starter_config().target_namespace, "staging");

        let timings = cli.starter_timings();
        assert_eq!(timings.idle_threshold, Duration::from_secs(180));
        assert!(timings.wait_availability);
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
