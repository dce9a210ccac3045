//! dbstarterd — the on-demand database clone daemon.
//!
//! Assembles the engine from its collaborators:
//! - Cluster API client (in-cluster service account or `kubectl proxy`)
//! - Compute Engine disk client (Application Default Credentials)
//! - PostgreSQL activity check
//! - Engage supervisor + TCP trigger listener
//!
//! # Usage
//!
//! ```text
//! dbstarterd --gcp-project acme --gcp-zone europe-west1-b --in-cluster
//! ```

mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dbstarter_cloud::{GceCompute, GceConfig};
use dbstarter_cluster::{ClusterApi, KubeCluster};
use dbstarter_engine::{Starter, supervise};
use dbstarter_trigger::TriggerListener;
use dbstarter_watch::PostgresCheck;

use crate::cli::{Cli, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    info!(
        project = %cli.gcp_project,
        zone = %cli.gcp_zone,
        in_cluster = cli.in_cluster,
        "dbstarter daemon starting"
    );

    // ── Collaborators ──────────────────────────────────────────

    let cluster: Arc<dyn ClusterApi> = if cli.in_cluster {
        Arc::new(KubeCluster::in_cluster()?)
    } else {
        Arc::new(KubeCluster::local_proxy()?)
    };
    info!(in_cluster = cli.in_cluster, "cluster client initialized");

    let cloud = GceCompute::new(GceConfig::new(&cli.gcp_project, &cli.gcp_zone))?;
    info!("compute client initialized");

    let check = PostgresCheck::new(cli.db_port, &cli.db_user, &cli.db_name);

    let starter = Starter::new(
        cli.starter_config(),
        cli.starter_timings(),
        cluster,
        Arc::new(cloud),
        Arc::new(check),
    );

    // Start from a known state: traffic on this process, clone released.
    if let Err(e) = starter.disengage().await {
        warn!(error = %e, kind = ?e.kind(), "initial disengage failed, will retry on first engage");
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    let (handle, supervisor) = supervise(starter.clone());
    let supervisor_handle = tokio::spawn(supervisor.run(shutdown_rx.clone()));

    let listener = TriggerListener::bind(cli.listen_addr(), Arc::new(handle))
        .await?
        .with_reply_delay(cli.reply_delay());
    let server = tokio::spawn(listener.serve(shutdown_rx));

    shutdown_signal().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    match server.await {
        Ok(Err(e)) => error!(error = %e, "trigger listener failed"),
        Err(e) => error!(error = %e, "trigger listener task panicked"),
        Ok(Ok(())) => {}
    }
    let _ = supervisor_handle.await;
    starter.stop_watching().await;

    info!("dbstarter daemon stopped");
    Ok(())
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level)
            .with_context(|| format!("invalid --log-level {:?}", cli.log_level))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match cli.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl-c"),
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")
}
