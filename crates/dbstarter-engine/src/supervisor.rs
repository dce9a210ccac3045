//! Owner of engage invocations.
//!
//! Callers post a request through an [`EngageHandle`] and return
//! immediately; the [`EngageSupervisor`] task runs `engage` on its own.
//! The request channel holds one slot, so a burst of requests while an
//! engage is already queued collapses into that one.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::starter::Starter;
use crate::state::State;

/// Create a supervisor for `starter` and the handle that feeds it.
pub fn supervise(starter: Arc<Starter>) -> (EngageHandle, EngageSupervisor) {
    let (requests_tx, requests_rx) = mpsc::channel(1);
    (
        EngageHandle {
            starter: starter.clone(),
            requests: requests_tx,
        },
        EngageSupervisor {
            starter,
            requests: requests_rx,
        },
    )
}

/// Cheap, cloneable entry point for engage requests.
#[derive(Clone)]
pub struct EngageHandle {
    starter: Arc<Starter>,
    requests: mpsc::Sender<()>,
}

impl EngageHandle {
    /// Ask for an engage without waiting for it.
    ///
    /// Returns `false` if a request was already pending or the
    /// supervisor has stopped.
    pub fn request_engage(&self) -> bool {
        match self.requests.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("engage already requested");
                false
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                warn!("engage supervisor stopped, request dropped");
                false
            }
        }
    }

    /// Current state of the starter.
    pub fn state(&self) -> State {
        self.starter.state()
    }
}

pub struct EngageSupervisor {
    starter: Arc<Starter>,
    requests: mpsc::Receiver<()>,
}

impl EngageSupervisor {
    /// Serve engage requests until `shutdown` flips or every handle is
    /// dropped. An engage already running is finished first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("engage supervisor started");
        loop {
            tokio::select! {
                request = self.requests.recv() => {
                    if request.is_none() {
                        break;
                    }
                    if let Err(err) = self.starter.engage().await {
                        error!(error = %err, kind = ?err.kind(), "engage request failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("engage supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dbstarter_watch::CheckResult;

    use super::*;
    use crate::config::{StarterConfig, StarterTimings};
    use crate::testing::{FakeCheck, FakeCloud, FakeCluster};

    fn starter(snapshots: &[(&str, &str)]) -> (Arc<Starter>, Arc<FakeCluster>, Arc<FakeCloud>) {
        let config = StarterConfig::new("acme", "europe-west1-b");
        let cluster = Arc::new(FakeCluster::seeded(&config));
        let cloud = Arc::new(FakeCloud::seeded(&config, snapshots));
        let starter = Starter::new(
            config,
            StarterTimings::default(),
            cluster.clone(),
            cloud.clone(),
            Arc::new(FakeCheck::new(CheckResult::Active)),
        );
        (starter, cluster, cloud)
    }

    #[tokio::test(start_paused = true)]
    async fn request_returns_before_engage_completes() {
        let (starter, cluster, _cloud) = starter(&[("snap", "2024-01-01T00:00:00Z")]);
        cluster.set_delay(Duration::from_secs(5));
        let (handle, supervisor) = supervise(starter.clone());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(supervisor.run(shutdown_rx));

        assert!(handle.request_engage());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.state(), State::Engaging);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(handle.state(), State::Engaged);
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_coalesce() {
        let (starter, cluster, cloud) = starter(&[("snap", "2024-01-01T00:00:00Z")]);
        cluster.set_delay(Duration::from_secs(1));
        let (handle, supervisor) = supervise(starter);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(supervisor.run(shutdown_rx));

        for _ in 0..10 {
            handle.request_engage();
        }
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(handle.state(), State::Engaged);
        assert_eq!(cloud.count("insert_disk"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_engage_keeps_serving() {
        let (starter, _cluster, _cloud) = starter(&[]);
        let (handle, supervisor) = supervise(starter);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervisor.run(shutdown_rx));

        assert!(handle.request_engage());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.state(), State::Disengaged);

        assert!(handle.request_engage());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!task.is_finished());
    }

    #[tokio::test]
    async fn shutdown_stops_supervisor() {
        let (starter, _cluster, _cloud) = starter(&[]);
        let (handle, supervisor) = supervise(starter);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervisor.run(shutdown_rx));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(!handle.request_engage());
    }
}
