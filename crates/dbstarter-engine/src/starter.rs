//! The engage/disengage state machine.
//!
//! A [`Starter`] provisions the clone from the newest snapshot of the
//! source disk, cuts the service over to it, and watches it for
//! inactivity. When the watcher reports the clone idle (or someone
//! calls [`Starter::disengage`]) traffic is routed back to this process
//! and the clone is scaled down and its claim deleted.
//!
//! ```text
//!  engage()   DISENGAGED ──CAS──▶ ENGAGING ──provision──▶ ENGAGED
//!                 ▲                   │ failure                │
//!                 │◀──compensate──────┘                       │ idle / disengage()
//!                 │                                            ▼
//!                 └──────────────release──────────────── DISENGAGING
//! ```
//!
//! Engage and disengage bodies are serialized by a workflow lock. The
//! state itself lives in a [`StateCell`] so readers (the trigger
//! listener) never wait on a running workflow.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use dbstarter_cloud::operation::OPERATION_POLL_INTERVAL;
use dbstarter_cloud::{CloudDiskApi, CloudError, DiskInsert, Operation, Snapshot};
use dbstarter_cluster::resources::{
    clone_claim, clone_volume, deployment_selector, replicas_patch, selector_patch,
    service_selector, source_disk_name, volume_capacity, Labels,
};
use dbstarter_cluster::ClusterApi;
use dbstarter_watch::{ActivityCheck, ActivityWatcher, IdleCallback, WatcherHandle};

use crate::config::{StarterConfig, StarterTimings};
use crate::error::{ErrorKind, StarterError, StarterResult};
use crate::state::{State, StateCell};

/// The running watcher, tagged so stale idle notifications can be told
/// apart from the current one.
struct ActiveWatcher {
    id: u64,
    handle: WatcherHandle,
}

/// Writes made by an engage attempt, for compensation.
#[derive(Debug, Default)]
struct Progress {
    disk_created: Option<String>,
    volume_created: Option<String>,
    claim_created: bool,
}

impl Progress {
    fn has_writes(&self) -> bool {
        self.disk_created.is_some() || self.volume_created.is_some() || self.claim_created
    }
}

pub struct Starter {
    config: StarterConfig,
    timings: StarterTimings,
    cluster: Arc<dyn ClusterApi>,
    cloud: Arc<dyn CloudDiskApi>,
    check: Arc<dyn ActivityCheck>,
    state: StateCell,
    /// Set when a teardown or a rollback failed part way.
    stalled: AtomicBool,
    /// Volume and disk a failed rollback could not remove.
    leftovers: Mutex<Option<Progress>>,
    workflow: Mutex<()>,
    watcher: Mutex<Option<ActiveWatcher>>,
    next_watcher_id: AtomicU64,
    this: Weak<Starter>,
}

impl Starter {
    pub fn new(
        config: StarterConfig,
        timings: StarterTimings,
        cluster: Arc<dyn ClusterApi>,
        cloud: Arc<dyn CloudDiskApi>,
        check: Arc<dyn ActivityCheck>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            timings,
            cluster,
            cloud,
            check,
            state: StateCell::default(),
            stalled: AtomicBool::new(false),
            leftovers: Mutex::new(None),
            workflow: Mutex::new(()),
            watcher: Mutex::new(None),
            next_watcher_id: AtomicU64::new(1),
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &StarterConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.state.get()
    }

    /// Whether the last teardown failed and is waiting to be retried.
    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::Acquire)
    }

    // ── Engage ──────────────────────────────────────────────────

    /// Provision the clone and cut traffic over to it.
    ///
    /// A no-op unless the state is `DISENGAGED`, except that a stalled
    /// teardown is retried first. On failure any writes already made are
    /// compensated and the state returns to `DISENGAGED`. If the rollback
    /// itself fails the state stays `DISENGAGING`, marked stalled, so the
    /// next engage tears down first.
    pub async fn engage(&self) -> StarterResult<()> {
        let Ok(_workflow) = self.workflow.try_lock() else {
            debug!(state = %self.state(), "workflow in progress, engage ignored");
            return Ok(());
        };

        if !self.state.transition(State::Disengaged, State::Engaging) {
            let current = self.state();
            if current != State::Disengaging || !self.is_stalled() {
                debug!(state = %current, "engage ignored");
                return Ok(());
            }

            warn!("previous disengage stalled, retrying teardown before engaging");
            self.teardown().await?;
            if !self.state.transition(State::Disengaged, State::Engaging) {
                return Ok(());
            }
        }

        info!(
            namespace = %self.config.src_pvc_namespace,
            claim = %self.config.src_pvc_name,
            "engaging"
        );

        let mut progress = Progress::default();
        match self.provision(&mut progress).await {
            Ok(watcher) => {
                *self.watcher.lock().await = Some(watcher);
                self.state.set(State::Engaged);
                info!(host = %self.config.clone_host(), "engaged");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, kind = ?err.kind(), "engage failed");
                if !progress.has_writes() {
                    self.state.set(State::Disengaged);
                    return Err(err);
                }

                self.state.set(State::Disengaging);
                match self.compensate(&progress).await {
                    Ok(()) => self.state.set(State::Disengaged),
                    Err(cleanup) => {
                        error!(error = %cleanup, "rollback incomplete, teardown will be retried");
                        if !progress.claim_created {
                            *self.leftovers.lock().await = Some(progress);
                        }
                        self.stalled.store(true, Ordering::Release);
                    }
                }
                Err(err)
            }
        }
    }

    async fn provision(&self, progress: &mut Progress) -> StarterResult<ActiveWatcher> {
        let config = &self.config;

        // Source claim → volume → cloud disk.
        let claim = self
            .call(
                "read source claim",
                self.cluster
                    .read_persistent_volume_claim(&config.src_pvc_namespace, &config.src_pvc_name),
            )
            .await?;
        let source_volume = claim
            .spec
            .and_then(|spec| spec.volume_name)
            .ok_or_else(|| StarterError::InvalidResource {
                kind: "PersistentVolumeClaim",
                name: config.src_pvc_name.clone(),
                field: "spec.volumeName",
            })?;

        let volume = self
            .call("read source volume", self.cluster.read_persistent_volume(&source_volume))
            .await?;
        let source_disk = source_disk_name(&volume).ok_or_else(|| StarterError::InvalidResource {
            kind: "PersistentVolume",
            name: source_volume.clone(),
            field: "disk reference",
        })?;
        let capacity = volume_capacity(&volume)
            .cloned()
            .ok_or_else(|| StarterError::InvalidResource {
                kind: "PersistentVolume",
                name: source_volume.clone(),
                field: "spec.capacity",
            })?;

        let disk = self.call("get source disk", self.cloud.get_disk(&source_disk)).await?;
        let snapshot = self
            .list_snapshots(&disk.self_link)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StarterError::NoSnapshotAvailable {
                disk: source_disk.clone(),
            })?;

        // Clone disk.
        let clone_disk = config.clone_disk_name(&source_volume);
        info!(disk = %clone_disk, snapshot = %snapshot.name, "creating disk from snapshot");
        let insert = DiskInsert {
            name: clone_disk.clone(),
            source_snapshot: snapshot.self_link.clone(),
            disk_type: config.disk_type_path(),
        };
        match self.call("insert disk", self.cloud.insert_disk(&insert)).await {
            Ok(operation) => {
                progress.disk_created = Some(clone_disk.clone());
                if self.timings.wait_for_disk {
                    self.wait_for_operation(&operation.name).await?;
                }
            }
            Err(StarterError::Cloud(CloudError::AlreadyExists { .. })) => {
                let existing = self.call("get clone disk", self.cloud.get_disk(&clone_disk)).await?;
                if existing.is_deleting() {
                    return Err(StarterError::DiskBusy {
                        disk: clone_disk,
                        status: existing.status.unwrap_or_default(),
                    });
                }
                info!(disk = %clone_disk, "disk already exists, reusing it");
            }
            Err(err) => return Err(err),
        }

        // Volume and claim in the target namespace.
        let pv = clone_volume(
            &clone_disk,
            &capacity,
            &config.target_namespace,
            &config.target_pvc_name,
        );
        self.call("create volume", self.cluster.create_persistent_volume(pv))
            .await?;
        progress.volume_created = Some(clone_disk.clone());

        let pvc = clone_claim(&config.target_pvc_name, &capacity, &clone_disk);
        self.call(
            "create claim",
            self.cluster
                .create_persistent_volume_claim(&config.target_namespace, pvc),
        )
        .await?;
        progress.claim_created = true;

        // Scale up and cut over.
        let deployment = self
            .call(
                "read target deployment",
                self.cluster
                    .read_deployment(&config.target_namespace, &config.target_deployment_name),
            )
            .await?;
        let target_labels = selector_of(&deployment, &config.target_deployment_name)?;

        self.call(
            "scale target deployment",
            self.cluster.patch_deployment(
                &config.target_namespace,
                &config.target_deployment_name,
                replicas_patch(1),
            ),
        )
        .await?;
        info!(deployment = %config.target_deployment_name, "target deployment scaled to 1");

        self.route_service_to(&target_labels).await?;
        info!(service = %config.service_name, "traffic cut over to clone");

        // Watch.
        let watcher = ActivityWatcher::new(
            config.clone_host(),
            self.timings.idle_threshold,
            self.check.clone(),
        )
        .with_poll_interval(self.timings.poll_interval)
        .with_availability_wait(
            self.timings.availability_retry,
            self.timings.availability_ceiling,
        );

        if self.timings.wait_availability {
            watcher.wait_availability().await?;
        }

        let id = self.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        let handle = watcher.start(self.idle_callback(id));
        Ok(ActiveWatcher { id, handle })
    }

    fn idle_callback(&self, id: u64) -> IdleCallback {
        let starter = self.this.clone();
        Box::new(move || {
            if let Some(starter) = starter.upgrade() {
                tokio::spawn(async move { starter.on_idle(id).await });
            }
        })
    }

    /// Undo the writes of a failed engage, continuing past failures.
    /// Returns the first failure.
    async fn compensate(&self, progress: &Progress) -> StarterResult<()> {
        warn!(?progress, "rolling back partial engage");

        if progress.claim_created {
            // The volume reclaims its disk once the claim is gone.
            let steps = [
                ("route service back", self.route_service_to_self().await),
                ("scale target down", self.scale_target_down().await),
                ("delete claim", self.delete_clone_claim().await),
            ];
            return first_failure(steps);
        }

        self.remove_unclaimed(progress).await
    }

    /// Delete a volume and disk that never got a claim. Missing objects
    /// count as removed.
    async fn remove_unclaimed(&self, progress: &Progress) -> StarterResult<()> {
        let volume = match &progress.volume_created {
            Some(volume) => {
                let result = self
                    .call("delete volume", self.cluster.delete_persistent_volume(volume))
                    .await;
                ignore_not_found(result)
            }
            None => Ok(()),
        };
        let disk = match &progress.disk_created {
            Some(disk) => {
                let result = self.call("delete disk", self.cloud.delete_disk(disk)).await;
                ignore_not_found(result.map(|_| ()))
            }
            None => Ok(()),
        };
        first_failure([("delete volume", volume), ("delete disk", disk)])
    }

    /// Retry the removal of objects a failed rollback left behind.
    async fn clear_leftovers(&self) -> StarterResult<()> {
        let Some(progress) = self.leftovers.lock().await.take() else {
            return Ok(());
        };
        if let Err(err) = self.remove_unclaimed(&progress).await {
            *self.leftovers.lock().await = Some(progress);
            return Err(err);
        }
        info!("leftovers of a failed engage removed");
        Ok(())
    }

    // ── Disengage ───────────────────────────────────────────────

    /// Route traffic back to this process and release the clone.
    ///
    /// Proceeds from any state. Waits for a running engage to finish
    /// first. A missing clone claim counts as already released.
    pub async fn disengage(&self) -> StarterResult<()> {
        let _workflow = self.workflow.lock().await;
        self.teardown().await
    }

    /// Idle notification from watcher `id`.
    async fn on_idle(&self, id: u64) {
        let _workflow = self.workflow.lock().await;
        {
            let mut slot = self.watcher.lock().await;
            if slot.as_ref().map(|w| w.id) != Some(id) {
                debug!(watcher = id, "stale idle notification ignored");
                return;
            }
            slot.take();
        }

        info!("clone idle, disengaging");
        if let Err(err) = self.teardown().await {
            error!(error = %err, kind = ?err.kind(), "idle disengage failed");
        }
    }

    /// Disengage body; the caller holds the workflow lock.
    async fn teardown(&self) -> StarterResult<()> {
        self.state.set(State::Disengaging);
        self.stop_watching().await;
        info!("disengaging");

        let released = match self.release().await {
            Ok(()) => self.clear_leftovers().await,
            Err(err) => Err(err),
        };
        match released {
            Ok(()) => {
                self.stalled.store(false, Ordering::Release);
                self.state.set(State::Disengaged);
                info!("disengaged");
                Ok(())
            }
            Err(err) => {
                self.stalled.store(true, Ordering::Release);
                error!(error = %err, kind = ?err.kind(), "disengage failed");
                Err(err)
            }
        }
    }

    async fn release(&self) -> StarterResult<()> {
        self.route_service_to_self().await?;
        self.scale_target_down().await?;
        self.delete_clone_claim().await
    }

    /// Cancel and drop the active watcher, if any.
    pub async fn stop_watching(&self) {
        if let Some(active) = self.watcher.lock().await.take() {
            active.handle.cancel();
            debug!(watcher = active.id, "activity watcher stopped");
        }
    }

    async fn route_service_to_self(&self) -> StarterResult<()> {
        let config = &self.config;
        let own = self
            .call(
                "read own deployment",
                self.cluster
                    .read_deployment(&config.target_namespace, &config.self_deployment_name),
            )
            .await?;
        let own_labels = selector_of(&own, &config.self_deployment_name)?;
        self.route_service_to(&own_labels).await?;
        info!(service = %config.service_name, "traffic routed back to starter");
        Ok(())
    }

    async fn route_service_to(&self, labels: &Labels) -> StarterResult<()> {
        let config = &self.config;
        let service = self
            .call(
                "read service",
                self.cluster
                    .read_service(&config.target_namespace, &config.service_name),
            )
            .await?;
        let patch = selector_patch(service_selector(&service), labels);
        self.call(
            "patch service",
            self.cluster
                .patch_service(&config.target_namespace, &config.service_name, patch),
        )
        .await?;
        Ok(())
    }

    async fn scale_target_down(&self) -> StarterResult<()> {
        let config = &self.config;
        self.call(
            "read target deployment",
            self.cluster
                .read_deployment(&config.target_namespace, &config.target_deployment_name),
        )
        .await?;
        self.call(
            "scale target deployment",
            self.cluster.patch_deployment(
                &config.target_namespace,
                &config.target_deployment_name,
                replicas_patch(0),
            ),
        )
        .await?;
        info!(deployment = %config.target_deployment_name, "target deployment scaled to 0");
        Ok(())
    }

    async fn delete_clone_claim(&self) -> StarterResult<()> {
        let config = &self.config;
        let result = self
            .call(
                "delete claim",
                self.cluster
                    .delete_persistent_volume_claim(&config.target_namespace, &config.target_pvc_name),
            )
            .await;

        match result {
            Ok(()) => {
                info!(claim = %config.target_pvc_name, "clone claim deleted");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(claim = %config.target_pvc_name, "clone claim already gone");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    // ── Cloud helpers ───────────────────────────────────────────

    /// All snapshots of `disk_link`, newest first.
    pub async fn list_snapshots(&self, disk_link: &str) -> StarterResult<Vec<Snapshot>> {
        self.call(
            "list snapshots",
            dbstarter_cloud::list_snapshots(self.cloud.as_ref(), disk_link),
        )
        .await
    }

    /// Poll a zone operation until it is done, bounded by the
    /// operation timeout.
    pub async fn wait_for_operation(&self, operation: &str) -> StarterResult<Operation> {
        let after = self.timings.operation_timeout;
        let poll = dbstarter_cloud::wait_for_operation(
            self.cloud.as_ref(),
            operation,
            OPERATION_POLL_INTERVAL,
        );
        match tokio::time::timeout(after, poll).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StarterError::Timeout {
                operation: "wait for operation",
                after,
            }),
        }
    }

    /// Run one remote call under the call timeout.
    async fn call<T, E>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, E>>,
    ) -> StarterResult<T>
    where
        StarterError: From<E>,
    {
        let after = self.timings.call_timeout;
        match tokio::time::timeout(after, fut).await {
            Ok(result) => result.map_err(StarterError::from),
            Err(_) => {
                warn!(operation, ?after, "remote call timed out");
                Err(StarterError::Timeout { operation, after })
            }
        }
    }
}

fn ignore_not_found(result: StarterResult<()>) -> StarterResult<()> {
    match result {
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Log every failed step and return the first failure.
fn first_failure<const N: usize>(steps: [(&'static str, StarterResult<()>); N]) -> StarterResult<()> {
    let mut first = None;
    for (step, result) in steps {
        if let Err(err) = result {
            warn!(step, error = %err, "rollback step failed");
            first.get_or_insert(err);
        }
    }
    first.map_or(Ok(()), Err)
}

fn selector_of(
    deployment: &dbstarter_cluster::Deployment,
    name: &str,
) -> StarterResult<Labels> {
    deployment_selector(deployment)
        .filter(|labels| !labels.is_empty())
        .cloned()
        .ok_or_else(|| StarterError::InvalidResource {
            kind: "Deployment",
            name: name.to_string(),
            field: "spec.selector.matchLabels",
        })
}
