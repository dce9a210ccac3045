//! Activity watcher — background task that decides when a clone is idle.
//!
//! The watcher owns no reference back into the starter: all it knows is
//! a target host, an inactivity window, a check, and a one-shot callback.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{WatchError, WatchResult};
use crate::check::{ActivityCheck, CheckResult};

/// Interval between activity checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Retry interval while waiting for the target to come up.
pub const AVAILABILITY_RETRY: Duration = Duration::from_secs(15);

/// How long to wait for the target to come up.
pub const AVAILABILITY_CEILING: Duration = Duration::from_secs(10 * 60);

/// Invoked once when the target is judged idle.
pub type IdleCallback = Box<dyn FnOnce() + Send + 'static>;

/// How a watcher task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The inactivity window elapsed; the callback fired.
    Idle,
    /// The watcher was cancelled; the callback did not fire.
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
struct AvailabilityWait {
    retry: Duration,
    ceiling: Duration,
}

/// Polls a database until it has been idle for `max_inactive`.
pub struct ActivityWatcher {
    target: String,
    max_inactive: Duration,
    poll_interval: Duration,
    availability: AvailabilityWait,
    check: Arc<dyn ActivityCheck>,
}

impl ActivityWatcher {
    /// Create a watcher for `target` with the default 60s poll interval.
    pub fn new(target: impl Into<String>, max_inactive: Duration, check: Arc<dyn ActivityCheck>) -> Self {
        Self {
            target: target.into(),
            max_inactive,
            poll_interval: POLL_INTERVAL,
            availability: AvailabilityWait {
                retry: AVAILABILITY_RETRY,
                ceiling: AVAILABILITY_CEILING,
            },
            check,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the retry interval and ceiling of [`Self::wait_availability`].
    pub fn with_availability_wait(mut self, retry: Duration, ceiling: Duration) -> Self {
        self.availability = AvailabilityWait { retry, ceiling };
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn max_inactive(&self) -> Duration {
        self.max_inactive
    }

    /// Block until the target is reachable.
    ///
    /// Retries every 15s (by default) and fails with
    /// [`WatchError::TargetUnavailable`] once the ceiling is reached.
    pub async fn wait_availability(&self) -> WatchResult<()> {
        info!(host = %self.target, "waiting for database");
        let start = Instant::now();

        loop {
            if self.check.is_available(&self.target).await {
                info!(host = %self.target, "database is available");
                return Ok(());
            }

            let waited = start.elapsed();
            if waited >= self.availability.ceiling {
                return Err(WatchError::TargetUnavailable {
                    target: self.target.clone(),
                    waited,
                });
            }

            debug!(host = %self.target, ?waited, "database not available yet");
            tokio::time::sleep(self.availability.retry).await;
        }
    }

    /// Spawn the watch loop on its own task.
    ///
    /// `on_idle` runs at most once, on the watcher task, and never after
    /// cancellation has been observed. It should hand work off (spawn)
    /// rather than do it inline.
    pub fn start(self, on_idle: IdleCallback) -> WatcherHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(on_idle, cancel_rx));
        WatcherHandle {
            cancel_tx,
            task: Some(task),
        }
    }

    async fn run(self, on_idle: IdleCallback, mut cancel: watch::Receiver<bool>) -> WatchOutcome {
        info!(
            host = %self.target,
            max_inactive = ?self.max_inactive,
            "watching database activity"
        );
        let mut last_activity = Instant::now();

        while last_activity.elapsed() < self.max_inactive {
            if !sleep_or_cancel(self.poll_interval, &mut cancel).await {
                debug!(host = %self.target, "activity watcher cancelled");
                return WatchOutcome::Cancelled;
            }

            match self.check.check(&self.target).await {
                CheckResult::Active => {
                    debug!(host = %self.target, "there is some activity");
                    last_activity = Instant::now();
                }
                CheckResult::Idle => {
                    debug!(host = %self.target, "there is no current activity");
                }
                CheckResult::Unreachable => {
                    warn!(host = %self.target, "database unreachable, counting as inactive");
                }
            }
        }

        info!(
            host = %self.target,
            idle_for = ?last_activity.elapsed(),
            "no activity within window, finishing"
        );
        if is_cancelled(&cancel) {
            return WatchOutcome::Cancelled;
        }
        on_idle();
        WatchOutcome::Idle
    }
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow() || cancel.has_changed().is_err()
}

/// Sleep for `duration`; returns `false` if cancelled first.
async fn sleep_or_cancel(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if is_cancelled(cancel) {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => !is_cancelled(cancel),
        _ = cancel.changed() => false,
    }
}

/// Owner of a running watcher task.
///
/// Dropping the handle cancels the watcher and aborts its task.
pub struct WatcherHandle {
    cancel_tx: watch::Sender<bool>,
    task: Option<JoinHandle<WatchOutcome>>,
}

impl WatcherHandle {
    /// Signal the loop to stop at its next sleep boundary.
    ///
    /// An in-flight check is not interrupted. Safe to call after the
    /// loop has exited.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Wait for the task to end. `None` if it was aborted or panicked.
    pub async fn join(mut self) -> Option<WatchOutcome> {
        let task = self.task.take()?;
        task.await.ok()
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    const TEN_MINUTES: Duration = Duration::from_secs(10 * 60);

    /// Replays scripted results, then repeats `fallback`.
    struct ScriptedCheck {
        script: Mutex<VecDeque<CheckResult>>,
        fallback: CheckResult,
        calls: AtomicU32,
    }

    impl ScriptedCheck {
        fn new(script: Vec<CheckResult>, fallback: CheckResult) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ActivityCheck for ScriptedCheck {
        async fn check(&self, _target: &str) -> CheckResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.fallback)
        }
    }

    fn counter() -> (Arc<AtomicU32>, IdleCallback) {
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        (
            fired,
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_inactivity_window() {
        let check = ScriptedCheck::new(vec![], CheckResult::Idle);
        let (fired, on_idle) = counter();
        let started = Instant::now();

        let handle = ActivityWatcher::new("db.default.svc.cluster.local", TEN_MINUTES, check.clone())
            .start(on_idle);

        assert_eq!(handle.join().await, Some(WatchOutcome::Idle));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() >= TEN_MINUTES);
        assert_eq!(check.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_resets_the_window() {
        let check = ScriptedCheck::new(vec![CheckResult::Active; 5], CheckResult::Idle);
        let (fired, on_idle) = counter();
        let started = Instant::now();

        let handle = ActivityWatcher::new("db", TEN_MINUTES, check).start(on_idle);

        assert_eq!(handle.join().await, Some(WatchOutcome::Idle));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // Last activity seen at minute 5, idle window ends at minute 15.
        assert!(started.elapsed() >= Duration::from_secs(15 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_counts_as_inactive() {
        let check = ScriptedCheck::new(vec![], CheckResult::Unreachable);
        let (fired, on_idle) = counter();

        let handle = ActivityWatcher::new("db", TEN_MINUTES, check).start(on_idle);

        assert_eq!(handle.join().await, Some(WatchOutcome::Idle));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_threshold_never_fires() {
        let check = ScriptedCheck::new(vec![], CheckResult::Idle);
        let (fired, on_idle) = counter();

        let handle = ActivityWatcher::new("db", TEN_MINUTES, check).start(on_idle);

        tokio::time::sleep(Duration::from_secs(3 * 60 + 30)).await;
        handle.cancel();

        assert_eq!(handle.join().await, Some(WatchOutcome::Cancelled));
        tokio::time::sleep(TEN_MINUTES).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_stops_watcher() {
        let check = ScriptedCheck::new(vec![], CheckResult::Idle);
        let (fired, on_idle) = counter();

        let handle = ActivityWatcher::new("db", TEN_MINUTES, check.clone()).start(on_idle);
        tokio::time::sleep(Duration::from_secs(90)).await;
        drop(handle);

        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(check.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_exit_is_a_no_op() {
        let check = ScriptedCheck::new(vec![], CheckResult::Idle);
        let (fired, on_idle) = counter();

        let handle = ActivityWatcher::new("db", Duration::from_secs(60), check).start(on_idle);
        tokio::time::sleep(Duration::from_secs(5 * 60)).await;

        assert!(handle.is_finished());
        handle.cancel();
        assert_eq!(handle.join().await, Some(WatchOutcome::Idle));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_availability_retries_until_reachable() {
        let check = ScriptedCheck::new(
            vec![CheckResult::Unreachable, CheckResult::Unreachable],
            CheckResult::Idle,
        );
        let started = Instant::now();

        let watcher = ActivityWatcher::new("db", TEN_MINUTES, check.clone());
        watcher.wait_availability().await.unwrap();

        assert_eq!(check.calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= AVAILABILITY_RETRY * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_availability_gives_up_at_ceiling() {
        let check = ScriptedCheck::new(vec![], CheckResult::Unreachable);

        let watcher = ActivityWatcher::new("db", TEN_MINUTES, check);
        let err = watcher.wait_availability().await.unwrap_err();

        match err {
            WatchError::TargetUnavailable { target, waited } => {
                assert_eq!(target, "db");
                assert!(waited >= AVAILABILITY_CEILING);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
