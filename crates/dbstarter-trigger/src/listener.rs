//! TCP trigger listener.
//!
//! `TriggerListener` accepts connections and answers each one on its own
//! task with the engine's state ordinal.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dbstarter_engine::{EngageHandle, State};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Pause between requesting engage and replying.
pub const REPLY_DELAY: Duration = Duration::from_millis(100);

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause after the `failures`-th consecutive accept error: doubling from
/// 10ms, capped at 1s.
fn accept_backoff(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1 << exp)
        .min(ACCEPT_BACKOFF_MAX)
}

/// What the listener needs from the engine: a non-blocking request and
/// a state read.
pub trait EngageTrigger: Send + Sync + 'static {
    fn request_engage(&self);
    fn state(&self) -> State;
}

impl EngageTrigger for EngageHandle {
    fn request_engage(&self) {
        EngageHandle::request_engage(self);
    }

    fn state(&self) -> State {
        EngageHandle::state(self)
    }
}

pub struct TriggerListener {
    listener: TcpListener,
    trigger: Arc<dyn EngageTrigger>,
    reply_delay: Duration,
}

impl TriggerListener {
    /// Bind the trigger socket.
    pub async fn bind(addr: SocketAddr, trigger: Arc<dyn EngageTrigger>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind trigger listener on {addr}"))?;
        Ok(Self {
            listener,
            trigger,
            reply_delay: REPLY_DELAY,
        })
    }

    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("trigger listener has no local address")
    }

    /// Accept connections until `shutdown` flips. Each connection is
    /// answered on its own task.
    pub async fn serve(self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "trigger listener accepting connections");
        let mut accept_failures = 0u32;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            accept_failures = 0;
                            let trigger = self.trigger.clone();
                            let delay = self.reply_delay;
                            tokio::spawn(async move {
                                if let Err(e) = reply(stream, trigger.as_ref(), delay).await {
                                    warn!(%peer, error = %e, "failed to answer trigger connection");
                                }
                            });
                        }
                        Err(e) => {
                            // Errors such as EMFILE persist; back off instead of spinning.
                            accept_failures = accept_failures.saturating_add(1);
                            let pause = accept_backoff(accept_failures);
                            warn!(error = %e, ?pause, "accept failed");
                            tokio::time::sleep(pause).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("trigger listener shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn reply(
    mut stream: TcpStream,
    trigger: &dyn EngageTrigger,
    delay: Duration,
) -> std::io::Result<()> {
    trigger.request_engage();
    tokio::time::sleep(delay).await;

    let state = trigger.state();
    debug!(%state, "replying to trigger");
    stream.write_all(state.ordinal().to_string().as_bytes()).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use dbstarter_engine::StateCell;
    use tokio::io::AsyncReadExt;
    use tokio::sync::watch;

    use super::*;

    /// Counts requests and reports a fixed state.
    struct Recorder {
        requests: AtomicUsize,
        state: StateCell,
    }

    impl Recorder {
        fn new(state: State) -> Arc<Self> {
            Arc::new(Self {
                requests: AtomicUsize::new(0),
                state: StateCell::new(state),
            })
        }
    }

    impl EngageTrigger for Recorder {
        fn request_engage(&self) {
            self.requests.fetch_add(1, Ordering::SeqCst);
        }

        fn state(&self) -> State {
            self.state.get()
        }
    }

    async fn start(
        trigger: Arc<Recorder>,
    ) -> (SocketAddr, watch::Sender<bool>, tokio::task::JoinHandle<anyhow::Result<()>>) {
        let listener = TriggerListener::bind("127.0.0.1:0".parse().unwrap(), trigger)
            .await
            .unwrap()
            .with_reply_delay(Duration::from_millis(10));
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let server = tokio::spawn(listener.serve(rx));
        (addr, tx, server)
    }

    async fn poll(addr: SocketAddr) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn replies_with_state_ordinal() {
        for state in [
            State::Disengaged,
            State::Engaging,
            State::Engaged,
            State::Disengaging,
        ] {
            let (addr, _tx, _server) = start(Recorder::new(state)).await;
            assert_eq!(poll(addr).await, state.ordinal().to_string());
        }
    }

    #[tokio::test]
    async fn every_connection_requests_engage() {
        let recorder = Recorder::new(State::Disengaged);
        let (addr, _tx, _server) = start(recorder.clone()).await;

        for _ in 0..3 {
            poll(addr).await;
        }
        assert_eq!(recorder.requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reply_reflects_state_after_delay() {
        let recorder = Recorder::new(State::Disengaged);
        let (addr, _tx, _server) = start(recorder.clone()).await;

        let client = tokio::spawn(poll(addr));
        tokio::time::sleep(Duration::from_millis(2)).await;
        recorder.state.set(State::Engaging);

        assert_eq!(client.await.unwrap(), "1");
    }

    #[tokio::test]
    async fn serves_and_shuts_down() {
        let (_addr, tx, server) = start(Recorder::new(State::Disengaged)).await;

        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn accept_backoff_doubles_up_to_cap() {
        assert_eq!(accept_backoff(1), Duration::from_millis(10));
        assert_eq!(accept_backoff(2), Duration::from_millis(20));
        assert_eq!(accept_backoff(4), Duration::from_millis(80));
        assert_eq!(accept_backoff(8), Duration::from_secs(1));
        assert_eq!(accept_backoff(u32::MAX), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let first = TriggerListener::bind("127.0.0.1:0".parse().unwrap(), Recorder::new(State::Disengaged))
            .await
            .unwrap();
        let addr = first.local_addr().unwrap();

        let second = TriggerListener::bind(addr, Recorder::new(State::Disengaged)).await;
        assert!(second.is_err());
    }
}
