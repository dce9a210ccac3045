//! dbstarter-watch — idle detection for an engaged clone.
//!
//! An [`ActivityWatcher`] polls the clone database on a fixed interval
//! and fires its callback once the database has had no client sessions
//! for the configured inactivity window.
//!
//! # Architecture
//!
//! ```text
//! ActivityWatcher::wait_availability()  (retry 15s, ceiling 10m)
//! ActivityWatcher::start() ──► tokio task
//!   │   ├── loop: sleep(poll) ─► check() ─► Active ⇒ reset last_activity
//!   │   └── idle for ≥ max_inactive ⇒ on_idle() exactly once
//!   │
//!   └── WatcherHandle ── cancel() / drop ⇒ task stops, callback never fires
//! ```
//!
//! The check is a trait so the loop can be driven by a scripted check
//! under tokio's paused clock.

pub mod error;
pub mod check;
pub mod watcher;

pub use error::{WatchError, WatchResult};
pub use check::{ActivityCheck, CheckResult, PostgresCheck};
pub use watcher::{ActivityWatcher, IdleCallback, WatchOutcome, WatcherHandle};
