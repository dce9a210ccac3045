//! dbstarter trigger — connecting is the request.
//!
//! Every accepted connection asks the engine to engage, waits a short
//! reply delay so the transition can begin, writes the current state's
//! ordinal as ASCII (`"0"`..`"3"`), and closes. Nothing is read from the
//! client and the reply never waits for provisioning to finish; clients
//! re-connect to poll.

mod listener;

pub use listener::{EngageTrigger, REPLY_DELAY, TriggerListener};
