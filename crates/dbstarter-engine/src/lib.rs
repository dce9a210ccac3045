//! dbstarter engine — the engage/disengage state machine.
//!
//! ```text
//!   EngageHandle ──request (bounded, coalescing)──▶ EngageSupervisor
//!        │                                              │
//!        │ state()                                      │ engage()
//!        ▼                                              ▼
//!   StateCell ◀───────────────────────────────────── Starter
//!                                                    │   │   │
//!                                   ClusterApi ◀─────┘   │   └────▶ ActivityWatcher
//!                                   (volumes, claims,    │          (idle → disengage)
//!                                    deployments,        ▼
//!                                    services)      CloudDiskApi
//!                                                   (snapshots, disks)
//! ```

pub mod config;
pub mod error;
pub mod starter;
pub mod state;
pub mod supervisor;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{StarterConfig, StarterTimings};
pub use error::{ErrorKind, StarterError, StarterResult};
pub use starter::Starter;
pub use state::{State, StateCell};
pub use supervisor::{supervise, EngageHandle, EngageSupervisor};
