//! dbstarter-cloud — the cloud block-storage seam.
//!
//! The starter needs four things from the cloud provider: look up a
//! disk, list the snapshots taken of it, create a new disk from one of
//! them, and (optionally) poll the resulting zone operation. Those are
//! the [`CloudDiskApi`] trait; [`GceCompute`] implements it against the
//! Compute Engine v1 REST API.
//!
//! # Snapshot selection
//!
//! ```text
//! list_snapshots(sourceDisk)
//!   ├── page 1 ── items ─┐
//!   ├── page 2 ── items ─┼─► combined ─► sort by creationTimestamp desc
//!   └── page N (no nextPageToken) ─┘
//! ```
//!
//! Ties keep provider order (stable sort).

mod client;
mod error;
mod gce;
pub mod operation;
pub mod snapshots;
mod types;

pub use client::CloudDiskApi;
pub use error::{CloudError, CloudResult};
pub use gce::{GceCompute, GceConfig};
pub use operation::wait_for_operation;
pub use snapshots::{list_snapshots, source_disk_filter};
pub use types::*;
