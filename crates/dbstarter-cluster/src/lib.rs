//! dbstarter-cluster — the cluster resource seam.
//!
//! Everything the starter reads or writes inside the orchestrator goes
//! through the [`ClusterApi`] trait: persistent volumes, volume claims,
//! deployments, and services, addressed by namespace + name.
//!
//! # Architecture
//!
//! ```text
//! Starter
//!   │
//!   ├── ClusterApi (trait)  ◄── in-memory fakes in tests
//!   │     └── KubeCluster   ── kube::Client → API server
//!   │
//!   └── resources::*        ── pure builders for PV/PVC bodies and
//!                              merge patches (replicas, selectors)
//! ```
//!
//! "Not found" is surfaced as [`ClusterError::NotFound`] so callers can
//! make the idempotent-delete decision explicitly.

mod client;
mod error;
mod kube_client;
pub mod resources;

pub use client::ClusterApi;
pub use error::{ClusterError, ClusterResult};
pub use kube_client::{KubeCluster, LOCAL_PROXY_URL};

pub use k8s_openapi::api::apps::v1::Deployment;
pub use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Service};
