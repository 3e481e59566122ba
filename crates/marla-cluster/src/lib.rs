//! marla-cluster — applying replica plans to the cluster.
//!
//! The service runs as one workload object per node, each pinned to its
//! node. Applying a plan means scaling those objects, creating any that
//! are missing.
//!
//! # Components
//!
//! - **`Orchestrator`** — get/set/create/delete for one node's workload
//! - **`KubeOrchestrator`** — one Deployment per node, scaled via the scale subresource
//! - **`InMemoryCluster`** — recording backend for tests and dry runs
//! - **`Reconciler`** — diff a desired plan against live counts, scale up first

pub mod error;
pub mod kube_backend;
pub mod memory;
pub mod orchestrator;
pub mod reconciler;

pub use error::{OrchestratorError, OrchestratorResult};
pub use kube_backend::{ClusterSettings, KubeOrchestrator};
pub use memory::{InMemoryCluster, Operation};
pub use orchestrator::{Orchestrator, OrchestratorFuture};
pub use reconciler::{LiveState, NodeState, ReconcileReport, Reconciler, ZeroReplicaPolicy};
