//! The orchestration contract.
//!
//! Each operation addresses the single workload object hosting the
//! service on one node. All operations are idempotent and independently
//! retryable; "not found" and "already exists" are ordinary error values
//! the caller branches on.

use std::future::Future;
use std::pin::Pin;

use crate::error::OrchestratorResult;

/// Boxed future returned by [`Orchestrator`] operations.
pub type OrchestratorFuture<'a, T> = Pin<Box<dyn Future<Output = OrchestratorResult<T>> + Send + 'a>>;

pub trait Orchestrator: Send + Sync {
    /// Current replica count on `node`, or `None` when its workload object
    /// does not exist.
    fn get_replica_count<'a>(&'a self, node: &'a str) -> OrchestratorFuture<'a, Option<u32>>;

    /// Scale the node's workload. Fails with `NotFound` when it is absent.
    fn set_replica_count<'a>(&'a self, node: &'a str, replicas: u32) -> OrchestratorFuture<'a, ()>;

    /// Create the node's workload. Fails with `AlreadyExists` when present.
    fn create_workload<'a>(&'a self, node: &'a str, replicas: u32) -> OrchestratorFuture<'a, ()>;

    /// Remove the node's workload. An absent workload is not an error.
    fn delete_workload<'a>(&'a self, node: &'a str) -> OrchestratorFuture<'a, ()>;
}
