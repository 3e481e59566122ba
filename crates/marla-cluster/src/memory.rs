//! In-memory orchestrator that records every call.

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::Mutex;

use marla_state::NodeId;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::orchestrator::{Orchestrator, OrchestratorFuture};

/// One call received by an [`InMemoryCluster`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Get { node: NodeId },
    Set { node: NodeId, replicas: u32 },
    Create { node: NodeId, replicas: u32 },
    Delete { node: NodeId },
}

impl Operation {
    pub fn node(&self) -> &str {
        match self {
            Operation::Get { node }
            | Operation::Set { node, .. }
            | Operation::Create { node, .. }
            | Operation::Delete { node } => node,
        }
    }

    /// Whether the call changes cluster state (anything but a read).
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Operation::Get { .. })
    }
}

#[derive(Debug, Default)]
struct Inner {
    workloads: BTreeMap<NodeId, u32>,
    operations: Vec<Operation>,
    failing: BTreeSet<NodeId>,
    hanging: BTreeSet<NodeId>,
}

/// Orchestrator over an in-process map of node → replica count.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    inner: Mutex<Inner>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing workload on `node`.
    pub fn with_workload(mut self, node: impl Into<NodeId>, replicas: u32) -> Self {
        self.inner.get_mut().workloads.insert(node.into(), replicas);
        self
    }

    /// Make every call addressing `node` fail with an API error.
    pub async fn fail_node(&self, node: impl Into<NodeId>) {
        self.inner.lock().await.failing.insert(node.into());
    }

    /// Make every call addressing `node` never complete.
    pub async fn hang_node(&self, node: impl Into<NodeId>) {
        self.inner.lock().await.hanging.insert(node.into());
    }

    pub async fn heal_node(&self, node: &str) {
        let mut inner = self.inner.lock().await;
        inner.failing.remove(node);
        inner.hanging.remove(node);
    }

    /// Replica count of the node's workload, `None` when absent.
    pub async fn replicas(&self, node: &str) -> Option<u32> {
        self.inner.lock().await.workloads.get(node).copied()
    }

    pub async fn operations(&self) -> Vec<Operation> {
        self.inner.lock().await.operations.clone()
    }

    /// Recorded calls excluding reads.
    pub async fn mutations(&self) -> Vec<Operation> {
        self.inner
            .lock()
            .await
            .operations
            .iter()
            .filter(|op| op.is_mutation())
            .cloned()
            .collect()
    }

    pub async fn clear_operations(&self) {
        self.inner.lock().await.operations.clear();
    }

    async fn apply<T>(
        &self,
        op: Operation,
        f: impl FnOnce(&mut BTreeMap<NodeId, u32>) -> OrchestratorResult<T>,
    ) -> OrchestratorResult<T> {
        let node = op.node().to_string();
        let hang = {
            let mut inner = self.inner.lock().await;
            inner.operations.push(op);
            if inner.failing.contains(&node) {
                return Err(OrchestratorError::Api(format!("injected failure on {node}")));
            }
            inner.hanging.contains(&node)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let mut inner = self.inner.lock().await;
        f(&mut inner.workloads)
    }
}

impl Orchestrator for InMemoryCluster {
    fn get_replica_count<'a>(&'a self, node: &'a str) -> OrchestratorFuture<'a, Option<u32>> {
        Box::pin(self.apply(Operation::Get { node: node.to_string() }, move |w| {
            Ok(w.get(node).copied())
        }))
    }

    fn set_replica_count<'a>(&'a self, node: &'a str, replicas: u32) -> OrchestratorFuture<'a, ()> {
        let op = Operation::Set {
            node: node.to_string(),
            replicas,
        };
        Box::pin(self.apply(op, move |w| match w.get_mut(node) {
            Some(count) => {
                *count = replicas;
                Ok(())
            }
            None => Err(OrchestratorError::NotFound(node.to_string())),
        }))
    }

    fn create_workload<'a>(&'a self, node: &'a str, replicas: u32) -> OrchestratorFuture<'a, ()> {
        let op = Operation::Create {
            node: node.to_string(),
            replicas,
        };
        Box::pin(self.apply(op, move |w| {
            if w.contains_key(node) {
                return Err(OrchestratorError::AlreadyExists(node.to_string()));
            }
            w.insert(node.to_string(), replicas);
            Ok(())
        }))
    }

    fn delete_workload<'a>(&'a self, node: &'a str) -> OrchestratorFuture<'a, ()> {
        Box::pin(self.apply(Operation::Delete { node: node.to_string() }, move |w| {
            w.remove(node);
            Ok(())
        }))
    }
}
