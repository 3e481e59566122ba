//! Reconciler — drives live per-node counts toward a desired plan.
//!
//! Nodes are partitioned into scale-ups, scale-downs and unchanged. Every
//! scale-up is issued before any scale-down, with a settle delay between
//! the two phases, so serving capacity never dips below the target while
//! replicas move. Each node operation is bounded by `call_timeout`; a
//! failure on one node is recorded and the others still proceed.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use marla_state::{NodeAction, NodeId, NodeOutcome, ReplicaPlan};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::orchestrator::Orchestrator;

/// What to do with a node whose desired count is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroReplicaPolicy {
    /// Keep the workload object, scaled to zero replicas.
    #[default]
    ScaleToZero,
    /// Remove the workload object entirely.
    Delete,
}

// ── Live state ─────────────────────────────────────────────────────

/// Observed state of one node's workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    /// No workload object exists.
    Absent,
    /// Workload exists with this many replicas.
    Running(u32),
    /// The read failed; the node is skipped this cycle.
    Unknown(String),
}

/// Per-node observation taken at the start of a reconcile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveState {
    nodes: BTreeMap<NodeId, NodeState>,
}

impl LiveState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, node: impl Into<NodeId>, state: NodeState) -> Self {
        self.nodes.insert(node.into(), state);
        self
    }

    pub fn state(&self, node: &str) -> Option<&NodeState> {
        self.nodes.get(node)
    }

    /// Live replica count, absent counting as zero. `None` when unknown.
    pub fn count(&self, node: &str) -> Option<u32> {
        match self.nodes.get(node) {
            None | Some(NodeState::Absent) => Some(0),
            Some(NodeState::Running(n)) => Some(*n),
            Some(NodeState::Unknown(_)) => None,
        }
    }

    pub fn exists(&self, node: &str) -> bool {
        matches!(self.nodes.get(node), Some(NodeState::Running(_)))
    }

    /// Plan of every node whose count is known.
    pub fn known_plan(&self) -> ReplicaPlan {
        self.nodes
            .keys()
            .filter_map(|node| self.count(node).map(|c| (node.clone(), c)))
            .collect()
    }

    pub fn unknown_nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .filter(|(_, s)| matches!(s, NodeState::Unknown(_)))
            .map(|(n, _)| n.as_str())
    }

    fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }
}

// ── Report ─────────────────────────────────────────────────────────

/// Result of one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// One entry per node considered, in the order operations were issued.
    pub outcomes: Vec<NodeOutcome>,
    /// Mutating orchestrator calls issued (reads excluded).
    pub operations_issued: usize,
}

impl ReconcileReport {
    /// `previous` with every successfully reconciled node set to its new
    /// count. Failed nodes keep their previous value.
    pub fn applied_plan(&self, previous: &ReplicaPlan) -> ReplicaPlan {
        let mut plan = previous.clone();
        for outcome in self.outcomes.iter().filter(|o| o.succeeded()) {
            plan.set(outcome.node.clone(), outcome.to);
        }
        plan
    }

    /// Whether any node was actually changed.
    pub fn changed(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.succeeded() && o.action != NodeAction::Unchanged)
    }

    /// Whether at least one node operation failed.
    pub fn is_partial(&self) -> bool {
        self.outcomes.iter().any(|o| !o.succeeded())
    }

    pub fn failures(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }
}

// ── Reconciler ─────────────────────────────────────────────────────

pub struct Reconciler {
    orchestrator: Arc<dyn Orchestrator>,
    settle_delay: Duration,
    call_timeout: Duration,
    zero_policy: ZeroReplicaPolicy,
}

impl Reconciler {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            orchestrator,
            settle_delay: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
            zero_policy: ZeroReplicaPolicy::ScaleToZero,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_zero_policy(mut self, policy: ZeroReplicaPolicy) -> Self {
        self.zero_policy = policy;
        self
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        node: &str,
        fut: impl Future<Output = OrchestratorResult<T>>,
    ) -> OrchestratorResult<T> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::Timeout {
                operation,
                node: node.to_string(),
                after: self.call_timeout,
            }),
        }
    }

    /// Read the live replica count of every node.
    pub async fn observe(&self, nodes: &[NodeId]) -> LiveState {
        let mut live = LiveState::new();
        for node in nodes {
            let state = match self
                .call("get", node, self.orchestrator.get_replica_count(node))
                .await
            {
                Ok(Some(count)) => NodeState::Running(count),
                Ok(None) => NodeState::Absent,
                Err(e) => {
                    warn!(node = %node, error = %e, "cannot read live replica count");
                    NodeState::Unknown(e.to_string())
                }
            };
            live.nodes.insert(node.clone(), state);
        }
        live
    }

    /// Move the cluster from `live` to `desired`, scale-ups first.
    pub async fn reconcile(&self, desired: &ReplicaPlan, live: &LiveState) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let nodes: BTreeSet<&str> = desired.nodes().chain(live.nodes()).collect();

        let mut ups = Vec::new();
        let mut downs = Vec::new();
        let mut unchanged = Vec::new();

        for node in nodes {
            let to = desired.get(node);
            let Some(from) = live.count(node) else {
                let reason = match live.state(node) {
                    Some(NodeState::Unknown(reason)) => reason.clone(),
                    _ => "live count unknown".to_string(),
                };
                warn!(node, to, "skipping node with unknown live count");
                report.outcomes.push(NodeOutcome {
                    node: node.to_string(),
                    from: 0,
                    to,
                    action: NodeAction::Failed,
                    error: Some(reason),
                });
                continue;
            };
            match to.cmp(&from) {
                std::cmp::Ordering::Greater => ups.push((node, from, to)),
                std::cmp::Ordering::Less => downs.push((node, from, to)),
                std::cmp::Ordering::Equal => unchanged.push((node, from)),
            }
        }

        for &(node, from, to) in &ups {
            let outcome = self.scale_up(node, from, to, live.exists(node), &mut report.operations_issued).await;
            report.outcomes.push(outcome);
        }

        if !ups.is_empty() && !downs.is_empty() && !self.settle_delay.is_zero() {
            debug!(delay_ms = self.settle_delay.as_millis() as u64, "waiting for scale-ups to settle");
            tokio::time::sleep(self.settle_delay).await;
        }

        for &(node, from, to) in &downs {
            let outcome = self.scale_down(node, from, to, &mut report.operations_issued).await;
            report.outcomes.push(outcome);
        }

        for (node, count) in unchanged {
            report.outcomes.push(NodeOutcome {
                node: node.to_string(),
                from: count,
                to: count,
                action: NodeAction::Unchanged,
                error: None,
            });
        }

        if report.is_partial() {
            warn!(
                plan = %desired,
                failed = report.failures().count(),
                issued = report.operations_issued,
                "plan partially applied"
            );
        } else if report.changed() {
            info!(plan = %desired, issued = report.operations_issued, "plan applied");
        }
        report
    }

    async fn scale_up(&self, node: &str, from: u32, to: u32, exists: bool, issued: &mut usize) -> NodeOutcome {
        let result = if exists {
            self.set_or_create(node, to, issued).await
        } else {
            self.create_or_set(node, to, issued).await
        };
        match result {
            Ok(action) => {
                info!(node, from, to, ?action, "scaled up");
                outcome(node, from, to, action, None)
            }
            Err(e) => {
                warn!(node, from, to, error = %e, "scale-up failed");
                outcome(node, from, to, NodeAction::Failed, Some(e.to_string()))
            }
        }
    }

    async fn scale_down(&self, node: &str, from: u32, to: u32, issued: &mut usize) -> NodeOutcome {
        let result = if to == 0 && self.zero_policy == ZeroReplicaPolicy::Delete {
            *issued += 1;
            self.call("delete", node, self.orchestrator.delete_workload(node))
                .await
                .map(|()| NodeAction::Deleted)
        } else {
            *issued += 1;
            match self
                .call("set", node, self.orchestrator.set_replica_count(node, to))
                .await
            {
                Ok(()) => Ok(NodeAction::ScaledDown),
                // Already gone: nothing left to shrink.
                Err(OrchestratorError::NotFound(_)) if to == 0 => Ok(NodeAction::ScaledDown),
                Err(OrchestratorError::NotFound(_)) => self.create_or_set(node, to, issued).await,
                Err(e) => Err(e),
            }
        };
        match result {
            Ok(action) => {
                info!(node, from, to, ?action, "scaled down");
                outcome(node, from, to, action, None)
            }
            Err(e) => {
                warn!(node, from, to, error = %e, "scale-down failed");
                outcome(node, from, to, NodeAction::Failed, Some(e.to_string()))
            }
        }
    }

    /// Scale an existing workload, creating it if it turns out to be absent.
    async fn set_or_create(&self, node: &str, to: u32, issued: &mut usize) -> OrchestratorResult<NodeAction> {
        *issued += 1;
        match self
            .call("set", node, self.orchestrator.set_replica_count(node, to))
            .await
        {
            Ok(()) => Ok(NodeAction::ScaledUp),
            Err(OrchestratorError::NotFound(_)) => {
                debug!(node, "workload missing, creating");
                *issued += 1;
                match self
                    .call("create", node, self.orchestrator.create_workload(node, to))
                    .await
                {
                    Ok(()) => Ok(NodeAction::Created),
                    Err(OrchestratorError::AlreadyExists(_)) => {
                        *issued += 1;
                        self.call("set", node, self.orchestrator.set_replica_count(node, to))
                            .await
                            .map(|()| NodeAction::ScaledUp)
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Create an absent workload, scaling it instead if it already exists.
    async fn create_or_set(&self, node: &str, to: u32, issued: &mut usize) -> OrchestratorResult<NodeAction> {
        *issued += 1;
        match self
            .call("create", node, self.orchestrator.create_workload(node, to))
            .await
        {
            Ok(()) => Ok(NodeAction::Created),
            Err(OrchestratorError::AlreadyExists(_)) => {
                debug!(node, "workload already exists, scaling");
                *issued += 1;
                self.call("set", node, self.orchestrator.set_replica_count(node, to))
                    .await
                    .map(|()| NodeAction::ScaledUp)
            }
            Err(e) => Err(e),
        }
    }
}

fn outcome(node: &str, from: u32, to: u32, action: NodeAction, error: Option<String>) -> NodeOutcome {
    NodeOutcome {
        node: node.to_string(),
        from,
        to,
        action,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryCluster, Operation};

    fn nodes() -> Vec<NodeId> {
        vec!["node1".to_string(), "node2".to_string()]
    }

    fn plan(a: u32, b: u32) -> ReplicaPlan {
        ReplicaPlan::new().with("node1", a).with("node2", b)
    }

    fn reconciler(cluster: &Arc<InMemoryCluster>) -> Reconciler {
        Reconciler::new(cluster.clone())
            .with_settle_delay(Duration::from_secs(5))
            .with_call_timeout(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn scale_ups_are_issued_before_scale_downs() {
        let cluster = Arc::new(
            InMemoryCluster::new()
                .with_workload("node1", 3)
                .with_workload("node2", 1)
                .with_workload("node3", 2),
        );
        let r = reconciler(&cluster);
        let all: Vec<NodeId> = ["node1", "node2", "node3"].iter().map(|s| s.to_string()).collect();

        let live = r.observe(&all).await;
        let desired = ReplicaPlan::new().with("node1", 1).with("node2", 3).with("node3", 3);

        let started = tokio::time::Instant::now();
        let report = r.reconcile(&desired, &live).await;
        assert!(started.elapsed() >= Duration::from_secs(5));

        let mutations = cluster.mutations().await;
        assert_eq!(
            mutations,
            vec![
                Operation::Set { node: "node2".into(), replicas: 3 },
                Operation::Set { node: "node3".into(), replicas: 3 },
                Operation::Set { node: "node1".into(), replicas: 1 },
            ]
        );
        assert!(report.changed());
        assert!(!report.is_partial());
        assert_eq!(report.operations_issued, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_settle_delay_without_scale_downs() {
        let cluster = Arc::new(InMemoryCluster::new().with_workload("node1", 1).with_workload("node2", 1));
        let r = reconciler(&cluster);
        let live = r.observe(&nodes()).await;

        let started = tokio::time::Instant::now();
        r.reconcile(&plan(2, 1), &live).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn second_reconcile_issues_nothing() {
        let cluster = Arc::new(InMemoryCluster::new().with_workload("node1", 1).with_workload("node2", 1));
        let r = reconciler(&cluster);

        let live = r.observe(&nodes()).await;
        let first = r.reconcile(&plan(2, 0), &live).await;
        assert!(first.operations_issued > 0);

        let live = r.observe(&nodes()).await;
        let second = r.reconcile(&plan(2, 0), &live).await;
        assert_eq!(second.operations_issued, 0);
        assert!(!second.changed());
        assert!(second.outcomes.iter().all(|o| o.action == NodeAction::Unchanged));
    }

    #[tokio::test(start_paused = true)]
    async fn absent_workload_is_created() {
        let cluster = Arc::new(InMemoryCluster::new().with_workload("node1", 1));
        let r = reconciler(&cluster);

        let live = r.observe(&nodes()).await;
        assert_eq!(live.state("node2"), Some(&NodeState::Absent));

        let report = r.reconcile(&plan(1, 2), &live).await;
        let node2 = report.outcomes.iter().find(|o| o.node == "node2").unwrap();
        assert_eq!(node2.action, NodeAction::Created);
        assert_eq!(cluster.replicas("node2").await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_live_state_falls_back_to_create() {
        let cluster = Arc::new(InMemoryCluster::new());
        let r = reconciler(&cluster);
        // Live state claims the workload exists, but it was removed since.
        let live = LiveState::new().with("node1", NodeState::Running(1));

        let report = r.reconcile(&ReplicaPlan::new().with("node1", 2), &live).await;
        assert_eq!(report.outcomes[0].action, NodeAction::Created);
        assert_eq!(
            cluster.mutations().await,
            vec![
                Operation::Set { node: "node1".into(), replicas: 2 },
                Operation::Create { node: "node1".into(), replicas: 2 },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn create_of_existing_workload_is_not_an_error() {
        let cluster = Arc::new(InMemoryCluster::new().with_workload("node1", 1));
        let r = reconciler(&cluster);
        // Live state missed the workload; create collides and falls back to set.
        let live = LiveState::new().with("node1", NodeState::Absent);

        let report = r.reconcile(&ReplicaPlan::new().with("node1", 3), &live).await;
        assert_eq!(report.outcomes[0].action, NodeAction::ScaledUp);
        assert!(!report.is_partial());
        assert_eq!(cluster.replicas("node1").await, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn one_failing_node_does_not_abort_others() {
        let cluster = Arc::new(InMemoryCluster::new().with_workload("node1", 1).with_workload("node2", 1));
        let r = reconciler(&cluster);
        let live = r.observe(&nodes()).await;
        cluster.fail_node("node1").await;

        let report = r.reconcile(&plan(2, 2), &live).await;
        assert!(report.is_partial());
        assert!(report.changed());
        assert_eq!(cluster.replicas("node2").await, Some(2));

        let applied = report.applied_plan(&plan(1, 1));
        assert_eq!(applied, plan(1, 2));
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.node, "node1");
        assert!(failure.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_call_times_out() {
        let cluster = Arc::new(InMemoryCluster::new().with_workload("node1", 1).with_workload("node2", 1));
        let r = reconciler(&cluster);
        let live = r.observe(&nodes()).await;
        cluster.hang_node("node2").await;

        let report = r.reconcile(&plan(2, 2), &live).await;
        let node2 = report.outcomes.iter().find(|o| o.node == "node2").unwrap();
        assert_eq!(node2.action, NodeAction::Failed);
        assert!(node2.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(cluster.replicas("node1").await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_nodes_are_skipped() {
        let cluster = Arc::new(InMemoryCluster::new().with_workload("node1", 1).with_workload("node2", 1));
        cluster.fail_node("node2").await;
        let r = reconciler(&cluster);

        let live = r.observe(&nodes()).await;
        assert_eq!(live.unknown_nodes().collect::<Vec<_>>(), vec!["node2"]);
        assert_eq!(live.known_plan(), ReplicaPlan::new().with("node1", 1));

        cluster.clear_operations().await;
        let report = r.reconcile(&plan(2, 2), &live).await;
        assert!(report.is_partial());
        assert!(cluster.mutations().await.iter().all(|op| op.node() == "node1"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_scales_down_by_default() {
        let cluster = Arc::new(InMemoryCluster::new().with_workload("node1", 2).with_workload("node2", 1));
        let r = reconciler(&cluster);
        let live = r.observe(&nodes()).await;

        let report = r.reconcile(&plan(2, 0), &live).await;
        assert!(!report.is_partial());
        assert_eq!(cluster.replicas("node2").await, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_deletes_under_delete_policy() {
        let cluster = Arc::new(InMemoryCluster::new().with_workload("node1", 2).with_workload("node2", 1));
        let r = reconciler(&cluster).with_zero_policy(ZeroReplicaPolicy::Delete);
        let live = r.observe(&nodes()).await;

        let report = r.reconcile(&plan(2, 0), &live).await;
        let node2 = report.outcomes.iter().find(|o| o.node == "node2").unwrap();
        assert_eq!(node2.action, NodeAction::Deleted);
        assert_eq!(cluster.replicas("node2").await, None);

        // Deleted workloads read back as zero, so nothing more happens.
        let live = r.observe(&nodes()).await;
        assert_eq!(r.reconcile(&plan(2, 0), &live).await.operations_issued, 0);
    }
}
