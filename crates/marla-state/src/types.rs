//! Domain types shared across MARLA.
//!
//! These types describe replica plans, observed request rates, per-node
//! performance predictions, and the decision records written once per
//! control cycle. All types serialize to/from JSON.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Identifier of a worker node in the cluster (e.g. its hostname label).
pub type NodeId = String;

// ── Replica plan ───────────────────────────────────────────────────

/// Assignment of replica counts to nodes.
///
/// Backed by a `BTreeMap` so iteration order is deterministic and there is
/// at most one entry per node. A node without an entry hosts zero replicas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaPlan {
    counts: BTreeMap<NodeId, u32>,
}

impl ReplicaPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// A plan placing `per_node` replicas on every given node.
    pub fn even<I, S>(nodes: I, per_node: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        Self {
            counts: nodes.into_iter().map(|n| (n.into(), per_node)).collect(),
        }
    }

    /// Replica count on a node (zero when absent).
    pub fn get(&self, node: &str) -> u32 {
        self.counts.get(node).copied().unwrap_or(0)
    }

    /// Set the replica count for a node, replacing any previous entry.
    pub fn set(&mut self, node: impl Into<NodeId>, count: u32) {
        self.counts.insert(node.into(), count);
    }

    /// Builder-style variant of [`ReplicaPlan::set`].
    pub fn with(mut self, node: impl Into<NodeId>, count: u32) -> Self {
        self.set(node, count);
        self
    }

    /// Sum of all per-node counts.
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// Nodes with an explicit entry, in sorted order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    /// Iterate `(node, count)` pairs in sorted node order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.counts.iter().map(|(n, c)| (n.as_str(), *c))
    }

    /// Number of nodes in `nodes` whose count is identical in both plans.
    pub fn matches_on<'a>(&self, other: &ReplicaPlan, nodes: impl IntoIterator<Item = &'a str>) -> usize {
        nodes
            .into_iter()
            .filter(|n| self.get(n) == other.get(n))
            .count()
    }

    /// Number of nodes (across both plans) whose count is identical.
    pub fn matches(&self, other: &ReplicaPlan) -> usize {
        let mut nodes: Vec<&str> = self.nodes().chain(other.nodes()).collect();
        nodes.sort_unstable();
        nodes.dedup();
        self.matches_on(other, nodes)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl fmt::Display for ReplicaPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (node, count)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{node}: {count}")?;
        }
        f.write_str("}")
    }
}

impl<S: Into<NodeId>> FromIterator<(S, u32)> for ReplicaPlan {
    fn from_iter<T: IntoIterator<Item = (S, u32)>>(iter: T) -> Self {
        Self {
            counts: iter.into_iter().map(|(n, c)| (n.into(), c)).collect(),
        }
    }
}

// ── Rate samples ───────────────────────────────────────────────────

/// One observed request-rate sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRateSample")]
pub struct RateSample {
    pub timestamp: DateTime<Utc>,
    /// Requests per second; always finite and non-negative.
    pub rate: f64,
}

impl RateSample {
    /// Build a sample, rejecting negative or non-finite rates.
    pub fn new(timestamp: DateTime<Utc>, rate: f64) -> Option<Self> {
        (rate.is_finite() && rate >= 0.0).then_some(Self { timestamp, rate })
    }
}

#[derive(Deserialize)]
struct RawRateSample {
    timestamp: DateTime<Utc>,
    rate: f64,
}

impl TryFrom<RawRateSample> for RateSample {
    type Error = String;

    fn try_from(raw: RawRateSample) -> Result<Self, Self::Error> {
        Self::new(raw.timestamp, raw.rate).ok_or_else(|| format!("invalid rate {}", raw.rate))
    }
}

// ── Performance table ──────────────────────────────────────────────

/// Predicted normalized performance per candidate replica count per node.
///
/// Scores lie in `[0, 1]`, higher is better. A missing `(count, node)`
/// entry means no usable prediction exists for that combination.
/// Deserializing rejects any entry [`PerformanceTable::insert`] would.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PerformanceTable {
    rows: BTreeMap<u32, BTreeMap<NodeId, f64>>,
}

impl PerformanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a prediction. Returns `false` (and stores nothing) for a zero
    /// count or a score outside `[0, 1]`.
    pub fn insert(&mut self, count: u32, node: impl Into<NodeId>, score: f64) -> bool {
        if count == 0 || !(0.0..=1.0).contains(&score) {
            return false;
        }
        self.rows.entry(count).or_default().insert(node.into(), score);
        true
    }

    /// Predicted performance for `count` replicas on `node`.
    pub fn get(&self, count: u32, node: &str) -> Option<f64> {
        self.rows.get(&count).and_then(|row| row.get(node)).copied()
    }

    /// Candidate counts with at least one prediction, ascending.
    pub fn counts(&self) -> impl Iterator<Item = u32> + '_ {
        self.rows.keys().copied()
    }

    /// Iterate `(count, node, score)` entries, counts ascending.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str, f64)> {
        self.rows
            .iter()
            .flat_map(|(count, row)| row.iter().map(move |(node, score)| (*count, node.as_str(), *score)))
    }

    /// Total number of `(count, node)` entries.
    pub fn len(&self) -> usize {
        self.rows.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'de> Deserialize<'de> for PerformanceTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rows = BTreeMap::<u32, BTreeMap<NodeId, f64>>::deserialize(deserializer)?;
        let mut table = Self::new();
        for (count, row) in rows {
            for (node, score) in row {
                if !table.insert(count, node.as_str(), score) {
                    return Err(de::Error::custom(format!(
                        "invalid prediction {score} for {count} replicas on {node}"
                    )));
                }
            }
        }
        Ok(table)
    }
}

impl<S: Into<NodeId>> FromIterator<(u32, S, f64)> for PerformanceTable {
    fn from_iter<T: IntoIterator<Item = (u32, S, f64)>>(iter: T) -> Self {
        let mut table = Self::new();
        for (count, node, score) in iter {
            table.insert(count, node, score);
        }
        table
    }
}

// ── Decision records ───────────────────────────────────────────────

/// What the reconciler did (or failed to do) on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAction {
    Unchanged,
    ScaledUp,
    ScaledDown,
    Created,
    Deleted,
    Failed,
}

/// Per-node reconcile outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub node: NodeId,
    /// Live count observed before reconciling.
    pub from: u32,
    /// Desired count.
    pub to: u32,
    pub action: NodeAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeOutcome {
    pub fn succeeded(&self) -> bool {
        self.action != NodeAction::Failed
    }
}

/// How a completed cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Every node operation succeeded and at least one node changed.
    Applied,
    /// Some node operations failed.
    PartiallyApplied,
    /// The chosen plan already matched the cluster, or the gain was too small.
    NoChange,
    /// A change was chosen but deferred by the cooldown window.
    HeldByCooldown,
    /// The optimizer found nothing usable; the previous plan was kept.
    NoFeasiblePlacement,
}

/// One append-only record per completed control cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Sequence number assigned by the decision log (0 before appending).
    #[serde(default)]
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub forecast_rate: f64,
    pub resolved_replicas: u32,
    pub chosen_plan: ReplicaPlan,
    pub previous_plan: ReplicaPlan,
    pub outcome: CycleOutcome,
    #[serde(default)]
    pub node_outcomes: Vec<NodeOutcome>,
    /// Final (biased) score of the chosen split, when one was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}
