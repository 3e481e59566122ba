//! marla.toml configuration.
//!
//! Every section and field has a default, so a file only needs to name
//! the cluster nodes:
//!
//! ```toml
//! [cluster]
//! nodes = ["node1", "node2"]
//! ```

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use marla_cluster::{ClusterSettings, ZeroReplicaPolicy};
use marla_forecast::{ForecastSettings, HistorySettings};
use marla_placement::{LookupSettings, PlacementPolicy};
use marla_predictor::PredictorSettings;

use crate::error::{ControllerError, ControllerResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub controller: LoopSettings,
    pub history: HistorySettings,
    pub forecast: ForecastSettings,
    pub lookup: LookupSettings,
    pub placement: PlacementPolicy,
    pub predictor: PredictorSettings,
    pub cluster: ClusterSettings,
    pub store: StoreSettings,
    pub api: ApiSettings,
}

/// Control loop timing and action policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    pub interval_secs: u64,
    /// Minimum time between plan changes that do not add capacity.
    pub cooldown_secs: u64,
    /// Minimum raw-score gain for a same-total rebalance.
    pub min_improvement: f64,
    /// Wait between the scale-up and scale-down phases.
    pub settle_delay_secs: u64,
    /// Bound on each orchestrator call.
    pub call_timeout_ms: u64,
    pub zero_policy: ZeroReplicaPolicy,
    /// How long an in-flight cycle may run after shutdown is requested.
    pub shutdown_grace_secs: u64,
    /// Replicas per node in the plan assumed before the first cycle.
    pub initial_replicas_per_node: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            cooldown_secs: 180,
            min_improvement: 0.0,
            settle_delay_secs: 5,
            call_timeout_ms: 10_000,
            zero_policy: ZeroReplicaPolicy::ScaleToZero,
            shutdown_grace_secs: 30,
            initial_replicas_per_node: 1,
        }
    }
}

impl LoopSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Decision log location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("marla-decisions.redb"),
        }
    }
}

/// Status API listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }
}

impl ControllerConfig {
    pub fn from_file(path: &Path) -> ControllerResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ControllerError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ControllerResult<Self> {
        toml::from_str(content).map_err(|e| ControllerError::Config(e.to_string()))
    }

    /// Reject configurations the loop cannot run with.
    pub fn validate(&self) -> ControllerResult<()> {
        let invalid = |msg: String| Err(ControllerError::Config(msg));

        if self.cluster.nodes.is_empty() {
            return invalid("cluster.nodes must name at least one node".into());
        }
        let mut seen = BTreeSet::new();
        for node in &self.cluster.nodes {
            if node.trim().is_empty() {
                return invalid("cluster.nodes contains an empty name".into());
            }
            if !seen.insert(node.as_str()) {
                return invalid(format!("cluster.nodes lists '{node}' twice"));
            }
        }
        if self.controller.interval_secs == 0 {
            return invalid("controller.interval_secs must be positive".into());
        }
        if !self.controller.min_improvement.is_finite() || self.controller.min_improvement < 0.0 {
            return invalid(format!(
                "controller.min_improvement must be a non-negative number, got {}",
                self.controller.min_improvement
            ));
        }
        if self.controller.call_timeout_ms == 0 || self.predictor.timeout_ms == 0 {
            return invalid("timeouts must be positive".into());
        }
        if self.history.max_samples == 0 {
            return invalid("history.max_samples must be positive".into());
        }
        if self.history.rate_log.is_some() && self.history.sample_interval_secs == 0 {
            return invalid("history.sample_interval_secs must be positive".into());
        }
        if let Err(msg) = self.placement.validate() {
            return invalid(format!("placement: {msg}"));
        }
        if let Err(e) = self.forecast.validate() {
            return invalid(format!("forecast: {e}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marla_forecast::ForecastModel;
    use marla_placement::ScoreMetric;

    const SAMPLE: &str = r#"
[controller]
interval_secs = 30
cooldown_secs = 120
zero_policy = "delete"

[history]
rate_log = "/var/lib/marla/rps_schedule.jsonl"

[forecast]
model = "ewma"
alpha = 0.5

[lookup]
table = [
    { rps = 0, replicas = 1 },
    { rps = 2000, replicas = 2 },
]

[placement]
metric = "max"
stability_weight = 0.1

[predictor]
url = "http://predictor:5000"
metrics_urls = { node1 = "http://10.0.0.1:8000/metrics" }

[cluster]
nodes = ["node1", "node2"]
namespace = "bench"

[api]
bind = "0.0.0.0:9191"
"#;

    #[test]
    fn parses_full_config() {
        let config = ControllerConfig::parse(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.controller.interval(), Duration::from_secs(30));
        assert_eq!(config.controller.zero_policy, ZeroReplicaPolicy::Delete);
        assert_eq!(config.forecast.model, ForecastModel::Ewma);
        assert_eq!(config.lookup.table.len(), 2);
        assert_eq!(config.placement.metric, ScoreMetric::Max);
        assert_eq!(config.predictor.metrics_urls["node1"], "http://10.0.0.1:8000/metrics");
        assert_eq!(config.cluster.nodes, vec!["node1", "node2"]);
        assert_eq!(config.api.bind.port(), 9191);
        // Untouched fields keep their defaults.
        assert_eq!(config.controller.settle_delay_secs, 5);
        assert_eq!(config.cluster.deployment_base, "my-nginx");
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = ControllerConfig::parse("[cluster]\nnodes = [\"node1\", \"node2\"]\n").unwrap();
        config.validate().unwrap();
        assert_eq!(config.controller.cooldown(), Duration::from_secs(180));
        assert_eq!(config.forecast.min_samples, 10);
        assert_eq!(config.placement.stability_weight, 0.05);
    }

    #[test]
    fn rejects_missing_or_duplicate_nodes() {
        let empty = ControllerConfig::default();
        assert!(empty.validate().is_err());

        let dup = ControllerConfig::parse("[cluster]\nnodes = [\"a\", \"a\"]\n").unwrap();
        assert!(matches!(dup.validate(), Err(ControllerError::Config(msg)) if msg.contains("twice")));
    }

    #[test]
    fn rejects_zero_interval_and_negative_weight() {
        let mut config = ControllerConfig::parse("[cluster]\nnodes = [\"a\"]\n").unwrap();
        config.controller.interval_secs = 0;
        assert!(config.validate().is_err());

        config.controller.interval_secs = 60;
        config.placement.stability_weight = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_model_is_a_parse_error() {
        let err = ControllerConfig::parse("[forecast]\nmodel = \"arima\"\n").unwrap_err();
        assert!(matches!(err, ControllerError::Config(_)));
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marla.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = ControllerConfig::from_file(&path).unwrap();
        assert_eq!(config.cluster.namespace, "bench");

        assert!(ControllerConfig::from_file(&dir.path().join("absent.toml")).is_err());
    }
}
