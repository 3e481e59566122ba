//! The predictor contract and a fixed-table implementation.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use marla_state::PerformanceTable;

use crate::error::{PredictorError, PredictorResult};

/// Boxed future returned by [`PerformancePredictor::predict`].
pub type PredictFuture<'a> =
    Pin<Box<dyn Future<Output = PredictorResult<PerformanceTable>> + Send + 'a>>;

/// Source of per-node performance predictions.
///
/// Returns boxed futures so the control loop can hold an
/// `Arc<dyn PerformancePredictor>`.
pub trait PerformancePredictor: Send + Sync {
    /// Predict performance at `rate` for every candidate count on every node
    /// the predictor knows about.
    ///
    /// An empty table is a valid answer. Fails with
    /// [`PredictorError::Unavailable`] when the service cannot be reached.
    fn predict<'a>(&'a self, rate: f64, counts: &'a BTreeSet<u32>) -> PredictFuture<'a>;
}

/// Predictor that answers from a fixed table, ignoring the rate.
#[derive(Debug, Clone, Default)]
pub struct StaticPredictor {
    table: PerformanceTable,
}

impl StaticPredictor {
    pub fn new(table: PerformanceTable) -> Self {
        Self { table }
    }

    /// Load a table serialized as `{"<count>": {"<node>": score}}`.
    pub fn from_file(path: &Path) -> PredictorResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PredictorError::StaticTable(format!("{}: {e}", path.display())))?;
        let table: PerformanceTable = serde_json::from_str(&raw)
            .map_err(|e| PredictorError::StaticTable(format!("{}: {e}", path.display())))?;
        Ok(Self { table })
    }

    pub fn table(&self) -> &PerformanceTable {
        &self.table
    }
}

impl PerformancePredictor for StaticPredictor {
    fn predict<'a>(&'a self, _rate: f64, counts: &'a BTreeSet<u32>) -> PredictFuture<'a> {
        Box::pin(async move {
            let table: PerformanceTable = self
                .table
                .iter()
                .filter(|(count, _, _)| counts.contains(count))
                .collect();
            Ok(table)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_predictor_filters_to_requested_counts() {
        let table: PerformanceTable = [(1, "A", 0.9), (2, "A", 0.8), (3, "B", 0.5)]
            .into_iter()
            .collect();
        let predictor = StaticPredictor::new(table);

        let counts = BTreeSet::from([1, 3]);
        let answer = predictor.predict(1800.0, &counts).await.unwrap();
        assert_eq!(answer.get(1, "A"), Some(0.9));
        assert_eq!(answer.get(3, "B"), Some(0.5));
        assert_eq!(answer.get(2, "A"), None);
        assert_eq!(answer.len(), 2);
    }

    #[test]
    fn loads_table_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.json");
        std::fs::write(&path, r#"{"1": {"node1": 0.9, "node2": 0.85}}"#).unwrap();

        let predictor = StaticPredictor::from_file(&path).unwrap();
        assert_eq!(predictor.table().get(1, "node2"), Some(0.85));

        assert!(StaticPredictor::from_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn rejects_table_with_out_of_range_scores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.json");
        std::fs::write(&path, r#"{"1": {"node1": 0.9, "node2": 1.7}}"#).unwrap();

        let err = StaticPredictor::from_file(&path).unwrap_err();
        assert!(matches!(err, PredictorError::StaticTable(msg) if msg.contains("node2")));
    }

    #[test]
    fn usable_as_trait_object() {
        let predictor: Box<dyn PerformancePredictor> = Box::new(StaticPredictor::default());
        let _ = &predictor;
    }
}
