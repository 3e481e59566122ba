//! Replica count resolution from an ordered `(rate threshold, replicas)` table.
//!
//! The resolver picks the entry with the greatest threshold not above the
//! forecast. A forecast below every threshold maps to the smallest entry.
//! An unusable table fails closed to a single replica and reports a
//! [`PlacementError::Configuration`] alongside the answer.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PlacementError, PlacementResult};

/// One threshold row.
///
/// Accepts both the config spelling (`rps`, `replicas`) and the lookup
/// file spelling (`RPS`, `Recommended_Replicas`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LookupEntry {
    #[serde(alias = "RPS")]
    pub rps: f64,
    #[serde(alias = "Recommended_Replicas")]
    pub replicas: u32,
}

impl LookupEntry {
    pub fn new(rps: f64, replicas: u32) -> Self {
        Self { rps, replicas }
    }
}

/// Validated lookup table, sorted ascending by threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    entries: Vec<LookupEntry>,
}

impl LookupTable {
    pub fn new(mut entries: Vec<LookupEntry>) -> PlacementResult<Self> {
        if entries.is_empty() {
            return Err(PlacementError::Configuration("table has no entries".into()));
        }
        if let Some(bad) = entries.iter().find(|e| !e.rps.is_finite()) {
            return Err(PlacementError::Configuration(format!(
                "non-finite threshold {}",
                bad.rps
            )));
        }
        if let Some(bad) = entries.iter().find(|e| e.replicas == 0) {
            return Err(PlacementError::Configuration(format!(
                "threshold {} recommends zero replicas",
                bad.rps
            )));
        }

        entries.sort_by(|a, b| a.rps.total_cmp(&b.rps));
        if let Some(pair) = entries.windows(2).find(|w| w[0].rps == w[1].rps) {
            return Err(PlacementError::Configuration(format!(
                "duplicate threshold {}",
                pair[0].rps
            )));
        }
        Ok(Self { entries })
    }

    /// Parse a JSON array of lookup rows.
    pub fn from_json(raw: &str) -> PlacementResult<Self> {
        let entries: Vec<LookupEntry> = serde_json::from_str(raw)
            .map_err(|e| PlacementError::Configuration(format!("invalid lookup JSON: {e}")))?;
        Self::new(entries)
    }

    /// Read and parse a lookup file.
    pub async fn load(path: &Path) -> PlacementResult<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            PlacementError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Replicas for a forecast rate.
    pub fn lookup(&self, rate: f64) -> u32 {
        let idx = self.entries.partition_point(|e| e.rps <= rate);
        let entry = if idx == 0 {
            &self.entries[0]
        } else {
            &self.entries[idx - 1]
        };
        entry.replicas
    }

    pub fn entries(&self) -> &[LookupEntry] {
        &self.entries
    }
}

/// Lookup configuration (the `[lookup]` config section).
///
/// When `path` is set the file wins over the inline table and is re-read
/// on every resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupSettings {
    pub table: Vec<LookupEntry>,
    pub path: Option<PathBuf>,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            table: vec![
                LookupEntry::new(0.0, 1),
                LookupEntry::new(1500.0, 2),
                LookupEntry::new(3000.0, 3),
                LookupEntry::new(4000.0, 4),
            ],
            path: None,
        }
    }
}

/// Outcome of one resolution. `error` is set when the answer is the
/// fail-closed fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub replicas: u32,
    pub error: Option<PlacementError>,
}

#[derive(Debug, Clone)]
enum TableSource {
    Inline(Result<LookupTable, PlacementError>),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ReplicaCountResolver {
    source: TableSource,
}

impl ReplicaCountResolver {
    /// Resolver over a fixed table.
    pub fn new(table: LookupTable) -> Self {
        Self {
            source: TableSource::Inline(Ok(table)),
        }
    }

    /// Resolver that re-reads `path` on every call.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: TableSource::File(path.into()),
        }
    }

    /// Build from config. A malformed inline table is kept as an error and
    /// reported on every resolution rather than refused here.
    pub fn from_settings(settings: &LookupSettings) -> Self {
        match &settings.path {
            Some(path) => Self::from_file(path.clone()),
            None => Self {
                source: TableSource::Inline(LookupTable::new(settings.table.clone())),
            },
        }
    }

    /// Current table, loading it from disk if file-backed.
    pub async fn table(&self) -> PlacementResult<LookupTable> {
        match &self.source {
            TableSource::Inline(table) => table.clone(),
            TableSource::File(path) => LookupTable::load(path).await,
        }
    }

    /// Map a forecast rate to a total replica count (always at least 1).
    pub async fn resolve(&self, rate: f64) -> Resolution {
        match self.table().await {
            Ok(table) => {
                let replicas = table.lookup(rate);
                debug!(rate, replicas, "replica count resolved");
                Resolution {
                    replicas,
                    error: None,
                }
            }
            Err(e) => {
                warn!(rate, error = %e, "lookup table unusable, failing closed to 1 replica");
                Resolution {
                    replicas: 1,
                    error: Some(e),
                }
            }
        }
    }
}
