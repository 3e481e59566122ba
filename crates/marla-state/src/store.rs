//! DecisionLog — redb-backed, append-only record of control cycles.
//!
//! Each completed cycle appends exactly one `DecisionRecord`. Records are
//! JSON-serialized into redb's `&[u8]` value column under a sequence number
//! assigned inside the write transaction. There is no update or delete API.
//! The log supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::DECISIONS;
use crate::types::DecisionRecord;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe decision log backed by redb.
#[derive(Clone)]
pub struct DecisionLog {
    db: Arc<Database>,
}

impl DecisionLog {
    /// Open (or create) a persistent decision log at the given path.
    ///
    /// redb locks the file exclusively; opening a path another handle
    /// still holds fails with [`StateError::Open`].
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let log = Self { db: Arc::new(db) };
        log.ensure_tables()?;
        debug!(?path, "decision log opened");
        Ok(log)
    }

    /// Create an ephemeral in-memory decision log (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let log = Self { db: Arc::new(db) };
        log.ensure_tables()?;
        debug!("in-memory decision log opened");
        Ok(log)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(DECISIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Append a record and return the sequence number it was stored under.
    ///
    /// The record's `seq` field is overwritten with the assigned number.
    pub fn append(&self, record: &DecisionRecord) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq;
        {
            let mut table = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
            let last = table
                .last()
                .map_err(map_err!(Read))?
                .map(|(key, _)| key.value())
                .unwrap_or(0);
            seq = last + 1;

            let mut stored = record.clone();
            stored.seq = seq;
            let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
            table
                .insert(seq, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(seq, outcome = ?record.outcome, "decision record appended");
        Ok(seq)
    }

    /// The most recently appended record, if any.
    pub fn latest(&self) -> StateResult<Option<DecisionRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
        match table.last().map_err(map_err!(Read))? {
            Some((_, value)) => {
                let record: DecisionRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Get a record by sequence number.
    pub fn get(&self, seq: u64) -> StateResult<Option<DecisionRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
        match table.get(seq).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: DecisionRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Up to `limit` records, newest first.
    pub fn list_recent(&self, limit: usize) -> StateResult<Vec<DecisionRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev() {
            if results.len() >= limit {
                break;
            }
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: DecisionRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Number of records in the log.
    pub fn len(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
        table.len().map_err(map_err!(Read))
    }

    pub fn is_empty(&self) -> StateResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use chrono::Utc;

    fn test_record(rate: f64, outcome: CycleOutcome) -> DecisionRecord {
        DecisionRecord {
            seq: 0,
            timestamp: Utc::now(),
            forecast_rate: rate,
            resolved_replicas: 2,
            chosen_plan: ReplicaPlan::new().with("node1", 1).with("node2", 1),
            previous_plan: ReplicaPlan::even(["node1", "node2"], 1),
            outcome,
            node_outcomes: vec![NodeOutcome {
                node: "node1".to_string(),
                from: 1,
                to: 1,
                action: NodeAction::Unchanged,
                error: None,
            }],
            score: Some(0.875),
            note: None,
        }
    }

    #[test]
    fn append_assigns_increasing_sequence() {
        let log = DecisionLog::open_in_memory().unwrap();

        let first = log.append(&test_record(100.0, CycleOutcome::NoChange)).unwrap();
        let second = log.append(&test_record(200.0, CycleOutcome::Applied)).unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(log.len().unwrap(), 2);
    }

    #[test]
    fn latest_returns_last_appended() {
        let log = DecisionLog::open_in_memory().unwrap();
        assert!(log.latest().unwrap().is_none());

        log.append(&test_record(100.0, CycleOutcome::NoChange)).unwrap();
        log.append(&test_record(1800.0, CycleOutcome::Applied)).unwrap();

        let latest = log.latest().unwrap().unwrap();
        assert_eq!(latest.seq, 2);
        assert_eq!(latest.forecast_rate, 1800.0);
        assert_eq!(latest.outcome, CycleOutcome::Applied);
    }

    #[test]
    fn list_recent_is_newest_first_and_limited() {
        let log = DecisionLog::open_in_memory().unwrap();
        for i in 0..5 {
            log.append(&test_record(i as f64, CycleOutcome::NoChange)).unwrap();
        }

        let recent = log.list_recent(3).unwrap();
        let seqs: Vec<u64> = recent.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![5, 4, 3]);

        assert_eq!(log.list_recent(50).unwrap().len(), 5);
    }

    #[test]
    fn get_by_sequence() {
        let log = DecisionLog::open_in_memory().unwrap();
        log.append(&test_record(42.0, CycleOutcome::HeldByCooldown)).unwrap();

        let record = log.get(1).unwrap().unwrap();
        assert_eq!(record.forecast_rate, 42.0);
        assert!(log.get(2).unwrap().is_none());
    }

    #[test]
    fn record_fields_survive_storage() {
        let log = DecisionLog::open_in_memory().unwrap();
        let mut record = test_record(1800.0, CycleOutcome::PartiallyApplied);
        record.note = Some("node2: timeout".to_string());
        log.append(&record).unwrap();

        let stored = log.latest().unwrap().unwrap();
        record.seq = 1;
        assert_eq!(stored, record);
    }

    #[test]
    fn second_open_of_held_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("decisions.redb");

        let held = DecisionLog::open(&db_path).unwrap();
        assert!(matches!(DecisionLog::open(&db_path), Err(StateError::Open(_))));

        drop(held);
        assert!(DecisionLog::open(&db_path).is_ok());
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("decisions.redb");

        {
            let log = DecisionLog::open(&db_path).unwrap();
            log.append(&test_record(10.0, CycleOutcome::Applied)).unwrap();
        }

        // Reopen and keep appending after the existing records.
        let log = DecisionLog::open(&db_path).unwrap();
        assert_eq!(log.len().unwrap(), 1);
        let seq = log.append(&test_record(20.0, CycleOutcome::NoChange)).unwrap();
        assert_eq!(seq, 2);
    }

    #[test]
    fn empty_log_operations() {
        let log = DecisionLog::open_in_memory().unwrap();
        assert!(log.is_empty().unwrap());
        assert!(log.list_recent(10).unwrap().is_empty());
        assert!(log.latest().unwrap().is_none());
    }
}
