//! StateStore — redb-backed state persistence for StageGate.
//!
//! Provides typed operations over rollouts, verdict history, rollback
//! actions, and the transition audit trail. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! Verdicts and transitions are append-only: their sequence numbers are
//! assigned inside the write transaction and there is no update or delete
//! path. `update_rollout` refuses to touch a record whose stored status is
//! terminal.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        txn.open_table(VERDICTS).map_err(map_err!(Table))?;
        txn.open_table(TRANSITIONS).map_err(map_err!(Table))?;
        txn.open_table(ACTIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Rollouts ───────────────────────────────────────────────────

    /// Insert a new rollout. Errors if the id already exists or is not
    /// a valid history-key prefix.
    pub fn create_rollout(&self, rollout: &Rollout) -> StateResult<()> {
        validate_id(&rollout.id)?;
        let value = serde_json::to_vec(rollout).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            let exists = table
                .get(rollout.id.as_str())
                .map_err(map_err!(Read))?
                .is_some();
            if exists {
                return Err(StateError::AlreadyExists(rollout.id.clone()));
            }
            table
                .insert(rollout.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(rollout = %rollout.id, "rollout created");
        Ok(())
    }

    /// Update an existing rollout. Refuses to overwrite a record whose
    /// stored status is terminal.
    pub fn update_rollout(&self, rollout: &Rollout) -> StateResult<()> {
        let value = serde_json::to_vec(rollout).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            let stored: Rollout = match table.get(rollout.id.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(rollout.id.clone())),
            };
            if stored.status.is_terminal() {
                return Err(StateError::Terminal(rollout.id.clone()));
            }
            table
                .insert(rollout.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(rollout = %rollout.id, status = %rollout.status, "rollout updated");
        Ok(())
    }

    /// Get a rollout by id.
    pub fn get_rollout(&self, id: &str) -> StateResult<Option<Rollout>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let rollout: Rollout =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(rollout))
            }
            None => Ok(None),
        }
    }

    /// List all rollouts.
    pub fn list_rollouts(&self) -> StateResult<Vec<Rollout>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let rollout: Rollout =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(rollout);
        }
        Ok(results)
    }

    // ── Verdict history (append-only) ──────────────────────────────

    /// Append a verdict to the rollout's history. Returns the assigned
    /// sequence number.
    pub fn append_verdict(&self, verdict: &Verdict) -> StateResult<u64> {
        let value = serde_json::to_vec(verdict).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq;
        {
            let mut table = txn.open_table(VERDICTS).map_err(map_err!(Table))?;
            seq = next_seq(&table, &verdict.rollout_id)?;
            table
                .insert(history_key(&verdict.rollout_id, seq).as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(rollout = %verdict.rollout_id, seq, decision = ?verdict.decision, "verdict appended");
        Ok(seq)
    }

    /// List a rollout's verdicts in append order.
    pub fn list_verdicts(&self, rollout_id: &str) -> StateResult<Vec<Verdict>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VERDICTS).map_err(map_err!(Table))?;
        scan_history(&table, rollout_id)
    }

    /// Number of verdicts recorded for a rollout.
    pub fn verdict_count(&self, rollout_id: &str) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VERDICTS).map_err(map_err!(Table))?;
        next_seq(&table, rollout_id)
    }

    // ── Transition audit trail (append-only) ───────────────────────

    /// Append a transition event to the rollout's audit trail.
    pub fn append_transition(&self, event: &TransitionEvent) -> StateResult<u64> {
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq;
        {
            let mut table = txn.open_table(TRANSITIONS).map_err(map_err!(Table))?;
            seq = next_seq(&table, &event.rollout_id)?;
            table
                .insert(history_key(&event.rollout_id, seq).as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(seq)
    }

    /// List a rollout's transition events in append order.
    pub fn list_transitions(&self, rollout_id: &str) -> StateResult<Vec<TransitionEvent>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TRANSITIONS).map_err(map_err!(Table))?;
        scan_history(&table, rollout_id)
    }

    // ── Rollback actions ───────────────────────────────────────────

    /// Store the current rollback action for a rollout.
    pub fn put_rollback_action(&self, action: &RollbackAction) -> StateResult<()> {
        let value = serde_json::to_vec(action).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            table
                .insert(action.rollout_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(rollout = %action.rollout_id, outcome = ?action.outcome, attempts = action.attempts,
               "rollback action stored");
        Ok(())
    }

    /// Get the current rollback action for a rollout, if any.
    pub fn get_rollback_action(&self, rollout_id: &str) -> StateResult<Option<RollbackAction>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
        match table.get(rollout_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let action: RollbackAction =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(action))
            }
            None => Ok(None),
        }
    }
}

/// History keys are `{rollout_id}:{seq}` with range end `{rollout_id};`,
/// so an id containing either delimiter would interleave its history
/// with another rollout's scan.
fn validate_id(id: &str) -> StateResult<()> {
    if id.is_empty() || id.contains([':', ';']) {
        return Err(StateError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Next sequence number for a rollout in a history table.
fn next_seq<T>(table: &T, rollout_id: &str) -> StateResult<u64>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let start = history_key(rollout_id, 0);
    let end = history_range_end(rollout_id);
    let mut count = 0u64;
    for entry in table
        .range(start.as_str()..end.as_str())
        .map_err(map_err!(Read))?
    {
        entry.map_err(map_err!(Read))?;
        count += 1;
    }
    Ok(count)
}

/// Scan a rollout's history entries in key (append) order.
fn scan_history<T, V>(table: &T, rollout_id: &str) -> StateResult<Vec<V>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
    V: serde::de::DeserializeOwned,
{
    let start = history_key(rollout_id, 0);
    let end = history_range_end(rollout_id);
    let mut results = Vec::new();
    for entry in table
        .range(start.as_str()..end.as_str())
        .map_err(map_err!(Read))?
    {
        let (_, value) = entry.map_err(map_err!(Read))?;
        results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_rollout(id: &str) -> Rollout {
        Rollout {
            id: id.to_string(),
            service: "api".to_string(),
            baseline_version: "v1.9.0".to_string(),
            candidate_version: "v2.0.0".to_string(),
            stages: vec![StageSpec {
                traffic_weight: 10,
                min_duration_secs: 60,
                max_duration_secs: 600,
                required_healthy_windows: 3,
                thresholds: Vec::new(),
            }],
            current_stage: 0,
            status: RolloutStatus::Pending,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_verdict(rollout_id: &str, decision: Decision) -> Verdict {
        Verdict {
            rollout_id: rollout_id.to_string(),
            stage: 0,
            timestamp: 1000,
            decision,
            findings: Vec::new(),
            confidence: 0.0,
            reason: "test".to_string(),
        }
    }

    #[test]
    fn create_get_roundtrip() {
        let store = StateStore::open_in_memory().unwrap();
        let rollout = test_rollout("ro-1");
        store.create_rollout(&rollout).unwrap();

        let loaded = store.get_rollout("ro-1").unwrap().unwrap();
        assert_eq!(loaded, rollout);
        assert!(store.get_rollout("ro-2").unwrap().is_none());
    }

    #[test]
    fn duplicate_create_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_rollout(&test_rollout("ro-1")).unwrap();
        let err = store.create_rollout(&test_rollout("ro-1")).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
    }

    #[test]
    fn ids_with_key_delimiters_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        for id in ["", "a:b", "a;b", "ro-1:0000000001"] {
            let err = store.create_rollout(&test_rollout(id)).unwrap_err();
            assert!(matches!(err, StateError::InvalidId(_)), "id {id:?}");
        }
        // A well-formed id cannot collide with another id's history keys.
        store.create_rollout(&test_rollout("a")).unwrap();
        store.create_rollout(&test_rollout("a-b")).unwrap();
        store.append_verdict(&test_verdict("a", Decision::Hold)).unwrap();
        store.append_verdict(&test_verdict("a-b", Decision::Hold)).unwrap();
        assert_eq!(store.list_verdicts("a").unwrap().len(), 1);
    }

    #[test]
    fn update_missing_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.update_rollout(&test_rollout("ro-1")).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn terminal_rollout_is_immutable() {
        let store = StateStore::open_in_memory().unwrap();
        let mut rollout = test_rollout("ro-1");
        store.create_rollout(&rollout).unwrap();

        rollout.status = RolloutStatus::Promoted;
        store.update_rollout(&rollout).unwrap();

        rollout.status = RolloutStatus::Progressing;
        let err = store.update_rollout(&rollout).unwrap_err();
        assert!(matches!(err, StateError::Terminal(_)));
    }

    #[test]
    fn verdict_history_appends_in_order() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.append_verdict(&test_verdict("ro-1", Decision::Hold)).unwrap(), 0);
        assert_eq!(store.append_verdict(&test_verdict("ro-1", Decision::Hold)).unwrap(), 1);
        assert_eq!(store.append_verdict(&test_verdict("ro-1", Decision::Promote)).unwrap(), 2);
        // Another rollout's history is independent.
        assert_eq!(store.append_verdict(&test_verdict("ro-2", Decision::Rollback)).unwrap(), 0);

        let verdicts = store.list_verdicts("ro-1").unwrap();
        assert_eq!(verdicts.len(), 3);
        assert_eq!(verdicts[2].decision, Decision::Promote);
        assert_eq!(store.verdict_count("ro-1").unwrap(), 3);
        assert_eq!(store.verdict_count("ro-2").unwrap(), 1);
    }

    #[test]
    fn transition_trail_roundtrip() {
        let store = StateStore::open_in_memory().unwrap();
        let event = TransitionEvent {
            rollout_id: "ro-1".to_string(),
            from: RolloutStatus::Pending,
            to: RolloutStatus::Validating,
            timestamp: 1000,
            reason: "gate invoked".to_string(),
        };
        store.append_transition(&event).unwrap();
        let trail = store.list_transitions("ro-1").unwrap();
        assert_eq!(trail, vec![event]);
    }

    #[test]
    fn rollback_action_roundtrip() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_rollback_action("ro-1").unwrap().is_none());

        let action = RollbackAction {
            rollout_id: "ro-1".to_string(),
            reason: "fast_fail:error_rate".to_string(),
            attempts: 1,
            outcome: RollbackOutcome::Retrying,
            started_at: 1000,
            finished_at: None,
        };
        store.put_rollback_action(&action).unwrap();
        let loaded = store.get_rollback_action("ro-1").unwrap().unwrap();
        assert!(loaded.in_flight());
        assert_eq!(loaded, action);
    }

    #[test]
    fn persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stagegate.redb");
        {
            let store = StateStore::open(&path).unwrap();
            store.create_rollout(&test_rollout("ro-1")).unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        assert!(store.get_rollout("ro-1").unwrap().is_some());
    }
}
