//! Participant transaction engine
//!
//! The local state machine per transaction id:
//!
//! ```text
//! (absent) --begin/prepare--> ACTIVE --prepare OK--> PREPARED --commit--> COMMITTED
//!                               |                      |
//!                               | prepare fail         +--abort--> ABORTED
//!                               +--abort/sweep--> ABORTED
//! ```
//!
//! The transactions map and lock table live behind one mutex; operations on
//! them are short and constant-time. The hard invariant: a transaction is
//! PREPARED only with its journal record synced and all its locks held, so
//! either decision can be honored after a crash.

use crate::config::ParticipantConfig;
use crate::error::{ParticipantError, Result};
use crate::storage::lock::{LockAttempt, LockTable};
use crate::storage::Store;
use crate::transaction::LocalTransaction;
use pact_common::protocol::LocalTxState;
use pact_common::{Operation, TxId};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{info, warn};

/// Outcome of a prepare call: the vote sent back to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    Yes,
    No { reason: String },
}

#[derive(Default)]
struct EngineState {
    transactions: HashMap<TxId, LocalTransaction>,
    locks: LockTable,
}

/// The participant's resource manager
pub struct ParticipantEngine {
    config: ParticipantConfig,
    state: Mutex<EngineState>,
    store: Store,
}

impl ParticipantEngine {
    /// Open the engine, recovering any prepared transactions from the journal
    pub fn open(config: ParticipantConfig) -> Result<Self> {
        let store = Store::open(&config.data_dir)?;

        let mut state = EngineState::default();
        for (tx_id, ops) in store.journal_scan()? {
            let mut tx = LocalTransaction::new(tx_id.clone());
            for op in &ops {
                if let LockAttempt::Acquired = state.locks.acquire(&tx_id, op.key()) {
                    if !tx.locked_keys.iter().any(|k| k == op.key()) {
                        tx.locked_keys.push(op.key().to_string());
                    }
                }
            }
            tx.pending_ops = ops;
            tx.transition(LocalTxState::Prepared);
            info!(tx_id = %tx_id, "recovered prepared transaction from journal");
            state.transactions.insert(tx_id, tx);
        }

        Ok(Self { config, state: Mutex::new(state), store })
    }

    pub fn participant_id(&self) -> &str {
        &self.config.participant_id
    }

    pub fn config(&self) -> &ParticipantConfig {
        &self.config
    }

    /// Create an ACTIVE entry; fails if the id already exists
    pub fn begin(&self, tx_id: TxId) -> Result<()> {
        let mut st = self.state.lock();
        if st.transactions.contains_key(&tx_id) {
            return Err(ParticipantError::IllegalState(format!(
                "transaction {} already exists",
                tx_id
            )));
        }
        st.transactions.insert(tx_id.clone(), LocalTransaction::new(tx_id));
        Ok(())
    }

    /// First-phase vote: lock, validate, buffer, journal
    ///
    /// Any conflict or validation failure releases all locks, marks the
    /// transaction ABORTED, and votes NO. Idempotent for a transaction that
    /// already voted YES.
    pub fn prepare(&self, tx_id: TxId, ops: Vec<Operation>) -> Result<PrepareOutcome> {
        let mut st = self.state.lock();

        match st.transactions.get(&tx_id).map(|t| t.state) {
            Some(LocalTxState::Prepared) => return Ok(PrepareOutcome::Yes),
            Some(LocalTxState::Committed) => {
                return Err(ParticipantError::IllegalState(format!(
                    "transaction {} already committed",
                    tx_id
                )));
            }
            Some(LocalTxState::Aborted) => {
                return Ok(PrepareOutcome::No {
                    reason: format!("transaction {} already aborted", tx_id),
                });
            }
            Some(LocalTxState::Active) | None => {}
        }

        let EngineState { transactions, locks } = &mut *st;
        let tx = transactions
            .entry(tx_id.clone())
            .or_insert_with(|| LocalTransaction::new(tx_id.clone()));

        for op in &ops {
            if let Err(e) = op.validate() {
                locks.release_all(&tx_id);
                tx.clear_buffers();
                tx.transition(LocalTxState::Aborted);
                warn!(tx_id = %tx_id, "prepare rejected: {}", e);
                return Ok(PrepareOutcome::No { reason: format!("validation failed: {}", e) });
            }
            match locks.acquire(&tx_id, op.key()) {
                LockAttempt::Acquired => {
                    if !tx.locked_keys.iter().any(|k| k == op.key()) {
                        tx.locked_keys.push(op.key().to_string());
                    }
                }
                LockAttempt::Conflict { holder } => {
                    locks.release_all(&tx_id);
                    tx.clear_buffers();
                    tx.transition(LocalTxState::Aborted);
                    info!(tx_id = %tx_id, key = op.key(), holder = %holder, "prepare lost lock race");
                    return Ok(PrepareOutcome::No {
                        reason: format!("lock conflict on {} held by {}", op.key(), holder),
                    });
                }
            }
        }

        tx.pending_ops = ops;

        // Durability point: the YES vote is only returned once the journal
        // record has been synced.
        if let Err(e) = self.store.journal_put(&tx_id, &tx.pending_ops) {
            locks.release_all(&tx_id);
            tx.clear_buffers();
            tx.transition(LocalTxState::Aborted);
            return Err(e);
        }

        tx.transition(LocalTxState::Prepared);
        info!(tx_id = %tx_id, keys = tx.locked_keys.len(), "prepared");
        Ok(PrepareOutcome::Yes)
    }

    /// Second-phase commit: apply the buffered batch, retire the journal
    /// record, release locks
    ///
    /// A commit on COMMITTED is a no-op success; on ABORTED it is an illegal
    /// state, distinguishable from an unknown transaction.
    pub fn commit(&self, tx_id: &TxId) -> Result<()> {
        let mut st = self.state.lock();
        let EngineState { transactions, locks } = &mut *st;
        let tx = transactions
            .get_mut(tx_id)
            .ok_or_else(|| ParticipantError::UnknownTransaction(tx_id.clone()))?;

        match tx.state {
            LocalTxState::Committed => return Ok(()),
            LocalTxState::Prepared => {}
            state => {
                return Err(ParticipantError::IllegalState(format!(
                    "cannot commit transaction {} in state {:?}",
                    tx_id, state
                )));
            }
        }

        self.store.apply_commit(tx_id, &tx.pending_ops)?;

        locks.release_all(tx_id);
        tx.clear_buffers();
        tx.transition(LocalTxState::Committed);
        info!(tx_id = %tx_id, "committed");
        Ok(())
    }

    /// Second-phase abort: discard the buffer, retire the journal record,
    /// release locks; idempotent, and safe on an absent transaction
    pub fn abort(&self, tx_id: &TxId) -> Result<()> {
        let mut st = self.state.lock();
        let EngineState { transactions, locks } = &mut *st;
        let tx = match transactions.get_mut(tx_id) {
            Some(tx) => tx,
            None => return Ok(()),
        };

        match tx.state {
            LocalTxState::Aborted => return Ok(()),
            LocalTxState::Committed => {
                return Err(ParticipantError::IllegalState(format!(
                    "cannot abort committed transaction {}",
                    tx_id
                )));
            }
            LocalTxState::Active | LocalTxState::Prepared => {}
        }

        self.store.journal_remove(tx_id)?;
        locks.release_all(tx_id);
        tx.clear_buffers();
        tx.transition(LocalTxState::Aborted);
        info!(tx_id = %tx_id, "aborted");
        Ok(())
    }

    /// Current state of a transaction, if known
    pub fn status(&self, tx_id: &TxId) -> Option<LocalTxState> {
        self.state.lock().transactions.get(tx_id).map(|t| t.state)
    }

    /// Read the last committed value; bypasses the lock table (no read locks)
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.store.get(key)
    }

    /// Write a value outside any transaction (startup seeding)
    pub fn seed(&self, key: &str, value: &str) -> Result<()> {
        self.store.put(key, value)
    }

    /// Transactions still awaiting a decision, for the recovery inquiry
    pub fn prepared_transactions(&self) -> Vec<TxId> {
        self.state
            .lock()
            .transactions
            .values()
            .filter(|t| t.state == LocalTxState::Prepared)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Number of known transactions (health reporting)
    pub fn transaction_count(&self) -> usize {
        self.state.lock().transactions.len()
    }

    /// Abort ACTIVE transactions that have outlived the prepare timeout
    ///
    /// PREPARED transactions are never swept: after voting YES the
    /// participant blocks until the coordinator decides.
    pub fn sweep_expired(&self) -> Result<usize> {
        let stale: Vec<TxId> = {
            let st = self.state.lock();
            st.transactions
                .values()
                .filter(|t| {
                    t.state == LocalTxState::Active
                        && t.updated_at.elapsed() > self.config.prepare_timeout
                })
                .map(|t| t.id.clone())
                .collect()
        };

        for tx_id in &stale {
            warn!(tx_id = %tx_id, "aborting transaction that never reached prepare in time");
            self.abort(tx_id)?;
        }
        Ok(stale.len())
    }

    /// Whether a resource key is currently locked
    pub fn is_locked(&self, key: &str) -> bool {
        self.state.lock().locks.is_locked(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> ParticipantEngine {
        ParticipantEngine::open(ParticipantConfig::new("p1", dir.path())).unwrap()
    }

    fn tx(name: &str) -> TxId {
        TxId::parse(name).unwrap()
    }

    fn write(key: &str, value: &str) -> Operation {
        Operation::Write { key: key.to_string(), value: value.to_string() }
    }

    #[test]
    fn test_prepare_commit_applies_buffer() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let t1 = tx("t1");

        let outcome = engine
            .prepare(t1.clone(), vec![write("x", "1"), write("y", "2")])
            .unwrap();
        assert_eq!(outcome, PrepareOutcome::Yes);
        assert_eq!(engine.status(&t1), Some(LocalTxState::Prepared));
        assert!(engine.is_locked("x"));

        // Nothing visible before the decision
        assert_eq!(engine.get("x").unwrap(), None);

        engine.commit(&t1).unwrap();
        assert_eq!(engine.status(&t1), Some(LocalTxState::Committed));
        assert_eq!(engine.get("x").unwrap(), Some("1".to_string()));
        assert_eq!(engine.get("y").unwrap(), Some("2".to_string()));
        assert!(!engine.is_locked("x"));
    }

    #[test]
    fn test_begin_twice_fails() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.begin(tx("t1")).unwrap();
        assert!(matches!(
            engine.begin(tx("t1")),
            Err(ParticipantError::IllegalState(_))
        ));
    }

    #[test]
    fn test_prepare_conflict_votes_no_and_aborts() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let t1 = tx("t1");
        let t2 = tx("t2");

        assert_eq!(
            engine.prepare(t1.clone(), vec![write("x", "1")]).unwrap(),
            PrepareOutcome::Yes
        );

        let outcome = engine
            .prepare(t2.clone(), vec![write("a", "0"), write("x", "2")])
            .unwrap();
        match outcome {
            PrepareOutcome::No { reason } => assert!(reason.contains("lock conflict")),
            other => panic!("expected NO, got {:?}", other),
        }

        // Loser released everything it grabbed, winner keeps its lock
        assert_eq!(engine.status(&t2), Some(LocalTxState::Aborted));
        assert!(!engine.is_locked("a"));
        assert!(engine.is_locked("x"));
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let t1 = tx("t1");
        let ops = vec![write("x", "1")];

        assert_eq!(engine.prepare(t1.clone(), ops.clone()).unwrap(), PrepareOutcome::Yes);
        assert_eq!(engine.prepare(t1.clone(), ops).unwrap(), PrepareOutcome::Yes);
    }

    #[test]
    fn test_prepare_validation_failure() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let t1 = tx("t1");

        let outcome = engine
            .prepare(t1.clone(), vec![write("x", "1"), Operation::Read { key: String::new() }])
            .unwrap();
        match outcome {
            PrepareOutcome::No { reason } => assert!(reason.contains("validation")),
            other => panic!("expected NO, got {:?}", other),
        }
        assert_eq!(engine.status(&t1), Some(LocalTxState::Aborted));
        assert!(!engine.is_locked("x"));
    }

    #[test]
    fn test_commit_legality() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let t1 = tx("t1");

        // Absent: unknown transaction
        assert!(matches!(
            engine.commit(&t1),
            Err(ParticipantError::UnknownTransaction(_))
        ));

        // Active (not yet prepared): illegal state
        engine.begin(t1.clone()).unwrap();
        assert!(matches!(
            engine.commit(&t1),
            Err(ParticipantError::IllegalState(_))
        ));

        // Aborted: illegal state, distinguishable from unknown
        engine.abort(&t1).unwrap();
        assert!(matches!(
            engine.commit(&t1),
            Err(ParticipantError::IllegalState(_))
        ));
    }

    #[test]
    fn test_commit_idempotent() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let t1 = tx("t1");

        engine.prepare(t1.clone(), vec![write("x", "1")]).unwrap();
        engine.commit(&t1).unwrap();
        engine.commit(&t1).unwrap();
        assert_eq!(engine.get("x").unwrap(), Some("1".to_string()));
    }

    #[test]
    fn test_abort_idempotent_and_safe_on_absent() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let t1 = tx("t1");

        engine.abort(&t1).unwrap();

        engine.prepare(t1.clone(), vec![write("x", "1")]).unwrap();
        engine.abort(&t1).unwrap();
        engine.abort(&t1).unwrap();
        assert_eq!(engine.status(&t1), Some(LocalTxState::Aborted));
        assert!(!engine.is_locked("x"));
        assert_eq!(engine.get("x").unwrap(), None);
    }

    #[test]
    fn test_abort_on_committed_is_illegal() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let t1 = tx("t1");

        engine.prepare(t1.clone(), vec![write("x", "1")]).unwrap();
        engine.commit(&t1).unwrap();
        assert!(matches!(
            engine.abort(&t1),
            Err(ParticipantError::IllegalState(_))
        ));
    }

    #[test]
    fn test_read_ops_lock_but_do_not_write() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let t1 = tx("t1");

        engine.seed("x", "orig").unwrap();
        engine
            .prepare(t1.clone(), vec![Operation::Read { key: "x".to_string() }])
            .unwrap();
        assert!(engine.is_locked("x"));

        engine.commit(&t1).unwrap();
        assert_eq!(engine.get("x").unwrap(), Some("orig".to_string()));
    }

    #[test]
    fn test_sweep_aborts_only_stale_active() {
        let dir = TempDir::new().unwrap();
        let mut config = ParticipantConfig::new("p1", dir.path());
        config.prepare_timeout = Duration::from_millis(0);
        let engine = ParticipantEngine::open(config).unwrap();

        let active = tx("t-active");
        let prepared = tx("t-prepared");
        engine.begin(active.clone()).unwrap();
        engine.prepare(prepared.clone(), vec![write("x", "1")]).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        let swept = engine.sweep_expired().unwrap();
        assert_eq!(swept, 1);
        assert_eq!(engine.status(&active), Some(LocalTxState::Aborted));
        // A YES voter is never swept
        assert_eq!(engine.status(&prepared), Some(LocalTxState::Prepared));
    }
}
