//! Crash-recovery tests for the participant engine
//!
//! A restart is simulated by dropping the engine and reopening it on the
//! same data directory: whatever the journal and store made durable is
//! exactly what the next incarnation sees.

use pact_common::protocol::LocalTxState;
use pact_common::{Operation, TxId};
use pact_participant::{ParticipantConfig, ParticipantEngine, PrepareOutcome};
use tempfile::TempDir;

fn open(dir: &TempDir) -> ParticipantEngine {
    ParticipantEngine::open(ParticipantConfig::new("p1", dir.path())).unwrap()
}

fn tx(name: &str) -> TxId {
    TxId::parse(name).unwrap()
}

fn write(key: &str, value: &str) -> Operation {
    Operation::Write { key: key.to_string(), value: value.to_string() }
}

#[test]
fn test_restart_after_yes_restores_prepared_with_locks() {
    let dir = TempDir::new().unwrap();
    let t1 = tx("t1");

    {
        let engine = open(&dir);
        let outcome = engine
            .prepare(t1.clone(), vec![write("x", "1"), Operation::Delete { key: "y".to_string() }])
            .unwrap();
        assert_eq!(outcome, PrepareOutcome::Yes);
        // Crash here: the engine is dropped with the decision outstanding
    }

    let engine = open(&dir);
    assert_eq!(engine.status(&t1), Some(LocalTxState::Prepared));
    assert!(engine.is_locked("x"));
    assert!(engine.is_locked("y"));

    // A competing transaction still loses the lock race after restart
    let outcome = engine.prepare(tx("t2"), vec![write("x", "other")]).unwrap();
    assert!(matches!(outcome, PrepareOutcome::No { .. }));
}

#[test]
fn test_commit_after_restart_applies_exactly_once() {
    let dir = TempDir::new().unwrap();
    let t1 = tx("t1");

    {
        let engine = open(&dir);
        engine.seed("y", "doomed").unwrap();
        engine
            .prepare(t1.clone(), vec![write("x", "1"), Operation::Delete { key: "y".to_string() }])
            .unwrap();
    }

    // The coordinator's commit arrives at the restarted incarnation
    let engine = open(&dir);
    engine.commit(&t1).unwrap();
    assert_eq!(engine.get("x").unwrap(), Some("1".to_string()));
    assert_eq!(engine.get("y").unwrap(), None);
    assert!(!engine.is_locked("x"));

    // Redelivered commit is a no-op success
    engine.commit(&t1).unwrap();
    assert_eq!(engine.get("x").unwrap(), Some("1".to_string()));

    // After a further restart the journal is empty and the data stands
    drop(engine);
    let engine = open(&dir);
    assert_eq!(engine.get("x").unwrap(), Some("1".to_string()));
    assert_eq!(engine.status(&t1), None);
}

#[test]
fn test_abort_after_restart_discards_buffer() {
    let dir = TempDir::new().unwrap();
    let t1 = tx("t1");

    {
        let engine = open(&dir);
        engine.seed("x", "orig").unwrap();
        engine.prepare(t1.clone(), vec![write("x", "new")]).unwrap();
    }

    let engine = open(&dir);
    engine.abort(&t1).unwrap();
    assert_eq!(engine.status(&t1), Some(LocalTxState::Aborted));
    assert_eq!(engine.get("x").unwrap(), Some("orig".to_string()));
    assert!(!engine.is_locked("x"));

    // Nothing to recover on the next restart
    drop(engine);
    let engine = open(&dir);
    assert_eq!(engine.status(&t1), None);
    assert_eq!(engine.get("x").unwrap(), Some("orig".to_string()));
}

#[test]
fn test_decision_immutability_across_restarts() {
    let dir = TempDir::new().unwrap();
    let t1 = tx("t1");

    {
        let engine = open(&dir);
        engine.prepare(t1.clone(), vec![write("x", "1")]).unwrap();
        engine.commit(&t1).unwrap();
    }

    // A committed transaction is never observed aborted: the journal is
    // gone, so the restarted engine has no record to un-decide.
    let engine = open(&dir);
    assert_eq!(engine.status(&t1), None);
    assert_eq!(engine.get("x").unwrap(), Some("1".to_string()));
}
