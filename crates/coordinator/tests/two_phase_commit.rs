//! End-to-end two-phase commit tests
//!
//! The coordinator runs against real participant engines wired through an
//! in-process transport, so every scenario exercises the actual lock table,
//! journal, and state machines without sockets. Unreachable participants
//! and flaky commit delivery are simulated at the transport.

use async_trait::async_trait;
use pact_common::protocol::{
    Assignment, Decision, ExecuteRequest, LocalTxState, PrepareReply, Vote,
};
use pact_common::{Operation, TxId};
use pact_coordinator::decision_log::EndpointBinding;
use pact_coordinator::{
    AckCall, Coordinator, CoordinatorConfig, DecisionLog, ParticipantRegistry,
    ParticipantTransport, PrepareCall, TransportError,
};
use pact_participant::{ParticipantConfig, ParticipantEngine, ParticipantError, PrepareOutcome};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// In-process transport: endpoints map straight onto participant engines
struct TestTransport {
    engines: HashMap<String, Arc<ParticipantEngine>>,
    /// Endpoints that time out on every call
    down: Mutex<HashSet<String>>,
    /// Endpoints whose commit delivery fails (prepare still works)
    failing_commits: Mutex<HashSet<String>>,
}

impl TestTransport {
    fn new(engines: HashMap<String, Arc<ParticipantEngine>>) -> Self {
        Self {
            engines,
            down: Mutex::new(HashSet::new()),
            failing_commits: Mutex::new(HashSet::new()),
        }
    }

    fn engine(&self, endpoint: &str) -> Result<&Arc<ParticipantEngine>, TransportError> {
        if self.down.lock().contains(endpoint) {
            return Err(TransportError::Timeout);
        }
        self.engines
            .get(endpoint)
            .ok_or_else(|| TransportError::Unreachable(endpoint.to_string()))
    }

    fn ack_of(result: Result<(), ParticipantError>) -> AckCall {
        match result {
            Ok(()) => AckCall::Ok,
            Err(e @ ParticipantError::UnknownTransaction(_)) => {
                AckCall::Rejected { status: 404, message: e.to_string() }
            }
            Err(e @ ParticipantError::IllegalState(_)) => {
                AckCall::Rejected { status: 409, message: e.to_string() }
            }
            Err(e) => AckCall::Rejected { status: 500, message: e.to_string() },
        }
    }
}

#[async_trait]
impl ParticipantTransport for TestTransport {
    async fn prepare(
        &self,
        endpoint: &str,
        tx_id: &TxId,
        ops: &[Operation],
        _timeout: Duration,
    ) -> Result<PrepareCall, TransportError> {
        let engine = self.engine(endpoint)?;
        match engine.prepare(tx_id.clone(), ops.to_vec()) {
            Ok(PrepareOutcome::Yes) => {
                Ok(PrepareCall::Vote(PrepareReply { vote: Vote::Yes, reason: None }))
            }
            Ok(PrepareOutcome::No { reason }) => {
                Ok(PrepareCall::Vote(PrepareReply { vote: Vote::No, reason: Some(reason) }))
            }
            Err(e @ ParticipantError::IllegalState(_)) => {
                Ok(PrepareCall::Failed { status: 409, message: e.to_string() })
            }
            Err(e) => Ok(PrepareCall::Failed { status: 500, message: e.to_string() }),
        }
    }

    async fn commit(
        &self,
        endpoint: &str,
        tx_id: &TxId,
        _timeout: Duration,
    ) -> Result<AckCall, TransportError> {
        if self.failing_commits.lock().contains(endpoint) {
            return Err(TransportError::Unreachable(endpoint.to_string()));
        }
        let engine = self.engine(endpoint)?;
        Ok(Self::ack_of(engine.commit(tx_id)))
    }

    async fn abort(
        &self,
        endpoint: &str,
        tx_id: &TxId,
        _timeout: Duration,
    ) -> Result<AckCall, TransportError> {
        let engine = self.engine(endpoint)?;
        Ok(Self::ack_of(engine.abort(tx_id)))
    }

    async fn status(
        &self,
        endpoint: &str,
        tx_id: &TxId,
        _timeout: Duration,
    ) -> Result<LocalTxState, TransportError> {
        let engine = self.engine(endpoint)?;
        engine
            .status(tx_id)
            .ok_or_else(|| TransportError::Malformed(format!("unknown transaction {}", tx_id)))
    }
}

struct Cluster {
    coordinator: Arc<Coordinator>,
    transport: Arc<TestTransport>,
    engines: HashMap<String, Arc<ParticipantEngine>>,
    log_dir: TempDir,
    _data_dirs: Vec<TempDir>,
}

impl Cluster {
    fn engine(&self, participant_id: &str) -> &Arc<ParticipantEngine> {
        &self.engines[participant_id]
    }

    fn endpoint(participant_id: &str) -> String {
        format!("mem://{}", participant_id)
    }
}

fn test_config(log_dir: &TempDir) -> CoordinatorConfig {
    let mut config = CoordinatorConfig::new(log_dir.path());
    config.commit_retry_base = Duration::from_millis(10);
    config.commit_retry_cap = Duration::from_millis(50);
    config
}

fn cluster(participant_ids: &[&str]) -> Cluster {
    let mut engines = HashMap::new();
    let mut by_endpoint = HashMap::new();
    let mut data_dirs = Vec::new();
    let registry = Arc::new(ParticipantRegistry::new());

    for id in participant_ids {
        let dir = TempDir::new().unwrap();
        let engine =
            Arc::new(ParticipantEngine::open(ParticipantConfig::new(*id, dir.path())).unwrap());
        registry.register(*id, Cluster::endpoint(id));
        by_endpoint.insert(Cluster::endpoint(id), engine.clone());
        engines.insert(id.to_string(), engine);
        data_dirs.push(dir);
    }

    let transport = Arc::new(TestTransport::new(by_endpoint));
    let log_dir = TempDir::new().unwrap();
    let log = DecisionLog::open(log_dir.path()).unwrap();
    let coordinator = Arc::new(Coordinator::new(
        test_config(&log_dir),
        registry,
        transport.clone(),
        log,
    ));

    Cluster { coordinator, transport, engines, log_dir, _data_dirs: data_dirs }
}

fn write(key: &str, value: &str) -> Operation {
    Operation::Write { key: key.to_string(), value: value.to_string() }
}

fn assignment(participant_id: &str, ops: Vec<Operation>) -> Assignment {
    Assignment { participant_id: participant_id.to_string(), ops }
}

fn request(tx_id: &str, assignments: Vec<Assignment>) -> ExecuteRequest {
    ExecuteRequest { tx_id: Some(tx_id.to_string()), timeout_ms: None, assignments }
}

#[tokio::test]
async fn test_happy_path_commits_everywhere() {
    let cluster = cluster(&["p1", "p2"]);

    let reply = cluster
        .coordinator
        .execute(request(
            "T1",
            vec![
                assignment("p1", vec![write("x", "1")]),
                assignment("p2", vec![write("y", "2")]),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(reply.decision, Decision::Committed);
    assert_eq!(reply.votes.len(), 2);
    assert!(reply.votes.values().all(|v| v.vote == Vote::Yes));

    assert_eq!(cluster.engine("p1").get("x").unwrap(), Some("1".to_string()));
    assert_eq!(cluster.engine("p2").get("y").unwrap(), Some("2".to_string()));
}

#[tokio::test]
async fn test_lock_conflict_aborts_then_retry_succeeds() {
    let cluster = cluster(&["p1"]);
    let t1 = TxId::parse("T1").unwrap();

    // T1 is prepared and paused before its commit, holding the lock on x
    let outcome = cluster
        .engine("p1")
        .prepare(t1.clone(), vec![write("x", "1")])
        .unwrap();
    assert_eq!(outcome, PrepareOutcome::Yes);

    // T2 loses the no-wait race
    let reply = cluster
        .coordinator
        .execute(request("T2", vec![assignment("p1", vec![write("x", "2")])]))
        .await
        .unwrap();
    assert_eq!(reply.decision, Decision::Aborted);
    let vote = &reply.votes["p1"];
    assert_eq!(vote.vote, Vote::No);
    assert!(vote.reason.as_deref().unwrap().contains("lock conflict"));

    // Once T1 commits, a fresh attempt goes through
    cluster.engine("p1").commit(&t1).unwrap();
    assert_eq!(cluster.engine("p1").get("x").unwrap(), Some("1".to_string()));

    let reply = cluster
        .coordinator
        .execute(request("T2-retry", vec![assignment("p1", vec![write("x", "2")])]))
        .await
        .unwrap();
    assert_eq!(reply.decision, Decision::Committed);
    assert_eq!(cluster.engine("p1").get("x").unwrap(), Some("2".to_string()));
}

#[tokio::test]
async fn test_unreachable_participant_aborts() {
    let cluster = cluster(&["p1", "p2"]);
    cluster.engine("p1").seed("x", "0").unwrap();
    cluster
        .transport
        .down
        .lock()
        .insert(Cluster::endpoint("p2"));

    let mut req = request(
        "T3",
        vec![
            assignment("p1", vec![write("x", "3")]),
            assignment("p2", vec![write("y", "3")]),
        ],
    );
    req.timeout_ms = Some(1_000);

    let reply = cluster.coordinator.execute(req).await.unwrap();
    assert_eq!(reply.decision, Decision::Aborted);
    assert_eq!(reply.votes["p2"].vote, Vote::No);

    // p1 is unchanged and its local transaction was aborted, locks released
    assert_eq!(cluster.engine("p1").get("x").unwrap(), Some("0".to_string()));
    let t3 = TxId::parse("T3").unwrap();
    assert_eq!(cluster.engine("p1").status(&t3), Some(LocalTxState::Aborted));
    assert!(!cluster.engine("p1").is_locked("x"));
}

#[tokio::test]
async fn test_validation_no_vote_aborts_the_other_participant() {
    let cluster = cluster(&["p1", "p2"]);

    // p2's assignment carries an invalid op (empty key): it votes NO
    let reply = cluster
        .coordinator
        .execute(request(
            "T4",
            vec![
                assignment("p1", vec![write("x", "4")]),
                assignment("p2", vec![write("", "4")]),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(reply.decision, Decision::Aborted);
    assert_eq!(reply.votes["p2"].vote, Vote::No);
    assert!(reply.votes["p2"].reason.as_deref().unwrap().contains("validation"));

    let t4 = TxId::parse("T4").unwrap();
    assert_eq!(cluster.engine("p1").status(&t4), Some(LocalTxState::Aborted));
    assert!(!cluster.engine("p1").is_locked("x"));
    assert_eq!(cluster.engine("p1").get("x").unwrap(), None);
}

#[tokio::test]
async fn test_commit_retries_until_participant_acknowledges() {
    let cluster = cluster(&["p1", "p2"]);
    cluster
        .transport
        .failing_commits
        .lock()
        .insert(Cluster::endpoint("p2"));

    // Heal p2's commit path while the coordinator is retrying
    let transport = cluster.transport.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        transport.failing_commits.lock().remove(&Cluster::endpoint("p2"));
    });

    let reply = cluster
        .coordinator
        .execute(request(
            "T5",
            vec![
                assignment("p1", vec![write("x", "5")]),
                assignment("p2", vec![write("y", "5")]),
            ],
        ))
        .await
        .unwrap();

    // The committed decision was delivered to both, exactly once each
    assert_eq!(reply.decision, Decision::Committed);
    assert_eq!(cluster.engine("p1").get("x").unwrap(), Some("5".to_string()));
    assert_eq!(cluster.engine("p2").get("y").unwrap(), Some("5".to_string()));
}

#[tokio::test]
async fn test_concurrent_disjoint_transactions_both_commit() {
    let cluster = cluster(&["p1"]);

    let a = cluster
        .coordinator
        .execute(request("T5", vec![assignment("p1", vec![write("x", "5")])]));
    let b = cluster
        .coordinator
        .execute(request("T6", vec![assignment("p1", vec![write("y", "6")])]));

    let (a, b) = tokio::join!(a, b);
    assert_eq!(a.unwrap().decision, Decision::Committed);
    assert_eq!(b.unwrap().decision, Decision::Committed);

    assert_eq!(cluster.engine("p1").get("x").unwrap(), Some("5".to_string()));
    assert_eq!(cluster.engine("p1").get("y").unwrap(), Some("6".to_string()));
}

#[tokio::test]
async fn test_unknown_participant_is_rejected_upfront() {
    let cluster = cluster(&["p1"]);

    let result = cluster
        .coordinator
        .execute(request("T7", vec![assignment("ghost", vec![write("x", "7")])]))
        .await;
    assert!(result.is_err());

    // Nothing reached p1 and nothing was decided
    assert!(cluster.coordinator.status(&TxId::parse("T7").unwrap()).is_err());
}

#[tokio::test]
async fn test_duplicate_transaction_id_is_rejected() {
    let cluster = cluster(&["p1"]);

    cluster
        .coordinator
        .execute(request("T8", vec![assignment("p1", vec![write("x", "8")])]))
        .await
        .unwrap();

    let result = cluster
        .coordinator
        .execute(request("T8", vec![assignment("p1", vec![write("x", "9")])]))
        .await;
    assert!(result.is_err());

    // The original decision is immutable
    let status = cluster.coordinator.status(&TxId::parse("T8").unwrap()).unwrap();
    assert_eq!(status.decision, Some(Decision::Committed));
    assert_eq!(cluster.engine("p1").get("x").unwrap(), Some("8".to_string()));
}

#[tokio::test]
async fn test_status_reports_votes_and_decision() {
    let cluster = cluster(&["p1", "p2"]);

    cluster
        .coordinator
        .execute(request(
            "T9",
            vec![
                assignment("p1", vec![write("x", "9")]),
                assignment("p2", vec![write("y", "9")]),
            ],
        ))
        .await
        .unwrap();

    let status = cluster.coordinator.status(&TxId::parse("T9").unwrap()).unwrap();
    assert_eq!(status.decision, Some(Decision::Committed));
    assert_eq!(status.votes.len(), 2);

    let listed = cluster.coordinator.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].participants.len(), 2);
    assert_eq!(listed[0].operation_count, 2);
}

#[tokio::test]
async fn test_coordinator_restart_keeps_terminal_decisions() {
    let Cluster { coordinator, transport, engines: _engines, log_dir, _data_dirs } =
        cluster(&["p1"]);

    coordinator
        .execute(request("T10", vec![assignment("p1", vec![write("x", "10")])]))
        .await
        .unwrap();

    // Restart: the old incarnation releases the log, a fresh one replays it
    drop(coordinator);
    let log = DecisionLog::open(log_dir.path()).unwrap();
    let restarted = Arc::new(Coordinator::new(
        test_config(&log_dir),
        Arc::new(ParticipantRegistry::new()),
        transport,
        log,
    ));
    restarted.recover().await.unwrap();

    let status = restarted.status(&TxId::parse("T10").unwrap()).unwrap();
    assert_eq!(status.decision, Some(Decision::Committed));
}

#[tokio::test]
async fn test_coordinator_restart_aborts_in_flight_transactions() {
    let Cluster { coordinator, transport, engines, log_dir, _data_dirs } = cluster(&["p1"]);
    let t11 = TxId::parse("T11").unwrap();
    let p1 = &engines["p1"];

    // The previous incarnation crashed between its begin record and any
    // decision; the participant is stuck holding the prepared state.
    p1.prepare(t11.clone(), vec![write("x", "11")]).unwrap();
    drop(coordinator);
    {
        let log = DecisionLog::open(log_dir.path()).unwrap();
        log.begin(
            &t11,
            vec![EndpointBinding {
                participant_id: "p1".to_string(),
                endpoint: Cluster::endpoint("p1"),
            }],
        )
        .unwrap();
    }

    let log = DecisionLog::open(log_dir.path()).unwrap();
    let restarted = Arc::new(Coordinator::new(
        test_config(&log_dir),
        Arc::new(ParticipantRegistry::new()),
        transport,
        log,
    ));
    restarted.recover().await.unwrap();

    let status = restarted.status(&t11).unwrap();
    assert_eq!(status.decision, Some(Decision::Aborted));

    // The abort dispatch reaches the participant and frees its locks
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if p1.status(&t11) == Some(LocalTxState::Aborted) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("participant should be aborted by recovery");
    assert!(!p1.is_locked("x"));
    assert_eq!(p1.get("x").unwrap(), None);
}
