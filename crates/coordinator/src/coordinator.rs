//! Core coordinator implementation
//!
//! Drives each submitted transaction through two-phase commit:
//!
//! ```text
//! INIT --submit--> PREPARING --all YES--> COMMITTING --all ack--> COMMITTED
//!                  |
//!                  | any NO / timeout / transport error
//!                  v
//!               ABORTING --attempts--> ABORTED
//! ```
//!
//! Votes are combined with AND over participant identity; a missing,
//! timed-out, or errored vote counts as NO. The decision is recorded in the
//! durable log before the first commit is dispatched, and a committed
//! decision is redelivered with capped backoff until every participant
//! acknowledges.

use crate::config::CoordinatorConfig;
use crate::decision_log::{DecisionLog, EndpointBinding};
use crate::error::{CoordinatorError, Result};
use crate::registry::ParticipantRegistry;
use crate::transaction::Transaction;
use crate::transport::{AckCall, ParticipantTransport, PrepareCall};
use pact_common::protocol::{
    Assignment, Decision, ExecuteReply, ExecuteRequest, TransactionSummary, TxState,
    TxStatusReply, Vote, VoteRecord,
};
use pact_common::{Operation, TxId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// One resolved prepare target
#[derive(Debug, Clone)]
struct Target {
    participant_id: String,
    endpoint: String,
    ops: Vec<Operation>,
}

/// Coordinator for distributed transactions
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<ParticipantRegistry>,
    transport: Arc<dyn ParticipantTransport>,
    log: DecisionLog,
    transactions: Mutex<HashMap<TxId, Transaction>>,
    started_at: Instant,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        registry: Arc<ParticipantRegistry>,
        transport: Arc<dyn ParticipantTransport>,
        log: DecisionLog,
    ) -> Self {
        Self {
            config,
            registry,
            transport,
            log,
            transactions: Mutex::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.lock().len()
    }

    /// Execute a distributed transaction to its COMMITTED/ABORTED outcome
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteReply> {
        let assignments = merge_assignments(request.assignments)?;

        let tx_id = match &request.tx_id {
            Some(raw) => TxId::parse(raw).map_err(CoordinatorError::InvalidRequest)?,
            None => TxId::generate(),
        };
        let deadline = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.txn_timeout);

        // Every participant must resolve before anything is dispatched
        let mut targets = Vec::with_capacity(assignments.len());
        for assignment in &assignments {
            let endpoint = self
                .registry
                .resolve(&assignment.participant_id)
                .ok_or_else(|| {
                    CoordinatorError::UnknownParticipant(assignment.participant_id.clone())
                })?;
            targets.push(Target {
                participant_id: assignment.participant_id.clone(),
                endpoint,
                ops: assignment.ops.clone(),
            });
        }

        if self.transactions.lock().contains_key(&tx_id) {
            return Err(CoordinatorError::DuplicateTransaction(tx_id));
        }

        // Begin record first: a crash from here on leaves a trace to abort
        let bindings: Vec<EndpointBinding> = targets
            .iter()
            .map(|t| EndpointBinding {
                participant_id: t.participant_id.clone(),
                endpoint: t.endpoint.clone(),
            })
            .collect();
        self.log.begin(&tx_id, bindings.clone())?;

        info!(tx_id = %tx_id, participants = targets.len(), "starting transaction");
        {
            let mut txns = self.transactions.lock();
            let mut txn = Transaction::new(tx_id.clone(), assignments, deadline);
            txn.transition(TxState::Preparing);
            txns.insert(tx_id.clone(), txn);
        }

        // Phase 1: prepare
        let votes = self.run_prepare_phase(&tx_id, &targets, deadline).await;
        let all_yes = targets
            .iter()
            .all(|t| votes.get(&t.participant_id).map(|v| v.vote) == Some(Vote::Yes));
        self.update(&tx_id, |txn| txn.votes = votes.clone());

        // Phase 2: decide, durably, then dispatch
        let decision = if all_yes {
            self.log.record_decision(&tx_id, Decision::Committed)?;
            self.update(&tx_id, |txn| {
                txn.decide(Decision::Committed);
                txn.transition(TxState::Committing);
            });
            info!(tx_id = %tx_id, "all participants voted YES, committing");

            self.dispatch_commit(&tx_id, &bindings).await;
            self.log.mark_acked(&tx_id)?;
            self.update(&tx_id, |txn| txn.transition(TxState::Committed));
            Decision::Committed
        } else {
            self.log.record_decision(&tx_id, Decision::Aborted)?;
            self.update(&tx_id, |txn| {
                txn.decide(Decision::Aborted);
                txn.transition(TxState::Aborting);
            });
            info!(tx_id = %tx_id, "aborting");

            self.dispatch_abort(&tx_id, &bindings).await;
            self.update(&tx_id, |txn| txn.transition(TxState::Aborted));
            Decision::Aborted
        };

        let state = match decision {
            Decision::Committed => TxState::Committed,
            Decision::Aborted => TxState::Aborted,
        };
        Ok(ExecuteReply { tx_id, state, decision, votes })
    }

    /// Pure read of a transaction's state
    pub fn status(&self, tx_id: &TxId) -> Result<TxStatusReply> {
        let txns = self.transactions.lock();
        let txn = txns
            .get(tx_id)
            .ok_or_else(|| CoordinatorError::TransactionNotFound(tx_id.clone()))?;
        Ok(TxStatusReply {
            tx_id: txn.id.clone(),
            state: txn.state,
            decision: txn.decision,
            votes: txn.votes.clone(),
        })
    }

    /// All known transactions, newest first
    pub fn list(&self) -> Vec<TransactionSummary> {
        let txns = self.transactions.lock();
        let mut summaries: Vec<TransactionSummary> =
            txns.values().map(Transaction::summary).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// Replay the decision log after a restart
    ///
    /// In-flight transactions (begin record, no decision) are treated as
    /// ABORTED; committed-but-unacked decisions resume redelivery.
    pub async fn recover(self: &Arc<Self>) -> Result<()> {
        for record in self.log.scan()? {
            let assignments: Vec<Assignment> = record
                .participants
                .iter()
                .map(|b| Assignment { participant_id: b.participant_id.clone(), ops: Vec::new() })
                .collect();
            let mut txn =
                Transaction::new(record.tx_id.clone(), assignments, self.config.txn_timeout);

            match record.decision {
                None => {
                    warn!(tx_id = %record.tx_id, "in flight at crash, recording abort");
                    self.log.record_decision(&record.tx_id, Decision::Aborted)?;
                    txn.decide(Decision::Aborted);
                    txn.transition(TxState::Aborting);
                    self.transactions.lock().insert(record.tx_id.clone(), txn);

                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        this.dispatch_abort(&record.tx_id, &record.participants).await;
                        this.update(&record.tx_id, |t| t.transition(TxState::Aborted));
                    });
                }
                Some(Decision::Committed) if !record.acked => {
                    info!(tx_id = %record.tx_id, "resuming commit dispatch");
                    txn.decide(Decision::Committed);
                    txn.transition(TxState::Committing);
                    self.transactions.lock().insert(record.tx_id.clone(), txn);

                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        this.dispatch_commit(&record.tx_id, &record.participants).await;
                        if let Err(e) = this.log.mark_acked(&record.tx_id) {
                            error!(tx_id = %record.tx_id, "failed to mark acked: {}", e);
                        }
                        this.update(&record.tx_id, |t| t.transition(TxState::Committed));
                    });
                }
                Some(decision) => {
                    txn.decide(decision);
                    txn.transition(match decision {
                        Decision::Committed => TxState::Committed,
                        Decision::Aborted => TxState::Aborted,
                    });
                    self.transactions.lock().insert(record.tx_id.clone(), txn);
                }
            }
        }
        Ok(())
    }

    /// Fan prepare out to every target and aggregate votes under the deadline
    async fn run_prepare_phase(
        &self,
        tx_id: &TxId,
        targets: &[Target],
        deadline: Duration,
    ) -> BTreeMap<String, VoteRecord> {
        let mut set = JoinSet::new();
        for target in targets {
            let transport = self.transport.clone();
            let tx = tx_id.clone();
            let participant_id = target.participant_id.clone();
            let endpoint = target.endpoint.clone();
            let ops = target.ops.clone();
            let rpc_timeout = self.config.rpc_timeout.min(deadline);
            set.spawn(async move {
                let outcome = transport.prepare(&endpoint, &tx, &ops, rpc_timeout).await;
                (participant_id, outcome)
            });
        }

        let deadline_at = tokio::time::Instant::now() + deadline;
        let mut votes: BTreeMap<String, VoteRecord> = BTreeMap::new();
        let mut failed = false;

        while !set.is_empty() && !failed {
            let remaining = deadline_at.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                warn!(tx_id = %tx_id, "prepare deadline elapsed");
                break;
            }

            match tokio::time::timeout(remaining, set.join_next()).await {
                Ok(Some(Ok((participant_id, outcome)))) => {
                    let record = match outcome {
                        Ok(PrepareCall::Vote(reply)) => match reply.vote {
                            Vote::Yes => {
                                self.registry.touch(&participant_id);
                                VoteRecord::yes()
                            }
                            Vote::No => VoteRecord::no(
                                reply.reason.unwrap_or_else(|| "participant voted NO".into()),
                            ),
                        },
                        Ok(PrepareCall::Failed { status, message }) => {
                            VoteRecord::no(format!("participant error {}: {}", status, message))
                        }
                        Err(e) => VoteRecord::no(format!("transport: {}", e)),
                    };
                    if record.vote == Vote::No {
                        info!(tx_id = %tx_id, participant = %participant_id,
                              reason = record.reason.as_deref().unwrap_or(""), "NO vote");
                        failed = true;
                    }
                    // Aggregation is by identity: a duplicate vote collapses
                    votes.insert(participant_id, record);
                }
                Ok(Some(Err(join_err))) => {
                    error!(tx_id = %tx_id, "prepare task failed: {}", join_err);
                    failed = true;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(tx_id = %tx_id, "prepare deadline elapsed");
                    break;
                }
            }
        }
        set.abort_all();

        // Whoever has not answered counts as NO
        for target in targets {
            votes
                .entry(target.participant_id.clone())
                .or_insert_with(|| VoteRecord::no("no vote within deadline"));
        }
        votes
    }

    /// Deliver commit to every voter; retries with capped backoff until every
    /// participant acknowledges, because a committed decision is irrevocable
    async fn dispatch_commit(&self, tx_id: &TxId, bindings: &[EndpointBinding]) {
        let mut set = JoinSet::new();
        for binding in bindings {
            let transport = self.transport.clone();
            let registry = self.registry.clone();
            let tx = tx_id.clone();
            let binding = binding.clone();
            let rpc_timeout = self.config.rpc_timeout;
            let base = self.config.commit_retry_base;
            let cap = self.config.commit_retry_cap;
            set.spawn(async move {
                let mut delay = base;
                loop {
                    match transport.commit(&binding.endpoint, &tx, rpc_timeout).await {
                        Ok(AckCall::Ok) => {
                            registry.touch(&binding.participant_id);
                            return;
                        }
                        Ok(AckCall::Rejected { status, message }) => {
                            // The participant answered but could not apply;
                            // keep redelivering, it may still be recovering
                            warn!(tx_id = %tx, participant = %binding.participant_id,
                                  status, "commit rejected: {}", message);
                        }
                        Err(e) => {
                            warn!(tx_id = %tx, participant = %binding.participant_id,
                                  "commit delivery failed: {}", e);
                        }
                    }
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(cap);
                }
            });
        }
        while set.join_next().await.is_some() {}
    }

    /// Deliver abort best-effort; participants that never hear it abort on
    /// their own prepare timeout
    async fn dispatch_abort(&self, tx_id: &TxId, bindings: &[EndpointBinding]) {
        let mut set = JoinSet::new();
        for binding in bindings {
            let transport = self.transport.clone();
            let tx = tx_id.clone();
            let binding = binding.clone();
            let rpc_timeout = self.config.rpc_timeout;
            let base = self.config.commit_retry_base;
            let attempts = self.config.abort_attempts;
            set.spawn(async move {
                let mut delay = base;
                for _ in 0..attempts {
                    match transport.abort(&binding.endpoint, &tx, rpc_timeout).await {
                        Ok(_) => return,
                        Err(e) => {
                            warn!(tx_id = %tx, participant = %binding.participant_id,
                                  "abort delivery failed: {}", e);
                        }
                    }
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(5));
                }
            });
        }
        while set.join_next().await.is_some() {}
    }

    fn update(&self, tx_id: &TxId, f: impl FnOnce(&mut Transaction)) {
        if let Some(txn) = self.transactions.lock().get_mut(tx_id) {
            f(txn);
        }
    }
}

/// Merge assignments addressed to the same participant, preserving op order
fn merge_assignments(assignments: Vec<Assignment>) -> Result<Vec<Assignment>> {
    if assignments.is_empty() {
        return Err(CoordinatorError::InvalidRequest(
            "assignments must be non-empty".to_string(),
        ));
    }

    let mut merged: Vec<Assignment> = Vec::new();
    for assignment in assignments {
        if assignment.participant_id.is_empty() {
            return Err(CoordinatorError::InvalidRequest(
                "participant_id must be non-empty".to_string(),
            ));
        }
        match merged
            .iter_mut()
            .find(|a| a.participant_id == assignment.participant_id)
        {
            Some(existing) => existing.ops.extend(assignment.ops),
            None => merged.push(assignment),
        }
    }
    Ok(merged)
}
