//! Coordinator-side transaction record

use chrono::{DateTime, Utc};
use pact_common::protocol::{Assignment, Decision, TransactionSummary, TxState, VoteRecord};
use pact_common::TxId;
use std::collections::BTreeMap;
use std::time::Duration;

/// One distributed transaction as the coordinator sees it
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TxId,
    pub state: TxState,
    pub assignments: Vec<Assignment>,
    pub votes: BTreeMap<String, VoteRecord>,
    pub decision: Option<Decision>,
    pub deadline: Duration,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(id: TxId, assignments: Vec<Assignment>, deadline: Duration) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: TxState::Init,
            assignments,
            votes: BTreeMap::new(),
            decision: None,
            deadline,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `state`, stamping the transition time
    pub fn transition(&mut self, state: TxState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// Record the final decision; immutable once set
    pub fn decide(&mut self, decision: Decision) {
        if self.decision.is_none() {
            self.decision = Some(decision);
        }
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> TransactionSummary {
        TransactionSummary {
            tx_id: self.id.clone(),
            state: self.state,
            decision: self.decision,
            participants: self
                .assignments
                .iter()
                .map(|a| a.participant_id.clone())
                .collect(),
            operation_count: self.assignments.iter().map(|a| a.ops.len()).sum(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
