//! Durable decision log
//!
//! The coordinator's transaction map is in memory; the decision log is what
//! makes decisions survive a crash. One record per transaction, keyed by id,
//! in a fjall partition synced at every mutation:
//!
//! - a begin record (endpoint snapshot, no decision) is written before any
//!   prepare is dispatched;
//! - the decision is recorded before the first commit/abort is sent and is
//!   never overwritten;
//! - the acked flag is set once every participant acknowledged the decision.
//!
//! On restart, a record with a committed decision and no ack resumes commit
//! dispatch; a record with no decision is an in-flight transaction whose
//! coordinator died mid-prepare, and is recorded aborted.

use crate::error::{CoordinatorError, Result};
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use pact_common::protocol::Decision;
use pact_common::TxId;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Snapshot of one participant's endpoint at submission time, so dispatch
/// can resume even if the registry is empty after a restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointBinding {
    pub participant_id: String,
    pub endpoint: String,
}

/// One durable record per transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub tx_id: TxId,
    pub participants: Vec<EndpointBinding>,
    pub decision: Option<Decision>,
    pub acked: bool,
}

pub struct DecisionLog {
    keyspace: Keyspace,
    records: PartitionHandle,
}

impl DecisionLog {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let keyspace = fjall::Config::new(path).open()?;
        let records = keyspace.open_partition("decisions", PartitionCreateOptions::default())?;
        Ok(Self { keyspace, records })
    }

    fn put(&self, record: &DecisionRecord) -> Result<()> {
        let body = serde_json::to_vec(record)?;
        self.records.insert(record.tx_id.as_bytes(), body)?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    fn get(&self, tx_id: &TxId) -> Result<Option<DecisionRecord>> {
        match self.records.get(tx_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write the begin record; fails on a duplicate id
    pub fn begin(&self, tx_id: &TxId, participants: Vec<EndpointBinding>) -> Result<()> {
        if self.get(tx_id)?.is_some() {
            return Err(CoordinatorError::DuplicateTransaction(tx_id.clone()));
        }
        self.put(&DecisionRecord {
            tx_id: tx_id.clone(),
            participants,
            decision: None,
            acked: false,
        })
    }

    /// Record the decision; a decision once recorded is immutable
    pub fn record_decision(&self, tx_id: &TxId, decision: Decision) -> Result<()> {
        let mut record = self
            .get(tx_id)?
            .ok_or_else(|| CoordinatorError::TransactionNotFound(tx_id.clone()))?;

        match record.decision {
            Some(existing) if existing != decision => {
                return Err(CoordinatorError::InvalidRequest(format!(
                    "decision for {} already recorded as {:?}",
                    tx_id, existing
                )));
            }
            Some(_) => return Ok(()),
            None => {}
        }

        record.decision = Some(decision);
        self.put(&record)
    }

    /// Mark the decision fully delivered
    pub fn mark_acked(&self, tx_id: &TxId) -> Result<()> {
        if let Some(mut record) = self.get(tx_id)? {
            record.acked = true;
            self.put(&record)?;
        }
        Ok(())
    }

    /// All records, for startup recovery
    pub fn scan(&self) -> Result<Vec<DecisionRecord>> {
        let mut records = Vec::new();
        for item in self.records.iter() {
            let (_, bytes) = item?;
            records.push(serde_json::from_slice(&bytes)?);
        }
        Ok(records)
    }
}
