//! Wire protocol for the coordinator and participant HTTP APIs
//!
//! Request and reply bodies are plain serde structs shared by both servers
//! and the coordinator's transport adapter, so the two sides cannot drift.
//! States serialize in SCREAMING_SNAKE_CASE (`"PREPARED"`, `"COMMITTED"`).

use crate::{Operation, TxId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A participant's answer to `prepare`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Vote {
    Yes,
    No,
}

/// Transaction state at a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocalTxState {
    Active,
    Prepared,
    Committed,
    Aborted,
}

/// Transaction state at the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxState {
    Init,
    Preparing,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

/// The coordinator's final decision; immutable once reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Committed,
    Aborted,
}

/// Recorded vote of one participant, with the reason for a NO
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub vote: Vote,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VoteRecord {
    pub fn yes() -> Self {
        Self { vote: Vote::Yes, reason: None }
    }

    pub fn no(reason: impl Into<String>) -> Self {
        Self { vote: Vote::No, reason: Some(reason.into()) }
    }
}

// ---------------------------------------------------------------------------
// Coordinator API
// ---------------------------------------------------------------------------

/// Operations addressed to one participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub participant_id: String,
    pub ops: Vec<Operation>,
}

/// POST /execute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub assignments: Vec<Assignment>,
}

/// Reply to POST /execute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteReply {
    pub tx_id: TxId,
    pub state: TxState,
    pub decision: Decision,
    pub votes: BTreeMap<String, VoteRecord>,
}

/// GET /status/{tx_id}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxStatusReply {
    pub tx_id: TxId,
    pub state: TxState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    pub votes: BTreeMap<String, VoteRecord>,
}

/// One row of GET /transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub tx_id: TxId,
    pub state: TxState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    pub participants: Vec<String>,
    pub operation_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// POST /register
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub participant_id: String,
    pub endpoint: String,
}

/// One row of GET /participants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub participant_id: String,
    pub endpoint: String,
    pub last_seen: DateTime<Utc>,
}

/// GET /health on the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorHealth {
    pub ok: bool,
    pub uptime_s: u64,
    pub participants: usize,
    pub transactions: usize,
}

// ---------------------------------------------------------------------------
// Participant API
// ---------------------------------------------------------------------------

/// POST /begin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginRequest {
    pub tx_id: TxId,
}

/// POST /prepare
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub tx_id: TxId,
    pub ops: Vec<Operation>,
}

/// POST /commit and POST /abort
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub tx_id: TxId,
}

/// Reply to POST /prepare
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareReply {
    pub vote: Vote,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Generic `{ok}` acknowledgment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkReply {
    pub ok: bool,
}

/// GET /status/{tx_id} on a participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStatusReply {
    pub state: LocalTxState,
}

/// GET /resource/{key}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReply {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// GET /health on a participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantHealth {
    pub ok: bool,
    pub uptime_s: u64,
    pub transactions: usize,
}

/// Structured error body carried by non-2xx replies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}
