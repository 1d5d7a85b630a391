//! Error types for the participant engine

use pact_common::TxId;
use thiserror::Error;

/// Participant errors surfaced to the coordinator as structured codes
#[derive(Debug, Error)]
pub enum ParticipantError {
    /// Malformed input; never retried
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Operation references a transaction this participant has no record of
    #[error("unknown transaction: {0}")]
    UnknownTransaction(TxId),

    /// Operation is not legal in the transaction's current state
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Durable storage failure
    #[error("storage error: {0}")]
    Storage(#[from] fjall::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Journal/record serialization failure
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Result type alias for participant operations
pub type Result<T> = std::result::Result<T, ParticipantError>;
