//! Error types for the coordinator

use pact_common::TxId;
use thiserror::Error;

/// Coordinator errors surfaced to clients or logged during dispatch
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Malformed submission; never retried
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An assignment names a participant the registry cannot resolve
    #[error("unknown participant: {0}")]
    UnknownParticipant(String),

    /// A transaction with this id already exists
    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(TxId),

    /// Status query for a transaction the coordinator has no record of
    #[error("transaction not found: {0}")]
    TransactionNotFound(TxId),

    /// Decision log failure
    #[error("storage error: {0}")]
    Storage(#[from] fjall::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
