//! Operation types
//!
//! An operation is a tagged variant, not a class hierarchy: READ and WRITE
//! and DELETE lock uniformly, but only WRITE and DELETE contribute to the
//! commit batch. The serde representation matches the wire format
//! `{kind, key, value?}`, so a WRITE without a value fails deserialization.

use serde::{Deserialize, Serialize};

/// Upper bound on WRITE values, enforced at prepare time
pub const MAX_VALUE_BYTES: usize = 64 * 1024;

/// The kind tag of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpKind {
    Read,
    Write,
    Delete,
}

/// A single keyed operation within a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum Operation {
    /// Read a value; locks the key but has no durable effect at commit
    Read { key: String },

    /// Write a value
    Write { key: String, value: String },

    /// Delete a key
    Delete { key: String },
}

/// Why an operation failed validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidOperation {
    #[error("operation key must be non-empty")]
    EmptyKey,

    #[error("value exceeds {MAX_VALUE_BYTES} bytes ({0} bytes)")]
    ValueTooLarge(usize),
}

impl Operation {
    /// The resource key this operation addresses
    pub fn key(&self) -> &str {
        match self {
            Operation::Read { key } => key,
            Operation::Write { key, .. } => key,
            Operation::Delete { key } => key,
        }
    }

    /// The kind tag
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Read { .. } => OpKind::Read,
            Operation::Write { .. } => OpKind::Write,
            Operation::Delete { .. } => OpKind::Delete,
        }
    }

    /// Whether this operation mutates the store at commit
    pub fn has_durable_effect(&self) -> bool {
        matches!(self, Operation::Write { .. } | Operation::Delete { .. })
    }

    /// Shape validation applied by the participant during prepare
    pub fn validate(&self) -> Result<(), InvalidOperation> {
        if self.key().is_empty() {
            return Err(InvalidOperation::EmptyKey);
        }
        if let Operation::Write { value, .. } = self {
            if value.len() > MAX_VALUE_BYTES {
                return Err(InvalidOperation::ValueTooLarge(value.len()));
            }
        }
        Ok(())
    }
}
