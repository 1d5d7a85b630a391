//! Transaction identifier
//!
//! Transaction ids are opaque strings: clients may supply their own, and the
//! coordinator generates a UUIDv4 when none is given. The participant treats
//! them purely as map keys and journal keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Globally unique transaction identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    /// Generate a fresh transaction ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a caller-supplied ID; empty ids are rejected
    pub fn parse(s: &str) -> Result<Self, String> {
        if s.is_empty() {
            return Err("transaction ID must be non-empty".to_string());
        }
        Ok(Self(s.to_string()))
    }

    /// Get the string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Byte form, used as a journal/log key
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
