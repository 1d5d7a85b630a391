//! Lock table for participant resources
//!
//! Exclusive locks keyed by resource name, scoped to a transaction. The
//! policy is no-wait: a conflict is reported immediately and surfaces as a
//! NO vote, so waiting is never introduced and deadlock cannot form. Locks
//! have no expiry; they are held from prepare until the decision arrives.

use pact_common::TxId;
use std::collections::HashMap;

/// Result of a lock acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    /// Lock granted (or already owned by the requesting transaction)
    Acquired,
    /// Key is owned by another transaction
    Conflict { holder: TxId },
}

/// Exclusive per-key lock table
///
/// A resource is either unlocked or owned by exactly one transaction.
/// The table itself is not synchronized; the engine guards it together
/// with the transaction map.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: HashMap<String, TxId>,
}

impl LockTable {
    pub fn new() -> Self {
        Self { locks: HashMap::new() }
    }

    /// Try to acquire `key` for `tx`; re-entrant for the current owner
    pub fn acquire(&mut self, tx: &TxId, key: &str) -> LockAttempt {
        match self.locks.get(key) {
            Some(holder) if holder == tx => LockAttempt::Acquired,
            Some(holder) => LockAttempt::Conflict { holder: holder.clone() },
            None => {
                self.locks.insert(key.to_string(), tx.clone());
                LockAttempt::Acquired
            }
        }
    }

    /// Release every lock owned by `tx`; idempotent
    pub fn release_all(&mut self, tx: &TxId) {
        self.locks.retain(|_, holder| holder != tx);
    }

    /// Inspection only
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks.contains_key(key)
    }

    /// Current owner of `key`, if any
    pub fn owner(&self, key: &str) -> Option<&TxId> {
        self.locks.get(key)
    }

    /// Keys currently held by `tx`, sorted for determinism
    pub fn keys_held_by(&self, tx: &TxId) -> Vec<String> {
        let mut keys: Vec<String> = self
            .locks
            .iter()
            .filter(|(_, holder)| *holder == tx)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
