//! Local transaction state for the participant engine

use pact_common::protocol::LocalTxState;
use pact_common::{Operation, TxId};
use std::time::Instant;

/// One in-flight transaction at this participant
#[derive(Debug, Clone)]
pub struct LocalTransaction {
    pub id: TxId,
    pub state: LocalTxState,
    /// Keys locked on behalf of this transaction
    pub locked_keys: Vec<String>,
    /// Buffered operations in submission order; applied at commit
    pub pending_ops: Vec<Operation>,
    /// Last state transition, used by the prepare-timeout sweep
    pub updated_at: Instant,
}

impl LocalTransaction {
    pub fn new(id: TxId) -> Self {
        Self {
            id,
            state: LocalTxState::Active,
            locked_keys: Vec::new(),
            pending_ops: Vec::new(),
            updated_at: Instant::now(),
        }
    }

    /// Move to `state`, stamping the transition time
    pub fn transition(&mut self, state: LocalTxState) {
        self.state = state;
        self.updated_at = Instant::now();
    }

    /// Drop buffered work when the transaction reaches a terminal state
    pub fn clear_buffers(&mut self) {
        self.locked_keys.clear();
        self.pending_ops.clear();
    }
}
