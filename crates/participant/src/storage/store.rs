//! Durable key-value store with a prepared-transaction journal
//!
//! One fjall keyspace per participant, two partitions:
//!
//! - `data` holds committed key-value pairs; reads see the last durable state.
//! - `journal` holds one record per prepared-but-undecided transaction: its
//!   id and buffered operations, serialized with serde_json.
//!
//! Durability points use `PersistMode::SyncAll`: a YES vote is acknowledged
//! only after its journal record is synced, and the commit batch (store
//! mutations plus journal removal) is one atomic fjall batch. Before the
//! batch is durable a crash leaves the transaction journaled; after, the
//! journal entry is gone.

use crate::error::Result;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use pact_common::{Operation, TxId};
use std::path::Path;

pub struct Store {
    keyspace: Keyspace,
    data: PartitionHandle,
    journal: PartitionHandle,
}

impl Store {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let keyspace = fjall::Config::new(path).open()?;
        let data = keyspace.open_partition("data", PartitionCreateOptions::default())?;
        let journal = keyspace.open_partition("journal", PartitionCreateOptions::default())?;

        Ok(Self { keyspace, data, journal })
    }

    /// Read the last committed value for `key`
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self.data.get(key.as_bytes())?;
        Ok(value.map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    /// Write a value outside any transaction (seeding and tests)
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        self.data.insert(key.as_bytes(), value.as_bytes())?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    /// Journal a prepared transaction; synced before the YES vote is returned
    pub fn journal_put(&self, tx_id: &TxId, ops: &[Operation]) -> Result<()> {
        let record = serde_json::to_vec(ops)?;
        self.journal.insert(tx_id.as_bytes(), record)?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    /// Drop a journal record (abort path); idempotent
    pub fn journal_remove(&self, tx_id: &TxId) -> Result<()> {
        self.journal.remove(tx_id.as_bytes())?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    /// All journaled transactions, for startup recovery
    pub fn journal_scan(&self) -> Result<Vec<(TxId, Vec<Operation>)>> {
        let mut entries = Vec::new();
        for item in self.journal.iter() {
            let (key, value) = item?;
            let tx_id = TxId::parse(&String::from_utf8_lossy(&key))
                .map_err(crate::ParticipantError::InvalidRequest)?;
            let ops: Vec<Operation> = serde_json::from_slice(&value)?;
            entries.push((tx_id, ops));
        }
        Ok(entries)
    }

    /// Apply a transaction's buffered operations and retire its journal
    /// record as one durable unit
    pub fn apply_commit(&self, tx_id: &TxId, ops: &[Operation]) -> Result<()> {
        let mut batch = self.keyspace.batch();
        for op in ops {
            match op {
                Operation::Write { key, value } => {
                    batch.insert(&self.data, key.as_bytes(), value.as_bytes());
                }
                Operation::Delete { key } => {
                    batch.remove(&self.data.clone(), key.as_bytes());
                }
                Operation::Read { .. } => {}
            }
        }
        batch.remove(&self.journal.clone(), tx_id.as_bytes());
        batch.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

}
