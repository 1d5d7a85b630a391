//! Participant resource manager for pact
//!
//! A participant owns local resources and votes on distributed transactions:
//! a no-wait lock table, a durable key-value store with a prepared-transaction
//! journal, and the local state machine driving `begin`/`prepare`/`commit`/
//! `abort`. Once a participant has voted YES it can honor either decision
//! after a crash; that invariant is carried by the journal.

pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod recovery;
pub mod storage;
mod transaction;

pub use config::ParticipantConfig;
pub use engine::{ParticipantEngine, PrepareOutcome};
pub use error::{ParticipantError, Result};
pub use transaction::LocalTransaction;
