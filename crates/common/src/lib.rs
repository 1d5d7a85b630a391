//! Common types for pact
//!
//! This crate defines:
//! - Transaction IDs (client-supplied or UUIDv4-generated strings)
//! - Operations (the READ/WRITE/DELETE tagged variant) and their validation
//! - The wire protocol shared by the coordinator and participant HTTP APIs

mod operation;
pub mod protocol;
mod transaction_id;

pub use operation::{InvalidOperation, OpKind, Operation, MAX_VALUE_BYTES};
pub use transaction_id::TxId;
