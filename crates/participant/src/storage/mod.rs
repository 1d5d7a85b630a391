//! Storage layer: the no-wait lock table and the durable store + journal

pub mod lock;
pub mod store;

pub use lock::{LockAttempt, LockTable};
pub use store::Store;
