//! Two-phase commit coordinator for pact
//!
//! The coordinator drives distributed transactions to a single
//! COMMITTED/ABORTED decision: it fans `prepare` out to every assigned
//! participant, aggregates votes under a deadline, records the decision
//! durably before dispatching it, and delivers `commit` with unbounded
//! retries (a committed decision is not revocable) or `abort` best-effort.

pub mod config;
pub mod coordinator;
pub mod decision_log;
pub mod error;
pub mod http;
pub mod registry;
pub mod transaction;
pub mod transport;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use decision_log::DecisionLog;
pub use error::{CoordinatorError, Result};
pub use registry::ParticipantRegistry;
pub use transport::{AckCall, HttpTransport, ParticipantTransport, PrepareCall, TransportError};
