//! Coordinator configuration

use std::path::PathBuf;
use std::time::Duration;

/// Settings for the coordinator process
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Directory for the durable decision log
    pub data_dir: PathBuf,

    /// Default transaction deadline when the client supplies none
    pub txn_timeout: Duration,

    /// Per-call timeout for prepare and decision RPCs
    pub rpc_timeout: Duration,

    /// Commit redelivery backoff, base and cap; attempts are unbounded
    pub commit_retry_base: Duration,
    pub commit_retry_cap: Duration,

    /// Abort delivery is best-effort with this many attempts per participant
    pub abort_attempts: u32,
}

impl CoordinatorConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            txn_timeout: Duration::from_secs(30),
            rpc_timeout: Duration::from_secs(10),
            commit_retry_base: Duration::from_millis(100),
            commit_retry_cap: Duration::from_secs(5),
            abort_attempts: 3,
        }
    }
}
