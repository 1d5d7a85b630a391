//! Transport adapter for participant calls
//!
//! One synchronous call per protocol operation, each with a caller-supplied
//! timeout. The engines react differently to three outcomes, so the adapter
//! keeps them distinguishable:
//!
//! - structured success (a vote, an acknowledgment, a state),
//! - application-level failure (the participant answered with a well-formed
//!   NO or error),
//! - transport failure (timeout, connection refused, malformed response).

use async_trait::async_trait;
use pact_common::protocol::{
    DecisionRequest, ErrorBody, LocalStatusReply, LocalTxState, PrepareReply, PrepareRequest,
};
use pact_common::{Operation, TxId};
use std::time::Duration;
use thiserror::Error;

/// Transport-level failures; the caller treats all of them as a missing reply
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("call timed out")]
    Timeout,

    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Result of a prepare call that produced a reply
#[derive(Debug, Clone)]
pub enum PrepareCall {
    /// 200 with a vote
    Vote(PrepareReply),
    /// Well-formed participant error (validation, illegal state, ...)
    Failed { status: u16, message: String },
}

/// Result of a commit/abort call that produced a reply
#[derive(Debug, Clone)]
pub enum AckCall {
    Ok,
    Rejected { status: u16, message: String },
}

/// The synchronous request/reply channel the coordinator engine runs on
#[async_trait]
pub trait ParticipantTransport: Send + Sync {
    async fn prepare(
        &self,
        endpoint: &str,
        tx_id: &TxId,
        ops: &[Operation],
        timeout: Duration,
    ) -> Result<PrepareCall, TransportError>;

    async fn commit(
        &self,
        endpoint: &str,
        tx_id: &TxId,
        timeout: Duration,
    ) -> Result<AckCall, TransportError>;

    async fn abort(
        &self,
        endpoint: &str,
        tx_id: &TxId,
        timeout: Duration,
    ) -> Result<AckCall, TransportError>;

    async fn status(
        &self,
        endpoint: &str,
        tx_id: &TxId,
        timeout: Duration,
    ) -> Result<LocalTxState, TransportError>;
}

/// HTTP/JSON transport over a shared reqwest client
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    fn base_url(endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("http://{}", endpoint)
        }
    }

    fn map_error(e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Unreachable(e.to_string())
        } else {
            TransportError::Malformed(e.to_string())
        }
    }

    /// Read a non-2xx reply's structured error body
    async fn failure_message(response: reqwest::Response) -> (u16, String) {
        let status = response.status().as_u16();
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => format!("participant returned status {}", status),
        };
        (status, message)
    }

    async fn post_decision(
        &self,
        endpoint: &str,
        path: &str,
        tx_id: &TxId,
        timeout: Duration,
    ) -> Result<AckCall, TransportError> {
        let url = format!("{}{}", Self::base_url(endpoint), path);
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&DecisionRequest { tx_id: tx_id.clone() })
            .send()
            .await
            .map_err(Self::map_error)?;

        if response.status().is_success() {
            Ok(AckCall::Ok)
        } else {
            let (status, message) = Self::failure_message(response).await;
            Ok(AckCall::Rejected { status, message })
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ParticipantTransport for HttpTransport {
    async fn prepare(
        &self,
        endpoint: &str,
        tx_id: &TxId,
        ops: &[Operation],
        timeout: Duration,
    ) -> Result<PrepareCall, TransportError> {
        let url = format!("{}/prepare", Self::base_url(endpoint));
        let request = PrepareRequest { tx_id: tx_id.clone(), ops: ops.to_vec() };
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(Self::map_error)?;

        if response.status().is_success() {
            let reply = response
                .json::<PrepareReply>()
                .await
                .map_err(|e| TransportError::Malformed(e.to_string()))?;
            Ok(PrepareCall::Vote(reply))
        } else {
            let (status, message) = Self::failure_message(response).await;
            Ok(PrepareCall::Failed { status, message })
        }
    }

    async fn commit(
        &self,
        endpoint: &str,
        tx_id: &TxId,
        timeout: Duration,
    ) -> Result<AckCall, TransportError> {
        self.post_decision(endpoint, "/commit", tx_id, timeout).await
    }

    async fn abort(
        &self,
        endpoint: &str,
        tx_id: &TxId,
        timeout: Duration,
    ) -> Result<AckCall, TransportError> {
        self.post_decision(endpoint, "/abort", tx_id, timeout).await
    }

    async fn status(
        &self,
        endpoint: &str,
        tx_id: &TxId,
        timeout: Duration,
    ) -> Result<LocalTxState, TransportError> {
        let url = format!("{}/status/{}", Self::base_url(endpoint), tx_id);
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(Self::map_error)?;

        if !response.status().is_success() {
            let (status, message) = Self::failure_message(response).await;
            return Err(TransportError::Malformed(format!(
                "status {}: {}",
                status, message
            )));
        }

        let reply = response
            .json::<LocalStatusReply>()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        Ok(reply.state)
    }
}
