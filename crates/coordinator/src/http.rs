//! HTTP surface of the coordinator
//!
//! Thin axum layer over the coordinator engine and the registry. The client
//! never sees a partial outcome: /execute replies with the terminal
//! COMMITTED or ABORTED, and everything else is a 4xx/5xx with a structured
//! error body.

use crate::coordinator::Coordinator;
use crate::error::CoordinatorError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pact_common::protocol::{
    CoordinatorHealth, ErrorBody, ExecuteReply, ExecuteRequest, OkReply, ParticipantInfo,
    RegisterRequest, TransactionSummary, TxStatusReply,
};
use pact_common::TxId;
use std::sync::Arc;

/// Build the coordinator router
pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/status/:tx_id", get(status))
        .route("/transactions", get(transactions))
        .route("/register", post(register))
        .route("/participants", get(participants))
        .route("/health", get(health))
        .with_state(coordinator)
}

/// Error reply carrying a structured code
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self { status, error, message: message.into() }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match &err {
            CoordinatorError::InvalidRequest(_) => Self::bad_request(err.to_string()),
            CoordinatorError::UnknownParticipant(_) => {
                Self::new(StatusCode::BAD_REQUEST, "unknown_participant", err.to_string())
            }
            CoordinatorError::DuplicateTransaction(_) => {
                Self::new(StatusCode::CONFLICT, "duplicate_transaction", err.to_string())
            }
            CoordinatorError::TransactionNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "transaction_not_found", err.to_string())
            }
            CoordinatorError::Storage(_)
            | CoordinatorError::Io(_)
            | CoordinatorError::Codec(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: self.error.to_string(), message: self.message };
        (self.status, Json(body)).into_response()
    }
}

async fn execute(
    State(coordinator): State<Arc<Coordinator>>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecuteReply>, ApiError> {
    let Json(request) = payload?;
    let reply = coordinator.execute(request).await?;
    Ok(Json(reply))
}

async fn status(
    State(coordinator): State<Arc<Coordinator>>,
    Path(tx_id): Path<String>,
) -> Result<Json<TxStatusReply>, ApiError> {
    let tx_id = TxId::parse(&tx_id).map_err(ApiError::bad_request)?;
    Ok(Json(coordinator.status(&tx_id)?))
}

async fn transactions(
    State(coordinator): State<Arc<Coordinator>>,
) -> Json<Vec<TransactionSummary>> {
    Json(coordinator.list())
}

async fn register(
    State(coordinator): State<Arc<Coordinator>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<OkReply>, ApiError> {
    let Json(request) = payload?;
    if request.participant_id.is_empty() || request.endpoint.is_empty() {
        return Err(ApiError::bad_request(
            "participant_id and endpoint must be non-empty",
        ));
    }
    coordinator
        .registry()
        .register(request.participant_id, request.endpoint);
    Ok(Json(OkReply { ok: true }))
}

async fn participants(
    State(coordinator): State<Arc<Coordinator>>,
) -> Json<Vec<ParticipantInfo>> {
    Json(coordinator.registry().list())
}

async fn health(State(coordinator): State<Arc<Coordinator>>) -> Json<CoordinatorHealth> {
    Json(CoordinatorHealth {
        ok: true,
        uptime_s: coordinator.uptime().as_secs(),
        participants: coordinator.registry().len(),
        transactions: coordinator.transaction_count(),
    })
}
