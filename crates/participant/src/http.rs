//! HTTP surface of a participant
//!
//! Thin axum layer over the engine. Status mapping: 200 for handled results
//! (a NO vote included), 404 for unknown tx/key, 409 for illegal state
//! transitions, 400 for malformed input, 500 for internal errors. Mutating
//! engine calls run on the blocking pool because they fsync.

use crate::engine::{ParticipantEngine, PrepareOutcome};
use crate::error::ParticipantError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pact_common::protocol::{
    BeginRequest, DecisionRequest, ErrorBody, LocalStatusReply, OkReply, ParticipantHealth,
    PrepareReply, PrepareRequest, ResourceReply, Vote,
};
use pact_common::TxId;
use std::sync::Arc;
use std::time::Instant;

pub struct AppState {
    pub engine: Arc<ParticipantEngine>,
    pub started_at: Instant,
}

/// Build the participant router
pub fn router(engine: Arc<ParticipantEngine>) -> Router {
    let state = Arc::new(AppState { engine, started_at: Instant::now() });
    Router::new()
        .route("/begin", post(begin))
        .route("/prepare", post(prepare))
        .route("/commit", post(commit))
        .route("/abort", post(abort))
        .route("/status/:tx_id", get(status))
        .route("/resource/:key", get(resource))
        .route("/health", get(health))
        .with_state(state)
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

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl From<ParticipantError> for ApiError {
    fn from(err: ParticipantError) -> Self {
        match &err {
            ParticipantError::InvalidRequest(_) => Self::bad_request(err.to_string()),
            ParticipantError::UnknownTransaction(_) => {
                Self::new(StatusCode::NOT_FOUND, "unknown_transaction", err.to_string())
            }
            ParticipantError::IllegalState(_) => {
                Self::new(StatusCode::CONFLICT, "illegal_state", err.to_string())
            }
            ParticipantError::Storage(_) | ParticipantError::Io(_) | ParticipantError::Codec(_) => {
                Self::internal(err.to_string())
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

/// Run a blocking engine call off the async runtime
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> crate::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("engine task failed: {}", e)))?
        .map_err(ApiError::from)
}

async fn begin(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BeginRequest>, JsonRejection>,
) -> Result<Json<OkReply>, ApiError> {
    let Json(req) = payload?;
    let engine = state.engine.clone();
    blocking(move || engine.begin(req.tx_id)).await?;
    Ok(Json(OkReply { ok: true }))
}

async fn prepare(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PrepareRequest>, JsonRejection>,
) -> Result<Json<PrepareReply>, ApiError> {
    let Json(req) = payload?;
    let engine = state.engine.clone();
    let outcome = blocking(move || engine.prepare(req.tx_id, req.ops)).await?;
    let reply = match outcome {
        PrepareOutcome::Yes => PrepareReply { vote: Vote::Yes, reason: None },
        PrepareOutcome::No { reason } => PrepareReply { vote: Vote::No, reason: Some(reason) },
    };
    Ok(Json(reply))
}

async fn commit(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DecisionRequest>, JsonRejection>,
) -> Result<Json<OkReply>, ApiError> {
    let Json(req) = payload?;
    let engine = state.engine.clone();
    blocking(move || engine.commit(&req.tx_id)).await?;
    Ok(Json(OkReply { ok: true }))
}

async fn abort(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DecisionRequest>, JsonRejection>,
) -> Result<Json<OkReply>, ApiError> {
    let Json(req) = payload?;
    let engine = state.engine.clone();
    blocking(move || engine.abort(&req.tx_id)).await?;
    Ok(Json(OkReply { ok: true }))
}

async fn status(
    State(state): State<Arc<AppState>>,
    Path(tx_id): Path<String>,
) -> Result<Json<LocalStatusReply>, ApiError> {
    let tx_id = TxId::parse(&tx_id).map_err(ApiError::bad_request)?;
    match state.engine.status(&tx_id) {
        Some(st) => Ok(Json(LocalStatusReply { state: st })),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "unknown_transaction",
            format!("unknown transaction: {}", tx_id),
        )),
    }
}

async fn resource(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<ResourceReply>, ApiError> {
    match state.engine.get(&key).map_err(ApiError::from)? {
        Some(value) => Ok(Json(ResourceReply { key, value: Some(value) })),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "unknown_key",
            format!("unknown key: {}", key),
        )),
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<ParticipantHealth> {
    Json(ParticipantHealth {
        ok: true,
        uptime_s: state.started_at.elapsed().as_secs(),
        transactions: state.engine.transaction_count(),
    })
}
