//! Work submission endpoint.
//!
//! `POST /process` enqueues one raw record. A full queue answers 429 with
//! a structured body; malformed requests answer 400. No upstream secret
//! ever appears in an error body (messages pass through redaction).

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::services::work_queue::{EnqueueOutcome, WorkItem};
use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Deserialize, Validate)]
pub struct ProcessRequest {
    #[validate(length(min = 1, message = "source cannot be empty"))]
    pub source: String,
    pub data: Value,
}

#[derive(Serialize)]
pub struct ProcessAccepted {
    pub status: &'static str,
    pub queue_position: usize,
}

/// POST /process
/// Body: {"source": string, "data": object}
pub async fn enqueue(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(format!("malformed body: {e}")))?;

    let request: ProcessRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("malformed body: {e}")))?;
    request.validate().map_err(|e| ApiError::bad_request(format!("invalid request: {e}")))?;
    if !request.data.is_object() {
        return Err(ApiError::bad_request("data must be an object"));
    }

    match state.work_queue.try_enqueue(WorkItem { source: request.source, data: request.data }) {
        EnqueueOutcome::Queued { position } => Ok((
            StatusCode::OK,
            Json(ProcessAccepted { status: "queued", queue_position: position }),
        )),
        EnqueueOutcome::Full => Err(ApiError::too_many_requests("work queue full, retry later")),
    }
}
