//! Queue routes: the client-facing dispatch API.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use conductor_core::JobId;
use conductor_queue::{JobError, JobPayload, Priority};
use conductor_ratelimiter::Tier;
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::ApiError;
use crate::AppState;

/// Body of `POST /queue/enqueue`.
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub url: Option<String>,
    pub priority: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub addon_id: Option<String>,
    pub callback_url: Option<String>,
    pub tool: Option<serde_json::Value>,
}

fn identifier_from(headers: &HeaderMap) -> String {
    headers
        .get("x-client-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("anonymous")
        .to_string()
}

fn tier_from(headers: &HeaderMap) -> Tier {
    headers
        .get("x-tier")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(Tier::Free)
}

pub async fn enqueue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<EnqueueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let url = body
        .url
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::Validation("missing required field: url".to_string()))?;

    let priority = match body.priority.as_deref() {
        None => Priority::Normal,
        Some(raw) => raw.parse::<Priority>().map_err(ApiError::from)?,
    };

    let mut payload = JobPayload::new(url);
    payload.headers = body.headers;
    payload.metadata = body.metadata;
    payload.addon_id = body.addon_id.map(Into::into);
    payload.callback_url = body.callback_url;
    payload.tool = body.tool;

    let identifier = identifier_from(&headers);
    let tier = tier_from(&headers);
    let item = state
        .engine
        .submit(&identifier, "/queue/enqueue", tier, payload, priority)?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "item": item,
            "timestamp": Utc::now(),
        })),
    ))
}

pub async fn queue_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": state.engine.queue().metrics(),
        "timestamp": Utc::now(),
    }))
}

pub async fn item_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = JobId::from(id);
    let item = state
        .engine
        .queue()
        .status(&id)
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    Ok(Json(serde_json::json!({ "item": item })))
}

pub async fn cancel_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = JobId::from(id);
    if state.engine.queue().status(&id).is_none() {
        return Err(ApiError::NotFound(format!("job {id} not found")));
    }
    if state.engine.cancel(&id) {
        Ok(Json(serde_json::json!({ "cancelled": id })))
    } else {
        Err(ApiError::Validation(format!(
            "job {id} is processing and cannot be cancelled"
        )))
    }
}

pub async fn dlq_list(State(state): State<AppState>) -> impl IntoResponse {
    let items = state.engine.queue().dlq_items();
    Json(serde_json::json!({
        "count": items.len(),
        "items": items,
    }))
}

pub async fn dlq_retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = JobId::from(id);
    let item = state.engine.dlq_retry(&id)?;
    Ok(Json(serde_json::json!({ "item": item })))
}

pub async fn dlq_clear(State(state): State<AppState>) -> impl IntoResponse {
    let cleared = state.engine.queue().dlq_clear();
    Json(serde_json::json!({ "cleared": cleared }))
}

/// Body of `POST /queue/process/:id/complete`.
#[derive(Debug, Deserialize, Default)]
pub struct CompleteRequest {
    pub result: Option<serde_json::Value>,
}

pub async fn complete_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<CompleteRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let id = JobId::from(id);
    let result = body.and_then(|Json(body)| body.result);
    let item = state.engine.complete(&id, result)?;
    Ok(Json(serde_json::json!({ "item": item })))
}

/// Body of `POST /queue/process/:id/fail`.
#[derive(Debug, Deserialize, Default)]
pub struct FailRequest {
    pub error: Option<FailBody>,
}

#[derive(Debug, Deserialize)]
pub struct FailBody {
    pub message: Option<String>,
    pub code: Option<String>,
}

pub async fn fail_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<FailRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let id = JobId::from(id);
    let error = body
        .and_then(|Json(body)| body.error)
        .map(|error| JobError {
            message: error
                .message
                .unwrap_or_else(|| "worker reported failure".to_string()),
            code: error.code,
            trace: None,
        })
        .unwrap_or_else(|| JobError::new("worker reported failure"));

    state.engine.fail(&id, error)?;
    let item = state.engine.queue().status(&id);
    Ok(Json(serde_json::json!({ "item": item })))
}
