//! API error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use conductor_engine::EngineError;
use conductor_queue::QueueError;

/// Error kinds surfaced over HTTP, mirroring the dispatch error taxonomy.
#[derive(Debug)]
pub enum ApiError {
    /// Bad input: missing fields, unknown priority.
    Validation(String),
    /// Queue full or rate limit exceeded; carries `retry_after` seconds when
    /// computable.
    Capacity {
        message: String,
        retry_after: Option<u64>,
    },
    /// Unknown job or worker.
    NotFound(String),
    /// The resource is not in a state that permits the operation.
    Conflict(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Capacity { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::Capacity { .. } => "capacity",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Capacity {
                message,
                retry_after,
            } => serde_json::json!({
                "error": message,
                "kind": self.kind(),
                "retry_after": retry_after,
            }),
            ApiError::Validation(message)
            | ApiError::NotFound(message)
            | ApiError::Conflict(message) => serde_json::json!({
                "error": message,
                "kind": self.kind(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::RateLimited {
                window,
                retry_after,
            } => ApiError::Capacity {
                message: format!("rate limit exceeded on {window}"),
                retry_after: retry_after.map(|wait| wait.as_secs().max(1)),
            },
            EngineError::Queue(queue_error) => queue_error.into(),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::CapacityExceeded { .. } => ApiError::Capacity {
                message: error.to_string(),
                retry_after: None,
            },
            QueueError::NotFound(_) => ApiError::NotFound(error.to_string()),
            QueueError::Conflict { .. } => ApiError::Conflict(error.to_string()),
            QueueError::InvalidPriority(_) => ApiError::Validation(error.to_string()),
        }
    }
}
