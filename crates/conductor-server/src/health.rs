//! Liveness, readiness, and component health.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
struct Check {
    status: Health,
    detail: String,
}

pub async fn live() -> impl IntoResponse {
    Json(serde_json::json!({ "alive": true, "timestamp": Utc::now() }))
}

pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.engine.queue().metrics();
    let queued = metrics.high + metrics.normal + metrics.low;
    if queued >= state.engine.queue().max_queue_size() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "ready": false,
                "reason": "queue at capacity",
            })),
        )
    } else {
        (
            StatusCode::OK,
            Json(serde_json::json!({ "ready": true })),
        )
    }
}

pub async fn detailed(State(state): State<AppState>) -> impl IntoResponse {
    let queue = state.engine.queue();
    let metrics = queue.metrics();
    let max = queue.max_queue_size();
    let queued = metrics.high + metrics.normal + metrics.low;

    let server = Check {
        status: Health::Healthy,
        detail: format!(
            "uptime {}s, {} workers connected",
            state.started_at.elapsed().as_secs(),
            state.engine.registry().connected_len()
        ),
    };

    let queue_check = if queued >= max {
        Check {
            status: Health::Unhealthy,
            detail: format!("queue at capacity ({queued}/{max})"),
        }
    } else if queued * 10 >= max * 9 {
        Check {
            status: Health::Degraded,
            detail: format!("queue nearly full ({queued}/{max})"),
        }
    } else {
        Check {
            status: Health::Healthy,
            detail: format!("{queued}/{max} queued, {} processing", metrics.processing),
        }
    };

    let bus_dead = state.engine.bus().dead_letter_len();
    let message_store = if bus_dead > 500 {
        Check {
            status: Health::Degraded,
            detail: format!("{bus_dead} dead-lettered events"),
        }
    } else {
        Check {
            status: Health::Healthy,
            detail: format!("{bus_dead} dead-lettered events"),
        }
    };

    let tracked = queued + metrics.processing + metrics.dlq;
    let memory = if tracked > 10_000 {
        Check {
            status: Health::Degraded,
            detail: format!("{tracked} jobs tracked in memory"),
        }
    } else {
        Check {
            status: Health::Healthy,
            detail: format!("{tracked} jobs tracked in memory"),
        }
    };

    let checks = [&server, &queue_check, &message_store, &memory];
    let status = if checks.iter().any(|check| check.status == Health::Unhealthy) {
        Health::Unhealthy
    } else if checks.iter().any(|check| check.status == Health::Degraded) {
        Health::Degraded
    } else {
        Health::Healthy
    };

    Json(serde_json::json!({
        "status": status,
        "timestamp": Utc::now(),
        "checks": {
            "server": server,
            "queue": queue_check,
            "messageStore": message_store,
            "memory": memory,
        },
    }))
}
