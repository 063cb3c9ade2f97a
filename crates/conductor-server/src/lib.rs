//! HTTP and WebSocket surface for the conductor dispatch core.
//!
//! The server is a thin adapter: every dispatch semantic lives in the core
//! crates, and handlers translate between HTTP/WS and the engine. Routes
//! cover enqueue/cancel/status, the dead-letter queue, worker-side
//! completion, health, and the `/ws` worker channel.

use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use conductor_engine::DispatchEngine;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod health;
pub mod routes;
pub mod ws;

pub use config::ServerConfig;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: DispatchEngine,
    pub started_at: Instant,
}

/// Builds the full application router around an engine.
pub fn app(engine: DispatchEngine) -> Router {
    let state = AppState {
        engine,
        started_at: Instant::now(),
    };

    Router::new()
        .route("/queue/enqueue", post(routes::enqueue))
        .route("/queue/status", get(routes::queue_status))
        .route(
            "/queue/item/:id",
            get(routes::item_status).delete(routes::cancel_item),
        )
        .route("/queue/dlq", get(routes::dlq_list).delete(routes::dlq_clear))
        .route("/queue/dlq/:id/retry", post(routes::dlq_retry))
        .route("/queue/process/:id/complete", post(routes::complete_item))
        .route("/queue/process/:id/fail", post(routes::fail_item))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/health/detailed", get(health::detailed))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
