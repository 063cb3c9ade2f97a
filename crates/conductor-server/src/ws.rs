//! The worker channel: persistent bidirectional JSON frames.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use conductor_bus::{kinds, Event};
use conductor_core::WorkerId;
use conductor_queue::JobError;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::AppState;

/// Frames a worker sends to the server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerFrame {
    /// First frame after connecting: identity and capabilities.
    Init {
        worker_id: String,
        #[serde(default)]
        capabilities: Vec<String>,
        #[serde(default)]
        metadata: serde_json::Value,
    },
    /// Periodic liveness ping.
    Heartbeat {
        #[serde(default)]
        ts: Option<i64>,
        #[serde(default)]
        health: Option<serde_json::Value>,
    },
    /// Successful completion of a dispatched job.
    Complete {
        job_id: String,
        #[serde(default)]
        result: Option<serde_json::Value>,
    },
    /// Failed execution of a dispatched job.
    Fail { job_id: String, error: WireError },
}

/// Error payload of a `fail` frame.
#[derive(Debug, Deserialize)]
pub struct WireError {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub recoverable: bool,
}

/// Translates a bus event into the frame a worker receives, if any.
///
/// The hand-off event becomes the `dispatch` frame; tool and execution
/// lifecycle events are forwarded under the `ai:tool:` prefix. Internal
/// queue events stay server-side.
pub fn frame_for_event(event: &Event) -> Option<serde_json::Value> {
    if event.kind == kinds::QUEUE_PROCESS {
        return Some(serde_json::json!({
            "type": "dispatch",
            "job_id": event.data.get("job_id"),
            "payload": event.data.get("payload"),
            "timeout_ms": event.data.get("timeout_ms"),
            "attempt": event.data.get("attempt"),
        }));
    }
    if let Some(rest) = event.kind.strip_prefix("tool:") {
        return Some(serde_json::json!({
            "type": format!("ai:tool:{rest}"),
            "timestamp": event.timestamp,
            "data": event.data,
        }));
    }
    if let Some(rest) = event.kind.strip_prefix("execution:") {
        return Some(serde_json::json!({
            "type": format!("ai:tool:execution:{rest}"),
            "timestamp": event.timestamp,
            "data": event.data,
        }));
    }
    None
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut registered: Option<WorkerId> = None;

    // One writer per socket; bridge events are forwarded into it once the
    // worker has introduced itself.
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(text) = frame_rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let frame: WorkerFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::debug!(%error, "ignoring malformed worker frame");
                continue;
            }
        };

        match frame {
            WorkerFrame::Init {
                worker_id,
                capabilities,
                metadata,
            } => {
                if registered.is_some() {
                    tracing::debug!(worker_id = %worker_id, "ignoring repeated init frame");
                    continue;
                }
                let worker_id = WorkerId::from(worker_id);
                state.engine.registry().register(
                    worker_id.clone(),
                    capabilities.into_iter().collect(),
                    metadata,
                );

                // Frames flow bus -> bridge channel -> writer from here on.
                // The forwarder ends when the bridge drops this sender.
                let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
                state.engine.bridge().register(worker_id.clone(), tx);
                let forward_tx = frame_tx.clone();
                tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if let Some(frame) = frame_for_event(&event) {
                            if forward_tx.send(frame.to_string()).is_err() {
                                break;
                            }
                        }
                    }
                });
                registered = Some(worker_id);
            }
            WorkerFrame::Heartbeat { health, .. } => {
                let Some(worker_id) = &registered else { continue };
                let healthy = health
                    .as_ref()
                    .and_then(|value| value.get("status"))
                    .and_then(|status| status.as_str())
                    .map(|status| status != "degraded" && status != "unhealthy")
                    .unwrap_or(true);
                if let Err(error) = state.engine.registry().heartbeat(worker_id, healthy) {
                    tracing::debug!(worker_id = %worker_id, %error, "heartbeat from unknown worker");
                }
            }
            WorkerFrame::Complete { job_id, result } => {
                let id = conductor_core::JobId::from(job_id);
                if let Err(error) = state.engine.complete(&id, result) {
                    tracing::debug!(job_id = %id, %error, "completion not applied");
                }
            }
            WorkerFrame::Fail { job_id, error } => {
                let id = conductor_core::JobId::from(job_id);
                let job_error = JobError {
                    message: error.message,
                    code: error.code,
                    trace: None,
                };
                if let Err(error) = state.engine.fail(&id, job_error) {
                    tracing::debug!(job_id = %id, %error, "failure not applied");
                }
            }
        }
    }

    if let Some(worker_id) = registered {
        state.engine.bridge().unregister(&worker_id);
        if let Err(error) = state
            .engine
            .registry()
            .deregister(&worker_id, "socket closed")
        {
            tracing::debug!(worker_id = %worker_id, %error, "worker already deregistered");
        }
    }
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_frame_parses() {
        let frame: WorkerFrame = serde_json::from_str(
            r#"{"type":"init","worker_id":"ext-1","capabilities":["download"],"metadata":{"version":"1.2.0"}}"#,
        )
        .unwrap();
        match frame {
            WorkerFrame::Init {
                worker_id,
                capabilities,
                ..
            } => {
                assert_eq!(worker_id, "ext-1");
                assert_eq!(capabilities, vec!["download"]);
            }
            other => panic!("expected init, got {other:?}"),
        }
    }

    #[test]
    fn heartbeat_frame_parses_without_health() {
        let frame: WorkerFrame =
            serde_json::from_str(r#"{"type":"heartbeat","ts":1712345678}"#).unwrap();
        assert!(matches!(frame, WorkerFrame::Heartbeat { health: None, .. }));
    }

    #[test]
    fn fail_frame_parses() {
        let frame: WorkerFrame = serde_json::from_str(
            r#"{"type":"fail","job_id":"j1","error":{"code":"ETIMEDOUT","message":"timed out","recoverable":true}}"#,
        )
        .unwrap();
        match frame {
            WorkerFrame::Fail { job_id, error } => {
                assert_eq!(job_id, "j1");
                assert_eq!(error.code.as_deref(), Some("ETIMEDOUT"));
                assert!(error.recoverable);
            }
            other => panic!("expected fail, got {other:?}"),
        }
    }

    #[test]
    fn handoff_event_becomes_dispatch_frame() {
        let event = Event::directed(
            kinds::QUEUE_PROCESS,
            &WorkerId::from("ext-1"),
            serde_json::json!({
                "job_id": "j1",
                "payload": {"target_url": "https://x/1.jpg"},
                "timeout_ms": 30000,
                "attempt": 1,
            }),
        );
        let frame = frame_for_event(&event).unwrap();
        assert_eq!(frame["type"], "dispatch");
        assert_eq!(frame["job_id"], "j1");
        assert_eq!(frame["timeout_ms"], 30000);
    }

    #[test]
    fn tool_events_get_the_ai_prefix() {
        let event = Event::new(kinds::TOOL_ACTIVATING, serde_json::json!({"job_id": "j1"}));
        let frame = frame_for_event(&event).unwrap();
        assert_eq!(frame["type"], "ai:tool:activating");

        let event = Event::new(kinds::EXECUTION_FAILED, serde_json::json!({"job_id": "j1"}));
        let frame = frame_for_event(&event).unwrap();
        assert_eq!(frame["type"], "ai:tool:execution:failed");
    }

    #[test]
    fn internal_queue_events_stay_server_side() {
        let event = Event::new(kinds::QUEUE_ITEM_ADDED, serde_json::json!({"job_id": "j1"}));
        assert!(frame_for_event(&event).is_none());
    }
}
