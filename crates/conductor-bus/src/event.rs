//! The lifecycle event envelope.

use chrono::{DateTime, Utc};
use conductor_core::{JobId, WorkerId};
use serde::{Deserialize, Serialize};

/// Well-known event kinds.
pub mod kinds {
    pub const TOOL_ACTIVATING: &str = "tool:activating";
    pub const TOOL_ACTIVATED: &str = "tool:activated";
    pub const TOOL_ACTIVATION_FAILED: &str = "tool:activation:failed";
    pub const EXECUTION_STARTED: &str = "execution:started";
    pub const EXECUTION_COMPLETED: &str = "execution:completed";
    pub const EXECUTION_FAILED: &str = "execution:failed";
    pub const QUEUE_ITEM_ADDED: &str = "queue:item:added";
    pub const QUEUE_ITEM_PROCESSING: &str = "queue:item:processing";
    pub const QUEUE_PROCESS: &str = "queue:process";
    pub const QUEUE_ITEM_COMPLETED: &str = "queue:item:completed";
    pub const QUEUE_ITEM_RETRY: &str = "queue:item:retry";
    pub const QUEUE_ITEM_DLQ: &str = "queue:item:dlq";
    pub const QUEUE_CAPACITY_REACHED: &str = "queue:capacity:reached";
}

/// A lifecycle event: `{type, timestamp, data}`.
///
/// The kind is an open string so integrations can publish their own events
/// through the same bus; the constants in [`kinds`] cover the dispatch
/// lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Event {
    /// Creates an event of the given kind.
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// Creates an event addressed to a specific worker.
    pub fn directed(
        kind: impl Into<String>,
        worker_id: &WorkerId,
        mut data: serde_json::Value,
    ) -> Self {
        if let Some(map) = data.as_object_mut() {
            map.insert(
                "worker_id".to_string(),
                serde_json::Value::String(worker_id.to_string()),
            );
        }
        Self::new(kind, data)
    }

    /// Worker address carried in the payload, when present.
    pub fn worker_id(&self) -> Option<WorkerId> {
        self.data
            .get("worker_id")
            .and_then(|value| value.as_str())
            .map(WorkerId::from)
    }

    /// Job id carried in the payload, when present.
    pub fn job_id(&self) -> Option<JobId> {
        self.data
            .get("job_id")
            .and_then(|value| value.as_str())
            .map(JobId::from)
    }
}
