//! The unit of work tracked by the queue.

use chrono::{DateTime, Utc};
use conductor_core::{JobId, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::QueueError;

/// Priority level of a queued job. Immutable after admission.
///
/// Within a priority the queue is strict FIFO; across priorities, `High` is
/// fully drained before `Normal`, and `Normal` before `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// All priorities in drain order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub(crate) fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    /// Returns the lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = QueueError;

    /// Accepts exactly `high`, `normal`, or `low`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(QueueError::InvalidPriority(other.to_string())),
        }
    }
}

/// Lifecycle status of a job.
///
/// Transitions are monotonic: `pending → processing → (completed |
/// failed-awaiting-retry | dead)`. `Failed` re-enters `processing` when its
/// retry comes due; `Completed` and `Dead` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    /// Failed its most recent attempt and is queued awaiting retry.
    Failed,
    /// Exhausted all attempts; held in the dead-letter queue.
    Dead,
}

impl JobStatus {
    /// True for states a job can be dispatched from.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Failed)
    }

    /// True for terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Dead)
    }
}

/// Error recorded on a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl JobError {
    /// Creates an error with a message and no code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            trace: None,
        }
    }

    /// Creates an error with a message and machine-readable code.
    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
            trace: None,
        }
    }
}

/// Payload carried by a job; opaque to the queue apart from the recognized
/// routing fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPayload {
    /// Target of the automation/download request.
    pub target_url: String,
    /// Request headers forwarded to the worker.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Arbitrary caller metadata, passed through untouched.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    /// Worker affinity: route to this worker when it is connected and capable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addon_id: Option<WorkerId>,
    /// Invoked by the caller's infrastructure on completion; not used here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Tool activation descriptor for `tool:*` lifecycle events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<serde_json::Value>,
}

impl JobPayload {
    /// Creates a payload targeting the given URL.
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            headers: HashMap::new(),
            metadata: serde_json::Value::Null,
            addon_id: None,
            callback_url: None,
            tool: None,
        }
    }

    /// Capabilities a worker must advertise to execute this payload.
    ///
    /// Derived from the tool descriptor when present; plain download jobs
    /// require the `download` capability.
    pub fn required_capabilities(&self) -> Vec<String> {
        if let Some(tool) = &self.tool {
            if let Some(caps) = tool.get("capabilities").and_then(|c| c.as_array()) {
                return caps
                    .iter()
                    .filter_map(|c| c.as_str().map(str::to_string))
                    .collect();
            }
        }
        vec!["download".to_string()]
    }
}

/// A job admitted to the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: JobId,
    pub priority: Priority,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Failover re-routes; tracked separately from `attempts` and never
    /// counted against `max_attempts`.
    pub reroutes: u32,
    /// Admission identity, used to release the concurrent-rate counter when
    /// the job reaches a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    /// Worker currently executing the job, while `status == processing`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<WorkerId>,
}

impl QueueItem {
    pub(crate) fn new(payload: JobPayload, priority: Priority, max_attempts: u32) -> Self {
        Self {
            id: JobId::generate(),
            priority,
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            reroutes: 0,
            identifier: None,
            created_at: Utc::now(),
            last_attempt_at: None,
            completed_at: None,
            next_retry_at: None,
            error: None,
            result: None,
            processing_time_ms: None,
            owner: None,
        }
    }
}
