//! Events emitted by the queue.

use std::time::{Duration, Instant};

use conductor_core::events::CoreEvent;
use conductor_core::JobId;

use crate::item::Priority;

/// Events emitted by the queue as jobs move through their lifecycle.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A job was admitted into a priority bucket.
    ItemAdded {
        component: String,
        timestamp: Instant,
        job_id: JobId,
        priority: Priority,
        depth: usize,
    },
    /// A job began processing on a worker.
    ItemProcessing {
        component: String,
        timestamp: Instant,
        job_id: JobId,
        attempt: u32,
    },
    /// A job completed successfully.
    ItemCompleted {
        component: String,
        timestamp: Instant,
        job_id: JobId,
        processing_time: Duration,
    },
    /// A failed job was requeued for retry.
    ItemRetry {
        component: String,
        timestamp: Instant,
        job_id: JobId,
        attempt: u32,
        delay: Duration,
    },
    /// A job exhausted its attempts and moved to the dead-letter queue.
    ItemDead {
        component: String,
        timestamp: Instant,
        job_id: JobId,
        attempts: u32,
    },
    /// A pending job was cancelled by the client.
    ItemCancelled {
        component: String,
        timestamp: Instant,
        job_id: JobId,
    },
    /// The queue reached capacity. Emitted exactly once per rising edge.
    CapacityReached {
        component: String,
        timestamp: Instant,
        max_queue_size: usize,
    },
    /// A dead-lettered job was re-admitted to its priority bucket.
    DlqReplayed {
        component: String,
        timestamp: Instant,
        job_id: JobId,
    },
    /// The dead-letter queue was cleared.
    DlqCleared {
        component: String,
        timestamp: Instant,
        removed: usize,
    },
}

impl CoreEvent for QueueEvent {
    fn event_type(&self) -> &'static str {
        match self {
            QueueEvent::ItemAdded { .. } => "queue:item:added",
            QueueEvent::ItemProcessing { .. } => "queue:item:processing",
            QueueEvent::ItemCompleted { .. } => "queue:item:completed",
            QueueEvent::ItemRetry { .. } => "queue:item:retry",
            QueueEvent::ItemDead { .. } => "queue:item:dlq",
            QueueEvent::ItemCancelled { .. } => "queue:item:cancelled",
            QueueEvent::CapacityReached { .. } => "queue:capacity:reached",
            QueueEvent::DlqReplayed { .. } => "queue:dlq:replayed",
            QueueEvent::DlqCleared { .. } => "queue:dlq:cleared",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            QueueEvent::ItemAdded { timestamp, .. }
            | QueueEvent::ItemProcessing { timestamp, .. }
            | QueueEvent::ItemCompleted { timestamp, .. }
            | QueueEvent::ItemRetry { timestamp, .. }
            | QueueEvent::ItemDead { timestamp, .. }
            | QueueEvent::ItemCancelled { timestamp, .. }
            | QueueEvent::CapacityReached { timestamp, .. }
            | QueueEvent::DlqReplayed { timestamp, .. }
            | QueueEvent::DlqCleared { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            QueueEvent::ItemAdded { component, .. }
            | QueueEvent::ItemProcessing { component, .. }
            | QueueEvent::ItemCompleted { component, .. }
            | QueueEvent::ItemRetry { component, .. }
            | QueueEvent::ItemDead { component, .. }
            | QueueEvent::ItemCancelled { component, .. }
            | QueueEvent::CapacityReached { component, .. }
            | QueueEvent::DlqReplayed { component, .. }
            | QueueEvent::DlqCleared { component, .. } => component,
        }
    }
}
