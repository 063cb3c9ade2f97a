//! Events emitted by the worker registry.

use std::time::Instant;

use conductor_core::events::CoreEvent;
use conductor_core::WorkerId;

/// Why a worker left the registry's routable set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LostReason {
    /// The worker (or its transport) deregistered explicitly.
    Deregistered(String),
    /// The worker missed too many consecutive heartbeats.
    HeartbeatTimeout,
}

/// Events emitted as workers connect, report health, and disappear.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A worker registered (or re-registered after a reconnect).
    Registered {
        component: String,
        timestamp: Instant,
        worker_id: WorkerId,
    },
    /// A worker missed a heartbeat interval.
    HeartbeatMissed {
        component: String,
        timestamp: Instant,
        worker_id: WorkerId,
        missed: u32,
        threshold: u32,
    },
    /// A worker reported degraded health and was removed from routing.
    Unhealthy {
        component: String,
        timestamp: Instant,
        worker_id: WorkerId,
    },
    /// A worker disconnected; its in-flight jobs need failover.
    Lost {
        component: String,
        timestamp: Instant,
        worker_id: WorkerId,
        reason: LostReason,
    },
}

impl CoreEvent for WorkerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WorkerEvent::Registered { .. } => "worker:registered",
            WorkerEvent::HeartbeatMissed { .. } => "worker:heartbeat:missed",
            WorkerEvent::Unhealthy { .. } => "worker:unhealthy",
            WorkerEvent::Lost { .. } => "worker:lost",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            WorkerEvent::Registered { timestamp, .. }
            | WorkerEvent::HeartbeatMissed { timestamp, .. }
            | WorkerEvent::Unhealthy { timestamp, .. }
            | WorkerEvent::Lost { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            WorkerEvent::Registered { component, .. }
            | WorkerEvent::HeartbeatMissed { component, .. }
            | WorkerEvent::Unhealthy { component, .. }
            | WorkerEvent::Lost { component, .. } => component,
        }
    }
}
