//! Events emitted by admission control.

use std::time::{Duration, Instant};

use conductor_core::events::CoreEvent;

use crate::tiers::Window;

/// Events emitted as requests pass through admission control.
#[derive(Debug, Clone)]
pub enum LimiterEvent {
    /// A request was admitted; all window counters were incremented.
    Admitted {
        component: String,
        timestamp: Instant,
        identifier: String,
        endpoint: String,
    },
    /// A request was rejected; no counter was incremented.
    Rejected {
        component: String,
        timestamp: Instant,
        identifier: String,
        endpoint: String,
        window: Window,
        retry_after: Option<Duration>,
    },
    /// The backing store failed; the request was admitted fail-open.
    StoreError {
        component: String,
        timestamp: Instant,
        error: String,
    },
}

impl CoreEvent for LimiterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LimiterEvent::Admitted { .. } => "limiter:admitted",
            LimiterEvent::Rejected { .. } => "limiter:rejected",
            LimiterEvent::StoreError { .. } => "limiter:store_error",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            LimiterEvent::Admitted { timestamp, .. }
            | LimiterEvent::Rejected { timestamp, .. }
            | LimiterEvent::StoreError { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            LimiterEvent::Admitted { component, .. }
            | LimiterEvent::Rejected { component, .. }
            | LimiterEvent::StoreError { component, .. } => component,
        }
    }
}
