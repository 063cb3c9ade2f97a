//! Error types for engine operations.

use std::time::Duration;

use conductor_queue::QueueError;
use conductor_ratelimiter::Window;

/// Errors surfaced by the engine's public operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// A queue-side error: capacity, unknown job, or a state conflict.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// Admission control rejected the request.
    #[error("rate limited on {window}")]
    RateLimited {
        window: Window,
        /// Wait after which the violated windows free a slot, when
        /// computable.
        retry_after: Option<Duration>,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
