//! Error types for queue operations.

use conductor_core::JobId;

use crate::item::JobStatus;

/// Errors that can occur when operating on the queue.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    /// The queue is at capacity and cannot accept the job.
    #[error("queue capacity exceeded: max queue size ({max_queue_size}) reached")]
    CapacityExceeded {
        /// Maximum total queued jobs across all priorities.
        max_queue_size: usize,
    },
    /// No job with this id is known to the queue.
    #[error("job {0} not found")]
    NotFound(JobId),
    /// The job is not in a state that permits the requested transition.
    #[error("job {id} is {status:?} and cannot make this transition")]
    Conflict {
        /// Job the transition was attempted on.
        id: JobId,
        /// Status observed at the time of the attempt.
        status: JobStatus,
    },
    /// Priority string was not one of `high`, `normal`, `low`.
    #[error("invalid priority {0:?}: expected \"high\", \"normal\", or \"low\"")]
    InvalidPriority(String),
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
