//! Error types for event delivery.

use std::time::Duration;

/// Errors a subscriber handler can produce (or have produced for it).
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// The handler reported a failure.
    #[error("handler failed: {0}")]
    Failed(String),
    /// The handler exceeded its configured timeout.
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),
}

impl HandlerError {
    /// Convenience constructor for string failures.
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Result type for subscriber handlers.
pub type HandlerResult = std::result::Result<(), HandlerError>;
