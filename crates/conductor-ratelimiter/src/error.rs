//! Error types for admission control.

/// Errors from the limiter's backing store.
///
/// A store error never blocks the dispatch path: the limiter fails open and
/// reports the error through events and logs.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("rate-limit store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
