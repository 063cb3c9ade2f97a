//! Error types for registry operations.

use conductor_core::WorkerId;

/// Errors that can occur when operating on the worker registry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// No worker with this id is registered.
    #[error("worker {0} not found")]
    NotFound(WorkerId),
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
