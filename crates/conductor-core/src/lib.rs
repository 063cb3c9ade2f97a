//! Core infrastructure for conductor.
//!
//! This crate provides shared functionality used across all conductor crates:
//! - Event system for observability
//! - Job and worker identifiers

pub mod events;
pub mod ids;

pub use events::{CoreEvent, EventListener, EventListeners, FnListener};
pub use ids::{JobId, WorkerId};
