//! Bounded multi-priority work queue with retry and dead-letter semantics.
//!
//! Three FIFO buckets (high, normal, low) share a single capacity bound.
//! Failed jobs re-enter their bucket with exponential-table backoff until
//! their attempt budget runs out, at which point they move to the
//! dead-letter queue for operator inspection, replay, or clearing.
//!
//! # Basic Example
//!
//! ```rust
//! use conductor_queue::{DispatchQueue, JobPayload, Priority, QueueConfig};
//! use conductor_core::WorkerId;
//!
//! let queue = DispatchQueue::new(
//!     QueueConfig::builder()
//!         .max_queue_size(100)
//!         .max_attempts(3)
//!         .build(),
//! );
//!
//! let item = queue
//!     .enqueue(JobPayload::new("https://example.com/a.jpg"), Priority::High)
//!     .unwrap();
//!
//! let taken = queue.take_next(chrono::Utc::now()).unwrap();
//! assert_eq!(taken.id, item.id);
//!
//! let worker = WorkerId::from("ext-1");
//! queue.start(&item.id, &worker).unwrap();
//! queue.complete(&item.id, None).unwrap();
//! ```
//!
//! # Capacity Example
//!
//! The queue rejects admissions at capacity and raises
//! `queue:capacity:reached` exactly once per rising edge:
//!
//! ```rust
//! use conductor_queue::{DispatchQueue, JobPayload, Priority, QueueConfig, QueueError};
//!
//! let queue = DispatchQueue::new(
//!     QueueConfig::builder()
//!         .max_queue_size(1)
//!         .on_capacity_reached(|max| println!("queue full at {max}"))
//!         .build(),
//! );
//!
//! queue.enqueue(JobPayload::new("https://x/1"), Priority::Normal).unwrap();
//! let rejected = queue.enqueue(JobPayload::new("https://x/2"), Priority::Normal);
//! assert!(matches!(rejected, Err(QueueError::CapacityExceeded { .. })));
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod item;
pub mod queue;

pub use config::{QueueConfig, QueueConfigBuilder};
pub use error::{QueueError, Result};
pub use events::QueueEvent;
pub use item::{JobError, JobPayload, JobStatus, Priority, QueueItem};
pub use queue::{DispatchQueue, FailOutcome, QueueMetrics};
