//! The dispatch engine.
//!
//! Composes the queue, admission limiter, worker registry, and event bus
//! into the dispatch loop: admit, select by priority, pace with a token
//! bucket under a concurrency gate, route to a worker, bound each hand-off
//! with a processing timeout, and requeue / dead-letter / fail over as
//! outcomes come back.
//!
//! # Example
//!
//! ```rust,no_run
//! use conductor_engine::{DispatchEngine, EngineConfig};
//! use conductor_queue::{JobPayload, Priority};
//! use conductor_core::WorkerId;
//! use std::collections::HashSet;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let engine = DispatchEngine::new(EngineConfig::builder().max_concurrent(8).build());
//!
//! let mut caps = HashSet::new();
//! caps.insert("download".to_string());
//! engine.registry().register(WorkerId::from("ext-1"), caps, serde_json::Value::Null);
//!
//! let handle = engine.start();
//! let item = engine
//!     .enqueue(JobPayload::new("https://example.com/a.jpg"), Priority::Normal)
//!     .unwrap();
//!
//! // ... the worker completes over its channel ...
//! engine.complete(&item.id, None).ok();
//! handle.stop().await;
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod token_bucket;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::{DispatchEngine, EngineHandle};
pub use error::{EngineError, Result};
pub use token_bucket::TokenBucket;
