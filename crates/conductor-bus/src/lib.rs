//! Event bus and worker fanout for the dispatch core.
//!
//! Lifecycle events are published into an in-process hub. Subscribers get
//! per-subscription FIFO delivery with timeout, optional retries with
//! exponential backoff, and a bounded dead-letter list on exhaustion. The
//! attached [`FanoutBridge`] forwards every event to connected workers:
//! directed when the event names a `worker_id`, broadcast otherwise.
//!
//! # Example
//!
//! ```rust
//! use conductor_bus::{BusConfig, Event, EventBus, SubscribeOptions, kinds};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = EventBus::new(BusConfig::builder().build());
//!
//! bus.subscribe(kinds::EXECUTION_COMPLETED, SubscribeOptions::default(), |event| async move {
//!     println!("completed: {:?}", event.job_id());
//!     Ok(())
//! });
//!
//! bus.publish(Event::new(
//!     kinds::EXECUTION_COMPLETED,
//!     serde_json::json!({"job_id": "j1"}),
//! ));
//! # }
//! ```

pub mod bridge;
pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod subscription;

pub use bridge::{Fanout, FanoutBridge};
pub use bus::{DeadEvent, EventBus};
pub use config::{BusConfig, BusConfigBuilder};
pub use error::{HandlerError, HandlerResult};
pub use event::{kinds, Event};
pub use subscription::{SubscribeOptions, SubscriptionId};
