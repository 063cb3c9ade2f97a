//! Worker registry with heartbeat-driven liveness and capability routing.
//!
//! Workers register over the worker channel, advertise capabilities, and
//! ping at a fixed heartbeat interval. A background monitor accrues misses
//! for quiet workers and disconnects them at the miss threshold, firing
//! `worker:lost` so the dispatcher can fail their jobs over. Routing picks
//! the affinity worker when it is connected and capable, otherwise the
//! least-loaded capable worker.
//!
//! # Example
//!
//! ```rust
//! use conductor_registry::{RegistryConfig, WorkerRegistry};
//! use conductor_core::WorkerId;
//! use std::collections::HashSet;
//!
//! let registry = WorkerRegistry::new(RegistryConfig::builder().build());
//!
//! let mut caps = HashSet::new();
//! caps.insert("download".to_string());
//! registry.register(WorkerId::from("ext-1"), caps, serde_json::Value::Null);
//!
//! let decision = registry.route(None, &["download".to_string()]).unwrap();
//! assert_eq!(decision.worker_id, WorkerId::from("ext-1"));
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod router;
pub mod worker;

pub use config::{RegistryConfig, RegistryConfigBuilder};
pub use error::{RegistryError, Result};
pub use events::{LostReason, WorkerEvent};
pub use registry::{MonitorHandle, WorkerRegistry};
pub use router::{RouteDecision, RouteReason};
pub use worker::{Worker, WorkerStats, WorkerStatus};
