//! Admission control for the dispatch core.
//!
//! Requests are admitted against the composition of a tier profile
//! (free/premium/enterprise) and an optional per-endpoint override, with the
//! most restrictive limit per window winning. Timed windows use a sliding
//! log of admission timestamps; the concurrency cap counts in-flight jobs
//! per identifier and is released when a job reaches a terminal state.
//!
//! The backing store sits behind [`LimitStore`]; if it fails, the limiter
//! fails open and reports the error rather than blocking the dispatch path.
//!
//! # Example
//!
//! ```rust
//! use conductor_ratelimiter::{AdmissionLimiter, RateLimiterConfig, Tier};
//!
//! let limiter = AdmissionLimiter::new(RateLimiterConfig::builder().build());
//!
//! let decision = limiter.admit("client-42", "/queue/enqueue", Tier::Free);
//! assert!(decision.is_admitted());
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod limiter;
pub mod tiers;

pub use config::{RateLimiterConfig, RateLimiterConfigBuilder};
pub use error::{Result, StoreError};
pub use events::LimiterEvent;
pub use limiter::{Admission, AdmissionLimiter, LimitKey, LimitStore, MemoryStore};
pub use tiers::{RateLimitRules, Tier, Window};
