//! Subscription options and handler plumbing.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::HandlerResult;
use crate::event::Event;

/// Per-subscriber delivery behavior.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Retry the handler after a failure or timeout.
    pub retry_on_failure: bool,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay between retries; doubled each attempt.
    pub retry_delay: Duration,
    /// Per-attempt handler timeout.
    pub timeout: Duration,
    /// Higher-priority subscribers are handed the event first.
    pub priority: i32,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            retry_on_failure: false,
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            timeout: Duration::from_secs(5),
            priority: 0,
        }
    }
}

impl SubscribeOptions {
    /// Options with retries enabled.
    pub fn retrying(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            retry_on_failure: true,
            max_retries,
            retry_delay,
            ..Default::default()
        }
    }

    /// Backoff before the given retry (1-indexed), doubling per attempt.
    pub(crate) fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1)).min(1 << 16);
        self.retry_delay.saturating_mul(factor)
    }
}

/// Boxed async event handler.
pub type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Identifier of a subscription, for unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);
