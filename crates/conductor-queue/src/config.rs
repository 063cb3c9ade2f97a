//! Queue configuration.

use std::time::Duration;

use conductor_core::events::{EventListeners, FnListener};

use crate::events::QueueEvent;

/// Configuration for a [`DispatchQueue`](crate::DispatchQueue).
pub struct QueueConfig {
    pub(crate) name: String,
    pub(crate) max_queue_size: usize,
    pub(crate) max_attempts: u32,
    pub(crate) retry_delays: Vec<Duration>,
    pub(crate) fallback_retry_delay: Duration,
    pub(crate) throughput_window: Duration,
    pub(crate) event_listeners: EventListeners<QueueEvent>,
}

impl QueueConfig {
    /// Creates a builder with defaults.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::new()
    }
}

/// Builder for [`QueueConfig`].
pub struct QueueConfigBuilder {
    name: String,
    max_queue_size: usize,
    max_attempts: u32,
    retry_delays: Vec<Duration>,
    fallback_retry_delay: Duration,
    throughput_window: Duration,
    event_listeners: EventListeners<QueueEvent>,
}

impl Default for QueueConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - max_queue_size: 1000
    /// - max_attempts: 3
    /// - retry_delays: `[1s, 5s, 15s]` (last entry reused for later attempts)
    /// - fallback_retry_delay: 30s (used when the delay table is empty)
    /// - throughput_window: 60s
    pub fn new() -> Self {
        Self {
            name: "queue".to_string(),
            max_queue_size: 1000,
            max_attempts: 3,
            retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(15),
            ],
            fallback_retry_delay: Duration::from_secs(30),
            throughput_window: Duration::from_secs(60),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the name for this queue instance (used in events).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the maximum total queued jobs across all priorities.
    pub fn max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = max;
        self
    }

    /// Sets the default attempt budget for admitted jobs.
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Sets the retry delay table, indexed by `attempts - 1`.
    ///
    /// The last entry is reused for all attempts past the end of the table.
    pub fn retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Sets the delay used when the retry table is empty.
    pub fn fallback_retry_delay(mut self, delay: Duration) -> Self {
        self.fallback_retry_delay = delay;
        self
    }

    /// Sets the trailing window over which throughput is measured.
    pub fn throughput_window(mut self, window: Duration) -> Self {
        self.throughput_window = window;
        self
    }

    /// Registers a callback for every queue event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Registers a callback fired when the queue reaches capacity.
    ///
    /// Fired exactly once per rising edge.
    pub fn on_capacity_reached<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let QueueEvent::CapacityReached { max_queue_size, .. } = event {
                f(*max_queue_size);
            }
        }));
        self
    }

    /// Registers a callback fired when a job is dead-lettered.
    pub fn on_item_dead<F>(mut self, f: F) -> Self
    where
        F: Fn(&conductor_core::JobId, u32) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let QueueEvent::ItemDead {
                job_id, attempts, ..
            } = event
            {
                f(job_id, *attempts);
            }
        }));
        self
    }

    /// Builds the queue configuration.
    pub fn build(self) -> QueueConfig {
        QueueConfig {
            name: self.name,
            max_queue_size: self.max_queue_size,
            max_attempts: self.max_attempts,
            retry_delays: self.retry_delays,
            fallback_retry_delay: self.fallback_retry_delay,
            throughput_window: self.throughput_window,
            event_listeners: self.event_listeners,
        }
    }
}

impl QueueConfig {
    /// Delay before the retry following the given attempt number (1-indexed).
    ///
    /// Indexed by `attempts - 1`; the last table entry covers all further
    /// attempts, and an empty table falls back to `fallback_retry_delay`.
    pub fn retry_delay_for(&self, attempts: u32) -> Duration {
        let index = attempts.saturating_sub(1) as usize;
        self.retry_delays
            .get(index)
            .or_else(|| self.retry_delays.last())
            .copied()
            .unwrap_or(self.fallback_retry_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = QueueConfig::builder().build();
        assert_eq!(config.max_queue_size, 1000);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_delays.len(), 3);
    }

    #[test]
    fn retry_delay_indexing_reuses_last_entry() {
        let config = QueueConfig::builder()
            .retry_delays(vec![Duration::from_millis(10), Duration::from_millis(20)])
            .build();
        assert_eq!(config.retry_delay_for(1), Duration::from_millis(10));
        assert_eq!(config.retry_delay_for(2), Duration::from_millis(20));
        assert_eq!(config.retry_delay_for(3), Duration::from_millis(20));
        assert_eq!(config.retry_delay_for(9), Duration::from_millis(20));
    }

    #[test]
    fn empty_retry_table_uses_fallback() {
        let config = QueueConfig::builder()
            .retry_delays(vec![])
            .fallback_retry_delay(Duration::from_secs(7))
            .build();
        assert_eq!(config.retry_delay_for(1), Duration::from_secs(7));
    }
}
