//! Engine configuration.

use std::time::Duration;

use conductor_ratelimiter::RateLimiterConfig;

/// Configuration for a [`DispatchEngine`](crate::DispatchEngine).
pub struct EngineConfig {
    pub(crate) name: String,
    pub(crate) max_concurrent: usize,
    pub(crate) rate_limit: f64,
    pub(crate) max_queue_size: usize,
    pub(crate) max_attempts: u32,
    pub(crate) processing_timeout: Duration,
    pub(crate) retry_delays: Vec<Duration>,
    pub(crate) fallback_retry_delay: Duration,
    pub(crate) no_worker_backoff: Duration,
    pub(crate) no_worker_grace: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) heartbeat_miss_threshold: u32,
    pub(crate) bus_dlq_size: usize,
    pub(crate) limiter: RateLimiterConfig,
}

impl EngineConfig {
    /// Creates a builder with defaults.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}

/// Builder for [`EngineConfig`].
pub struct EngineConfigBuilder {
    name: String,
    max_concurrent: usize,
    rate_limit: f64,
    max_queue_size: usize,
    max_attempts: u32,
    processing_timeout: Duration,
    retry_delays: Vec<Duration>,
    fallback_retry_delay: Duration,
    no_worker_backoff: Duration,
    no_worker_grace: Duration,
    heartbeat_interval: Duration,
    heartbeat_miss_threshold: u32,
    bus_dlq_size: usize,
    limiter: Option<RateLimiterConfig>,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - max_concurrent: 5
    /// - rate_limit: 10 dispatches/second
    /// - max_queue_size: 1000
    /// - max_attempts: 3
    /// - processing_timeout: 30s
    /// - retry_delays: `[1s, 5s, 15s]`, fallback 30s
    /// - no_worker_backoff: 250ms, no_worker_grace: 10s
    /// - heartbeat_interval: 30s, heartbeat_miss_threshold: 3
    /// - bus_dlq_size: 1000
    pub fn new() -> Self {
        Self {
            name: "dispatch".to_string(),
            max_concurrent: 5,
            rate_limit: 10.0,
            max_queue_size: 1000,
            max_attempts: 3,
            processing_timeout: Duration::from_secs(30),
            retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(15),
            ],
            fallback_retry_delay: Duration::from_secs(30),
            no_worker_backoff: Duration::from_millis(250),
            no_worker_grace: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_miss_threshold: 3,
            bus_dlq_size: 1000,
            limiter: None,
        }
    }

    /// Sets the name used in events, logs, and metrics.
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the maximum jobs processing at once.
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Sets the dispatch pacing in jobs per second.
    pub fn rate_limit(mut self, per_second: f64) -> Self {
        self.rate_limit = per_second;
        self
    }

    /// Sets the queue capacity.
    pub fn max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = max;
        self
    }

    /// Sets the attempt budget per job.
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Sets the per-job processing timeout; expiry synthesizes a failure.
    pub fn processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    /// Sets the retry delay table (indexed by `attempts - 1`, last entry
    /// reused).
    pub fn retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Sets the delay used when the retry table is empty.
    pub fn fallback_retry_delay(mut self, delay: Duration) -> Self {
        self.fallback_retry_delay = delay;
        self
    }

    /// Sets the re-bucket backoff applied when no worker is available.
    pub fn no_worker_backoff(mut self, backoff: Duration) -> Self {
        self.no_worker_backoff = backoff;
        self
    }

    /// Sets how long a job may wait for a worker before a warning surfaces.
    pub fn no_worker_grace(mut self, grace: Duration) -> Self {
        self.no_worker_grace = grace;
        self
    }

    /// Sets the expected worker heartbeat interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets how many missed intervals disconnect a worker.
    pub fn heartbeat_miss_threshold(mut self, threshold: u32) -> Self {
        self.heartbeat_miss_threshold = threshold;
        self
    }

    /// Sets the bound on the event bus dead-letter list.
    pub fn bus_dlq_size(mut self, max: usize) -> Self {
        self.bus_dlq_size = max;
        self
    }

    /// Replaces the admission-control configuration.
    pub fn limiter(mut self, limiter: RateLimiterConfig) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Builds the engine configuration.
    pub fn build(self) -> EngineConfig {
        EngineConfig {
            name: self.name,
            max_concurrent: self.max_concurrent,
            rate_limit: self.rate_limit,
            max_queue_size: self.max_queue_size,
            max_attempts: self.max_attempts,
            processing_timeout: self.processing_timeout,
            retry_delays: self.retry_delays,
            fallback_retry_delay: self.fallback_retry_delay,
            no_worker_backoff: self.no_worker_backoff,
            no_worker_grace: self.no_worker_grace,
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_miss_threshold: self.heartbeat_miss_threshold,
            bus_dlq_size: self.bus_dlq_size,
            limiter: self
                .limiter
                .unwrap_or_else(|| RateLimiterConfig::builder().build()),
        }
    }
}
