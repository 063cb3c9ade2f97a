//! Sliding-window admission with burst and concurrency caps.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use conductor_core::events::CoreEvent;

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::config::RateLimiterConfig;
use crate::error::{Result, StoreError};
use crate::events::LimiterEvent;
use crate::tiers::{RateLimitRules, Tier, Window};

/// Key a window log is kept under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimitKey {
    pub identifier: String,
    pub endpoint: String,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Every active window had headroom; all counters were incremented.
    Admitted,
    /// At least one window was saturated; no counter was incremented.
    Rejected {
        window: Window,
        limit: u32,
        /// Earliest wait after which every violated timed window frees a
        /// slot. Absent for the concurrency cap.
        retry_after: Option<Duration>,
    },
}

impl Admission {
    /// True when the request was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Backing store for window logs and concurrency counters.
///
/// The in-process [`MemoryStore`] is the default; a distributed deployment
/// swaps in its own adapter. Store failures never block admission: the
/// limiter fails open.
pub trait LimitStore: Send + Sync {
    /// Checks every active window at `now` and records the admission
    /// atomically; a rejection records nothing.
    fn try_admit(&self, key: &LimitKey, rules: &RateLimitRules, now: Instant) -> Result<Admission>;

    /// Releases one unit of the identifier's concurrency counter.
    fn release(&self, identifier: &str) -> Result<()>;

    /// Current concurrency count for an identifier.
    fn concurrent_count(&self, identifier: &str) -> Result<usize>;
}

/// Sliding log for one `(identifier, endpoint)` key: a timestamp deque per
/// timed window, trimmed on access.
#[derive(Debug, Default)]
struct WindowLog {
    logs: [VecDeque<Instant>; 4],
}

impl WindowLog {
    fn trim(&mut self, now: Instant) {
        for (index, window) in Window::TIMED.iter().enumerate() {
            let duration = window
                .duration()
                .unwrap_or_else(|| Duration::from_secs(86_400));
            let log = &mut self.logs[index];
            while let Some(&front) = log.front() {
                if now.duration_since(front) >= duration {
                    log.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// Worst violated window and the wait until all violated windows free a
    /// slot, or `None` when every window has headroom.
    fn violation(&self, rules: &RateLimitRules, now: Instant) -> Option<(Window, u32, Duration)> {
        let mut worst: Option<(Window, u32, Duration)> = None;
        for (index, window) in Window::TIMED.iter().enumerate() {
            let Some(limit) = rules.limit_for(*window) else {
                continue;
            };
            let log = &self.logs[index];
            if (log.len() as u32) < limit {
                continue;
            }
            let duration = window
                .duration()
                .unwrap_or_else(|| Duration::from_secs(86_400));
            let wait = log
                .front()
                .map(|&oldest| (oldest + duration).saturating_duration_since(now))
                .unwrap_or(Duration::ZERO);
            match worst {
                Some((_, _, current)) if current >= wait => {}
                _ => worst = Some((*window, limit, wait)),
            }
        }
        worst
    }

    fn record(&mut self, now: Instant) {
        for log in &mut self.logs {
            log.push_back(now);
        }
    }
}

/// In-process limit store: per-key window logs and per-identifier
/// concurrency counters, each behind its own lock.
#[derive(Default)]
pub struct MemoryStore {
    windows: RwLock<HashMap<LimitKey, Arc<Mutex<WindowLog>>>>,
    concurrent: RwLock<HashMap<String, Arc<Mutex<usize>>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn window_log(&self, key: &LimitKey) -> Arc<Mutex<WindowLog>> {
        if let Ok(map) = self.windows.read() {
            if let Some(log) = map.get(key) {
                return Arc::clone(log);
            }
        }
        let mut map = match self.windows.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(map.entry(key.clone()).or_default())
    }

    fn counter(&self, identifier: &str) -> Arc<Mutex<usize>> {
        if let Ok(map) = self.concurrent.read() {
            if let Some(count) = map.get(identifier) {
                return Arc::clone(count);
            }
        }
        let mut map = match self.concurrent.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(map.entry(identifier.to_string()).or_default())
    }
}

impl LimitStore for MemoryStore {
    fn try_admit(&self, key: &LimitKey, rules: &RateLimitRules, now: Instant) -> Result<Admission> {
        let log_arc = self.window_log(key);
        let mut log = match log_arc.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        log.trim(now);

        if let Some((window, limit, wait)) = log.violation(rules, now) {
            return Ok(Admission::Rejected {
                window,
                limit,
                retry_after: Some(wait),
            });
        }

        // Timed windows pass; the concurrency cap decides, and both counters
        // move together while the window log is still locked.
        if let Some(limit) = rules.concurrent {
            let counter_arc = self.counter(&key.identifier);
            let mut count = match counter_arc.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *count as u32 >= limit {
                return Ok(Admission::Rejected {
                    window: Window::Concurrent,
                    limit,
                    retry_after: None,
                });
            }
            *count += 1;
        }

        log.record(now);
        Ok(Admission::Admitted)
    }

    fn release(&self, identifier: &str) -> Result<()> {
        let counter_arc = self.counter(identifier);
        let mut count = match counter_arc.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *count = count.saturating_sub(1);
        Ok(())
    }

    fn concurrent_count(&self, identifier: &str) -> Result<usize> {
        let counter_arc = self.counter(identifier);
        let count = match counter_arc.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(*count)
    }
}

/// Tier-driven admission control. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AdmissionLimiter {
    config: Arc<RateLimiterConfig>,
    store: Arc<dyn LimitStore>,
}

impl AdmissionLimiter {
    /// Creates a limiter backed by the in-process store.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Creates a limiter backed by a custom store.
    pub fn with_store(config: RateLimiterConfig, store: Arc<dyn LimitStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }

    /// Checks and records an admission at the current instant.
    pub fn admit(&self, identifier: &str, endpoint: &str, tier: Tier) -> Admission {
        self.admit_at(identifier, endpoint, tier, Instant::now())
    }

    /// Checks and records an admission at an explicit instant.
    pub fn admit_at(&self, identifier: &str, endpoint: &str, tier: Tier, now: Instant) -> Admission {
        let rules = self.config.resolve(tier, endpoint);
        let key = LimitKey {
            identifier: identifier.to_string(),
            endpoint: endpoint.to_string(),
        };
        match self.store.try_admit(&key, &rules, now) {
            Ok(admission) => {
                self.report(identifier, endpoint, &admission);
                admission
            }
            Err(error) => {
                // Fail open: the limiter must never block dispatch.
                tracing::warn!(%error, identifier, endpoint, "rate-limit store failed; admitting");
                self.config.event_listeners.emit(&LimiterEvent::StoreError {
                    component: self.config.name.clone(),
                    timestamp: Instant::now(),
                    error: error.to_string(),
                });

                #[cfg(feature = "metrics")]
                counter!("conductor_limiter_store_errors_total", "limiter" => self.config.name.clone())
                    .increment(1);

                Admission::Admitted
            }
        }
    }

    /// Releases one unit of the identifier's concurrency counter; called
    /// when a job reaches a terminal state.
    pub fn release(&self, identifier: &str) {
        if let Err(error) = self.store.release(identifier) {
            tracing::warn!(%error, identifier, "rate-limit store failed on release");
        }
    }

    /// Current concurrency count for an identifier; zero when unknown or on
    /// store failure.
    pub fn concurrent_count(&self, identifier: &str) -> usize {
        self.store.concurrent_count(identifier).unwrap_or(0)
    }

    fn report(&self, identifier: &str, endpoint: &str, admission: &Admission) {
        match admission {
            Admission::Admitted => {
                self.config.event_listeners.emit(&LimiterEvent::Admitted {
                    component: self.config.name.clone(),
                    timestamp: Instant::now(),
                    identifier: identifier.to_string(),
                    endpoint: endpoint.to_string(),
                });

                #[cfg(feature = "metrics")]
                counter!("conductor_limiter_admitted_total", "limiter" => self.config.name.clone())
                    .increment(1);
            }
            Admission::Rejected {
                window,
                retry_after,
                ..
            } => {
                let event = LimiterEvent::Rejected {
                    component: self.config.name.clone(),
                    timestamp: Instant::now(),
                    identifier: identifier.to_string(),
                    endpoint: endpoint.to_string(),
                    window: *window,
                    retry_after: *retry_after,
                };
                tracing::debug!(
                    identifier,
                    endpoint,
                    window = %window,
                    event_type = event.event_type(),
                    "request rejected by rate limiter"
                );
                self.config.event_listeners.emit(&event);

                #[cfg(feature = "metrics")]
                counter!(
                    "conductor_limiter_rejected_total",
                    "limiter" => self.config.name.clone(),
                    "window" => window.to_string()
                )
                .increment(1);
            }
        }
    }
}
