//! Token bucket pacing the dispatch rate.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Refill-on-demand token bucket: `rate` tokens per second, capped at
/// `capacity`. One token is spent per dispatch.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a bucket with capacity equal to its refill rate, so at most
    /// one second of burst accumulates.
    pub fn new(rate_per_sec: f64) -> Self {
        Self::with_capacity(rate_per_sec, rate_per_sec)
    }

    /// Creates a bucket with an explicit burst capacity.
    pub fn with_capacity(rate_per_sec: f64, capacity: f64) -> Self {
        let rate = rate_per_sec.max(f64::EPSILON);
        let capacity = capacity.max(1.0);
        Self {
            rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(state: &mut BucketState, rate: f64, capacity: f64, now: Instant) {
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * rate).min(capacity);
        state.last_refill = now;
    }

    /// Takes one token if available.
    pub fn try_acquire(&self) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Self::refill(&mut state, self.rate, self.capacity, Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Puts a token back, for a dispatch that was aborted before hand-off.
    pub fn refund(&self) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.tokens = (state.tokens + 1.0).min(self.capacity);
    }

    /// How long until one full token is available.
    pub fn time_until_token(&self) -> Duration {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Self::refill(&mut state, self.rate, self.capacity, Instant::now());
        if state.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
        }
    }
}
