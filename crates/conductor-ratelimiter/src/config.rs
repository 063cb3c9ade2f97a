//! Admission-control configuration.

use std::collections::HashMap;

use conductor_core::events::{EventListeners, FnListener};

use crate::events::LimiterEvent;
use crate::tiers::{RateLimitRules, Tier, Window};

/// Configuration for an [`AdmissionLimiter`](crate::AdmissionLimiter).
pub struct RateLimiterConfig {
    pub(crate) name: String,
    pub(crate) tier_overrides: HashMap<Tier, RateLimitRules>,
    pub(crate) endpoint_overrides: HashMap<String, RateLimitRules>,
    pub(crate) event_listeners: EventListeners<LimiterEvent>,
}

impl RateLimiterConfig {
    /// Creates a builder with defaults.
    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::new()
    }

    /// Resolves the effective rules for a tier and endpoint: the tier
    /// profile composed with the endpoint override, most restrictive per
    /// window.
    pub fn resolve(&self, tier: Tier, endpoint: &str) -> RateLimitRules {
        let base = self
            .tier_overrides
            .get(&tier)
            .copied()
            .unwrap_or_else(|| tier.rules());
        match self.endpoint_overrides.get(endpoint) {
            Some(over) => base.compose(*over),
            None => base,
        }
    }
}

/// Builder for [`RateLimiterConfig`].
pub struct RateLimiterConfigBuilder {
    name: String,
    tier_overrides: HashMap<Tier, RateLimitRules>,
    endpoint_overrides: HashMap<String, RateLimitRules>,
    event_listeners: EventListeners<LimiterEvent>,
}

impl Default for RateLimiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - tier profiles: the built-in free/premium/enterprise tables
    /// - endpoint overrides: `/auth/login` capped at 10/min with burst 3
    pub fn new() -> Self {
        let mut endpoint_overrides = HashMap::new();
        endpoint_overrides.insert(
            "/auth/login".to_string(),
            RateLimitRules {
                per_minute: Some(10),
                burst: Some(3),
                ..Default::default()
            },
        );
        Self {
            name: "ratelimiter".to_string(),
            tier_overrides: HashMap::new(),
            endpoint_overrides,
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the name for this limiter instance (used in events).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the profile for a tier.
    pub fn tier_rules(mut self, tier: Tier, rules: RateLimitRules) -> Self {
        self.tier_overrides.insert(tier, rules);
        self
    }

    /// Adds or replaces an endpoint override.
    pub fn endpoint_override<S: Into<String>>(mut self, endpoint: S, rules: RateLimitRules) -> Self {
        self.endpoint_overrides.insert(endpoint.into(), rules);
        self
    }

    /// Removes every default endpoint override.
    pub fn clear_endpoint_overrides(mut self) -> Self {
        self.endpoint_overrides.clear();
        self
    }

    /// Registers a callback for every limiter event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&LimiterEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Registers a callback fired when a request is rejected.
    pub fn on_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Window) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let LimiterEvent::Rejected {
                identifier, window, ..
            } = event
            {
                f(identifier, *window);
            }
        }));
        self
    }

    /// Builds the limiter configuration.
    pub fn build(self) -> RateLimiterConfig {
        RateLimiterConfig {
            name: self.name,
            tier_overrides: self.tier_overrides,
            endpoint_overrides: self.endpoint_overrides,
            event_listeners: self.event_listeners,
        }
    }
}
