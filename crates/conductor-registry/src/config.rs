//! Registry configuration.

use std::time::Duration;

use conductor_core::events::{EventListeners, FnListener};
use conductor_core::WorkerId;

use crate::events::{LostReason, WorkerEvent};

/// Configuration for a [`WorkerRegistry`](crate::WorkerRegistry).
pub struct RegistryConfig {
    pub(crate) name: String,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) heartbeat_miss_threshold: u32,
    pub(crate) disconnect_grace: Duration,
    pub(crate) event_listeners: EventListeners<WorkerEvent>,
}

impl RegistryConfig {
    /// Creates a builder with defaults.
    pub fn builder() -> RegistryConfigBuilder {
        RegistryConfigBuilder::new()
    }
}

/// Builder for [`RegistryConfig`].
pub struct RegistryConfigBuilder {
    name: String,
    heartbeat_interval: Duration,
    heartbeat_miss_threshold: u32,
    disconnect_grace: Duration,
    event_listeners: EventListeners<WorkerEvent>,
}

impl Default for RegistryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - heartbeat_interval: 30s
    /// - heartbeat_miss_threshold: 3
    /// - disconnect_grace: 60s (disconnected entries are swept after this)
    pub fn new() -> Self {
        Self {
            name: "registry".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_miss_threshold: 3,
            disconnect_grace: Duration::from_secs(60),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the name for this registry instance (used in events).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the expected interval between worker heartbeats.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets how many consecutive missed intervals disconnect a worker.
    pub fn heartbeat_miss_threshold(mut self, threshold: u32) -> Self {
        self.heartbeat_miss_threshold = threshold;
        self
    }

    /// Sets how long disconnected entries linger before being swept.
    pub fn disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    /// Registers a callback for every worker event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&WorkerEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Registers a callback fired when a worker is lost (deregistered or
    /// heartbeat-timed-out); the dispatcher's failover hangs off this.
    pub fn on_worker_lost<F>(mut self, f: F) -> Self
    where
        F: Fn(&WorkerId, &LostReason) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let WorkerEvent::Lost {
                worker_id, reason, ..
            } = event
            {
                f(worker_id, reason);
            }
        }));
        self
    }

    /// Builds the registry configuration.
    pub fn build(self) -> RegistryConfig {
        RegistryConfig {
            name: self.name,
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_miss_threshold: self.heartbeat_miss_threshold,
            disconnect_grace: self.disconnect_grace,
            event_listeners: self.event_listeners,
        }
    }
}
