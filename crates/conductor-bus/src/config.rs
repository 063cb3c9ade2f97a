//! Event-bus configuration.

/// Configuration for an [`EventBus`](crate::EventBus).
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub(crate) name: String,
    pub(crate) max_dlq_size: usize,
}

impl BusConfig {
    /// Creates a builder with defaults.
    pub fn builder() -> BusConfigBuilder {
        BusConfigBuilder::new()
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`BusConfig`].
pub struct BusConfigBuilder {
    name: String,
    max_dlq_size: usize,
}

impl Default for BusConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BusConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - max_dlq_size: 1000 (oldest evicted beyond this)
    pub fn new() -> Self {
        Self {
            name: "bus".to_string(),
            max_dlq_size: 1000,
        }
    }

    /// Sets the name for this bus instance (used in logs and metrics).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the bound on the event dead-letter list.
    pub fn max_dlq_size(mut self, max: usize) -> Self {
        self.max_dlq_size = max;
        self
    }

    /// Builds the bus configuration.
    pub fn build(self) -> BusConfig {
        BusConfig {
            name: self.name,
            max_dlq_size: self.max_dlq_size,
        }
    }
}
