//! Server configuration from flags and environment.

use std::time::Duration;

use clap::Parser;
use conductor_engine::EngineConfig;

/// Conductor: dispatch server for browser-resident worker agents.
#[derive(Parser, Debug, Clone)]
#[command(name = "conductor", version, about)]
pub struct ServerConfig {
    /// Port the HTTP/WebSocket server listens on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Maximum jobs processing at once.
    #[arg(long, env = "MAX_CONCURRENT", default_value_t = 5)]
    pub max_concurrent: usize,

    /// Dispatch pacing in jobs per second.
    #[arg(long, env = "RATE_LIMIT", default_value_t = 10.0)]
    pub rate_limit: f64,

    /// Queue capacity across all priorities.
    #[arg(long, env = "MAX_QUEUE_SIZE", default_value_t = 1000)]
    pub max_queue_size: usize,

    /// Per-job processing timeout in milliseconds.
    #[arg(long, env = "PROCESSING_TIMEOUT_MS", default_value_t = 30_000)]
    pub processing_timeout_ms: u64,

    /// Retry delay table in milliseconds (comma-separated).
    #[arg(
        long,
        env = "RETRY_DELAYS_MS",
        value_delimiter = ',',
        default_value = "1000,5000,15000"
    )]
    pub retry_delays_ms: Vec<u64>,

    /// Attempts before a job is dead-lettered.
    #[arg(long, env = "DLQ_THRESHOLD", default_value_t = 3)]
    pub dlq_threshold: u32,

    /// Expected worker heartbeat interval in milliseconds.
    #[arg(long, env = "HEARTBEAT_INTERVAL_MS", default_value_t = 30_000)]
    pub heartbeat_interval_ms: u64,

    /// Consecutive missed intervals before a worker is disconnected.
    #[arg(long, env = "HEARTBEAT_MISS_THRESHOLD", default_value_t = 3)]
    pub heartbeat_miss_threshold: u32,
}

impl ServerConfig {
    /// Engine configuration derived from the server flags.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::builder()
            .max_concurrent(self.max_concurrent)
            .rate_limit(self.rate_limit)
            .max_queue_size(self.max_queue_size)
            .max_attempts(self.dlq_threshold)
            .processing_timeout(Duration::from_millis(self.processing_timeout_ms))
            .retry_delays(
                self.retry_delays_ms
                    .iter()
                    .map(|&ms| Duration::from_millis(ms))
                    .collect(),
            )
            .heartbeat_interval(Duration::from_millis(self.heartbeat_interval_ms))
            .heartbeat_miss_threshold(self.heartbeat_miss_threshold)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let config = ServerConfig::parse_from(["conductor"]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.retry_delays_ms, vec![1000, 5000, 15000]);
    }

    #[test]
    fn retry_delays_parse_csv() {
        let config = ServerConfig::parse_from(["conductor", "--retry-delays-ms", "10,20,40"]);
        assert_eq!(config.retry_delays_ms, vec![10, 20, 40]);
    }

    #[test]
    fn flags_override_defaults() {
        let config = ServerConfig::parse_from([
            "conductor",
            "--port",
            "8080",
            "--max-concurrent",
            "32",
            "--dlq-threshold",
            "5",
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_concurrent, 32);
        assert_eq!(config.dlq_threshold, 5);
    }
}
