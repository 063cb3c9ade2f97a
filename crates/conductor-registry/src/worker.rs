//! Connected worker state.

use chrono::{DateTime, Utc};
use conductor_core::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Connection status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Connected,
    /// Reported degraded health; excluded from new routing but keeps its
    /// in-flight jobs.
    Unhealthy,
    Disconnected,
}

/// Rolling execution statistics for a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub avg_latency_ms: f64,
    pub connected_at: DateTime<Utc>,
}

impl WorkerStats {
    pub(crate) fn new(connected_at: DateTime<Utc>) -> Self {
        Self {
            processed: 0,
            succeeded: 0,
            failed: 0,
            avg_latency_ms: 0.0,
            connected_at,
        }
    }

    pub(crate) fn record(&mut self, latency_ms: u64, success: bool) {
        self.processed += 1;
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        // Cumulative average; cheap and stable for operator dashboards.
        let n = self.processed as f64;
        self.avg_latency_ms = (self.avg_latency_ms * (n - 1.0) + latency_ms as f64) / n;
    }
}

/// A worker agent connected over the worker channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub capabilities: HashSet<String>,
    pub status: WorkerStatus,
    pub last_seen: DateTime<Utc>,
    pub active_requests: u32,
    pub missed_heartbeats: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    pub stats: WorkerStats,
}

impl Worker {
    pub(crate) fn new(
        id: WorkerId,
        capabilities: HashSet<String>,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            capabilities,
            status: WorkerStatus::Connected,
            last_seen: now,
            active_requests: 0,
            missed_heartbeats: 0,
            disconnected_at: None,
            metadata,
            stats: WorkerStats::new(now),
        }
    }

    /// True when this worker advertises every required capability.
    pub fn has_capabilities(&self, required: &[String]) -> bool {
        required.iter().all(|cap| self.capabilities.contains(cap))
    }

    /// True when this worker may receive new work.
    pub fn is_routable(&self) -> bool {
        self.status == WorkerStatus::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(caps: &[&str]) -> Worker {
        Worker::new(
            WorkerId::from("w1"),
            caps.iter().map(|c| c.to_string()).collect(),
            serde_json::Value::Null,
        )
    }

    #[test]
    fn capability_matching() {
        let w = worker(&["download", "screenshot"]);
        assert!(w.has_capabilities(&["download".to_string()]));
        assert!(w.has_capabilities(&[]));
        assert!(!w.has_capabilities(&["dom".to_string()]));
    }

    #[test]
    fn stats_track_cumulative_average() {
        let mut stats = WorkerStats::new(Utc::now());
        stats.record(100, true);
        stats.record(300, false);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert!((stats.avg_latency_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn only_connected_workers_are_routable() {
        let mut w = worker(&["download"]);
        assert!(w.is_routable());
        w.status = WorkerStatus::Unhealthy;
        assert!(!w.is_routable());
        w.status = WorkerStatus::Disconnected;
        assert!(!w.is_routable());
    }
}
