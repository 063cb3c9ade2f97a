//! Worker selection for dispatch.

use conductor_core::WorkerId;
use serde::Serialize;

use crate::registry::WorkerRegistry;

/// Why a worker was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    /// The job's affinity named a connected, capable worker.
    ExactMatch,
    /// The least-loaded capable worker was chosen.
    BestCapability,
}

/// A routing decision for one job.
#[derive(Debug, Clone, Serialize)]
pub struct RouteDecision {
    pub worker_id: WorkerId,
    pub reason: RouteReason,
    pub confidence: f64,
}

impl WorkerRegistry {
    /// Picks a worker for a job.
    ///
    /// Preference order:
    /// 1. The affinity worker, when connected and advertising every required
    ///    capability (`exact_match`, confidence 1.0).
    /// 2. Among connected capable workers, the one with the fewest active
    ///    requests; ties broken by lowest rolling average latency, then by
    ///    lexicographically smallest worker id (`best_capability`,
    ///    confidence 0.8).
    ///
    /// Returns `None` when no candidate exists.
    pub fn route(&self, affinity: Option<&WorkerId>, required: &[String]) -> Option<RouteDecision> {
        if let Some(preferred) = affinity {
            if let Some(worker) = self.get(preferred) {
                if worker.is_routable() && worker.has_capabilities(required) {
                    return Some(RouteDecision {
                        worker_id: worker.id,
                        reason: RouteReason::ExactMatch,
                        confidence: 1.0,
                    });
                }
            }
        }

        self.snapshot()
            .into_iter()
            .filter(|worker| worker.is_routable() && worker.has_capabilities(required))
            .min_by(|a, b| {
                a.active_requests
                    .cmp(&b.active_requests)
                    .then_with(|| a.stats.avg_latency_ms.total_cmp(&b.stats.avg_latency_ms))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|worker| RouteDecision {
                worker_id: worker.id,
                reason: RouteReason::BestCapability,
                confidence: 0.8,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use std::collections::HashSet;

    fn caps(list: &[&str]) -> HashSet<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    fn required(list: &[&str]) -> Vec<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new(RegistryConfig::builder().build())
    }

    #[test]
    fn affinity_wins_when_capable() {
        let registry = registry();
        registry.register(WorkerId::from("a"), caps(&["download"]), serde_json::Value::Null);
        registry.register(WorkerId::from("b"), caps(&["download"]), serde_json::Value::Null);

        let decision = registry
            .route(Some(&WorkerId::from("b")), &required(&["download"]))
            .unwrap();
        assert_eq!(decision.worker_id, WorkerId::from("b"));
        assert_eq!(decision.reason, RouteReason::ExactMatch);
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn affinity_falls_through_when_incapable() {
        let registry = registry();
        registry.register(WorkerId::from("a"), caps(&["download"]), serde_json::Value::Null);
        registry.register(WorkerId::from("b"), caps(&["screenshot"]), serde_json::Value::Null);

        let decision = registry
            .route(Some(&WorkerId::from("b")), &required(&["download"]))
            .unwrap();
        assert_eq!(decision.worker_id, WorkerId::from("a"));
        assert_eq!(decision.reason, RouteReason::BestCapability);
        assert_eq!(decision.confidence, 0.8);
    }

    #[test]
    fn least_loaded_wins() {
        let registry = registry();
        registry.register(WorkerId::from("a"), caps(&["download"]), serde_json::Value::Null);
        registry.register(WorkerId::from("b"), caps(&["download"]), serde_json::Value::Null);
        registry.assign(&WorkerId::from("a")).unwrap();

        let decision = registry.route(None, &required(&["download"])).unwrap();
        assert_eq!(decision.worker_id, WorkerId::from("b"));
    }

    #[test]
    fn latency_breaks_load_ties() {
        let registry = registry();
        registry.register(WorkerId::from("slow"), caps(&["download"]), serde_json::Value::Null);
        registry.register(WorkerId::from("fast"), caps(&["download"]), serde_json::Value::Null);

        // One completed job each, different latencies, zero active requests.
        registry.assign(&WorkerId::from("slow")).unwrap();
        registry
            .record_completion(&WorkerId::from("slow"), 900, true)
            .unwrap();
        registry.assign(&WorkerId::from("fast")).unwrap();
        registry
            .record_completion(&WorkerId::from("fast"), 50, true)
            .unwrap();

        let decision = registry.route(None, &required(&["download"])).unwrap();
        assert_eq!(decision.worker_id, WorkerId::from("fast"));
    }

    #[test]
    fn id_breaks_full_ties() {
        let registry = registry();
        registry.register(WorkerId::from("beta"), caps(&["download"]), serde_json::Value::Null);
        registry.register(WorkerId::from("alpha"), caps(&["download"]), serde_json::Value::Null);

        let decision = registry.route(None, &required(&["download"])).unwrap();
        assert_eq!(decision.worker_id, WorkerId::from("alpha"));
    }

    #[test]
    fn no_capable_worker_yields_none() {
        let registry = registry();
        registry.register(WorkerId::from("a"), caps(&["screenshot"]), serde_json::Value::Null);
        assert!(registry.route(None, &required(&["download"])).is_none());
    }

    #[test]
    fn unhealthy_workers_are_skipped() {
        let registry = registry();
        registry.register(WorkerId::from("a"), caps(&["download"]), serde_json::Value::Null);
        registry.heartbeat(&WorkerId::from("a"), false).unwrap();
        assert!(registry.route(None, &required(&["download"])).is_none());
    }
}
