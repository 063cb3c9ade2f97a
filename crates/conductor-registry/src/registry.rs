//! The worker registry and its liveness accounting.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use conductor_core::WorkerId;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::events::{LostReason, WorkerEvent};
use crate::worker::{Worker, WorkerStatus};

struct RegistryInner {
    config: RegistryConfig,
    workers: RwLock<HashMap<WorkerId, Arc<Mutex<Worker>>>>,
}

/// Tracks connected workers, their health, and their load.
///
/// Cheap to clone; all clones share state. Mutations take the worker's own
/// lock; the map guard is never held across a worker lock.
#[derive(Clone)]
pub struct WorkerRegistry {
    inner: Arc<RegistryInner>,
}

/// Handle to the background liveness monitor.
pub struct MonitorHandle {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stops the monitor and waits for it to exit.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }
}

impl WorkerRegistry {
    /// Creates a registry from its configuration.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                workers: RwLock::new(HashMap::new()),
            }),
        }
    }

    fn worker(&self, id: &WorkerId) -> Option<Arc<Mutex<Worker>>> {
        self.inner
            .workers
            .read()
            .ok()
            .and_then(|map| map.get(id).cloned())
    }

    fn lock_worker(arc: &Arc<Mutex<Worker>>) -> std::sync::MutexGuard<'_, Worker> {
        match arc.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, event: WorkerEvent) {
        self.inner.config.event_listeners.emit(&event);
    }

    #[cfg(feature = "metrics")]
    fn record_worker_count(&self) {
        let count = self
            .inner
            .workers
            .read()
            .map(|map| map.len())
            .unwrap_or(0);
        gauge!("conductor_registry_workers", "registry" => self.inner.config.name.clone())
            .set(count as f64);
    }

    /// Registers a worker, or refreshes an existing registration after a
    /// reconnect.
    pub fn register(
        &self,
        id: WorkerId,
        capabilities: HashSet<String>,
        metadata: serde_json::Value,
    ) -> Worker {
        let snapshot = {
            let existing = self.worker(&id);
            match existing {
                Some(arc) => {
                    let mut guard = Self::lock_worker(&arc);
                    guard.capabilities = capabilities;
                    guard.metadata = metadata;
                    guard.status = WorkerStatus::Connected;
                    guard.missed_heartbeats = 0;
                    guard.last_seen = Utc::now();
                    guard.disconnected_at = None;
                    guard.clone()
                }
                None => {
                    let worker = Worker::new(id.clone(), capabilities, metadata);
                    let snapshot = worker.clone();
                    let mut map = match self.inner.workers.write() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    map.insert(id.clone(), Arc::new(Mutex::new(worker)));
                    snapshot
                }
            }
        };

        #[cfg(feature = "metrics")]
        self.record_worker_count();

        self.emit(WorkerEvent::Registered {
            component: self.inner.config.name.clone(),
            timestamp: Instant::now(),
            worker_id: id.clone(),
        });
        tracing::info!(worker_id = %id, capabilities = ?snapshot.capabilities, "worker registered");
        snapshot
    }

    /// Removes a worker. Fires `worker:lost` so the dispatcher can fail its
    /// in-flight jobs over.
    pub fn deregister(&self, id: &WorkerId, reason: impl Into<String>) -> Result<Worker> {
        let removed = {
            let mut map = match self.inner.workers.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            map.remove(id)
        };
        let arc = removed.ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let snapshot = Self::lock_worker(&arc).clone();

        #[cfg(feature = "metrics")]
        self.record_worker_count();

        let reason = reason.into();
        tracing::info!(worker_id = %id, reason = %reason, "worker deregistered");
        self.emit(WorkerEvent::Lost {
            component: self.inner.config.name.clone(),
            timestamp: Instant::now(),
            worker_id: id.clone(),
            reason: LostReason::Deregistered(reason),
        });
        Ok(snapshot)
    }

    /// Records a heartbeat. Resets the miss counter; degraded health marks
    /// the worker unhealthy, removing it from routing without failover.
    pub fn heartbeat(&self, id: &WorkerId, healthy: bool) -> Result<()> {
        let arc = self
            .worker(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let became_unhealthy = {
            let mut guard = Self::lock_worker(&arc);
            guard.last_seen = Utc::now();
            guard.missed_heartbeats = 0;
            let was = guard.status;
            guard.status = if healthy {
                WorkerStatus::Connected
            } else {
                WorkerStatus::Unhealthy
            };
            guard.disconnected_at = None;
            !healthy && was != WorkerStatus::Unhealthy
        };
        if became_unhealthy {
            self.emit(WorkerEvent::Unhealthy {
                component: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                worker_id: id.clone(),
            });
            tracing::warn!(worker_id = %id, "worker reported degraded health");
        }
        Ok(())
    }

    /// Snapshot of a single worker.
    pub fn get(&self, id: &WorkerId) -> Option<Worker> {
        let arc = self.worker(id)?;
        let worker = Self::lock_worker(&arc).clone();
        Some(worker)
    }

    /// Snapshot of every registered worker.
    pub fn snapshot(&self) -> Vec<Worker> {
        let arcs: Vec<Arc<Mutex<Worker>>> = match self.inner.workers.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        arcs.iter()
            .map(|arc| Self::lock_worker(arc).clone())
            .collect()
    }

    /// Number of workers currently accepting work.
    pub fn connected_len(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|worker| worker.is_routable())
            .count()
    }

    /// Increments a worker's in-flight count on dispatch.
    pub fn assign(&self, id: &WorkerId) -> Result<()> {
        let arc = self
            .worker(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let mut guard = Self::lock_worker(&arc);
        guard.active_requests += 1;
        Ok(())
    }

    /// Records a finished job for a worker: decrements in-flight and folds
    /// the latency into its rolling statistics.
    pub fn record_completion(&self, id: &WorkerId, latency_ms: u64, success: bool) -> Result<()> {
        let arc = self
            .worker(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let mut guard = Self::lock_worker(&arc);
        guard.active_requests = guard.active_requests.saturating_sub(1);
        guard.stats.record(latency_ms, success);
        Ok(())
    }

    /// Releases one in-flight slot without recording a result, used when a
    /// job is taken away from a worker during failover.
    pub fn release_assignment(&self, id: &WorkerId) {
        if let Some(arc) = self.worker(id) {
            let mut guard = Self::lock_worker(&arc);
            guard.active_requests = guard.active_requests.saturating_sub(1);
        }
    }

    /// One liveness step: workers quiet for a full interval accrue a miss;
    /// workers at the miss threshold are marked disconnected and reported
    /// lost; disconnected entries past the grace period are swept.
    ///
    /// Driven by the task from [`spawn_monitor`](Self::spawn_monitor);
    /// exposed so tests can step time explicitly.
    pub fn tick(&self, now: DateTime<Utc>) {
        let interval = chrono::Duration::from_std(self.inner.config.heartbeat_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let grace = chrono::Duration::from_std(self.inner.config.disconnect_grace)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let threshold = self.inner.config.heartbeat_miss_threshold;

        let entries: Vec<(WorkerId, Arc<Mutex<Worker>>)> = match self.inner.workers.read() {
            Ok(map) => map
                .iter()
                .map(|(id, arc)| (id.clone(), Arc::clone(arc)))
                .collect(),
            Err(_) => Vec::new(),
        };

        let mut lost = Vec::new();
        let mut sweep = Vec::new();
        for (id, arc) in entries {
            let mut guard = Self::lock_worker(&arc);
            match guard.status {
                WorkerStatus::Connected | WorkerStatus::Unhealthy => {
                    if now - guard.last_seen >= interval {
                        guard.missed_heartbeats += 1;
                        let missed = guard.missed_heartbeats;
                        // Pretend a heartbeat arrived so the next miss needs
                        // another full quiet interval.
                        guard.last_seen = now;
                        drop(guard);

                        self.emit(WorkerEvent::HeartbeatMissed {
                            component: self.inner.config.name.clone(),
                            timestamp: Instant::now(),
                            worker_id: id.clone(),
                            missed,
                            threshold,
                        });

                        if missed >= threshold {
                            let arc = match self.worker(&id) {
                                Some(arc) => arc,
                                None => continue,
                            };
                            let mut guard = Self::lock_worker(&arc);
                            guard.status = WorkerStatus::Disconnected;
                            guard.disconnected_at = Some(now);
                            drop(guard);
                            lost.push(id);
                        }
                    }
                }
                WorkerStatus::Disconnected => {
                    let expired = guard
                        .disconnected_at
                        .map_or(true, |at| now - at >= grace);
                    if expired {
                        sweep.push(id);
                    }
                }
            }
        }

        for id in lost {
            #[cfg(feature = "metrics")]
            counter!("conductor_registry_disconnects_total", "registry" => self.inner.config.name.clone())
                .increment(1);

            tracing::warn!(worker_id = %id, "worker missed heartbeat threshold; disconnecting");
            self.emit(WorkerEvent::Lost {
                component: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                worker_id: id,
                reason: LostReason::HeartbeatTimeout,
            });
        }

        if !sweep.is_empty() {
            let mut map = match self.inner.workers.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for id in sweep {
                map.remove(&id);
                tracing::debug!(worker_id = %id, "disconnected worker swept");
            }
        }
    }

    /// Spawns the background liveness monitor, ticking at the heartbeat
    /// interval.
    pub fn spawn_monitor(&self) -> MonitorHandle {
        let registry = self.clone();
        let shutdown = Arc::new(Notify::new());
        let shutdown_rx = Arc::clone(&shutdown);
        let interval = self.inner.config.heartbeat_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; skip it so a fresh
            // registry is not penalized a miss at startup.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => registry.tick(Utc::now()),
                    _ = shutdown_rx.notified() => break,
                }
            }
        });

        MonitorHandle { shutdown, handle }
    }
}
