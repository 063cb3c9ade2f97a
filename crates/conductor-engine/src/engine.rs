//! The dispatch engine: admission, the dispatcher loop, completion paths,
//! and failover.
//!
//! The engine owns one of each core component and wires them together:
//! lifecycle changes publish onto the event bus (and through the fanout
//! bridge to workers), the registry's lost-worker notifications feed a
//! failover task over a channel, and the dispatcher task paces hand-offs
//! with a concurrency gate and a token bucket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use conductor_bus::{kinds, BusConfig, Event, EventBus, FanoutBridge};
use conductor_core::{JobId, WorkerId};
use conductor_queue::{
    DispatchQueue, FailOutcome, JobError, JobPayload, Priority, QueueConfig, QueueEvent, QueueItem,
};
use conductor_ratelimiter::{Admission, AdmissionLimiter, Tier};
use conductor_registry::{MonitorHandle, RegistryConfig, WorkerRegistry};
use tokio::sync::{mpsc, watch, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::token_bucket::TokenBucket;

/// Ceiling on the dispatcher's idle sleep between wake-ups.
const MAX_IDLE_WAIT: Duration = Duration::from_millis(500);
/// Floor on pacing sleeps while waiting for a dispatch token.
const MIN_PACE_WAIT: Duration = Duration::from_millis(5);

struct InFlight {
    _permit: OwnedSemaphorePermit,
    timeout: JoinHandle<()>,
    worker: WorkerId,
    has_tool: bool,
}

struct NoWorkerState {
    since: Instant,
    warned: bool,
}

struct EngineInner {
    name: String,
    processing_timeout: Duration,
    no_worker_backoff: chrono::Duration,
    no_worker_grace: Duration,
    queue: DispatchQueue,
    registry: WorkerRegistry,
    limiter: AdmissionLimiter,
    bus: EventBus,
    bridge: FanoutBridge,
    tokens: TokenBucket,
    slots: Arc<Semaphore>,
    in_flight: Mutex<HashMap<JobId, InFlight>>,
    waiting_for_worker: Mutex<HashMap<JobId, NoWorkerState>>,
    wake: Notify,
    lost_rx: Mutex<Option<mpsc::UnboundedReceiver<WorkerId>>>,
}

/// The dispatch coordinator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DispatchEngine {
    inner: Arc<EngineInner>,
}

/// Handles to the engine's background tasks.
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
    failover: JoinHandle<()>,
    monitor: MonitorHandle,
}

impl EngineHandle {
    /// Stops the dispatcher, failover, and liveness tasks and waits for
    /// them to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.dispatcher.await;
        let _ = self.failover.await;
        self.monitor.stop().await;
    }
}

/// Lifts a queue transition into its bus envelope.
fn bus_event_from(event: &QueueEvent) -> Event {
    use conductor_core::events::CoreEvent;

    let data = match event {
        QueueEvent::ItemAdded {
            job_id,
            priority,
            depth,
            ..
        } => serde_json::json!({"job_id": job_id, "priority": priority, "depth": depth}),
        QueueEvent::ItemProcessing {
            job_id, attempt, ..
        } => serde_json::json!({"job_id": job_id, "attempt": attempt}),
        QueueEvent::ItemCompleted {
            job_id,
            processing_time,
            ..
        } => serde_json::json!({
            "job_id": job_id,
            "processing_time_ms": processing_time.as_millis() as u64,
        }),
        QueueEvent::ItemRetry {
            job_id,
            attempt,
            delay,
            ..
        } => serde_json::json!({
            "job_id": job_id,
            "attempt": attempt,
            "delay_ms": delay.as_millis() as u64,
        }),
        QueueEvent::ItemDead {
            job_id, attempts, ..
        } => serde_json::json!({"job_id": job_id, "attempts": attempts}),
        QueueEvent::ItemCancelled { job_id, .. } => serde_json::json!({"job_id": job_id}),
        QueueEvent::CapacityReached { max_queue_size, .. } => {
            serde_json::json!({"max_queue_size": max_queue_size})
        }
        QueueEvent::DlqReplayed { job_id, .. } => serde_json::json!({"job_id": job_id}),
        QueueEvent::DlqCleared { removed, .. } => serde_json::json!({"removed": removed}),
    };
    Event::new(event.event_type(), data)
}

impl DispatchEngine {
    /// Builds an engine and its components from one configuration.
    pub fn new(config: EngineConfig) -> Self {
        let bus = EventBus::new(
            BusConfig::builder()
                .name(format!("{}-bus", config.name))
                .max_dlq_size(config.bus_dlq_size)
                .build(),
        );
        let bridge = FanoutBridge::new(format!("{}-bridge", config.name));
        bus.attach_bridge(bridge.clone());

        // The queue narrates its own transitions; the bus fans them out to
        // subscribers and workers.
        let bus_for_queue = bus.clone();
        let queue = DispatchQueue::new(
            QueueConfig::builder()
                .name(format!("{}-queue", config.name))
                .max_queue_size(config.max_queue_size)
                .max_attempts(config.max_attempts)
                .retry_delays(config.retry_delays.clone())
                .fallback_retry_delay(config.fallback_retry_delay)
                .on_event(move |event| bus_for_queue.publish(bus_event_from(event)))
                .build(),
        );

        let (lost_tx, lost_rx) = mpsc::unbounded_channel::<WorkerId>();
        let registry = WorkerRegistry::new(
            RegistryConfig::builder()
                .name(format!("{}-registry", config.name))
                .heartbeat_interval(config.heartbeat_interval)
                .heartbeat_miss_threshold(config.heartbeat_miss_threshold)
                .on_worker_lost(move |worker_id, _reason| {
                    let _ = lost_tx.send(worker_id.clone());
                })
                .build(),
        );

        Self {
            inner: Arc::new(EngineInner {
                name: config.name,
                processing_timeout: config.processing_timeout,
                no_worker_backoff: chrono::Duration::from_std(config.no_worker_backoff)
                    .unwrap_or_else(|_| chrono::Duration::milliseconds(250)),
                no_worker_grace: config.no_worker_grace,
                queue,
                registry,
                limiter: AdmissionLimiter::new(config.limiter),
                bus,
                bridge,
                tokens: TokenBucket::new(config.rate_limit),
                slots: Arc::new(Semaphore::new(config.max_concurrent)),
                in_flight: Mutex::new(HashMap::new()),
                waiting_for_worker: Mutex::new(HashMap::new()),
                wake: Notify::new(),
                lost_rx: Mutex::new(Some(lost_rx)),
            }),
        }
    }

    /// The queue this engine dispatches from.
    pub fn queue(&self) -> &DispatchQueue {
        &self.inner.queue
    }

    /// The worker registry.
    pub fn registry(&self) -> &WorkerRegistry {
        &self.inner.registry
    }

    /// The admission limiter.
    pub fn limiter(&self) -> &AdmissionLimiter {
        &self.inner.limiter
    }

    /// The lifecycle event bus.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// The worker fanout bridge.
    pub fn bridge(&self) -> &FanoutBridge {
        &self.inner.bridge
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, InFlight>> {
        match self.inner.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Admits a request through rate limiting and enqueues it.
    pub fn submit(
        &self,
        identifier: &str,
        endpoint: &str,
        tier: Tier,
        payload: JobPayload,
        priority: Priority,
    ) -> Result<QueueItem> {
        match self.inner.limiter.admit(identifier, endpoint, tier) {
            Admission::Admitted => {}
            Admission::Rejected {
                window,
                retry_after,
                ..
            } => {
                return Err(EngineError::RateLimited {
                    window,
                    retry_after,
                });
            }
        }

        match self
            .inner
            .queue
            .enqueue_as(Some(identifier.to_string()), payload, priority)
        {
            Ok(item) => {
                self.inner.wake.notify_one();
                Ok(item)
            }
            Err(error) => {
                // The admission already counted; give the slot back so a
                // queue-full rejection is invisible to the limiter.
                self.inner.limiter.release(identifier);
                Err(error.into())
            }
        }
    }

    /// Enqueues a job without admission control (internal producers).
    pub fn enqueue(&self, payload: JobPayload, priority: Priority) -> Result<QueueItem> {
        let item = self.inner.queue.enqueue(payload, priority)?;
        self.inner.wake.notify_one();
        Ok(item)
    }

    /// Cancels a pending job, releasing its admission slot.
    pub fn cancel(&self, id: &JobId) -> bool {
        let prior = self.inner.queue.status(id);
        if !self.inner.queue.cancel(id) {
            return false;
        }
        if let Some(item) = prior {
            if let Some(identifier) = item.identifier {
                self.inner.limiter.release(&identifier);
            }
        }
        true
    }

    /// Completes a processing job on behalf of its worker.
    ///
    /// A second completion, or a completion racing a timeout, observes the
    /// already-applied transition and returns a conflict.
    pub fn complete(&self, id: &JobId, result: Option<serde_json::Value>) -> Result<QueueItem> {
        let item = self.inner.queue.complete(id, result)?;
        let finished = self.finish_in_flight(id);
        let worker = finished
            .as_ref()
            .map(|(worker, _)| worker.clone())
            .or_else(|| item.owner.clone());
        let has_tool = finished.map(|(_, has_tool)| has_tool).unwrap_or(false)
            || item.payload.tool.is_some();

        if let Some(worker) = &worker {
            let latency = item.processing_time_ms.unwrap_or(0);
            let _ = self.inner.registry.record_completion(worker, latency, true);
        }
        if let Some(identifier) = &item.identifier {
            self.inner.limiter.release(identifier);
        }

        #[cfg(feature = "metrics")]
        counter!("conductor_engine_completed_total", "engine" => self.inner.name.clone())
            .increment(1);

        if let Some(worker) = &worker {
            self.inner.bus.publish(Event::directed(
                kinds::EXECUTION_COMPLETED,
                worker,
                serde_json::json!({"job_id": item.id}),
            ));
            if has_tool {
                self.inner.bus.publish(Event::directed(
                    kinds::TOOL_ACTIVATED,
                    worker,
                    serde_json::json!({"job_id": item.id}),
                ));
            }
        }

        self.inner.wake.notify_one();
        Ok(item)
    }

    /// Fails a processing job on behalf of its worker: requeues it with
    /// backoff while attempts remain, otherwise dead-letters it.
    pub fn fail(&self, id: &JobId, error: JobError) -> Result<FailOutcome> {
        let prior_owner = self.inner.queue.status(id).and_then(|item| item.owner);
        let outcome = self.inner.queue.fail(id, error.clone())?;
        let finished = self.finish_in_flight(id);
        let worker = finished
            .as_ref()
            .map(|(worker, _)| worker.clone())
            .or(prior_owner);
        let has_tool = finished.map(|(_, has_tool)| has_tool).unwrap_or(false);

        let item = match &outcome {
            FailOutcome::Retry { item, .. } => item,
            FailOutcome::Dead { item } => item,
        };
        if let Some(worker) = &worker {
            let latency = item
                .last_attempt_at
                .map(|at| (Utc::now() - at).num_milliseconds().max(0) as u64)
                .unwrap_or(0);
            let _ = self
                .inner
                .registry
                .record_completion(worker, latency, false);
        }

        match &outcome {
            FailOutcome::Retry { .. } => {}
            FailOutcome::Dead { item } => {
                #[cfg(feature = "metrics")]
                counter!("conductor_engine_dead_total", "engine" => self.inner.name.clone())
                    .increment(1);

                if let Some(identifier) = &item.identifier {
                    self.inner.limiter.release(identifier);
                }
                if let (Some(worker), true) = (&worker, has_tool || item.payload.tool.is_some()) {
                    self.inner.bus.publish(Event::directed(
                        kinds::TOOL_ACTIVATION_FAILED,
                        worker,
                        serde_json::json!({"job_id": item.id, "error": error}),
                    ));
                }
            }
        }
        if let Some(worker) = &worker {
            self.inner.bus.publish(Event::directed(
                kinds::EXECUTION_FAILED,
                worker,
                serde_json::json!({"job_id": item.id, "error": error}),
            ));
        }

        self.inner.wake.notify_one();
        Ok(outcome)
    }

    /// Re-admits a dead-lettered job and wakes the dispatcher.
    pub fn dlq_retry(&self, id: &JobId) -> Result<QueueItem> {
        let item = self.inner.queue.dlq_retry(id)?;
        self.inner.wake.notify_one();
        Ok(item)
    }

    fn finish_in_flight(&self, id: &JobId) -> Option<(WorkerId, bool)> {
        let entry = self.lock_in_flight().remove(id)?;
        entry.timeout.abort();

        #[cfg(feature = "metrics")]
        gauge!("conductor_engine_in_flight", "engine" => self.inner.name.clone())
            .set(self.lock_in_flight().len() as f64);

        Some((entry.worker, entry.has_tool))
    }

    /// Spawns the dispatcher, failover, and liveness monitor tasks.
    pub fn start(&self) -> EngineHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = {
            let engine = self.clone();
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                tracing::info!(engine = %engine.inner.name, "dispatcher started");
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = engine.dispatch_once() => {}
                    }
                }
                tracing::info!(engine = %engine.inner.name, "dispatcher stopped");
            })
        };

        let failover = {
            let engine = self.clone();
            let mut shutdown = shutdown_rx;
            let mut lost_rx = {
                let mut slot = match engine.inner.lost_rx.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                slot.take()
            };
            tokio::spawn(async move {
                let Some(rx) = lost_rx.as_mut() else { return };
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        lost = rx.recv() => match lost {
                            Some(worker_id) => engine.failover(&worker_id),
                            None => break,
                        },
                    }
                }
            })
        };

        let monitor = self.inner.registry.spawn_monitor();

        EngineHandle {
            shutdown: shutdown_tx,
            dispatcher,
            failover,
            monitor,
        }
    }

    async fn dispatch_once(&self) {
        let permit = match Arc::clone(&self.inner.slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                tokio::time::sleep(MAX_IDLE_WAIT).await;
                return;
            }
        };

        while !self.inner.tokens.try_acquire() {
            let wait = self
                .inner
                .tokens
                .time_until_token()
                .clamp(MIN_PACE_WAIT, MAX_IDLE_WAIT);
            tokio::time::sleep(wait).await;
        }

        let Some(item) = self.inner.queue.take_next(Utc::now()) else {
            // Nothing dispatchable: hand both the token and the slot back.
            self.inner.tokens.refund();
            drop(permit);
            self.idle_wait().await;
            return;
        };

        self.handoff(item, permit);
    }

    async fn idle_wait(&self) {
        let wait = self
            .inner
            .queue
            .next_retry_deadline()
            .and_then(|at| (at - Utc::now()).to_std().ok())
            .unwrap_or(MAX_IDLE_WAIT)
            .min(MAX_IDLE_WAIT)
            .max(Duration::from_millis(1));
        tokio::select! {
            _ = self.inner.wake.notified() => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }

    fn handoff(&self, item: QueueItem, permit: OwnedSemaphorePermit) {
        let required = item.payload.required_capabilities();
        let decision = self
            .inner
            .registry
            .route(item.payload.addon_id.as_ref(), &required);

        let Some(decision) = decision else {
            self.note_no_worker(&item.id);
            let ready = Utc::now() + self.inner.no_worker_backoff;
            if let Err(error) = self.inner.queue.release_to_front(&item.id, Some(ready)) {
                tracing::debug!(job_id = %item.id, %error, "job vanished while waiting for a worker");
            }
            self.inner.tokens.refund();
            drop(permit);
            return;
        };

        let started = match self.inner.queue.start(&item.id, &decision.worker_id) {
            Ok(started) => started,
            Err(error) => {
                // Lost a race with cancellation; put the resources back.
                tracing::debug!(job_id = %item.id, %error, "hand-off aborted");
                self.inner.tokens.refund();
                drop(permit);
                return;
            }
        };

        {
            let mut waiting = match self.inner.waiting_for_worker.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            waiting.remove(&item.id);
        }
        let _ = self.inner.registry.assign(&decision.worker_id);

        #[cfg(feature = "metrics")]
        counter!("conductor_engine_dispatched_total", "engine" => self.inner.name.clone())
            .increment(1);

        self.publish_dispatch(&started, &decision.worker_id);

        let timeout = self.arm_timeout(started.id.clone());
        let has_tool = started.payload.tool.is_some();
        let mut in_flight = self.lock_in_flight();
        in_flight.insert(
            started.id.clone(),
            InFlight {
                _permit: permit,
                timeout,
                worker: decision.worker_id.clone(),
                has_tool,
            },
        );

        #[cfg(feature = "metrics")]
        gauge!("conductor_engine_in_flight", "engine" => self.inner.name.clone())
            .set(in_flight.len() as f64);
    }

    fn publish_dispatch(&self, item: &QueueItem, worker: &WorkerId) {
        // The hand-off event: the worker channel turns this into its
        // `dispatch` frame.
        self.inner.bus.publish(Event::directed(
            kinds::QUEUE_PROCESS,
            worker,
            serde_json::json!({
                "job_id": item.id,
                "payload": item.payload,
                "attempt": item.attempts,
                "timeout_ms": self.inner.processing_timeout.as_millis() as u64,
            }),
        ));
        self.inner.bus.publish(Event::directed(
            kinds::EXECUTION_STARTED,
            worker,
            serde_json::json!({"job_id": item.id}),
        ));
        if let Some(tool) = &item.payload.tool {
            self.inner.bus.publish(Event::directed(
                kinds::TOOL_ACTIVATING,
                worker,
                serde_json::json!({"job_id": item.id, "tool": tool}),
            ));
        }
    }

    fn note_no_worker(&self, id: &JobId) {
        let mut waiting = match self.inner.waiting_for_worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let state = waiting.entry(id.clone()).or_insert(NoWorkerState {
            since: Instant::now(),
            warned: false,
        });
        if !state.warned && state.since.elapsed() >= self.inner.no_worker_grace {
            state.warned = true;
            tracing::warn!(
                engine = %self.inner.name,
                job_id = %id,
                waited = ?state.since.elapsed(),
                "no worker available for job"
            );
        }
    }

    fn arm_timeout(&self, id: JobId) -> JoinHandle<()> {
        let engine = self.clone();
        let timeout = self.inner.processing_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::warn!(job_id = %id, ?timeout, "processing timed out; synthesizing failure");

            #[cfg(feature = "metrics")]
            counter!("conductor_engine_timeouts_total", "engine" => engine.inner.name.clone())
                .increment(1);

            if let Err(error) = engine.fail(
                &id,
                JobError::with_code("processing timed out", "TIMEOUT"),
            ) {
                // The worker finished in the same instant; nothing to do.
                tracing::debug!(job_id = %id, %error, "timeout lost the race");
            }
        })
    }

    /// Re-homes every in-flight job owned by a lost worker: re-route to
    /// another candidate as a fresh attempt, or return the job to the front
    /// of its bucket when no candidate exists. Neither path counts against
    /// `max_attempts`.
    fn failover(&self, lost: &WorkerId) {
        let owned: Vec<JobId> = {
            let in_flight = self.lock_in_flight();
            in_flight
                .iter()
                .filter(|(_, entry)| entry.worker == *lost)
                .map(|(id, _)| id.clone())
                .collect()
        };
        if owned.is_empty() {
            return;
        }
        tracing::info!(worker_id = %lost, jobs = owned.len(), "failing over lost worker's jobs");

        for id in owned {
            let Some(item) = self.inner.queue.status(&id) else {
                continue;
            };
            let required = item.payload.required_capabilities();

            match self.inner.registry.route(None, &required) {
                Some(decision) => match self.inner.queue.reroute(&id, &decision.worker_id) {
                    Ok(rerouted) => {
                        self.inner.registry.release_assignment(lost);
                        let _ = self.inner.registry.assign(&decision.worker_id);
                        {
                            let mut in_flight = self.lock_in_flight();
                            if let Some(entry) = in_flight.get_mut(&id) {
                                entry.worker = decision.worker_id.clone();
                                entry.timeout.abort();
                                entry.timeout = self.arm_timeout(id.clone());
                            }
                        }
                        self.publish_dispatch(&rerouted, &decision.worker_id);
                    }
                    Err(error) => {
                        tracing::debug!(job_id = %id, %error, "job finished before failover");
                    }
                },
                None => match self.inner.queue.requeue_from_processing(&id) {
                    Ok(_) => {
                        self.inner.registry.release_assignment(lost);
                        self.finish_in_flight(&id);
                        self.inner.wake.notify_one();
                    }
                    Err(error) => {
                        tracing::debug!(job_id = %id, %error, "job finished before failover");
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_bus::SubscribeOptions;
    use conductor_ratelimiter::{RateLimiterConfig, RateLimitRules, Window};
    use std::collections::HashSet;

    fn caps(list: &[&str]) -> HashSet<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    fn payload() -> JobPayload {
        JobPayload::new("https://example.com/a.jpg")
    }

    async fn wait_for<F: Fn() -> bool>(predicate: F) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dispatches_and_completes() {
        let engine = DispatchEngine::new(EngineConfig::builder().build());
        let worker = WorkerId::from("w1");
        engine
            .registry()
            .register(worker.clone(), caps(&["download"]), serde_json::Value::Null);

        let handle = engine.start();
        let item = engine.enqueue(payload(), Priority::Normal).unwrap();

        let queue = engine.queue().clone();
        let id = item.id.clone();
        wait_for(|| {
            queue
                .status(&id)
                .map(|item| item.status == conductor_queue::JobStatus::Processing)
                .unwrap_or(false)
        })
        .await;

        let done = engine
            .complete(&item.id, Some(serde_json::json!({"path": "/tmp/a.jpg"})))
            .unwrap();
        assert_eq!(done.status, conductor_queue::JobStatus::Completed);
        assert_eq!(engine.queue().metrics().total_processed, 1);
        assert_eq!(engine.registry().get(&worker).unwrap().active_requests, 0);

        handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn processing_timeout_synthesizes_failure() {
        let engine = DispatchEngine::new(
            EngineConfig::builder()
                .processing_timeout(Duration::from_millis(50))
                .retry_delays(vec![Duration::from_millis(10)])
                .max_attempts(2)
                .build(),
        );
        engine.registry().register(
            WorkerId::from("w1"),
            caps(&["download"]),
            serde_json::Value::Null,
        );

        let handle = engine.start();
        let item = engine.enqueue(payload(), Priority::Normal).unwrap();

        let queue = engine.queue().clone();
        let id = item.id.clone();
        // First attempt times out, the retry is dispatched again.
        wait_for(|| {
            queue
                .status(&id)
                .map(|item| item.attempts >= 2)
                .unwrap_or(false)
        })
        .await;

        let seen = queue.status(&item.id).unwrap();
        assert!(seen.attempts >= 2);

        handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failover_reroutes_to_surviving_worker() {
        let engine = DispatchEngine::new(
            EngineConfig::builder()
                .processing_timeout(Duration::from_secs(30))
                .build(),
        );
        let w1 = WorkerId::from("w1");
        let w2 = WorkerId::from("w2");
        engine
            .registry()
            .register(w1.clone(), caps(&["download"]), serde_json::Value::Null);

        let handle = engine.start();
        let item = engine.enqueue(payload(), Priority::Normal).unwrap();

        let queue = engine.queue().clone();
        let id = item.id.clone();
        wait_for(|| {
            queue
                .status(&id)
                .map(|item| item.status == conductor_queue::JobStatus::Processing)
                .unwrap_or(false)
        })
        .await;

        // Second worker joins, first is lost mid-flight.
        engine
            .registry()
            .register(w2.clone(), caps(&["download"]), serde_json::Value::Null);
        engine.registry().deregister(&w1, "socket closed").unwrap();

        let queue = engine.queue().clone();
        let id = item.id.clone();
        let w2_clone = w2.clone();
        wait_for(|| {
            queue
                .status(&id)
                .map(|item| item.owner.as_ref() == Some(&w2_clone))
                .unwrap_or(false)
        })
        .await;

        let rerouted = engine.queue().status(&item.id).unwrap();
        assert_eq!(rerouted.reroutes, 1);
        assert_eq!(rerouted.attempts, 2);

        let done = engine.complete(&item.id, None).unwrap();
        assert_eq!(done.status, conductor_queue::JobStatus::Completed);

        handle.stop().await;
    }

    #[tokio::test]
    async fn submit_maps_rate_limit_rejections() {
        let engine = DispatchEngine::new(
            EngineConfig::builder()
                .limiter(
                    RateLimiterConfig::builder()
                        .clear_endpoint_overrides()
                        .tier_rules(
                            Tier::Free,
                            RateLimitRules {
                                burst: Some(1),
                                ..Default::default()
                            },
                        )
                        .build(),
                )
                .build(),
        );

        let first = engine.submit("c1", "/queue/enqueue", Tier::Free, payload(), Priority::Normal);
        assert!(first.is_ok());

        let second = engine.submit("c1", "/queue/enqueue", Tier::Free, payload(), Priority::Normal);
        match second {
            Err(EngineError::RateLimited { window, .. }) => assert_eq!(window, Window::Burst),
            other => panic!("expected rate-limit rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn queue_full_submit_releases_the_concurrency_slot() {
        let engine = DispatchEngine::new(
            EngineConfig::builder()
                .max_queue_size(1)
                .limiter(
                    RateLimiterConfig::builder()
                        .clear_endpoint_overrides()
                        .tier_rules(
                            Tier::Free,
                            RateLimitRules {
                                concurrent: Some(10),
                                ..Default::default()
                            },
                        )
                        .build(),
                )
                .build(),
        );

        engine
            .submit("c1", "/queue/enqueue", Tier::Free, payload(), Priority::Normal)
            .unwrap();
        let full = engine.submit("c1", "/queue/enqueue", Tier::Free, payload(), Priority::Normal);
        assert!(matches!(
            full,
            Err(EngineError::Queue(
                conductor_queue::QueueError::CapacityExceeded { .. }
            ))
        ));
        // Only the admitted job holds a concurrency slot.
        assert_eq!(engine.limiter().concurrent_count("c1"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn completed_event_reaches_subscribers_once() {
        let engine = DispatchEngine::new(EngineConfig::builder().build());
        engine.registry().register(
            WorkerId::from("w1"),
            caps(&["download"]),
            serde_json::Value::Null,
        );

        let completions = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let completions_clone = Arc::clone(&completions);
        engine.bus().subscribe(
            kinds::QUEUE_ITEM_COMPLETED,
            SubscribeOptions::default(),
            move |_| {
                let completions = Arc::clone(&completions_clone);
                async move {
                    completions.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                }
            },
        );

        let handle = engine.start();
        let item = engine.enqueue(payload(), Priority::Normal).unwrap();

        let queue = engine.queue().clone();
        let id = item.id.clone();
        wait_for(|| {
            queue
                .status(&id)
                .map(|item| item.status == conductor_queue::JobStatus::Processing)
                .unwrap_or(false)
        })
        .await;

        engine.complete(&item.id, None).unwrap();
        // Double completion is a conflict, not a second event.
        assert!(engine.complete(&item.id, None).is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(completions.load(std::sync::atomic::Ordering::SeqCst), 1);

        handle.stop().await;
    }
}
