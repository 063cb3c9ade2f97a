//! The bounded multi-priority queue and its state transitions.
//!
//! Jobs live in exactly one compartment at a time: a priority bucket, the
//! processing set, the dead-letter queue, or (transiently) in the hands of
//! the dispatcher between [`DispatchQueue::take_next`] and
//! [`DispatchQueue::start`]. Every state transition locks the job's own
//! mutex first and checks the current status before acting, so conflicting
//! transitions (a `fail` racing a `fail`, a `complete` racing a timeout)
//! observe the applied transition and return [`QueueError::Conflict`]
//! instead of double-applying.
//!
//! Lock order: job mutex, then bucket/processing/dlq locks. The jobs map
//! guard is never held across a job lock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use conductor_core::{JobId, WorkerId};
use serde::Serialize;

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::events::QueueEvent;
use crate::item::{JobError, JobPayload, JobStatus, Priority, QueueItem};

/// Outcome of failing a processing job.
#[derive(Debug)]
pub enum FailOutcome {
    /// The job was requeued into its priority bucket for another attempt.
    Retry {
        item: QueueItem,
        /// Delay before the job becomes dispatchable again.
        delay: Duration,
    },
    /// The job exhausted its attempts and moved to the dead-letter queue.
    Dead { item: QueueItem },
}

/// Point-in-time view of queue counters.
#[derive(Debug, Clone, Serialize)]
pub struct QueueMetrics {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub processing: usize,
    pub dlq: usize,
    pub total_enqueued: u64,
    pub total_processed: u64,
    pub total_retries: u64,
    pub total_dead: u64,
    pub total_cancelled: u64,
    pub total_dlq_cleared: u64,
    /// Completions per second over the trailing throughput window.
    pub throughput_per_sec: f64,
    /// Rolling average processing time in milliseconds.
    pub avg_processing_time_ms: f64,
}

#[derive(Debug)]
struct BucketEntry {
    id: JobId,
    /// When the entry becomes dispatchable; `None` means immediately.
    /// Fixed at push time and never mutated while queued, so the selection
    /// scan can read it without touching the job lock.
    ready_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Totals {
    enqueued: AtomicU64,
    processed: AtomicU64,
    retries: AtomicU64,
    dead: AtomicU64,
    cancelled: AtomicU64,
    dlq_cleared: AtomicU64,
}

struct QueueInner {
    config: QueueConfig,
    jobs: RwLock<HashMap<JobId, Arc<Mutex<QueueItem>>>>,
    buckets: [Mutex<VecDeque<BucketEntry>>; 3],
    processing: Mutex<HashMap<JobId, WorkerId>>,
    dlq: Mutex<VecDeque<JobId>>,
    /// Jobs currently occupying queue capacity (bucket residents).
    queued_total: AtomicUsize,
    at_capacity: AtomicBool,
    totals: Totals,
    completions: Mutex<VecDeque<Instant>>,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
}

/// Bounded multi-priority FIFO queue with retry and dead-letter semantics.
///
/// Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct DispatchQueue {
    inner: Arc<QueueInner>,
}

fn to_chrono(d: Duration) -> chrono::Duration {
    // Clamp absurd delays instead of overflowing datetime arithmetic.
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365))
}

impl DispatchQueue {
    /// Creates a queue from its configuration.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                jobs: RwLock::new(HashMap::new()),
                buckets: std::array::from_fn(|_| Mutex::new(VecDeque::new())),
                processing: Mutex::new(HashMap::new()),
                dlq: Mutex::new(VecDeque::new()),
                queued_total: AtomicUsize::new(0),
                at_capacity: AtomicBool::new(false),
                totals: Totals::default(),
                completions: Mutex::new(VecDeque::new()),
                latency_sum_ms: AtomicU64::new(0),
                latency_count: AtomicU64::new(0),
            }),
        }
    }

    /// Name configured for this queue instance.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Maximum total queued jobs.
    pub fn max_queue_size(&self) -> usize {
        self.inner.config.max_queue_size
    }

    fn job(&self, id: &JobId) -> Option<Arc<Mutex<QueueItem>>> {
        self.inner
            .jobs
            .read()
            .ok()
            .and_then(|map| map.get(id).cloned())
    }

    fn lock_job(arc: &Arc<Mutex<QueueItem>>) -> std::sync::MutexGuard<'_, QueueItem> {
        // A poisoned job lock means a panic mid-transition; the data is a
        // plain record, so continuing with it is safe.
        match arc.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn bucket(&self, priority: Priority) -> std::sync::MutexGuard<'_, VecDeque<BucketEntry>> {
        match self.inner.buckets[priority.index()].lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, event: QueueEvent) {
        self.inner.config.event_listeners.emit(&event);
    }

    /// Reserves one unit of queue capacity, failing when the queue is full.
    fn reserve_slot(&self) -> Result<()> {
        let max = self.inner.config.max_queue_size;
        self.inner
            .queued_total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                if cur >= max {
                    None
                } else {
                    Some(cur + 1)
                }
            })
            .map_err(|_| QueueError::CapacityExceeded {
                max_queue_size: max,
            })?;
        Ok(())
    }

    /// Emits `queue:capacity:reached` once per rising edge.
    fn check_capacity_edge(&self) {
        let max = self.inner.config.max_queue_size;
        if self.inner.queued_total.load(Ordering::SeqCst) >= max
            && !self.inner.at_capacity.swap(true, Ordering::SeqCst)
        {
            self.emit(QueueEvent::CapacityReached {
                component: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                max_queue_size: max,
            });
        }
    }

    fn release_slot(&self) {
        let prev = self.inner.queued_total.fetch_sub(1, Ordering::SeqCst);
        if prev.saturating_sub(1) < self.inner.config.max_queue_size {
            self.inner.at_capacity.store(false, Ordering::SeqCst);
        }
    }

    /// Re-occupies a slot for a job that already holds admission (a retry or
    /// a failover requeue). Never rejects.
    fn reoccupy_slot(&self) {
        self.inner.queued_total.fetch_add(1, Ordering::SeqCst);
    }

    #[cfg(feature = "metrics")]
    fn record_depth(&self) {
        for priority in Priority::ALL {
            let depth = self.bucket(priority).len() as f64;
            gauge!("conductor_queue_depth", "queue" => self.inner.config.name.clone(), "priority" => priority.as_str())
                .set(depth);
        }
    }

    /// Admits a job into the queue.
    pub fn enqueue(&self, payload: JobPayload, priority: Priority) -> Result<QueueItem> {
        self.enqueue_as(None, payload, priority)
    }

    /// Admits a job tagged with the caller identity used by admission
    /// control; the tag is how the concurrent-rate counter is released when
    /// the job reaches a terminal state.
    pub fn enqueue_as(
        &self,
        identifier: Option<String>,
        payload: JobPayload,
        priority: Priority,
    ) -> Result<QueueItem> {
        self.reserve_slot()?;

        let mut item = QueueItem::new(payload, priority, self.inner.config.max_attempts);
        item.identifier = identifier;
        let snapshot = item.clone();

        {
            let mut jobs = match self.inner.jobs.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            jobs.insert(item.id.clone(), Arc::new(Mutex::new(item)));
        }
        self.bucket(priority).push_back(BucketEntry {
            id: snapshot.id.clone(),
            ready_at: None,
        });

        self.inner.totals.enqueued.fetch_add(1, Ordering::SeqCst);

        #[cfg(feature = "metrics")]
        {
            counter!("conductor_queue_enqueued_total", "queue" => self.inner.config.name.clone())
                .increment(1);
            self.record_depth();
        }

        self.emit(QueueEvent::ItemAdded {
            component: self.inner.config.name.clone(),
            timestamp: Instant::now(),
            job_id: snapshot.id.clone(),
            priority,
            depth: self.inner.queued_total.load(Ordering::SeqCst),
        });
        self.check_capacity_edge();

        tracing::debug!(job_id = %snapshot.id, priority = %priority, "job enqueued");
        Ok(snapshot)
    }

    /// Cancels a pending job. Returns `false` if the job is processing,
    /// terminal, or unknown; processing jobs must be failed by their worker.
    pub fn cancel(&self, id: &JobId) -> bool {
        let Some(arc) = self.job(id) else {
            return false;
        };
        let guard = Self::lock_job(&arc);
        if !guard.status.is_dispatchable() {
            return false;
        }
        let priority = guard.priority;

        // The bucket entry is the job's claim to pending-ness. If the
        // dispatcher already took the entry, cancellation loses the race.
        let removed = {
            let mut bucket = self.bucket(priority);
            match bucket.iter().position(|entry| &entry.id == id) {
                Some(index) => {
                    bucket.remove(index);
                    true
                }
                None => false,
            }
        };
        if !removed {
            return false;
        }
        drop(guard);

        self.release_slot();
        {
            let mut jobs = match self.inner.jobs.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            jobs.remove(id);
        }
        self.inner.totals.cancelled.fetch_add(1, Ordering::SeqCst);

        self.emit(QueueEvent::ItemCancelled {
            component: self.inner.config.name.clone(),
            timestamp: Instant::now(),
            job_id: id.clone(),
        });
        tracing::debug!(job_id = %id, "job cancelled");
        true
    }

    /// Returns a snapshot of the job in whichever compartment holds it.
    pub fn status(&self, id: &JobId) -> Option<QueueItem> {
        let arc = self.job(id)?;
        let guard = Self::lock_job(&arc);
        Some(guard.clone())
    }

    /// Pops the next dispatchable job: priorities scanned high to normal to
    /// low, and within a bucket the first entry whose retry time is absent
    /// or due. Returns `None` when nothing is dispatchable at `now`.
    ///
    /// The caller owns the job until it either [`start`](Self::start)s it or
    /// hands it back via [`release_to_front`](Self::release_to_front).
    pub fn take_next(&self, now: DateTime<Utc>) -> Option<QueueItem> {
        for priority in Priority::ALL {
            let entry = {
                let mut bucket = self.bucket(priority);
                let index = bucket
                    .iter()
                    .position(|entry| entry.ready_at.map_or(true, |at| at <= now));
                index.and_then(|index| bucket.remove(index))
            };
            let Some(entry) = entry else { continue };

            self.release_slot();
            match self.job(&entry.id) {
                Some(arc) => {
                    let guard = Self::lock_job(&arc);
                    return Some(guard.clone());
                }
                // Entry outlived its job; drop it and keep scanning.
                None => continue,
            }
        }
        None
    }

    /// Returns a taken-but-unstarted job to the front of its bucket, with an
    /// optional backoff before it becomes dispatchable again.
    pub fn release_to_front(&self, id: &JobId, ready_at: Option<DateTime<Utc>>) -> Result<()> {
        let arc = self.job(id).ok_or_else(|| QueueError::NotFound(id.clone()))?;
        let mut guard = Self::lock_job(&arc);
        if !guard.status.is_dispatchable() {
            return Err(QueueError::Conflict {
                id: id.clone(),
                status: guard.status,
            });
        }
        guard.next_retry_at = ready_at;
        let priority = guard.priority;
        drop(guard);

        self.reoccupy_slot();
        self.bucket(priority).push_front(BucketEntry {
            id: id.clone(),
            ready_at,
        });
        Ok(())
    }

    /// Marks a job as processing on the given worker.
    ///
    /// Increments `attempts` and records the attempt time.
    pub fn start(&self, id: &JobId, worker: &WorkerId) -> Result<QueueItem> {
        let arc = self.job(id).ok_or_else(|| QueueError::NotFound(id.clone()))?;
        let mut guard = Self::lock_job(&arc);
        if !guard.status.is_dispatchable() {
            return Err(QueueError::Conflict {
                id: id.clone(),
                status: guard.status,
            });
        }
        guard.status = JobStatus::Processing;
        guard.attempts += 1;
        guard.last_attempt_at = Some(Utc::now());
        guard.next_retry_at = None;
        guard.owner = Some(worker.clone());
        let snapshot = guard.clone();
        drop(guard);

        match self.inner.processing.lock() {
            Ok(mut processing) => {
                processing.insert(id.clone(), worker.clone());
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(id.clone(), worker.clone());
            }
        }

        self.emit(QueueEvent::ItemProcessing {
            component: self.inner.config.name.clone(),
            timestamp: Instant::now(),
            job_id: id.clone(),
            attempt: snapshot.attempts,
        });
        tracing::debug!(job_id = %id, worker_id = %worker, attempt = snapshot.attempts, "job processing");
        Ok(snapshot)
    }

    /// Completes a processing job. A second completion (or a completion
    /// racing a failure) returns [`QueueError::Conflict`] without state
    /// change.
    pub fn complete(&self, id: &JobId, result: Option<serde_json::Value>) -> Result<QueueItem> {
        let arc = self.job(id).ok_or_else(|| QueueError::NotFound(id.clone()))?;
        let mut guard = Self::lock_job(&arc);
        if guard.status != JobStatus::Processing {
            return Err(QueueError::Conflict {
                id: id.clone(),
                status: guard.status,
            });
        }
        let now = Utc::now();
        let elapsed_ms = guard
            .last_attempt_at
            .map(|started| (now - started).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        guard.status = JobStatus::Completed;
        guard.completed_at = Some(now);
        guard.processing_time_ms = Some(elapsed_ms);
        guard.result = result;
        guard.error = None;
        let snapshot = guard.clone();
        drop(guard);

        self.remove_processing(id);
        self.inner.totals.processed.fetch_add(1, Ordering::SeqCst);
        self.inner
            .latency_sum_ms
            .fetch_add(elapsed_ms, Ordering::SeqCst);
        self.inner.latency_count.fetch_add(1, Ordering::SeqCst);
        self.record_completion();

        #[cfg(feature = "metrics")]
        counter!("conductor_queue_completed_total", "queue" => self.inner.config.name.clone())
            .increment(1);

        self.emit(QueueEvent::ItemCompleted {
            component: self.inner.config.name.clone(),
            timestamp: Instant::now(),
            job_id: id.clone(),
            processing_time: Duration::from_millis(elapsed_ms),
        });
        tracing::debug!(job_id = %id, elapsed_ms, "job completed");
        Ok(snapshot)
    }

    /// Fails a processing job: requeues it with backoff while attempts
    /// remain, otherwise dead-letters it.
    ///
    /// The retry-or-dead decision and the container mutation happen under
    /// the job lock, so a racing second `fail` observes the transition and
    /// gets [`QueueError::Conflict`]; a job can never be dead-lettered
    /// twice.
    pub fn fail(&self, id: &JobId, error: JobError) -> Result<FailOutcome> {
        let arc = self.job(id).ok_or_else(|| QueueError::NotFound(id.clone()))?;
        let mut guard = Self::lock_job(&arc);
        if guard.status != JobStatus::Processing {
            return Err(QueueError::Conflict {
                id: id.clone(),
                status: guard.status,
            });
        }

        self.remove_processing(id);
        guard.owner = None;
        guard.error = Some(error);

        if guard.attempts < guard.max_attempts {
            let delay = self.inner.config.retry_delay_for(guard.attempts);
            let ready_at = Utc::now() + to_chrono(delay);
            guard.status = JobStatus::Failed;
            guard.next_retry_at = Some(ready_at);
            let snapshot = guard.clone();
            let priority = guard.priority;
            drop(guard);

            self.reoccupy_slot();
            // Front of the bucket: once due, a retry preempts ordinary FIFO.
            self.bucket(priority).push_front(BucketEntry {
                id: id.clone(),
                ready_at: Some(ready_at),
            });
            self.inner.totals.retries.fetch_add(1, Ordering::SeqCst);

            #[cfg(feature = "metrics")]
            counter!("conductor_queue_retries_total", "queue" => self.inner.config.name.clone())
                .increment(1);

            self.emit(QueueEvent::ItemRetry {
                component: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                job_id: id.clone(),
                attempt: snapshot.attempts,
                delay,
            });
            tracing::debug!(job_id = %id, attempt = snapshot.attempts, ?delay, "job requeued for retry");
            Ok(FailOutcome::Retry {
                item: snapshot,
                delay,
            })
        } else {
            guard.status = JobStatus::Dead;
            let snapshot = guard.clone();
            drop(guard);

            match self.inner.dlq.lock() {
                Ok(mut dlq) => dlq.push_back(id.clone()),
                Err(poisoned) => poisoned.into_inner().push_back(id.clone()),
            }
            self.inner.totals.dead.fetch_add(1, Ordering::SeqCst);

            #[cfg(feature = "metrics")]
            {
                counter!("conductor_queue_dead_total", "queue" => self.inner.config.name.clone())
                    .increment(1);
                gauge!("conductor_queue_dlq_size", "queue" => self.inner.config.name.clone())
                    .set(self.dlq_len() as f64);
            }

            self.emit(QueueEvent::ItemDead {
                component: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                job_id: id.clone(),
                attempts: snapshot.attempts,
            });
            tracing::warn!(job_id = %id, attempts = snapshot.attempts, "job dead-lettered");
            Ok(FailOutcome::Dead { item: snapshot })
        }
    }

    /// Reassigns a processing job to another worker after its original
    /// worker was lost. Counts as a fresh attempt but never against
    /// `max_attempts`; the `reroutes` counter records it.
    pub fn reroute(&self, id: &JobId, new_worker: &WorkerId) -> Result<QueueItem> {
        let arc = self.job(id).ok_or_else(|| QueueError::NotFound(id.clone()))?;
        let mut guard = Self::lock_job(&arc);
        if guard.status != JobStatus::Processing {
            return Err(QueueError::Conflict {
                id: id.clone(),
                status: guard.status,
            });
        }
        guard.attempts += 1;
        guard.reroutes += 1;
        guard.last_attempt_at = Some(Utc::now());
        guard.owner = Some(new_worker.clone());
        let snapshot = guard.clone();
        drop(guard);

        match self.inner.processing.lock() {
            Ok(mut processing) => {
                processing.insert(id.clone(), new_worker.clone());
            }
            Err(poisoned) => {
                poisoned
                    .into_inner()
                    .insert(id.clone(), new_worker.clone());
            }
        }
        tracing::info!(job_id = %id, worker_id = %new_worker, reroutes = snapshot.reroutes, "job rerouted");
        Ok(snapshot)
    }

    /// Returns a processing job to the front of its bucket, immediately
    /// dispatchable, after its worker was lost with no replacement.
    pub fn requeue_from_processing(&self, id: &JobId) -> Result<QueueItem> {
        let arc = self.job(id).ok_or_else(|| QueueError::NotFound(id.clone()))?;
        let mut guard = Self::lock_job(&arc);
        if guard.status != JobStatus::Processing {
            return Err(QueueError::Conflict {
                id: id.clone(),
                status: guard.status,
            });
        }
        self.remove_processing(id);
        let now = Utc::now();
        guard.status = JobStatus::Pending;
        guard.reroutes += 1;
        guard.owner = None;
        guard.next_retry_at = Some(now);
        let snapshot = guard.clone();
        let priority = guard.priority;
        drop(guard);

        self.reoccupy_slot();
        self.bucket(priority).push_front(BucketEntry {
            id: id.clone(),
            ready_at: Some(now),
        });
        tracing::info!(job_id = %id, "job returned to queue after worker loss");
        Ok(snapshot)
    }

    fn remove_processing(&self, id: &JobId) {
        match self.inner.processing.lock() {
            Ok(mut processing) => {
                processing.remove(id);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(id);
            }
        }
    }

    /// Snapshot of the processing set as `(job, owner)` pairs.
    pub fn processing_snapshot(&self) -> Vec<(JobId, WorkerId)> {
        match self.inner.processing.lock() {
            Ok(processing) => processing
                .iter()
                .map(|(id, worker)| (id.clone(), worker.clone()))
                .collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .map(|(id, worker)| (id.clone(), worker.clone()))
                .collect(),
        }
    }

    /// Number of jobs currently processing.
    pub fn processing_len(&self) -> usize {
        match self.inner.processing.lock() {
            Ok(processing) => processing.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Earliest retry deadline across all buckets, if any entry is waiting.
    pub fn next_retry_deadline(&self) -> Option<DateTime<Utc>> {
        let mut earliest: Option<DateTime<Utc>> = None;
        for priority in Priority::ALL {
            let bucket = self.bucket(priority);
            for entry in bucket.iter() {
                if let Some(at) = entry.ready_at {
                    earliest = Some(match earliest {
                        Some(current) if current <= at => current,
                        _ => at,
                    });
                }
            }
        }
        earliest
    }

    /// Number of queued (bucket-resident) jobs.
    pub fn queued_len(&self) -> usize {
        self.inner.queued_total.load(Ordering::SeqCst)
    }

    /// Jobs currently in the dead-letter queue, oldest first.
    pub fn dlq_items(&self) -> Vec<QueueItem> {
        let ids: Vec<JobId> = match self.inner.dlq.lock() {
            Ok(dlq) => dlq.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        };
        ids.iter().filter_map(|id| self.status(id)).collect()
    }

    /// Number of dead-lettered jobs.
    pub fn dlq_len(&self) -> usize {
        match self.inner.dlq.lock() {
            Ok(dlq) => dlq.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Re-admits a dead-lettered job to the back of its original priority
    /// bucket with a fresh attempt budget. Bounded by queue capacity.
    pub fn dlq_retry(&self, id: &JobId) -> Result<QueueItem> {
        self.reserve_slot()?;

        let found = {
            let mut dlq = match self.inner.dlq.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match dlq.iter().position(|queued| queued == id) {
                Some(index) => {
                    dlq.remove(index);
                    true
                }
                None => false,
            }
        };
        if !found {
            self.release_slot();
            return Err(QueueError::NotFound(id.clone()));
        }

        let arc = self.job(id).ok_or_else(|| QueueError::NotFound(id.clone()))?;
        let mut guard = Self::lock_job(&arc);
        guard.status = JobStatus::Pending;
        guard.attempts = 0;
        guard.error = None;
        guard.result = None;
        guard.next_retry_at = None;
        guard.processing_time_ms = None;
        guard.owner = None;
        let priority = guard.priority;
        let snapshot = guard.clone();
        drop(guard);

        self.bucket(priority).push_back(BucketEntry {
            id: id.clone(),
            ready_at: None,
        });

        #[cfg(feature = "metrics")]
        gauge!("conductor_queue_dlq_size", "queue" => self.inner.config.name.clone())
            .set(self.dlq_len() as f64);

        self.emit(QueueEvent::DlqReplayed {
            component: self.inner.config.name.clone(),
            timestamp: Instant::now(),
            job_id: id.clone(),
        });
        self.check_capacity_edge();
        tracing::info!(job_id = %id, "dead-lettered job re-admitted");
        Ok(snapshot)
    }

    /// Removes every dead-lettered job. Returns the number removed.
    pub fn dlq_clear(&self) -> usize {
        let ids: Vec<JobId> = {
            let mut dlq = match self.inner.dlq.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            dlq.drain(..).collect()
        };
        {
            let mut jobs = match self.inner.jobs.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for id in &ids {
                jobs.remove(id);
            }
        }
        let removed = ids.len();
        self.inner
            .totals
            .dlq_cleared
            .fetch_add(removed as u64, Ordering::SeqCst);

        #[cfg(feature = "metrics")]
        gauge!("conductor_queue_dlq_size", "queue" => self.inner.config.name.clone()).set(0.0);

        self.emit(QueueEvent::DlqCleared {
            component: self.inner.config.name.clone(),
            timestamp: Instant::now(),
            removed,
        });
        removed
    }

    fn record_completion(&self) {
        let now = Instant::now();
        let window = self.inner.config.throughput_window;
        let mut completions = match self.inner.completions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        completions.push_back(now);
        while let Some(&front) = completions.front() {
            if now.duration_since(front) > window {
                completions.pop_front();
            } else {
                break;
            }
        }
    }

    /// Current queue counters.
    pub fn metrics(&self) -> QueueMetrics {
        let throughput = {
            let now = Instant::now();
            let window = self.inner.config.throughput_window;
            let mut completions = match self.inner.completions.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            while let Some(&front) = completions.front() {
                if now.duration_since(front) > window {
                    completions.pop_front();
                } else {
                    break;
                }
            }
            completions.len() as f64 / window.as_secs_f64().max(f64::EPSILON)
        };
        let count = self.inner.latency_count.load(Ordering::SeqCst);
        let avg_processing_time_ms = if count == 0 {
            0.0
        } else {
            self.inner.latency_sum_ms.load(Ordering::SeqCst) as f64 / count as f64
        };

        QueueMetrics {
            high: self.bucket(Priority::High).len(),
            normal: self.bucket(Priority::Normal).len(),
            low: self.bucket(Priority::Low).len(),
            processing: self.processing_len(),
            dlq: self.dlq_len(),
            total_enqueued: self.inner.totals.enqueued.load(Ordering::SeqCst),
            total_processed: self.inner.totals.processed.load(Ordering::SeqCst),
            total_retries: self.inner.totals.retries.load(Ordering::SeqCst),
            total_dead: self.inner.totals.dead.load(Ordering::SeqCst),
            total_cancelled: self.inner.totals.cancelled.load(Ordering::SeqCst),
            total_dlq_cleared: self.inner.totals.dlq_cleared.load(Ordering::SeqCst),
            throughput_per_sec: throughput,
            avg_processing_time_ms,
        }
    }
}
