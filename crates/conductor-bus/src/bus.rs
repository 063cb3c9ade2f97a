//! The publish-subscribe hub.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::bridge::FanoutBridge;
use crate::config::BusConfig;
use crate::error::{HandlerError, HandlerResult};
use crate::event::Event;
use crate::subscription::{Handler, SubscribeOptions, SubscriptionId};

/// An event whose subscriber exhausted its delivery attempts.
#[derive(Debug, Clone)]
pub struct DeadEvent {
    pub event: Event,
    pub subscription_id: SubscriptionId,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

struct SubEntry {
    id: SubscriptionId,
    priority: i32,
    tx: mpsc::UnboundedSender<Event>,
}

struct BusInner {
    config: BusConfig,
    /// Open mapping: event kind to its subscribers, kept priority-sorted.
    /// The `*` kind receives every event.
    subs: RwLock<HashMap<String, Vec<SubEntry>>>,
    dlq: Arc<Mutex<VecDeque<DeadEvent>>>,
    bridge: RwLock<Option<FanoutBridge>>,
    next_id: AtomicU64,
}

/// In-process publish-subscribe hub for lifecycle events.
///
/// Each subscription gets its own FIFO channel and delivery task, so
/// ordering holds per subscriber with no cross-subscriber guarantee. Handler
/// execution is bounded by the subscription's timeout, retried with
/// exponential backoff when configured, and dead-lettered on exhaustion.
///
/// Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a bus from its configuration.
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                subs: RwLock::new(HashMap::new()),
                dlq: Arc::new(Mutex::new(VecDeque::new())),
                bridge: RwLock::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Attaches the worker fanout bridge; every published event is also
    /// routed through it.
    pub fn attach_bridge(&self, bridge: FanoutBridge) {
        let mut slot = match self.inner.bridge.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(bridge);
    }

    /// Subscribes a handler to an event kind (`*` for all events).
    ///
    /// The handler runs on its own delivery task; events queue FIFO behind
    /// slow handlers rather than being dropped.
    pub fn subscribe<F, Fut>(
        &self,
        kind: impl Into<String>,
        options: SubscribeOptions,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |event| Box::pin(handler(event)));
        self.subscribe_boxed(kind.into(), options, handler)
    }

    fn subscribe_boxed(
        &self,
        kind: String,
        options: SubscribeOptions,
        handler: Handler,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        {
            let mut subs = match self.inner.subs.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let entries = subs.entry(kind.clone()).or_default();
            entries.push(SubEntry {
                id,
                priority: options.priority,
                tx,
            });
            entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        }

        let dlq = Arc::clone(&self.inner.dlq);
        let max_dlq = self.inner.config.max_dlq_size;
        let bus_name = self.inner.config.name.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                deliver(&handler, event, &options, &dlq, max_dlq, id, &bus_name).await;
            }
        });

        id
    }

    /// Removes a subscription. Its delivery task drains and exits.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = match self.inner.subs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut removed = false;
        subs.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|entry| entry.id != id);
            removed |= entries.len() != before;
            !entries.is_empty()
        });
        removed
    }

    /// Publishes an event to matching subscribers and, when a bridge is
    /// attached, to the worker channels.
    pub fn publish(&self, event: Event) {
        #[cfg(feature = "metrics")]
        counter!(
            "conductor_bus_published_total",
            "bus" => self.inner.config.name.clone(),
            "kind" => event.kind.clone()
        )
        .increment(1);

        {
            let subs = match self.inner.subs.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            // Exact-kind subscribers first, then wildcards, each batch in
            // priority order.
            for key in [event.kind.as_str(), "*"] {
                if let Some(entries) = subs.get(key) {
                    for entry in entries {
                        // A closed channel means the delivery task is gone;
                        // unsubscribe cleans the entry up later.
                        let _ = entry.tx.send(event.clone());
                    }
                }
            }
        }

        let bridge = match self.inner.bridge.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(bridge) = bridge {
            bridge.route(&event);
        }
    }

    /// Events whose subscribers exhausted delivery, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadEvent> {
        match self.inner.dlq.lock() {
            Ok(dlq) => dlq.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    /// Number of dead-lettered events.
    pub fn dead_letter_len(&self) -> usize {
        match self.inner.dlq.lock() {
            Ok(dlq) => dlq.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Clears the event dead-letter list. Returns the number removed.
    pub fn clear_dead_letters(&self) -> usize {
        let mut dlq = match self.inner.dlq.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let removed = dlq.len();
        dlq.clear();
        removed
    }
}

async fn deliver(
    handler: &Handler,
    event: Event,
    options: &SubscribeOptions,
    dlq: &Arc<Mutex<VecDeque<DeadEvent>>>,
    max_dlq: usize,
    id: SubscriptionId,
    bus_name: &str,
) {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(options.timeout, handler(event.clone())).await {
            Ok(Ok(())) => {
                #[cfg(feature = "metrics")]
                counter!("conductor_bus_delivered_total", "bus" => bus_name.to_string())
                    .increment(1);
                return;
            }
            Ok(Err(error)) => error,
            Err(_) => HandlerError::Timeout(options.timeout),
        };

        let retries_left = options.retry_on_failure && attempt <= options.max_retries;
        tracing::debug!(
            bus = bus_name,
            subscription = id.0,
            kind = %event.kind,
            attempt,
            error = %outcome,
            retrying = retries_left,
            "event handler failed"
        );
        if !retries_left {
            #[cfg(feature = "metrics")]
            counter!("conductor_bus_handler_failures_total", "bus" => bus_name.to_string())
                .increment(1);

            let mut dlq = match dlq.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if dlq.len() >= max_dlq {
                dlq.pop_front();
            }
            dlq.push_back(DeadEvent {
                event,
                subscription_id: id,
                error: outcome.to_string(),
                failed_at: Utc::now(),
            });

            #[cfg(feature = "metrics")]
            gauge!("conductor_bus_dlq_size", "bus" => bus_name.to_string()).set(dlq.len() as f64);
            return;
        }

        tokio::time::sleep(options.backoff(attempt)).await;
    }
}
