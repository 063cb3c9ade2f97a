//! Fanout of events to connected workers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use conductor_core::WorkerId;
use tokio::sync::mpsc;

use crate::event::Event;

/// How an event left the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fanout {
    /// Delivered to the addressed worker's channel.
    Directed(WorkerId),
    /// Broadcast; carries the number of channels that accepted it.
    Broadcast(usize),
}

struct BridgeInner {
    name: String,
    channels: RwLock<HashMap<WorkerId, mpsc::UnboundedSender<Event>>>,
}

/// Directory of per-worker event channels.
///
/// An event carrying a `worker_id` is delivered directed; when the channel
/// is unknown or closed the bridge falls back to broadcast. Events without
/// an address broadcast to every connected worker. Delivery is at-least-once
/// for directed events and best-effort for broadcast, so frame consumers
/// must be idempotent.
#[derive(Clone)]
pub struct FanoutBridge {
    inner: Arc<BridgeInner>,
}

impl FanoutBridge {
    /// Creates an empty bridge.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                name: name.into(),
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Registers (or replaces) a worker's event channel.
    pub fn register(&self, worker_id: WorkerId, sender: mpsc::UnboundedSender<Event>) {
        let mut channels = match self.inner.channels.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels.insert(worker_id, sender);
    }

    /// Removes a worker's channel. Returns `false` when it was unknown.
    pub fn unregister(&self, worker_id: &WorkerId) -> bool {
        let mut channels = match self.inner.channels.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels.remove(worker_id).is_some()
    }

    /// Worker ids with a registered channel.
    pub fn connected(&self) -> Vec<WorkerId> {
        match self.inner.channels.read() {
            Ok(channels) => channels.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Routes an event: directed to its addressed worker, broadcast
    /// otherwise (or when directed delivery fails).
    pub fn route(&self, event: &Event) -> Fanout {
        if let Some(worker_id) = event.worker_id() {
            let sender = match self.inner.channels.read() {
                Ok(channels) => channels.get(&worker_id).cloned(),
                Err(_) => None,
            };
            match sender {
                Some(sender) if sender.send(event.clone()).is_ok() => {
                    return Fanout::Directed(worker_id);
                }
                Some(_) => {
                    // Closed channel: drop it and fall back to broadcast.
                    self.unregister(&worker_id);
                    tracing::debug!(
                        bridge = %self.inner.name,
                        worker_id = %worker_id,
                        kind = %event.kind,
                        "directed channel closed; broadcasting"
                    );
                }
                None => {
                    tracing::debug!(
                        bridge = %self.inner.name,
                        worker_id = %worker_id,
                        kind = %event.kind,
                        "directed worker unknown; broadcasting"
                    );
                }
            }
        }
        Fanout::Broadcast(self.broadcast(event))
    }

    fn broadcast(&self, event: &Event) -> usize {
        let senders: Vec<(WorkerId, mpsc::UnboundedSender<Event>)> =
            match self.inner.channels.read() {
                Ok(channels) => channels
                    .iter()
                    .map(|(id, sender)| (id.clone(), sender.clone()))
                    .collect(),
                Err(_) => Vec::new(),
            };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (worker_id, sender) in senders {
            if sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(worker_id);
            }
        }
        for worker_id in closed {
            self.unregister(&worker_id);
        }
        delivered
    }
}
