use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use bazaar_types::events::ChatEvent;

/// Per-subscription queue depth. Large enough to absorb a burst of messages
/// while the stream writer is flushing.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// A serialized event, shared by every queue it is delivered to.
pub type Payload = Arc<str>;

/// Identifies one registered queue (one open stream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(Uuid);

/// Running delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: u64,
    /// Events discarded because the subscriber's queue was full.
    pub dropped: u64,
}

/// Routes events to the live streams of a user.
///
/// The user -> queues map is the only shared mutable state; it sits behind a
/// single mutex that is never held across an await or while sending.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    subscribers: Mutex<HashMap<i64, Vec<(HandleId, mpsc::Sender<Payload>)>>>,
    queue_capacity: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl EventBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                queue_capacity: queue_capacity.max(1),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<i64, Vec<(HandleId, mpsc::Sender<Payload>)>>> {
        // The map is left consistent by every critical section, so a panic
        // elsewhere does not invalidate it.
        self.inner.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new queue for `user_id`. Dropping the returned
    /// subscription deregisters it.
    pub fn register(&self, user_id: i64) -> Subscription {
        let handle = HandleId(Uuid::new_v4());
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        let open = {
            let mut subscribers = self.subscribers();
            let queues = subscribers.entry(user_id).or_default();
            queues.push((handle, tx));
            queues.len()
        };
        debug!("Registered stream {:?} for user {} ({} open)", handle, user_id, open);

        Subscription {
            bus: self.clone(),
            user_id,
            handle,
            rx,
        }
    }

    /// Remove exactly this handle. Dropping the bus-side sender is what
    /// closes the queue. Returns false if it was already gone.
    pub fn deregister(&self, user_id: i64, handle: HandleId) -> bool {
        let removed = {
            let mut subscribers = self.subscribers();
            let Some(queues) = subscribers.get_mut(&user_id) else {
                return false;
            };
            let before = queues.len();
            queues.retain(|(h, _)| *h != handle);
            let removed = queues.len() != before;
            if queues.is_empty() {
                subscribers.remove(&user_id);
            }
            removed
        };
        if removed {
            debug!("Deregistered stream {:?} for user {}", handle, user_id);
        }
        removed
    }

    /// Best-effort delivery to every open stream of `user_id`. Never blocks;
    /// a full queue loses the event. Returns the number of queues it reached.
    pub fn publish(&self, user_id: i64, event: &ChatEvent) -> usize {
        let senders = self.snapshot(user_id);
        if senders.is_empty() {
            return 0;
        }
        match encode(event) {
            Some(payload) => self.deliver(user_id, event.kind(), &payload, &senders),
            None => 0,
        }
    }

    /// Publish the same event to several users, serializing it once.
    pub fn publish_to<I>(&self, user_ids: I, event: &ChatEvent) -> usize
    where
        I: IntoIterator<Item = i64>,
    {
        let mut payload = None;
        let mut reached = 0;
        for user_id in user_ids {
            let senders = self.snapshot(user_id);
            if senders.is_empty() {
                continue;
            }
            if payload.is_none() {
                payload = encode(event);
            }
            let Some(encoded) = payload.as_ref() else {
                return reached;
            };
            reached += self.deliver(user_id, event.kind(), encoded, &senders);
        }
        reached
    }

    /// Copy of the user's senders taken under the lock.
    fn snapshot(&self, user_id: i64) -> Vec<mpsc::Sender<Payload>> {
        self.subscribers()
            .get(&user_id)
            .map(|queues| queues.iter().map(|(_, tx)| tx.clone()).collect())
            .unwrap_or_default()
    }

    fn deliver(&self, user_id: i64, kind: &str, payload: &Payload, senders: &[mpsc::Sender<Payload>]) -> usize {
        let mut delivered = 0;
        for tx in senders {
            match tx.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("Queue full, dropped {} event for user {}", kind, user_id);
                }
                // Stream is closing; its handle is about to be deregistered
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        self.inner.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        trace!("Delivered {} event to {}/{} streams of user {}", kind, delivered, senders.len(), user_id);
        delivered
    }

    /// Number of open streams for a user.
    pub fn subscriber_count(&self, user_id: i64) -> usize {
        self.subscribers().get(&user_id).map_or(0, Vec::len)
    }

    /// Number of users with at least one open stream.
    pub fn connected_users(&self) -> usize {
        self.subscribers().len()
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

fn encode(event: &ChatEvent) -> Option<Payload> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json.into()),
        Err(e) => {
            warn!("Failed to serialize {} event: {}", event.kind(), e);
            None
        }
    }
}

/// The receiving side of one registered queue.
///
/// Owned by the stream that created it; dropping it releases the bus-side
/// registration, whatever the reason the stream ended.
pub struct Subscription {
    bus: EventBus,
    user_id: i64,
    handle: HandleId,
    rx: mpsc::Receiver<Payload>,
}

impl Subscription {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }

    /// Next event in publish order. `None` once the handle has been
    /// deregistered and the queue drained.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Payload> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.deregister(self.user_id, self.handle);
    }
}
