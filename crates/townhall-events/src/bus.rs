use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::DomainEvent;

/// Per-subscriber channel depth used when no explicit capacity is given.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 128;

/// Identifies one registered output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome of one `publish`. Delivery is best effort; nothing here is an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Delivery {
    /// Subscribers that accepted the event into their channel.
    pub delivered: usize,
    /// Subscribers whose channel was full or closed; they were deregistered.
    pub dropped: usize,
}

/// Counters for operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub subscribers: usize,
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// A registered output channel. Dropping it closes the channel; the bus notices
/// on the next publish and deregisters the entry.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Arc<DomainEvent>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Arc<DomainEvent>> {
        self.rx.recv().await
    }

    pub fn into_parts(self) -> (SubscriberId, mpsc::Receiver<Arc<DomainEvent>>) {
        (self.id, self.rx)
    }
}

/// In-process publish/subscribe register.
///
/// Every subscriber receives every topic. Publishing never waits: each event
/// is offered to each channel with `try_send`, and a channel that is full or
/// closed is removed from the register rather than retried. Dispatch happens
/// under one short lock that is never held across an await, so events
/// published in sequence reach each subscriber in that order.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<Inner>,
}

struct Inner {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: Mutex<BTreeMap<SubscriberId, mpsc::Sender<Arc<DomainEvent>>>>,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(BTreeMap::new()),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.inner.subscribers.lock().insert(id, tx);
        tracing::debug!(subscriber = %id, "bus subscriber added");
        Subscription { id, rx }
    }

    /// Deregisters `id`. Returns false when it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.inner.subscribers.lock().remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = %id, "bus subscriber removed");
        }
        removed
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.inner.subscribers.lock().contains_key(&id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    pub fn publish(&self, event: DomainEvent) -> Delivery {
        let event = Arc::new(event);
        let mut report = Delivery::default();
        {
            let mut subscribers = self.inner.subscribers.lock();
            subscribers.retain(|id, tx| match tx.try_send(Arc::clone(&event)) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        subscriber = %id,
                        topic = %event.topic,
                        "subscriber lagging; dropped"
                    );
                    report.dropped += 1;
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(subscriber = %id, "subscriber closed; dropped");
                    report.dropped += 1;
                    false
                }
            });
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        self.inner
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.inner
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        report
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            subscribers: self.subscriber_count(),
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }
}
