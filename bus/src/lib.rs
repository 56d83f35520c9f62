//! The Change Bus (spec §4.5): a single in-process publish/subscribe
//! primitive. Delivery is best-effort - subscribers must be idempotent -
//! and publishers never block on a slow subscriber: a full queue drops its
//! oldest entry and enqueues a `Resync` marker in its place instead.

mod event;

pub use event::ChangeEvent;

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::{Condvar, Mutex};

/// Bounded per-subscriber queue depth. Chosen generously relative to the
/// Reconciler's default 200ms debounce window (spec §4.7): a burst of a
/// few hundred edits in under 200ms is the only realistic way to fill it.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct Inner {
    queue: Mutex<VecDeque<ChangeEvent>>,
    not_empty: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

/// A subscriber's handle onto its own queue. Cloning a `ChangeBus` and
/// calling `subscribe` again creates an independent subscriber; each one
/// sees every published event.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

impl Subscription {
    fn push(&self, event: ChangeEvent) {
        let mut queue = self.inner.queue.lock();
        if queue.len() >= self.inner.capacity {
            let network_id = queue.pop_front().map(|e| e.network_id()).unwrap_or(event.network_id());
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!("change bus subscriber queue full, dropping oldest event and forcing resync for {network_id}");
            queue.push_back(ChangeEvent::Resync(network_id));
        }
        queue.push_back(event);
        self.inner.not_empty.notify_one();
    }

    /// Blocks until an event is available.
    pub fn recv(&self) -> ChangeEvent {
        let mut queue = self.inner.queue.lock();
        loop {
            if let Some(event) = queue.pop_front() {
                return event;
            }
            self.inner.not_empty.wait(&mut queue);
        }
    }

    /// Non-blocking poll; `None` if nothing is queued.
    pub fn try_recv(&self) -> Option<ChangeEvent> {
        self.inner.queue.lock().pop_front()
    }

    /// How many events this subscriber has ever lost to backpressure.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

/// The publish side. Cheap to clone (an `Arc` of subscriber handles) so
/// every component that mutates the Store can hold its own handle.
#[derive(Clone, Default)]
pub struct ChangeBus {
    subscribers: Arc<Mutex<Vec<Subscription>>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> Subscription {
        let subscription = Subscription {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                not_empty: Condvar::new(),
                capacity,
                dropped: AtomicU64::new(0),
            }),
        };
        self.subscribers.lock().push(subscription.clone());
        subscription
    }

    /// Delivers `event` to every current subscriber. Never blocks past
    /// acquiring each subscriber's own queue lock.
    pub fn publish(&self, event: ChangeEvent) {
        let subscribers = self.subscribers.lock().clone();
        for subscriber in &subscribers {
            subscriber.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgmesh_types::{NetworkId, PeerId};

    #[test]
    fn every_subscriber_receives_every_event() {
        let bus = ChangeBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        let network_id = NetworkId::new();
        bus.publish(ChangeEvent::NetworkChanged { network_id });

        assert_eq!(a.recv(), ChangeEvent::NetworkChanged { network_id });
        assert_eq!(b.recv(), ChangeEvent::NetworkChanged { network_id });
    }

    #[test]
    fn overflow_drops_oldest_and_injects_resync() {
        let bus = ChangeBus::new();
        let sub = bus.subscribe_with_capacity(2);
        let network_id = NetworkId::new();

        bus.publish(ChangeEvent::PeerChanged { network_id, peer_ids: vec![PeerId::new()] });
        bus.publish(ChangeEvent::PeerChanged { network_id, peer_ids: vec![PeerId::new()] });
        bus.publish(ChangeEvent::PeerChanged { network_id, peer_ids: vec![PeerId::new()] });

        assert_eq!(sub.dropped_count(), 1);
        let first = sub.recv();
        assert_eq!(first, ChangeEvent::Resync(network_id));
        assert!(matches!(sub.recv(), ChangeEvent::PeerChanged { .. }));
    }

    #[test]
    fn try_recv_is_non_blocking_when_empty() {
        let bus = ChangeBus::new();
        let sub = bus.subscribe();
        assert!(sub.try_recv().is_none());
    }
}
