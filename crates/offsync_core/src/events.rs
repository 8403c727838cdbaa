//! Publish/subscribe event bus.
//!
//! Subscribers receive every event published after they subscribe, in
//! publish order. Dropping a [`Subscription`] unsubscribes it.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Weak};
use std::time::Duration;

struct Subscriber<E> {
    id: u64,
    tx: Sender<E>,
}

struct BusInner<E> {
    subscribers: RwLock<Vec<Subscriber<E>>>,
    next_id: AtomicU64,
}

impl<E> BusInner<E> {
    fn remove(&self, id: u64) {
        self.subscribers.write().retain(|s| s.id != id);
    }
}

/// A cloneable handle to a shared event bus.
pub struct EventBus<E> {
    inner: Arc<BusInner<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.write().push(Subscriber { id, tx });
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `event` to every live subscriber, returning how many got it.
    pub fn publish(&self, event: E) -> usize {
        let mut subscribers = self.inner.subscribers.write();
        subscribers.retain(|s| s.tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    /// Live subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.inner.subscribers.read().len())
            .finish()
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription<E> {
    id: u64,
    rx: Receiver<E>,
    bus: Weak<BusInner<E>>,
}

impl<E> Subscription<E> {
    /// Next event if one is waiting.
    #[must_use]
    pub fn try_recv(&self) -> Option<E> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Waits up to `timeout` for the next event.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<E> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drains every waiting event.
    #[must_use]
    pub fn drain(&self) -> Vec<E> {
        self.rx.try_iter().collect()
    }

    /// Unsubscribes explicitly.
    pub fn cancel(self) {}
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl<E> std::fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        bus.publish(1);
        bus.publish(2);
        assert_eq!(sub.drain(), vec![1, 2]);
    }

    #[test]
    fn late_subscribers_miss_earlier_events() {
        let bus = EventBus::new();
        bus.publish("early");
        let sub = bus.subscribe();
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn cancel_unsubscribes() {
        let bus: EventBus<u8> = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        a.cancel();
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.publish(7), 1);
        assert_eq!(b.recv_timeout(Duration::from_millis(10)), Some(7));
    }

    #[test]
    fn subscription_outlives_bus() {
        let bus: EventBus<u8> = EventBus::new();
        let sub = bus.subscribe();
        drop(bus);
        assert_eq!(sub.try_recv(), None);
    }
}
