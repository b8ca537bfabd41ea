//! In-process event bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

use crate::bus::{EventBus, SubscriptionId};
use crate::handler::Subscriber;

type SharedSubscriber<M, E> = Arc<dyn Subscriber<M, Error = E>>;

/// In-memory pub/sub bus.
///
/// - No IO / no async
/// - Deterministic fan-out in registration order
/// - Subscriber list is snapshotted per publish, so handlers may (un)subscribe while
///   being invoked without deadlocking
pub struct InMemoryEventBus<M, E> {
    subscribers: RwLock<Vec<(SubscriptionId, SharedSubscriber<M, E>)>>,
    next_id: AtomicU64,
}

impl<M, E> InMemoryEventBus<M, E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Vec<SharedSubscriber<M, E>> {
        // A panicking subscriber can't leave the Vec half-modified, so poisoning is ignored.
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect()
    }
}

impl<M, E> Default for InMemoryEventBus<M, E> {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<M, E> core::fmt::Debug for InMemoryEventBus<M, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("subscribers", &self.subscriber_count_inner())
            .finish()
    }
}

impl<M, E> InMemoryEventBus<M, E> {
    fn subscriber_count_inner(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<M, E> EventBus<M> for InMemoryEventBus<M, E>
where
    M: 'static,
    E: 'static,
{
    type Error = E;

    fn publish(&self, message: M) -> Result<(), E> {
        let subscribers = self.snapshot();
        trace!(subscribers = subscribers.len(), "publishing message");

        for subscriber in subscribers {
            subscriber.handle(&message)?;
        }

        Ok(())
    }

    fn subscribe(&self, subscriber: SharedSubscriber<M, E>) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, subscriber));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        subs.len() != before
    }

    fn subscriber_count(&self) -> usize {
        self.subscriber_count_inner()
    }
}
