//! Publish/subscribe abstraction (mechanics only).
//!
//! The bus decouples the code that *decides* a transition happened from the code that
//! *reacts* to it (persistence, audit, cache invalidation, ...).
//!
//! ## Delivery contract
//!
//! - **Synchronous**: `publish()` returns only after every subscriber has been invoked,
//!   on the caller's thread.
//! - **Ordered**: subscribers are invoked in registration order.
//! - **Fail-fast**: the first subscriber error stops delivery of that message and is
//!   returned to the publisher unchanged. Subscribers registered after the failing one
//!   do not see the message.
//! - **No persistence**: the bus only holds the list of subscribers. Messages are not
//!   buffered or replayed.

use std::sync::Arc;

use crate::handler::Subscriber;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe later.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Message bus with an explicit `subscribe` / `publish` contract.
///
/// ```text
/// Command handler ──publish──▶ EventBus ──handle──▶ subscriber #1
///                                         ├──handle──▶ subscriber #2
///                                         └──handle──▶ ...
/// ```
///
/// `Error` is the subscribers' error type. The bus surfaces it as-is and never adds
/// failure modes of its own to `publish()`.
///
/// The trait requires `Send + Sync` so one bus can be shared by concurrent publishers.
/// Each `publish()` call still delivers sequentially.
pub trait EventBus<M>: Send + Sync {
    type Error;

    /// Deliver `message` to every current subscriber, in registration order.
    fn publish(&self, message: M) -> Result<(), Self::Error>;

    /// Register a subscriber for every subsequently published message.
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<M, Error = Self::Error>>) -> SubscriptionId;

    /// Remove a subscriber. Returns `false` if the id was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    fn subscriber_count(&self) -> usize;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self, subscriber: Arc<dyn Subscriber<M, Error = Self::Error>>) -> SubscriptionId {
        (**self).subscribe(subscriber)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        (**self).unsubscribe(id)
    }

    fn subscriber_count(&self) -> usize {
        (**self).subscriber_count()
    }
}
