//! In-process command/event distribution.
//!
//! Mechanics only: a synchronous publish/subscribe bus plus the trait that subscribers
//! implement. Nothing here knows about orders or storage.

pub mod bus;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, SubscriptionId};
pub use handler::{FnSubscriber, Subscriber, subscriber_fn};
pub use in_memory_bus::InMemoryEventBus;
