//! Broker subscriber that makes accepted status transitions durable.

use std::sync::Arc;

use tracing::debug;

use orderflow_events::{EventBus, Subscriber, SubscriptionId};
use orderflow_orders::{OrderCommand, StatusUpdate};

use crate::repository::{OrderStatusRepository, RepositoryError};

/// How an accepted `StatusUpdate` is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// Correct the order's row in place, or insert the update when the order has no row
    /// yet, as one atomic repository step. An order that already holds several rows
    /// (for example written under `Append`) can't be overwritten: every update fails
    /// with `DuplicateVersion` until its history is reverted to one row.
    #[default]
    Overwrite,
    /// Insert every accepted transition as its own history row.
    Append,
}

impl UpdatePolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Some(UpdatePolicy::Overwrite),
            "append" => Some(UpdatePolicy::Append),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdatePolicy::Overwrite => "overwrite",
            UpdatePolicy::Append => "append",
        }
    }
}

/// Canonical persistence subscriber.
///
/// Reacts to `StatusUpdate` only; every other command is ignored. Errors from the
/// repository are returned to the broker unchanged, which hands them to whoever
/// published. A failed write is not retried or compensated, so the transition is lost
/// until the caller resubmits it.
pub struct OrderEventHandler<R> {
    repository: R,
    policy: UpdatePolicy,
}

impl<R> OrderEventHandler<R> {
    pub fn new(repository: R, policy: UpdatePolicy) -> Self {
        Self { repository, policy }
    }

    pub fn policy(&self) -> UpdatePolicy {
        self.policy
    }
}

impl<R> OrderEventHandler<R>
where
    R: OrderStatusRepository + 'static,
{
    /// Build a handler bound to `repository` and subscribe it to `broker`.
    pub fn register<B>(
        repository: R,
        policy: UpdatePolicy,
        broker: &B,
    ) -> (Arc<Self>, SubscriptionId)
    where
        B: EventBus<OrderCommand, Error = RepositoryError> + ?Sized,
    {
        let handler = Arc::new(Self::new(repository, policy));
        let subscriber: Arc<dyn Subscriber<OrderCommand, Error = RepositoryError>> = handler.clone();
        let id = broker.subscribe(subscriber);
        debug!(subscription = %id, policy = policy.as_str(), "order event handler registered");
        (handler, id)
    }
}

impl<R> OrderEventHandler<R>
where
    R: OrderStatusRepository,
{
    /// Persist one accepted transition according to the policy.
    pub fn apply(&self, update: &StatusUpdate) -> Result<(), RepositoryError> {
        match self.policy {
            UpdatePolicy::Overwrite => {
                self.repository.overwrite_or_insert(update)?;
            }
            UpdatePolicy::Append => self.repository.add_order_status_update(update)?,
        }

        debug!(
            order_id = %update.order_id,
            version = update.version,
            old_status = %update.old_status,
            new_status = %update.new_status,
            "status update persisted"
        );
        Ok(())
    }
}

impl<R> Subscriber<OrderCommand> for OrderEventHandler<R>
where
    R: OrderStatusRepository,
{
    type Error = RepositoryError;

    fn handle(&self, message: &OrderCommand) -> Result<(), RepositoryError> {
        match message {
            OrderCommand::StatusUpdate(update) => self.apply(update),
            OrderCommand::StatusChanged(_) | OrderCommand::Undo(_) => Ok(()),
        }
    }
}
