//! Command entry point (application-level orchestration).
//!
//! ```text
//! StatusChanged ──accept──▶ StatusUpdate ──publish──▶ EventBus ──▶ subscribers ──▶ repository
//! Undo ─────────────────────────────────────────────────────────────────────────▶ repository
//! ```
//!
//! A status change never touches the repository from here: persistence is one of
//! possibly many reactions to the published update. Undo is maintenance, not a domain
//! event, so it goes straight to the repository and nothing is broadcast.

use tracing::{debug, info};

use orderflow_events::EventBus;
use orderflow_orders::OrderCommand;

use crate::repository::{OrderStatusRepository, RepositoryError};

/// What handling a command did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// A `StatusUpdate` was delivered to every subscriber.
    Published,
    /// History above the target version was deleted.
    Reverted { removed: u64 },
    /// The command is not something callers submit; nothing happened.
    Ignored,
}

/// Translates caller intent into broker and repository actions.
///
/// Errors are the repository's, passed through unchanged, whether they came from the
/// revert itself or from a subscriber during publish.
#[derive(Debug)]
pub struct OrderCommandHandler<R, B> {
    repository: R,
    broker: B,
}

impl<R, B> OrderCommandHandler<R, B> {
    pub fn new(repository: R, broker: B) -> Self {
        Self { repository, broker }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }
}

impl<R, B> OrderCommandHandler<R, B>
where
    R: OrderStatusRepository,
    B: EventBus<OrderCommand, Error = RepositoryError>,
{
    pub fn handle(&self, command: OrderCommand) -> Result<CommandOutcome, RepositoryError> {
        match command {
            OrderCommand::StatusChanged(changed) => {
                let update = changed.accept();
                debug!(
                    order_id = %update.order_id,
                    version = update.version,
                    old_status = %update.old_status,
                    new_status = %update.new_status,
                    "publishing accepted status update"
                );
                self.broker.publish(OrderCommand::StatusUpdate(update))?;
                Ok(CommandOutcome::Published)
            }
            OrderCommand::Undo(undo) => {
                let removed = self
                    .repository
                    .revert_to_version(undo.order_id, undo.target_version)?;
                info!(
                    order_id = %undo.order_id,
                    target_version = undo.target_version,
                    removed,
                    "order history reverted"
                );
                Ok(CommandOutcome::Reverted { removed })
            }
            other @ OrderCommand::StatusUpdate(_) => {
                debug!(
                    order_id = %other.target_order_id(),
                    kind = other.kind(),
                    "command ignored by handler"
                );
                Ok(CommandOutcome::Ignored)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use orderflow_core::OrderId;
    use orderflow_events::{InMemoryEventBus, subscriber_fn};
    use orderflow_orders::{OrderStatus, StatusChanged, Undo};

    use super::*;
    use crate::repository::InMemoryOrderStatusRepository;
    use crate::repository::contract::{seed_full_lifecycle, update};

    type Bus = Arc<InMemoryEventBus<OrderCommand, RepositoryError>>;

    fn setup() -> (
        OrderCommandHandler<Arc<InMemoryOrderStatusRepository>, Bus>,
        Arc<Mutex<Vec<OrderCommand>>>,
    ) {
        let repo = Arc::new(InMemoryOrderStatusRepository::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let seen: Arc<Mutex<Vec<OrderCommand>>> = Arc::default();

        let sink = Arc::clone(&seen);
        bus.subscribe(subscriber_fn(move |cmd: &OrderCommand| {
            sink.lock().unwrap().push(cmd.clone());
            Ok(())
        }));

        (OrderCommandHandler::new(repo, bus), seen)
    }

    #[test]
    fn status_change_is_published_as_an_update_without_touching_storage() {
        let (handler, seen) = setup();
        let order_id = OrderId::new();

        let outcome = handler
            .handle(OrderCommand::StatusChanged(StatusChanged {
                order_id,
                old_status: OrderStatus::Pending,
                new_status: OrderStatus::Processed,
                version: 1,
            }))
            .unwrap();

        assert_eq!(outcome, CommandOutcome::Published);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![OrderCommand::StatusUpdate(update(
                order_id,
                OrderStatus::Pending,
                OrderStatus::Processed,
                1
            ))]
        );
        // Only a recorder is subscribed, so nothing was persisted.
        assert!(
            handler
                .repository()
                .get_order_status_updates(order_id)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn undo_reverts_directly_and_broadcasts_nothing() {
        let (handler, seen) = setup();
        let order_id = OrderId::new();
        seed_full_lifecycle(handler.repository(), order_id);

        let outcome = handler
            .handle(OrderCommand::Undo(Undo {
                order_id,
                target_version: 1,
            }))
            .unwrap();

        assert_eq!(outcome, CommandOutcome::Reverted { removed: 2 });
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(
            handler
                .repository()
                .get_order_status_updates(order_id)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn raw_status_update_is_ignored() {
        let (handler, seen) = setup();
        let order_id = OrderId::new();

        let outcome = handler
            .handle(OrderCommand::StatusUpdate(update(
                order_id,
                OrderStatus::Pending,
                OrderStatus::Processed,
                1,
            )))
            .unwrap();

        assert_eq!(outcome, CommandOutcome::Ignored);
        assert!(seen.lock().unwrap().is_empty());
        assert!(
            handler
                .repository()
                .get_order_status_updates(order_id)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn subscriber_failure_reaches_the_caller_unchanged() {
        let repo = Arc::new(InMemoryOrderStatusRepository::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        bus.subscribe(subscriber_fn(|_: &OrderCommand| {
            Err(RepositoryError::StorageUnavailable("disk on fire".to_string()))
        }));
        let handler = OrderCommandHandler::new(repo, bus);

        let err = handler
            .handle(OrderCommand::StatusChanged(StatusChanged {
                order_id: OrderId::new(),
                old_status: OrderStatus::Pending,
                new_status: OrderStatus::Processed,
                version: 1,
            }))
            .unwrap_err();

        assert!(matches!(err, RepositoryError::StorageUnavailable(msg) if msg == "disk on fire"));
    }
}
