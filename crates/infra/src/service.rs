//! External operation surface: submit status changes and undos, query history.

use std::sync::Arc;

use tracing::info;

use orderflow_core::OrderId;
use orderflow_events::{EventBus, InMemoryEventBus, SubscriptionId};
use orderflow_orders::{OrderCommand, OrderStatus, StatusChanged, StatusUpdateRecord, Undo};

use crate::command_handler::{CommandOutcome, OrderCommandHandler};
use crate::config::{OrderflowConfig, StorageBackend};
use crate::event_handler::{OrderEventHandler, UpdatePolicy};
use crate::repository::{
    InMemoryOrderStatusRepository, OrderStatusRepository, PostgresOrderStatusRepository,
    RepositoryError, SqliteOrderStatusRepository,
};

pub type SharedRepository = Arc<dyn OrderStatusRepository>;
pub type OrderBus = InMemoryEventBus<OrderCommand, RepositoryError>;

/// Open the repository named by `config`, schema included.
pub fn open_repository(config: &OrderflowConfig) -> Result<SharedRepository, RepositoryError> {
    let repository: SharedRepository = match &config.storage {
        StorageBackend::InMemory => Arc::new(InMemoryOrderStatusRepository::new()),
        StorageBackend::Sqlite { url } => {
            Arc::new(SqliteOrderStatusRepository::connect(url, config.max_connections)?)
        }
        StorageBackend::Postgres { url } => {
            Arc::new(PostgresOrderStatusRepository::connect(url, config.max_connections)?)
        }
    };
    info!(backend = config.storage.name(), "order status repository opened");
    Ok(repository)
}

/// Fully wired order status pipeline.
///
/// Owns one broker with the persistence subscriber registered first. Further
/// subscribers (audit, cache invalidation, ...) can be attached through
/// [`broker()`](Self::broker) and run after persistence.
pub struct OrderStatusService {
    commands: OrderCommandHandler<SharedRepository, Arc<OrderBus>>,
    persistence: SubscriptionId,
}

impl OrderStatusService {
    pub fn new(repository: SharedRepository, policy: UpdatePolicy) -> Self {
        let broker: Arc<OrderBus> = Arc::new(InMemoryEventBus::new());
        let (_, persistence) = OrderEventHandler::register(repository.clone(), policy, &*broker);

        Self {
            commands: OrderCommandHandler::new(repository, broker),
            persistence,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryOrderStatusRepository::new()),
            UpdatePolicy::default(),
        )
    }

    pub fn from_config(config: &OrderflowConfig) -> Result<Self, RepositoryError> {
        let repository = open_repository(config)?;
        Ok(Self::new(repository, config.update_policy))
    }

    pub fn repository(&self) -> &SharedRepository {
        self.commands.repository()
    }

    pub fn broker(&self) -> &Arc<OrderBus> {
        self.commands.broker()
    }

    /// Subscription of the persistence handler on [`broker()`](Self::broker).
    pub fn persistence_subscription(&self) -> SubscriptionId {
        self.persistence
    }

    /// Submit any command through the command handler.
    pub fn submit(&self, command: OrderCommand) -> Result<CommandOutcome, RepositoryError> {
        self.commands.handle(command)
    }

    pub fn submit_status_change(
        &self,
        order_id: OrderId,
        old_status: OrderStatus,
        new_status: OrderStatus,
        version: u64,
    ) -> Result<(), RepositoryError> {
        self.submit(OrderCommand::StatusChanged(StatusChanged {
            order_id,
            old_status,
            new_status,
            version,
        }))?;
        Ok(())
    }

    /// Returns how many history entries were discarded.
    pub fn submit_undo(&self, order_id: OrderId, target_version: u64) -> Result<u64, RepositoryError> {
        match self.submit(OrderCommand::Undo(Undo {
            order_id,
            target_version,
        }))? {
            CommandOutcome::Reverted { removed } => Ok(removed),
            CommandOutcome::Published | CommandOutcome::Ignored => Ok(0),
        }
    }

    pub fn query_history(&self, order_id: OrderId) -> Result<Vec<StatusUpdateRecord>, RepositoryError> {
        self.repository().get_order_status_updates(order_id)
    }

    /// Version a caller should use for the order's next transition.
    ///
    /// Advisory only: two callers asking concurrently get the same answer, and the
    /// loser's write fails (`Append`) or overwrites (`Overwrite`). An order already at
    /// `u64::MAX` has no next version and gives `InvalidVersion`.
    pub fn next_version(&self, order_id: OrderId) -> Result<u64, RepositoryError> {
        match self.repository().latest_version(order_id)? {
            None => Ok(1),
            Some(latest) => latest
                .checked_add(1)
                .ok_or(RepositoryError::InvalidVersion(latest)),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.broker().subscriber_count()
    }
}
