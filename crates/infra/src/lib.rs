//! Infrastructure layer: storage backends, command/event handlers, wiring, config.

pub mod command_handler;
pub mod config;
pub mod event_handler;
pub mod repository;
pub mod service;


pub use command_handler::{CommandOutcome, OrderCommandHandler};
pub use config::{ConfigError, OrderflowConfig, StorageBackend};
pub use event_handler::{OrderEventHandler, UpdatePolicy};
pub use repository::{
    InMemoryOrderStatusRepository, OrderStatusRepository, PostgresOrderStatusRepository,
    RepositoryError, SqliteOrderStatusRepository,
};
pub use service::{OrderBus, OrderStatusService, SharedRepository, open_repository};
