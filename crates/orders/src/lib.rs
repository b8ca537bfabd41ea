//! Order status history domain module.
//!
//! Statuses, the closed command set, and the persisted history record. Pure values:
//! no IO, no storage, no broker wiring.

pub mod command;
pub mod record;
pub mod status;

pub use command::{OrderCommand, StatusChanged, StatusUpdate, Undo};
pub use record::StatusUpdateRecord;
pub use status::OrderStatus;
