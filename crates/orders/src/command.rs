use serde::{Deserialize, Serialize};

use orderflow_core::OrderId;

use crate::status::OrderStatus;

/// Command: StatusChanged.
///
/// A proposed transition. Nothing is durable until it has been accepted and published
/// as a [`StatusUpdate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub order_id: OrderId,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub version: u64,
}

impl StatusChanged {
    /// Accept the transition as-is.
    pub fn accept(&self) -> StatusUpdate {
        StatusUpdate {
            order_id: self.order_id,
            old_status: self.old_status,
            new_status: self.new_status,
            version: self.version,
        }
    }
}

/// Event: StatusUpdate.
///
/// An accepted transition, to be broadcast and persisted under `(order_id, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub order_id: OrderId,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub version: u64,
}

/// Command: Undo.
///
/// Discards every history entry of the order with a version above `target_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Undo {
    pub order_id: OrderId,
    pub target_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    StatusChanged(StatusChanged),
    StatusUpdate(StatusUpdate),
    Undo(Undo),
}

impl OrderCommand {
    /// Stable name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OrderCommand::StatusChanged(_) => "order.status.changed",
            OrderCommand::StatusUpdate(_) => "order.status.updated",
            OrderCommand::Undo(_) => "order.status.undo",
        }
    }

    /// The order whose history this command concerns.
    pub fn target_order_id(&self) -> OrderId {
        match self {
            OrderCommand::StatusChanged(c) => c.order_id,
            OrderCommand::StatusUpdate(c) => c.order_id,
            OrderCommand::Undo(c) => c.order_id,
        }
    }
}

impl From<StatusChanged> for OrderCommand {
    fn from(value: StatusChanged) -> Self {
        OrderCommand::StatusChanged(value)
    }
}

impl From<StatusUpdate> for OrderCommand {
    fn from(value: StatusUpdate) -> Self {
        OrderCommand::StatusUpdate(value)
    }
}

impl From<Undo> for OrderCommand {
    fn from(value: Undo) -> Self {
        OrderCommand::Undo(value)
    }
}
