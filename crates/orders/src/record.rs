use serde::{Deserialize, Serialize};

use orderflow_core::OrderId;

use crate::command::StatusUpdate;
use crate::status::OrderStatus;

/// One persisted entry of an order's status history.
///
/// Keyed by `(order_id, version)`. Versions come from the caller; the store never
/// assigns them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdateRecord {
    pub order_id: OrderId,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub version: u64,
}

impl StatusUpdateRecord {
    pub fn key(&self) -> (OrderId, u64) {
        (self.order_id, self.version)
    }
}

impl From<&StatusUpdate> for StatusUpdateRecord {
    fn from(value: &StatusUpdate) -> Self {
        Self {
            order_id: value.order_id,
            old_status: value.old_status,
            new_status: value.new_status,
            version: value.version,
        }
    }
}

impl From<StatusUpdate> for StatusUpdateRecord {
    fn from(value: StatusUpdate) -> Self {
        Self::from(&value)
    }
}
