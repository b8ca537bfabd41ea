use core::str::FromStr;

use serde::{Deserialize, Serialize};

use orderflow_core::DomainError;

/// Order status.
///
/// The lifecycle usually reads `Pending -> Processed -> Shipped -> Delivered`, but no
/// ordering is enforced: any `old -> new` pair is recorded as a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Processed,
    Shipped,
    Delivered,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Processed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ];

    /// Stable text form, as stored in the `OldStatus` / `NewStatus` columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Processed => "Processed",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown order status '{s}'")))
    }
}
