use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Broker-reported order lifecycle states.
///
/// Order placement returns immediately with a pending handle; the status and
/// average fill price are updated asynchronously on the broker side and must
/// be polled (see `application::fill_poller`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingSubmit,
    Submitted,
    Filled,
    Cancelled,
    ApiCancelled,
    Inactive,
    Error,
}

impl OrderStatus {
    /// Cancellation-class states end fill polling immediately: the order
    /// will never produce a fill confirmation.
    pub fn is_terminal_without_fill(&self) -> bool {
        matches!(
            self,
            OrderStatus::Cancelled
                | OrderStatus::ApiCancelled
                | OrderStatus::Inactive
                | OrderStatus::Error
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::PendingSubmit => write!(f, "PendingSubmit"),
            OrderStatus::Submitted => write!(f, "Submitted"),
            OrderStatus::Filled => write!(f, "Filled"),
            OrderStatus::Cancelled => write!(f, "Cancelled"),
            OrderStatus::ApiCancelled => write!(f, "ApiCancelled"),
            OrderStatus::Inactive => write!(f, "Inactive"),
            OrderStatus::Error => write!(f, "Error"),
        }
    }
}

/// Ephemeral snapshot of a broker order.
///
/// Returned by order placement (pending) and by each subsequent status poll.
/// Never persisted directly: the realized `avg_fill_price` is folded into the
/// trade/position records once polling concludes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderHandle {
    pub order_id: i64,
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub avg_fill_price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_side_display() {
        assert_eq!(OrderSide::Buy.to_string(), "BUY");
        assert_eq!(OrderSide::Sell.to_string(), "SELL");
    }

    #[test]
    fn test_terminal_without_fill() {
        assert!(OrderStatus::Cancelled.is_terminal_without_fill());
        assert!(OrderStatus::ApiCancelled.is_terminal_without_fill());
        assert!(OrderStatus::Inactive.is_terminal_without_fill());
        assert!(OrderStatus::Error.is_terminal_without_fill());
        assert!(!OrderStatus::Submitted.is_terminal_without_fill());
        assert!(!OrderStatus::Filled.is_terminal_without_fill());
    }
}
