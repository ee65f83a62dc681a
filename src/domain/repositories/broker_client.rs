//! Broker Client Trait
//!
//! This module defines the `BrokerClient` trait, the single seam between the
//! bot and the brokerage gateway. The scanner, update runner, and execution
//! coordinator all operate against this abstraction.
//!
//! ## Benefits
//! - Decouples scheduling/execution logic from the gateway wire protocol
//! - Enables mocking for tests (scripted fills, missing prices)
//! - Keeps connection state behind one authoritative accessor
//!
//! Order placement returns immediately with a pending [`OrderHandle`]; fill
//! confirmation arrives asynchronously on the broker side and is observed by
//! polling [`order_snapshot`](BrokerClient::order_snapshot), which also
//! drives the client's internal event processing forward. Implementations
//! wrapping a blocking gateway API must off-load calls (`spawn_blocking`) so
//! they never stall the cooperative scheduler.

use crate::domain::entities::bar::DailyBar;
use crate::domain::entities::order::{OrderHandle, OrderSide};
use crate::domain::services::gap_detector::FetchWindow;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Common result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors that can occur during broker operations
#[derive(Debug, Error, Clone)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    ConnectionFailed(String),

    #[error("broker not connected")]
    NotConnected,

    #[error("unknown contract: {0}")]
    UnknownContract(String),

    #[error("order placement failed: {0}")]
    OrderPlacement(String),

    #[error("unknown order id: {0}")]
    UnknownOrder(i64),

    #[error("historical data request failed for {symbol}: {reason}")]
    HistoricalData { symbol: String, reason: String },
}

/// Brokerage gateway capability consumed by the bot.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Establish (or re-establish) the gateway session.
    async fn connect(&self) -> BrokerResult<()>;

    /// Authoritative connection state. There is deliberately no second
    /// bot-level "connected" flag anywhere; every component reads this.
    async fn is_connected(&self) -> bool;

    /// Fetch completed daily bars covering `window`, oldest first.
    async fn fetch_historical_bars(&self, symbol: &str, window: FetchWindow)
        -> BrokerResult<Vec<DailyBar>>;

    /// Fetch the live price for one symbol. `None` when no valid quote is
    /// available (halted, unknown, or the gateway returned NaN).
    async fn fetch_price(&self, symbol: &str) -> BrokerResult<Option<f64>>;

    /// Fetch live prices for many symbols in one gateway round-trip.
    /// Symbols without a valid quote are absent from the map.
    async fn fetch_prices(&self, symbols: &[String]) -> BrokerResult<HashMap<String, f64>>;

    /// Place a market order. Returns a pending handle immediately.
    async fn place_market_order(&self, symbol: &str, quantity: i64, side: OrderSide)
        -> BrokerResult<OrderHandle>;

    /// Place a limit order. Returns a pending handle immediately.
    async fn place_limit_order(
        &self,
        symbol: &str,
        quantity: i64,
        side: OrderSide,
        limit_price: f64,
    ) -> BrokerResult<OrderHandle>;

    /// Current state of a previously placed order. Each call pumps the
    /// client's internal event processing; fills will not be observed
    /// without polling this.
    async fn order_snapshot(&self, order_id: i64) -> BrokerResult<OrderHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_display() {
        let err = BrokerError::OrderPlacement("rejected".to_string());
        assert_eq!(err.to_string(), "order placement failed: rejected");
        assert_eq!(BrokerError::NotConnected.to_string(), "broker not connected");
    }
}
