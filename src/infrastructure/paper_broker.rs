//! Paper Broker
//!
//! In-process simulated brokerage gateway implementing [`BrokerClient`].
//! Used for paper trading and tests; a real gateway client implements the
//! same trait and swaps in without touching the rest of the system.
//!
//! Fill confirmation is deliberately asynchronous, mirroring a real
//! gateway: order placement returns a pending handle, and the order only
//! transitions to `Filled` after a configurable number of status polls.
//! This exercises the same poll-driven protocol the fill poller runs
//! against production brokers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::entities::bar::DailyBar;
use crate::domain::entities::order::{OrderHandle, OrderSide, OrderStatus};
use crate::domain::repositories::broker_client::{BrokerClient, BrokerError, BrokerResult};
use crate::domain::services::gap_detector::FetchWindow;
use crate::domain::services::trigger_clock::{last_completed_trading_day, today_exchange};

struct PaperOrder {
    handle: OrderHandle,
    fill_price: f64,
    quantity: i64,
    polls_remaining: u32,
}

/// Simulated broker with deterministic bar synthesis and delayed fills.
pub struct PaperBroker {
    connected: AtomicBool,
    /// Snapshot polls before a submitted order reports `Filled`.
    fill_after_polls: u32,
    prices: RwLock<HashMap<String, f64>>,
    orders: RwLock<HashMap<i64, PaperOrder>>,
    next_order_id: AtomicI64,
}

impl PaperBroker {
    pub fn new(fill_after_polls: u32) -> Self {
        Self {
            connected: AtomicBool::new(false),
            fill_after_polls,
            prices: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            next_order_id: AtomicI64::new(1),
        }
    }

    /// Seed or update a live quote.
    pub async fn set_price(&self, symbol: &str, price: f64) {
        self.prices.write().await.insert(symbol.to_uppercase(), price);
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Cancel a pending order. Subsequent snapshots report `Cancelled`.
    pub async fn cancel_order(&self, order_id: i64) -> BrokerResult<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or(BrokerError::UnknownOrder(order_id))?;
        if order.handle.status == OrderStatus::Submitted {
            order.handle.status = OrderStatus::Cancelled;
        }
        Ok(())
    }

    async fn place(&self, symbol: &str, quantity: i64, fill_price: f64) -> OrderHandle {
        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        let handle = OrderHandle {
            order_id,
            status: OrderStatus::Submitted,
            filled_quantity: 0.0,
            avg_fill_price: 0.0,
        };
        self.orders.write().await.insert(
            order_id,
            PaperOrder {
                handle: handle.clone(),
                fill_price,
                quantity,
                polls_remaining: self.fill_after_polls,
            },
        );
        info!("Paper order {} submitted: {} x{}", order_id, symbol, quantity);
        handle
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn connect(&self) -> BrokerResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn fetch_historical_bars(
        &self,
        symbol: &str,
        window: FetchWindow,
    ) -> BrokerResult<Vec<DailyBar>> {
        if !self.is_connected().await {
            return Err(BrokerError::NotConnected);
        }

        let end = last_completed_trading_day(today_exchange());
        let start = end - Duration::days(window.num_days() - 1);
        Ok(synthesize_bars(symbol, start, end))
    }

    async fn fetch_price(&self, symbol: &str) -> BrokerResult<Option<f64>> {
        if !self.is_connected().await {
            return Err(BrokerError::NotConnected);
        }
        Ok(self.prices.read().await.get(&symbol.to_uppercase()).copied())
    }

    async fn fetch_prices(&self, symbols: &[String]) -> BrokerResult<HashMap<String, f64>> {
        if !self.is_connected().await {
            return Err(BrokerError::NotConnected);
        }
        let prices = self.prices.read().await;
        Ok(symbols
            .iter()
            .filter_map(|s| {
                prices
                    .get(&s.to_uppercase())
                    .map(|p| (s.to_uppercase(), *p))
            })
            .collect())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        quantity: i64,
        side: OrderSide,
    ) -> BrokerResult<OrderHandle> {
        if !self.is_connected().await {
            return Err(BrokerError::NotConnected);
        }
        let fill_price = self
            .fetch_price(symbol)
            .await?
            .ok_or_else(|| BrokerError::UnknownContract(symbol.to_string()))?;
        info!("Paper market {} {} x{}", side, symbol, quantity);
        Ok(self.place(symbol, quantity, fill_price).await)
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        quantity: i64,
        side: OrderSide,
        limit_price: f64,
    ) -> BrokerResult<OrderHandle> {
        if !self.is_connected().await {
            return Err(BrokerError::NotConnected);
        }
        if limit_price <= 0.0 {
            return Err(BrokerError::OrderPlacement(format!(
                "invalid limit price {} for {}",
                limit_price, symbol
            )));
        }
        info!("Paper limit {} {} x{} @ {:.2}", side, symbol, quantity, limit_price);
        Ok(self.place(symbol, quantity, limit_price).await)
    }

    async fn order_snapshot(&self, order_id: i64) -> BrokerResult<OrderHandle> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or(BrokerError::UnknownOrder(order_id))?;

        if order.handle.status == OrderStatus::Submitted {
            if order.polls_remaining > 0 {
                order.polls_remaining -= 1;
            }
            if order.polls_remaining == 0 {
                order.handle.status = OrderStatus::Filled;
                order.handle.avg_fill_price = order.fill_price;
                order.handle.filled_quantity = order.quantity as f64;
            }
        }

        Ok(order.handle.clone())
    }
}

/// Deterministic synthetic daily bars: a gentle uptrend whose base price is
/// derived from the symbol, weekdays only, oldest first.
fn synthesize_bars(symbol: &str, start: NaiveDate, end: NaiveDate) -> Vec<DailyBar> {
    let base = 20.0 + (symbol.bytes().map(u64::from).sum::<u64>() % 80) as f64;
    let mut bars = Vec::new();
    let mut date = start;
    let mut i = 0u32;
    while date <= end {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            let close = base * (1.0 + 0.0015 * i as f64);
            bars.push(DailyBar::new(
                date,
                close * 0.995,
                close * 1.01,
                close * 0.99,
                close,
                1_000_000 + (i as i64 % 7) * 100_000,
            ));
            i += 1;
        }
        date += Duration::days(1);
    }
    bars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requires_connection() {
        let broker = PaperBroker::new(1);
        assert!(!broker.is_connected().await);
        assert!(matches!(
            broker.fetch_price("XYZ").await,
            Err(BrokerError::NotConnected)
        ));

        broker.connect().await.unwrap();
        assert!(broker.is_connected().await);
        assert_eq!(broker.fetch_price("XYZ").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fill_arrives_after_polls() {
        let broker = PaperBroker::new(3);
        broker.connect().await.unwrap();
        broker.set_price("XYZ", 101.5).await;

        let handle = broker
            .place_market_order("XYZ", 100, OrderSide::Buy)
            .await
            .unwrap();
        assert_eq!(handle.status, OrderStatus::Submitted);
        assert_eq!(handle.avg_fill_price, 0.0);

        // Still pending for the first two polls.
        for _ in 0..2 {
            let snap = broker.order_snapshot(handle.order_id).await.unwrap();
            assert_eq!(snap.status, OrderStatus::Submitted);
        }

        let snap = broker.order_snapshot(handle.order_id).await.unwrap();
        assert_eq!(snap.status, OrderStatus::Filled);
        assert_eq!(snap.avg_fill_price, 101.5);
        assert_eq!(snap.filled_quantity, 100.0);
    }

    #[tokio::test]
    async fn test_batch_prices_skip_unknown_symbols() {
        let broker = PaperBroker::new(1);
        broker.connect().await.unwrap();
        broker.set_price("AAA", 10.0).await;

        let prices = broker
            .fetch_prices(&["AAA".to_string(), "BBB".to_string()])
            .await
            .unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices["AAA"], 10.0);
    }

    #[test]
    fn test_synthetic_bars_skip_weekends() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 19).unwrap();
        let bars = synthesize_bars("XYZ", start, end);
        assert_eq!(bars.len(), 10);
        assert!(bars
            .iter()
            .all(|b| !matches!(b.trading_date.weekday(), Weekday::Sat | Weekday::Sun)));
        // Deterministic across calls.
        assert_eq!(bars, synthesize_bars("XYZ", start, end));
    }
}
