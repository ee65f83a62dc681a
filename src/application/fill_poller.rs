//! Fill Poller
//!
//! Order placement returns a pending handle whose status and average fill
//! price resolve asynchronously on the broker side. This poller drives the
//! broker's event processing forward at a fixed short interval until the
//! order reaches a terminal state or the timeout expires.
//!
//! A return of `0.0` is a sentinel, not an error: the caller records the
//! submitted/limit price instead. The order may still fill later, but the
//! system cannot block indefinitely waiting for confirmation.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::domain::entities::order::OrderStatus;
use crate::domain::repositories::broker_client::BrokerClient;

/// Interval between status polls. Market orders at the open typically fill
/// within a handful of polls; limit orders may never fill.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default window to wait for a fill confirmation.
pub const DEFAULT_FILL_TIMEOUT: Duration = Duration::from_secs(60);

/// Poll `order_id` until it is filled, terminally unfilled, or `timeout`
/// elapses. Returns the realized average fill price, or `0.0` when no fill
/// was confirmed.
pub async fn await_fill(
    broker: &dyn BrokerClient,
    order_id: i64,
    symbol: &str,
    timeout: Duration,
) -> f64 {
    let mut elapsed = Duration::ZERO;

    while elapsed < timeout {
        sleep(POLL_INTERVAL).await;
        elapsed += POLL_INTERVAL;

        let snapshot = match broker.order_snapshot(order_id).await {
            Ok(s) => s,
            Err(e) => {
                warn!("[{}] fill poll failed for order {}: {}", symbol, order_id, e);
                return 0.0;
            }
        };

        debug!(
            "[{}] fill poll {}s: status={} avg_fill_price={}",
            symbol,
            elapsed.as_secs(),
            snapshot.status,
            snapshot.avg_fill_price
        );

        if snapshot.status == OrderStatus::Filled && snapshot.avg_fill_price > 0.0 {
            info!(
                "[{}] order {} filled after {}s @ avg fill {:.4}",
                symbol,
                order_id,
                elapsed.as_secs(),
                snapshot.avg_fill_price
            );
            return snapshot.avg_fill_price;
        }

        if snapshot.status.is_terminal_without_fill() {
            warn!(
                "[{}] order {} ended with status={} after {}s, no fill price available",
                symbol,
                order_id,
                snapshot.status,
                elapsed.as_secs()
            );
            return 0.0;
        }
    }

    warn!(
        "[{}] fill not confirmed within {}s for order {}, returning 0.0",
        symbol,
        timeout.as_secs(),
        order_id
    );
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::OrderSide;
    use crate::infrastructure::paper_broker::PaperBroker;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_fill_on_third_poll() {
        let broker = PaperBroker::new(3);
        broker.connect().await.unwrap();
        broker.set_price("XYZ", 101.5).await;

        let handle = broker
            .place_market_order("XYZ", 10, OrderSide::Buy)
            .await
            .unwrap();

        let started = Instant::now();
        let price = await_fill(&broker, handle.order_id, "XYZ", Duration::from_secs(60)).await;

        assert_eq!(price, 101.5);
        // Three poll intervals, give or take scheduling slop.
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_zero() {
        // Fill would arrive on the 100th poll; timeout is 5s.
        let broker = PaperBroker::new(100);
        broker.connect().await.unwrap();
        broker.set_price("XYZ", 101.5).await;

        let handle = broker
            .place_market_order("XYZ", 10, OrderSide::Buy)
            .await
            .unwrap();

        let price = await_fill(&broker, handle.order_id, "XYZ", Duration::from_secs(5)).await;
        assert_eq!(price, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_order_ends_poll_early() {
        let broker = PaperBroker::new(100);
        broker.connect().await.unwrap();
        broker.set_price("XYZ", 101.5).await;

        let handle = broker
            .place_limit_order("XYZ", 10, OrderSide::Buy, 100.0)
            .await
            .unwrap();
        broker.cancel_order(handle.order_id).await.unwrap();

        let started = Instant::now();
        let price = await_fill(&broker, handle.order_id, "XYZ", Duration::from_secs(60)).await;

        assert_eq!(price, 0.0);
        // Ends on the first poll observing the cancellation, not at timeout.
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_order_returns_zero() {
        let broker = PaperBroker::new(1);
        broker.connect().await.unwrap();

        let price = await_fill(&broker, 999, "XYZ", Duration::from_secs(5)).await;
        assert_eq!(price, 0.0);
    }
}
