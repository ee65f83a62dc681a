//! End-to-end tests for the execution coordinator: pricing, fill
//! recording, phase ordering, and exit safety against a scripted broker.

use std::sync::Arc;

use sepa_bot::application::events::Event;
use sepa_bot::application::execution::{run_eod_execution, run_order_execution};
use sepa_bot::context::BotContext;
use sepa_bot::domain::repositories::broker_client::BrokerClient;
use sepa_bot::domain::services::trigger_clock::today_exchange;
use sepa_bot::infrastructure::paper_broker::PaperBroker;
use sepa_bot::persistence::config_repository::{ConfigRepository, ConfigUpdate};
use sepa_bot::persistence::init_database;
use sepa_bot::persistence::models::{CreatePosition, CreateTrade, ScanResultRecord};
use sepa_bot::persistence::repository::{PositionRepository, TradeRepository};
use sepa_bot::persistence::scan_repository::ScanRepository;

async fn trading_ctx(fill_polls: u32) -> (Arc<BotContext>, Arc<PaperBroker>) {
    // Establish the pool on real time: sqlite connections are set up on
    // blocking threads, and under the test's paused clock the pool's
    // acquire timeout auto-advances and fires before the connection lands.
    tokio::time::resume();
    let pool = init_database("sqlite::memory:").await.unwrap();
    let broker = Arc::new(PaperBroker::new(fill_polls));
    broker.connect().await.unwrap();
    let ctx = BotContext::new(pool, broker.clone());

    ConfigRepository::new(ctx.db.clone())
        .update(ConfigUpdate {
            auto_execute: Some(true),
            position_size_usd: Some(10_000.0),
            stop_loss_pct: Some(8.0),
            limit_order_premium_pct: Some(1.0),
            ..Default::default()
        })
        .await
        .unwrap();

    // Re-freeze the clock so the fill-polling logic under test runs on
    // virtual time, as the `start_paused = true` tests expect.
    tokio::time::pause();
    (ctx, broker)
}

fn qualified_row(symbol: &str, prev_close: f64) -> ScanResultRecord {
    ScanResultRecord {
        scan_date: today_exchange(),
        symbol: symbol.to_string(),
        price: prev_close,
        week_52_high: prev_close * 1.02,
        week_52_low: prev_close * 0.6,
        ma_50: prev_close * 0.95,
        ma_150: prev_close * 0.9,
        ma_200: prev_close * 0.85,
        ma_200_1m_ago: prev_close * 0.83,
        volume: 2_000_000,
        avg_volume_50: 1_000_000,
        criteria_1: true,
        criteria_2: true,
        criteria_3: true,
        criteria_4: true,
        criteria_5: true,
        criteria_6: true,
        criteria_7: true,
        criteria_8: true,
        qualified: true,
        action: "BUY_AT_OPEN".to_string(),
        override_flag: false,
        entry_method: None,
        in_portfolio: false,
        ab_group: None,
        eod_buy_pending: false,
        sod_skip_reason: None,
    }
}

/// Open a position flagged for exit, with its backing trade.
async fn open_pending_exit(ctx: &BotContext, symbol: &str, entry_price: f64, quantity: i64) {
    let trades = TradeRepository::new(ctx.db.clone());
    let positions = PositionRepository::new(ctx.db.clone());
    let cost_basis = entry_price * quantity as f64;

    let trade_id = trades
        .create(CreateTrade {
            symbol: symbol.to_string(),
            entry_date: today_exchange(),
            entry_price,
            submitted_price: entry_price,
            quantity,
            cost_basis,
        })
        .await
        .unwrap();
    positions
        .save(CreatePosition {
            symbol: symbol.to_string(),
            entry_date: today_exchange(),
            entry_price,
            submitted_price: entry_price,
            quantity,
            stop_loss: entry_price * 0.92,
            cost_basis,
            trade_id,
        })
        .await
        .unwrap();
    positions
        .flag_pending_exit(symbol, "STOP_LOSS")
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn limit_premium_buy_records_full_position() {
    let (ctx, _broker) = trading_ctx(2).await;

    ConfigRepository::new(ctx.db.clone())
        .update(ConfigUpdate {
            default_entry_method: Some("limit_premium".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    ScanRepository::new(ctx.db.clone())
        .upsert_result(&qualified_row("XYZ", 50.0))
        .await
        .unwrap();

    let summary = run_order_execution(&ctx).await.unwrap();
    assert_eq!(summary.status, "completed");
    assert_eq!(summary.buys, 1);
    assert_eq!(summary.exits, 0);

    // prev_close 50.00 + 1% premium = 50.50; 10k sizes to 198 shares with
    // an 8% stop at 46.46. The paper limit order fills at the limit price.
    let pos = PositionRepository::new(ctx.db.clone())
        .get("XYZ")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pos.quantity, 198);
    assert_eq!(pos.entry_price, 50.50);
    assert_eq!(pos.submitted_price, Some(50.50));
    assert_eq!(pos.stop_loss, 46.46);
    assert_eq!(pos.status, "OPEN");

    let trades = TradeRepository::new(ctx.db.clone())
        .list(Some("OPEN"), 10)
        .await
        .unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].symbol, "XYZ");

    // The buy is reflected on the scan row immediately.
    let scans = ScanRepository::new(ctx.db.clone()).latest_results().await.unwrap();
    assert!(scans[0].in_portfolio);
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_fill_falls_back_to_submitted_price() {
    // Fill would only arrive after far more polls than the timeout allows.
    let (ctx, _broker) = trading_ctx(10_000).await;

    ScanRepository::new(ctx.db.clone())
        .upsert_result(&qualified_row("SLOW", 50.0))
        .await
        .unwrap();

    let summary = run_order_execution(&ctx).await.unwrap();
    assert_eq!(summary.buys, 1);

    // No confirmation inside the timeout: the submitted (prev_close)
    // price is recorded as the entry price.
    let pos = PositionRepository::new(ctx.db.clone())
        .get("SLOW")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pos.entry_price, 50.0);
    assert_eq!(pos.submitted_price, Some(50.0));
}

#[tokio::test(start_paused = true)]
async fn exits_run_and_broadcast_before_buys() {
    let (ctx, broker) = trading_ctx(1).await;
    let mut events = ctx.events.subscribe();

    ScanRepository::new(ctx.db.clone())
        .upsert_result(&qualified_row("BUYME", 50.0))
        .await
        .unwrap();
    open_pending_exit(&ctx, "SELLME", 40.0, 100).await;
    broker.set_price("SELLME", 44.0).await;

    let summary = run_order_execution(&ctx).await.unwrap();
    assert_eq!(summary.exits, 1);
    assert_eq!(summary.buys, 1);

    // Exit batch is always broadcast before the buy batch.
    let first = events.recv().await.unwrap();
    match first {
        Event::OrdersExecuted { order_type, orders, .. } => {
            assert_eq!(order_type, "exits");
            assert_eq!(orders.len(), 1);
            assert_eq!(orders[0]["symbol"], "SELLME");
        }
        other => panic!("expected exits first, got {:?}", other),
    }
    let second = events.recv().await.unwrap();
    match second {
        Event::OrdersExecuted { order_type, .. } => assert_eq!(order_type, "buys"),
        other => panic!("expected buys second, got {:?}", other),
    }

    // The exit closed both the position and the trade, with P&L from the
    // realized fill: 100 shares, 40 -> 44 is +400 on a 4000 basis.
    let pos = PositionRepository::new(ctx.db.clone())
        .get("SELLME")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pos.status, "CLOSED");
    let closed = TradeRepository::new(ctx.db.clone())
        .list(Some("CLOSED"), 10)
        .await
        .unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].exit_price, Some(44.0));
    assert_eq!(closed[0].pnl, Some(400.0));
    assert_eq!(closed[0].pnl_pct, Some(10.0));
    // Stop loss is frozen onto the closed trade row.
    assert_eq!(closed[0].stop_loss, Some(40.0 * 0.92));
}

#[tokio::test(start_paused = true)]
async fn exit_without_live_price_is_skipped_and_stays_open() {
    let (ctx, broker) = trading_ctx(1).await;

    open_pending_exit(&ctx, "NOPRICE", 40.0, 100).await;
    // Another symbol has a price, but NOPRICE does not.
    broker.set_price("OTHER", 10.0).await;

    let summary = run_order_execution(&ctx).await.unwrap();
    assert_eq!(summary.exits, 0);
    assert_eq!(summary.status, "completed");

    // A sell must never use a stale price: the position is untouched and
    // still flagged, ready for the next cycle.
    let pos = PositionRepository::new(ctx.db.clone())
        .get("NOPRICE")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pos.status, "OPEN");
    assert!(pos.pending_exit);
}

#[tokio::test(start_paused = true)]
async fn auto_execute_off_is_a_complete_noop() {
    let (ctx, broker) = trading_ctx(1).await;
    ConfigRepository::new(ctx.db.clone())
        .update(ConfigUpdate {
            auto_execute: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();

    ScanRepository::new(ctx.db.clone())
        .upsert_result(&qualified_row("XYZ", 50.0))
        .await
        .unwrap();
    open_pending_exit(&ctx, "SELLME", 40.0, 100).await;
    broker.set_price("SELLME", 44.0).await;

    let summary = run_order_execution(&ctx).await.unwrap();
    assert_eq!(summary.status, "skipped");
    assert_eq!(summary.buys, 0);
    assert_eq!(summary.exits, 0);

    assert!(PositionRepository::new(ctx.db.clone())
        .get("XYZ")
        .await
        .unwrap()
        .is_none());
    let sellme = PositionRepository::new(ctx.db.clone())
        .get("SELLME")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sellme.status, "OPEN");
}

#[tokio::test(start_paused = true)]
async fn buys_stop_at_the_position_ceiling() {
    let (ctx, _broker) = trading_ctx(1).await;
    ConfigRepository::new(ctx.db.clone())
        .update(ConfigUpdate {
            max_positions: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();

    let scans = ScanRepository::new(ctx.db.clone());
    scans.upsert_result(&qualified_row("AAA", 50.0)).await.unwrap();
    scans.upsert_result(&qualified_row("BBB", 60.0)).await.unwrap();

    let summary = run_order_execution(&ctx).await.unwrap();
    assert_eq!(summary.buys, 1);

    let open = PositionRepository::new(ctx.db.clone()).open_positions().await.unwrap();
    assert_eq!(open.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn eod_pass_buys_group_a_cohort_at_market() {
    let (ctx, broker) = trading_ctx(1).await;
    ConfigRepository::new(ctx.db.clone())
        .update(ConfigUpdate {
            ab_test_enabled: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();

    let mut row = qualified_row("GROUPA", 50.0);
    row.ab_group = Some("A".to_string());
    row.eod_buy_pending = true;
    ScanRepository::new(ctx.db.clone()).upsert_result(&row).await.unwrap();
    broker.set_price("GROUPA", 52.0).await;

    let summary = run_eod_execution(&ctx).await.unwrap();
    assert_eq!(summary.status, "completed");
    assert_eq!(summary.buys, 1);
    assert_eq!(summary.exits, 0);

    // Bought at the live market price, and the pending flag cleared.
    let pos = PositionRepository::new(ctx.db.clone())
        .get("GROUPA")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pos.entry_price, 52.0);
    assert!(ScanRepository::new(ctx.db.clone())
        .eod_buy_candidates()
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn eod_pass_requires_ab_test_enabled() {
    let (ctx, broker) = trading_ctx(1).await;

    let mut row = qualified_row("GROUPA", 50.0);
    row.ab_group = Some("A".to_string());
    row.eod_buy_pending = true;
    ScanRepository::new(ctx.db.clone()).upsert_result(&row).await.unwrap();
    broker.set_price("GROUPA", 52.0).await;

    let summary = run_eod_execution(&ctx).await.unwrap();
    assert_eq!(summary.status, "skipped");
    assert!(PositionRepository::new(ctx.db.clone())
        .get("GROUPA")
        .await
        .unwrap()
        .is_none());
}
