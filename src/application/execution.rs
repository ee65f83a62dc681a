//! Execution Coordinator
//!
//! One-shot routine resolving qualified buy candidates and pending-exit
//! positions into priced broker orders. Exits always run before buys,
//! freeing position capacity before new capital is committed.
//!
//! Recorded prices distinguish `submitted_price` (what was requested from
//! the broker) from `entry_price`/`exit_price` (the realized fill, falling
//! back to the submitted price when polling returns no confirmation). That
//! distinction is what makes later P&L audits trustworthy.
//!
//! Per-candidate failures skip that candidate and continue the batch; an
//! unexpected failure is recorded in the execution summary and re-raised.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::application::candidates::sod_selection;
use crate::application::events::Event;
use crate::application::fill_poller::{await_fill, DEFAULT_FILL_TIMEOUT};
use crate::context::BotContext;
use crate::domain::entities::order::OrderSide;
use crate::domain::errors::ExecutionError;
use crate::domain::services::scanner::MomentumScanner;
use crate::domain::services::trigger_clock::{now_exchange, today_exchange};
use crate::persistence::config_repository::ConfigRepository;
use crate::persistence::models::{BotConfigRecord, CloseTrade, CreatePosition, CreateTrade};
use crate::persistence::repository::{PositionRepository, TradeRepository};
use crate::persistence::scan_repository::ScanRepository;

/// Cohort candidates whose live price gapped above this multiple of the
/// reference close are skipped; paying too large a premium defeats the
/// entry thesis.
pub const GAP_UP_THRESHOLD: f64 = 1.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMethod {
    /// Live price at execution time, degrading to the previous close.
    MarketOpen,
    /// Previous session's close, verbatim.
    PrevClose,
    /// Previous close scaled up by the configured premium percentage.
    LimitPremium,
}

impl EntryMethod {
    pub fn parse(s: &str) -> Self {
        match s {
            "market_open" => EntryMethod::MarketOpen,
            "limit_premium" => EntryMethod::LimitPremium,
            _ => EntryMethod::PrevClose,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryMethod::MarketOpen => "market_open",
            EntryMethod::PrevClose => "prev_close",
            EntryMethod::LimitPremium => "limit_premium",
        }
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Resolve the entry price for a candidate.
///
/// `market_open` uses the live price when available and falls back to the
/// previous close with a logged warning; the limit methods derive from the
/// previous close. Returns `None` when no usable price exists.
pub fn resolve_entry_price(
    method: EntryMethod,
    prev_close: f64,
    live_price: Option<f64>,
    limit_premium_pct: f64,
) -> Option<f64> {
    match method {
        EntryMethod::MarketOpen => {
            if let Some(p) = live_price.filter(|p| p.is_finite() && *p > 0.0) {
                return Some(p);
            }
            if prev_close > 0.0 {
                warn!(
                    "market_open: live price unavailable, falling back to prev_close ({:.2})",
                    prev_close
                );
                return Some(prev_close);
            }
            None
        }
        EntryMethod::LimitPremium => {
            if prev_close > 0.0 {
                Some(round4(prev_close * (1.0 + limit_premium_pct / 100.0)))
            } else {
                None
            }
        }
        EntryMethod::PrevClose => {
            if prev_close > 0.0 {
                Some(prev_close)
            } else {
                None
            }
        }
    }
}

/// Summary of one coordinator invocation, exposed to external callers.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub started_at: String,
    pub finished_at: String,
    pub buys: usize,
    pub exits: usize,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutedBuy {
    pub symbol: String,
    pub quantity: i64,
    pub entry_price: f64,
    pub submitted_price: f64,
    pub entry_method: String,
    pub stop_loss: f64,
    pub cost_basis: f64,
    pub order_id: i64,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ab_group: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutedExit {
    pub symbol: String,
    pub quantity: i64,
    pub exit_price: f64,
    pub exit_reason: String,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub order_id: i64,
    pub mode: String,
}

/// Start-of-day execution: pending exits first, then qualified buys.
pub async fn run_order_execution(ctx: &BotContext) -> Result<ExecutionSummary, ExecutionError> {
    let config = ConfigRepository::new(ctx.db.clone()).get().await?;
    if !config.auto_execute {
        info!("Auto-execute is OFF, order execution skipped");
        return Ok(skipped_summary());
    }

    info!("Order execution starting...");
    let started_at = now_exchange().to_rfc3339();

    let exits = match execute_pending_exits(ctx, &config).await {
        Ok(v) => v,
        Err(e) => return Err(record_failure(ctx, &started_at, e).await),
    };
    if exits.is_empty() {
        info!("No exits executed");
    } else {
        broadcast_orders(ctx, "exits", &exits);
        info!("Executed {} exit order(s)", exits.len());
    }

    let buys = match execute_pending_buys(ctx, &config).await {
        Ok(v) => v,
        Err(e) => return Err(record_failure(ctx, &started_at, e).await),
    };
    if buys.is_empty() {
        info!("No buys executed");
    } else {
        broadcast_orders(ctx, "buys", &buys);
        info!("Executed {} buy order(s)", buys.len());
    }

    let summary = ExecutionSummary {
        started_at,
        finished_at: now_exchange().to_rfc3339(),
        buys: buys.len(),
        exits: exits.len(),
        status: "completed".to_string(),
        error: None,
    };
    *ctx.last_execution.write().await = Some(summary.clone());
    info!("Order execution complete");
    Ok(summary)
}

/// End-of-day execution: Group A cohort buys only. Active only when the
/// A/B experiment is enabled.
pub async fn run_eod_execution(ctx: &BotContext) -> Result<ExecutionSummary, ExecutionError> {
    let config = ConfigRepository::new(ctx.db.clone()).get().await?;
    if !config.auto_execute {
        info!("Auto-execute is OFF, EOD execution skipped");
        return Ok(skipped_summary());
    }
    if !config.ab_test_enabled {
        info!("A/B test is OFF, EOD execution skipped");
        return Ok(skipped_summary());
    }

    info!("EOD Group A buy execution starting...");
    let started_at = now_exchange().to_rfc3339();

    let buys = match execute_eod_buys(ctx, &config).await {
        Ok(v) => v,
        Err(e) => return Err(record_failure(ctx, &started_at, e).await),
    };
    if buys.is_empty() {
        info!("EOD: no Group A buys executed");
    } else {
        broadcast_orders(ctx, "buys", &buys);
        info!("EOD: executed {} Group A buy order(s)", buys.len());
    }

    let summary = ExecutionSummary {
        started_at,
        finished_at: now_exchange().to_rfc3339(),
        buys: buys.len(),
        exits: 0,
        status: "completed".to_string(),
        error: None,
    };
    *ctx.last_execution.write().await = Some(summary.clone());
    info!("EOD Group A buy execution complete");
    Ok(summary)
}

fn skipped_summary() -> ExecutionSummary {
    let now = now_exchange().to_rfc3339();
    ExecutionSummary {
        started_at: now.clone(),
        finished_at: now,
        buys: 0,
        exits: 0,
        status: "skipped".to_string(),
        error: None,
    }
}

/// Record a failed run on the context, then hand the error back so the
/// caller can log or propagate it.
async fn record_failure(ctx: &BotContext, started_at: &str, e: ExecutionError) -> ExecutionError {
    error!("Order execution failed: {}", e);
    *ctx.last_execution.write().await = Some(ExecutionSummary {
        started_at: started_at.to_string(),
        finished_at: now_exchange().to_rfc3339(),
        buys: 0,
        exits: 0,
        status: "error".to_string(),
        error: Some(e.to_string()),
    });
    e
}

fn broadcast_orders<T: Serialize>(ctx: &BotContext, order_type: &str, orders: &[T]) {
    let orders = orders
        .iter()
        .filter_map(|o| serde_json::to_value(o).ok())
        .collect();
    ctx.events.send(Event::OrdersExecuted {
        order_type: order_type.to_string(),
        timestamp: now_exchange().to_rfc3339(),
        orders,
    });
}

fn valid_price(p: Option<&f64>) -> Option<f64> {
    p.copied().filter(|v| v.is_finite() && *v > 0.0)
}

fn trading_mode(config: &BotConfigRecord) -> &'static str {
    if config.paper_trading {
        "PAPER"
    } else {
        "LIVE"
    }
}

/// Buy every eligible candidate, up to the open-position ceiling.
async fn execute_pending_buys(
    ctx: &BotContext,
    config: &BotConfigRecord,
) -> Result<Vec<ExecutedBuy>, ExecutionError> {
    let position_repo = PositionRepository::new(ctx.db.clone());
    let trade_repo = TradeRepository::new(ctx.db.clone());
    let scan_repo = ScanRepository::new(ctx.db.clone());

    let open = position_repo.open_positions().await?;
    let open_symbols: HashSet<String> = open.iter().map(|p| p.symbol.clone()).collect();
    let mut count = open.len();
    let max_positions = config.max_positions.max(0) as usize;

    if count >= max_positions {
        info!("Portfolio full ({}/{}), no buys today", count, max_positions);
        return Ok(Vec::new());
    }

    let today = today_exchange();
    let selection = sod_selection(config, today);
    let candidates = selection.buy_candidates(&ctx.db, &open_symbols).await?;
    if candidates.is_empty() {
        info!("No qualified candidates to buy today");
        return Ok(Vec::new());
    }

    // One broker round-trip for every candidate's live price, never
    // one-by-one.
    let symbols: Vec<String> = candidates.iter().map(|c| c.symbol.clone()).collect();
    let live_prices: HashMap<String, f64> = if ctx.broker.is_connected().await {
        match ctx.broker.fetch_prices(&symbols).await {
            Ok(p) => {
                info!("Fetched live prices for {}/{} candidates", p.len(), symbols.len());
                p
            }
            Err(e) => {
                warn!("Live price fetch failed during buy execution: {}", e);
                HashMap::new()
            }
        }
    } else {
        warn!("Broker not connected, market_open candidates will degrade to prev_close");
        HashMap::new()
    };

    let scanner = MomentumScanner::new(ctx.db.clone(), ctx.broker.clone());
    let mode = trading_mode(config);
    let mut executed = Vec::new();

    for candidate in candidates {
        if count >= max_positions {
            info!("Max positions reached ({}), stopping buy loop", max_positions);
            break;
        }

        let symbol = candidate.symbol.clone();
        let prev_close = candidate.prev_close;
        if prev_close <= 0.0 {
            warn!("{}: prev_close price is 0, skipping", symbol);
            continue;
        }

        let live = valid_price(live_prices.get(&symbol));
        let mut entry_method = EntryMethod::parse(
            candidate
                .entry_method
                .as_deref()
                .unwrap_or(config.default_entry_method.as_str()),
        );

        // Cohort re-verification: full fresh criteria check plus the
        // gap-up guard, with the skip reason persisted for audit.
        if candidate.reverify {
            match scanner.rescan_single(&symbol).await {
                Ok(true) => {}
                Ok(false) => {
                    info!("{}: cohort re-verify FAILED, skipping", symbol);
                    scan_repo
                        .mark_sod_skip(&symbol, candidate.scan_date, "CRITERIA_FAILED")
                        .await?;
                    continue;
                }
                Err(e) => {
                    warn!("{}: cohort re-verify errored ({}), skipping", symbol, e);
                    scan_repo
                        .mark_sod_skip(&symbol, candidate.scan_date, "RESCAN_ERROR")
                        .await?;
                    continue;
                }
            }
            if let Some(lp) = live {
                if lp > prev_close * GAP_UP_THRESHOLD {
                    let gap_pct = (lp - prev_close) / prev_close * 100.0;
                    warn!("{}: gap-up too large (+{:.1}%), skipping", symbol, gap_pct);
                    scan_repo
                        .mark_sod_skip(&symbol, candidate.scan_date, "GAP_UP_EXCESSIVE")
                        .await?;
                    continue;
                }
            }
            // Re-verified cohort entries always buy at the live market.
            entry_method = EntryMethod::MarketOpen;
        }

        let entry_price = match resolve_entry_price(
            entry_method,
            prev_close,
            live,
            config.limit_order_premium_pct,
        ) {
            Some(p) if p > 0.0 => p,
            _ => {
                warn!(
                    "{}: could not resolve entry price (method={}), skipping",
                    symbol,
                    entry_method.as_str()
                );
                continue;
            }
        };

        let quantity = ((config.position_size_usd / entry_price) as i64).max(1);

        if !ctx.broker.is_connected().await {
            warn!("Broker not connected, skipping {} buy", symbol);
            continue;
        }

        let placed = match entry_method {
            EntryMethod::MarketOpen => {
                ctx.broker
                    .place_market_order(&symbol, quantity, OrderSide::Buy)
                    .await
            }
            _ => {
                ctx.broker
                    .place_limit_order(&symbol, quantity, OrderSide::Buy, entry_price)
                    .await
            }
        };
        let handle = match placed {
            Ok(h) => h,
            Err(e) => {
                error!("Order placement failed for {}: {}", symbol, e);
                continue;
            }
        };

        let submitted_price = entry_price;
        let fill = await_fill(ctx.broker.as_ref(), handle.order_id, &symbol, DEFAULT_FILL_TIMEOUT).await;
        let filled_price = if fill > 0.0 {
            info!(
                "{}: confirmed fill @ {:.4} (submitted {:.4})",
                symbol, fill, submitted_price
            );
            fill
        } else {
            warn!(
                "{}: no fill confirmation, recording submitted price {:.4} as entry price",
                symbol, submitted_price
            );
            submitted_price
        };

        let cost_basis = round2(filled_price * quantity as f64);
        let stop_loss = round4(filled_price * (1.0 - config.stop_loss_pct / 100.0));

        let trade_id = match trade_repo
            .create(CreateTrade {
                symbol: symbol.clone(),
                entry_date: today,
                entry_price: filled_price,
                submitted_price,
                quantity,
                cost_basis,
            })
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to create trade record for {}: {}", symbol, e);
                continue;
            }
        };

        if let Err(e) = position_repo
            .save(CreatePosition {
                symbol: symbol.clone(),
                entry_date: today,
                entry_price: filled_price,
                submitted_price,
                quantity,
                stop_loss,
                cost_basis,
                trade_id,
            })
            .await
        {
            error!("Failed to save position for {}: {}", symbol, e);
            continue;
        }

        if let Err(e) = scan_repo.set_portfolio_flag(&symbol, true).await {
            warn!("Failed to set portfolio flag for {}: {}", symbol, e);
        }

        count += 1;
        info!(
            "[{}] BUY {}: {} shares @ fill={:.2} (submitted={:.2}, method={}, stop={:.2}, order_id={})",
            mode,
            symbol,
            quantity,
            filled_price,
            submitted_price,
            entry_method.as_str(),
            stop_loss,
            handle.order_id
        );

        executed.push(ExecutedBuy {
            symbol,
            quantity,
            entry_price: filled_price,
            submitted_price,
            entry_method: entry_method.as_str().to_string(),
            stop_loss,
            cost_basis,
            order_id: handle.order_id,
            mode: mode.to_string(),
            ab_group: candidate.ab_group,
        });
    }

    Ok(executed)
}

/// Buy Group A cohort candidates at the end of the session, always at the
/// live market price.
async fn execute_eod_buys(
    ctx: &BotContext,
    config: &BotConfigRecord,
) -> Result<Vec<ExecutedBuy>, ExecutionError> {
    let position_repo = PositionRepository::new(ctx.db.clone());
    let trade_repo = TradeRepository::new(ctx.db.clone());
    let scan_repo = ScanRepository::new(ctx.db.clone());

    let open = position_repo.open_positions().await?;
    let open_symbols: HashSet<String> = open.iter().map(|p| p.symbol.clone()).collect();
    let mut count = open.len();
    let max_positions = config.max_positions.max(0) as usize;

    if count >= max_positions {
        info!("Portfolio full ({}/{}), no EOD buys", count, max_positions);
        return Ok(Vec::new());
    }

    let candidates: Vec<_> = scan_repo
        .eod_buy_candidates()
        .await?
        .into_iter()
        .filter(|c| !open_symbols.contains(&c.symbol))
        .collect();
    if candidates.is_empty() {
        info!("No Group A EOD candidates to buy");
        return Ok(Vec::new());
    }

    if !ctx.broker.is_connected().await {
        warn!("Broker not connected, cannot execute EOD buys");
        return Ok(Vec::new());
    }

    let symbols: Vec<String> = candidates.iter().map(|c| c.symbol.clone()).collect();
    let live_prices = match ctx.broker.fetch_prices(&symbols).await {
        Ok(p) => {
            info!("EOD: fetched live prices for {}/{} symbols", p.len(), symbols.len());
            p
        }
        Err(e) => {
            warn!("EOD live price fetch failed: {}", e);
            HashMap::new()
        }
    };

    let today = today_exchange();
    let mode = trading_mode(config);
    let mut executed = Vec::new();

    for candidate in candidates {
        if count >= max_positions {
            break;
        }

        let symbol = candidate.symbol.clone();
        let prev_close = candidate.price;

        let entry_price = match valid_price(live_prices.get(&symbol)) {
            Some(p) => p,
            None if prev_close > 0.0 => {
                warn!(
                    "{}: no live price for EOD buy, falling back to prev_close {:.2}",
                    symbol, prev_close
                );
                prev_close
            }
            None => {
                warn!("{}: no price available, skipping EOD buy", symbol);
                continue;
            }
        };

        let quantity = ((config.position_size_usd / entry_price) as i64).max(1);

        let handle = match ctx
            .broker
            .place_market_order(&symbol, quantity, OrderSide::Buy)
            .await
        {
            Ok(h) => h,
            Err(e) => {
                error!("{}: EOD order placement failed: {}", symbol, e);
                continue;
            }
        };

        let submitted_price = entry_price;
        let fill = await_fill(ctx.broker.as_ref(), handle.order_id, &symbol, DEFAULT_FILL_TIMEOUT).await;
        let filled_price = if fill > 0.0 { fill } else { submitted_price };

        let cost_basis = round2(filled_price * quantity as f64);
        let stop_loss = round4(filled_price * (1.0 - config.stop_loss_pct / 100.0));

        let trade_id = match trade_repo
            .create(CreateTrade {
                symbol: symbol.clone(),
                entry_date: today,
                entry_price: filled_price,
                submitted_price,
                quantity,
                cost_basis,
            })
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!("{}: failed to create EOD trade record: {}", symbol, e);
                continue;
            }
        };

        if let Err(e) = position_repo
            .save(CreatePosition {
                symbol: symbol.clone(),
                entry_date: today,
                entry_price: filled_price,
                submitted_price,
                quantity,
                stop_loss,
                cost_basis,
                trade_id,
            })
            .await
        {
            error!("{}: failed to save EOD position: {}", symbol, e);
            continue;
        }

        if let Err(e) = scan_repo.set_portfolio_flag(&symbol, true).await {
            warn!("Failed to set portfolio flag for {}: {}", symbol, e);
        }
        if let Err(e) = scan_repo
            .clear_eod_buy_pending(&symbol, candidate.scan_date)
            .await
        {
            warn!("Failed to clear EOD pending flag for {}: {}", symbol, e);
        }

        count += 1;
        info!(
            "[{}] EOD BUY {}: {} shares @ fill={:.2} (stop={:.2}, order_id={})",
            mode, symbol, quantity, filled_price, stop_loss, handle.order_id
        );

        executed.push(ExecutedBuy {
            symbol,
            quantity,
            entry_price: filled_price,
            submitted_price,
            entry_method: "market_open_eod".to_string(),
            stop_loss,
            cost_basis,
            order_id: handle.order_id,
            mode: mode.to_string(),
            ab_group: candidate.ab_group,
        });
    }

    Ok(executed)
}

/// Sell every position flagged `pending_exit`.
///
/// An automated sell must never use a stale stored price: a position whose
/// live price is unavailable is skipped entirely and stays open (and
/// flagged) for the next cycle.
async fn execute_pending_exits(
    ctx: &BotContext,
    config: &BotConfigRecord,
) -> Result<Vec<ExecutedExit>, ExecutionError> {
    let position_repo = PositionRepository::new(ctx.db.clone());
    let trade_repo = TradeRepository::new(ctx.db.clone());
    let scan_repo = ScanRepository::new(ctx.db.clone());

    let pending = position_repo.pending_exits().await?;
    if pending.is_empty() {
        info!("No pending exits today");
        return Ok(Vec::new());
    }

    let symbols: Vec<String> = pending.iter().map(|p| p.symbol.clone()).collect();
    let live_prices: HashMap<String, f64> = if ctx.broker.is_connected().await {
        match ctx.broker.fetch_prices(&symbols).await {
            Ok(p) => {
                info!("Fetched live exit prices for {}/{} symbols", p.len(), symbols.len());
                p
            }
            Err(e) => {
                warn!("Live price fetch failed during exit execution: {}", e);
                HashMap::new()
            }
        }
    } else {
        warn!("Broker not connected, all pending exits will be skipped");
        HashMap::new()
    };

    let today = today_exchange();
    let mode = trading_mode(config);
    let mut executed = Vec::new();

    for pos in pending {
        let symbol = pos.symbol.clone();

        let exit_price = match valid_price(live_prices.get(&symbol)) {
            Some(p) => p,
            None => {
                error!(
                    "{}: no live price available, skipping automated sell; \
                     position remains open and will retry next cycle",
                    symbol
                );
                continue;
            }
        };

        let handle = match ctx
            .broker
            .place_market_order(&symbol, pos.quantity, OrderSide::Sell)
            .await
        {
            Ok(h) => h,
            Err(e) => {
                error!("Sell order placement failed for {}: {}", symbol, e);
                continue;
            }
        };

        let fill = await_fill(ctx.broker.as_ref(), handle.order_id, &symbol, DEFAULT_FILL_TIMEOUT).await;
        let filled_exit_price = if fill > 0.0 {
            info!(
                "{}: confirmed sell fill @ {:.4} (resolved live price {:.4})",
                symbol, fill, exit_price
            );
            fill
        } else {
            warn!(
                "{}: no sell fill confirmation, recording resolved price {:.4} as exit price",
                symbol, exit_price
            );
            exit_price
        };

        let proceeds = round2(filled_exit_price * pos.quantity as f64);
        let pnl = round2(proceeds - pos.cost_basis);
        let pnl_pct = if pos.cost_basis != 0.0 {
            round4(pnl / pos.cost_basis * 100.0)
        } else {
            0.0
        };
        let exit_reason = pos
            .exit_reason
            .clone()
            .unwrap_or_else(|| "MANUAL_CLOSE".to_string());

        if let Some(trade_id) = pos.trade_id {
            if let Err(e) = trade_repo
                .close(
                    trade_id,
                    CloseTrade {
                        exit_date: today,
                        exit_price: filled_exit_price,
                        proceeds,
                        pnl,
                        pnl_pct,
                        exit_reason: exit_reason.clone(),
                        stop_loss: Some(pos.stop_loss),
                    },
                )
                .await
            {
                error!("Failed to close trade #{} for {}: {}", trade_id, symbol, e);
                continue;
            }
        }
        if let Err(e) = position_repo.close(&symbol).await {
            error!("Failed to close position {}: {}", symbol, e);
            continue;
        }

        if let Err(e) = scan_repo.set_portfolio_flag(&symbol, false).await {
            warn!("Failed to clear portfolio flag for {}: {}", symbol, e);
        }

        info!(
            "[{}] SELL {}: {} shares @ {:.2} | P&L: {:.2} ({:.2}%) | reason={} order_id={}",
            mode, symbol, pos.quantity, filled_exit_price, pnl, pnl_pct, exit_reason, handle.order_id
        );

        executed.push(ExecutedExit {
            symbol,
            quantity: pos.quantity,
            exit_price: filled_exit_price,
            exit_reason,
            pnl,
            pnl_pct,
            order_id: handle.order_id,
            mode: mode.to_string(),
        });
    }

    Ok(executed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_method_parse_defaults_to_prev_close() {
        assert_eq!(EntryMethod::parse("market_open"), EntryMethod::MarketOpen);
        assert_eq!(EntryMethod::parse("limit_premium"), EntryMethod::LimitPremium);
        assert_eq!(EntryMethod::parse("prev_close"), EntryMethod::PrevClose);
        assert_eq!(EntryMethod::parse("bogus"), EntryMethod::PrevClose);
    }

    #[test]
    fn test_limit_premium_pricing_and_sizing() {
        // prev_close 50.00 with a 1% premium resolves to 50.50; a 10k
        // position buys 198 shares with an 8% stop at 46.46.
        let price = resolve_entry_price(EntryMethod::LimitPremium, 50.0, None, 1.0).unwrap();
        assert_eq!(price, 50.50);

        let quantity = ((10_000.0 / price) as i64).max(1);
        assert_eq!(quantity, 198);

        let stop = round4(price * (1.0 - 8.0 / 100.0));
        assert_eq!(stop, 46.46);
    }

    #[test]
    fn test_market_open_prefers_live_price() {
        assert_eq!(
            resolve_entry_price(EntryMethod::MarketOpen, 50.0, Some(51.2), 1.0),
            Some(51.2)
        );
        // Degrades to prev_close when the live quote is missing or junk.
        assert_eq!(
            resolve_entry_price(EntryMethod::MarketOpen, 50.0, None, 1.0),
            Some(50.0)
        );
        assert_eq!(
            resolve_entry_price(EntryMethod::MarketOpen, 50.0, Some(f64::NAN), 1.0),
            Some(50.0)
        );
        assert_eq!(resolve_entry_price(EntryMethod::MarketOpen, 0.0, None, 1.0), None);
    }

    #[test]
    fn test_prev_close_is_verbatim() {
        assert_eq!(
            resolve_entry_price(EntryMethod::PrevClose, 50.0, Some(99.0), 1.0),
            Some(50.0)
        );
        assert_eq!(resolve_entry_price(EntryMethod::PrevClose, 0.0, None, 1.0), None);
    }

    #[test]
    fn test_minimum_quantity_is_one() {
        // Position size smaller than one share still buys a single share.
        let price = 12_000.0;
        let quantity = ((10_000.0 / price) as i64).max(1);
        assert_eq!(quantity, 1);
    }
}
