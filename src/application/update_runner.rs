//! Update Runner
//!
//! One-shot routine that walks every active instrument, computes its
//! missing-bar window via the gap detector, fetches only that gap from the
//! broker, and upserts the bars. Progress is broadcast over the event
//! channel every few instruments.
//!
//! State machine: idle -> running -> {success, failed}. The transition into
//! `running` is an atomic conditional write on the status row, so a manual
//! "run now" racing the scheduler results in exactly one execution; the
//! loser observes `running` and no-ops.
//!
//! Failure semantics: per-instrument errors are isolated and counted,
//! never aborting the batch. Only pre-loop failures (connectivity, a
//! database error around the loop) mark the whole run `failed`.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::application::events::Event;
use crate::context::BotContext;
use crate::domain::errors::UpdateError;
use crate::domain::services::gap_detector::fetch_window;
use crate::domain::services::trigger_clock::{last_completed_trading_day, today_exchange};
use crate::persistence::config_repository::ConfigRepository;
use crate::persistence::market_data_repository::{BarRepository, InstrumentRepository};

/// Pause between broker requests, respecting upstream rate limits.
pub const RATE_LIMIT_SLEEP: Duration = Duration::from_millis(500);

/// Broadcast a progress event every this many instruments.
pub const PROGRESS_EVERY: usize = 10;

/// Terminal result of one update invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Completed {
        total: usize,
        skipped: usize,
        errors: usize,
    },
    /// Another invocation holds the single-flight guard; this was a no-op.
    AlreadyRunning,
    /// Nothing to update; status row untouched.
    NoInstruments,
}

/// Fetch missing daily bars for every active instrument.
///
/// Safe to call concurrently: the status-row guard admits one runner.
pub async fn run_data_update(ctx: &BotContext) -> Result<UpdateOutcome, UpdateError> {
    let config_repo = ConfigRepository::new(ctx.db.clone());

    // Fast-path guard before doing any work.
    let status = config_repo.status().await?;
    if status.data_update_status == "running" {
        info!("Data update already in progress, skipping");
        return Ok(UpdateOutcome::AlreadyRunning);
    }

    // Connectivity guard: one reconnect attempt, then fail the run.
    if !ctx.broker.is_connected().await {
        warn!("Broker not connected; attempting reconnect before data update");
        if let Err(e) = ctx.broker.connect().await {
            let reason = format!("broker not connected: {}", e);
            error!("Reconnect failed: {}", e);
            config_repo.finish_update(false, Some(&reason)).await?;
            ctx.events.send(Event::DataUpdateComplete {
                status: "failed".to_string(),
                total: 0,
                skipped: 0,
                errors: 0,
                error: Some(reason),
            });
            return Err(UpdateError::NotConnected(e));
        }
    }

    let symbols = InstrumentRepository::new(ctx.db.clone()).active_symbols().await?;
    if symbols.is_empty() {
        info!("No active instruments, skipping data update");
        return Ok(UpdateOutcome::NoInstruments);
    }

    // Atomic acquire; the losing side of a race lands here.
    if !config_repo.try_begin_update().await? {
        info!("Data update already in progress, skipping");
        return Ok(UpdateOutcome::AlreadyRunning);
    }

    let total = symbols.len();
    info!("Starting data update for {} instruments", total);
    ctx.events.send(Event::DataUpdateStarted { total });

    match update_symbols(ctx, &symbols).await {
        Ok((skipped, errors)) => {
            config_repo.finish_update(true, None).await?;
            info!(
                "Data update complete: {} instruments processed ({} already current, {} errors)",
                total, skipped, errors
            );
            ctx.events.send(Event::DataUpdateComplete {
                status: "success".to_string(),
                total,
                skipped,
                errors,
                error: None,
            });
            Ok(UpdateOutcome::Completed { total, skipped, errors })
        }
        Err(e) => {
            let reason = e.to_string();
            error!("Data update failed: {}", reason);
            config_repo.finish_update(false, Some(&reason)).await?;
            ctx.events.send(Event::DataUpdateComplete {
                status: "failed".to_string(),
                total,
                skipped: 0,
                errors: 0,
                error: Some(reason),
            });
            Err(e)
        }
    }
}

/// Sequential per-symbol pass. Returns (skipped, errors).
///
/// Symbols are processed in their stored ascending order with a fixed
/// inter-request delay, giving deterministic, rate-limit-respecting pacing.
async fn update_symbols(ctx: &BotContext, symbols: &[String]) -> Result<(usize, usize), UpdateError> {
    let bar_repo = BarRepository::new(ctx.db.clone());
    let last_completed = last_completed_trading_day(today_exchange());

    let total = symbols.len();
    let mut done = 0usize;
    let mut skipped = 0usize;
    let mut errors = 0usize;

    for symbol in symbols {
        let window = match bar_repo.latest_bar_date(symbol).await {
            Ok(latest) => fetch_window(latest, last_completed),
            Err(e) => {
                errors += 1;
                error!("Error reading latest bar date for {}: {}", symbol, e);
                done += 1;
                broadcast_progress(ctx, done, total, symbol);
                continue;
            }
        };

        let window = match window {
            Some(w) => w,
            None => {
                // Already current; counts toward progress at the normal cadence.
                skipped += 1;
                done += 1;
                broadcast_progress(ctx, done, total, symbol);
                continue;
            }
        };

        match ctx.broker.fetch_historical_bars(symbol, window).await {
            Ok(bars) if !bars.is_empty() => {
                if let Err(e) = bar_repo.upsert_bars(symbol, &bars).await {
                    errors += 1;
                    error!("Error saving bars for {}: {}", symbol, e);
                }
            }
            Ok(_) => {
                warn!("No historical data returned for {}", symbol);
            }
            Err(e) => {
                errors += 1;
                error!("Error fetching bars for {}: {}", symbol, e);
            }
        }

        done += 1;
        broadcast_progress(ctx, done, total, symbol);

        sleep(RATE_LIMIT_SLEEP).await;
    }

    Ok((skipped, errors))
}

fn broadcast_progress(ctx: &BotContext, done: usize, total: usize, symbol: &str) {
    if done % PROGRESS_EVERY == 0 {
        ctx.events.send(Event::DataUpdateProgress {
            done,
            total,
            current_symbol: symbol.to_string(),
        });
    }
}
