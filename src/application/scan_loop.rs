//! Qualification Scan Loop
//!
//! Periodic task running the momentum scanner and the position monitor.
//! Sleeps are chunked and re-checked against the context's running flag, so
//! stopping the loop takes effect within one chunk even mid-interval.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::application::events::Event;
use crate::context::BotContext;
use crate::domain::services::monitor::PositionMonitor;
use crate::domain::services::scanner::MomentumScanner;
use crate::domain::services::trigger_clock::now_exchange;
use crate::persistence::config_repository::ConfigRepository;

/// Upper bound on any single sleep, keeping stop requests responsive.
pub const SLEEP_CHUNK: Duration = Duration::from_secs(60);

/// Fallback pacing when the configured interval cannot be read.
const ERROR_RETRY: Duration = Duration::from_secs(60);

/// Start the scan loop if it is not already running.
pub async fn start_scan_loop(ctx: Arc<BotContext>) -> bool {
    if ctx
        .scan_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return false;
    }
    if let Err(e) = ConfigRepository::new(ctx.db.clone()).set_scanner_running(true).await {
        warn!("Failed to persist scanner status: {}", e);
    }
    tokio::spawn(run_scan_loop(ctx));
    true
}

/// Request the scan loop to stop. Takes effect within one sleep chunk.
pub async fn stop_scan_loop(ctx: &BotContext) -> bool {
    let was_running = ctx.scan_running.swap(false, Ordering::SeqCst);
    if was_running {
        if let Err(e) = ConfigRepository::new(ctx.db.clone()).set_scanner_running(false).await {
            warn!("Failed to persist scanner status: {}", e);
        }
    }
    was_running
}

/// Loop body: scan, broadcast, check exit triggers, sleep, repeat.
pub async fn run_scan_loop(ctx: Arc<BotContext>) {
    info!("Scanner loop started");

    while ctx.scan_running.load(Ordering::SeqCst) {
        let scanner = MomentumScanner::new(ctx.db.clone(), ctx.broker.clone());

        match scanner.scan_universe().await {
            Ok(results) => {
                ctx.events.send(Event::ScanResults {
                    timestamp: now_exchange().to_rfc3339(),
                    results,
                });

                let monitor = PositionMonitor::new(ctx.db.clone(), ctx.broker.clone());
                match monitor.check_exit_triggers().await {
                    Ok(exits) if !exits.is_empty() => {
                        warn!("{} position(s) flagged for exit", exits.len());
                        ctx.events.send(Event::ExitTriggers {
                            timestamp: now_exchange().to_rfc3339(),
                            exits,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => error!("Exit trigger check failed: {}", e),
                }

                let interval = match ConfigRepository::new(ctx.db.clone()).get().await {
                    Ok(c) => Duration::from_secs(c.scanner_interval_seconds.max(1) as u64),
                    Err(e) => {
                        error!("Failed to read scanner interval: {}", e);
                        ERROR_RETRY
                    }
                };
                interruptible_sleep(&ctx, interval).await;
            }
            Err(e) => {
                error!("Scanner loop error: {}", e);
                interruptible_sleep(&ctx, ERROR_RETRY).await;
            }
        }
    }

    info!("Scanner loop stopped");
}

/// Sleep `total`, in chunks, bailing out as soon as the running flag drops.
async fn interruptible_sleep(ctx: &BotContext, total: Duration) {
    let mut remaining = total;
    while remaining > Duration::ZERO && ctx.scan_running.load(Ordering::SeqCst) {
        let chunk = remaining.min(SLEEP_CHUNK);
        sleep(chunk).await;
        remaining = remaining.saturating_sub(chunk);
    }
}
