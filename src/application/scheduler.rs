//! Scheduler Loops
//!
//! Three structurally identical long-running tasks (data update,
//! start-of-day order execution, end-of-day order execution). Each cycle
//! re-reads the runtime config, so trigger-time changes made through the
//! settings API take effect on the next iteration without a restart.
//!
//! Firings are recorded in the persisted per-job checkpoint, which drives
//! two behaviors across restarts:
//! - same-day re-fire suppression (fired today means no grace window), and
//! - a one-time grace re-arm when the configured trigger time changes
//!   mid-day; a fresh checkpoint with no previously known firing time never
//!   arms a grace window, so a brand-new deployment cannot fire
//!   retroactively.
//!
//! An error from the invoked routine is logged and the loop continues; a
//! scheduler loop never exits.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::sleep;
use tracing::{error, info};

use crate::application::execution::{run_eod_execution, run_order_execution};
use crate::application::update_runner::run_data_update;
use crate::context::BotContext;
use crate::domain::services::trigger_clock::{next_wake_delay, now_exchange, today_exchange};
use crate::persistence::config_repository::ConfigRepository;
use crate::persistence::models::{BotConfigRecord, SchedulerCheckpointRecord};

/// Retry interval while the trigger time is missing or invalid.
pub const INVALID_CONFIG_RETRY: Duration = Duration::from_secs(60);

/// Pause after a firing, absorbing clock jitter so the same wake window
/// cannot double-fire.
pub const POST_FIRE_BUFFER: Duration = Duration::from_secs(120);

/// Grace window for the order-execution jobs: a restart within this many
/// minutes after the scheduled time still fires once.
pub const EXECUTION_GRACE_MINUTES: i64 = 10;

/// Decisions for one loop iteration, derived from the persisted checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationPlan {
    /// The configured trigger time changed since the last firing; clear the
    /// same-day guard so the new time can still fire today.
    pub clear_fired_guard: bool,
    /// Effective grace window for this wake computation.
    pub grace_minutes: i64,
}

/// Pure scheduling decision. `grace_minutes` is the job's configured grace;
/// the returned plan may suppress it.
pub fn plan_iteration(
    trigger: &str,
    checkpoint: &SchedulerCheckpointRecord,
    today: NaiveDate,
    grace_minutes: i64,
) -> IterationPlan {
    let time_changed =
        matches!(&checkpoint.last_exec_time_config, Some(prev) if prev != trigger);
    let fired_today = !time_changed && checkpoint.last_execution_date == Some(today);
    let has_prior_firing = checkpoint.last_exec_time_config.is_some();

    let grace = if fired_today || !has_prior_firing {
        0
    } else {
        grace_minutes
    };

    IterationPlan {
        clear_fired_guard: time_changed,
        grace_minutes: grace,
    }
}

/// Shared body of the three scheduler loops.
async fn run_job_loop<T, F, Fut>(
    ctx: Arc<BotContext>,
    job: &'static str,
    grace_minutes: i64,
    trigger_of: T,
    fire: F,
) where
    T: Fn(&BotConfigRecord) -> Option<String>,
    F: Fn(Arc<BotContext>) -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    info!("{} scheduler started", job);
    let config_repo = ConfigRepository::new(ctx.db.clone());

    loop {
        let config = match config_repo.get().await {
            Ok(c) => c,
            Err(e) => {
                error!("{}: failed to read config: {}", job, e);
                sleep(INVALID_CONFIG_RETRY).await;
                continue;
            }
        };

        let trigger = match trigger_of(&config).filter(|t| !t.is_empty()) {
            Some(t) => t,
            None => {
                error!(
                    "{}: trigger time is not set in config, cannot schedule; set it in Settings",
                    job
                );
                sleep(INVALID_CONFIG_RETRY).await;
                continue;
            }
        };

        let checkpoint = match config_repo.checkpoint(job).await {
            Ok(c) => c,
            Err(e) => {
                error!("{}: failed to read checkpoint: {}", job, e);
                sleep(INVALID_CONFIG_RETRY).await;
                continue;
            }
        };

        let plan = plan_iteration(&trigger, &checkpoint, today_exchange(), grace_minutes);
        if plan.clear_fired_guard {
            info!(
                "{}: trigger time changed ({} -> {}), re-arming today's fire",
                job,
                checkpoint.last_exec_time_config.as_deref().unwrap_or("none"),
                trigger
            );
            if let Err(e) = config_repo.clear_checkpoint_date(job).await {
                error!("{}: failed to clear checkpoint: {}", job, e);
                sleep(INVALID_CONFIG_RETRY).await;
                continue;
            }
        }

        let wait = match next_wake_delay(&trigger, now_exchange(), plan.grace_minutes) {
            Ok(w) => w,
            Err(e) => {
                error!("{}: {}", job, e);
                sleep(INVALID_CONFIG_RETRY).await;
                continue;
            }
        };

        if wait > Duration::from_secs(2) {
            info!(
                "{}: next fire in {:.1}h (at {} ET on next weekday)",
                job,
                wait.as_secs_f64() / 3600.0,
                trigger
            );
        }

        sleep(wait).await;

        match fire(ctx.clone()).await {
            Ok(()) => {
                if let Err(e) = config_repo
                    .save_checkpoint(job, today_exchange(), &trigger)
                    .await
                {
                    error!("{}: failed to persist checkpoint: {}", job, e);
                }
            }
            Err(e) => {
                error!("{}: scheduled run raised an unexpected error: {}", job, e);
            }
        }

        sleep(POST_FIRE_BUFFER).await;
    }
}

/// Long-running data-update trigger loop.
pub async fn data_update_loop(ctx: Arc<BotContext>) {
    run_job_loop(
        ctx,
        "data_update",
        0,
        |c| c.data_update_time.clone(),
        |ctx| async move {
            run_data_update(&ctx).await.map(|_| ()).map_err(|e| e.to_string())
        },
    )
    .await
}

/// Long-running start-of-day order-execution trigger loop.
pub async fn order_execution_loop(ctx: Arc<BotContext>) {
    run_job_loop(
        ctx,
        "order_execution",
        EXECUTION_GRACE_MINUTES,
        |c| c.order_execution_time.clone(),
        |ctx| async move {
            run_order_execution(&ctx).await.map(|_| ()).map_err(|e| e.to_string())
        },
    )
    .await
}

/// Long-running end-of-day order-execution trigger loop.
pub async fn eod_execution_loop(ctx: Arc<BotContext>) {
    run_job_loop(
        ctx,
        "eod_execution",
        EXECUTION_GRACE_MINUTES,
        |c| c.eod_execution_time.clone(),
        |ctx| async move {
            run_eod_execution(&ctx).await.map(|_| ()).map_err(|e| e.to_string())
        },
    )
    .await
}
