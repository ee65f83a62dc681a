//! Config & Status Repository
//!
//! Access to the singleton `bot_config` and `bot_status` rows and the
//! per-job scheduler checkpoints. The data-update single-flight guard lives
//! here: the transition into `running` is a conditional UPDATE, so two
//! near-simultaneous triggers (a manual run racing the scheduler) cannot
//! both acquire it.

use super::models::{BotConfigRecord, BotStatusRecord, SchedulerCheckpointRecord};
use super::{DatabaseError, DbPool};
use chrono::NaiveDate;
use tracing::{debug, error};

/// Fields the settings API may change. `None` leaves the stored value as is.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ConfigUpdate {
    pub stop_loss_pct: Option<f64>,
    pub max_positions: Option<i64>,
    pub position_size_usd: Option<f64>,
    pub paper_trading: Option<bool>,
    pub auto_execute: Option<bool>,
    pub default_entry_method: Option<String>,
    pub data_update_time: Option<String>,
    pub order_execution_time: Option<String>,
    pub eod_execution_time: Option<String>,
    pub near_52wh_pct: Option<f64>,
    pub above_52wl_pct: Option<f64>,
    pub volume_multiplier: Option<f64>,
    pub spy_filter_enabled: Option<bool>,
    pub trend_break_exit_enabled: Option<bool>,
    pub limit_order_premium_pct: Option<f64>,
    pub scanner_interval_seconds: Option<i64>,
    pub ab_test_enabled: Option<bool>,
}

pub struct ConfigRepository {
    pool: DbPool,
}

impl ConfigRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self) -> Result<BotConfigRecord, DatabaseError> {
        sqlx::query_as::<_, BotConfigRecord>("SELECT * FROM bot_config WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to read bot config: {}", e);
                DatabaseError::QueryError(format!("Failed to read config: {}", e))
            })
    }

    pub async fn update(&self, update: ConfigUpdate) -> Result<BotConfigRecord, DatabaseError> {
        sqlx::query(
            r#"
            UPDATE bot_config SET
                stop_loss_pct = COALESCE(?1, stop_loss_pct),
                max_positions = COALESCE(?2, max_positions),
                position_size_usd = COALESCE(?3, position_size_usd),
                paper_trading = COALESCE(?4, paper_trading),
                auto_execute = COALESCE(?5, auto_execute),
                default_entry_method = COALESCE(?6, default_entry_method),
                data_update_time = COALESCE(?7, data_update_time),
                order_execution_time = COALESCE(?8, order_execution_time),
                eod_execution_time = COALESCE(?9, eod_execution_time),
                near_52wh_pct = COALESCE(?10, near_52wh_pct),
                above_52wl_pct = COALESCE(?11, above_52wl_pct),
                volume_multiplier = COALESCE(?12, volume_multiplier),
                spy_filter_enabled = COALESCE(?13, spy_filter_enabled),
                trend_break_exit_enabled = COALESCE(?14, trend_break_exit_enabled),
                limit_order_premium_pct = COALESCE(?15, limit_order_premium_pct),
                scanner_interval_seconds = COALESCE(?16, scanner_interval_seconds),
                ab_test_enabled = COALESCE(?17, ab_test_enabled),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = 1
            "#,
        )
        .bind(update.stop_loss_pct)
        .bind(update.max_positions)
        .bind(update.position_size_usd)
        .bind(update.paper_trading)
        .bind(update.auto_execute)
        .bind(update.default_entry_method)
        .bind(update.data_update_time)
        .bind(update.order_execution_time)
        .bind(update.eod_execution_time)
        .bind(update.near_52wh_pct)
        .bind(update.above_52wl_pct)
        .bind(update.volume_multiplier)
        .bind(update.spy_filter_enabled)
        .bind(update.trend_break_exit_enabled)
        .bind(update.limit_order_premium_pct)
        .bind(update.scanner_interval_seconds)
        .bind(update.ab_test_enabled)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update bot config: {}", e);
            DatabaseError::QueryError(format!("Failed to update config: {}", e))
        })?;

        self.get().await
    }

    pub async fn status(&self) -> Result<BotStatusRecord, DatabaseError> {
        sqlx::query_as::<_, BotStatusRecord>("SELECT * FROM bot_status WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to read bot status: {}", e);
                DatabaseError::QueryError(format!("Failed to read status: {}", e))
            })
    }

    /// Try to transition the data-update status into `running`.
    ///
    /// Returns `true` when this caller acquired the guard. The WHERE clause
    /// makes the read-and-set a single atomic statement: at most one of two
    /// concurrent callers sees `rows_affected == 1`.
    pub async fn try_begin_update(&self) -> Result<bool, DatabaseError> {
        let rows = sqlx::query(
            r#"
            UPDATE bot_status
            SET data_update_status = 'running'
            WHERE id = 1 AND data_update_status != 'running'
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to acquire update guard: {}", e);
            DatabaseError::QueryError(format!("Failed to acquire update guard: {}", e))
        })?
        .rows_affected();

        Ok(rows == 1)
    }

    /// Record the terminal state of a data-update run. Success clears any
    /// prior error and stamps the completion time.
    pub async fn finish_update(&self, success: bool, error_msg: Option<&str>) -> Result<(), DatabaseError> {
        if success {
            sqlx::query(
                r#"
                UPDATE bot_status
                SET data_update_status = 'success',
                    last_data_update = CURRENT_TIMESTAMP,
                    data_update_error = NULL
                WHERE id = 1
                "#,
            )
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE bot_status
                SET data_update_status = 'failed', data_update_error = ?1
                WHERE id = 1
                "#,
            )
            .bind(error_msg)
            .execute(&self.pool)
            .await
        }
        .map_err(|e| {
            error!("Failed to record update outcome: {}", e);
            DatabaseError::QueryError(format!("Failed to record update outcome: {}", e))
        })?;

        Ok(())
    }

    pub async fn set_scanner_running(&self, running: bool) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE bot_status SET scanner_running = ?1 WHERE id = 1")
            .bind(running)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to set scanner status: {}", e);
                DatabaseError::QueryError(format!("Failed to set scanner status: {}", e))
            })?;
        Ok(())
    }

    pub async fn checkpoint(&self, job: &str) -> Result<SchedulerCheckpointRecord, DatabaseError> {
        sqlx::query_as::<_, SchedulerCheckpointRecord>(
            "SELECT * FROM scheduler_checkpoints WHERE job = ?1",
        )
        .bind(job)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to read checkpoint for {}: {}", job, e);
            DatabaseError::QueryError(format!("Failed to read checkpoint: {}", e))
        })
    }

    /// Persist a firing: the date it happened and the trigger time in effect.
    pub async fn save_checkpoint(
        &self,
        job: &str,
        last_execution_date: NaiveDate,
        time_config: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE scheduler_checkpoints
            SET last_execution_date = ?1, last_exec_time_config = ?2
            WHERE job = ?3
            "#,
        )
        .bind(last_execution_date)
        .bind(time_config)
        .bind(job)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save checkpoint for {}: {}", job, e);
            DatabaseError::QueryError(format!("Failed to save checkpoint: {}", e))
        })?;

        debug!("Checkpoint saved for {}: {} @ {}", job, last_execution_date, time_config);
        Ok(())
    }

    /// Clear the same-day guard after a trigger-time change so the new time
    /// can still fire today.
    pub async fn clear_checkpoint_date(&self, job: &str) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE scheduler_checkpoints SET last_execution_date = NULL WHERE job = ?1")
            .bind(job)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to clear checkpoint date for {}: {}", job, e);
                DatabaseError::QueryError(format!("Failed to clear checkpoint: {}", e))
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;

    #[tokio::test]
    async fn test_config_partial_update() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = ConfigRepository::new(pool);

        let before = repo.get().await.unwrap();
        assert_eq!(before.stop_loss_pct, 8.0);
        assert!(before.data_update_time.is_none());

        let after = repo
            .update(ConfigUpdate {
                data_update_time: Some("17:30".to_string()),
                auto_execute: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(after.data_update_time.as_deref(), Some("17:30"));
        assert!(after.auto_execute);
        // Untouched fields keep their values.
        assert_eq!(after.stop_loss_pct, 8.0);
        assert_eq!(after.max_positions, 16);
    }

    #[tokio::test]
    async fn test_update_guard_is_exclusive() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = ConfigRepository::new(pool);

        assert!(repo.try_begin_update().await.unwrap());
        // Second acquisition must fail while running.
        assert!(!repo.try_begin_update().await.unwrap());

        repo.finish_update(true, None).await.unwrap();
        let status = repo.status().await.unwrap();
        assert_eq!(status.data_update_status, "success");
        assert!(status.last_data_update.is_some());
        assert!(status.data_update_error.is_none());

        // Guard is reacquirable after a terminal state.
        assert!(repo.try_begin_update().await.unwrap());
        repo.finish_update(false, Some("broker unreachable")).await.unwrap();
        let status = repo.status().await.unwrap();
        assert_eq!(status.data_update_status, "failed");
        assert_eq!(status.data_update_error.as_deref(), Some("broker unreachable"));
    }

    #[tokio::test]
    async fn test_checkpoint_roundtrip() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = ConfigRepository::new(pool);

        let fresh = repo.checkpoint("order_execution").await.unwrap();
        assert!(fresh.last_execution_date.is_none());
        assert!(fresh.last_exec_time_config.is_none());

        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        repo.save_checkpoint("order_execution", day, "09:45").await.unwrap();

        let saved = repo.checkpoint("order_execution").await.unwrap();
        assert_eq!(saved.last_execution_date, Some(day));
        assert_eq!(saved.last_exec_time_config.as_deref(), Some("09:45"));

        repo.clear_checkpoint_date("order_execution").await.unwrap();
        let cleared = repo.checkpoint("order_execution").await.unwrap();
        assert!(cleared.last_execution_date.is_none());
        assert_eq!(cleared.last_exec_time_config.as_deref(), Some("09:45"));
    }
}
