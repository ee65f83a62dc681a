//! Position & Trade Repository
//!
//! Data access layer for open positions and the full trade history.

use super::models::*;
use super::{DatabaseError, DbPool};
use sqlx::Row;
use tracing::{debug, error, info};

/// Position repository
pub struct PositionRepository {
    pool: DbPool,
}

impl PositionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create (or replace) the open position for a symbol.
    pub async fn save(&self, position: CreatePosition) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                symbol, entry_date, entry_price, submitted_price,
                quantity, stop_loss, cost_basis, trade_id, status,
                pending_exit, exit_reason, last_updated
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'OPEN', 0, NULL, CURRENT_TIMESTAMP)
            ON CONFLICT (symbol) DO UPDATE SET
                entry_date = excluded.entry_date,
                entry_price = excluded.entry_price,
                submitted_price = excluded.submitted_price,
                quantity = excluded.quantity,
                stop_loss = excluded.stop_loss,
                cost_basis = excluded.cost_basis,
                trade_id = excluded.trade_id,
                status = 'OPEN',
                pending_exit = 0,
                exit_reason = NULL,
                last_updated = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&position.symbol)
        .bind(position.entry_date)
        .bind(position.entry_price)
        .bind(position.submitted_price)
        .bind(position.quantity)
        .bind(position.stop_loss)
        .bind(position.cost_basis)
        .bind(position.trade_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save position for {}: {}", position.symbol, e);
            DatabaseError::QueryError(format!("Failed to save position: {}", e))
        })?;

        debug!("Saved position: {}", position.symbol);
        Ok(())
    }

    /// All open positions, oldest entry first.
    pub async fn open_positions(&self) -> Result<Vec<PositionRecord>, DatabaseError> {
        sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions WHERE status = 'OPEN' ORDER BY entry_date ASC, symbol ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get open positions: {}", e);
            DatabaseError::QueryError(format!("Failed to get open positions: {}", e))
        })
    }

    pub async fn get(&self, symbol: &str) -> Result<Option<PositionRecord>, DatabaseError> {
        sqlx::query_as::<_, PositionRecord>("SELECT * FROM positions WHERE symbol = ?1")
            .bind(symbol.to_uppercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to get position {}: {}", symbol, e);
                DatabaseError::QueryError(format!("Failed to get position: {}", e))
            })
    }

    /// Open positions flagged for liquidation at the next execution pass.
    pub async fn pending_exits(&self) -> Result<Vec<PositionRecord>, DatabaseError> {
        sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions WHERE status = 'OPEN' AND pending_exit = 1 ORDER BY symbol ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get pending exits: {}", e);
            DatabaseError::QueryError(format!("Failed to get pending exits: {}", e))
        })
    }

    /// Flag a position for exit. Set by the position monitor, consumed by
    /// the execution coordinator.
    pub async fn flag_pending_exit(&self, symbol: &str, reason: &str) -> Result<bool, DatabaseError> {
        let rows = sqlx::query(
            r#"
            UPDATE positions
            SET pending_exit = 1, exit_reason = ?1, last_updated = CURRENT_TIMESTAMP
            WHERE symbol = ?2 AND status = 'OPEN'
            "#,
        )
        .bind(reason)
        .bind(symbol.to_uppercase())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to flag pending exit for {}: {}", symbol, e);
            DatabaseError::QueryError(format!("Failed to flag pending exit: {}", e))
        })?
        .rows_affected();

        Ok(rows > 0)
    }

    /// Mark a position as closed.
    pub async fn close(&self, symbol: &str) -> Result<bool, DatabaseError> {
        let rows = sqlx::query(
            r#"
            UPDATE positions
            SET status = 'CLOSED', pending_exit = 0, last_updated = CURRENT_TIMESTAMP
            WHERE symbol = ?1 AND status = 'OPEN'
            "#,
        )
        .bind(symbol.to_uppercase())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to close position {}: {}", symbol, e);
            DatabaseError::QueryError(format!("Failed to close position: {}", e))
        })?
        .rows_affected();

        if rows > 0 {
            info!("Closed position: {}", symbol);
        }
        Ok(rows > 0)
    }
}

/// Trade repository
pub struct TradeRepository {
    pool: DbPool,
}

impl TradeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create an open trade; returns the new trade id.
    pub async fn create(&self, trade: CreateTrade) -> Result<i64, DatabaseError> {
        let row = sqlx::query(
            r#"
            INSERT INTO trades (
                symbol, entry_date, entry_price, submitted_price,
                quantity, cost_basis, status
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'OPEN')
            RETURNING id
            "#,
        )
        .bind(&trade.symbol)
        .bind(trade.entry_date)
        .bind(trade.entry_price)
        .bind(trade.submitted_price)
        .bind(trade.quantity)
        .bind(trade.cost_basis)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create trade for {}: {}", trade.symbol, e);
            DatabaseError::QueryError(format!("Failed to create trade: {}", e))
        })?;

        let id: i64 = row.get("id");
        debug!("Created trade #{} for {}", id, trade.symbol);
        Ok(id)
    }

    /// Close a trade, freezing the position's stop loss onto the row so a
    /// later reopen restores the original risk parameter.
    pub async fn close(&self, trade_id: i64, close: CloseTrade) -> Result<(), DatabaseError> {
        let rows = sqlx::query(
            r#"
            UPDATE trades
            SET exit_date = ?1, exit_price = ?2, proceeds = ?3,
                pnl = ?4, pnl_pct = ?5, exit_reason = ?6,
                stop_loss = ?7, status = 'CLOSED'
            WHERE id = ?8 AND status = 'OPEN'
            "#,
        )
        .bind(close.exit_date)
        .bind(close.exit_price)
        .bind(close.proceeds)
        .bind(close.pnl)
        .bind(close.pnl_pct)
        .bind(&close.exit_reason)
        .bind(close.stop_loss)
        .bind(trade_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to close trade #{}: {}", trade_id, e);
            DatabaseError::QueryError(format!("Failed to close trade: {}", e))
        })?
        .rows_affected();

        if rows == 0 {
            return Err(DatabaseError::QueryError(format!(
                "Trade not found or already closed: {}",
                trade_id
            )));
        }

        debug!("Closed trade #{}", trade_id);
        Ok(())
    }

    pub async fn get(&self, trade_id: i64) -> Result<Option<TradeRecord>, DatabaseError> {
        sqlx::query_as::<_, TradeRecord>("SELECT * FROM trades WHERE id = ?1")
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to get trade #{}: {}", trade_id, e);
                DatabaseError::QueryError(format!("Failed to get trade: {}", e))
            })
    }

    /// Trades, optionally filtered by status, newest first.
    pub async fn list(&self, status: Option<&str>, limit: i64) -> Result<Vec<TradeRecord>, DatabaseError> {
        let records = match status {
            Some(s) => {
                sqlx::query_as::<_, TradeRecord>(
                    "SELECT * FROM trades WHERE status = ?1 ORDER BY id DESC LIMIT ?2",
                )
                .bind(s)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, TradeRecord>("SELECT * FROM trades ORDER BY id DESC LIMIT ?1")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| {
            error!("Failed to list trades: {}", e);
            DatabaseError::QueryError(format!("Failed to list trades: {}", e))
        })?;

        Ok(records)
    }

    /// Revert a mistakenly-closed trade back to OPEN.
    ///
    /// Clears the exit fields and re-inserts the position row in a single
    /// transaction, so a crash cannot leave trade and position disagreeing
    /// about open/closed state. The stop loss restored onto the position is
    /// the one frozen on the trade row at close time; `fallback_stop_loss`
    /// applies only to rows that predate stop-loss freezing (NULL).
    pub async fn reopen(
        &self,
        trade_id: i64,
        fallback_stop_loss: f64,
    ) -> Result<Option<TradeRecord>, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            DatabaseError::QueryError(format!("Failed to begin reopen transaction: {}", e))
        })?;

        let trade = sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades WHERE id = ?1 AND status = 'CLOSED'",
        )
        .bind(trade_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to fetch trade #{} for reopen: {}", trade_id, e);
            DatabaseError::QueryError(format!("Failed to fetch trade: {}", e))
        })?;

        let trade = match trade {
            Some(t) => t,
            None => return Ok(None),
        };

        let restored_stop_loss = trade.stop_loss.unwrap_or(fallback_stop_loss);

        sqlx::query(
            r#"
            UPDATE trades
            SET exit_date = NULL, exit_price = NULL, proceeds = NULL,
                pnl = NULL, pnl_pct = NULL, exit_reason = NULL,
                stop_loss = NULL, status = 'OPEN'
            WHERE id = ?1
            "#,
        )
        .bind(trade_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to clear exit fields on trade #{}: {}", trade_id, e);
            DatabaseError::QueryError(format!("Failed to reopen trade: {}", e))
        })?;

        sqlx::query(
            r#"
            INSERT INTO positions (
                symbol, entry_date, entry_price, submitted_price,
                quantity, stop_loss, cost_basis, trade_id, status,
                pending_exit, exit_reason, last_updated
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'OPEN', 0, NULL, CURRENT_TIMESTAMP)
            ON CONFLICT (symbol) DO UPDATE SET
                entry_date = excluded.entry_date,
                entry_price = excluded.entry_price,
                submitted_price = excluded.submitted_price,
                quantity = excluded.quantity,
                stop_loss = excluded.stop_loss,
                cost_basis = excluded.cost_basis,
                trade_id = excluded.trade_id,
                status = 'OPEN',
                pending_exit = 0,
                exit_reason = NULL,
                last_updated = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&trade.symbol)
        .bind(trade.entry_date)
        .bind(trade.entry_price)
        .bind(trade.submitted_price)
        .bind(trade.quantity)
        .bind(restored_stop_loss)
        .bind(trade.cost_basis)
        .bind(trade_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to re-insert position for trade #{}: {}", trade_id, e);
            DatabaseError::QueryError(format!("Failed to reopen position: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            DatabaseError::QueryError(format!("Failed to commit reopen transaction: {}", e))
        })?;

        info!("Reopened trade #{} ({})", trade_id, trade.symbol);
        Ok(Some(trade))
    }

    /// Aggregate performance over closed trades plus open exposure.
    pub async fn statistics(&self) -> Result<Statistics, DatabaseError> {
        let closed = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total_trades,
                COALESCE(SUM(CASE WHEN pnl > 0 THEN 1 ELSE 0 END), 0) as wins,
                COALESCE(SUM(CASE WHEN pnl < 0 THEN 1 ELSE 0 END), 0) as losses,
                COALESCE(SUM(pnl), 0.0) as total_pnl,
                COALESCE(AVG(pnl), 0.0) as avg_pnl,
                COALESCE(MAX(pnl), 0.0) as max_win,
                COALESCE(MIN(pnl), 0.0) as max_loss
            FROM trades
            WHERE status = 'CLOSED'
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to compute trade statistics: {}", e);
            DatabaseError::QueryError(format!("Failed to compute statistics: {}", e))
        })?;

        let open = sqlx::query(
            r#"
            SELECT COUNT(*) as open_positions,
                   COALESCE(SUM(cost_basis), 0.0) as total_invested
            FROM positions
            WHERE status = 'OPEN'
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to compute position statistics: {}", e);
            DatabaseError::QueryError(format!("Failed to compute statistics: {}", e))
        })?;

        let total_trades: i64 = closed.get("total_trades");
        let wins: i64 = closed.get("wins");

        Ok(Statistics {
            total_trades,
            wins,
            losses: closed.get("losses"),
            win_rate: if total_trades > 0 {
                wins as f64 / total_trades as f64 * 100.0
            } else {
                0.0
            },
            total_pnl: closed.get("total_pnl"),
            avg_pnl: closed.get("avg_pnl"),
            max_win: closed.get("max_win"),
            max_loss: closed.get("max_loss"),
            open_positions: open.get("open_positions"),
            total_invested: open.get("total_invested"),
        })
    }
}
