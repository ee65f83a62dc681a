//! Market Data Repository
//!
//! Data access for the tracked-instrument universe and daily bar history.

use super::models::{BarRecord, InstrumentRecord};
use super::{DatabaseError, DbPool};
use crate::domain::entities::bar::DailyBar;
use chrono::NaiveDate;
use tracing::{debug, error};

/// Instrument universe repository
pub struct InstrumentRepository {
    pool: DbPool,
}

impl InstrumentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Add a symbol to the universe, reactivating it if it was soft-deleted.
    pub async fn add(
        &self,
        symbol: &str,
        name: Option<&str>,
        sector: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let symbol = symbol.to_uppercase();
        sqlx::query(
            r#"
            INSERT INTO instruments (symbol, name, sector, active)
            VALUES (?1, ?2, ?3, 1)
            ON CONFLICT (symbol) DO UPDATE
                SET active = 1,
                    name = COALESCE(excluded.name, instruments.name),
                    sector = COALESCE(excluded.sector, instruments.sector)
            "#,
        )
        .bind(&symbol)
        .bind(name)
        .bind(sector)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to add instrument {}: {}", symbol, e);
            DatabaseError::QueryError(format!("Failed to add instrument: {}", e))
        })?;

        debug!("Added instrument: {}", symbol);
        Ok(())
    }

    /// Soft-delete: the symbol and its bar history are retained.
    pub async fn deactivate(&self, symbol: &str) -> Result<bool, DatabaseError> {
        let rows = sqlx::query("UPDATE instruments SET active = 0 WHERE symbol = ?1")
            .bind(symbol.to_uppercase())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to deactivate instrument {}: {}", symbol, e);
                DatabaseError::QueryError(format!("Failed to deactivate instrument: {}", e))
            })?
            .rows_affected();

        Ok(rows > 0)
    }

    /// Active symbols in ascending order. The update runner relies on this
    /// ordering for deterministic, rate-limit-friendly pacing.
    pub async fn active_symbols(&self) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT symbol FROM instruments WHERE active = 1 ORDER BY symbol ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to list active instruments: {}", e);
                    DatabaseError::QueryError(format!("Failed to list instruments: {}", e))
                })?;

        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    pub async fn all(&self) -> Result<Vec<InstrumentRecord>, DatabaseError> {
        sqlx::query_as::<_, InstrumentRecord>("SELECT * FROM instruments ORDER BY symbol ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to list instruments: {}", e);
                DatabaseError::QueryError(format!("Failed to list instruments: {}", e))
            })
    }
}

/// Daily bar repository
pub struct BarRepository {
    pool: DbPool,
}

impl BarRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Upsert bars by (symbol, trading_date). A later fetch overwrites
    /// same-date values. Returns the number of bars written.
    pub async fn upsert_bars(&self, symbol: &str, bars: &[DailyBar]) -> Result<u64, DatabaseError> {
        let symbol = symbol.to_uppercase();
        let mut written = 0u64;

        for bar in bars {
            sqlx::query(
                r#"
                INSERT INTO daily_bars (symbol, trading_date, open, high, low, close, volume)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT (symbol, trading_date) DO UPDATE
                    SET open = excluded.open,
                        high = excluded.high,
                        low = excluded.low,
                        close = excluded.close,
                        volume = excluded.volume
                "#,
            )
            .bind(&symbol)
            .bind(bar.trading_date)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to save bar for {} on {}: {}", symbol, bar.trading_date, e);
                DatabaseError::QueryError(format!("Failed to save bar: {}", e))
            })?;
            written += 1;
        }

        debug!("Saved {} bars for {}", written, symbol);
        Ok(written)
    }

    /// The most recent `limit` bars for a symbol, oldest first.
    pub async fn bars(&self, symbol: &str, limit: i64) -> Result<Vec<DailyBar>, DatabaseError> {
        let mut records = sqlx::query_as::<_, BarRecord>(
            r#"
            SELECT * FROM daily_bars
            WHERE symbol = ?1
            ORDER BY trading_date DESC
            LIMIT ?2
            "#,
        )
        .bind(symbol.to_uppercase())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get bars for {}: {}", symbol, e);
            DatabaseError::QueryError(format!("Failed to get bars: {}", e))
        })?;

        records.reverse();
        Ok(records.into_iter().map(DailyBar::from).collect())
    }

    /// Date of the newest stored bar, or `None` if the symbol was never fetched.
    pub async fn latest_bar_date(&self, symbol: &str) -> Result<Option<NaiveDate>, DatabaseError> {
        let row: Option<(NaiveDate,)> = sqlx::query_as(
            "SELECT trading_date FROM daily_bars WHERE symbol = ?1 ORDER BY trading_date DESC LIMIT 1",
        )
        .bind(symbol.to_uppercase())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get latest bar date for {}: {}", symbol, e);
            DatabaseError::QueryError(format!("Failed to get latest bar date: {}", e))
        })?;

        Ok(row.map(|(d,)| d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;

    fn bar(y: i32, m: u32, d: u32, close: f64) -> DailyBar {
        DailyBar::new(
            NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            close - 1.0,
            close + 1.0,
            close - 2.0,
            close,
            1_000_000,
        )
    }

    #[tokio::test]
    async fn test_instrument_lifecycle() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = InstrumentRepository::new(pool);

        repo.add("nvda", Some("NVIDIA Corp"), Some("Technology")).await.unwrap();
        repo.add("AAPL", None, None).await.unwrap();

        // Symbols are upper-cased and sorted.
        assert_eq!(repo.active_symbols().await.unwrap(), vec!["AAPL", "NVDA"]);

        assert!(repo.deactivate("NVDA").await.unwrap());
        assert_eq!(repo.active_symbols().await.unwrap(), vec!["AAPL"]);

        // Soft delete: re-adding reactivates, history intact.
        repo.add("NVDA", None, None).await.unwrap();
        assert_eq!(repo.active_symbols().await.unwrap(), vec!["AAPL", "NVDA"]);
        let nvda = repo
            .all()
            .await
            .unwrap()
            .into_iter()
            .find(|i| i.symbol == "NVDA")
            .unwrap();
        assert_eq!(nvda.name.as_deref(), Some("NVIDIA Corp"));
    }

    #[tokio::test]
    async fn test_bar_upsert_overwrites_same_date() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = BarRepository::new(pool);

        repo.upsert_bars("XYZ", &[bar(2024, 1, 10, 50.0)]).await.unwrap();
        repo.upsert_bars("XYZ", &[bar(2024, 1, 10, 51.5), bar(2024, 1, 11, 52.0)])
            .await
            .unwrap();

        let bars = repo.bars("XYZ", 300).await.unwrap();
        assert_eq!(bars.len(), 2);
        // Oldest first, and the re-fetched Jan 10 bar overwrote the first write.
        assert_eq!(bars[0].close, 51.5);
        assert_eq!(bars[1].close, 52.0);

        assert_eq!(
            repo.latest_bar_date("XYZ").await.unwrap(),
            Some(NaiveDate::from_ymd_opt(2024, 1, 11).unwrap())
        );
        assert_eq!(repo.latest_bar_date("NOPE").await.unwrap(), None);
    }
}
