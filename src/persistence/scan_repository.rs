//! Scan Result Repository
//!
//! Data access for qualification-pass results, including the A/B cohort
//! fields consumed by the execution coordinator.

use super::models::ScanResultRecord;
use super::{DatabaseError, DbPool};
use chrono::NaiveDate;
use tracing::{debug, error};

pub struct ScanRepository {
    pool: DbPool,
}

impl ScanRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Upsert one scan result by (scan_date, symbol). Operator-set fields
    /// (override, entry method, cohort tags) survive a re-scan of the same day.
    pub async fn upsert_result(&self, r: &ScanResultRecord) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO scan_results (
                scan_date, symbol, price, week_52_high, week_52_low,
                ma_50, ma_150, ma_200, ma_200_1m_ago, volume, avg_volume_50,
                criteria_1, criteria_2, criteria_3, criteria_4,
                criteria_5, criteria_6, criteria_7, criteria_8,
                qualified, action, override_flag, entry_method, in_portfolio,
                ab_group, eod_buy_pending, sod_skip_reason
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                    ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24,
                    ?25, ?26, ?27)
            ON CONFLICT (scan_date, symbol) DO UPDATE SET
                price = excluded.price,
                week_52_high = excluded.week_52_high,
                week_52_low = excluded.week_52_low,
                ma_50 = excluded.ma_50,
                ma_150 = excluded.ma_150,
                ma_200 = excluded.ma_200,
                ma_200_1m_ago = excluded.ma_200_1m_ago,
                volume = excluded.volume,
                avg_volume_50 = excluded.avg_volume_50,
                criteria_1 = excluded.criteria_1,
                criteria_2 = excluded.criteria_2,
                criteria_3 = excluded.criteria_3,
                criteria_4 = excluded.criteria_4,
                criteria_5 = excluded.criteria_5,
                criteria_6 = excluded.criteria_6,
                criteria_7 = excluded.criteria_7,
                criteria_8 = excluded.criteria_8,
                qualified = excluded.qualified,
                action = excluded.action
            "#,
        )
        .bind(r.scan_date)
        .bind(&r.symbol)
        .bind(r.price)
        .bind(r.week_52_high)
        .bind(r.week_52_low)
        .bind(r.ma_50)
        .bind(r.ma_150)
        .bind(r.ma_200)
        .bind(r.ma_200_1m_ago)
        .bind(r.volume)
        .bind(r.avg_volume_50)
        .bind(r.criteria_1)
        .bind(r.criteria_2)
        .bind(r.criteria_3)
        .bind(r.criteria_4)
        .bind(r.criteria_5)
        .bind(r.criteria_6)
        .bind(r.criteria_7)
        .bind(r.criteria_8)
        .bind(r.qualified)
        .bind(&r.action)
        .bind(r.override_flag)
        .bind(&r.entry_method)
        .bind(r.in_portfolio)
        .bind(&r.ab_group)
        .bind(r.eod_buy_pending)
        .bind(&r.sod_skip_reason)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save scan result for {}: {}", r.symbol, e);
            DatabaseError::QueryError(format!("Failed to save scan result: {}", e))
        })?;

        Ok(())
    }

    /// All results from the most recent scan date.
    pub async fn latest_results(&self) -> Result<Vec<ScanResultRecord>, DatabaseError> {
        sqlx::query_as::<_, ScanResultRecord>(
            r#"
            SELECT * FROM scan_results
            WHERE scan_date = (SELECT MAX(scan_date) FROM scan_results)
            ORDER BY symbol ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get latest scan results: {}", e);
            DatabaseError::QueryError(format!("Failed to get scan results: {}", e))
        })
    }

    /// Qualified, non-overridden Group B rows from `scan_date` (SOD cohort).
    pub async fn group_b_candidates(
        &self,
        scan_date: NaiveDate,
    ) -> Result<Vec<ScanResultRecord>, DatabaseError> {
        sqlx::query_as::<_, ScanResultRecord>(
            r#"
            SELECT * FROM scan_results
            WHERE scan_date = ?1 AND ab_group = 'B'
              AND qualified = 1 AND override_flag = 0
            ORDER BY symbol ASC
            "#,
        )
        .bind(scan_date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get group B candidates: {}", e);
            DatabaseError::QueryError(format!("Failed to get group B candidates: {}", e))
        })
    }

    /// Group A rows still flagged for an end-of-day buy.
    pub async fn eod_buy_candidates(&self) -> Result<Vec<ScanResultRecord>, DatabaseError> {
        sqlx::query_as::<_, ScanResultRecord>(
            r#"
            SELECT * FROM scan_results
            WHERE eod_buy_pending = 1 AND qualified = 1 AND override_flag = 0
            ORDER BY symbol ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get EOD buy candidates: {}", e);
            DatabaseError::QueryError(format!("Failed to get EOD candidates: {}", e))
        })
    }

    pub async fn clear_eod_buy_pending(
        &self,
        symbol: &str,
        scan_date: NaiveDate,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE scan_results SET eod_buy_pending = 0 WHERE symbol = ?1 AND scan_date = ?2",
        )
        .bind(symbol)
        .bind(scan_date)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to clear EOD pending for {}: {}", symbol, e);
            DatabaseError::QueryError(format!("Failed to clear EOD pending: {}", e))
        })?;
        Ok(())
    }

    /// Record why a cohort candidate was skipped at start-of-day.
    pub async fn mark_sod_skip(
        &self,
        symbol: &str,
        scan_date: NaiveDate,
        reason: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE scan_results SET sod_skip_reason = ?1 WHERE symbol = ?2 AND scan_date = ?3",
        )
        .bind(reason)
        .bind(symbol)
        .bind(scan_date)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to mark SOD skip for {}: {}", symbol, e);
            DatabaseError::QueryError(format!("Failed to mark SOD skip: {}", e))
        })?;

        debug!("Marked SOD skip for {}: {}", symbol, reason);
        Ok(())
    }

    /// Flip a symbol's manual override across its most recent scan row.
    pub async fn set_override(&self, symbol: &str, override_flag: bool) -> Result<bool, DatabaseError> {
        let rows = sqlx::query(
            r#"
            UPDATE scan_results SET override_flag = ?1
            WHERE symbol = ?2
              AND scan_date = (SELECT MAX(scan_date) FROM scan_results)
            "#,
        )
        .bind(override_flag)
        .bind(symbol)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to set override for {}: {}", symbol, e);
            DatabaseError::QueryError(format!("Failed to set override: {}", e))
        })?
        .rows_affected();

        Ok(rows > 0)
    }

    pub async fn set_entry_method(&self, symbol: &str, entry_method: &str) -> Result<bool, DatabaseError> {
        let rows = sqlx::query(
            r#"
            UPDATE scan_results SET entry_method = ?1
            WHERE symbol = ?2
              AND scan_date = (SELECT MAX(scan_date) FROM scan_results)
            "#,
        )
        .bind(entry_method)
        .bind(symbol)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to set entry method for {}: {}", symbol, e);
            DatabaseError::QueryError(format!("Failed to set entry method: {}", e))
        })?
        .rows_affected();

        Ok(rows > 0)
    }

    /// Keep the scanner view in sync with the portfolio after a buy or exit.
    pub async fn set_portfolio_flag(&self, symbol: &str, in_portfolio: bool) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE scan_results SET in_portfolio = ?1
            WHERE symbol = ?2
              AND scan_date = (SELECT MAX(scan_date) FROM scan_results)
            "#,
        )
        .bind(in_portfolio)
        .bind(symbol)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to set portfolio flag for {}: {}", symbol, e);
            DatabaseError::QueryError(format!("Failed to set portfolio flag: {}", e))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;

    fn result(symbol: &str, scan_date: NaiveDate, qualified: bool) -> ScanResultRecord {
        ScanResultRecord {
            scan_date,
            symbol: symbol.to_string(),
            price: 50.0,
            week_52_high: 55.0,
            week_52_low: 30.0,
            ma_50: 48.0,
            ma_150: 45.0,
            ma_200: 42.0,
            ma_200_1m_ago: 41.0,
            volume: 2_000_000,
            avg_volume_50: 1_000_000,
            criteria_1: qualified,
            criteria_2: qualified,
            criteria_3: qualified,
            criteria_4: qualified,
            criteria_5: qualified,
            criteria_6: qualified,
            criteria_7: qualified,
            criteria_8: qualified,
            qualified,
            action: if qualified { "BUY_AT_OPEN" } else { "PASS" }.to_string(),
            override_flag: false,
            entry_method: None,
            in_portfolio: false,
            ab_group: None,
            eod_buy_pending: false,
            sod_skip_reason: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_preserves_operator_fields() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = ScanRepository::new(pool);
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        repo.upsert_result(&result("XYZ", day, true)).await.unwrap();
        repo.set_override("XYZ", true).await.unwrap();

        // Re-scan of the same day must not clobber the operator override.
        repo.upsert_result(&result("XYZ", day, false)).await.unwrap();

        let rows = repo.latest_results().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].qualified);
        assert!(rows[0].override_flag);
    }

    #[tokio::test]
    async fn test_cohort_queries() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = ScanRepository::new(pool);
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        let mut a = result("AAA", day, true);
        a.ab_group = Some("A".to_string());
        a.eod_buy_pending = true;
        let mut b = result("BBB", day, true);
        b.ab_group = Some("B".to_string());
        repo.upsert_result(&a).await.unwrap();
        repo.upsert_result(&b).await.unwrap();

        let group_b = repo.group_b_candidates(day).await.unwrap();
        assert_eq!(group_b.len(), 1);
        assert_eq!(group_b[0].symbol, "BBB");

        let eod = repo.eod_buy_candidates().await.unwrap();
        assert_eq!(eod.len(), 1);
        assert_eq!(eod[0].symbol, "AAA");

        repo.clear_eod_buy_pending("AAA", day).await.unwrap();
        assert!(repo.eod_buy_candidates().await.unwrap().is_empty());

        repo.mark_sod_skip("BBB", day, "GAP_UP_EXCESSIVE").await.unwrap();
        let rows = repo.latest_results().await.unwrap();
        let bbb = rows.iter().find(|r| r.symbol == "BBB").unwrap();
        assert_eq!(bbb.sod_skip_reason.as_deref(), Some("GAP_UP_EXCESSIVE"));
    }
}
