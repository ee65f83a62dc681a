//! Buy-Candidate Selection
//!
//! Pluggable strategy deciding which qualified symbols the execution
//! coordinator may buy. The default draws from today's scan; the A/B cohort
//! strategy draws Group B rows from the prior session and requires a fresh
//! re-verification before any money moves. Swapping strategies never alters
//! the coordinator's exit-then-buy contract.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::info;

use crate::domain::errors::ExecutionError;
use crate::persistence::models::BotConfigRecord;
use crate::persistence::scan_repository::ScanRepository;
use crate::persistence::DbPool;

/// One symbol eligible for a buy this pass.
#[derive(Debug, Clone)]
pub struct BuyCandidate {
    pub symbol: String,
    pub scan_date: NaiveDate,
    /// Previous session's close from the scan row.
    pub prev_close: f64,
    /// Per-symbol entry method override, if the operator set one.
    pub entry_method: Option<String>,
    pub ab_group: Option<String>,
    /// Cohort candidates must pass a fresh qualification check and the
    /// gap-up guard immediately before buying.
    pub reverify: bool,
}

#[async_trait]
pub trait CandidateSelection: Send + Sync {
    async fn buy_candidates(
        &self,
        db: &DbPool,
        open_symbols: &HashSet<String>,
    ) -> Result<Vec<BuyCandidate>, ExecutionError>;
}

/// Default mode: today's qualified, non-overridden, not-already-held rows.
pub struct DailyScanSelection {
    pub today: NaiveDate,
}

#[async_trait]
impl CandidateSelection for DailyScanSelection {
    async fn buy_candidates(
        &self,
        db: &DbPool,
        open_symbols: &HashSet<String>,
    ) -> Result<Vec<BuyCandidate>, ExecutionError> {
        let rows = ScanRepository::new(db.clone()).latest_results().await?;
        Ok(rows
            .into_iter()
            .filter(|r| {
                r.qualified
                    && !r.override_flag
                    && r.scan_date == self.today
                    && !open_symbols.contains(&r.symbol)
            })
            .map(|r| BuyCandidate {
                symbol: r.symbol,
                scan_date: r.scan_date,
                prev_close: r.price,
                entry_method: r.entry_method,
                ab_group: r.ab_group,
                reverify: false,
            })
            .collect())
    }
}

/// A/B mode: Group B rows tagged during the prior session, re-verified
/// fresh before buying.
pub struct CohortSelection {
    pub session_date: NaiveDate,
}

#[async_trait]
impl CandidateSelection for CohortSelection {
    async fn buy_candidates(
        &self,
        db: &DbPool,
        open_symbols: &HashSet<String>,
    ) -> Result<Vec<BuyCandidate>, ExecutionError> {
        let rows = ScanRepository::new(db.clone())
            .group_b_candidates(self.session_date)
            .await?;
        info!(
            "A/B SOD: {} Group B candidates from {}",
            rows.len(),
            self.session_date
        );
        Ok(rows
            .into_iter()
            .filter(|r| !open_symbols.contains(&r.symbol))
            .map(|r| BuyCandidate {
                symbol: r.symbol,
                scan_date: r.scan_date,
                prev_close: r.price,
                entry_method: r.entry_method,
                ab_group: r.ab_group,
                reverify: true,
            })
            .collect())
    }
}

/// Strategy for the start-of-day pass, per runtime config.
pub fn sod_selection(config: &BotConfigRecord, today: NaiveDate) -> Box<dyn CandidateSelection> {
    if config.ab_test_enabled {
        Box::new(CohortSelection {
            session_date: today - chrono::Duration::days(1),
        })
    } else {
        Box::new(DailyScanSelection { today })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;
    use crate::persistence::models::ScanResultRecord;

    fn scan_row(symbol: &str, day: NaiveDate, qualified: bool) -> ScanResultRecord {
        ScanResultRecord {
            scan_date: day,
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
            action: "BUY_AT_OPEN".to_string(),
            override_flag: false,
            entry_method: None,
            in_portfolio: false,
            ab_group: None,
            eod_buy_pending: false,
            sod_skip_reason: None,
        }
    }

    #[tokio::test]
    async fn test_daily_selection_filters_held_and_unqualified() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = ScanRepository::new(pool.clone());
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        repo.upsert_result(&scan_row("AAA", day, true)).await.unwrap();
        repo.upsert_result(&scan_row("BBB", day, true)).await.unwrap();
        repo.upsert_result(&scan_row("CCC", day, false)).await.unwrap();
        let mut overridden = scan_row("DDD", day, true);
        overridden.override_flag = true;
        repo.upsert_result(&overridden).await.unwrap();

        let held: HashSet<String> = ["BBB".to_string()].into_iter().collect();
        let selection = DailyScanSelection { today: day };
        let candidates = selection.buy_candidates(&pool, &held).await.unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].symbol, "AAA");
        assert!(!candidates[0].reverify);
    }

    #[tokio::test]
    async fn test_daily_selection_ignores_stale_scan_dates() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = ScanRepository::new(pool.clone());
        let yesterday = NaiveDate::from_ymd_opt(2024, 1, 14).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        repo.upsert_result(&scan_row("AAA", yesterday, true)).await.unwrap();

        let selection = DailyScanSelection { today };
        let candidates = selection.buy_candidates(&pool, &HashSet::new()).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_cohort_selection_requires_reverify() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = ScanRepository::new(pool.clone());
        let yesterday = NaiveDate::from_ymd_opt(2024, 1, 14).unwrap();

        let mut b = scan_row("BBB", yesterday, true);
        b.ab_group = Some("B".to_string());
        repo.upsert_result(&b).await.unwrap();
        let mut a = scan_row("AAA", yesterday, true);
        a.ab_group = Some("A".to_string());
        repo.upsert_result(&a).await.unwrap();

        let selection = CohortSelection { session_date: yesterday };
        let candidates = selection.buy_candidates(&pool, &HashSet::new()).await.unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].symbol, "BBB");
        assert!(candidates[0].reverify);
    }
}
