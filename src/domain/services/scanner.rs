//! Momentum Scanner
//!
//! Scans the tracked universe for breakout setups using an 8-criteria
//! trend-template methodology:
//!
//! 1. Price within 5% of the 52-week high
//! 2. Price above the 50-day MA
//! 3. 50-day MA above the 150-day MA
//! 4. 150-day MA above the 200-day MA
//! 5. 200-day MA trending up (vs ~1 month ago)
//! 6. Price at least 30% above the 52-week low
//! 7. Breakout on above-average volume (1.5x the 50-day average)
//! 8. SPY above its own 50-day MA (market health)
//!
//! Historical bars always come from the database; only live prices are
//! fetched from the broker, in one batch round-trip per pass. The 52-week
//! range uses the last 250 trading bars rather than calendar-year
//! boundaries (trading-day convention).

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::entities::bar::DailyBar;
use crate::domain::repositories::broker_client::BrokerClient;
use crate::domain::services::trigger_clock::today_exchange;
use crate::persistence::config_repository::ConfigRepository;
use crate::persistence::market_data_repository::{BarRepository, InstrumentRepository};
use crate::persistence::models::{BotConfigRecord, ScanResultRecord};
use crate::persistence::scan_repository::ScanRepository;
use crate::persistence::{DatabaseError, DbPool};

/// Bars required before a symbol can be evaluated at all.
pub const MIN_BARS: usize = 250;
/// Trading-bar window approximating 52 weeks.
const RANGE_BARS: usize = 250;
/// Trading-day offset approximating one month, for the MA200 trend check.
const MA200_SHIFT: usize = 22;

/// Tunable criteria thresholds, read from the runtime config each pass.
#[derive(Debug, Clone)]
pub struct CriteriaThresholds {
    pub near_52wh_pct: f64,
    pub above_52wl_pct: f64,
    pub volume_multiplier: f64,
}

impl From<&BotConfigRecord> for CriteriaThresholds {
    fn from(c: &BotConfigRecord) -> Self {
        Self {
            near_52wh_pct: c.near_52wh_pct,
            above_52wl_pct: c.above_52wl_pct,
            volume_multiplier: c.volume_multiplier,
        }
    }
}

/// Outcome of evaluating the eight criteria for one symbol.
#[derive(Debug, Clone)]
pub struct CriteriaReport {
    pub week_52_high: f64,
    pub week_52_low: f64,
    pub ma_50: f64,
    pub ma_150: f64,
    pub ma_200: f64,
    pub ma_200_1m_ago: f64,
    pub avg_volume_50: i64,
    pub criteria: [bool; 8],
    pub qualified: bool,
}

/// Simple moving average over the trailing `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period || period == 0 {
        return None;
    }
    Some(values[values.len() - period..].iter().sum::<f64>() / period as f64)
}

/// Evaluate all eight criteria against stored bars (oldest first) and the
/// current price/volume. Returns `None` when there is not enough history.
pub fn evaluate_criteria(
    bars: &[DailyBar],
    current_price: f64,
    current_volume: i64,
    spy_qualified: bool,
    t: &CriteriaThresholds,
) -> Option<CriteriaReport> {
    if bars.len() < MIN_BARS {
        return None;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<i64> = bars.iter().map(|b| b.volume).collect();

    let range = &bars[bars.len() - RANGE_BARS.min(bars.len())..];
    let week_52_high = range.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let week_52_low = range.iter().map(|b| b.low).fold(f64::MAX, f64::min);

    let ma_50 = sma(&closes, 50)?;
    let ma_150 = sma(&closes, 150)?;
    let ma_200 = sma(&closes, 200)?;
    let ma_200_1m_ago = if closes.len() >= 200 + MA200_SHIFT {
        sma(&closes[..closes.len() - MA200_SHIFT], 200)?
    } else {
        return None;
    };

    let avg_volume_50 = if volumes.len() >= 50 {
        volumes[volumes.len() - 50..].iter().sum::<i64>() / 50
    } else {
        0
    };

    let criteria = [
        current_price >= week_52_high * (1.0 - t.near_52wh_pct / 100.0),
        current_price > ma_50,
        ma_50 > ma_150,
        ma_150 > ma_200,
        ma_200 > ma_200_1m_ago,
        current_price >= week_52_low * (1.0 + t.above_52wl_pct / 100.0),
        avg_volume_50 > 0 && current_volume as f64 >= avg_volume_50 as f64 * t.volume_multiplier,
        spy_qualified,
    ];

    Some(CriteriaReport {
        week_52_high,
        week_52_low,
        ma_50,
        ma_150,
        ma_200,
        ma_200_1m_ago,
        avg_volume_50,
        criteria,
        qualified: criteria.iter().all(|c| *c),
    })
}

/// Scans stored bar history against the 8-criteria methodology.
pub struct MomentumScanner {
    pool: DbPool,
    broker: Arc<dyn BrokerClient>,
}

impl MomentumScanner {
    pub fn new(pool: DbPool, broker: Arc<dyn BrokerClient>) -> Self {
        Self { pool, broker }
    }

    /// Criterion #8: SPY above its own 50-day MA, from stored bars.
    /// Always true when the market-health filter is disabled in config.
    pub async fn spy_health(&self, config: &BotConfigRecord) -> bool {
        if !config.spy_filter_enabled {
            return true;
        }

        let bars = match BarRepository::new(self.pool.clone()).bars("SPY", 60).await {
            Ok(b) => b,
            Err(e) => {
                warn!("Could not load SPY bars for market health check: {}", e);
                return false;
            }
        };
        if bars.len() < 50 {
            warn!("Insufficient SPY data for market health check ({} bars)", bars.len());
            return false;
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let spy_price = *closes.last().unwrap_or(&0.0);
        let spy_ma_50 = match sma(&closes, 50) {
            Some(v) => v,
            None => return false,
        };
        if spy_price <= 0.0 {
            warn!("SPY price is 0, treating market as unhealthy");
            return false;
        }

        let healthy = spy_price > spy_ma_50;
        info!(
            "SPY: {:.2} | 50-day MA: {:.2} | market {}",
            spy_price,
            spy_ma_50,
            if healthy { "HEALTHY" } else { "UNHEALTHY" }
        );
        healthy
    }

    /// Scan every active symbol, persist the results, and return them.
    ///
    /// Live prices come from one batch broker round-trip; symbols without a
    /// live quote fall back to their latest stored close. Volume is always
    /// the latest stored daily volume (intraday volume is not meaningful for
    /// the daily breakout criterion).
    pub async fn scan_universe(&self) -> Result<Vec<ScanResultRecord>, DatabaseError> {
        let config = ConfigRepository::new(self.pool.clone()).get().await?;
        let thresholds = CriteriaThresholds::from(&config);

        let spy_ok = self.spy_health(&config).await;
        if !spy_ok {
            warn!("SPY is below its 50-day MA: no symbol will qualify this pass");
        }

        let symbols = InstrumentRepository::new(self.pool.clone()).active_symbols().await?;
        if symbols.is_empty() {
            warn!("No active instruments to scan");
            return Ok(Vec::new());
        }

        info!("Scanning {} instruments...", symbols.len());

        let live_prices: HashMap<String, f64> = if self.broker.is_connected().await {
            match self.broker.fetch_prices(&symbols).await {
                Ok(p) => {
                    info!("Got live prices for {}/{} symbols", p.len(), symbols.len());
                    p
                }
                Err(e) => {
                    warn!("Batch price fetch failed, falling back to stored closes: {}", e);
                    HashMap::new()
                }
            }
        } else {
            warn!("Broker not connected, using stored closing prices");
            HashMap::new()
        };

        let bar_repo = BarRepository::new(self.pool.clone());
        let scan_repo = ScanRepository::new(self.pool.clone());
        let scan_date = today_exchange();
        let mut results = Vec::with_capacity(symbols.len());

        for symbol in &symbols {
            let bars = match bar_repo.bars(symbol, 300).await {
                Ok(b) => b,
                Err(e) => {
                    warn!("Could not load bars for {}: {}", symbol, e);
                    results.push(failed_result(symbol, scan_date, "No data"));
                    continue;
                }
            };

            let current_volume = bars.last().map(|b| b.volume).unwrap_or(0);
            let current_price = match live_prices.get(symbol) {
                Some(p) if p.is_finite() && *p > 0.0 => *p,
                _ => bars.last().map(|b| b.close).unwrap_or(0.0),
            };

            if current_price <= 0.0 {
                results.push(failed_result(symbol, scan_date, "Invalid price"));
                continue;
            }

            let record = match evaluate_criteria(&bars, current_price, current_volume, spy_ok, &thresholds) {
                Some(report) => {
                    let mut r = report_to_record(symbol, scan_date, current_price, current_volume, &report);
                    if config.ab_test_enabled && r.qualified {
                        let group = cohort_group(symbol);
                        r.eod_buy_pending = group == "A";
                        r.ab_group = Some(group.to_string());
                    }
                    r
                }
                None => failed_result(symbol, scan_date, "Insufficient data"),
            };

            if record.qualified {
                info!("{} QUALIFIED: all 8 criteria met", symbol);
            }
            scan_repo.upsert_result(&record).await?;
            results.push(record);
        }

        let qualified = results.iter().filter(|r| r.qualified).count();
        info!("Scan complete: {}/{} symbols qualified", qualified, results.len());

        Ok(results)
    }

    /// Re-run the full qualification predicate for one symbol, fresh.
    /// Used to re-verify cohort candidates immediately before buying.
    pub async fn rescan_single(&self, symbol: &str) -> Result<bool, DatabaseError> {
        let config = ConfigRepository::new(self.pool.clone()).get().await?;
        let thresholds = CriteriaThresholds::from(&config);
        let spy_ok = self.spy_health(&config).await;

        let bars = BarRepository::new(self.pool.clone()).bars(symbol, 300).await?;
        let current_volume = bars.last().map(|b| b.volume).unwrap_or(0);

        let live = match self.broker.fetch_price(symbol).await {
            Ok(Some(p)) if p.is_finite() && p > 0.0 => Some(p),
            _ => None,
        };
        let current_price = live.or_else(|| bars.last().map(|b| b.close)).unwrap_or(0.0);
        if current_price <= 0.0 {
            return Ok(false);
        }

        Ok(
            evaluate_criteria(&bars, current_price, current_volume, spy_ok, &thresholds)
                .map(|r| r.qualified)
                .unwrap_or(false),
        )
    }
}

/// Stable cohort assignment: the same symbol always lands in the same group.
fn cohort_group(symbol: &str) -> &'static str {
    let sum: u32 = symbol.bytes().map(u32::from).sum();
    if sum % 2 == 0 {
        "A"
    } else {
        "B"
    }
}

fn report_to_record(
    symbol: &str,
    scan_date: chrono::NaiveDate,
    price: f64,
    volume: i64,
    report: &CriteriaReport,
) -> ScanResultRecord {
    ScanResultRecord {
        scan_date,
        symbol: symbol.to_string(),
        price,
        week_52_high: report.week_52_high,
        week_52_low: report.week_52_low,
        ma_50: report.ma_50,
        ma_150: report.ma_150,
        ma_200: report.ma_200,
        ma_200_1m_ago: report.ma_200_1m_ago,
        volume,
        avg_volume_50: report.avg_volume_50,
        criteria_1: report.criteria[0],
        criteria_2: report.criteria[1],
        criteria_3: report.criteria[2],
        criteria_4: report.criteria[3],
        criteria_5: report.criteria[4],
        criteria_6: report.criteria[5],
        criteria_7: report.criteria[6],
        criteria_8: report.criteria[7],
        qualified: report.qualified,
        action: if report.qualified { "BUY_AT_OPEN" } else { "PASS" }.to_string(),
        override_flag: false,
        entry_method: None,
        in_portfolio: false,
        ab_group: None,
        eod_buy_pending: false,
        sod_skip_reason: None,
    }
}

fn failed_result(symbol: &str, scan_date: chrono::NaiveDate, reason: &str) -> ScanResultRecord {
    ScanResultRecord {
        scan_date,
        symbol: symbol.to_string(),
        price: 0.0,
        week_52_high: 0.0,
        week_52_low: 0.0,
        ma_50: 0.0,
        ma_150: 0.0,
        ma_200: 0.0,
        ma_200_1m_ago: 0.0,
        volume: 0,
        avg_volume_50: 0,
        criteria_1: false,
        criteria_2: false,
        criteria_3: false,
        criteria_4: false,
        criteria_5: false,
        criteria_6: false,
        criteria_7: false,
        criteria_8: false,
        qualified: false,
        action: format!("FAIL: {}", reason),
        override_flag: false,
        entry_method: None,
        in_portfolio: false,
        ab_group: None,
        eod_buy_pending: false,
        sod_skip_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn thresholds() -> CriteriaThresholds {
        CriteriaThresholds {
            near_52wh_pct: 5.0,
            above_52wl_pct: 30.0,
            volume_multiplier: 1.5,
        }
    }

    /// A steady uptrend: 260 bars with linearly rising closes.
    fn uptrend_bars() -> Vec<DailyBar> {
        (0..260)
            .map(|i| {
                let close = 10.0 + 0.1 * i as f64;
                DailyBar::new(
                    NaiveDate::from_ymd_opt(2023, 1, 1).unwrap() + chrono::Duration::days(i as i64),
                    close,
                    close,
                    close,
                    close,
                    1_000_000,
                )
            })
            .collect()
    }

    #[test]
    fn test_sma() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(sma(&values, 2), Some(3.5));
        assert_eq!(sma(&values, 4), Some(2.5));
        assert_eq!(sma(&values, 5), None);
    }

    #[test]
    fn test_uptrend_with_volume_breakout_qualifies() {
        let bars = uptrend_bars();
        let price = bars.last().unwrap().close;
        let report = evaluate_criteria(&bars, price, 2_000_000, true, &thresholds()).unwrap();
        assert!(report.qualified, "criteria: {:?}", report.criteria);
        assert!(report.ma_50 > report.ma_150);
        assert!(report.ma_150 > report.ma_200);
        assert!(report.ma_200 > report.ma_200_1m_ago);
    }

    #[test]
    fn test_average_volume_fails_breakout_criterion() {
        let bars = uptrend_bars();
        let price = bars.last().unwrap().close;
        let report = evaluate_criteria(&bars, price, 1_000_000, true, &thresholds()).unwrap();
        assert!(!report.criteria[6]);
        assert!(!report.qualified);
    }

    #[test]
    fn test_unhealthy_market_disqualifies_everything() {
        let bars = uptrend_bars();
        let price = bars.last().unwrap().close;
        let report = evaluate_criteria(&bars, price, 2_000_000, false, &thresholds()).unwrap();
        assert!(!report.criteria[7]);
        assert!(!report.qualified);
    }

    #[test]
    fn test_price_off_the_high_fails_criterion_one() {
        let bars = uptrend_bars();
        let high = bars.last().unwrap().close;
        // 10% below the 52-week high, outside the 5% band.
        let report = evaluate_criteria(&bars, high * 0.90, 2_000_000, true, &thresholds()).unwrap();
        assert!(!report.criteria[0]);
        assert!(!report.qualified);
    }

    #[test]
    fn test_insufficient_history_returns_none() {
        let bars: Vec<DailyBar> = uptrend_bars().into_iter().take(200).collect();
        assert!(evaluate_criteria(&bars, 30.0, 2_000_000, true, &thresholds()).is_none());
    }

    #[test]
    fn test_cohort_group_is_stable() {
        assert_eq!(cohort_group("NVDA"), cohort_group("NVDA"));
        let groups: Vec<&str> = ["AAPL", "NVDA", "MSFT", "AMD", "TSLA"]
            .iter()
            .map(|s| cohort_group(s))
            .collect();
        // Both groups appear across a small universe.
        assert!(groups.contains(&"A"));
        assert!(groups.contains(&"B"));
    }
}
