use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One completed daily OHLCV bar for a symbol.
///
/// Bars are keyed by `(symbol, trading_date)` in the store; a later fetch
/// for the same date overwrites the earlier values (upsert semantics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub trading_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl DailyBar {
    pub fn new(trading_date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: i64) -> Self {
        Self {
            trading_date,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_new() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let bar = DailyBar::new(d, 10.0, 12.0, 9.5, 11.0, 1_000_000);
        assert_eq!(bar.trading_date, d);
        assert_eq!(bar.close, 11.0);
        assert_eq!(bar.volume, 1_000_000);
    }
}
