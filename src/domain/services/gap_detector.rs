//! Gap Detector
//!
//! Given the last stored bar date for a symbol and the last completed
//! trading day, computes the minimal historical-data window the broker must
//! be asked for. Keeps daily updates cheap: symbols already current are not
//! fetched at all, and stale symbols fetch only their gap plus a small
//! weekend/holiday buffer.

use chrono::NaiveDate;

/// Full-lookback window requested for symbols with no stored history.
pub const MAX_FETCH_DAYS: i64 = 365;

/// Calendar-day padding absorbing weekends and holidays, so one fetch call
/// reliably covers the true trading-day gap.
pub const GAP_BUFFER_DAYS: i64 = 5;

/// Historical-data window to request from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchWindow {
    /// Exact gap in calendar days (buffer included).
    Days(i64),
    /// Full one-year lookback for never-fetched or very stale symbols.
    Bootstrap,
}

impl FetchWindow {
    /// Render as the gateway duration string, e.g. `"15 D"` or `"1 Y"`.
    pub fn as_duration_str(&self) -> String {
        match self {
            FetchWindow::Days(d) => format!("{} D", d),
            FetchWindow::Bootstrap => "1 Y".to_string(),
        }
    }

    /// Window size in calendar days.
    pub fn num_days(&self) -> i64 {
        match self {
            FetchWindow::Days(d) => *d,
            FetchWindow::Bootstrap => MAX_FETCH_DAYS,
        }
    }
}

/// Minimal window covering the gap since `last_stored`, or `None` when the
/// symbol is already current (`last_stored >= last_completed`).
pub fn fetch_window(
    last_stored: Option<NaiveDate>,
    last_completed: NaiveDate,
) -> Option<FetchWindow> {
    let latest = match last_stored {
        Some(d) => d,
        None => return Some(FetchWindow::Bootstrap),
    };

    let gap_days = (last_completed - latest).num_days();
    if gap_days <= 0 {
        return None;
    }

    let fetch_days = gap_days + GAP_BUFFER_DAYS;
    if fetch_days >= MAX_FETCH_DAYS {
        Some(FetchWindow::Bootstrap)
    } else {
        Some(FetchWindow::Days(fetch_days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_bootstrap_when_never_fetched() {
        assert_eq!(
            fetch_window(None, d(2024, 1, 15)),
            Some(FetchWindow::Bootstrap)
        );
    }

    #[test]
    fn test_none_when_current() {
        let last = d(2024, 1, 15);
        assert_eq!(fetch_window(Some(last), last), None);
        // Stored date ahead of the last completed session is also current.
        assert_eq!(fetch_window(Some(d(2024, 1, 16)), last), None);
    }

    #[test]
    fn test_gap_plus_buffer() {
        // Last stored 2024-01-10, last completed 2024-01-15 (Monday):
        // 5 day gap + 5 day buffer = 10 D.
        let window = fetch_window(Some(d(2024, 1, 10)), d(2024, 1, 15)).unwrap();
        assert_eq!(window, FetchWindow::Days(10));
        assert_eq!(window.as_duration_str(), "10 D");
    }

    #[test]
    fn test_large_gap_collapses_to_bootstrap() {
        let window = fetch_window(Some(d(2023, 1, 1)), d(2024, 1, 15)).unwrap();
        assert_eq!(window, FetchWindow::Bootstrap);
        assert_eq!(window.as_duration_str(), "1 Y");
    }

    #[test]
    fn test_monotone_up_to_cap() {
        // Growing the gap never shrinks the window, and it never exceeds
        // the bootstrap size.
        let last_completed = d(2024, 6, 28);
        let mut prev = 0;
        for gap in 1..400 {
            let stored = last_completed - chrono::Duration::days(gap);
            let window = fetch_window(Some(stored), last_completed).unwrap();
            let days = window.num_days();
            assert!(days >= prev, "window shrank at gap {}", gap);
            assert!(days <= MAX_FETCH_DAYS);
            prev = days;
        }
    }
}
