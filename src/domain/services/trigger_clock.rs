//! Trigger Clock
//!
//! Computes how long a scheduler loop should sleep until its next weekday
//! trigger in exchange-local time (America/New_York). All trigger arithmetic
//! happens in the exchange zone, never the host zone: the process may run
//! anywhere, and DST transitions are resolved through the tz database.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

use crate::domain::errors::SchedulerError;

/// Exchange-local timezone for all trigger and trading-day computation.
pub const EXCHANGE_TZ: Tz = New_York;

/// Current wall-clock time in the exchange zone.
pub fn now_exchange() -> DateTime<Tz> {
    Utc::now().with_timezone(&EXCHANGE_TZ)
}

/// Today's date in the exchange zone (never the host-local date).
pub fn today_exchange() -> NaiveDate {
    now_exchange().date_naive()
}

fn parse_trigger_time(trigger_time: &str) -> Result<(u32, u32), SchedulerError> {
    let invalid = || SchedulerError::InvalidTriggerTime(trigger_time.to_string());

    let mut parts = trigger_time.split(':');
    let hour: u32 = parts
        .next()
        .and_then(|h| h.trim().parse().ok())
        .ok_or_else(invalid)?;
    let minute: u32 = parts
        .next()
        .and_then(|m| m.trim().parse().ok())
        .ok_or_else(invalid)?;
    if parts.next().is_some() || hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

/// Resolve a local wall-clock instant on `date`, DST-safe.
///
/// Fall-back ambiguity picks the earlier instant; a spring-forward gap
/// (the wall-clock time does not exist that day) yields `None` and the
/// caller advances to the next day.
fn local_instant(date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Tz>> {
    match EXCHANGE_TZ.with_ymd_and_hms(date.year(), date.month(), date.day(), hour, minute, 0) {
        LocalResult::Single(t) => Some(t),
        LocalResult::Ambiguous(a, b) => Some(a.min(b)),
        LocalResult::None => None,
    }
}

fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Seconds until the next weekday occurrence of `trigger_time` (HH:MM,
/// exchange-local), strictly in the future, never less than one second.
///
/// `grace_minutes`: if > 0 and today's weekday trigger passed within that
/// many minutes, returns ~1s (fire immediately) instead of rolling to the
/// next weekday. A process restart shortly after the scheduled time then
/// still fires once rather than silently skipping a whole day.
pub fn next_wake_delay(
    trigger_time: &str,
    now: DateTime<Tz>,
    grace_minutes: i64,
) -> Result<std::time::Duration, SchedulerError> {
    let (hour, minute) = parse_trigger_time(trigger_time)?;

    if grace_minutes > 0 && is_weekday(now.date_naive()) {
        if let Some(today_trigger) = local_instant(now.date_naive(), hour, minute) {
            let since = (now - today_trigger).num_seconds();
            if since > 0 && since <= grace_minutes * 60 {
                tracing::info!(
                    "trigger time {} passed {}s ago (within {}m grace window), firing immediately",
                    trigger_time,
                    since,
                    grace_minutes
                );
                return Ok(std::time::Duration::from_secs(1));
            }
        }
    }

    // Step forward until a future weekday trigger is found.
    let mut date = now.date_naive();
    let candidate = loop {
        if is_weekday(date) {
            if let Some(t) = local_instant(date, hour, minute) {
                if t > now {
                    break t;
                }
            }
        }
        date = date + Duration::days(1);
    };

    let delta = (candidate - now).num_milliseconds() as f64 / 1000.0;
    Ok(std::time::Duration::from_secs_f64(delta.max(1.0)))
}

/// Date of the most recent completed trading session, given `today` in
/// exchange-local time.
///
/// The exchange only publishes a final bar after that session's close, so a
/// same-day in-progress bar must never be treated as final:
/// Mon..Fri yields yesterday, Saturday yields Friday, Sunday yields Friday.
pub fn last_completed_trading_day(today: NaiveDate) -> NaiveDate {
    match today.weekday() {
        Weekday::Sat => today - Duration::days(1),
        Weekday::Sun => today - Duration::days(2),
        _ => today - Duration::days(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn et(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        EXCHANGE_TZ.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_rejects_malformed_times() {
        let now = et(2024, 1, 10, 12, 0);
        for bad in ["", "930", "9h30", "25:00", "09:60", "09:30:00"] {
            assert!(
                next_wake_delay(bad, now, 0).is_err(),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_same_day_future_trigger() {
        // Wednesday 2024-01-10, 09:00 ET; trigger at 16:10 the same day.
        let now = et(2024, 1, 10, 9, 0);
        let delay = next_wake_delay("16:10", now, 0).unwrap();
        assert_eq!(delay.as_secs(), 7 * 3600 + 10 * 60);
    }

    #[test]
    fn test_past_trigger_rolls_to_next_weekday() {
        // Friday 2024-01-12, 17:00 ET; 09:30 trigger has passed, next is Monday.
        let now = et(2024, 1, 12, 17, 0);
        let delay = next_wake_delay("09:30", now, 0).unwrap();
        let wake = now + Duration::seconds(delay.as_secs() as i64);
        assert_eq!(wake.weekday(), Weekday::Mon);
        assert_eq!(wake.date_naive(), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn test_saturday_targets_monday() {
        let now = et(2024, 1, 13, 8, 0);
        let delay = next_wake_delay("09:30", now, 0).unwrap();
        let wake = now + Duration::seconds(delay.as_secs() as i64);
        assert_eq!(wake.weekday(), Weekday::Mon);
    }

    #[test]
    fn test_wake_is_always_positive_and_weekday() {
        let starts = [
            et(2024, 1, 8, 0, 0),
            et(2024, 1, 12, 23, 59),
            et(2024, 1, 14, 12, 0),
            et(2024, 7, 4, 9, 30),
        ];
        for now in starts {
            for t in ["00:00", "09:30", "15:50", "23:59"] {
                let delay = next_wake_delay(t, now, 0).unwrap();
                assert!(delay.as_secs_f64() >= 1.0);
                let wake = now + Duration::milliseconds(delay.as_millis() as i64);
                assert!(is_weekday(wake.date_naive()), "woke on weekend from {}", now);
            }
        }
    }

    #[test]
    fn test_grace_window_fires_immediately() {
        // Trigger 09:45; now 09:50, i.e. 5 minutes past with a 10 minute grace.
        let now = et(2024, 1, 10, 9, 50);
        let delay = next_wake_delay("09:45", now, 10).unwrap();
        assert_eq!(delay.as_secs(), 1);
    }

    #[test]
    fn test_grace_window_expired_rolls_forward() {
        // 30 minutes past the trigger with only a 10 minute grace.
        let now = et(2024, 1, 10, 10, 15);
        let delay = next_wake_delay("09:45", now, 10).unwrap();
        assert!(delay.as_secs() > 3600);
    }

    #[test]
    fn test_grace_window_ignored_on_weekend() {
        // Saturday: the grace window never applies.
        let now = et(2024, 1, 13, 9, 50);
        let delay = next_wake_delay("09:45", now, 10).unwrap();
        let wake = now + Duration::seconds(delay.as_secs() as i64);
        assert_eq!(wake.weekday(), Weekday::Mon);
    }

    #[test]
    fn test_dst_spring_forward_gap() {
        // 2024-03-10 02:30 ET does not exist (clocks jump 02:00 -> 03:00).
        // Saturday 2024-03-09 23:00: 02:30 resolves on the next weekday, Monday.
        let now = et(2024, 3, 9, 23, 0);
        let delay = next_wake_delay("02:30", now, 0).unwrap();
        let wake = now + Duration::seconds(delay.as_secs() as i64);
        assert_eq!(wake.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
    }

    #[test]
    fn test_last_completed_trading_day() {
        let mon = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let sat = NaiveDate::from_ymd_opt(2024, 1, 13).unwrap();
        let sun = NaiveDate::from_ymd_opt(2024, 1, 14).unwrap();
        let fri = NaiveDate::from_ymd_opt(2024, 1, 12).unwrap();
        assert_eq!(last_completed_trading_day(mon), sun);
        assert_eq!(last_completed_trading_day(sat), fri);
        assert_eq!(last_completed_trading_day(sun), fri);
        assert_eq!(
            last_completed_trading_day(fri),
            NaiveDate::from_ymd_opt(2024, 1, 11).unwrap()
        );
    }
}
