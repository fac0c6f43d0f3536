//! Trading Session Rules
//!
//! Pure wall-clock rules deciding whether the exchange is trading, in its
//! lunch break, or closed. All functions take exchange-local time so they
//! can be tested without a clock.

use std::time::Duration;

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDateTime, NaiveTime, Offset, Timelike, Utc, Weekday,
};
use serde::{Deserialize, Serialize};

/// Trading window start, inclusive (04:00 local).
const SESSION_OPEN: (u32, u32) = (4, 0);

/// Trading window end, exclusive (14:45 local).
const SESSION_CLOSE: (u32, u32) = (14, 45);

/// Lunch break start, inclusive (11:30 local).
const LUNCH_START: (u32, u32) = (11, 30);

/// Lunch break end, inclusive at minute resolution (13:00 local).
const LUNCH_END: (u32, u32) = (13, 0);

/// Which upstream source should be feeding the quote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Streaming socket.
    Stream,
    /// Periodic REST polling.
    Polling,
}

impl DataSource {
    /// Lower-case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Polling => "polling",
        }
    }
}

fn hour_minute(at: &NaiveDateTime) -> (u32, u32) {
    (at.hour(), at.minute())
}

fn is_weekend(at: &NaiveDateTime) -> bool {
    matches!(at.weekday(), Weekday::Sat | Weekday::Sun)
}

/// True on weekends and outside `[04:00, 14:45)` on weekdays.
///
/// A custom source is always considered open.
#[must_use]
pub fn is_market_closed(at: NaiveDateTime, custom_source: bool) -> bool {
    if custom_source {
        return false;
    }
    if is_weekend(&at) {
        return true;
    }
    let now = hour_minute(&at);
    !(SESSION_OPEN..SESSION_CLOSE).contains(&now)
}

/// True on weekdays between 11:30 and 13:00 inclusive (minute resolution).
///
/// A custom source never has a lunch break.
#[must_use]
pub fn is_lunch_break(at: NaiveDateTime, custom_source: bool) -> bool {
    if custom_source || is_weekend(&at) {
        return false;
    }
    (LUNCH_START..=LUNCH_END).contains(&hour_minute(&at))
}

/// Source that should be active at `at`.
#[must_use]
pub fn preferred_source(at: NaiveDateTime, custom_source: bool) -> DataSource {
    if is_market_closed(at, custom_source) || is_lunch_break(at, custom_source) {
        DataSource::Polling
    } else {
        DataSource::Stream
    }
}

/// Poll cadence at `at`: the lunch interval during the break, else `normal`.
#[must_use]
pub fn poll_interval(
    at: NaiveDateTime,
    custom_source: bool,
    normal: Duration,
    lunch: Duration,
) -> Duration {
    if is_lunch_break(at, custom_source) {
        lunch
    } else {
        normal
    }
}

// =============================================================================
// Exchange clock
// =============================================================================

/// Converts between UTC instants and exchange-local wall clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingCalendar {
    offset: FixedOffset,
}

impl TradingCalendar {
    /// Default exchange offset in hours east of UTC.
    pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 7;

    /// Calendar for a fixed offset.
    #[must_use]
    pub const fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Calendar from an hour offset. Out-of-range offsets fall back to the
    /// default exchange offset.
    #[must_use]
    pub fn from_hours(hours: i32) -> Self {
        let offset = hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .or_else(|| FixedOffset::east_opt(Self::DEFAULT_UTC_OFFSET_HOURS * 3600))
            .unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    /// Exchange offset.
    #[must_use]
    pub const fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Exchange-local date and time of `now`.
    #[must_use]
    pub fn local(&self, now: DateTime<Utc>) -> NaiveDateTime {
        now.with_timezone(&self.offset).naive_local()
    }

    /// Exchange-local wall clock time of an epoch-millisecond timestamp.
    #[must_use]
    pub fn time_of_millis(&self, millis: i64) -> Option<NaiveTime> {
        DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| self.local(dt).time())
    }

    /// Exchange-local wall clock time of an epoch-second timestamp.
    #[must_use]
    pub fn time_of_secs(&self, secs: i64) -> Option<NaiveTime> {
        DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| self.local(dt).time())
    }
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::from_hours(Self::DEFAULT_UTC_OFFSET_HOURS)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use test_case::test_case;

    use super::*;

    // 2024-06-04 is a Tuesday, 2024-06-08 a Saturday.
    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test_case(8, 10, 0 => true; "saturday morning")]
    #[test_case(9, 23, 59 => true; "sunday night")]
    #[test_case(4, 10, 0 => false; "tuesday mid session")]
    #[test_case(4, 14, 50 => true; "tuesday after close")]
    #[test_case(4, 14, 44 => false; "last open minute")]
    #[test_case(4, 14, 45 => true; "close is exclusive")]
    #[test_case(4, 4, 0 => false; "open is inclusive")]
    #[test_case(4, 3, 59 => true; "before open")]
    fn market_closed(day: u32, hour: u32, minute: u32) -> bool {
        is_market_closed(at(day, hour, minute), false)
    }

    #[test_case(4, 12, 0 => true; "noon")]
    #[test_case(4, 11, 30 => true; "start inclusive")]
    #[test_case(4, 11, 29 => false; "before start")]
    #[test_case(4, 13, 0 => true; "end inclusive")]
    #[test_case(4, 13, 1 => false; "after end")]
    #[test_case(8, 12, 0 => false; "weekend has no lunch")]
    fn lunch_break(day: u32, hour: u32, minute: u32) -> bool {
        is_lunch_break(at(day, hour, minute), false)
    }

    #[test]
    fn custom_source_overrides_clock() {
        assert!(!is_market_closed(at(8, 10, 0), true));
        assert!(!is_lunch_break(at(4, 12, 0), true));
        assert_eq!(preferred_source(at(8, 10, 0), true), DataSource::Stream);
    }

    #[test]
    fn preferred_source_follows_session() {
        assert_eq!(preferred_source(at(4, 10, 0), false), DataSource::Stream);
        assert_eq!(preferred_source(at(4, 12, 0), false), DataSource::Polling);
        assert_eq!(preferred_source(at(4, 16, 0), false), DataSource::Polling);
    }

    #[test]
    fn lunch_polls_faster() {
        let normal = Duration::from_secs(60);
        let lunch = Duration::from_secs(30);
        assert_eq!(poll_interval(at(4, 12, 0), false, normal, lunch), lunch);
        assert_eq!(poll_interval(at(4, 16, 0), false, normal, lunch), normal);
    }

    #[test]
    fn calendar_converts_to_exchange_time() {
        let calendar = TradingCalendar::default();
        // 2024-06-04T02:15:30Z is 09:15:30 in UTC+7.
        let time = calendar.time_of_millis(1_717_467_330_000).unwrap();
        assert_eq!(time, NaiveTime::from_hms_opt(9, 15, 30).unwrap());
        assert_eq!(calendar.time_of_secs(1_717_467_330), Some(time));
    }

    #[test]
    fn invalid_offset_falls_back_to_default() {
        let calendar = TradingCalendar::from_hours(99);
        assert_eq!(calendar.offset().local_minus_utc(), 7 * 3600);
    }
}
