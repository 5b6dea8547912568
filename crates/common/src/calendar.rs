use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;

/// Exchange session rules: time zone and regular market hours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradingCalendar {
    pub tz: Tz,
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl Default for TradingCalendar {
    /// New York cash session, 09:30 to 16:00.
    fn default() -> Self {
        Self {
            tz: chrono_tz::America::New_York,
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl TradingCalendar {
    pub fn new(tz: Tz, open: NaiveTime, close: NaiveTime) -> Self {
        Self { tz, open, close }
    }

    /// Exchange-local wall clock time of an instant.
    pub fn local_time(&self, ts: DateTime<Utc>) -> NaiveTime {
        ts.with_timezone(&self.tz).time()
    }

    /// Exchange-local calendar date of an instant.
    pub fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.tz).date_naive()
    }

    /// `open <= t < close` in exchange-local time.
    pub fn is_market_hours(&self, ts: DateTime<Utc>) -> bool {
        let t = self.local_time(ts);
        t >= self.open && t < self.close
    }

    pub fn is_trading_day(&self, ts: DateTime<Utc>, day: NaiveDate) -> bool {
        self.local_date(ts) == day
    }

    /// Whether `ts` falls exactly on the exchange-local wall clock time `at`.
    pub fn is_at(&self, ts: DateTime<Utc>, at: NaiveTime) -> bool {
        self.local_time(ts) == at
    }

    /// Whether `ts` is at or after the exchange-local wall clock time `at`.
    pub fn is_at_or_after(&self, ts: DateTime<Utc>, at: NaiveTime) -> bool {
        self.local_time(ts) >= at
    }
}
