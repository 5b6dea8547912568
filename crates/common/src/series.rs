use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::DataError;
use crate::Bar;

/// Read access to a time-ordered bar sequence. Index 0 is the earliest bar;
/// the last index is the current, possibly still forming, bar.
pub trait CandleSeries: Send + Sync {
    fn bar_count(&self) -> usize;

    fn bar_at(&self, index: usize) -> Result<&Bar, DataError>;

    /// The bar at the highest index.
    fn current(&self) -> Result<&Bar, DataError> {
        match self.bar_count() {
            0 => Err(DataError::EmptySeries),
            n => self.bar_at(n - 1),
        }
    }

    /// The last completed bar, one before the current one.
    fn previous(&self) -> Result<&Bar, DataError> {
        let count = self.bar_count();
        if count < 2 {
            return Err(DataError::MissingBar {
                index: count.wrapping_sub(2),
                count,
            });
        }
        self.bar_at(count - 2)
    }
}

/// Append-only bars for one instrument at one bar size.
#[derive(Debug, Clone)]
pub struct BarSeries {
    pub symbol: String,
    /// Bar length in seconds.
    pub bar_size: u32,
    bars: Vec<Bar>,
}

/// Series shared between the market-data feed and the rule instances reading it.
pub type SharedSeries = Arc<RwLock<BarSeries>>;

impl BarSeries {
    pub fn new(symbol: impl Into<String>, bar_size: u32) -> Self {
        Self {
            symbol: symbol.into(),
            bar_size,
            bars: Vec::new(),
        }
    }

    pub fn shared(self) -> SharedSeries {
        Arc::new(RwLock::new(self))
    }

    /// Apply a feed update. Returns `true` when the update opened a new bar
    /// and `false` when it revised the forming bar.
    pub fn update(&mut self, bar: Bar) -> Result<bool, DataError> {
        validate(&bar, self.bar_size)?;
        match self.bars.last_mut() {
            Some(last) if bar.start == last.start => {
                *last = bar;
                Ok(false)
            }
            Some(last) if bar.start < last.start => Err(DataError::OutOfOrder {
                start: bar.start,
                current: last.start,
            }),
            _ => {
                self.bars.push(bar);
                Ok(true)
            }
        }
    }

}

impl CandleSeries for BarSeries {
    fn bar_count(&self) -> usize {
        self.bars.len()
    }

    fn bar_at(&self, index: usize) -> Result<&Bar, DataError> {
        self.bars.get(index).ok_or(DataError::MissingBar {
            index,
            count: self.bars.len(),
        })
    }
}

/// The first `len` bars of a series, as they stood when a dispatch was issued.
pub struct SeriesView<'a> {
    series: &'a dyn CandleSeries,
    len: usize,
}

impl<'a> SeriesView<'a> {
    pub fn new(series: &'a dyn CandleSeries, len: usize) -> Self {
        Self {
            series,
            len: len.min(series.bar_count()),
        }
    }
}

impl CandleSeries for SeriesView<'_> {
    fn bar_count(&self) -> usize {
        self.len
    }

    fn bar_at(&self, index: usize) -> Result<&Bar, DataError> {
        if index >= self.len {
            return Err(DataError::MissingBar {
                index,
                count: self.len,
            });
        }
        self.series.bar_at(index)
    }
}

fn validate(bar: &Bar, bar_size: u32) -> Result<(), DataError> {
    let prices = [bar.open, bar.high, bar.low, bar.close];
    let reason = if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
        Some("prices must be positive and finite")
    } else if bar.low > bar.high {
        Some("low above high")
    } else if bar.open > bar.high || bar.open < bar.low || bar.close > bar.high || bar.close < bar.low
    {
        Some("open/close outside the high-low range")
    } else if bar.end < bar.start {
        Some("end before start")
    } else if (bar.end - bar.start).num_seconds() != i64::from(bar_size) {
        Some("duration does not match the series bar size")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(DataError::MalformedBar {
            start: bar.start,
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar_at_minute(minute: i64, close: f64) -> Bar {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap() + Duration::minutes(minute);
        Bar::new(start, start + Duration::minutes(5), 100.0, 101.0, 99.0, close)
    }

    #[test]
    fn update_appends_new_bars_and_revises_forming_bar() {
        let mut series = BarSeries::new("AAPL", 300);
        assert!(series.update(bar_at_minute(0, 100.0)).unwrap());
        assert!(!series.update(bar_at_minute(0, 100.5)).unwrap());
        assert!(series.update(bar_at_minute(5, 100.0)).unwrap());

        assert_eq!(series.bar_count(), 2);
        assert_eq!(series.bar_at(0).unwrap().close, 100.5);
    }

    #[test]
    fn update_rejects_older_bar() {
        let mut series = BarSeries::new("AAPL", 300);
        series.update(bar_at_minute(5, 100.0)).unwrap();
        let err = series.update(bar_at_minute(0, 100.0)).unwrap_err();
        assert!(matches!(err, DataError::OutOfOrder { .. }));
    }

    #[test]
    fn update_rejects_malformed_bar() {
        let mut series = BarSeries::new("AAPL", 300);
        let mut bad = bar_at_minute(0, 100.0);
        bad.low = 102.0;
        assert!(matches!(
            series.update(bad),
            Err(DataError::MalformedBar { .. })
        ));
        assert_eq!(series.bar_count(), 0);
    }

    #[test]
    fn update_rejects_bar_of_another_size() {
        let mut series = BarSeries::new("AAPL", 60);
        assert!(matches!(
            series.update(bar_at_minute(0, 100.0)),
            Err(DataError::MalformedBar { .. })
        ));
    }

    #[test]
    fn previous_requires_two_bars() {
        let mut series = BarSeries::new("AAPL", 300);
        assert_eq!(series.current().unwrap_err(), DataError::EmptySeries);
        series.update(bar_at_minute(0, 100.0)).unwrap();
        assert!(matches!(series.previous(), Err(DataError::MissingBar { .. })));
        series.update(bar_at_minute(5, 100.0)).unwrap();
        assert_eq!(series.previous().unwrap().start, bar_at_minute(0, 0.0).start);
    }

    #[test]
    fn view_hides_bars_added_after_dispatch() {
        let mut series = BarSeries::new("AAPL", 300);
        for m in [0, 5, 10] {
            series.update(bar_at_minute(m, 100.0)).unwrap();
        }
        let view = SeriesView::new(&series, 2);
        assert_eq!(view.bar_count(), 2);
        assert_eq!(view.current().unwrap().start, series.bar_at(1).unwrap().start);
        assert!(view.bar_at(2).is_err());
    }
}
