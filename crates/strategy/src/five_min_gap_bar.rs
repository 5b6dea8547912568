use std::sync::Arc;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use common::{Bar, CandleSeries, DataError, OrderSide, RiskError, RuleError, Side, TradingCalendar};
use risk::{compute_bracket, compute_range_percent, position_size, EntryLimitTable};

use crate::{Action, EntryPlan, Strategy};

/// How the previous bar's directional tag maps to the order sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryConvention {
    /// Tagged long: sell at the low. Tagged short: buy at the high.
    #[default]
    Fade,
    /// Tagged long: buy at the high. Tagged short: sell at the low.
    Follow,
}

impl EntryConvention {
    /// Order side, entry price and the opposite-extreme stop candidate.
    fn orient(self, tag: Side, bar: &Bar) -> (OrderSide, f64, f64) {
        let buy_high = (OrderSide::Buy, bar.high, bar.low);
        let sell_low = (OrderSide::Sell, bar.low, bar.high);
        match (self, tag) {
            (EntryConvention::Fade, Side::Long) | (EntryConvention::Follow, Side::Short) => sell_low,
            (EntryConvention::Fade, Side::Short) | (EntryConvention::Follow, Side::Long) => buy_high,
        }
    }
}

/// Where the initial stop goes once the entry is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// The decision bar's open: a tighter initial risk.
    #[default]
    BarOpen,
    /// The decision bar's extreme opposite the entry.
    OppositeExtreme,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapBarParams {
    /// Start time of the first bar after the decision bar, exchange-local.
    pub entry_time: NaiveTime,
    /// Bars starting at or after this time end the entry window.
    pub cutoff_time: NaiveTime,
    pub r_multiple: f64,
    pub risk_amount: f64,
    pub convention: EntryConvention,
    pub stop_policy: StopPolicy,
}

impl Default for GapBarParams {
    fn default() -> Self {
        Self {
            entry_time: NaiveTime::from_hms_opt(9, 35, 0).unwrap_or(NaiveTime::MIN),
            cutoff_time: NaiveTime::from_hms_opt(10, 30, 0).unwrap_or(NaiveTime::MIN),
            r_multiple: 3.0,
            risk_amount: 100.0,
            convention: EntryConvention::default(),
            stop_policy: StopPolicy::default(),
        }
    }
}

/// Trade the first five-minute bar of the session: when the 09:35 bar opens,
/// bracket the 09:30 bar's extreme with a 3R target, unless that bar's range
/// is too wide for its price.
#[derive(Debug, Clone)]
pub struct FiveMinGapBar {
    symbol: String,
    params: GapBarParams,
    calendar: TradingCalendar,
    entry_limits: Arc<EntryLimitTable>,
}

impl FiveMinGapBar {
    pub const NAME: &'static str = "five_min_gap_bar";

    pub fn new(
        symbol: impl Into<String>,
        params: GapBarParams,
        calendar: TradingCalendar,
        entry_limits: Arc<EntryLimitTable>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            params,
            calendar,
            entry_limits,
        }
    }

    pub fn params(&self) -> &GapBarParams {
        &self.params
    }

    fn evaluate_entry(&self, prev: &Bar, current: &Bar) -> Result<Action, RuleError> {
        let tag = if prev.is_side(Side::Long) {
            Side::Long
        } else {
            Side::Short
        };
        let (side, entry, stop_candidate) = self.params.convention.orient(tag, prev);
        let stop = match self.params.stop_policy {
            StopPolicy::BarOpen => prev.open,
            StopPolicy::OppositeExtreme => stop_candidate,
        };

        let limit = self
            .entry_limits
            .limit_for(prev.close)
            .ok_or(DataError::NoEntryLimit { price: prev.close })?
            .percent;
        let range_pct = compute_range_percent(prev)?;

        if range_pct >= limit {
            info!(
                symbol = %self.symbol,
                start = %current.start,
                range_pct,
                limit,
                "Decision bar outside entry limit"
            );
            return Ok(Action::RejectRange { range_pct, limit });
        }

        let sized = compute_bracket(side, entry, stop, self.params.r_multiple).and_then(|bracket| {
            let quantity = position_size(self.params.risk_amount, entry, stop)?;
            Ok((bracket, quantity))
        });
        let (bracket, quantity) = match sized {
            Ok(sized) => sized,
            Err(e @ (RiskError::ZeroRisk { .. } | RiskError::BelowOneShare { .. })) => {
                info!(
                    symbol = %self.symbol,
                    start = %current.start,
                    reason = %e,
                    "Decision bar gives no tradable risk"
                );
                return Ok(Action::RejectRisk(e));
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            symbol = %self.symbol,
            start = %current.start,
            side = %side,
            entry = bracket.entry,
            stop = bracket.stop,
            target = bracket.target,
            quantity,
            "Entry signal"
        );
        Ok(Action::Enter(EntryPlan {
            side,
            quantity,
            bracket,
        }))
    }
}

impl Strategy for FiveMinGapBar {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn evaluate(&self, series: &dyn CandleSeries, is_new_bar: bool) -> Result<Action, RuleError> {
        let current = series.current()?;

        if is_new_bar && self.calendar.is_at(current.start, self.params.entry_time) {
            let prev = series.previous()?;
            return self.evaluate_entry(prev, current);
        }

        if self
            .calendar
            .is_at_or_after(current.start, self.params.cutoff_time)
        {
            return Ok(Action::Timeout);
        }

        Ok(Action::Hold)
    }
}
