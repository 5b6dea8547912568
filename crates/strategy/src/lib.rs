pub mod config;
pub mod five_min_gap_bar;
pub mod registry;

pub use config::{TradestrategyConfig, TradestrategyFileConfig};
pub use five_min_gap_bar::{EntryConvention, FiveMinGapBar, GapBarParams, StopPolicy};
pub use registry::StrategyRegistry;

use common::{CandleSeries, OrderSide, RiskError, RuleError};
use risk::Bracket;

/// What a strategy wants done after looking at the series.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Nothing to do on this bar.
    Hold,
    /// Open a position with a bracket order.
    Enter(EntryPlan),
    /// The decision bar was too wide; the tradestrategy is done for the day.
    RejectRange { range_pct: f64, limit: f64 },
    /// The decision bar's prices leave no room to size a position, e.g. the
    /// entry and the stop coincide. Also done for the day.
    RejectRisk(RiskError),
    /// The entry window has closed.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryPlan {
    pub side: OrderSide,
    pub quantity: f64,
    pub bracket: Bracket,
}

/// All strategy implementations must satisfy this trait.
///
/// Evaluation is a pure function of the series view, the new-bar edge and
/// whatever reference data the strategy was built with. Lifecycle (day and
/// hours gating, duplicate-entry prevention, order state) belongs to the rule
/// that owns the strategy.
pub trait Strategy: Send + Sync {
    /// Strategy type identifier, e.g. "five_min_gap_bar".
    fn name(&self) -> &str;

    /// Evaluate the current bar. `is_new_bar` is true only on the first
    /// dispatch of a bar, never on mid-bar revisions.
    fn evaluate(&self, series: &dyn CandleSeries, is_new_bar: bool) -> Result<Action, RuleError>;
}

/// The closed set of strategies a rule can run.
#[derive(Debug, Clone)]
pub enum StrategyKind {
    FiveMinGapBar(FiveMinGapBar),
}

impl Strategy for StrategyKind {
    fn name(&self) -> &str {
        match self {
            StrategyKind::FiveMinGapBar(s) => s.name(),
        }
    }

    fn evaluate(&self, series: &dyn CandleSeries, is_new_bar: bool) -> Result<Action, RuleError> {
        match self {
            StrategyKind::FiveMinGapBar(s) => s.evaluate(series, is_new_bar),
        }
    }
}
