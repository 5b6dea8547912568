use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Directional tag of a bar, and the side of a trade derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// One OHLC summary for a fixed interval.
///
/// `start` and `end` are UTC instants; exchange-local interpretation is the
/// job of [`crate::TradingCalendar`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub side: Side,
}

impl Bar {
    /// Build a bar, tagging it `Long` when it closed above its open.
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    ) -> Self {
        let side = if close > open { Side::Long } else { Side::Short };
        Self {
            start,
            end,
            open,
            high,
            low,
            close,
            side,
        }
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.side = side;
        self
    }

    pub fn is_side(&self, side: Side) -> bool {
        self.side == side
    }
}

/// Side of an order sent to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Identity of one live strategy rule: a tradestrategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    pub instrument: String,
    pub trading_day: NaiveDate,
    pub strategy: String,
}

impl InstanceKey {
    pub fn new(
        instrument: impl Into<String>,
        trading_day: NaiveDate,
        strategy: impl Into<String>,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            trading_day,
            strategy: strategy.into(),
        }
    }
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.instrument, self.trading_day, self.strategy)
    }
}

/// Client-assigned handle for a bracket order. Assigned before the command
/// leaves the rule so routing never waits on a broker acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderHandle(pub String);

impl OrderHandle {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for OrderHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entry, stop-loss and profit-target legs submitted together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketOrder {
    pub handle: OrderHandle,
    pub instrument: String,
    pub side: OrderSide,
    /// Whole shares.
    pub quantity: f64,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
}

/// Commands a rule hands to the order executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceBracket(BracketOrder),
    Cancel { handle: OrderHandle },
}

impl OrderCommand {
    pub fn handle(&self) -> &OrderHandle {
        match self {
            OrderCommand::PlaceBracket(order) => &order.handle,
            OrderCommand::Cancel { handle } => handle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderEventKind {
    /// Entry leg executed.
    Filled { price: f64 },
    /// Stop or target leg executed; the position is flat again.
    Closed { price: f64 },
    Cancelled,
    Rejected { reason: String },
}

/// Asynchronous broker notification for one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub handle: OrderHandle,
    pub kind: OrderEventKind,
}

impl OrderEvent {
    pub fn filled(handle: OrderHandle, price: f64) -> Self {
        Self {
            handle,
            kind: OrderEventKind::Filled { price },
        }
    }

    pub fn closed(handle: OrderHandle, price: f64) -> Self {
        Self {
            handle,
            kind: OrderEventKind::Closed { price },
        }
    }

    pub fn cancelled(handle: OrderHandle) -> Self {
        Self {
            handle,
            kind: OrderEventKind::Cancelled,
        }
    }

    pub fn rejected(handle: OrderHandle, reason: impl Into<String>) -> Self {
        Self {
            handle,
            kind: OrderEventKind::Rejected {
                reason: reason.into(),
            },
        }
    }
}

/// Externally visible status of a tradestrategy, consumed by the UI and
/// persistence layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradestrategyStatus {
    Active,
    Pending,
    Filled,
    PercentRejected,
    /// The decision bar gave no tradable risk unit.
    RiskRejected,
    TimedOut,
    Cancelled,
    Rejected,
    Completed,
    Error,
}

impl std::fmt::Display for TradestrategyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            TradestrategyStatus::Active => "ACTIVE",
            TradestrategyStatus::Pending => "PENDING",
            TradestrategyStatus::Filled => "FILLED",
            TradestrategyStatus::PercentRejected => "PERCENT",
            TradestrategyStatus::RiskRejected => "RISK",
            TradestrategyStatus::TimedOut => "TO",
            TradestrategyStatus::Cancelled => "CANCELLED",
            TradestrategyStatus::Rejected => "REJECTED",
            TradestrategyStatus::Completed => "COMPLETED",
            TradestrategyStatus::Error => "ERROR",
        };
        f.write_str(code)
    }
}
