use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{InstanceKey, OrderHandle};

/// Problems reading bar data or reference data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("bar index {index} out of range (series has {count} bars)")]
    MissingBar { index: usize, count: usize },

    #[error("series is empty")]
    EmptySeries,

    #[error("malformed bar starting {start}: {reason}")]
    MalformedBar { start: DateTime<Utc>, reason: String },

    #[error("bar starting {start} is older than the current bar starting {current}")]
    OutOfOrder {
        start: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("no entry limit covers price {price}")]
    NoEntryLimit { price: f64 },
}

/// Risk arithmetic that cannot produce a tradable bracket.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskError {
    #[error("entry {entry} and stop {stop} are equal, risk unit is zero")]
    ZeroRisk { entry: f64, stop: f64 },

    #[error("stop {stop} is on the wrong side of a {side} entry at {entry}")]
    StopOnWrongSide {
        side: crate::OrderSide,
        entry: f64,
        stop: f64,
    },

    #[error("risk amount {risk_amount} buys no shares at a risk unit of {risk_unit}")]
    BelowOneShare { risk_amount: f64, risk_unit: f64 },

    #[error("invalid risk parameter: {0}")]
    InvalidParameter(String),
}

/// Failure while evaluating one bar for one rule instance.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("risk error: {0}")]
    Risk(#[from] RiskError),
}

/// Broker refused or failed to acknowledge a command.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderCommandError {
    #[error("broker rejected order {handle}: {reason}")]
    Rejected { handle: OrderHandle, reason: String },

    #[error("broker did not acknowledge order {handle}: {reason}")]
    NotAcknowledged { handle: OrderHandle, reason: String },

    #[error("unknown order {0}")]
    UnknownOrder(OrderHandle),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Strategy instance {0} is already active")]
    DuplicateInstance(InstanceKey),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
