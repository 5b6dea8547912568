pub mod broker;
pub mod calendar;
pub mod config;
pub mod error;
pub mod series;
pub mod types;

pub use broker::BrokerGateway;
pub use calendar::TradingCalendar;
pub use config::Config;
pub use error::{DataError, Error, OrderCommandError, Result, RiskError, RuleError};
pub use series::{BarSeries, CandleSeries, SeriesView, SharedSeries};
pub use types::*;
