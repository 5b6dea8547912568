use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use common::Result;

/// Top-level tradestrategy file (TOML).
///
/// Example `config/tradestrategies.toml`:
/// ```toml
/// [[tradestrategy]]
/// strategy = "five_min_gap_bar"
/// symbol = "AAPL"
/// trading_day = "2024-03-04"
/// risk_amount = 100.0
///
/// [tradestrategy.params]
/// entry_time = "09:35"
/// cutoff_time = "10:30"
/// r_multiple = 3.0
/// convention = "fade"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradestrategyFileConfig {
    #[serde(rename = "tradestrategy", default)]
    pub tradestrategies: Vec<TradestrategyConfig>,
}

/// One instrument, one trading day, one strategy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradestrategyConfig {
    /// Strategy type identifier, e.g. "five_min_gap_bar".
    #[serde(rename = "strategy")]
    pub strategy_type: String,
    /// Instrument symbol, e.g. "AAPL".
    pub symbol: String,
    pub trading_day: NaiveDate,
    /// Bar length in seconds.
    #[serde(default = "default_bar_size")]
    pub bar_size: u32,
    /// Currency lost if the initial stop is hit. Falls back to the global default.
    #[serde(default)]
    pub risk_amount: Option<f64>,
    /// Strategy-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

fn default_bar_size() -> u32 {
    300
}

impl TradestrategyFileConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let cfg = Self::from_toml_str(&content)?;
        info!(path, count = cfg.tradestrategies.len(), "Tradestrategies loaded");
        Ok(cfg)
    }
}
