use chrono::NaiveTime;
use chrono_tz::Tz;

use crate::{Error, Result, TradingCalendar};

/// All configuration loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Input files
    pub tradestrategy_config_path: String,
    pub entry_limits_path: String,
    pub bars_path: String,

    // Session
    pub calendar: TradingCalendar,

    // Trading
    /// Risk per trade when a tradestrategy does not set its own.
    pub default_risk_amount: f64,
    pub paper_slippage_bps: f64,

    // Broker
    /// Longest wait for the broker to answer one command.
    pub broker_ack_timeout_ms: u64,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let tz = match optional_env("MARKET_TIMEZONE") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|e| Error::Config(format!("MARKET_TIMEZONE '{name}': {e}")))?,
            None => chrono_tz::America::New_York,
        };
        let defaults = TradingCalendar::default();
        let open = optional_time("MARKET_OPEN")?.unwrap_or(defaults.open);
        let close = optional_time("MARKET_CLOSE")?.unwrap_or(defaults.close);
        if open >= close {
            return Err(Error::Config(format!(
                "MARKET_OPEN ({open}) must be before MARKET_CLOSE ({close})"
            )));
        }

        let broker_ack_timeout_ms = optional_u64("BROKER_ACK_TIMEOUT_MS")?.unwrap_or(5_000);
        if broker_ack_timeout_ms == 0 {
            return Err(Error::Config("BROKER_ACK_TIMEOUT_MS must be positive".into()));
        }

        Ok(Config {
            tradestrategy_config_path: optional_env("TRADESTRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/tradestrategies.toml".to_string()),
            entry_limits_path: optional_env("ENTRY_LIMITS_PATH")
                .unwrap_or_else(|| "config/entry_limits.toml".to_string()),
            bars_path: required_env("BARS_PATH")?,
            calendar: TradingCalendar::new(tz, open, close),
            default_risk_amount: optional_f64("DEFAULT_RISK_AMOUNT")?.unwrap_or(100.0),
            paper_slippage_bps: optional_f64("PAPER_SLIPPAGE_BPS")?.unwrap_or(0.0),
            broker_ack_timeout_ms,
        })
    }
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        Error::Config(format!(
            "Required environment variable '{key}' is not set. Check your .env file."
        ))
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn optional_time(key: &str) -> Result<Option<NaiveTime>> {
    optional_env(key)
        .map(|v| parse_time(&v).ok_or_else(|| Error::Config(format!("{key} is not a time: '{v}'"))))
        .transpose()
}

fn optional_f64(key: &str) -> Result<Option<f64>> {
    optional_env(key)
        .map(|v| {
            v.parse::<f64>()
                .map_err(|_| Error::Config(format!("{key} is not a number: '{v}'")))
        })
        .transpose()
}

fn optional_u64(key: &str) -> Result<Option<u64>> {
    optional_env(key).map(|v| parse_u64(key, &v)).transpose()
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{key} is not a whole number: '{value}'")))
}
