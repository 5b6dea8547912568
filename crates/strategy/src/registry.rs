use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveTime;
use tracing::info;

use common::{config::parse_time, Error, InstanceKey, Result, TradingCalendar};
use risk::EntryLimitTable;

use crate::config::TradestrategyConfig;
use crate::five_min_gap_bar::{FiveMinGapBar, GapBarParams};
use crate::{Strategy, StrategyKind};

/// Builds strategy instances from tradestrategy config, injecting the shared
/// reference data each one needs.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    entry_limits: Arc<EntryLimitTable>,
    calendar: TradingCalendar,
    default_risk_amount: f64,
}

impl StrategyRegistry {
    pub const KNOWN_STRATEGIES: &'static [&'static str] = &[FiveMinGapBar::NAME];

    pub fn new(
        entry_limits: Arc<EntryLimitTable>,
        calendar: TradingCalendar,
        default_risk_amount: f64,
    ) -> Self {
        Self {
            entry_limits,
            calendar,
            default_risk_amount,
        }
    }

    pub fn calendar(&self) -> TradingCalendar {
        self.calendar
    }

    /// Build the strategy for one tradestrategy. Unknown types and bad
    /// parameters are configuration errors.
    pub fn build(&self, cfg: &TradestrategyConfig) -> Result<StrategyKind> {
        let strategy = match cfg.strategy_type.as_str() {
            FiveMinGapBar::NAME => StrategyKind::FiveMinGapBar(self.build_gap_bar(cfg)?),
            other => {
                return Err(Error::Config(format!(
                    "unknown strategy type '{other}' for {} (known: {:?})",
                    cfg.symbol,
                    Self::KNOWN_STRATEGIES
                )))
            }
        };
        info!(
            name = %strategy.name(),
            symbol = %cfg.symbol,
            trading_day = %cfg.trading_day,
            "Built strategy"
        );
        Ok(strategy)
    }

    pub fn key_for(cfg: &TradestrategyConfig) -> InstanceKey {
        InstanceKey::new(cfg.symbol.clone(), cfg.trading_day, cfg.strategy_type.clone())
    }

    fn build_gap_bar(&self, cfg: &TradestrategyConfig) -> Result<FiveMinGapBar> {
        let defaults = GapBarParams::default();
        let params = GapBarParams {
            entry_time: param_time(&cfg.params, "entry_time", defaults.entry_time)?,
            cutoff_time: param_time(&cfg.params, "cutoff_time", defaults.cutoff_time)?,
            r_multiple: param_f64(&cfg.params, "r_multiple", defaults.r_multiple)?,
            risk_amount: cfg.risk_amount.unwrap_or(self.default_risk_amount),
            convention: param_enum(&cfg.params, "convention", defaults.convention)?,
            stop_policy: param_enum(&cfg.params, "stop_policy", defaults.stop_policy)?,
        };

        if params.entry_time >= params.cutoff_time {
            return Err(Error::Config(format!(
                "{}: entry_time {} must be before cutoff_time {}",
                cfg.symbol, params.entry_time, params.cutoff_time
            )));
        }
        if !(params.r_multiple > 0.0 && params.risk_amount > 0.0) {
            return Err(Error::Config(format!(
                "{}: r_multiple and risk_amount must be positive",
                cfg.symbol
            )));
        }

        Ok(FiveMinGapBar::new(
            cfg.symbol.clone(),
            params,
            self.calendar,
            self.entry_limits.clone(),
        ))
    }
}

// ─── Parameter helpers ────────────────────────────────────────────────────────

fn param_f64(params: &HashMap<String, toml::Value>, key: &str, default: f64) -> Result<f64> {
    match params.get(key) {
        None => Ok(default),
        Some(v) => v
            .as_float()
            .or_else(|| v.as_integer().map(|i| i as f64))
            .filter(|x| x.is_finite())
            .ok_or_else(|| Error::Config(format!("parameter '{key}' is not a finite number: {v}"))),
    }
}

fn param_time(
    params: &HashMap<String, toml::Value>,
    key: &str,
    default: NaiveTime,
) -> Result<NaiveTime> {
    match params.get(key) {
        None => Ok(default),
        Some(v) => v
            .as_str()
            .and_then(parse_time)
            .ok_or_else(|| Error::Config(format!("parameter '{key}' is not a time: {v}"))),
    }
}

fn param_enum<T: serde::de::DeserializeOwned>(
    params: &HashMap<String, toml::Value>,
    key: &str,
    default: T,
) -> Result<T> {
    match params.get(key) {
        None => Ok(default),
        Some(v) => v
            .clone()
            .try_into()
            .map_err(|e| Error::Config(format!("parameter '{key}': {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TradestrategyFileConfig;
    use crate::five_min_gap_bar::{EntryConvention, StopPolicy};
    use risk::EntryLimit;

    fn registry() -> StrategyRegistry {
        let limits = EntryLimitTable::new(vec![EntryLimit {
            lower: 0.0,
            upper: 1_000.0,
            percent: 0.03,
        }])
        .unwrap();
        StrategyRegistry::new(Arc::new(limits), TradingCalendar::default(), 100.0)
    }

    fn parse(content: &str) -> TradestrategyConfig {
        TradestrategyFileConfig::from_toml_str(content)
            .unwrap()
            .tradestrategies
            .remove(0)
    }

    #[test]
    fn builds_gap_bar_with_params() {
        let cfg = parse(
            r#"
            [[tradestrategy]]
            strategy = "five_min_gap_bar"
            symbol = "AAPL"
            trading_day = "2024-03-04"
            risk_amount = 250.0

            [tradestrategy.params]
            entry_time = "09:40"
            cutoff_time = "11:00"
            r_multiple = 2
            convention = "follow"
            stop_policy = "opposite_extreme"
            "#,
        );
        let StrategyKind::FiveMinGapBar(s) = registry().build(&cfg).unwrap();
        let p = s.params();
        assert_eq!(p.entry_time, NaiveTime::from_hms_opt(9, 40, 0).unwrap());
        assert_eq!(p.cutoff_time, NaiveTime::from_hms_opt(11, 0, 0).unwrap());
        assert_eq!(p.r_multiple, 2.0);
        assert_eq!(p.risk_amount, 250.0);
        assert_eq!(p.convention, EntryConvention::Follow);
        assert_eq!(p.stop_policy, StopPolicy::OppositeExtreme);
    }

    #[test]
    fn defaults_fill_missing_params() {
        let cfg = parse(
            r#"
            [[tradestrategy]]
            strategy = "five_min_gap_bar"
            symbol = "AAPL"
            trading_day = "2024-03-04"
            "#,
        );
        let StrategyKind::FiveMinGapBar(s) = registry().build(&cfg).unwrap();
        assert_eq!(s.params().risk_amount, 100.0);
        assert_eq!(s.params().convention, EntryConvention::Fade);
        assert_eq!(s.params().r_multiple, 3.0);
    }

    #[test]
    fn unknown_strategy_is_a_config_error() {
        let cfg = parse(
            r#"
            [[tradestrategy]]
            strategy = "rsi"
            symbol = "AAPL"
            trading_day = "2024-03-04"
            "#,
        );
        assert!(matches!(registry().build(&cfg), Err(Error::Config(_))));
    }

    #[test]
    fn malformed_r_multiple_is_a_config_error() {
        for value in [r#""three""#, "inf", "nan"] {
            let cfg = parse(&format!(
                r#"
                [[tradestrategy]]
                strategy = "five_min_gap_bar"
                symbol = "AAPL"
                trading_day = "2024-03-04"

                [tradestrategy.params]
                r_multiple = {value}
                "#
            ));
            assert!(
                matches!(registry().build(&cfg), Err(Error::Config(_))),
                "r_multiple = {value} was accepted"
            );
        }
    }

    #[test]
    fn integer_r_multiple_is_accepted() {
        let cfg = parse(
            r#"
            [[tradestrategy]]
            strategy = "five_min_gap_bar"
            symbol = "AAPL"
            trading_day = "2024-03-04"

            [tradestrategy.params]
            r_multiple = 2
            "#,
        );
        let StrategyKind::FiveMinGapBar(s) = registry().build(&cfg).unwrap();
        assert_eq!(s.params().r_multiple, 2.0);
    }

    #[test]
    fn inverted_window_is_a_config_error() {
        let cfg = parse(
            r#"
            [[tradestrategy]]
            strategy = "five_min_gap_bar"
            symbol = "AAPL"
            trading_day = "2024-03-04"

            [tradestrategy.params]
            entry_time = "10:30"
            cutoff_time = "09:35"
            "#,
        );
        assert!(matches!(registry().build(&cfg), Err(Error::Config(_))));
    }
}
