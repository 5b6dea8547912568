use common::{Bar, DataError, OrderSide, RiskError};

/// Entry, stop and target prices of one bracket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
}

impl Bracket {
    /// One R: the distance from entry to stop.
    pub fn risk_unit(&self) -> f64 {
        (self.entry - self.stop).abs()
    }
}

/// `|high - low| / close` for one bar.
pub fn compute_range_percent(bar: &Bar) -> Result<f64, DataError> {
    if !(bar.close.is_finite() && bar.close > 0.0) {
        return Err(DataError::MalformedBar {
            start: bar.start,
            reason: format!("close {} cannot scale a range", bar.close),
        });
    }
    Ok((bar.high - bar.low).abs() / bar.close)
}

/// Place the target `r_multiple` risk units from entry in the favourable
/// direction. The stop must sit on the losing side of the entry.
pub fn compute_bracket(
    side: OrderSide,
    entry: f64,
    stop: f64,
    r_multiple: f64,
) -> Result<Bracket, RiskError> {
    if !(r_multiple.is_finite() && r_multiple > 0.0) {
        return Err(RiskError::InvalidParameter(format!(
            "r_multiple must be positive, got {r_multiple}"
        )));
    }
    let risk = (entry - stop).abs();
    if risk == 0.0 {
        return Err(RiskError::ZeroRisk { entry, stop });
    }
    let target = match side {
        OrderSide::Buy if stop < entry => entry + r_multiple * risk,
        OrderSide::Sell if stop > entry => entry - r_multiple * risk,
        _ => return Err(RiskError::StopOnWrongSide { side, entry, stop }),
    };
    Ok(Bracket {
        entry,
        stop,
        target,
    })
}

/// Whole shares such that a stop-out loses at most `risk_amount`.
pub fn position_size(risk_amount: f64, entry: f64, stop: f64) -> Result<f64, RiskError> {
    if !(risk_amount.is_finite() && risk_amount > 0.0) {
        return Err(RiskError::InvalidParameter(format!(
            "risk amount must be positive, got {risk_amount}"
        )));
    }
    let risk_unit = (entry - stop).abs();
    if risk_unit == 0.0 {
        return Err(RiskError::ZeroRisk { entry, stop });
    }
    let shares = (risk_amount / risk_unit).floor();
    if shares < 1.0 {
        return Err(RiskError::BelowOneShare {
            risk_amount,
            risk_unit,
        });
    }
    Ok(shares)
}
