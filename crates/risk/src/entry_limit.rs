use serde::{Deserialize, Serialize};
use tracing::info;

use common::{Error, Result};

/// Maximum intrabar range allowed for prices in `[lower, upper)`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EntryLimit {
    pub lower: f64,
    pub upper: f64,
    /// Fraction of price, e.g. 0.03 = 3%.
    pub percent: f64,
}

impl EntryLimit {
    pub fn covers(&self, price: f64) -> bool {
        price >= self.lower && price < self.upper
    }
}

/// Price-bracketed entry limits.
///
/// Example `config/entry_limits.toml`:
/// ```toml
/// [[entry_limit]]
/// lower = 0.0
/// upper = 20.0
/// percent = 0.04
///
/// [[entry_limit]]
/// lower = 20.0
/// upper = 1000000.0
/// percent = 0.02
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EntryLimitTable {
    #[serde(rename = "entry_limit")]
    limits: Vec<EntryLimit>,
}

impl EntryLimitTable {
    /// Build a table, refusing empty, inverted or overlapping brackets.
    pub fn new(mut limits: Vec<EntryLimit>) -> Result<Self> {
        limits.sort_by(|a, b| a.lower.total_cmp(&b.lower));
        for limit in &limits {
            if limit.lower.is_nan() || limit.upper.is_nan() || limit.lower >= limit.upper {
                return Err(Error::Config(format!(
                    "entry limit bracket [{}, {}) is empty",
                    limit.lower, limit.upper
                )));
            }
            if limit.percent <= 0.0 || !limit.percent.is_finite() {
                return Err(Error::Config(format!(
                    "entry limit percent {} must be positive",
                    limit.percent
                )));
            }
        }
        for pair in limits.windows(2) {
            if pair[1].lower < pair[0].upper {
                return Err(Error::Config(format!(
                    "entry limit brackets [{}, {}) and [{}, {}) overlap",
                    pair[0].lower, pair[0].upper, pair[1].lower, pair[1].upper
                )));
            }
        }
        Ok(Self { limits })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: EntryLimitTable = toml::from_str(content)?;
        let table = Self::new(raw.limits)?;
        if table.is_empty() {
            return Err(Error::Config("no entry limit brackets defined".into()));
        }
        Ok(table)
    }

    /// Load from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let table = Self::from_toml_str(&content)?;
        info!(path, brackets = table.len(), "Entry limits loaded");
        Ok(table)
    }

    /// The bracket covering a reference price, if any.
    pub fn limit_for(&self, price: f64) -> Option<&EntryLimit> {
        self.limits.iter().find(|l| l.covers(price))
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }
}
