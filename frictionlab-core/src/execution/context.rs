//! Per-order market state the friction models read.

use serde::{Deserialize, Serialize};

use crate::domain::{Bar, TimeOfDayBucket};
use crate::error::ConfigurationError;

/// How the engine derives volatility and spread for a new order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Bars of history (ending at the signal bar) used for volatility and spread.
    pub lookback_bars: usize,
    /// Fixed relative spread in bps. `None` estimates it from bar ranges.
    pub spread_bps: Option<f64>,
    /// Spread estimate as a fraction of the mean relative bar range.
    pub range_spread_factor: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            lookback_bars: 20,
            spread_bps: None,
            range_spread_factor: 0.1,
        }
    }
}

impl ContextConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.lookback_bars == 0 {
            return Err(ConfigurationError::NonPositiveValue {
                field: "context.lookback_bars",
                value: 0.0,
            });
        }
        if let Some(bps) = self.spread_bps {
            ConfigurationError::check_non_negative("context.spread_bps", bps)?;
        }
        ConfigurationError::check_non_negative(
            "context.range_spread_factor",
            self.range_spread_factor,
        )?;
        Ok(())
    }
}

/// Derived state owned by the engine for one order's lifetime.
///
/// `volatility` is the standard deviation of close-to-close returns and
/// `spread` the relative quoted spread, both as fractions of price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub average_daily_volume: f64,
    pub volatility: f64,
    pub spread: f64,
    pub time_of_day_bucket: TimeOfDayBucket,
}

impl ExecutionContext {
    /// Build a context from the bars up to and including the signal bar.
    pub fn from_history(
        history: &[Bar],
        average_daily_volume: f64,
        config: &ContextConfig,
        time_of_day_bucket: TimeOfDayBucket,
    ) -> Self {
        let start = history.len().saturating_sub(config.lookback_bars + 1);
        let window = &history[start..];

        let spread = match config.spread_bps {
            Some(bps) => bps / 10_000.0,
            None => config.range_spread_factor * mean_relative_range(window),
        };

        Self {
            average_daily_volume,
            volatility: return_volatility(window),
            spread,
            time_of_day_bucket,
        }
    }

    /// Same market state, re-bucketed for the bar the order executes on.
    pub fn at_bucket(&self, time_of_day_bucket: TimeOfDayBucket) -> Self {
        Self {
            time_of_day_bucket,
            ..*self
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        ConfigurationError::check_non_negative("average_daily_volume", self.average_daily_volume)?;
        ConfigurationError::check_non_negative("volatility", self.volatility)?;
        ConfigurationError::check_non_negative("spread", self.spread)?;
        Ok(())
    }
}

/// Sample standard deviation of close-to-close returns. Zero with fewer than two returns.
fn return_volatility(window: &[Bar]) -> f64 {
    let returns: Vec<f64> = window
        .windows(2)
        .filter(|pair| pair[0].close > 0.0)
        .map(|pair| pair[1].close / pair[0].close - 1.0)
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

fn mean_relative_range(window: &[Bar]) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    window.iter().map(Bar::relative_range).sum::<f64>() / window.len() as f64
}
