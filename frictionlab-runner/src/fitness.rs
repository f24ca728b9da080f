//! Fitness function: configurable metric selector for ranking sweep runs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use frictionlab_core::engine::BacktestMetrics;

/// Which metric to optimize/sort by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitnessMetric {
    #[default]
    Sharpe,
    TotalReturn,
    NetProfit,
    MaxDrawdown,
    FillRatio,
}

impl FitnessMetric {
    pub const ALL: [FitnessMetric; 5] = [
        FitnessMetric::Sharpe,
        FitnessMetric::TotalReturn,
        FitnessMetric::NetProfit,
        FitnessMetric::MaxDrawdown,
        FitnessMetric::FillRatio,
    ];

    /// Extract the relevant metric value from a BacktestMetrics struct.
    pub fn extract(&self, metrics: &BacktestMetrics) -> f64 {
        match self {
            Self::Sharpe => metrics.sharpe,
            Self::TotalReturn => metrics.total_return,
            Self::NetProfit => metrics.final_equity - metrics.initial_capital,
            Self::MaxDrawdown => metrics.max_drawdown,
            Self::FillRatio => metrics.fill_ratio,
        }
    }

    /// Compare two metric values. Returns true if `a` is better than `b`.
    ///
    /// Higher is better for every metric: max drawdown is a negative
    /// fraction, so -0.05 beats -0.20. NaN loses to any number.
    pub fn is_better(&self, a: f64, b: f64) -> bool {
        rank_key(a) > rank_key(b)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sharpe => "sharpe",
            Self::TotalReturn => "total_return",
            Self::NetProfit => "net_profit",
            Self::MaxDrawdown => "max_drawdown",
            Self::FillRatio => "fill_ratio",
        }
    }
}

/// Sort key that ranks NaN below every number.
pub(crate) fn rank_key(value: f64) -> f64 {
    if value.is_nan() {
        f64::NEG_INFINITY
    } else {
        value
    }
}

impl fmt::Display for FitnessMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FitnessMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == key)
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(|m| m.as_str()).collect();
                format!("unknown fitness metric '{s}' (valid: {})", valid.join(", "))
            })
    }
}
