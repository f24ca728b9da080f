//! Latency models: when an order reaches the market, if at all.
//!
//! Total latency is the sum of independently sampled components:
//! API round trip, market-data delay (zero for realtime feeds), execution
//! and jitter. It maps to a whole number of bars with
//! `ceil(total_ms / bar_duration_ms)`; an offset beyond the max-wait window
//! cancels the order.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::domain::{OrderRequest, DAY_MS};
use crate::error::ConfigurationError;

/// Distribution of one latency component in milliseconds. Samples are clamped at zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LatencyDistribution {
    Fixed { ms: f64 },
    Uniform { min_ms: f64, max_ms: f64 },
    /// Sampled with the Box–Muller transform.
    Normal { mean_ms: f64, std_ms: f64 },
    Exponential { mean_ms: f64 },
}

impl Default for LatencyDistribution {
    fn default() -> Self {
        LatencyDistribution::Fixed { ms: 0.0 }
    }
}

impl LatencyDistribution {
    pub fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        let value = match *self {
            LatencyDistribution::Fixed { ms } => ms,
            LatencyDistribution::Uniform { min_ms, max_ms } => {
                let u: f64 = rng.gen();
                min_ms + u * (max_ms - min_ms)
            }
            LatencyDistribution::Normal { mean_ms, std_ms } => {
                // u1 in (0, 1] keeps ln finite
                let u1: f64 = 1.0 - rng.gen::<f64>();
                let u2: f64 = rng.gen();
                let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
                mean_ms + std_ms * z
            }
            LatencyDistribution::Exponential { mean_ms } => {
                let u: f64 = 1.0 - rng.gen::<f64>();
                -mean_ms * u.ln()
            }
        };
        value.max(0.0)
    }

    pub fn mean(&self) -> f64 {
        match *self {
            LatencyDistribution::Fixed { ms } => ms,
            LatencyDistribution::Uniform { min_ms, max_ms } => (min_ms + max_ms) / 2.0,
            LatencyDistribution::Normal { mean_ms, .. } => mean_ms,
            LatencyDistribution::Exponential { mean_ms } => mean_ms,
        }
    }

    pub fn validate(&self, component: &'static str) -> Result<(), ConfigurationError> {
        let bounds = match *self {
            LatencyDistribution::Fixed { ms } => vec![ms],
            LatencyDistribution::Uniform { min_ms, max_ms } => vec![min_ms, max_ms],
            LatencyDistribution::Normal { mean_ms, std_ms } => vec![mean_ms, std_ms],
            LatencyDistribution::Exponential { mean_ms } => vec![mean_ms],
        };
        for value in bounds {
            if !value.is_finite() {
                return Err(ConfigurationError::NotFinite { field: component });
            }
            if value < 0.0 {
                return Err(ConfigurationError::NegativeLatencyBound { component, value });
            }
        }
        if let LatencyDistribution::Uniform { min_ms, max_ms } = self {
            if min_ms > max_ms {
                return Err(ConfigurationError::OutOfRange {
                    field: component,
                    value: *min_ms,
                    expected: "min_ms <= max_ms",
                });
            }
        }
        Ok(())
    }
}

/// Market-data feed timeliness.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMode {
    #[default]
    Realtime,
    Delayed { offset_ms: f64 },
}

impl FeedMode {
    pub fn delay_ms(&self) -> f64 {
        match self {
            FeedMode::Realtime => 0.0,
            FeedMode::Delayed { offset_ms } => *offset_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    /// Name of the preset these values came from, if any.
    pub preset: Option<String>,
    pub api: LatencyDistribution,
    pub feed: FeedMode,
    pub execution: LatencyDistribution,
    pub jitter: LatencyDistribution,
    pub bar_duration_ms: u64,
    /// Largest bar offset still executed. Beyond it the order is cancelled.
    pub max_wait_bars: usize,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self::standard_api()
    }
}

impl LatencyConfig {
    pub const PRESETS: [&'static str; 4] =
        ["colocated", "standard_api", "delayed_retail", "institutional"];

    pub fn preset(name: &str) -> Result<Self, ConfigurationError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "colocated" => Ok(Self::colocated()),
            "standard_api" => Ok(Self::standard_api()),
            "delayed_retail" => Ok(Self::delayed_retail()),
            "institutional" => Ok(Self::institutional()),
            _ => Err(ConfigurationError::UnknownLatencyPreset(name.to_string())),
        }
    }

    fn with_components(
        name: &str,
        api: LatencyDistribution,
        feed: FeedMode,
        execution: LatencyDistribution,
        jitter: LatencyDistribution,
    ) -> Self {
        Self {
            preset: Some(name.to_string()),
            api,
            feed,
            execution,
            jitter,
            bar_duration_ms: DAY_MS,
            max_wait_bars: 2,
        }
    }

    pub fn colocated() -> Self {
        Self::with_components(
            "colocated",
            LatencyDistribution::Uniform { min_ms: 0.01, max_ms: 0.1 },
            FeedMode::Realtime,
            LatencyDistribution::Normal { mean_ms: 0.05, std_ms: 0.01 },
            LatencyDistribution::Uniform { min_ms: 0.0, max_ms: 0.02 },
        )
    }

    pub fn standard_api() -> Self {
        Self::with_components(
            "standard_api",
            LatencyDistribution::Uniform { min_ms: 20.0, max_ms: 80.0 },
            FeedMode::Realtime,
            LatencyDistribution::Normal { mean_ms: 10.0, std_ms: 3.0 },
            LatencyDistribution::Uniform { min_ms: 0.0, max_ms: 20.0 },
        )
    }

    /// Retail API with a 15 minute delayed quote feed.
    pub fn delayed_retail() -> Self {
        Self::with_components(
            "delayed_retail",
            LatencyDistribution::Uniform { min_ms: 100.0, max_ms: 500.0 },
            FeedMode::Delayed { offset_ms: 900_000.0 },
            LatencyDistribution::Normal { mean_ms: 50.0, std_ms: 15.0 },
            LatencyDistribution::Exponential { mean_ms: 50.0 },
        )
    }

    pub fn institutional() -> Self {
        Self::with_components(
            "institutional",
            LatencyDistribution::Uniform { min_ms: 1.0, max_ms: 5.0 },
            FeedMode::Realtime,
            LatencyDistribution::Normal { mean_ms: 2.0, std_ms: 0.5 },
            LatencyDistribution::Uniform { min_ms: 0.0, max_ms: 2.0 },
        )
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.api.validate("api")?;
        self.execution.validate("execution")?;
        self.jitter.validate("jitter")?;
        let feed = self.feed.delay_ms();
        if !feed.is_finite() {
            return Err(ConfigurationError::NotFinite { field: "feed" });
        }
        if feed < 0.0 {
            return Err(ConfigurationError::NegativeLatencyBound {
                component: "feed",
                value: feed,
            });
        }
        if self.bar_duration_ms == 0 {
            return Err(ConfigurationError::NonPositiveValue {
                field: "latency.bar_duration_ms",
                value: 0.0,
            });
        }
        Ok(())
    }

    /// Whole bars needed to cover `total_ms`. Saturates at `usize::MAX`.
    pub fn bar_offset(&self, total_ms: f64) -> usize {
        if total_ms.is_nan() || total_ms <= 0.0 {
            return 0;
        }
        let bars = (total_ms / self.bar_duration_ms as f64).ceil();
        if bars >= usize::MAX as f64 {
            usize::MAX
        } else {
            bars as usize
        }
    }
}

/// Sampled latency, per component.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatencyBreakdown {
    pub api_ms: f64,
    pub feed_ms: f64,
    pub execution_ms: f64,
    pub jitter_ms: f64,
    pub total_ms: f64,
}

/// Where an order lands after latency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schedule", rename_all = "snake_case")]
pub enum Schedule {
    /// Executes at `bar`. When `bar` is the signal bar it executes at that bar's close.
    Execute { bar: usize, latency_ms: f64 },
    /// Latency exceeded the max-wait window.
    Cancelled { offset: usize, latency_ms: f64 },
}

/// Latency model: delay sampling and execution scheduling.
pub trait LatencySimulator: Send + Sync {
    fn compute_latency(&self, order: &OrderRequest, rng: &mut dyn RngCore) -> LatencyBreakdown;

    fn schedule_execution(
        &self,
        order: &OrderRequest,
        current_bar: usize,
        rng: &mut dyn RngCore,
    ) -> Schedule;

    fn name(&self) -> &str;
}

/// Latency sampled from configured component distributions.
#[derive(Debug, Clone)]
pub struct SampledLatency {
    config: LatencyConfig,
}

impl SampledLatency {
    pub fn new(config: LatencyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LatencyConfig {
        &self.config
    }
}

impl LatencySimulator for SampledLatency {
    fn compute_latency(&self, _order: &OrderRequest, rng: &mut dyn RngCore) -> LatencyBreakdown {
        let api_ms = self.config.api.sample(rng);
        let feed_ms = self.config.feed.delay_ms();
        let execution_ms = self.config.execution.sample(rng);
        let jitter_ms = self.config.jitter.sample(rng);
        LatencyBreakdown {
            api_ms,
            feed_ms,
            execution_ms,
            jitter_ms,
            total_ms: api_ms + feed_ms + execution_ms + jitter_ms,
        }
    }

    fn schedule_execution(
        &self,
        order: &OrderRequest,
        current_bar: usize,
        rng: &mut dyn RngCore,
    ) -> Schedule {
        let latency = self.compute_latency(order, rng);
        let offset = self.config.bar_offset(latency.total_ms);
        if offset > self.config.max_wait_bars {
            Schedule::Cancelled {
                offset,
                latency_ms: latency.total_ms,
            }
        } else {
            Schedule::Execute {
                bar: current_bar.saturating_add(offset),
                latency_ms: latency.total_ms,
            }
        }
    }

    fn name(&self) -> &str {
        self.config.preset.as_deref().unwrap_or("custom")
    }
}

/// Ideal mode: every order executes on its signal bar.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroLatency;

impl LatencySimulator for ZeroLatency {
    fn compute_latency(&self, _order: &OrderRequest, _rng: &mut dyn RngCore) -> LatencyBreakdown {
        LatencyBreakdown::default()
    }

    fn schedule_execution(
        &self,
        _order: &OrderRequest,
        current_bar: usize,
        _rng: &mut dyn RngCore,
    ) -> Schedule {
        Schedule::Execute {
            bar: current_bar,
            latency_ms: 0.0,
        }
    }

    fn name(&self) -> &str {
        "zero"
    }
}
