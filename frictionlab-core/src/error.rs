//! Error taxonomy for the engine.
//!
//! - `ConfigurationError`: invalid static parameters, fatal at construction.
//! - `DataIntegrityError`: malformed or out-of-order input, fatal for the run.
//! - `EngineError`: what `BacktestEngine::step` can return.
//!
//! Rejections and cancellations are not errors; they are recorded as result
//! data (`RejectedOrder`, `OrderEvent`).

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Invalid static parameters. Never silently zeroed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("{field} must be non-negative, got {value}")]
    NegativeValue { field: &'static str, value: f64 },

    #[error("{field} must be positive, got {value}")]
    NonPositiveValue { field: &'static str, value: f64 },

    #[error("{field} out of range: {value} (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },

    #[error("unknown market: {0}")]
    UnknownMarket(String),

    #[error("unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("unknown broker profile: {0}")]
    UnknownBrokerProfile(String),

    #[error("unknown latency preset: {0}")]
    UnknownLatencyPreset(String),

    #[error("broker profile '{profile}' is for {profile_market}, run is configured for {market}")]
    MarketMismatch {
        profile: String,
        profile_market: String,
        market: String,
    },

    #[error("requested quantity must be positive, got {0}")]
    NonPositiveQuantity(f64),

    #[error("notional must be non-negative, got {0}")]
    NegativeNotional(f64),

    #[error("{component} latency bound must be non-negative, got {value}")]
    NegativeLatencyBound { component: &'static str, value: f64 },

    #[error("limit order {0} has no limit price")]
    MissingLimitPrice(u64),
}

impl ConfigurationError {
    /// Reject negative (and NaN) values.
    pub fn check_non_negative(field: &'static str, value: f64) -> Result<f64, Self> {
        if value.is_nan() {
            return Err(Self::NotFinite { field });
        }
        if value < 0.0 {
            return Err(Self::NegativeValue { field, value });
        }
        Ok(value)
    }

    /// Reject zero, negative and NaN values.
    pub fn check_positive(field: &'static str, value: f64) -> Result<f64, Self> {
        if value.is_nan() {
            return Err(Self::NotFinite { field });
        }
        if value <= 0.0 {
            return Err(Self::NonPositiveValue { field, value });
        }
        Ok(value)
    }

    /// Reject values outside `[0, 1]`.
    pub fn check_fraction(field: &'static str, value: f64) -> Result<f64, Self> {
        if !(0.0..=1.0).contains(&value) {
            return Err(Self::OutOfRange {
                field,
                value,
                expected: "[0, 1]",
            });
        }
        Ok(value)
    }
}

/// Malformed or non-monotonic market data. Aborts the run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataIntegrityError {
    #[error("bar {index}: timestamp {current} is not after previous bar {previous}")]
    NonMonotonicTimestamp {
        index: usize,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("bar {index} is malformed: {reason}")]
    MalformedBar { index: usize, reason: String },

    #[error("signal stream has {signals} entries for {bars} bars")]
    SignalLengthMismatch { bars: usize, signals: usize },
}

/// Errors surfaced by `BacktestEngine`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("data integrity error: {0}")]
    DataIntegrity(#[from] DataIntegrityError),

    #[error("order book error: {0}")]
    OrderBook(#[from] crate::engine::OrderBookError),

    #[error("run already finished (phase: {0})")]
    RunCompleted(String),
}
