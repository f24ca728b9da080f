//! Bar: the fundamental market data unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::order::OrderSide;
use crate::error::DataIntegrityError;

/// OHLCV bar for one symbol on one timeframe. Externally sourced, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Check OHLCV sanity. `index` is only used for the error report.
    pub fn validate(&self, index: usize) -> Result<(), DataIntegrityError> {
        let malformed = |reason: &str| DataIntegrityError::MalformedBar {
            index,
            reason: reason.to_string(),
        };

        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) || !self.volume.is_finite() {
            return Err(malformed("non-finite field"));
        }
        if prices.iter().any(|&p| p <= 0.0) {
            return Err(malformed("non-positive price"));
        }
        if self.volume < 0.0 {
            return Err(malformed("negative volume"));
        }
        if self.high < self.low {
            return Err(malformed("high below low"));
        }
        if self.open > self.high || self.open < self.low {
            return Err(malformed("open outside high/low range"));
        }
        if self.close > self.high || self.close < self.low {
            return Err(malformed("close outside high/low range"));
        }
        Ok(())
    }

    /// True if a resting limit on `side` at `price` would have traded in this bar.
    pub fn touches_limit(&self, side: OrderSide, price: f64) -> bool {
        match side {
            OrderSide::Buy => self.low <= price,
            OrderSide::Sell => self.high >= price,
        }
    }

    /// Relative range `(high - low) / close`.
    pub fn relative_range(&self) -> f64 {
        if self.close <= 0.0 {
            return 0.0;
        }
        (self.high - self.low) / self.close
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_bar() -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            100.0,
            105.0,
            98.0,
            103.0,
            50_000.0,
        )
    }

    #[test]
    fn sane_bar_validates() {
        assert!(sample_bar().validate(0).is_ok());
    }

    #[test]
    fn nan_is_malformed() {
        let mut bar = sample_bar();
        bar.open = f64::NAN;
        assert!(matches!(
            bar.validate(3),
            Err(DataIntegrityError::MalformedBar { index: 3, .. })
        ));
    }

    #[test]
    fn inverted_range_is_malformed() {
        let mut bar = sample_bar();
        bar.high = 97.0;
        assert!(bar.validate(0).is_err());
    }

    #[test]
    fn negative_volume_is_malformed() {
        let mut bar = sample_bar();
        bar.volume = -1.0;
        assert!(bar.validate(0).is_err());
    }

    #[test]
    fn limit_touch_depends_on_side() {
        let bar = sample_bar();
        assert!(bar.touches_limit(OrderSide::Buy, 98.0));
        assert!(bar.touches_limit(OrderSide::Buy, 120.0));
        assert!(!bar.touches_limit(OrderSide::Buy, 97.5));
        assert!(bar.touches_limit(OrderSide::Sell, 104.0));
        assert!(!bar.touches_limit(OrderSide::Sell, 105.5));
    }
}
