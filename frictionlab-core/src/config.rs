//! Backtest configuration: one immutable value per run.
//!
//! Every section derives serde with `#[serde(default)]`, so a run file only
//! spells out what it overrides. `validate()` runs once at engine construction.

use serde::{Deserialize, Serialize};

use crate::domain::{Currency, Market, OrderKind, TradingMode};
use crate::error::ConfigurationError;
use crate::execution::{
    BrokerProfile, ContextConfig, LatencyConfig, PartialFillConfig, SlippageConfig,
};

/// Which friction models are active. All off is "ideal mode".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealisticModeFlags {
    pub slippage: bool,
    pub commission: bool,
    pub partial_fills: bool,
    pub latency: bool,
}

impl Default for RealisticModeFlags {
    fn default() -> Self {
        Self::all()
    }
}

impl RealisticModeFlags {
    pub fn all() -> Self {
        Self {
            slippage: true,
            commission: true,
            partial_fills: true,
            latency: true,
        }
    }

    pub fn ideal() -> Self {
        Self {
            slippage: false,
            commission: false,
            partial_fills: false,
            latency: false,
        }
    }

    pub fn is_ideal(&self) -> bool {
        *self == Self::ideal()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub symbol: String,
    pub market: Market,
    pub broker_profile: BrokerProfile,
    pub realistic_mode: RealisticModeFlags,
    pub average_daily_volume: f64,
    pub rng_seed: u64,
    pub initial_capital: f64,
    pub trading_mode: TradingMode,
    pub order_kind: OrderKind,
    /// Order and fill quantities are whole multiples of this.
    pub lot_size: f64,
    /// Quote currency of the instrument. Defaults to the market currency.
    pub instrument_currency: Option<Currency>,
    pub slippage: SlippageConfig,
    pub partial_fill: PartialFillConfig,
    pub latency: LatencyConfig,
    pub context: ContextConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbol: "7203".into(),
            market: Market::Japan,
            broker_profile: BrokerProfile::sbi_japan(),
            realistic_mode: RealisticModeFlags::all(),
            average_daily_volume: 1_000_000.0,
            rng_seed: 42,
            initial_capital: 10_000_000.0,
            trading_mode: TradingMode::LongOnly,
            order_kind: OrderKind::Market,
            lot_size: 1.0,
            instrument_currency: None,
            slippage: SlippageConfig::default(),
            partial_fill: PartialFillConfig::default(),
            latency: LatencyConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

impl BacktestConfig {
    /// Defaults for a market, with its first broker preset.
    pub fn for_market(market: Market) -> Self {
        let broker_profile = match market {
            Market::Japan => BrokerProfile::sbi_japan(),
            Market::Usa => BrokerProfile::interactive_brokers_us(),
        };
        let initial_capital = match market {
            Market::Japan => 10_000_000.0,
            Market::Usa => 100_000.0,
        };
        Self {
            symbol: match market {
                Market::Japan => "7203".into(),
                Market::Usa => "SPY".into(),
            },
            market,
            broker_profile,
            initial_capital,
            ..Self::default()
        }
    }

    /// Same run with every friction model switched off.
    pub fn ideal(&self) -> Self {
        Self {
            realistic_mode: RealisticModeFlags::ideal(),
            ..self.clone()
        }
    }

    pub fn instrument_currency(&self) -> Currency {
        self.instrument_currency
            .unwrap_or_else(|| self.market.currency())
    }

    pub fn bar_duration_ms(&self) -> u64 {
        self.latency.bar_duration_ms
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        ConfigurationError::check_non_negative(
            "average_daily_volume",
            self.average_daily_volume,
        )?;
        ConfigurationError::check_positive("initial_capital", self.initial_capital)?;
        ConfigurationError::check_positive("lot_size", self.lot_size)?;
        if let OrderKind::Limit { offset_bps } = self.order_kind {
            ConfigurationError::check_non_negative("order_kind.offset_bps", offset_bps)?;
        }

        if self.broker_profile.market != self.market {
            return Err(ConfigurationError::MarketMismatch {
                profile: self.broker_profile.name.clone(),
                profile_market: self.broker_profile.market.to_string(),
                market: self.market.to_string(),
            });
        }
        self.broker_profile.validate()?;
        self.slippage.validate()?;
        self.partial_fill.validate()?;
        self.latency.validate()?;
        self.context.validate()?;
        Ok(())
    }

    /// BLAKE3 hash of the canonical JSON form. Stable across runs and platforms.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&canonical).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(BacktestConfig::default().validate().is_ok());
        assert!(BacktestConfig::for_market(Market::Usa).validate().is_ok());
    }

    #[test]
    fn negative_adv_is_rejected() {
        let config = BacktestConfig {
            average_daily_volume: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::NegativeValue {
                field: "average_daily_volume",
                ..
            })
        ));
    }

    #[test]
    fn broker_market_must_match() {
        let config = BacktestConfig {
            market: Market::Usa,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MarketMismatch { .. })
        ));
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let a = BacktestConfig::default();
        let b = BacktestConfig::default();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = BacktestConfig {
            rng_seed: 7,
            ..Default::default()
        };
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn ideal_switches_everything_off() {
        let ideal = BacktestConfig::default().ideal();
        assert!(ideal.realistic_mode.is_ideal());
    }

    #[test]
    fn toml_overrides_only_named_fields() {
        let config: BacktestConfig = toml::from_str(
            r#"
            average_daily_volume = 250000.0
            [partial_fill]
            max_queue_bars = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.average_daily_volume, 250_000.0);
        assert_eq!(config.partial_fill.max_queue_bars, 5);
        assert_eq!(config.partial_fill.decay_k, 2.0);
        assert_eq!(config.market, Market::Japan);
    }
}
