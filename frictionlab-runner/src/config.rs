//! TOML run files.
//!
//! A run file names everything that differs from the market defaults:
//!
//! ```toml
//! market = "usa"
//! broker = "interactive_brokers_us"
//! initial_capital = 250000.0
//!
//! [latency]
//! preset = "delayed_retail"
//! max_wait_bars = 4
//!
//! [partial_fill]
//! max_queue_bars = 5
//! ```
//!
//! `broker` is either a preset key or an inline `BrokerProfile` table.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use frictionlab_core::config::{BacktestConfig, RealisticModeFlags};
use frictionlab_core::domain::{Currency, Market, OrderKind, TradingMode};
use frictionlab_core::error::ConfigurationError;
use frictionlab_core::execution::{
    BrokerProfile, ContextConfig, FeedMode, LatencyConfig, LatencyDistribution,
    PartialFillConfig, SlippageConfig,
};

/// Errors from reading and resolving a run file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse run file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid run file: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// Broker selection: `broker = "sbi_japan"` or an inline `[broker]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BrokerSpec {
    Preset(String),
    Inline(BrokerProfile),
}

impl BrokerSpec {
    pub fn resolve(&self) -> Result<BrokerProfile, ConfigurationError> {
        match self {
            BrokerSpec::Preset(key) => BrokerProfile::preset(key),
            BrokerSpec::Inline(profile) => Ok(profile.clone()),
        }
    }
}

/// Latency section: an optional preset plus per-field overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LatencySpec {
    pub preset: Option<String>,
    pub api: Option<LatencyDistribution>,
    pub feed: Option<FeedMode>,
    pub execution: Option<LatencyDistribution>,
    pub jitter: Option<LatencyDistribution>,
    pub bar_duration_ms: Option<u64>,
    pub max_wait_bars: Option<usize>,
}

impl LatencySpec {
    pub fn resolve(&self) -> Result<LatencyConfig, ConfigurationError> {
        let mut config = match &self.preset {
            Some(name) => LatencyConfig::preset(name)?,
            None => LatencyConfig::default(),
        };
        if let Some(api) = self.api {
            config.api = api;
        }
        if let Some(feed) = self.feed {
            config.feed = feed;
        }
        if let Some(execution) = self.execution {
            config.execution = execution;
        }
        if let Some(jitter) = self.jitter {
            config.jitter = jitter;
        }
        if let Some(ms) = self.bar_duration_ms {
            config.bar_duration_ms = ms;
        }
        if let Some(bars) = self.max_wait_bars {
            config.max_wait_bars = bars;
        }
        Ok(config)
    }
}

/// On-disk form of a `BacktestConfig`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunFile {
    pub symbol: Option<String>,
    pub market: Option<Market>,
    pub broker: Option<BrokerSpec>,
    pub realistic_mode: Option<RealisticModeFlags>,
    pub average_daily_volume: Option<f64>,
    pub rng_seed: Option<u64>,
    pub initial_capital: Option<f64>,
    pub trading_mode: Option<TradingMode>,
    pub order_kind: Option<OrderKind>,
    pub lot_size: Option<f64>,
    pub instrument_currency: Option<Currency>,
    pub slippage: Option<SlippageConfig>,
    pub partial_fill: Option<PartialFillConfig>,
    pub latency: LatencySpec,
    pub context: Option<ContextConfig>,
}

impl RunFile {
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Resolve presets over the market defaults and validate the result.
    pub fn into_config(self) -> Result<BacktestConfig, ConfigurationError> {
        let mut config = BacktestConfig::for_market(self.market.unwrap_or(Market::Japan));

        if let Some(symbol) = self.symbol {
            config.symbol = symbol;
        }
        if let Some(broker) = &self.broker {
            config.broker_profile = broker.resolve()?;
        }
        if let Some(flags) = self.realistic_mode {
            config.realistic_mode = flags;
        }
        if let Some(adv) = self.average_daily_volume {
            config.average_daily_volume = adv;
        }
        if let Some(seed) = self.rng_seed {
            config.rng_seed = seed;
        }
        if let Some(capital) = self.initial_capital {
            config.initial_capital = capital;
        }
        if let Some(mode) = self.trading_mode {
            config.trading_mode = mode;
        }
        if let Some(kind) = self.order_kind {
            config.order_kind = kind;
        }
        if let Some(lot) = self.lot_size {
            config.lot_size = lot;
        }
        config.instrument_currency = self.instrument_currency;
        if let Some(slippage) = self.slippage {
            config.slippage = slippage;
        }
        if let Some(partial_fill) = self.partial_fill {
            config.partial_fill = partial_fill;
        }
        config.latency = self.latency.resolve()?;
        if let Some(context) = self.context {
            config.context = context;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Read, resolve and validate a run file.
pub fn load_run_file(path: &Path) -> Result<BacktestConfig, ConfigFileError> {
    Ok(RunFile::from_file(path)?.into_config()?)
}
