//! Backtest runner: wires run files, CSV data and the engine together.
//!
//! `RunInputs` owns one config plus aligned bars and signals. The sweep and
//! walk-forward layers clone the config and borrow the data, so every engine
//! instance runs in isolation.

use std::path::Path;

use thiserror::Error;
use tracing::info;

use frictionlab_core::config::BacktestConfig;
use frictionlab_core::domain::{Bar, Signal};
use frictionlab_core::engine::{BacktestEngine, BacktestResult};
use frictionlab_core::error::EngineError;

use crate::config::{load_run_file, ConfigFileError};
use crate::data_loader::{load_bars, load_signals, LoadError};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigFileError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Run one engine over pre-loaded data. No I/O.
pub fn run_once(
    config: &BacktestConfig,
    bars: &[Bar],
    signals: &[Option<Signal>],
) -> Result<BacktestResult, RunError> {
    let engine = BacktestEngine::new(config.clone())?;
    Ok(engine.run(bars, signals)?)
}

/// A validated config with the bars and signals it runs over.
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub config: BacktestConfig,
    pub bars: Vec<Bar>,
    pub signals: Vec<Option<Signal>>,
}

impl RunInputs {
    pub fn new(config: BacktestConfig, bars: Vec<Bar>, signals: Vec<Option<Signal>>) -> Self {
        Self {
            config,
            bars,
            signals,
        }
    }

    /// Load a run file, a bar CSV and a signal CSV.
    pub fn load(config_path: &Path, bars_path: &Path, signals_path: &Path) -> Result<Self, RunError> {
        let config = load_run_file(config_path)?;
        let bars = load_bars(bars_path)?;
        let signals = load_signals(signals_path, &bars)?;
        info!(
            symbol = %config.symbol,
            market = %config.market,
            bars = bars.len(),
            fingerprint = %config.fingerprint(),
            "inputs loaded"
        );
        Ok(Self::new(config, bars, signals))
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Bars and signals in `[start, end)`, clamped to the data.
    pub fn slice(&self, start: usize, end: usize) -> (&[Bar], &[Option<Signal>]) {
        let end = end.min(self.bars.len());
        let start = start.min(end);
        (&self.bars[start..end], &self.signals[start..end])
    }

    /// Switch every friction model off.
    pub fn into_ideal(self) -> Self {
        Self {
            config: self.config.ideal(),
            ..self
        }
    }

    pub fn run(&self) -> Result<BacktestResult, RunError> {
        run_once(&self.config, &self.bars, &self.signals)
    }
}
