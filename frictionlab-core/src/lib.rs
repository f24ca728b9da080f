//! FrictionLab Core: deterministic trade-execution simulation.
//!
//! Turns strategy signals and historical bars into the P&L a real account
//! would have seen:
//! - Domain types (bars, signals, orders, fills, trades, markets)
//! - Four execution-friction models behind capability traits
//! - `BacktestConfig` with realistic-mode flags and broker presets
//! - Seeded RNG hierarchy for reproducible runs and sweeps
//! - `BacktestEngine`, the single-threaded per-bar loop

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod execution;
pub mod rng;

pub use config::{BacktestConfig, RealisticModeFlags};
pub use engine::{run_backtest, BacktestEngine, BacktestMetrics, BacktestResult, EquityPoint};
pub use error::{ConfigurationError, DataIntegrityError, EngineError};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: what a parallel sweep moves across threads is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<BacktestConfig>();
        require_sync::<BacktestConfig>();
        require_send::<BacktestResult>();
        require_sync::<BacktestResult>();
        require_send::<BacktestEngine>();
        require_send::<execution::ExecutionModels>();
        require_sync::<execution::ExecutionModels>();
        require_send::<rng::RngHierarchy>();
        require_sync::<rng::RngHierarchy>();
        require_send::<EngineError>();
        require_sync::<EngineError>();
    }
}
