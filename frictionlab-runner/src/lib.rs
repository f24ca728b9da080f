//! FrictionLab Runner: run files, data loading, sweeps and walk-forward analysis.
//!
//! This crate builds on `frictionlab-core` to provide:
//! - TOML run files resolved into a validated `BacktestConfig`
//! - CSV bar and signal loading with timestamp alignment
//! - Fitness metrics for ranking runs
//! - Rayon-parallel parameter sweeps with deterministic per-run seeds
//! - Walk-forward validation (anchored or rolling in-sample windows)
//! - JSON/CSV result export

pub mod config;
pub mod data_loader;
pub mod export;
pub mod fitness;
pub mod runner;
pub mod sweep;
pub mod walk_forward;

pub use config::{load_run_file, BrokerSpec, ConfigFileError, LatencySpec, RunFile};
pub use data_loader::{load_bars, load_signals, read_bars, read_signals, LoadError};
pub use export::{export_equity_csv, export_fills_csv, export_json, save_artifacts};
pub use fitness::FitnessMetric;
pub use runner::{run_once, RunError, RunInputs};
pub use sweep::{
    apply_param, ParamGrid, ParamPoint, ParamSweep, SweepError, SweepResults, SweepRun,
    SWEEPABLE_PARAMS,
};
pub use walk_forward::{
    create_folds, run_walk_forward, DegradationFlag, FoldResult, FoldSpec, WalkForwardConfig,
    WalkForwardError, WalkForwardResult, WindowMode,
};
