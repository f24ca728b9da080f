//! Walk-forward validation: fold splitting, in-sample selection, out-of-sample evaluation.
//!
//! Splits the bar series into in-sample (IS) windows followed by contiguous,
//! non-overlapping out-of-sample (OOS) windows. Per fold, the parameter grid
//! is swept on IS bars, the best point by fitness is re-run on the OOS bars,
//! and the mean OOS/IS fitness ratio measures how much of the IS edge survives.
//!
//! Every IS and OOS run starts flat with the configured initial capital.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use frictionlab_core::config::BacktestConfig;
use frictionlab_core::domain::{Bar, Signal};
use frictionlab_core::engine::BacktestMetrics;

use crate::fitness::FitnessMetric;
use crate::runner::{run_once, RunError};
use crate::sweep::{ParamGrid, ParamPoint, ParamSweep, SweepError};

/// IS fitness below this uses the OOS − IS difference instead of a ratio.
const LOW_IS_FITNESS: f64 = 0.1;

// ─── Configuration ───────────────────────────────────────────────────

/// How the in-sample window moves from fold to fold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// IS always starts at bar 0 and grows by one OOS window per fold.
    #[default]
    Anchored,
    /// IS keeps a fixed length of `min_is_bars` and slides forward.
    Rolling,
}

/// Configuration for walk-forward validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardConfig {
    pub n_folds: usize,
    pub min_is_bars: usize,
    pub min_oos_bars: usize,
    pub window: WindowMode,
    pub metric: FitnessMetric,
    /// Run each fold's sweep on the rayon pool.
    pub parallel: bool,
    pub master_seed: Option<u64>,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            n_folds: 5,
            min_is_bars: 252,
            min_oos_bars: 63,
            window: WindowMode::Anchored,
            metric: FitnessMetric::Sharpe,
            parallel: true,
            master_seed: None,
        }
    }
}

// ─── Result types ────────────────────────────────────────────────────

/// Bar index ranges of one fold. Ends are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldSpec {
    pub fold_index: usize,
    pub is_start: usize,
    pub is_end: usize,
    pub oos_start: usize,
    pub oos_end: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FoldResult {
    pub spec: FoldSpec,
    pub best_params: ParamPoint,
    pub is_fitness: f64,
    pub oos_fitness: f64,
    pub is_trades: usize,
    pub oos_trades: usize,
    pub oos_metrics: BacktestMetrics,
}

/// How the degradation ratio was computed (or why it wasn't).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DegradationFlag {
    /// IS fitness >= 0.1, ratio computed normally.
    Normal,
    /// IS fitness in [0, 0.1): difference (OOS − IS) instead of a ratio.
    LowIsFitness,
    /// IS fitness is negative, ratio skipped.
    NegativeIsFitness,
    /// IS fitness >= 0.1 but OOS negative: clamped to 0.0.
    FailedOos,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalkForwardResult {
    pub metric: FitnessMetric,
    pub folds: Vec<FoldResult>,
    pub mean_is_fitness: f64,
    pub mean_oos_fitness: f64,
    /// None when the ratio cannot be computed (see `degradation_flag`).
    pub degradation_ratio: Option<f64>,
    pub degradation_flag: DegradationFlag,
}

#[derive(Debug, Error)]
pub enum WalkForwardError {
    #[error("insufficient data: {total_bars} bars < minimum {min_bars}")]
    InsufficientData { total_bars: usize, min_bars: usize },
    #[error("fold creation failed: cannot fit {n_folds} folds in {total_bars} bars")]
    FoldCreationFailed { n_folds: usize, total_bars: usize },
    #[error("signal stream has {signals} entries for {bars} bars")]
    LengthMismatch { bars: usize, signals: usize },
    #[error("sweep error on fold {fold}: {source}")]
    Sweep {
        fold: usize,
        #[source]
        source: SweepError,
    },
    #[error("sweep produced no runs on fold {fold}")]
    NoCandidates { fold: usize },
    #[error("out-of-sample run failed on fold {fold}: {source}")]
    OutOfSample {
        fold: usize,
        #[source]
        source: RunError,
    },
}

// ─── Fold creation ───────────────────────────────────────────────────

/// Create walk-forward fold specifications.
///
/// The bars after the first `min_is_bars` are split into `n_folds` equal OOS
/// windows (any remainder at the end is unused):
/// - Fold 0: IS = [.. min_is], OOS = [min_is .. min_is + oos]
/// - Fold i: IS ends where fold i's OOS starts, OOS = the next `oos` bars
pub fn create_folds(
    total_bars: usize,
    config: &WalkForwardConfig,
) -> Result<Vec<FoldSpec>, WalkForwardError> {
    let n = config.n_folds;
    if n == 0 || config.min_is_bars == 0 {
        return Err(WalkForwardError::FoldCreationFailed {
            n_folds: n,
            total_bars,
        });
    }

    let min_bars = config.min_is_bars + n * config.min_oos_bars.max(1);
    if total_bars < min_bars {
        return Err(WalkForwardError::InsufficientData {
            total_bars,
            min_bars,
        });
    }

    let oos_size = (total_bars - config.min_is_bars) / n;
    let folds = (0..n)
        .map(|i| {
            let is_end = config.min_is_bars + i * oos_size;
            let is_start = match config.window {
                WindowMode::Anchored => 0,
                WindowMode::Rolling => is_end - config.min_is_bars,
            };
            FoldSpec {
                fold_index: i,
                is_start,
                is_end,
                oos_start: is_end,
                oos_end: is_end + oos_size,
            }
        })
        .collect();
    Ok(folds)
}

// ─── Walk-forward orchestration ──────────────────────────────────────

/// Run walk-forward validation: per fold, sweep on IS, evaluate the best point on OOS.
pub fn run_walk_forward(
    base: &BacktestConfig,
    grid: &ParamGrid,
    bars: &[Bar],
    signals: &[Option<Signal>],
    config: &WalkForwardConfig,
) -> Result<WalkForwardResult, WalkForwardError> {
    if bars.len() != signals.len() {
        return Err(WalkForwardError::LengthMismatch {
            bars: bars.len(),
            signals: signals.len(),
        });
    }
    let specs = create_folds(bars.len(), config)?;

    let mut sweep = ParamSweep::new(config.metric).with_parallelism(config.parallel);
    if let Some(seed) = config.master_seed {
        sweep = sweep.with_master_seed(seed);
    }

    let mut folds = Vec::with_capacity(specs.len());
    for spec in specs {
        let fold = spec.fold_index;
        let is_bars = &bars[spec.is_start..spec.is_end];
        let is_signals = &signals[spec.is_start..spec.is_end];
        let oos_bars = &bars[spec.oos_start..spec.oos_end];
        let oos_signals = &signals[spec.oos_start..spec.oos_end];

        let sweep_results = sweep
            .run(grid, base, is_bars, is_signals)
            .map_err(|source| WalkForwardError::Sweep { fold, source })?;
        let Some(best) = sweep_results.best() else {
            return Err(WalkForwardError::NoCandidates { fold });
        };

        let oos = run_once(&best.config, oos_bars, oos_signals)
            .map_err(|source| WalkForwardError::OutOfSample { fold, source })?;
        let oos_fitness = config.metric.extract(&oos.metrics);

        info!(
            fold,
            is_bars = is_bars.len(),
            oos_bars = oos_bars.len(),
            is_fitness = best.fitness,
            oos_fitness,
            "fold evaluated"
        );

        folds.push(FoldResult {
            spec,
            best_params: best.params.clone(),
            is_fitness: best.fitness,
            oos_fitness,
            is_trades: best.metrics.trade_count,
            oos_trades: oos.metrics.trade_count,
            oos_metrics: oos.metrics,
        });
    }

    Ok(compute_walk_forward_stats(config.metric, folds))
}

/// Compute aggregate walk-forward statistics from fold results.
fn compute_walk_forward_stats(metric: FitnessMetric, folds: Vec<FoldResult>) -> WalkForwardResult {
    let n = folds.len().max(1) as f64;
    let mean_is_fitness = folds.iter().map(|f| f.is_fitness).sum::<f64>() / n;
    let mean_oos_fitness = folds.iter().map(|f| f.oos_fitness).sum::<f64>() / n;
    let (degradation_ratio, degradation_flag) =
        compute_degradation_ratio(mean_is_fitness, mean_oos_fitness);

    info!(
        folds = folds.len(),
        mean_is_fitness,
        mean_oos_fitness,
        flag = ?degradation_flag,
        "walk-forward finished"
    );

    WalkForwardResult {
        metric,
        folds,
        mean_is_fitness,
        mean_oos_fitness,
        degradation_ratio,
        degradation_flag,
    }
}

/// Degradation ratio with edge case handling.
///
/// - IS >= 0.1: ratio = OOS / IS (Normal)
/// - 0 <= IS < 0.1: difference = OOS − IS (LowIsFitness)
/// - IS < 0: skipped (NegativeIsFitness)
/// - IS >= 0.1 but OOS < 0: clamped to 0.0 (FailedOos)
fn compute_degradation_ratio(mean_is: f64, mean_oos: f64) -> (Option<f64>, DegradationFlag) {
    if mean_is < 0.0 || mean_is.is_nan() {
        (None, DegradationFlag::NegativeIsFitness)
    } else if mean_is < LOW_IS_FITNESS {
        (Some(mean_oos - mean_is), DegradationFlag::LowIsFitness)
    } else if mean_oos < 0.0 {
        (Some(0.0), DegradationFlag::FailedOos)
    } else {
        (Some(mean_oos / mean_is), DegradationFlag::Normal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(n_folds: usize, min_is_bars: usize, min_oos_bars: usize) -> WalkForwardConfig {
        WalkForwardConfig {
            n_folds,
            min_is_bars,
            min_oos_bars,
            ..Default::default()
        }
    }

    // ─── Fold creation tests ─────────────────────────────────────

    #[test]
    fn anchored_folds_expand() {
        let folds = create_folds(1000, &config(5, 250, 50)).unwrap();
        assert_eq!(folds.len(), 5);
        assert_eq!(folds[0].is_end, 250);
        assert_eq!(folds[0].oos_end, 400);
        for fold in &folds {
            assert_eq!(fold.is_start, 0);
        }
        for i in 1..folds.len() {
            assert!(folds[i].is_end > folds[i - 1].is_end);
        }
    }

    #[test]
    fn rolling_folds_keep_is_length() {
        let cfg = WalkForwardConfig {
            window: WindowMode::Rolling,
            ..config(4, 200, 50)
        };
        let folds = create_folds(1000, &cfg).unwrap();
        for fold in &folds {
            assert_eq!(fold.is_end - fold.is_start, 200);
        }
        assert_eq!(folds[1].is_start, 200);
    }

    #[test]
    fn oos_windows_are_contiguous_and_disjoint() {
        let folds = create_folds(1003, &config(5, 250, 50)).unwrap();
        for i in 1..folds.len() {
            assert_eq!(folds[i].oos_start, folds[i - 1].oos_end);
        }
        for fold in &folds {
            assert_eq!(fold.oos_start, fold.is_end);
            assert!(fold.oos_end <= 1003);
            assert!(fold.oos_end - fold.oos_start >= 50);
        }
    }

    #[test]
    fn insufficient_data() {
        assert!(matches!(
            create_folds(500, &config(5, 252, 63)),
            Err(WalkForwardError::InsufficientData {
                total_bars: 500,
                min_bars: 567
            })
        ));
    }

    #[test]
    fn zero_folds_fail() {
        assert!(matches!(
            create_folds(500, &config(0, 100, 10)),
            Err(WalkForwardError::FoldCreationFailed { .. })
        ));
    }

    // ─── Degradation ratio tests ─────────────────────────────────

    #[test]
    fn degradation_normal() {
        let (ratio, flag) = compute_degradation_ratio(2.0, 1.0);
        assert_eq!(flag, DegradationFlag::Normal);
        assert!((ratio.unwrap() - 0.5).abs() < 1e-10);
    }

    #[test]
    fn degradation_low_is_fitness() {
        let (ratio, flag) = compute_degradation_ratio(0.05, 0.03);
        assert_eq!(flag, DegradationFlag::LowIsFitness);
        assert!((ratio.unwrap() - (-0.02)).abs() < 1e-10);
    }

    #[test]
    fn degradation_negative_is() {
        let (ratio, flag) = compute_degradation_ratio(-0.5, 0.3);
        assert_eq!(flag, DegradationFlag::NegativeIsFitness);
        assert!(ratio.is_none());
    }

    #[test]
    fn degradation_failed_oos() {
        let (ratio, flag) = compute_degradation_ratio(1.5, -0.3);
        assert_eq!(flag, DegradationFlag::FailedOos);
        assert_eq!(ratio, Some(0.0));
    }
}
