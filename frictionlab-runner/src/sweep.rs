//! Parameter sweep over named config fields.
//!
//! A grid maps dotted config keys to candidate values. The cartesian product
//! is enumerated in key order (last key varies fastest), each point becomes
//! one independent engine run, and runs execute on the rayon pool. Results
//! come back in grid order regardless of scheduling.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use frictionlab_core::config::BacktestConfig;
use frictionlab_core::domain::{Bar, Signal};
use frictionlab_core::engine::BacktestMetrics;
use frictionlab_core::rng::RngHierarchy;

use crate::fitness::{rank_key, FitnessMetric};
use crate::runner::{run_once, RunError};

/// Config keys a grid may vary.
pub const SWEEPABLE_PARAMS: [&str; 9] = [
    "average_daily_volume",
    "slippage.impact_coefficient",
    "slippage.base_slippage_bps",
    "partial_fill.decay_k",
    "partial_fill.liquidity_threshold",
    "partial_fill.max_queue_bars",
    "latency.max_wait_bars",
    "latency.bar_duration_ms",
    "rng_seed",
];

/// Label for per-run seeds derived from a master seed.
const SWEEP_SEED_LABEL: &str = "sweep";

/// One grid point: key → value.
pub type ParamPoint = BTreeMap<String, f64>;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("unknown sweep parameter: {0}")]
    UnknownParameter(String),

    #[error("parameter {key} has no values")]
    EmptyValues { key: String },

    #[error("parameter {key} needs a non-negative integer, got {value}")]
    InvalidValue { key: String, value: f64 },

    #[error("grid entry {key}: {reason}")]
    GridFormat { key: String, reason: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse grid: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("run {index} failed: {source}")]
    Run {
        index: usize,
        #[source]
        source: RunError,
    },
}

// ─── Grid ────────────────────────────────────────────────────────────

/// Parameter grid specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamGrid {
    params: BTreeMap<String, Vec<f64>>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, values: Vec<f64>) -> Self {
        self.params.insert(key.into(), values);
        self
    }

    pub fn params(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.params
    }

    /// Parse a TOML grid. Keys may be dotted (`partial_fill.decay_k = [..]`)
    /// or quoted; values are a number or an array of numbers.
    pub fn from_toml(content: &str) -> Result<Self, SweepError> {
        let table: toml::Table = toml::from_str(content)?;
        let mut params = BTreeMap::new();
        flatten_table(&table, "", &mut params)?;
        let grid = Self { params };
        grid.validate()?;
        Ok(grid)
    }

    pub fn from_file(path: &Path) -> Result<Self, SweepError> {
        let content = std::fs::read_to_string(path).map_err(|source| SweepError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        for (key, values) in &self.params {
            if !SWEEPABLE_PARAMS.contains(&key.as_str()) {
                return Err(SweepError::UnknownParameter(key.clone()));
            }
            if values.is_empty() {
                return Err(SweepError::EmptyValues { key: key.clone() });
            }
        }
        Ok(())
    }

    /// Number of grid points. An empty grid is the single base run.
    pub fn size(&self) -> usize {
        self.params.values().map(Vec::len).product()
    }

    /// Cartesian product in key order, last key varying fastest.
    pub fn points(&self) -> Vec<ParamPoint> {
        let mut points = vec![ParamPoint::new()];
        for (key, values) in &self.params {
            points = points
                .into_iter()
                .flat_map(|point| {
                    values.iter().map(move |&value| {
                        let mut next = point.clone();
                        next.insert(key.clone(), value);
                        next
                    })
                })
                .collect();
        }
        points
    }
}

fn flatten_table(
    table: &toml::Table,
    prefix: &str,
    out: &mut BTreeMap<String, Vec<f64>>,
) -> Result<(), SweepError> {
    for (name, value) in table {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match value {
            toml::Value::Table(inner) => flatten_table(inner, &key, out)?,
            toml::Value::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| as_number(item, &key))
                    .collect::<Result<Vec<f64>, _>>()?;
                out.insert(key, values);
            }
            other => {
                let value = as_number(other, &key)?;
                out.insert(key, vec![value]);
            }
        }
    }
    Ok(())
}

fn as_number(value: &toml::Value, key: &str) -> Result<f64, SweepError> {
    match value {
        toml::Value::Float(f) => Ok(*f),
        toml::Value::Integer(i) => Ok(*i as f64),
        other => Err(SweepError::GridFormat {
            key: key.to_string(),
            reason: format!("expected a number, got {}", other.type_str()),
        }),
    }
}

fn as_count(key: &str, value: f64) -> Result<u64, SweepError> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64 {
        Ok(value as u64)
    } else {
        Err(SweepError::InvalidValue {
            key: key.to_string(),
            value,
        })
    }
}

/// Set one sweepable field on a config.
pub fn apply_param(config: &mut BacktestConfig, key: &str, value: f64) -> Result<(), SweepError> {
    match key {
        "average_daily_volume" => config.average_daily_volume = value,
        "slippage.impact_coefficient" => config.slippage.impact_coefficient = value,
        "slippage.base_slippage_bps" => config.slippage.base_slippage_bps = Some(value),
        "partial_fill.decay_k" => config.partial_fill.decay_k = value,
        "partial_fill.liquidity_threshold" => config.partial_fill.liquidity_threshold = value,
        "partial_fill.max_queue_bars" => {
            config.partial_fill.max_queue_bars = as_count(key, value)? as usize
        }
        "latency.max_wait_bars" => config.latency.max_wait_bars = as_count(key, value)? as usize,
        "latency.bar_duration_ms" => config.latency.bar_duration_ms = as_count(key, value)?,
        "rng_seed" => config.rng_seed = as_count(key, value)?,
        other => return Err(SweepError::UnknownParameter(other.to_string())),
    }
    Ok(())
}

// ─── Sweep ───────────────────────────────────────────────────────────

/// One finished grid point.
#[derive(Debug, Clone, Serialize)]
pub struct SweepRun {
    /// Position in grid order.
    pub index: usize,
    pub params: ParamPoint,
    pub fingerprint: String,
    pub rng_seed: u64,
    pub fitness: f64,
    pub metrics: BacktestMetrics,
    #[serde(skip)]
    pub config: BacktestConfig,
}

/// Parameter sweep executor.
#[derive(Debug, Clone, Default)]
pub struct ParamSweep {
    metric: FitnessMetric,
    sequential: bool,
    master_seed: Option<u64>,
}

impl ParamSweep {
    pub fn new(metric: FitnessMetric) -> Self {
        Self {
            metric,
            ..Self::default()
        }
    }

    /// Enables or disables parallel execution.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.sequential = !parallel;
        self
    }

    /// Derive each run's seed from `seed` and its grid index.
    pub fn with_master_seed(mut self, seed: u64) -> Self {
        self.master_seed = Some(seed);
        self
    }

    pub fn metric(&self) -> FitnessMetric {
        self.metric
    }

    /// Build the config for every grid point, in grid order.
    pub fn configs(
        &self,
        grid: &ParamGrid,
        base: &BacktestConfig,
    ) -> Result<Vec<(ParamPoint, BacktestConfig)>, SweepError> {
        grid.validate()?;
        let hierarchy = self.master_seed.map(RngHierarchy::new);
        grid.points()
            .into_iter()
            .enumerate()
            .map(|(index, point)| {
                let mut config = base.clone();
                if let Some(h) = &hierarchy {
                    config.rng_seed = h.sub_seed(SWEEP_SEED_LABEL, index as u64);
                }
                for (key, &value) in &point {
                    apply_param(&mut config, key, value)?;
                }
                Ok((point, config))
            })
            .collect()
    }

    /// Run every grid point over the same bars and signals.
    pub fn run(
        &self,
        grid: &ParamGrid,
        base: &BacktestConfig,
        bars: &[Bar],
        signals: &[Option<Signal>],
    ) -> Result<SweepResults, SweepError> {
        let configs = self.configs(grid, base)?;
        info!(
            points = configs.len(),
            metric = %self.metric,
            parallel = !self.sequential,
            "sweep started"
        );

        let evaluate = |(index, (params, config)): (usize, &(ParamPoint, BacktestConfig))|
         -> Result<SweepRun, SweepError> {
            let result =
                run_once(config, bars, signals).map_err(|source| SweepError::Run { index, source })?;
            let fitness = self.metric.extract(&result.metrics);
            debug!(index, fitness, params = ?params, "sweep run finished");
            Ok(SweepRun {
                index,
                params: params.clone(),
                fingerprint: result.fingerprint,
                rng_seed: config.rng_seed,
                fitness,
                metrics: result.metrics,
                config: config.clone(),
            })
        };

        let runs: Vec<SweepRun> = if self.sequential {
            configs
                .iter()
                .enumerate()
                .map(evaluate)
                .collect::<Result<Vec<_>, SweepError>>()?
        } else {
            configs
                .par_iter()
                .enumerate()
                .map(evaluate)
                .collect::<Result<Vec<_>, SweepError>>()?
        };

        let results = SweepResults {
            metric: self.metric,
            runs,
        };
        if let Some(best) = results.best() {
            info!(
                best_index = best.index,
                best_fitness = best.fitness,
                "sweep finished"
            );
        }
        Ok(results)
    }
}

/// Results from a parameter sweep, in grid order.
#[derive(Debug, Clone, Serialize)]
pub struct SweepResults {
    pub metric: FitnessMetric,
    pub runs: Vec<SweepRun>,
}

impl SweepResults {
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Best first. Ties keep grid order.
    pub fn sorted(&self) -> Vec<&SweepRun> {
        let mut sorted: Vec<&SweepRun> = self.runs.iter().collect();
        sorted.sort_by(|a, b| rank_key(b.fitness).total_cmp(&rank_key(a.fitness)));
        sorted
    }

    pub fn top_n(&self, n: usize) -> Vec<&SweepRun> {
        self.sorted().into_iter().take(n).collect()
    }

    pub fn best(&self) -> Option<&SweepRun> {
        self.sorted().into_iter().next()
    }
}
