//! FrictionLab CLI: run, sweep and walk-forward commands.
//!
//! Commands:
//! - `run`: execute one backtest from a TOML run file and CSV data
//! - `sweep`: run a parameter grid and rank the runs by fitness
//! - `walk-forward`: sweep on in-sample folds, evaluate on out-of-sample
//! - `presets`: list broker-profile and latency preset keys

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use frictionlab_core::execution::{BrokerProfile, LatencyConfig};
use frictionlab_core::BacktestResult;
use frictionlab_runner::{
    export_json, run_walk_forward, save_artifacts, FitnessMetric, ParamGrid, ParamSweep,
    RunInputs, WalkForwardConfig, WindowMode,
};

#[derive(Parser)]
#[command(
    name = "frictionlab",
    about = "FrictionLab CLI: trade execution friction simulator"
)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Inputs shared by every backtest command.
#[derive(clap::Args)]
struct InputArgs {
    /// Path to a TOML run file.
    #[arg(long)]
    config: PathBuf,

    /// Bar CSV: timestamp,open,high,low,close,volume.
    #[arg(long)]
    bars: PathBuf,

    /// Signal CSV: timestamp,side,target_quantity.
    #[arg(long)]
    signals: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one backtest.
    Run {
        #[command(flatten)]
        inputs: InputArgs,

        /// Write the result JSON here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Also save result.json, fills.csv and equity.csv under this directory.
        #[arg(long)]
        artifacts: Option<PathBuf>,

        /// Disable every friction model.
        #[arg(long, default_value_t = false)]
        ideal: bool,
    },
    /// Run every point of a parameter grid.
    Sweep {
        #[command(flatten)]
        inputs: InputArgs,

        /// TOML grid file: `key = [values]` per sweepable parameter.
        #[arg(long)]
        grid: PathBuf,

        /// Fitness metric: sharpe, total_return, net_profit, max_drawdown, fill_ratio.
        #[arg(long, default_value = "sharpe")]
        metric: FitnessMetric,

        /// Run grid points one at a time.
        #[arg(long, default_value_t = false)]
        sequential: bool,

        /// Derive each run's rng seed from this master seed.
        #[arg(long)]
        master_seed: Option<u64>,

        /// Number of ranked runs to print.
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Write all runs as JSON here.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Walk-forward validation over the grid.
    WalkForward {
        #[command(flatten)]
        inputs: InputArgs,

        /// TOML grid file swept on every in-sample window.
        #[arg(long)]
        grid: PathBuf,

        #[arg(long, default_value_t = 5)]
        folds: usize,

        #[arg(long, default_value_t = 252)]
        min_is_bars: usize,

        #[arg(long, default_value_t = 63)]
        min_oos_bars: usize,

        /// Fixed-length in-sample windows instead of anchored ones.
        #[arg(long, default_value_t = false)]
        rolling: bool,

        #[arg(long, default_value = "sharpe")]
        metric: FitnessMetric,

        #[arg(long, default_value_t = false)]
        sequential: bool,

        #[arg(long)]
        master_seed: Option<u64>,

        /// Write the walk-forward result JSON here.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List broker-profile and latency preset keys.
    Presets,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command {
        Commands::Run {
            inputs,
            output,
            artifacts,
            ideal,
        } => run_cmd(&inputs, output.as_deref(), artifacts.as_deref(), ideal),
        Commands::Sweep {
            inputs,
            grid,
            metric,
            sequential,
            master_seed,
            top,
            output,
        } => {
            let mut sweep = ParamSweep::new(metric).with_parallelism(!sequential);
            if let Some(seed) = master_seed {
                sweep = sweep.with_master_seed(seed);
            }
            sweep_cmd(&inputs, &grid, &sweep, top, output.as_deref())
        }
        Commands::WalkForward {
            inputs,
            grid,
            folds,
            min_is_bars,
            min_oos_bars,
            rolling,
            metric,
            sequential,
            master_seed,
            output,
        } => {
            let wf_config = WalkForwardConfig {
                n_folds: folds,
                min_is_bars,
                min_oos_bars,
                window: if rolling {
                    WindowMode::Rolling
                } else {
                    WindowMode::Anchored
                },
                metric,
                parallel: !sequential,
                master_seed,
            };
            walk_forward_cmd(&inputs, &grid, &wf_config, output.as_deref())
        }
        Commands::Presets => {
            print_presets();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn load_inputs(args: &InputArgs) -> Result<RunInputs> {
    RunInputs::load(&args.config, &args.bars, &args.signals).with_context(|| {
        format!(
            "failed to load inputs (config {}, bars {}, signals {})",
            args.config.display(),
            args.bars.display(),
            args.signals.display()
        )
    })
}

fn write_or_print(json: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "output written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_cmd(
    args: &InputArgs,
    output: Option<&Path>,
    artifacts: Option<&Path>,
    ideal: bool,
) -> Result<()> {
    let mut inputs = load_inputs(args)?;
    if ideal {
        inputs = inputs.into_ideal();
    }
    let result = inputs.run()?;

    // Summary goes to stderr when the JSON goes to stdout.
    print_summary(&result);

    write_or_print(&export_json(&result)?, output)?;

    if let Some(dir) = artifacts {
        let run_dir = save_artifacts(&result, dir)?;
        eprintln!("Artifacts saved to: {}", run_dir.display());
    }
    Ok(())
}

fn sweep_cmd(
    args: &InputArgs,
    grid_path: &Path,
    sweep: &ParamSweep,
    top: usize,
    output: Option<&Path>,
) -> Result<()> {
    let inputs = load_inputs(args)?;
    let grid = ParamGrid::from_file(grid_path)?;
    let results = sweep.run(&grid, &inputs.config, &inputs.bars, &inputs.signals)?;

    eprintln!();
    eprintln!(
        "=== Sweep: {} runs, ranked by {} ===",
        results.len(),
        sweep.metric()
    );
    eprintln!("{:>5} {:>12}  Params", "Index", "Fitness");
    for run in results.top_n(top) {
        let params: Vec<String> = run.params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        eprintln!("{:>5} {:>12.4}  {}", run.index, run.fitness, params.join(" "));
    }
    eprintln!();

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&results.runs)?;
        write_or_print(&json, Some(path))?;
    }
    Ok(())
}

fn walk_forward_cmd(
    args: &InputArgs,
    grid_path: &Path,
    wf_config: &WalkForwardConfig,
    output: Option<&Path>,
) -> Result<()> {
    let inputs = load_inputs(args)?;
    let grid = ParamGrid::from_file(grid_path)?;
    let result = run_walk_forward(
        &inputs.config,
        &grid,
        &inputs.bars,
        &inputs.signals,
        wf_config,
    )?;

    eprintln!();
    eprintln!("=== Walk-forward: {} folds, {} ===", result.folds.len(), result.metric);
    eprintln!(
        "{:>4} {:>13} {:>13} {:>10} {:>10}",
        "Fold", "IS bars", "OOS bars", "IS fit", "OOS fit"
    );
    for fold in &result.folds {
        let s = &fold.spec;
        eprintln!(
            "{:>4} {:>13} {:>13} {:>10.4} {:>10.4}",
            s.fold_index,
            format!("{}..{}", s.is_start, s.is_end),
            format!("{}..{}", s.oos_start, s.oos_end),
            fold.is_fitness,
            fold.oos_fitness
        );
    }
    eprintln!("Mean IS fitness:   {:.4}", result.mean_is_fitness);
    eprintln!("Mean OOS fitness:  {:.4}", result.mean_oos_fitness);
    match result.degradation_ratio {
        Some(ratio) => eprintln!(
            "Degradation:       {ratio:.4} ({:?})",
            result.degradation_flag
        ),
        None => eprintln!("Degradation:       n/a ({:?})", result.degradation_flag),
    }
    eprintln!();

    write_or_print(&serde_json::to_string_pretty(&result)?, output)
}

fn print_presets() {
    println!("Broker profiles:");
    for key in BrokerProfile::PRESETS {
        match BrokerProfile::preset(key) {
            Ok(profile) => println!("  {:<24} {} ({})", key, profile.name, profile.market),
            Err(_) => println!("  {key}"),
        }
    }
    println!();
    println!("Latency presets:");
    for key in LatencyConfig::PRESETS {
        match LatencyConfig::preset(key) {
            Ok(latency) => println!(
                "  {:<24} feed {:?}, max wait {} bars",
                key, latency.feed, latency.max_wait_bars
            ),
            Err(_) => println!("  {key}"),
        }
    }
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    eprintln!();
    eprintln!("=== Backtest Results ===");
    eprintln!("Fingerprint:      {}", result.fingerprint);
    eprintln!();
    eprintln!("Initial capital:  {:.2}", m.initial_capital);
    eprintln!("Final equity:     {:.2}", m.final_equity);
    eprintln!("Total return:     {:.2}%", m.total_return * 100.0);
    eprintln!("Sharpe:           {:.3}", m.sharpe);
    eprintln!("Max drawdown:     {:.2}%", m.max_drawdown * 100.0);
    eprintln!();
    eprintln!(
        "Trades:           {} ({} closed)",
        m.trade_count, m.closed_trade_count
    );
    eprintln!("Win rate:         {:.1}%", m.win_rate * 100.0);
    eprintln!("Profit factor:    {:.2}", m.profit_factor);
    eprintln!();
    eprintln!("Commission:       {:.2}", m.total_commission);
    eprintln!("Slippage:         {:.2}", m.total_slippage);
    eprintln!(
        "Fill ratio:       {:.1}% ({:.0} / {:.0})",
        m.fill_ratio * 100.0,
        m.filled_quantity,
        m.requested_quantity
    );
    eprintln!("Avg bars to fill: {:.2}", m.avg_bars_to_fill);
    eprintln!(
        "Cancelled:        {}   Rejected: {}",
        m.cancelled_orders, m.rejected_orders
    );
    eprintln!();
}
