//! Result export: JSON result, fill tape CSV and equity curve CSV.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use frictionlab_core::domain::{Fill, OrderSide};
use frictionlab_core::engine::{BacktestResult, EquityPoint};

/// Characters of the fingerprint used in artifact directory names.
const FINGERPRINT_PREFIX_LEN: usize = 12;

pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize result")
}

#[derive(Serialize)]
struct FillRow {
    order_id: u64,
    bar_index: usize,
    kind: &'static str,
    side: OrderSide,
    quantity: f64,
    price: f64,
    reference_price: f64,
    slippage_amount: f64,
    base_fee: f64,
    per_share_fee: f64,
    regulatory_fees: f64,
    fx_fee: f64,
    tax: f64,
    commission_total: f64,
}

impl FillRow {
    fn new(fill: &Fill, kind: &'static str) -> Self {
        Self {
            order_id: fill.order_id.0,
            bar_index: fill.bar_index,
            kind,
            side: fill.side,
            quantity: fill.quantity,
            price: fill.price,
            reference_price: fill.reference_price,
            slippage_amount: fill.slippage_amount,
            base_fee: fill.commission.base_fee,
            per_share_fee: fill.commission.per_share_fee,
            regulatory_fees: fill.commission.regulatory_fees,
            fx_fee: fill.commission.fx_fee,
            tax: fill.commission.tax,
            commission_total: fill.commission.total(),
        }
    }
}

/// Export every entry fill and exit slice as CSV, ordered by bar then order id.
pub fn export_fills_csv(result: &BacktestResult) -> Result<String> {
    let mut rows: Vec<FillRow> = result
        .trades
        .iter()
        .flat_map(|t| {
            t.fills
                .iter()
                .map(|f| FillRow::new(f, "entry"))
                .chain(t.exit_fills.iter().map(|f| FillRow::new(f, "exit")))
        })
        .collect();
    rows.sort_by_key(|r| (r.bar_index, r.order_id));

    let mut wtr = csv::Writer::from_writer(vec![]);
    for row in &rows {
        wtr.serialize(row)?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Export an equity curve as CSV, one row per bar.
pub fn export_equity_csv(equity_curve: &[EquityPoint]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["bar_index", "timestamp", "cash", "position", "mark_price", "equity"])?;
    for p in equity_curve {
        wtr.write_record([
            p.bar_index.to_string(),
            p.timestamp.to_rfc3339(),
            format!("{:.2}", p.cash),
            p.position.to_string(),
            p.mark_price.to_string(),
            format!("{:.2}", p.equity),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Save the full artifact set for one run.
///
/// Creates `run_{fingerprint prefix}/` under `output_dir` containing:
/// - `result.json`: the full `BacktestResult`
/// - `fills.csv`: fill tape with commission breakdown
/// - `equity.csv`: bar-by-bar equity curve
///
/// Returns the path to the created directory.
pub fn save_artifacts(result: &BacktestResult, output_dir: &Path) -> Result<PathBuf> {
    let prefix: String = result.fingerprint.chars().take(FINGERPRINT_PREFIX_LEN).collect();
    let run_dir = output_dir.join(format!("run_{prefix}"));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join("result.json"), export_json(result)?)?;
    std::fs::write(run_dir.join("fills.csv"), export_fills_csv(result)?)?;
    std::fs::write(
        run_dir.join("equity.csv"),
        export_equity_csv(&result.equity_curve)?,
    )?;

    Ok(run_dir)
}
