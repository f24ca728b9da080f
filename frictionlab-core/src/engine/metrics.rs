//! Performance metrics: pure functions over the equity curve and trade list.
//!
//! Computed once, when the run finishes.

use serde::{Deserialize, Serialize};

use super::ledger::EquityPoint;
use super::order_book::OrderBook;
use crate::domain::{Market, OrderState, RejectedOrder, Trade, DAY_MS};

/// Bars per year for a daily series.
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Aggregate statistics for one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub sharpe: f64,
    /// Negative fraction, e.g. `-0.15` for a 15% drawdown.
    pub max_drawdown: f64,
    pub trade_count: usize,
    pub closed_trade_count: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_commission: f64,
    pub total_slippage: f64,
    pub requested_quantity: f64,
    pub filled_quantity: f64,
    /// `filled_quantity / requested_quantity`, 1.0 when nothing was requested.
    pub fill_ratio: f64,
    pub cancelled_orders: usize,
    pub rejected_orders: usize,
    /// Mean bars from signal to final fill, over fully filled orders.
    pub avg_bars_to_fill: f64,
}

impl BacktestMetrics {
    pub fn compute(
        initial_capital: f64,
        equity_curve: &[EquityPoint],
        trades: &[Trade],
        book: &OrderBook,
        rejected: &[RejectedOrder],
        periods_per_year: f64,
    ) -> Self {
        let equity: Vec<f64> = std::iter::once(initial_capital)
            .chain(equity_curve.iter().map(|p| p.equity))
            .collect();
        let final_equity = equity.last().copied().unwrap_or(initial_capital);

        let closed: Vec<&Trade> = trades.iter().filter(|t| t.is_closed()).collect();

        let requested_quantity: f64 = book.orders().map(|o| o.request.requested_quantity).sum();
        let filled_quantity: f64 = book.orders().map(|o| o.filled_quantity).sum();
        let fill_ratio = if requested_quantity > 0.0 {
            filled_quantity / requested_quantity
        } else {
            1.0
        };

        let cancelled_orders = book
            .orders()
            .filter(|o| matches!(o.state, OrderState::Cancelled { .. }))
            .count();

        let bars_to_fill: Vec<f64> = book
            .orders()
            .filter(|o| o.state == OrderState::Filled)
            .filter_map(|o| {
                o.completed_bar
                    .map(|bar| bar.saturating_sub(o.request.signal_bar_index) as f64)
            })
            .collect();

        Self {
            initial_capital,
            final_equity,
            total_return: total_return(&equity),
            sharpe: sharpe_ratio(&equity, periods_per_year),
            max_drawdown: max_drawdown(&equity),
            trade_count: trades.len(),
            closed_trade_count: closed.len(),
            win_rate: win_rate(&closed),
            profit_factor: profit_factor(&closed),
            total_commission: trades.iter().map(|t| t.total_commission).sum(),
            total_slippage: trades.iter().map(|t| t.total_slippage).sum(),
            requested_quantity,
            filled_quantity,
            fill_ratio,
            cancelled_orders,
            rejected_orders: rejected.len(),
            avg_bars_to_fill: mean_f64(&bars_to_fill),
        }
    }
}

/// Annualisation factor for a bar duration.
///
/// Daily and longer bars scale from 252 trading days. Intraday bars count how
/// many fit into one trading session.
pub fn periods_per_year(bar_duration_ms: u64, market: Market) -> f64 {
    if bar_duration_ms == 0 {
        return TRADING_DAYS_PER_YEAR;
    }
    let bar_ms = bar_duration_ms as f64;
    if bar_duration_ms >= DAY_MS {
        TRADING_DAYS_PER_YEAR * DAY_MS as f64 / bar_ms
    } else {
        TRADING_DAYS_PER_YEAR * (market.session_ms() as f64 / bar_ms).max(1.0)
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Total return as a fraction: (final - initial) / initial.
pub fn total_return(equity_curve: &[f64]) -> f64 {
    match (equity_curve.first(), equity_curve.last()) {
        (Some(&initial), Some(&last)) if equity_curve.len() >= 2 && initial > 0.0 => {
            (last - initial) / initial
        }
        _ => 0.0,
    }
}

/// Annualised Sharpe ratio of per-bar returns, zero risk-free rate.
///
/// Returns 0.0 if variance is zero or there are fewer than 2 returns.
pub fn sharpe_ratio(equity_curve: &[f64], periods_per_year: f64) -> f64 {
    let returns = period_returns(equity_curve);
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(&returns);
    let std = std_dev(&returns);
    if std < 1e-15 {
        return 0.0;
    }
    (mean / std) * periods_per_year.sqrt()
}

/// Maximum drawdown as a negative fraction (e.g., -0.15 = 15% drawdown).
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let Some(&first) = equity_curve.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut max_dd = 0.0_f64;
    for &eq in equity_curve {
        if eq > peak {
            peak = eq;
        }
        if peak > 0.0 {
            max_dd = max_dd.min((eq - peak) / peak);
        }
    }
    max_dd
}

/// Fraction of closed trades with positive realized PnL.
pub fn win_rate(trades: &[&Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let winners = trades
        .iter()
        .filter(|t| t.realized_pnl.unwrap_or(0.0) > 0.0)
        .count();
    winners as f64 / trades.len() as f64
}

/// Gross profit / gross loss, capped at 100.0 when there are no losses.
pub fn profit_factor(trades: &[&Trade]) -> f64 {
    let pnl = trades.iter().filter_map(|t| t.realized_pnl);
    let (gross_profit, gross_loss) = pnl.fold((0.0, 0.0), |(p, l), x| {
        if x > 0.0 {
            (p + x, l)
        } else {
            (p, l - x)
        }
    });
    if gross_loss < 1e-10 {
        return if gross_profit > 0.0 { 100.0 } else { 0.0 };
    }
    (gross_profit / gross_loss).min(100.0)
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Simple returns between consecutive equity values.
pub fn period_returns(equity_curve: &[f64]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

pub fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
