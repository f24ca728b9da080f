use serde::{Deserialize, Serialize};

use super::ledger::EquityPoint;
use super::metrics::BacktestMetrics;
use crate::domain::{Fill, OrderEvent, RejectedOrder, Trade};

/// Everything one run produced. Built once by `BacktestEngine::finish`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Fingerprint of the config that produced this result.
    pub fingerprint: String,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: BacktestMetrics,
    pub rejected_orders: Vec<RejectedOrder>,
    /// Every order state transition, in the order it happened.
    pub order_events: Vec<OrderEvent>,
}

impl BacktestResult {
    pub fn final_equity(&self) -> f64 {
        self.metrics.final_equity
    }

    /// Entry fills of every trade, in execution order.
    pub fn entry_fills(&self) -> Vec<&Fill> {
        sorted(self.trades.iter().flat_map(|t| t.fills.iter()))
    }

    /// Exit slices of every trade, in execution order. A fill that closes
    /// several lots appears once per lot.
    pub fn exit_fills(&self) -> Vec<&Fill> {
        sorted(self.trades.iter().flat_map(|t| t.exit_fills.iter()))
    }
}

fn sorted<'a>(fills: impl Iterator<Item = &'a Fill>) -> Vec<&'a Fill> {
    let mut fills: Vec<&Fill> = fills.collect();
    fills.sort_by_key(|f| (f.bar_index, f.order_id));
    fills
}
