//! Cash, position and lot accounting for one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::domain::{Fill, OrderId, OrderRequest, Trade, QUANTITY_EPSILON};

/// Account state at one bar close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub bar_index: usize,
    pub timestamp: DateTime<Utc>,
    pub cash: f64,
    pub position: f64,
    pub mark_price: f64,
    pub equity: f64,
}

/// Equity tracker with FIFO lot accounting.
///
/// Each entry order owns one `Trade`. Opposite-side fills reduce the oldest
/// open lots first; a fill that crosses zero closes every lot and opens a new
/// trade for the remainder.
#[derive(Debug, Clone)]
pub struct Ledger {
    initial_cash: f64,
    cash: f64,
    position: f64,
    trades: Vec<Trade>,
    /// Indices into `trades` of lots still open, oldest first.
    open_lots: VecDeque<usize>,
    /// Trade owned by each entry order.
    trade_by_order: BTreeMap<OrderId, usize>,
    equity_curve: Vec<EquityPoint>,
    total_commission: f64,
    total_slippage: f64,
}

impl Ledger {
    pub fn new(initial_cash: f64) -> Self {
        Self {
            initial_cash,
            cash: initial_cash,
            position: 0.0,
            trades: Vec::new(),
            open_lots: VecDeque::new(),
            trade_by_order: BTreeMap::new(),
            equity_curve: Vec::new(),
            total_commission: 0.0,
            total_slippage: 0.0,
        }
    }

    pub fn initial_cash(&self) -> f64 {
        self.initial_cash
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Signed net position.
    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn equity(&self, mark_price: f64) -> f64 {
        self.cash + self.position * mark_price
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn total_commission(&self) -> f64 {
        self.total_commission
    }

    pub fn total_slippage(&self) -> f64 {
        self.total_slippage
    }

    /// Apply a fill to cash, position and lots.
    pub fn apply_fill(&mut self, fill: &Fill, request: &OrderRequest) {
        self.cash += fill.cash_delta();
        self.total_commission += fill.commission.total();
        self.total_slippage += fill.slippage_cost();

        let direction = fill.side.sign();
        let mut remaining = fill.quantity;

        // Reduce opposite-direction exposure first.
        if self.position * direction < 0.0 {
            let closing = remaining.min(self.position.abs());
            self.close_lots(fill, closing);
            self.position += direction * closing;
            if self.position.abs() <= QUANTITY_EPSILON {
                self.position = 0.0;
            }
            remaining -= closing;
        }

        if remaining > QUANTITY_EPSILON {
            let entry = if (remaining - fill.quantity).abs() <= QUANTITY_EPSILON {
                fill.clone()
            } else {
                fill.portion(remaining)
            };
            self.open_or_extend(entry, request);
            self.position += direction * remaining;
        }
    }

    fn close_lots(&mut self, fill: &Fill, quantity: f64) {
        let mut left = quantity;
        while left > QUANTITY_EPSILON {
            let Some(&idx) = self.open_lots.front() else {
                break;
            };
            let trade = &mut self.trades[idx];
            let take = left.min(trade.open_quantity());
            trade.add_exit(fill.portion(take));
            left -= take;
            if trade.is_closed() {
                self.open_lots.pop_front();
            }
        }
    }

    fn open_or_extend(&mut self, entry: Fill, request: &OrderRequest) {
        if let Some(&idx) = self.trade_by_order.get(&entry.order_id) {
            let trade = &mut self.trades[idx];
            if !trade.is_closed() && trade.side() == entry.side {
                trade.add_entry(entry);
                return;
            }
        }
        let idx = self.trades.len();
        self.trade_by_order.insert(entry.order_id, idx);
        let mut owner = request.clone();
        // A crossing order owns the new lot in the direction it actually opens.
        owner.side = entry.side;
        self.trades.push(Trade::open(owner, entry));
        self.open_lots.push_back(idx);
    }

    /// Record equity at bar close.
    pub fn mark_to_market(&mut self, bar_index: usize, timestamp: DateTime<Utc>, close: f64) {
        self.equity_curve.push(EquityPoint {
            bar_index,
            timestamp,
            cash: self.cash,
            position: self.position,
            mark_price: close,
            equity: self.equity(close),
        });
    }

    pub fn into_parts(self) -> (Vec<Trade>, Vec<EquityPoint>) {
        (self.trades, self.equity_curve)
    }
}
