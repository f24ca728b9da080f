//! Trade: the lot opened by one entry order, tracked until it is flat again.

use serde::{Deserialize, Serialize};

use super::fill::Fill;
use super::order::{OrderRequest, OrderSide};

/// Tolerance below which a remaining lot quantity counts as closed.
pub const QUANTITY_EPSILON: f64 = 1e-9;

/// Lot accounting for one entry order.
///
/// `fills` are the entry fills of `order_request`. `exit_fills` are pro-rata
/// slices of later opposite-side fills that reduced this lot (FIFO across lots).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub order_request: OrderRequest,
    pub fills: Vec<Fill>,
    pub exit_fills: Vec<Fill>,
    pub total_commission: f64,
    pub total_slippage: f64,
    pub entry_bar_index: usize,
    pub exit_bar_index: Option<usize>,
    pub realized_pnl: Option<f64>,
}

impl Trade {
    /// Open a trade from its first entry fill.
    pub fn open(order_request: OrderRequest, first_fill: Fill) -> Self {
        let entry_bar_index = first_fill.bar_index;
        let mut trade = Self {
            order_request,
            fills: Vec::new(),
            exit_fills: Vec::new(),
            total_commission: 0.0,
            total_slippage: 0.0,
            entry_bar_index,
            exit_bar_index: None,
            realized_pnl: None,
        };
        trade.add_entry(first_fill);
        trade
    }

    /// Direction of the lot, taken from the entry side.
    pub fn side(&self) -> OrderSide {
        self.order_request.side
    }

    pub fn add_entry(&mut self, fill: Fill) {
        self.fills.push(fill);
        self.refresh();
    }

    pub fn add_exit(&mut self, fill: Fill) {
        let bar = fill.bar_index;
        self.exit_fills.push(fill);
        if self.is_closed() {
            self.exit_bar_index = Some(bar);
        }
        self.refresh();
    }

    pub fn entry_quantity(&self) -> f64 {
        self.fills.iter().map(|f| f.quantity).sum()
    }

    pub fn exit_quantity(&self) -> f64 {
        self.exit_fills.iter().map(|f| f.quantity).sum()
    }

    pub fn open_quantity(&self) -> f64 {
        (self.entry_quantity() - self.exit_quantity()).max(0.0)
    }

    pub fn is_closed(&self) -> bool {
        self.open_quantity() <= QUANTITY_EPSILON
    }

    /// Volume-weighted entry price.
    pub fn average_entry_price(&self) -> f64 {
        vwap(&self.fills)
    }

    pub fn average_exit_price(&self) -> Option<f64> {
        if self.exit_fills.is_empty() {
            None
        } else {
            Some(vwap(&self.exit_fills))
        }
    }

    fn refresh(&mut self) {
        self.total_commission = self
            .fills
            .iter()
            .chain(self.exit_fills.iter())
            .map(|f| f.commission.total())
            .sum();
        self.total_slippage = self
            .fills
            .iter()
            .chain(self.exit_fills.iter())
            .map(|f| f.slippage_cost())
            .sum();

        if self.exit_fills.is_empty() {
            self.realized_pnl = None;
            return;
        }

        let entry_qty = self.entry_quantity();
        let exit_qty = self.exit_quantity();
        let entry_price = self.average_entry_price();
        let direction = self.side().sign();
        let gross: f64 = self
            .exit_fills
            .iter()
            .map(|f| direction * (f.price - entry_price) * f.quantity)
            .sum();
        let exit_fees: f64 = self.exit_fills.iter().map(|f| f.commission.total()).sum();
        let entry_fees: f64 = self.fills.iter().map(|f| f.commission.total()).sum();
        let entry_share = if entry_qty > 0.0 {
            (exit_qty / entry_qty).min(1.0)
        } else {
            0.0
        };
        self.realized_pnl = Some(gross - exit_fees - entry_fees * entry_share);
    }
}

fn vwap(fills: &[Fill]) -> f64 {
    let qty: f64 = fills.iter().map(|f| f.quantity).sum();
    if qty <= 0.0 {
        return 0.0;
    }
    fills.iter().map(|f| f.price * f.quantity).sum::<f64>() / qty
}
