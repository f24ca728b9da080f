use serde::{Deserialize, Serialize};
use std::ops::Add;

use super::order::{OrderId, OrderSide};

/// Fee attribution for one fill. Every component is non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CommissionBreakdown {
    pub base_fee: f64,
    pub per_share_fee: f64,
    pub regulatory_fees: f64,
    pub fx_fee: f64,
    pub tax: f64,
}

impl CommissionBreakdown {
    pub fn total(&self) -> f64 {
        self.base_fee + self.per_share_fee + self.regulatory_fees + self.fx_fee + self.tax
    }

    /// Scale every component, used when a fill is split across lots.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            base_fee: self.base_fee * factor,
            per_share_fee: self.per_share_fee * factor,
            regulatory_fees: self.regulatory_fees * factor,
            fx_fee: self.fx_fee * factor,
            tax: self.tax * factor,
        }
    }
}

impl Add for CommissionBreakdown {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            base_fee: self.base_fee + rhs.base_fee,
            per_share_fee: self.per_share_fee + rhs.per_share_fee,
            regulatory_fees: self.regulatory_fees + rhs.regulatory_fees,
            fx_fee: self.fx_fee + rhs.fx_fee,
            tax: self.tax + rhs.tax,
        }
    }
}

/// One execution against an order.
///
/// `price = reference_price + side.sign() * slippage_amount`, where
/// `slippage_amount` is the per-unit adverse deviation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub side: OrderSide,
    pub bar_index: usize,
    pub quantity: f64,
    pub price: f64,
    pub reference_price: f64,
    pub slippage_amount: f64,
    pub commission: CommissionBreakdown,
}

impl Fill {
    pub fn notional(&self) -> f64 {
        self.quantity * self.price
    }

    /// Total cost of slippage on this fill.
    pub fn slippage_cost(&self) -> f64 {
        self.slippage_amount * self.quantity
    }

    /// Signed cash movement, fees included.
    pub fn cash_delta(&self) -> f64 {
        -self.side.sign() * self.notional() - self.commission.total()
    }

    /// A pro-rata slice of this fill (commission scaled to match).
    pub fn portion(&self, quantity: f64) -> Self {
        let factor = if self.quantity > 0.0 {
            quantity / self.quantity
        } else {
            0.0
        };
        Self {
            quantity,
            commission: self.commission.scaled(factor),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breakdown() -> CommissionBreakdown {
        CommissionBreakdown {
            base_fee: 2200.0,
            per_share_fee: 0.0,
            regulatory_fees: 0.0,
            fx_fee: 0.0,
            tax: 220.0,
        }
    }

    #[test]
    fn total_sums_components() {
        assert!((breakdown().total() - 2420.0).abs() < 1e-9);
    }

    #[test]
    fn buy_cash_delta_is_outflow() {
        let fill = Fill {
            order_id: OrderId(1),
            side: OrderSide::Buy,
            bar_index: 0,
            quantity: 100.0,
            price: 10_000.0,
            reference_price: 9_995.0,
            slippage_amount: 5.0,
            commission: breakdown(),
        };
        assert!((fill.cash_delta() + 1_002_420.0).abs() < 1e-6);
        assert!((fill.slippage_cost() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn portion_scales_commission() {
        let fill = Fill {
            order_id: OrderId(1),
            side: OrderSide::Sell,
            bar_index: 3,
            quantity: 100.0,
            price: 50.0,
            reference_price: 50.0,
            slippage_amount: 0.0,
            commission: breakdown(),
        };
        let part = fill.portion(25.0);
        assert_eq!(part.quantity, 25.0);
        assert!((part.commission.total() - 605.0).abs() < 1e-9);
    }
}
