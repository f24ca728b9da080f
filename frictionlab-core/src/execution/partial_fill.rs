//! Partial fills: how much of a working order the market absorbs per bar.
//!
//! When an order is large relative to available liquidity:
//! 1. Fill fully while `quantity / budget` stays under the liquidity threshold
//! 2. Otherwise fill a decaying fraction and carry the remainder forward
//! 3. Cancel the remainder after `max_queue_bars` carried bars
//! 4. Orders competing for one bar draw from its budget FIFO

use serde::{Deserialize, Serialize};

use super::context::ExecutionContext;
use crate::domain::{Bar, OrderId, OrderRequest, OrderType};
use crate::error::ConfigurationError;

/// Slack for floating-point lot rounding.
const LOT_EPSILON: f64 = 1e-9;

/// Fill-rate curve applied above the liquidity threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillRateFunction {
    /// `rate = 1 - k * ratio`
    Linear,
    /// `rate = exp(-k * ratio)`
    #[default]
    Exponential,
}

impl FillRateFunction {
    pub fn rate(&self, k: f64, liquidity_ratio: f64) -> f64 {
        match self {
            FillRateFunction::Linear => 1.0 - k * liquidity_ratio,
            FillRateFunction::Exponential => (-k * liquidity_ratio).exp(),
        }
    }
}

/// Share of ADV available in one bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BarVolumeFraction {
    Fixed { fraction: f64 },
    /// `bar.volume / ADV`, i.e. the bar's own traded volume.
    FromBar,
}

impl Default for BarVolumeFraction {
    fn default() -> Self {
        BarVolumeFraction::Fixed { fraction: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialFillConfig {
    /// Ratio at or below which an order fills in full.
    pub liquidity_threshold: f64,
    pub fill_rate: FillRateFunction,
    pub decay_k: f64,
    pub min_fill_rate: f64,
    /// Bars a remainder may be carried before it is cancelled.
    pub max_queue_bars: usize,
    pub bar_volume_fraction: BarVolumeFraction,
}

impl Default for PartialFillConfig {
    fn default() -> Self {
        Self {
            liquidity_threshold: 0.10,
            fill_rate: FillRateFunction::Exponential,
            decay_k: 2.0,
            min_fill_rate: 0.1,
            max_queue_bars: 3,
            bar_volume_fraction: BarVolumeFraction::default(),
        }
    }
}

impl PartialFillConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        ConfigurationError::check_non_negative(
            "partial_fill.liquidity_threshold",
            self.liquidity_threshold,
        )?;
        ConfigurationError::check_non_negative("partial_fill.decay_k", self.decay_k)?;
        ConfigurationError::check_fraction("partial_fill.min_fill_rate", self.min_fill_rate)?;
        if let BarVolumeFraction::Fixed { fraction } = self.bar_volume_fraction {
            ConfigurationError::check_non_negative("partial_fill.bar_volume_fraction", fraction)?;
        }
        Ok(())
    }
}

/// Liquidity left in the current bar. Orders draw from it cumulatively.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidityBudget {
    pub total: f64,
    pub remaining: f64,
}

impl LiquidityBudget {
    pub fn new(total: f64) -> Self {
        let total = total.max(0.0);
        Self {
            total,
            remaining: total,
        }
    }

    /// Unlimited liquidity, for ideal mode.
    pub fn unlimited() -> Self {
        Self::new(f64::INFINITY)
    }

    pub fn for_bar(bar: &Bar, average_daily_volume: f64, fraction: BarVolumeFraction) -> Self {
        if average_daily_volume <= 0.0 {
            return Self::new(0.0);
        }
        let fraction = match fraction {
            BarVolumeFraction::Fixed { fraction } => fraction,
            BarVolumeFraction::FromBar => bar.volume / average_daily_volume,
        };
        Self::new(average_daily_volume * fraction)
    }

    pub fn consume(&mut self, quantity: f64) {
        self.remaining = (self.remaining - quantity).max(0.0);
    }

    /// Return liquidity an allocation did not end up using.
    pub fn release(&mut self, quantity: f64) {
        self.remaining = (self.remaining + quantity.max(0.0)).min(self.total);
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0.0
    }
}

/// A working order competing for this bar's liquidity.
#[derive(Debug, Clone, Copy)]
pub struct PendingFill<'a> {
    pub request: &'a OrderRequest,
    pub remaining_quantity: f64,
    /// Insertion order, breaks ties between orders from the same signal bar.
    pub sequence: u64,
    pub context: &'a ExecutionContext,
}

/// What one order received from one bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarAllocation {
    pub order_id: OrderId,
    pub fill_quantity: f64,
    pub remaining_quantity: f64,
    pub liquidity_ratio: f64,
    pub fill_rate: f64,
}

impl BarAllocation {
    fn nothing(order: &PendingFill<'_>, liquidity_ratio: f64) -> Self {
        Self {
            order_id: order.request.id,
            fill_quantity: 0.0,
            remaining_quantity: order.remaining_quantity,
            liquidity_ratio,
            fill_rate: 0.0,
        }
    }
}

/// Decision after a bar leaves an order with an open remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDecision {
    Carry,
    Timeout,
}

/// Partial-fill model: per-bar fill quantity and queue policy.
pub trait PartialFillSimulator: Send + Sync {
    /// Liquidity available in `bar` before any order draws from it.
    fn liquidity_budget(&self, bar: &Bar, average_daily_volume: f64) -> LiquidityBudget;

    /// Fill one order against what is left of the bar's budget.
    fn simulate_fill(
        &self,
        order: &PendingFill<'_>,
        bar: &Bar,
        budget: &mut LiquidityBudget,
    ) -> Result<BarAllocation, ConfigurationError>;

    fn max_queue_bars(&self) -> usize;

    fn name(&self) -> &str;

    /// `carried_bars` is how many bars the remainder has already been carried.
    fn queue_decision(&self, carried_bars: usize) -> QueueDecision {
        if carried_bars >= self.max_queue_bars() {
            QueueDecision::Timeout
        } else {
            QueueDecision::Carry
        }
    }

    /// Allocate what is left of `budget` among competing orders, FIFO by
    /// `(signal_bar_index, sequence)`. Allocations come back in that order.
    fn simulate_orders(
        &self,
        orders: &[PendingFill<'_>],
        bar: &Bar,
        budget: &mut LiquidityBudget,
    ) -> Result<Vec<BarAllocation>, ConfigurationError> {
        let mut queue: Vec<&PendingFill<'_>> = orders.iter().collect();
        queue.sort_by_key(|o| (o.request.signal_bar_index, o.sequence));
        queue
            .into_iter()
            .map(|order| self.simulate_fill(order, bar, budget))
            .collect()
    }

    /// Allocate a fresh bar among competing orders.
    fn simulate_bar(
        &self,
        orders: &[PendingFill<'_>],
        bar: &Bar,
        average_daily_volume: f64,
    ) -> Result<Vec<BarAllocation>, ConfigurationError> {
        let mut budget = self.liquidity_budget(bar, average_daily_volume);
        self.simulate_orders(orders, bar, &mut budget)
    }
}

fn check_order(order: &PendingFill<'_>) -> Result<(), ConfigurationError> {
    order.request.validate()?;
    if order.remaining_quantity <= 0.0 || !order.remaining_quantity.is_finite() {
        return Err(ConfigurationError::NonPositiveQuantity(
            order.remaining_quantity,
        ));
    }
    Ok(())
}

/// Limit orders rest until the bar trades through the limit.
fn limit_reached(request: &OrderRequest, bar: &Bar) -> bool {
    match (request.order_type, request.limit_price) {
        (OrderType::Limit, Some(limit)) => bar.touches_limit(request.side, limit),
        _ => true,
    }
}

/// Round down to whole lots.
pub fn floor_to_lot(quantity: f64, lot_size: f64) -> f64 {
    if lot_size <= 0.0 {
        return quantity.max(0.0);
    }
    ((quantity + LOT_EPSILON) / lot_size).floor() * lot_size
}

/// Threshold plus linear/exponential decay.
#[derive(Debug, Clone)]
pub struct DecayFillSimulator {
    config: PartialFillConfig,
    lot_size: f64,
}

impl DecayFillSimulator {
    pub fn new(config: PartialFillConfig, lot_size: f64) -> Self {
        Self { config, lot_size }
    }

    /// Fraction of the remainder filled at a given liquidity ratio.
    pub fn fill_rate(&self, liquidity_ratio: f64) -> f64 {
        if liquidity_ratio <= self.config.liquidity_threshold {
            return 1.0;
        }
        self.config
            .fill_rate
            .rate(self.config.decay_k, liquidity_ratio)
            .clamp(self.config.min_fill_rate, 1.0)
    }
}

impl PartialFillSimulator for DecayFillSimulator {
    fn liquidity_budget(&self, bar: &Bar, average_daily_volume: f64) -> LiquidityBudget {
        LiquidityBudget::for_bar(bar, average_daily_volume, self.config.bar_volume_fraction)
    }

    fn simulate_fill(
        &self,
        order: &PendingFill<'_>,
        bar: &Bar,
        budget: &mut LiquidityBudget,
    ) -> Result<BarAllocation, ConfigurationError> {
        check_order(order)?;
        if !limit_reached(order.request, bar) || budget.is_exhausted() {
            return Ok(BarAllocation::nothing(order, f64::INFINITY));
        }

        let remaining = order.remaining_quantity;
        let liquidity_ratio = remaining / budget.remaining;
        let fill_rate = self.fill_rate(liquidity_ratio);

        let wanted = if fill_rate >= 1.0 {
            remaining
        } else {
            remaining * fill_rate
        };
        let mut fill_quantity = floor_to_lot(wanted.min(budget.remaining), self.lot_size)
            .min(remaining);
        // A sub-lot rate still takes one lot when the bar and the order both have room for it.
        if fill_quantity <= 0.0
            && fill_rate > 0.0
            && self.lot_size > 0.0
            && floor_to_lot(remaining.min(budget.remaining), self.lot_size) >= self.lot_size
        {
            fill_quantity = self.lot_size;
        }
        budget.consume(fill_quantity);

        Ok(BarAllocation {
            order_id: order.request.id,
            fill_quantity,
            remaining_quantity: remaining - fill_quantity,
            liquidity_ratio,
            fill_rate,
        })
    }

    fn max_queue_bars(&self) -> usize {
        self.config.max_queue_bars
    }

    fn name(&self) -> &str {
        match self.config.fill_rate {
            FillRateFunction::Linear => "linear_decay",
            FillRateFunction::Exponential => "exponential_decay",
        }
    }
}

/// Ideal mode: every reachable order fills in full, liquidity is unlimited.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantFillSimulator {
    max_queue_bars: usize,
}

impl InstantFillSimulator {
    pub fn new(max_queue_bars: usize) -> Self {
        Self { max_queue_bars }
    }
}

impl PartialFillSimulator for InstantFillSimulator {
    fn liquidity_budget(&self, _bar: &Bar, _average_daily_volume: f64) -> LiquidityBudget {
        LiquidityBudget::unlimited()
    }

    fn simulate_fill(
        &self,
        order: &PendingFill<'_>,
        bar: &Bar,
        _budget: &mut LiquidityBudget,
    ) -> Result<BarAllocation, ConfigurationError> {
        check_order(order)?;
        if !limit_reached(order.request, bar) {
            return Ok(BarAllocation::nothing(order, 0.0));
        }
        Ok(BarAllocation {
            order_id: order.request.id,
            fill_quantity: order.remaining_quantity,
            remaining_quantity: 0.0,
            liquidity_ratio: 0.0,
            fill_rate: 1.0,
        })
    }

    fn max_queue_bars(&self) -> usize {
        self.max_queue_bars
    }

    fn name(&self) -> &str {
        "instant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderSide, TimeOfDayBucket};
    use chrono::{TimeZone, Utc};

    const ADV: f64 = 1_000_000.0;

    fn bar() -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            100.0,
            102.0,
            98.0,
            101.0,
            ADV,
        )
    }

    fn context() -> ExecutionContext {
        ExecutionContext {
            average_daily_volume: ADV,
            volatility: 0.01,
            spread: 0.0,
            time_of_day_bucket: TimeOfDayBucket::Daily,
        }
    }

    fn request(id: u64, qty: f64, signal_bar: usize) -> OrderRequest {
        OrderRequest::market(OrderId(id), "SPY", OrderSide::Buy, qty, signal_bar)
    }

    fn simulator() -> DecayFillSimulator {
        DecayFillSimulator::new(PartialFillConfig::default(), 1.0)
    }

    #[test]
    fn small_order_fills_in_one_bar() {
        let req = request(1, 50_000.0, 0);
        let ctx = context();
        let pending = PendingFill {
            request: &req,
            remaining_quantity: 50_000.0,
            sequence: 0,
            context: &ctx,
        };
        let mut budget = simulator().liquidity_budget(&bar(), ADV);
        let alloc = simulator().simulate_fill(&pending, &bar(), &mut budget).unwrap();
        assert_eq!(alloc.fill_quantity, 50_000.0);
        assert_eq!(alloc.remaining_quantity, 0.0);
        assert!((alloc.liquidity_ratio - 0.05).abs() < 1e-12);
    }

    #[test]
    fn large_order_decays_exponentially() {
        let req = request(1, 300_000.0, 0);
        let ctx = context();
        let pending = PendingFill {
            request: &req,
            remaining_quantity: 300_000.0,
            sequence: 0,
            context: &ctx,
        };
        let mut budget = simulator().liquidity_budget(&bar(), ADV);
        let alloc = simulator().simulate_fill(&pending, &bar(), &mut budget).unwrap();
        let expected_rate = (-0.6f64).exp();
        assert!((alloc.fill_rate - expected_rate).abs() < 1e-12);
        assert_eq!(alloc.fill_quantity, (300_000.0 * expected_rate).floor());
        assert!(alloc.remaining_quantity > 0.0);
    }

    #[test]
    fn sub_lot_rate_still_fills_one_lot() {
        let req = request(1, 100.0, 0);
        let ctx = context();
        let pending = PendingFill {
            request: &req,
            remaining_quantity: 100.0,
            sequence: 0,
            context: &ctx,
        };
        let sim = DecayFillSimulator::new(PartialFillConfig::default(), 100.0);
        let mut budget = LiquidityBudget::new(500.0);
        let alloc = sim.simulate_fill(&pending, &bar(), &mut budget).unwrap();
        assert!(alloc.fill_rate < 1.0);
        assert_eq!(alloc.fill_quantity, 100.0);
        assert_eq!(alloc.remaining_quantity, 0.0);
        assert_eq!(budget.remaining, 400.0);
    }

    #[test]
    fn budget_below_one_lot_fills_nothing() {
        let req = request(1, 200.0, 0);
        let ctx = context();
        let pending = PendingFill {
            request: &req,
            remaining_quantity: 200.0,
            sequence: 0,
            context: &ctx,
        };
        let sim = DecayFillSimulator::new(PartialFillConfig::default(), 100.0);
        let mut budget = LiquidityBudget::new(50.0);
        let alloc = sim.simulate_fill(&pending, &bar(), &mut budget).unwrap();
        assert_eq!(alloc.fill_quantity, 0.0);
        assert_eq!(alloc.remaining_quantity, 200.0);
    }

    #[test]
    fn linear_rate_is_clamped_to_min() {
        let config = PartialFillConfig {
            fill_rate: FillRateFunction::Linear,
            decay_k: 5.0,
            min_fill_rate: 0.2,
            ..Default::default()
        };
        let sim = DecayFillSimulator::new(config, 1.0);
        assert!((sim.fill_rate(0.5) - 0.2).abs() < 1e-12);
        assert!((sim.fill_rate(0.12) - 0.4).abs() < 1e-12);
        assert_eq!(sim.fill_rate(0.1), 1.0);
    }

    #[test]
    fn fifo_by_signal_bar_then_sequence() {
        let early = request(2, 600_000.0, 1);
        let late = request(1, 600_000.0, 3);
        let same_bar_second = request(3, 600_000.0, 1);
        let ctx = context();
        let config = PartialFillConfig {
            liquidity_threshold: 10.0,
            ..Default::default()
        };
        let sim = DecayFillSimulator::new(config, 1.0);
        let orders = [
            PendingFill { request: &late, remaining_quantity: 600_000.0, sequence: 0, context: &ctx },
            PendingFill { request: &same_bar_second, remaining_quantity: 600_000.0, sequence: 5, context: &ctx },
            PendingFill { request: &early, remaining_quantity: 600_000.0, sequence: 4, context: &ctx },
        ];
        let allocs = sim.simulate_bar(&orders, &bar(), ADV).unwrap();
        assert_eq!(allocs[0].order_id, OrderId(2));
        assert_eq!(allocs[0].fill_quantity, 600_000.0);
        assert_eq!(allocs[1].order_id, OrderId(3));
        assert_eq!(allocs[1].fill_quantity, 400_000.0);
        assert_eq!(allocs[2].order_id, OrderId(1));
        assert_eq!(allocs[2].fill_quantity, 0.0);
    }

    #[test]
    fn zero_adv_yields_no_liquidity() {
        let req = request(1, 100.0, 0);
        let ctx = context();
        let pending = PendingFill {
            request: &req,
            remaining_quantity: 100.0,
            sequence: 0,
            context: &ctx,
        };
        let mut budget = simulator().liquidity_budget(&bar(), 0.0);
        let alloc = simulator().simulate_fill(&pending, &bar(), &mut budget).unwrap();
        assert_eq!(alloc.fill_quantity, 0.0);
        assert_eq!(alloc.remaining_quantity, 100.0);
    }

    #[test]
    fn lot_size_floors_fill() {
        let sim = DecayFillSimulator::new(PartialFillConfig::default(), 100.0);
        let req = request(1, 300_000.0, 0);
        let ctx = context();
        let pending = PendingFill {
            request: &req,
            remaining_quantity: 300_000.0,
            sequence: 0,
            context: &ctx,
        };
        let mut budget = sim.liquidity_budget(&bar(), ADV);
        let alloc = sim.simulate_fill(&pending, &bar(), &mut budget).unwrap();
        assert_eq!(alloc.fill_quantity % 100.0, 0.0);
    }

    #[test]
    fn limit_order_waits_for_price() {
        let req = OrderRequest::limit(OrderId(1), "SPY", OrderSide::Buy, 100.0, 0, 95.0);
        let ctx = context();
        let pending = PendingFill {
            request: &req,
            remaining_quantity: 100.0,
            sequence: 0,
            context: &ctx,
        };
        let mut budget = simulator().liquidity_budget(&bar(), ADV);
        let alloc = simulator().simulate_fill(&pending, &bar(), &mut budget).unwrap();
        assert_eq!(alloc.fill_quantity, 0.0);
    }

    #[test]
    fn non_positive_quantity_is_configuration_error() {
        let req = request(1, 0.0, 0);
        let ctx = context();
        let pending = PendingFill {
            request: &req,
            remaining_quantity: 0.0,
            sequence: 0,
            context: &ctx,
        };
        let mut budget = simulator().liquidity_budget(&bar(), ADV);
        assert!(matches!(
            simulator().simulate_fill(&pending, &bar(), &mut budget),
            Err(ConfigurationError::NonPositiveQuantity(_))
        ));
    }

    #[test]
    fn queue_times_out_after_max_bars() {
        let sim = simulator();
        assert_eq!(sim.queue_decision(0), QueueDecision::Carry);
        assert_eq!(sim.queue_decision(2), QueueDecision::Carry);
        assert_eq!(sim.queue_decision(3), QueueDecision::Timeout);
    }

    #[test]
    fn from_bar_fraction_uses_bar_volume() {
        let mut b = bar();
        b.volume = 20_000.0;
        let budget = LiquidityBudget::for_bar(&b, ADV, BarVolumeFraction::FromBar);
        assert!((budget.total - 20_000.0).abs() < 1e-9);
    }

    #[test]
    fn instant_fill_ignores_liquidity() {
        let req = request(1, 5_000_000.0, 0);
        let ctx = context();
        let pending = PendingFill {
            request: &req,
            remaining_quantity: 5_000_000.0,
            sequence: 0,
            context: &ctx,
        };
        let sim = InstantFillSimulator::default();
        let mut budget = sim.liquidity_budget(&bar(), 0.0);
        let alloc = sim.simulate_fill(&pending, &bar(), &mut budget).unwrap();
        assert_eq!(alloc.fill_quantity, 5_000_000.0);
    }
}
