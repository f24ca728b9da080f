//! Slippage models: per-unit adverse price deviation for a fill.
//!
//! - Market orders pay a base cost (spread, volatility, time of day) plus
//!   square-root market impact.
//! - Limit orders fill passively and pay zero slippage.
//!
//! Models return a non-negative amount; the engine applies it against the
//! trader (buys pay up, sells receive less).

use serde::{Deserialize, Serialize};

use super::context::ExecutionContext;
use crate::domain::{Market, OrderRequest, OrderType, TimeOfDayBucket};
use crate::error::ConfigurationError;

/// Slippage model: computes cost added to fill price.
pub trait SlippageModel: Send + Sync {
    /// Per-unit slippage for filling `quantity` of `order` around `reference_price`.
    fn compute_slippage(
        &self,
        order: &OrderRequest,
        quantity: f64,
        reference_price: f64,
        context: &ExecutionContext,
    ) -> Result<f64, ConfigurationError>;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlippageKind {
    #[default]
    SquareRoot,
    FixedBps,
}

/// Multipliers applied to the base cost per session bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeOfDayMultipliers {
    pub open: f64,
    pub midday: f64,
    pub close: f64,
    pub outside_session: f64,
    pub daily: f64,
}

impl Default for TimeOfDayMultipliers {
    fn default() -> Self {
        Self {
            open: 1.5,
            midday: 1.0,
            close: 1.25,
            outside_session: 2.0,
            daily: 1.0,
        }
    }
}

impl TimeOfDayMultipliers {
    pub fn for_bucket(&self, bucket: TimeOfDayBucket) -> f64 {
        match bucket {
            TimeOfDayBucket::Open => self.open,
            TimeOfDayBucket::Midday => self.midday,
            TimeOfDayBucket::Close => self.close,
            TimeOfDayBucket::OutsideSession => self.outside_session,
            TimeOfDayBucket::Daily => self.daily,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlippageConfig {
    pub model: SlippageKind,
    /// Base cost in bps. `None` uses the market default.
    pub base_slippage_bps: Option<f64>,
    pub impact_coefficient: f64,
    /// Impact charged when ADV is zero.
    pub max_impact_bps: f64,
    pub volatility_multiplier: f64,
    pub time_of_day: TimeOfDayMultipliers,
}

impl Default for SlippageConfig {
    fn default() -> Self {
        Self {
            model: SlippageKind::SquareRoot,
            base_slippage_bps: None,
            impact_coefficient: 0.1,
            max_impact_bps: 100.0,
            volatility_multiplier: 1.0,
            time_of_day: TimeOfDayMultipliers::default(),
        }
    }
}

impl SlippageConfig {
    /// Default base cost per market.
    pub fn default_base_bps(market: Market) -> f64 {
        match market {
            Market::Japan => 5.0,
            Market::Usa => 2.0,
        }
    }

    pub fn base_bps_for(&self, market: Market) -> f64 {
        self.base_slippage_bps
            .unwrap_or_else(|| Self::default_base_bps(market))
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(bps) = self.base_slippage_bps {
            ConfigurationError::check_non_negative("slippage.base_slippage_bps", bps)?;
        }
        ConfigurationError::check_non_negative(
            "slippage.impact_coefficient",
            self.impact_coefficient,
        )?;
        ConfigurationError::check_non_negative("slippage.max_impact_bps", self.max_impact_bps)?;
        ConfigurationError::check_non_negative(
            "slippage.volatility_multiplier",
            self.volatility_multiplier,
        )?;
        let tod = &self.time_of_day;
        for (field, value) in [
            ("slippage.time_of_day.open", tod.open),
            ("slippage.time_of_day.midday", tod.midday),
            ("slippage.time_of_day.close", tod.close),
            ("slippage.time_of_day.outside_session", tod.outside_session),
            ("slippage.time_of_day.daily", tod.daily),
        ] {
            ConfigurationError::check_non_negative(field, value)?;
        }
        Ok(())
    }
}

fn check_inputs(
    quantity: f64,
    reference_price: f64,
    context: &ExecutionContext,
) -> Result<(), ConfigurationError> {
    context.validate()?;
    ConfigurationError::check_non_negative("reference_price", reference_price)?;
    ConfigurationError::check_non_negative("quantity", quantity)?;
    Ok(())
}

/// Base cost plus square-root market impact.
///
/// ```text
/// base    = max(base_bps, spread / 2) * price * (1 + vol_mult * volatility) * tod
/// impact  = coefficient * price * sqrt(quantity / adv)
/// ```
#[derive(Debug, Clone)]
pub struct SquareRootImpact {
    market: Market,
    config: SlippageConfig,
}

impl SquareRootImpact {
    pub fn new(market: Market, config: SlippageConfig) -> Self {
        Self { market, config }
    }

    /// Base component as a fraction of price.
    fn base_fraction(&self, context: &ExecutionContext) -> f64 {
        let configured = self.config.base_bps_for(self.market) / 10_000.0;
        let half_spread = context.spread / 2.0;
        let tod = self
            .config
            .time_of_day
            .for_bucket(context.time_of_day_bucket);
        configured.max(half_spread)
            * (1.0 + self.config.volatility_multiplier * context.volatility)
            * tod
    }

    fn impact(&self, quantity: f64, reference_price: f64, adv: f64) -> f64 {
        if adv <= 0.0 {
            return self.config.max_impact_bps / 10_000.0 * reference_price;
        }
        self.config.impact_coefficient * reference_price * (quantity / adv).sqrt()
    }
}

impl SlippageModel for SquareRootImpact {
    fn compute_slippage(
        &self,
        order: &OrderRequest,
        quantity: f64,
        reference_price: f64,
        context: &ExecutionContext,
    ) -> Result<f64, ConfigurationError> {
        check_inputs(quantity, reference_price, context)?;
        if quantity == 0.0 || order.order_type == OrderType::Limit {
            return Ok(0.0);
        }
        let base = self.base_fraction(context) * reference_price;
        let impact = self.impact(quantity, reference_price, context.average_daily_volume);
        Ok(base + impact)
    }

    fn name(&self) -> &str {
        "square_root_impact"
    }
}

/// Constant cost in basis points of the reference price.
#[derive(Debug, Clone, Copy)]
pub struct FixedBpsSlippage {
    pub bps: f64,
}

impl FixedBpsSlippage {
    pub fn new(bps: f64) -> Self {
        Self { bps }
    }
}

impl SlippageModel for FixedBpsSlippage {
    fn compute_slippage(
        &self,
        order: &OrderRequest,
        quantity: f64,
        reference_price: f64,
        context: &ExecutionContext,
    ) -> Result<f64, ConfigurationError> {
        check_inputs(quantity, reference_price, context)?;
        if quantity == 0.0 || order.order_type == OrderType::Limit {
            return Ok(0.0);
        }
        Ok(reference_price * self.bps / 10_000.0)
    }

    fn name(&self) -> &str {
        "fixed_bps"
    }
}

/// Ideal mode: fills at the reference price.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSlippage;

impl SlippageModel for NoSlippage {
    fn compute_slippage(
        &self,
        _order: &OrderRequest,
        _quantity: f64,
        _reference_price: f64,
        _context: &ExecutionContext,
    ) -> Result<f64, ConfigurationError> {
        Ok(0.0)
    }

    fn name(&self) -> &str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderId, OrderSide};

    fn order(side: OrderSide) -> OrderRequest {
        OrderRequest::market(OrderId(1), "7203", side, 1_000.0, 0)
    }

    fn context(adv: f64) -> ExecutionContext {
        ExecutionContext {
            average_daily_volume: adv,
            volatility: 0.0,
            spread: 0.0,
            time_of_day_bucket: TimeOfDayBucket::Midday,
        }
    }

    fn no_impact_config() -> SlippageConfig {
        SlippageConfig {
            impact_coefficient: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn japan_base_cost_is_five_bps() {
        let model = SquareRootImpact::new(Market::Japan, no_impact_config());
        let slip = model
            .compute_slippage(&order(OrderSide::Buy), 100.0, 1_000.0, &context(1e6))
            .unwrap();
        assert!((slip - 0.5).abs() < 1e-9);
    }

    #[test]
    fn square_root_impact_term() {
        let config = SlippageConfig {
            base_slippage_bps: Some(0.0),
            ..Default::default()
        };
        let model = SquareRootImpact::new(Market::Usa, config);
        let slip = model
            .compute_slippage(&order(OrderSide::Buy), 10_000.0, 100.0, &context(1_000_000.0))
            .unwrap();
        // 0.1 * 100 * sqrt(0.01)
        assert!((slip - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_adv_uses_max_penalty() {
        let config = SlippageConfig {
            base_slippage_bps: Some(0.0),
            ..Default::default()
        };
        let model = SquareRootImpact::new(Market::Usa, config);
        let slip = model
            .compute_slippage(&order(OrderSide::Sell), 500.0, 100.0, &context(0.0))
            .unwrap();
        assert!(slip.is_finite());
        assert!((slip - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_quantity_is_free() {
        let model = SquareRootImpact::new(Market::Japan, SlippageConfig::default());
        let slip = model
            .compute_slippage(&order(OrderSide::Buy), 0.0, 100.0, &context(0.0))
            .unwrap();
        assert_eq!(slip, 0.0);
    }

    #[test]
    fn negative_context_is_configuration_error() {
        let model = SquareRootImpact::new(Market::Japan, SlippageConfig::default());
        let mut ctx = context(1e6);
        ctx.volatility = -0.1;
        assert!(matches!(
            model.compute_slippage(&order(OrderSide::Buy), 10.0, 100.0, &ctx),
            Err(ConfigurationError::NegativeValue { field: "volatility", .. })
        ));
        let ctx = context(-5.0);
        assert!(model
            .compute_slippage(&order(OrderSide::Buy), 10.0, 100.0, &ctx)
            .is_err());
    }

    #[test]
    fn wide_spread_dominates_base() {
        let model = SquareRootImpact::new(Market::Usa, no_impact_config());
        let mut ctx = context(1e6);
        ctx.spread = 0.002; // half spread 10 bps > 2 bps default
        let slip = model
            .compute_slippage(&order(OrderSide::Buy), 1.0, 100.0, &ctx)
            .unwrap();
        assert!((slip - 0.1).abs() < 1e-9);
    }

    #[test]
    fn open_bucket_costs_more_than_midday() {
        let model = SquareRootImpact::new(Market::Usa, no_impact_config());
        let midday = model
            .compute_slippage(&order(OrderSide::Buy), 1.0, 100.0, &context(1e6))
            .unwrap();
        let open_ctx = context(1e6).at_bucket(TimeOfDayBucket::Open);
        let open = model
            .compute_slippage(&order(OrderSide::Buy), 1.0, 100.0, &open_ctx)
            .unwrap();
        assert!((open / midday - 1.5).abs() < 1e-9);
    }

    #[test]
    fn limit_orders_pay_nothing() {
        let model = SquareRootImpact::new(Market::Usa, SlippageConfig::default());
        let limit = OrderRequest::limit(OrderId(2), "AAPL", OrderSide::Buy, 10.0, 0, 99.0);
        let slip = model
            .compute_slippage(&limit, 10.0, 100.0, &context(1e6))
            .unwrap();
        assert_eq!(slip, 0.0);
    }

    #[test]
    fn fixed_bps_model() {
        let model = FixedBpsSlippage::new(10.0);
        let slip = model
            .compute_slippage(&order(OrderSide::Buy), 5.0, 200.0, &context(1e6))
            .unwrap();
        assert!((slip - 0.2).abs() < 1e-9);
        assert_eq!(model.name(), "fixed_bps");
    }
}
