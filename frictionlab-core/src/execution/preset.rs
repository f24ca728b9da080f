//! Execution model bundles.
//!
//! The engine only sees the four capability traits. `ExecutionModels` picks
//! an implementation per trait from the realistic-mode flags, so ideal mode
//! swaps in no-op models without a second engine.

use super::{
    CommissionCalculator, DecayFillSimulator, FixedBpsSlippage, InstantFillSimulator,
    LatencySimulator, NoSlippage, PartialFillSimulator, SampledLatency, SlippageKind,
    SlippageModel, SquareRootImpact, TableCommission, ZeroCommission, ZeroLatency,
};
use crate::config::BacktestConfig;

/// The four friction models one engine run consults.
pub struct ExecutionModels {
    pub slippage: Box<dyn SlippageModel>,
    pub commission: Box<dyn CommissionCalculator>,
    pub partial_fill: Box<dyn PartialFillSimulator>,
    pub latency: Box<dyn LatencySimulator>,
}

impl ExecutionModels {
    /// No friction: fills at the reference price, no fees, full fills, zero latency.
    pub fn ideal() -> Self {
        Self {
            slippage: Box::new(NoSlippage),
            commission: Box::new(ZeroCommission),
            partial_fill: Box::new(InstantFillSimulator::default()),
            latency: Box::new(ZeroLatency),
        }
    }

    /// Build the models a config's realistic-mode flags ask for.
    pub fn from_config(config: &BacktestConfig) -> Self {
        let flags = config.realistic_mode;

        let slippage: Box<dyn SlippageModel> = if !flags.slippage {
            Box::new(NoSlippage)
        } else {
            match config.slippage.model {
                SlippageKind::SquareRoot => Box::new(SquareRootImpact::new(
                    config.market,
                    config.slippage.clone(),
                )),
                SlippageKind::FixedBps => Box::new(FixedBpsSlippage::new(
                    config.slippage.base_bps_for(config.market),
                )),
            }
        };

        let commission: Box<dyn CommissionCalculator> = if flags.commission {
            Box::new(TableCommission::new(
                config.broker_profile.clone(),
                config.instrument_currency(),
            ))
        } else {
            Box::new(ZeroCommission)
        };

        let partial_fill: Box<dyn PartialFillSimulator> = if flags.partial_fills {
            Box::new(DecayFillSimulator::new(
                config.partial_fill.clone(),
                config.lot_size,
            ))
        } else {
            Box::new(InstantFillSimulator::new(config.partial_fill.max_queue_bars))
        };

        let latency: Box<dyn LatencySimulator> = if flags.latency {
            Box::new(SampledLatency::new(config.latency.clone()))
        } else {
            Box::new(ZeroLatency)
        };

        Self {
            slippage,
            commission,
            partial_fill,
            latency,
        }
    }

    /// Model names, for logs.
    pub fn describe(&self) -> String {
        format!(
            "slippage={} commission={} partial_fill={} latency={}",
            self.slippage.name(),
            self.commission.name(),
            self.partial_fill.name(),
            self.latency.name()
        )
    }
}

impl std::fmt::Debug for ExecutionModels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionModels")
            .field("slippage", &self.slippage.name())
            .field("commission", &self.commission.name())
            .field("partial_fill", &self.partial_fill.name())
            .field("latency", &self.latency.name())
            .finish()
    }
}
