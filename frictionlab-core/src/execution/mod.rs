//! Execution-friction models.
//!
//! Four capability traits, each with a realistic and an ideal implementation:
//! - `SlippageModel`: adverse price deviation per fill
//! - `CommissionCalculator`: fee breakdown per fill
//! - `PartialFillSimulator`: per-bar fill quantity and queue timeout
//! - `LatencySimulator`: execution bar or cancellation

pub mod commission;
pub mod context;
pub mod latency;
pub mod partial_fill;
pub mod preset;
pub mod slippage;

pub use commission::{BrokerProfile, CommissionCalculator, FeeSchedule, TableCommission, ZeroCommission};
pub use context::{ContextConfig, ExecutionContext};
pub use latency::{
    FeedMode, LatencyBreakdown, LatencyConfig, LatencyDistribution, LatencySimulator,
    SampledLatency, Schedule, ZeroLatency,
};
pub use partial_fill::{
    floor_to_lot, BarAllocation, BarVolumeFraction, DecayFillSimulator, FillRateFunction,
    InstantFillSimulator, LiquidityBudget, PartialFillConfig, PartialFillSimulator, PendingFill,
    QueueDecision,
};
pub use preset::ExecutionModels;
pub use slippage::{
    FixedBpsSlippage, NoSlippage, SlippageConfig, SlippageKind, SlippageModel, SquareRootImpact,
    TimeOfDayMultipliers,
};
