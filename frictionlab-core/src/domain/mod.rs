//! Domain types: bars, signals, orders, fills, trades and markets.

pub mod bar;
pub mod fill;
pub mod market;
pub mod order;
pub mod signal;
pub mod trade;

pub use bar::Bar;
pub use fill::{CommissionBreakdown, Fill};
pub use market::{Currency, Market, TimeOfDayBucket, DAY_MS};
pub use order::{
    CancelReason, OrderEvent, OrderId, OrderKind, OrderRequest, OrderSide, OrderState, OrderType,
    RejectReason, RejectedOrder,
};
pub use signal::{Signal, SignalSide, TradingMode};
pub use trade::{Trade, QUANTITY_EPSILON};
