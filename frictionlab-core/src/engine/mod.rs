//! Engine: the per-bar loop, order lifecycle, accounting and result aggregation.

pub mod backtest;
pub mod ledger;
pub mod metrics;
pub mod order_book;
pub mod result;

pub use backtest::{run_backtest, BacktestEngine, RunPhase};
pub use ledger::{EquityPoint, Ledger};
pub use metrics::BacktestMetrics;
pub use order_book::{OrderBook, OrderBookError, WorkingOrder};
pub use result::BacktestResult;
