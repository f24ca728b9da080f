//! BacktestEngine: the per-bar loop that drives the four friction models.
//!
//! Each bar goes through five phases:
//! 1. Validate the bar and release orders whose latency has elapsed
//! 2. Fill working orders FIFO at the bar open
//! 3. Turn the signal into at most one new order (cancel, cash check, schedule)
//! 4. Fill orders that execute on their own signal bar, at the bar close
//! 5. Mark to market
//!
//! All randomness comes from one `StdRng` seeded with `config.rng_seed`.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use tracing::{debug, info, warn};

use super::ledger::Ledger;
use super::metrics::{periods_per_year, BacktestMetrics};
use super::order_book::OrderBook;
use super::result::BacktestResult;
use crate::config::BacktestConfig;
use crate::domain::{
    Bar, CancelReason, Fill, OrderId, OrderKind, OrderRequest, OrderSide, OrderType,
    RejectReason, RejectedOrder, Signal, TimeOfDayBucket, QUANTITY_EPSILON,
};
use crate::error::{DataIntegrityError, EngineError};
use crate::execution::{
    floor_to_lot, ExecutionContext, ExecutionModels, LiquidityBudget, PendingFill,
    QueueDecision, Schedule,
};

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Initialized,
    Running { bar_index: usize },
    Completed,
    /// A data or configuration error stopped the run.
    Aborted,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Initialized => f.write_str("initialized"),
            RunPhase::Running { bar_index } => write!(f, "running (bar {bar_index})"),
            RunPhase::Completed => f.write_str("completed"),
            RunPhase::Aborted => f.write_str("aborted"),
        }
    }
}

/// Where in the bar an execution pass happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Open,
    Close,
}

/// One deterministic backtest run. Owns all of its state.
pub struct BacktestEngine {
    config: BacktestConfig,
    models: ExecutionModels,
    rng: StdRng,
    phase: RunPhase,
    history: Vec<Bar>,
    book: OrderBook,
    ledger: Ledger,
    rejected: Vec<RejectedOrder>,
    next_order_id: u64,
}

impl BacktestEngine {
    /// Build an engine with the models the config's realistic-mode flags select.
    pub fn new(config: BacktestConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let models = ExecutionModels::from_config(&config);
        Self::with_models(config, models)
    }

    /// Build an engine around caller-supplied model implementations.
    pub fn with_models(config: BacktestConfig, models: ExecutionModels) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            rng: StdRng::seed_from_u64(config.rng_seed),
            ledger: Ledger::new(config.initial_capital),
            config,
            models,
            phase: RunPhase::Initialized,
            history: Vec::new(),
            book: OrderBook::new(),
            rejected: Vec::new(),
            next_order_id: 1,
        })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn cash(&self) -> f64 {
        self.ledger.cash()
    }

    pub fn position(&self) -> f64 {
        self.ledger.position()
    }

    pub fn order_book(&self) -> &OrderBook {
        &self.book
    }

    pub fn rejected_orders(&self) -> &[RejectedOrder] {
        &self.rejected
    }

    /// Feed all bars and signals, then finish.
    pub fn run(
        mut self,
        bars: &[Bar],
        signals: &[Option<Signal>],
    ) -> Result<BacktestResult, EngineError> {
        if bars.len() != signals.len() {
            return Err(DataIntegrityError::SignalLengthMismatch {
                bars: bars.len(),
                signals: signals.len(),
            }
            .into());
        }
        for (bar, signal) in bars.iter().zip(signals) {
            self.step(bar, signal.as_ref())?;
        }
        self.finish()
    }

    /// Advance one bar. `None` holds the current target.
    pub fn step(&mut self, bar: &Bar, signal: Option<&Signal>) -> Result<(), EngineError> {
        if matches!(self.phase, RunPhase::Completed | RunPhase::Aborted) {
            return Err(EngineError::RunCompleted(self.phase.to_string()));
        }
        if self.phase == RunPhase::Initialized {
            info!(
                symbol = %self.config.symbol,
                market = %self.config.market,
                seed = self.config.rng_seed,
                models = %self.models.describe(),
                "backtest started"
            );
        }

        let index = self.history.len();
        if let Err(err) = self.check_bar(bar, index) {
            warn!(bar = index, error = %err, "aborting run on bad bar");
            self.phase = RunPhase::Aborted;
            return Err(err.into());
        }
        self.phase = RunPhase::Running { bar_index: index };
        self.history.push(bar.clone());

        let outcome = self.process_bar(index, bar, signal);
        if outcome.is_err() {
            self.phase = RunPhase::Aborted;
        }
        outcome
    }

    /// Cancel whatever is still open and aggregate the result.
    pub fn finish(&mut self) -> Result<BacktestResult, EngineError> {
        if matches!(self.phase, RunPhase::Completed | RunPhase::Aborted) {
            return Err(EngineError::RunCompleted(self.phase.to_string()));
        }
        let last_bar = self.history.len().saturating_sub(1);
        let open: Vec<OrderId> = self.book.open_orders().map(|o| o.request.id).collect();
        for id in open {
            self.book.cancel(id, CancelReason::EndOfData, last_bar)?;
        }
        self.phase = RunPhase::Completed;

        let book = std::mem::take(&mut self.book);
        let ledger = std::mem::replace(&mut self.ledger, Ledger::new(self.config.initial_capital));
        let rejected = std::mem::take(&mut self.rejected);

        let metrics = BacktestMetrics::compute(
            self.config.initial_capital,
            ledger.equity_curve(),
            ledger.trades(),
            &book,
            &rejected,
            periods_per_year(self.config.bar_duration_ms(), self.config.market),
        );
        let (trades, equity_curve) = ledger.into_parts();

        info!(
            bars = self.history.len(),
            trades = metrics.trade_count,
            final_equity = metrics.final_equity,
            fill_ratio = metrics.fill_ratio,
            cancelled = metrics.cancelled_orders,
            rejected = metrics.rejected_orders,
            "backtest completed"
        );

        Ok(BacktestResult {
            fingerprint: self.config.fingerprint(),
            trades,
            equity_curve,
            metrics,
            rejected_orders: rejected,
            order_events: book.into_events(),
        })
    }

    // ── Per-bar phases ─────────────────────────────────────────────────

    fn check_bar(&self, bar: &Bar, index: usize) -> Result<(), DataIntegrityError> {
        bar.validate(index)?;
        if let Some(previous) = self.history.last() {
            if bar.timestamp <= previous.timestamp {
                return Err(DataIntegrityError::NonMonotonicTimestamp {
                    index,
                    previous: previous.timestamp,
                    current: bar.timestamp,
                });
            }
        }
        Ok(())
    }

    fn process_bar(
        &mut self,
        index: usize,
        bar: &Bar,
        signal: Option<&Signal>,
    ) -> Result<(), EngineError> {
        let mut budget = self
            .models
            .partial_fill
            .liquidity_budget(bar, self.config.average_daily_volume);

        self.book.release_scheduled(index);
        let working = self.book.working_ids();
        self.execute(&working, bar, index, Pass::Open, &mut budget)?;

        if let Some(signal) = signal {
            self.evaluate_signal(index, bar, signal)?;
        }

        let mut same_bar = self.book.release_scheduled(index);
        same_bar.sort_by_key(|id| {
            self.book
                .get(*id)
                .map(|o| (o.request.signal_bar_index, o.sequence))
        });
        if !same_bar.is_empty() {
            // Limits are checked against the close only.
            let at_close = Bar {
                open: bar.close,
                high: bar.close,
                low: bar.close,
                ..bar.clone()
            };
            self.execute(&same_bar, &at_close, index, Pass::Close, &mut budget)?;
        }

        self.ledger.mark_to_market(index, bar.timestamp, bar.close);
        Ok(())
    }

    fn bucket(&self, bar: &Bar) -> TimeOfDayBucket {
        TimeOfDayBucket::classify(bar.timestamp, self.config.bar_duration_ms(), self.config.market)
    }

    // ── Signal evaluation ──────────────────────────────────────────────

    fn evaluate_signal(
        &mut self,
        index: usize,
        bar: &Bar,
        signal: &Signal,
    ) -> Result<(), EngineError> {
        let lot = self.config.lot_size;
        let raw_target = signal.target_position(self.config.trading_mode);
        let target = raw_target.signum() * floor_to_lot(raw_target.abs(), lot);
        let desired = target - self.ledger.position();

        let open: Vec<(OrderId, OrderSide, f64)> = self
            .book
            .open_orders()
            .map(|o| (o.request.id, o.request.side, o.remaining_quantity()))
            .collect();

        let mut same_side = Vec::new();
        let mut pending = 0.0;
        for (id, side, remaining) in open {
            if desired.abs() <= QUANTITY_EPSILON || side.sign() * desired < 0.0 {
                self.cancel(id, CancelReason::Superseded, index)?;
            } else {
                same_side.push(id);
                pending += side.sign() * remaining;
            }
        }
        // Working orders overshoot the new target: start over.
        if pending.abs() > desired.abs() + QUANTITY_EPSILON {
            for id in same_side {
                self.cancel(id, CancelReason::Superseded, index)?;
            }
            pending = 0.0;
        }

        let quantity = floor_to_lot((desired - pending).abs(), lot);
        if quantity <= QUANTITY_EPSILON {
            return Ok(());
        }
        self.submit(index, bar, OrderSide::for_delta(desired), quantity)
    }

    fn submit(
        &mut self,
        index: usize,
        bar: &Bar,
        side: OrderSide,
        quantity: f64,
    ) -> Result<(), EngineError> {
        let id = OrderId(self.next_order_id);
        self.next_order_id += 1;

        let request = match self.config.order_kind {
            OrderKind::Market => {
                OrderRequest::market(id, self.config.symbol.clone(), side, quantity, index)
            }
            OrderKind::Limit { offset_bps } => {
                let limit = bar.close * (1.0 - side.sign() * offset_bps / 10_000.0);
                OrderRequest::limit(id, self.config.symbol.clone(), side, quantity, index, limit)
            }
        };
        request.validate()?;

        if let Some(rejection) = self.submission_check(&request, bar.close) {
            warn!(
                order_id = %id,
                side = ?side,
                quantity,
                required = rejection.required,
                available = rejection.available,
                reason = ?rejection.reason,
                "order rejected"
            );
            self.rejected.push(rejection);
            return Ok(());
        }

        let context = ExecutionContext::from_history(
            &self.history,
            self.config.average_daily_volume,
            &self.config.context,
            self.bucket(bar),
        );
        context.validate()?;

        match self
            .models
            .latency
            .schedule_execution(&request, index, &mut self.rng)
        {
            Schedule::Execute { bar: execution_bar, latency_ms } => {
                debug!(
                    order_id = %id,
                    side = ?side,
                    quantity,
                    signal_bar = index,
                    execution_bar,
                    latency_ms,
                    "order scheduled"
                );
                self.book.submit(request, context, execution_bar, index);
            }
            Schedule::Cancelled { offset, latency_ms } => {
                warn!(order_id = %id, offset, latency_ms, "order expired in transit");
                // Never executes; registered at the signal bar only for the audit trail.
                self.book.submit(request, context, index, index);
                self.book.cancel(id, CancelReason::LatencyExpired, index)?;
            }
        }
        Ok(())
    }

    /// Cash and margin check at the signal close.
    fn submission_check(&self, request: &OrderRequest, close: f64) -> Option<RejectedOrder> {
        let quantity = request.requested_quantity;
        let (required, available, reason) = match request.side {
            OrderSide::Buy => (quantity * close, self.ledger.cash(), RejectReason::InsufficientCash),
            OrderSide::Sell => {
                let short_after = (quantity - self.ledger.position()).max(0.0);
                (
                    short_after * close,
                    self.ledger.equity(close),
                    RejectReason::InsufficientMargin,
                )
            }
        };
        if required <= available {
            return None;
        }
        Some(RejectedOrder {
            order_id: request.id,
            bar_index: request.signal_bar_index,
            side: request.side,
            quantity,
            price: close,
            required,
            available,
            reason,
        })
    }

    // ── Execution ──────────────────────────────────────────────────────

    fn execute(
        &mut self,
        ids: &[OrderId],
        bar: &Bar,
        index: usize,
        pass: Pass,
        budget: &mut LiquidityBudget,
    ) -> Result<(), EngineError> {
        let bucket = self.bucket(bar);
        for &id in ids {
            let allocation = {
                let Some(order) = self.book.get(id) else {
                    continue;
                };
                if !order.state.is_working() {
                    continue;
                }
                let pending = PendingFill {
                    request: &order.request,
                    remaining_quantity: order.remaining_quantity(),
                    sequence: order.sequence,
                    context: &order.context,
                };
                self.models.partial_fill.simulate_fill(&pending, bar, budget)?
            };

            if allocation.fill_quantity > QUANTITY_EPSILON {
                let filled = self.fill(id, allocation.fill_quantity, bar, index, pass, bucket)?;
                budget.release(allocation.fill_quantity - filled);
            }

            let Some(order) = self.book.get(id) else {
                continue;
            };
            if !order.state.is_working() {
                continue;
            }
            match self.models.partial_fill.queue_decision(order.carried_bars) {
                QueueDecision::Carry => {
                    self.book.mark_carried(id)?;
                }
                QueueDecision::Timeout => {
                    warn!(
                        order_id = %id,
                        remaining = order.remaining_quantity(),
                        carried_bars = order.carried_bars,
                        "queue timeout"
                    );
                    self.book.cancel(id, CancelReason::QueueTimeout, index)?;
                }
            }
        }
        Ok(())
    }

    /// Fill up to `quantity` of one order. Returns the quantity actually filled.
    fn fill(
        &mut self,
        id: OrderId,
        quantity: f64,
        bar: &Bar,
        index: usize,
        pass: Pass,
        bucket: TimeOfDayBucket,
    ) -> Result<f64, EngineError> {
        let Some(order) = self.book.get(id) else {
            return Ok(0.0);
        };
        let request = order.request.clone();
        let context = order.context.at_bucket(bucket);
        let side = request.side;

        let reference = match pass {
            Pass::Open => bar.open,
            Pass::Close => bar.close,
        };

        // Limit fills are passive: the limit-bounded price is the reference.
        let (reference, price, slippage) = match (request.order_type, request.limit_price) {
            (OrderType::Limit, Some(limit)) => {
                let price = match side {
                    OrderSide::Buy => reference.min(limit),
                    OrderSide::Sell => reference.max(limit),
                };
                (price, price, 0.0)
            }
            _ => {
                let slip = self
                    .models
                    .slippage
                    .compute_slippage(&request, quantity, reference, &context)?;
                let price = reference + side.sign() * slip;
                if price < 0.0 {
                    (reference, 0.0, reference)
                } else {
                    (reference, price, slip)
                }
            }
        };

        let mut fill_quantity = quantity;
        if side == OrderSide::Buy {
            let cash = self.ledger.cash();
            let fee = self
                .models
                .commission
                .compute_commission(side, quantity, price)?
                .total();
            if quantity * price + fee > cash {
                // Fees only shrink with quantity, so this is affordable.
                fill_quantity = if price > 0.0 {
                    floor_to_lot(((cash - fee) / price).max(0.0), self.config.lot_size)
                        .min(quantity)
                } else {
                    0.0
                };
                let shortfall = quantity - fill_quantity;
                let rejection = RejectedOrder {
                    order_id: id,
                    bar_index: index,
                    side,
                    quantity: shortfall,
                    price,
                    required: quantity * price + fee,
                    available: cash,
                    reason: RejectReason::InsufficientCash,
                };
                warn!(
                    order_id = %id,
                    shortfall,
                    required = rejection.required,
                    available = cash,
                    "fill exceeds cash"
                );
                self.rejected.push(rejection);
            }
        }

        if fill_quantity > QUANTITY_EPSILON {
            let commission = self
                .models
                .commission
                .compute_commission(side, fill_quantity, price)?;
            let fill = Fill {
                order_id: id,
                side,
                bar_index: index,
                quantity: fill_quantity,
                price,
                reference_price: reference,
                slippage_amount: slippage,
                commission,
            };
            debug!(
                order_id = %id,
                bar = index,
                side = ?side,
                quantity = fill_quantity,
                price,
                reference,
                slippage,
                commission = fill.commission.total(),
                "fill"
            );
            self.ledger.apply_fill(&fill, &request);
            self.book.record_fill(id, fill_quantity, index)?;
        }

        if fill_quantity + QUANTITY_EPSILON < quantity {
            self.cancel(id, CancelReason::InsufficientCash, index)?;
        }
        Ok(fill_quantity)
    }

    fn cancel(&mut self, id: OrderId, reason: CancelReason, index: usize) -> Result<(), EngineError> {
        let Some(order) = self.book.get(id) else {
            return Ok(());
        };
        if order.is_open() {
            debug!(order_id = %id, reason = ?reason, remaining = order.remaining_quantity(), "order cancelled");
            self.book.cancel(id, reason, index)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BacktestEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BacktestEngine")
            .field("phase", &self.phase)
            .field("models", &self.models)
            .field("bars", &self.history.len())
            .field("cash", &self.ledger.cash())
            .field("position", &self.ledger.position())
            .finish()
    }
}

/// Run one backtest from a config.
pub fn run_backtest(
    config: BacktestConfig,
    bars: &[Bar],
    signals: &[Option<Signal>],
) -> Result<BacktestResult, EngineError> {
    BacktestEngine::new(config)?.run(bars, signals)
}
