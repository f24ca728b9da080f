//! Order book state machine: the per-run registry of order lifecycles.
//!
//! The book tracks state only:
//! - `Scheduled` until the latency-determined execution bar
//! - `Queued` / `PartiallyFilled` while working
//! - `Filled` or `Cancelled(reason)` once terminal
//!
//! Every transition is appended to the audit trail. Prices, fees and liquidity
//! are decided by the execution models, never here.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::{
    CancelReason, OrderEvent, OrderId, OrderRequest, OrderState, QUANTITY_EPSILON,
};
use crate::execution::ExecutionContext;

/// Errors from order book operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderBookError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("invalid transition for order {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: OrderId,
        from: OrderState,
        to: OrderState,
    },

    #[error("order {id} overfilled: fill {quantity} exceeds remaining {remaining}")]
    Overfill {
        id: OrderId,
        quantity: f64,
        remaining: f64,
    },
}

/// An order request plus its engine-owned lifecycle state.
#[derive(Debug, Clone)]
pub struct WorkingOrder {
    pub request: OrderRequest,
    pub context: ExecutionContext,
    pub state: OrderState,
    pub filled_quantity: f64,
    /// Insertion order within the run.
    pub sequence: u64,
    /// Bars the remainder has been carried past its first fill attempt.
    pub carried_bars: usize,
    /// Bar on which the order reached a terminal state.
    pub completed_bar: Option<usize>,
}

impl WorkingOrder {
    pub fn remaining_quantity(&self) -> f64 {
        (self.request.requested_quantity - self.filled_quantity).max(0.0)
    }

    pub fn is_open(&self) -> bool {
        !self.state.is_terminal()
    }
}

/// All orders of one run, keyed by id (ids are issued in submission order).
#[derive(Debug, Default)]
pub struct OrderBook {
    orders: BTreeMap<OrderId, WorkingOrder>,
    next_sequence: u64,
    events: Vec<OrderEvent>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Queries ────────────────────────────────────────────────────────

    pub fn get(&self, id: OrderId) -> Option<&WorkingOrder> {
        self.orders.get(&id)
    }

    pub fn orders(&self) -> impl Iterator<Item = &WorkingOrder> {
        self.orders.values()
    }

    /// Non-terminal orders, scheduled ones included.
    pub fn open_orders(&self) -> impl Iterator<Item = &WorkingOrder> {
        self.orders.values().filter(|o| o.is_open())
    }

    /// Ids of orders eligible for fills, FIFO by `(signal_bar_index, sequence)`.
    pub fn working_ids(&self) -> Vec<OrderId> {
        let mut working: Vec<&WorkingOrder> =
            self.orders.values().filter(|o| o.state.is_working()).collect();
        working.sort_by_key(|o| (o.request.signal_bar_index, o.sequence));
        working.into_iter().map(|o| o.request.id).collect()
    }

    pub fn events(&self) -> &[OrderEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<OrderEvent> {
        self.events
    }

    // ── Transitions ────────────────────────────────────────────────────

    /// Register a new order waiting for `execution_bar`.
    pub fn submit(
        &mut self,
        request: OrderRequest,
        context: ExecutionContext,
        execution_bar: usize,
        bar_index: usize,
    ) -> OrderId {
        let id = request.id;
        let state = OrderState::Scheduled { execution_bar };
        self.events.push(OrderEvent {
            order_id: id,
            bar_index,
            from: None,
            to: state,
            remaining_quantity: request.requested_quantity,
        });
        let order = WorkingOrder {
            request,
            context,
            state,
            filled_quantity: 0.0,
            sequence: self.next_sequence,
            carried_bars: 0,
            completed_bar: None,
        };
        self.next_sequence += 1;
        self.orders.insert(id, order);
        id
    }

    /// Move every order scheduled at or before `bar_index` to `Queued`.
    pub fn release_scheduled(&mut self, bar_index: usize) -> Vec<OrderId> {
        let due: Vec<OrderId> = self
            .orders
            .values()
            .filter(|o| {
                matches!(o.state, OrderState::Scheduled { execution_bar } if execution_bar <= bar_index)
            })
            .map(|o| o.request.id)
            .collect();
        for &id in &due {
            // ids come from the map above
            let _ = self.transition(id, OrderState::Queued, bar_index);
        }
        due
    }

    /// Record `quantity` filled on a working order. Returns true once fully filled.
    pub fn record_fill(
        &mut self,
        id: OrderId,
        quantity: f64,
        bar_index: usize,
    ) -> Result<bool, OrderBookError> {
        let order = self
            .orders
            .get_mut(&id)
            .ok_or(OrderBookError::OrderNotFound(id))?;
        if !order.state.is_working() {
            return Err(OrderBookError::InvalidTransition {
                id,
                from: order.state,
                to: OrderState::PartiallyFilled,
            });
        }
        let remaining = order.remaining_quantity();
        if quantity > remaining + QUANTITY_EPSILON {
            return Err(OrderBookError::Overfill {
                id,
                quantity,
                remaining,
            });
        }
        order.filled_quantity = (order.filled_quantity + quantity).min(order.request.requested_quantity);

        let done = order.remaining_quantity() <= QUANTITY_EPSILON;
        let next = if done {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        };
        if next != order.state {
            self.transition(id, next, bar_index)?;
        }
        Ok(done)
    }

    /// Count one more carried bar for a working order.
    pub fn mark_carried(&mut self, id: OrderId) -> Result<usize, OrderBookError> {
        let order = self
            .orders
            .get_mut(&id)
            .ok_or(OrderBookError::OrderNotFound(id))?;
        order.carried_bars += 1;
        Ok(order.carried_bars)
    }

    pub fn cancel(
        &mut self,
        id: OrderId,
        reason: CancelReason,
        bar_index: usize,
    ) -> Result<(), OrderBookError> {
        self.transition(id, OrderState::Cancelled { reason }, bar_index)
    }

    fn transition(
        &mut self,
        id: OrderId,
        to: OrderState,
        bar_index: usize,
    ) -> Result<(), OrderBookError> {
        let order = self
            .orders
            .get_mut(&id)
            .ok_or(OrderBookError::OrderNotFound(id))?;
        let from = order.state;
        let legal = match (from, to) {
            (_, _) if from.is_terminal() => false,
            (OrderState::Scheduled { .. }, OrderState::Queued) => true,
            (OrderState::Scheduled { .. }, OrderState::Cancelled { .. }) => true,
            (OrderState::Queued | OrderState::PartiallyFilled, OrderState::PartiallyFilled) => true,
            (OrderState::Queued | OrderState::PartiallyFilled, OrderState::Filled) => true,
            (OrderState::Queued | OrderState::PartiallyFilled, OrderState::Cancelled { .. }) => true,
            _ => false,
        };
        if !legal {
            return Err(OrderBookError::InvalidTransition { id, from, to });
        }

        order.state = to;
        if to.is_terminal() {
            order.completed_bar = Some(bar_index);
        }
        self.events.push(OrderEvent {
            order_id: id,
            bar_index,
            from: Some(from),
            to,
            remaining_quantity: order.remaining_quantity(),
        });
        Ok(())
    }
}
