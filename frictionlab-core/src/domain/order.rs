//! Order requests, lifecycle states and the audit records the engine emits.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigurationError;

/// Order identifier, monotonic within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Side needed to move a position by `delta`.
    pub fn for_delta(delta: f64) -> Self {
        if delta >= 0.0 {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

/// How the engine turns a position change into an order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderKind {
    #[default]
    Market,
    /// Passive limit `offset_bps` better than the signal-bar close.
    Limit { offset_bps: f64 },
}

/// One request to change the position, created per signal and consumed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub requested_quantity: f64,
    pub signal_bar_index: usize,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
}

impl OrderRequest {
    pub fn market(
        id: OrderId,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: f64,
        signal_bar_index: usize,
    ) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            side,
            requested_quantity: quantity,
            signal_bar_index,
            order_type: OrderType::Market,
            limit_price: None,
        }
    }

    pub fn limit(
        id: OrderId,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: f64,
        signal_bar_index: usize,
        limit_price: f64,
    ) -> Self {
        Self {
            order_type: OrderType::Limit,
            limit_price: Some(limit_price),
            ..Self::market(id, symbol, side, quantity, signal_bar_index)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.requested_quantity <= 0.0 || !self.requested_quantity.is_finite() {
            return Err(ConfigurationError::NonPositiveQuantity(
                self.requested_quantity,
            ));
        }
        if self.order_type == OrderType::Limit && self.limit_price.is_none() {
            return Err(ConfigurationError::MissingLimitPrice(self.id.0));
        }
        Ok(())
    }
}

/// Why a working order stopped before filling completely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Remainder still open after the last allowed queue bar.
    QueueTimeout,
    /// Latency pushed execution past the max-wait window.
    LatencyExpired,
    /// A later signal in the opposite direction replaced it.
    Superseded,
    /// Cash no longer covers the remainder at fill time.
    InsufficientCash,
    EndOfData,
}

/// Order lifecycle.
///
/// `Scheduled -> Queued -> PartiallyFilled* -> Filled | Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrderState {
    /// Waiting on latency; first eligible at `execution_bar`.
    Scheduled { execution_bar: usize },
    Queued,
    PartiallyFilled,
    Filled,
    Cancelled { reason: CancelReason },
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Cancelled { .. })
    }

    /// Eligible for fills on the current bar.
    pub fn is_working(&self) -> bool {
        matches!(self, OrderState::Queued | OrderState::PartiallyFilled)
    }
}

/// Audit trail entry for an order state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: OrderId,
    pub bar_index: usize,
    pub from: Option<OrderState>,
    pub to: OrderState,
    pub remaining_quantity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Buy notional exceeds available cash.
    InsufficientCash,
    /// Short exposure exceeds account equity.
    InsufficientMargin,
}

/// An order the account could not afford. Recorded, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedOrder {
    pub order_id: OrderId,
    pub bar_index: usize,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub required: f64,
    pub available: f64,
    pub reason: RejectReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_quantity_is_rejected() {
        let order = OrderRequest::market(OrderId(1), "7203", OrderSide::Buy, 0.0, 0);
        assert_eq!(
            order.validate(),
            Err(ConfigurationError::NonPositiveQuantity(0.0))
        );
        let order = OrderRequest::market(OrderId(1), "7203", OrderSide::Buy, -5.0, 0);
        assert!(order.validate().is_err());
    }

    #[test]
    fn limit_without_price_is_rejected() {
        let mut order = OrderRequest::limit(OrderId(7), "AAPL", OrderSide::Sell, 10.0, 2, 150.0);
        assert!(order.validate().is_ok());
        order.limit_price = None;
        assert_eq!(
            order.validate(),
            Err(ConfigurationError::MissingLimitPrice(7))
        );
    }

    #[test]
    fn state_classification() {
        assert!(OrderState::Queued.is_working());
        assert!(OrderState::PartiallyFilled.is_working());
        assert!(!OrderState::Scheduled { execution_bar: 3 }.is_working());
        assert!(OrderState::Filled.is_terminal());
        assert!(OrderState::Cancelled {
            reason: CancelReason::QueueTimeout
        }
        .is_terminal());
    }

    #[test]
    fn order_kind_serde() {
        let kind: OrderKind = serde_json::from_str(r#"{"type":"limit","offset_bps":5.0}"#).unwrap();
        assert_eq!(kind, OrderKind::Limit { offset_bps: 5.0 });
        let kind: OrderKind = serde_json::from_str(r#"{"type":"market"}"#).unwrap();
        assert_eq!(kind, OrderKind::Market);
    }

    #[test]
    fn side_helpers() {
        assert_eq!(OrderSide::for_delta(10.0), OrderSide::Buy);
        assert_eq!(OrderSide::for_delta(-1.0), OrderSide::Sell);
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.sign(), -1.0);
    }
}
