//! Strategy decisions as the engine consumes them.
//!
//! The strategy layer is external. A signal is an opaque `(side, target_quantity)`
//! tuple describing the net position the strategy wants to hold after this bar.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSide {
    Long,
    Short,
    Flat,
}

impl FromStr for SignalSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(SignalSide::Long),
            "short" | "sell" => Ok(SignalSide::Short),
            "flat" | "exit" | "none" => Ok(SignalSide::Flat),
            other => Err(format!("unknown signal side: {other}")),
        }
    }
}

/// Desired net position for one bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub side: SignalSide,
    pub target_quantity: f64,
}

impl Signal {
    pub fn long(quantity: f64) -> Self {
        Self {
            side: SignalSide::Long,
            target_quantity: quantity,
        }
    }

    pub fn short(quantity: f64) -> Self {
        Self {
            side: SignalSide::Short,
            target_quantity: quantity,
        }
    }

    pub fn flat() -> Self {
        Self {
            side: SignalSide::Flat,
            target_quantity: 0.0,
        }
    }

    /// Signed target position under the given trading mode.
    pub fn target_position(&self, mode: TradingMode) -> f64 {
        let quantity = self.target_quantity.abs();
        match (self.side, mode) {
            (SignalSide::Long, _) => quantity,
            (SignalSide::Short, TradingMode::LongShort) => -quantity,
            (SignalSide::Short, TradingMode::LongOnly) => 0.0,
            (SignalSide::Flat, _) => 0.0,
        }
    }
}

/// Whether the account may hold negative positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    /// Short signals are treated as Flat.
    #[default]
    LongOnly,
    LongShort,
}
