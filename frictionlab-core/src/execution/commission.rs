//! Commission models: market-specific fee breakdowns per fill.
//!
//! Fee rules are data. A `FeeSchedule` carries every rate a market uses and
//! each component of the breakdown is computed from it independently:
//!
//! - Japan: percent of notional, minimum-fee floor, consumption tax on top.
//! - USA: per-share fee, sell-side regulatory fees (ad valorem + capped
//!   per-share), FX conversion when the instrument and account currencies differ.

use serde::{Deserialize, Serialize};

use crate::domain::{CommissionBreakdown, Currency, Market, OrderSide};
use crate::error::ConfigurationError;

/// Maximum fixed-point iterations in `break_even_price`.
const BREAK_EVEN_MAX_ITER: usize = 64;
const BREAK_EVEN_TOLERANCE: f64 = 1e-10;

/// Commission model: computes the fee breakdown for one execution.
pub trait CommissionCalculator: Send + Sync {
    fn compute_commission(
        &self,
        side: OrderSide,
        quantity: f64,
        price: f64,
    ) -> Result<CommissionBreakdown, ConfigurationError>;

    fn name(&self) -> &str;

    /// Exit price at which a round trip of `quantity` opened at `entry_price`
    /// breaks even after both legs' fees.
    ///
    /// Solved by fixed-point iteration since exit fees depend on the exit price.
    fn break_even_price(
        &self,
        entry_price: f64,
        quantity: f64,
        side: OrderSide,
    ) -> Result<f64, ConfigurationError> {
        ConfigurationError::check_positive("quantity", quantity)?;
        let entry_fees = self.compute_commission(side, quantity, entry_price)?.total();
        let direction = side.sign();

        let mut price = entry_price;
        for _ in 0..BREAK_EVEN_MAX_ITER {
            let exit_fees = self
                .compute_commission(side.opposite(), quantity, price.max(0.0))?
                .total();
            let next = entry_price + direction * (entry_fees + exit_fees) / quantity;
            if (next - price).abs() < BREAK_EVEN_TOLERANCE {
                return Ok(next);
            }
            price = next;
        }
        Ok(price)
    }
}

/// All rates a broker charges. Unused components stay zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeSchedule {
    /// Fraction of notional, e.g. 0.0022 for 0.22%.
    pub percent_of_notional: f64,
    pub per_share: f64,
    /// Floor on `base_fee + per_share_fee`, before tax.
    pub minimum_fee: f64,
    /// Tax on the brokerage fee (e.g. Japanese consumption tax).
    pub tax_rate: f64,
    pub sell_ad_valorem_rate: f64,
    pub sell_per_share_rate: f64,
    /// Cap on the per-share regulatory fee for one execution. Zero means uncapped.
    pub sell_per_share_cap: f64,
    pub fx_fee_rate: f64,
}

impl FeeSchedule {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (field, value) in [
            ("schedule.percent_of_notional", self.percent_of_notional),
            ("schedule.per_share", self.per_share),
            ("schedule.minimum_fee", self.minimum_fee),
            ("schedule.tax_rate", self.tax_rate),
            ("schedule.sell_ad_valorem_rate", self.sell_ad_valorem_rate),
            ("schedule.sell_per_share_rate", self.sell_per_share_rate),
            ("schedule.sell_per_share_cap", self.sell_per_share_cap),
            ("schedule.fx_fee_rate", self.fx_fee_rate),
        ] {
            ConfigurationError::check_non_negative(field, value)?;
        }
        Ok(())
    }

    /// Full breakdown for one execution.
    pub fn breakdown(
        &self,
        side: OrderSide,
        quantity: f64,
        price: f64,
        apply_fx: bool,
    ) -> Result<CommissionBreakdown, ConfigurationError> {
        ConfigurationError::check_non_negative("quantity", quantity)?;
        let notional = quantity * price;
        if notional < 0.0 || notional.is_nan() {
            return Err(ConfigurationError::NegativeNotional(notional));
        }
        if quantity == 0.0 {
            return Ok(CommissionBreakdown::default());
        }

        let per_share_fee = self.per_share * quantity;
        let mut base_fee = self.percent_of_notional * notional;
        if base_fee + per_share_fee < self.minimum_fee {
            base_fee = self.minimum_fee - per_share_fee;
        }
        let tax = (base_fee + per_share_fee) * self.tax_rate;

        let regulatory_fees = match side {
            OrderSide::Buy => 0.0,
            OrderSide::Sell => {
                let per_share = self.sell_per_share_rate * quantity;
                let per_share = if self.sell_per_share_cap > 0.0 {
                    per_share.min(self.sell_per_share_cap)
                } else {
                    per_share
                };
                notional * self.sell_ad_valorem_rate + per_share
            }
        };

        let fx_fee = if apply_fx {
            notional * self.fx_fee_rate
        } else {
            0.0
        };

        Ok(CommissionBreakdown {
            base_fee,
            per_share_fee,
            regulatory_fees,
            fx_fee,
            tax,
        })
    }
}

/// A named brokerage cost schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerProfile {
    pub name: String,
    pub market: Market,
    /// Currency the account settles in.
    pub base_currency: Currency,
    pub schedule: FeeSchedule,
}

impl Default for BrokerProfile {
    fn default() -> Self {
        Self::sbi_japan()
    }
}

impl BrokerProfile {
    pub const PRESETS: [&'static str; 5] = [
        "sbi_japan",
        "rakuten_japan",
        "interactive_brokers_us",
        "zero_commission_us",
        "sbi_us",
    ];

    /// Look up a preset by key.
    pub fn preset(key: &str) -> Result<Self, ConfigurationError> {
        match key.trim().to_ascii_lowercase().as_str() {
            "sbi_japan" => Ok(Self::sbi_japan()),
            "rakuten_japan" => Ok(Self::rakuten_japan()),
            "interactive_brokers_us" | "ibkr_us" => Ok(Self::interactive_brokers_us()),
            "zero_commission_us" => Ok(Self::zero_commission_us()),
            "sbi_us" => Ok(Self::sbi_us()),
            _ => Err(ConfigurationError::UnknownBrokerProfile(key.to_string())),
        }
    }

    pub fn sbi_japan() -> Self {
        Self {
            name: "sbi_japan".into(),
            market: Market::Japan,
            base_currency: Currency::Jpy,
            schedule: FeeSchedule {
                percent_of_notional: 0.0022,
                minimum_fee: 100.0,
                tax_rate: 0.10,
                ..Default::default()
            },
        }
    }

    pub fn rakuten_japan() -> Self {
        Self {
            name: "rakuten_japan".into(),
            market: Market::Japan,
            base_currency: Currency::Jpy,
            schedule: FeeSchedule {
                percent_of_notional: 0.001,
                minimum_fee: 55.0,
                tax_rate: 0.10,
                ..Default::default()
            },
        }
    }

    pub fn interactive_brokers_us() -> Self {
        Self {
            name: "interactive_brokers_us".into(),
            market: Market::Usa,
            base_currency: Currency::Usd,
            schedule: FeeSchedule {
                per_share: 0.005,
                minimum_fee: 1.0,
                sell_ad_valorem_rate: 0.000_027_8,
                sell_per_share_rate: 0.000_166,
                sell_per_share_cap: 8.30,
                fx_fee_rate: 0.000_02,
                ..Default::default()
            },
        }
    }

    pub fn zero_commission_us() -> Self {
        Self {
            name: "zero_commission_us".into(),
            market: Market::Usa,
            base_currency: Currency::Usd,
            schedule: FeeSchedule {
                sell_ad_valorem_rate: 0.000_027_8,
                sell_per_share_rate: 0.000_166,
                sell_per_share_cap: 8.30,
                ..Default::default()
            },
        }
    }

    /// US equities from a yen account: percent fee plus FX spread.
    pub fn sbi_us() -> Self {
        Self {
            name: "sbi_us".into(),
            market: Market::Usa,
            base_currency: Currency::Jpy,
            schedule: FeeSchedule {
                percent_of_notional: 0.00495,
                sell_ad_valorem_rate: 0.000_027_8,
                sell_per_share_rate: 0.000_166,
                sell_per_share_cap: 8.30,
                fx_fee_rate: 0.0017,
                ..Default::default()
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.schedule.validate()
    }

    /// Breakdown for one execution of an instrument quoted in `instrument_currency`.
    pub fn commission_for(
        &self,
        side: OrderSide,
        quantity: f64,
        price: f64,
        instrument_currency: Currency,
    ) -> Result<CommissionBreakdown, ConfigurationError> {
        self.schedule.breakdown(
            side,
            quantity,
            price,
            instrument_currency != self.base_currency,
        )
    }
}

/// Fee-table commission for one broker profile.
#[derive(Debug, Clone)]
pub struct TableCommission {
    profile: BrokerProfile,
    instrument_currency: Currency,
}

impl TableCommission {
    pub fn new(profile: BrokerProfile, instrument_currency: Currency) -> Self {
        Self {
            profile,
            instrument_currency,
        }
    }

    pub fn profile(&self) -> &BrokerProfile {
        &self.profile
    }
}

impl CommissionCalculator for TableCommission {
    fn compute_commission(
        &self,
        side: OrderSide,
        quantity: f64,
        price: f64,
    ) -> Result<CommissionBreakdown, ConfigurationError> {
        self.profile
            .commission_for(side, quantity, price, self.instrument_currency)
    }

    fn name(&self) -> &str {
        &self.profile.name
    }
}

/// Ideal mode: no fees.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroCommission;

impl CommissionCalculator for ZeroCommission {
    fn compute_commission(
        &self,
        _side: OrderSide,
        quantity: f64,
        price: f64,
    ) -> Result<CommissionBreakdown, ConfigurationError> {
        ConfigurationError::check_non_negative("quantity", quantity)?;
        if quantity * price < 0.0 {
            return Err(ConfigurationError::NegativeNotional(quantity * price));
        }
        Ok(CommissionBreakdown::default())
    }

    fn name(&self) -> &str {
        "zero"
    }
}
