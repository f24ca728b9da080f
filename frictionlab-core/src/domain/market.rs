//! Markets, currencies and trading-session buckets.

use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigurationError;

/// Milliseconds in one calendar day.
pub const DAY_MS: u64 = 86_400_000;

/// Width of the opening and closing session buckets.
const EDGE_BUCKET_MINUTES: i64 = 30;

/// Exchange jurisdiction. Selects currency, session hours and default fee tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Market {
    Japan,
    Usa,
}

impl Market {
    pub fn currency(&self) -> Currency {
        match self {
            Market::Japan => Currency::Jpy,
            Market::Usa => Currency::Usd,
        }
    }

    /// Fixed UTC offset of the exchange clock. Daylight saving is not modelled.
    pub fn utc_offset(&self) -> FixedOffset {
        let hours = match self {
            Market::Japan => 9,
            Market::Usa => -5,
        };
        FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix())
    }

    /// Regular session open and close in exchange-local time.
    pub fn session(&self) -> (NaiveTime, NaiveTime) {
        match self {
            Market::Japan => (hm(9, 0), hm(15, 30)),
            Market::Usa => (hm(9, 30), hm(16, 0)),
        }
    }

    /// Length of the regular session in milliseconds.
    pub fn session_ms(&self) -> u64 {
        let (open, close) = self.session();
        (close - open).num_milliseconds().max(0) as u64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Japan => "japan",
            Market::Usa => "usa",
        }
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

impl FromStr for Market {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "japan" | "jp" | "jpx" | "tse" => Ok(Market::Japan),
            "usa" | "us" => Ok(Market::Usa),
            other => Err(ConfigurationError::UnknownMarket(other.to_string())),
        }
    }
}

impl TryFrom<String> for Market {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Market> for String {
    fn from(market: Market) -> Self {
        market.as_str().to_string()
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Currency {
    Jpy,
    Usd,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Jpy => "JPY",
            Currency::Usd => "USD",
        }
    }
}

impl FromStr for Currency {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "JPY" => Ok(Currency::Jpy),
            "USD" => Ok(Currency::Usd),
            other => Err(ConfigurationError::UnknownCurrency(other.to_string())),
        }
    }
}

impl TryFrom<String> for Currency {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.as_str().to_string()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intraday liquidity regime a bar falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDayBucket {
    /// First 30 minutes of the session.
    Open,
    Midday,
    /// Last 30 minutes of the session.
    Close,
    OutsideSession,
    /// Bars spanning a full day or more carry no intraday information.
    Daily,
}

impl TimeOfDayBucket {
    /// Classify a bar by its timestamp and duration.
    pub fn classify(timestamp: DateTime<Utc>, bar_duration_ms: u64, market: Market) -> Self {
        if bar_duration_ms >= DAY_MS {
            return TimeOfDayBucket::Daily;
        }
        let local = timestamp.with_timezone(&market.utc_offset());
        let (open, close) = market.session();
        let now = NaiveTime::from_hms_opt(local.hour(), local.minute(), local.second())
            .unwrap_or(NaiveTime::MIN);

        if now < open || now >= close {
            return TimeOfDayBucket::OutsideSession;
        }
        if (now - open).num_minutes() < EDGE_BUCKET_MINUTES {
            TimeOfDayBucket::Open
        } else if (close - now).num_minutes() <= EDGE_BUCKET_MINUTES {
            TimeOfDayBucket::Close
        } else {
            TimeOfDayBucket::Midday
        }
    }
}
