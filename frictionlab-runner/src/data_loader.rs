//! CSV loading for bars and signals.
//!
//! Bars: `timestamp,open,high,low,close,volume`, one row per bar in time order.
//! Signals: `timestamp,side,target_quantity`, sparse. Each signal row must
//! match a bar timestamp exactly; bars without a row get `None` (hold).
//!
//! Timestamps are RFC 3339 (`2024-01-04T00:00:00Z`) or a bare date
//! (`2024-01-04`, read as midnight UTC).

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use thiserror::Error;

use frictionlab_core::domain::{Bar, Signal, SignalSide};
use frictionlab_core::error::DataIntegrityError;

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("row {row}: invalid timestamp '{value}'")]
    InvalidTimestamp { row: usize, value: String },

    #[error("row {row}: {reason}")]
    InvalidSignal { row: usize, reason: String },

    #[error("row {row}: signal at {timestamp} matches no bar")]
    UnmatchedSignal { row: usize, timestamp: DateTime<Utc> },

    #[error("row {row}: second signal for {timestamp}")]
    DuplicateSignal { row: usize, timestamp: DateTime<Utc> },

    #[error("no bars in input")]
    Empty,

    #[error(transparent)]
    DataIntegrity(#[from] DataIntegrityError),
}

#[derive(Debug, Deserialize)]
struct BarRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct SignalRow {
    timestamp: String,
    side: String,
    target_quantity: Option<f64>,
}

/// Data rows start after the header line.
fn row_number(index: usize) -> usize {
    index + 2
}

pub fn parse_timestamp(value: &str, row: usize) -> Result<DateTime<Utc>, LoadError> {
    let trimmed = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| LoadError::InvalidTimestamp {
            row,
            value: value.to_string(),
        })
}

fn open_file(path: &Path) -> Result<std::fs::File, LoadError> {
    std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read bars from CSV. Every bar is validated and timestamps must increase.
pub fn read_bars<R: Read>(reader: R) -> Result<Vec<Bar>, LoadError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut bars: Vec<Bar> = Vec::new();

    for (i, record) in rdr.deserialize::<BarRow>().enumerate() {
        let row = record?;
        let timestamp = parse_timestamp(&row.timestamp, row_number(i))?;
        let bar = Bar::new(timestamp, row.open, row.high, row.low, row.close, row.volume);
        bar.validate(i)?;
        if let Some(prev) = bars.last() {
            if bar.timestamp <= prev.timestamp {
                return Err(DataIntegrityError::NonMonotonicTimestamp {
                    index: i,
                    previous: prev.timestamp,
                    current: bar.timestamp,
                }
                .into());
            }
        }
        bars.push(bar);
    }

    if bars.is_empty() {
        return Err(LoadError::Empty);
    }
    Ok(bars)
}

pub fn load_bars(path: &Path) -> Result<Vec<Bar>, LoadError> {
    let bars = read_bars(open_file(path)?)?;
    tracing::debug!(path = %path.display(), bars = bars.len(), "loaded bars");
    Ok(bars)
}

/// Read signals from CSV and align them to `bars` by timestamp.
pub fn read_signals<R: Read>(reader: R, bars: &[Bar]) -> Result<Vec<Option<Signal>>, LoadError> {
    let index: BTreeMap<DateTime<Utc>, usize> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| (bar.timestamp, i))
        .collect();
    let mut signals: Vec<Option<Signal>> = vec![None; bars.len()];

    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    for (i, record) in rdr.deserialize::<SignalRow>().enumerate() {
        let row = record?;
        let row_no = row_number(i);
        let timestamp = parse_timestamp(&row.timestamp, row_no)?;
        let side: SignalSide = row
            .side
            .parse()
            .map_err(|reason| LoadError::InvalidSignal { row: row_no, reason })?;
        let quantity = row.target_quantity.unwrap_or(0.0);
        if !quantity.is_finite() || quantity < 0.0 {
            return Err(LoadError::InvalidSignal {
                row: row_no,
                reason: format!("target_quantity must be non-negative, got {quantity}"),
            });
        }
        let signal = match side {
            SignalSide::Long => Signal::long(quantity),
            SignalSide::Short => Signal::short(quantity),
            SignalSide::Flat => Signal::flat(),
        };

        let Some(&bar_index) = index.get(&timestamp) else {
            return Err(LoadError::UnmatchedSignal { row: row_no, timestamp });
        };
        if signals[bar_index].is_some() {
            return Err(LoadError::DuplicateSignal { row: row_no, timestamp });
        }
        signals[bar_index] = Some(signal);
    }

    Ok(signals)
}

pub fn load_signals(path: &Path, bars: &[Bar]) -> Result<Vec<Option<Signal>>, LoadError> {
    let signals = read_signals(open_file(path)?, bars)?;
    tracing::debug!(
        path = %path.display(),
        signals = signals.iter().filter(|s| s.is_some()).count(),
        "loaded signals"
    );
    Ok(signals)
}
