//! Core types and constants

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Calendar date used throughout the library (daily resolution)
pub type Date = NaiveDate;

/// Symbol identifier for securities
pub type Symbol = String;

/// Price type (using f64 for precision)
pub type Price = f64;

/// Quantity/volume type
pub type Quantity = f64;

/// Class label produced by target derivation (0..=4)
pub type ClassLabel = u8;

/// Date format used by every persisted artifact
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Daily OHLCV bar as returned by the market-data client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: Date,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Quantity,
}

impl Bar {
    /// Create a new bar
    pub fn new(
        date: Date,
        open: Price,
        high: Price,
        low: Price,
        close: Price,
        volume: Quantity,
    ) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Bar where every price equals `close` (handy for index series)
    pub fn flat(date: Date, close: Price) -> Self {
        Self::new(date, close, close, close, close, 0.0)
    }
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(value: &str) -> crate::error::Result<Date> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|e| crate::error::BacktestError::ParseError(format!("{}: {}", value, e)))
}
