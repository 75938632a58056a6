//! Market data access
//!
//! The backtester never fetches data itself. Everything it consumes arrives
//! through [`MarketDataClient`]; [`InMemoryMarketData`] backs tests and
//! file-driven runs.

use crate::error::{BacktestError, Result};
use crate::types::{Bar, Date, Price, Symbol};
use crate::universe::ChangeEvent;
use chrono::Duration;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Financial statement families delivered by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Income,
    BalanceSheet,
    CashFlow,
    EnterpriseValue,
}

impl StatementKind {
    pub const ALL: [StatementKind; 4] = [
        StatementKind::Income,
        StatementKind::BalanceSheet,
        StatementKind::CashFlow,
        StatementKind::EnterpriseValue,
    ];
}

/// Reporting period for statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingPeriod {
    #[default]
    Quarterly,
    Annual,
}

/// One filed statement: report date plus numeric fields
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatementRow {
    pub date: Date,
    pub fields: BTreeMap<String, f64>,
}

impl StatementRow {
    pub fn new(date: Date) -> Self {
        Self {
            date,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }
}

/// Market-data provider contract.
///
/// Every method may legitimately return empty or partial data; callers degrade
/// gracefully instead of failing the run.
pub trait MarketDataClient: Send + Sync {
    /// Daily bars with `start <= date <= end`, ascending
    fn fetch_price_series(&self, symbol: &str, start: Date, end: Date) -> Result<Vec<Bar>>;

    /// Statements of `kind`, ascending by report date
    fn fetch_statement(
        &self,
        symbol: &str,
        kind: StatementKind,
        period: ReportingPeriod,
    ) -> Result<Vec<StatementRow>>;

    /// Index membership changes, in provider order
    fn fetch_index_membership_events(&self) -> Result<Vec<ChangeEvent>>;
}

/// In-memory market data for backtesting and tests
#[derive(Debug, Default, Clone)]
pub struct InMemoryMarketData {
    prices: HashMap<Symbol, Vec<Bar>>,
    statements: HashMap<(Symbol, StatementKind), Vec<StatementRow>>,
    events: Vec<ChangeEvent>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bar, keeping the series sorted by date
    pub fn add_bar(&mut self, symbol: &str, bar: Bar) {
        let series = self.prices.entry(symbol.to_string()).or_default();
        let idx = series.partition_point(|b| b.date <= bar.date);
        series.insert(idx, bar);
    }

    pub fn add_bars(&mut self, symbol: &str, bars: impl IntoIterator<Item = Bar>) {
        for bar in bars {
            self.add_bar(symbol, bar);
        }
    }

    pub fn add_statement(&mut self, symbol: &str, kind: StatementKind, row: StatementRow) {
        let rows = self
            .statements
            .entry((symbol.to_string(), kind))
            .or_default();
        let idx = rows.partition_point(|r| r.date <= row.date);
        rows.insert(idx, row);
    }

    pub fn add_event(&mut self, event: ChangeEvent) {
        self.events.push(event);
    }

    /// Symbols that have at least one bar
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.prices.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Close prices as a lookup table
    pub fn price_table(&self) -> PriceTable {
        let mut table = PriceTable::new();
        for (symbol, bars) in &self.prices {
            for bar in bars {
                table.insert(symbol, bar.date, bar.close);
            }
        }
        table
    }
}

impl MarketDataClient for InMemoryMarketData {
    fn fetch_price_series(&self, symbol: &str, start: Date, end: Date) -> Result<Vec<Bar>> {
        Ok(self
            .prices
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.date >= start && b.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn fetch_statement(
        &self,
        symbol: &str,
        kind: StatementKind,
        _period: ReportingPeriod,
    ) -> Result<Vec<StatementRow>> {
        Ok(self
            .statements
            .get(&(symbol.to_string(), kind))
            .cloned()
            .unwrap_or_default())
    }

    fn fetch_index_membership_events(&self) -> Result<Vec<ChangeEvent>> {
        Ok(self.events.clone())
    }
}

/// Resolve a price for a symbol on (or shortly before) a date
pub trait PriceLookup: Send + Sync {
    /// Most recent price with `date - lookback_days <= d <= date`
    fn price_on_or_before(&self, symbol: &str, date: Date, lookback_days: i64) -> Option<Price>;
}

/// Close prices indexed by symbol and date
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    series: HashMap<Symbol, BTreeMap<Date, Price>>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, date: Date, price: Price) {
        self.series
            .entry(symbol.to_string())
            .or_default()
            .insert(date, price);
    }

    pub fn len(&self) -> usize {
        self.series.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PriceLookup for PriceTable {
    fn price_on_or_before(&self, symbol: &str, date: Date, lookback_days: i64) -> Option<Price> {
        let earliest = date - Duration::days(lookback_days.max(0));
        self.series
            .get(symbol)?
            .range(earliest..=date)
            .next_back()
            .map(|(_, price)| *price)
    }
}

/// Price lookup that queries a market-data client for a short window per request
pub struct ClientPriceLookup<'a, C: MarketDataClient + ?Sized> {
    client: &'a C,
}

impl<'a, C: MarketDataClient + ?Sized> ClientPriceLookup<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }
}

impl<'a, C: MarketDataClient + ?Sized> PriceLookup for ClientPriceLookup<'a, C> {
    fn price_on_or_before(&self, symbol: &str, date: Date, lookback_days: i64) -> Option<Price> {
        let earliest = date - Duration::days(lookback_days.max(0));
        match self.client.fetch_price_series(symbol, earliest, date) {
            Ok(bars) => bars
                .iter()
                .filter(|b| b.date >= earliest && b.date <= date)
                .max_by_key(|b| b.date)
                .map(|b| b.close),
            Err(e) => {
                log::warn!("Failed to fetch price for {} on {}: {}", symbol, date, e);
                None
            }
        }
    }
}

/// Fetch and parse membership events, failing when the provider returns none
pub fn fetch_events(client: &dyn MarketDataClient) -> Result<Vec<ChangeEvent>> {
    let events = client.fetch_index_membership_events()?;
    if events.is_empty() {
        return Err(BacktestError::DataUnavailable(
            "provider returned no membership events".to_string(),
        ));
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> Date {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_bars_kept_sorted() {
        let mut data = InMemoryMarketData::new();
        data.add_bar("AAPL", Bar::flat(d(2024, 1, 3), 3.0));
        data.add_bar("AAPL", Bar::flat(d(2024, 1, 1), 1.0));
        data.add_bar("AAPL", Bar::flat(d(2024, 1, 2), 2.0));

        let bars = data
            .fetch_price_series("AAPL", d(2024, 1, 1), d(2024, 1, 2))
            .unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 1.0);
        assert_eq!(bars[1].close, 2.0);
    }

    #[test]
    fn test_unknown_symbol_is_empty_not_error() {
        let data = InMemoryMarketData::new();
        assert!(data
            .fetch_price_series("NOPE", d(2024, 1, 1), d(2024, 2, 1))
            .unwrap()
            .is_empty());
        assert!(data
            .fetch_statement("NOPE", StatementKind::Income, ReportingPeriod::Quarterly)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_price_lookup_respects_buffer() {
        let mut table = PriceTable::new();
        table.insert("MSFT", d(2024, 3, 28), 420.0);

        // Easter weekend: the 1st falls within the buffer
        assert_eq!(table.price_on_or_before("MSFT", d(2024, 4, 1), 10), Some(420.0));
        assert_eq!(table.price_on_or_before("MSFT", d(2024, 4, 20), 10), None);
        // Never a later price
        assert_eq!(table.price_on_or_before("MSFT", d(2024, 3, 27), 10), None);
    }

    #[test]
    fn test_client_lookup_matches_table() {
        let mut data = InMemoryMarketData::new();
        data.add_bar("SPY", Bar::flat(d(2024, 1, 2), 470.0));
        data.add_bar("SPY", Bar::flat(d(2024, 1, 5), 468.0));

        let lookup = ClientPriceLookup::new(&data);
        let table = data.price_table();
        for day in 1..10 {
            let date = d(2024, 1, day);
            assert_eq!(
                lookup.price_on_or_before("SPY", date, 10),
                table.price_on_or_before("SPY", date, 10)
            );
        }
    }

    #[test]
    fn test_fetch_events_empty() {
        let data = InMemoryMarketData::new();
        assert!(fetch_events(&data).is_err());
    }
}
