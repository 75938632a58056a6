//! Persisted artifacts
//!
//! CSV formats, one per stage, so any stage can be re-run from disk:
//!
//! | artifact    | columns                                                  |
//! |-------------|----------------------------------------------------------|
//! | timeline    | `date, constituents` (`;`-joined, ascending)             |
//! | panel       | `date, Ticker, <factor columns...>` (empty = missing)    |
//! | predictions | `Quarter, Period, TopK_Tickers, Classes, Probabilities`  |
//! | equity      | `QuarterEnd, Equity` or `QuarterEnd, Benchmark_Equity`   |
//! | events      | `date, added, removed` (input)                           |
//! | prices      | `date, symbol, close` (input)                            |
//!
//! The run report and performance summary are written as JSON.

use crate::data::PriceTable;
use crate::engine::{Pick, QuarterlyPrediction};
use crate::error::{BacktestError, Result};
use crate::panel::{MasterPanel, PanelRow};
use crate::performance::{EquityCurve, EquityPoint};
use crate::types::{parse_date, ClassLabel, Date, Price, DATE_FORMAT};
use crate::universe::{ChangeEvent, RawChangeEvent, UniverseSnapshot, UniverseTimeline};
use csv::{ReaderBuilder, StringRecord, Writer};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Separator for list-valued cells
pub const LIST_SEPARATOR: char = ';';

pub const EQUITY_HEADER: &str = "Equity";
pub const BENCHMARK_HEADER: &str = "Benchmark_Equity";

fn format_date(date: Date) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn split_list(cell: &str) -> impl Iterator<Item = &str> {
    cell.split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn join_list<T: ToString>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(&LIST_SEPARATOR.to_string())
}

fn find_column(headers: &StringRecord, table: &str, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| BacktestError::missing_column(table, name))
}

fn open_reader(path: &Path) -> Result<csv::Reader<File>> {
    Ok(ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?)
}

// Universe timeline

pub fn write_timeline(path: &Path, timeline: &UniverseTimeline) -> Result<()> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record(["date", "constituents"])?;
    for snapshot in timeline.snapshots() {
        writer.write_record([
            format_date(snapshot.quarter_date),
            join_list(snapshot.members.iter()),
        ])?;
    }
    writer.flush()?;
    log::info!(
        "Wrote {} timeline snapshots to {}",
        timeline.len(),
        path.display()
    );
    Ok(())
}

pub fn read_timeline(path: &Path) -> Result<UniverseTimeline> {
    let mut reader = open_reader(path)?;
    let headers = reader.headers()?.clone();
    let date_idx = find_column(&headers, "timeline", "date")?;
    let members_idx = find_column(&headers, "timeline", "constituents")?;

    let mut snapshots = Vec::new();
    for record in reader.records() {
        let record = record?;
        snapshots.push(UniverseSnapshot {
            quarter_date: parse_date(record.get(date_idx).unwrap_or(""))?,
            members: split_list(record.get(members_idx).unwrap_or(""))
                .map(str::to_string)
                .collect(),
        });
    }
    Ok(UniverseTimeline::from_snapshots(snapshots))
}

// Factor panel

pub fn write_panel(path: &Path, panel: &MasterPanel) -> Result<()> {
    let mut writer = Writer::from_writer(BufWriter::new(File::create(path)?));

    let mut header = vec!["date".to_string(), "Ticker".to_string()];
    header.extend(panel.columns().iter().cloned());
    writer.write_record(&header)?;

    for row in panel.rows() {
        let mut record = Vec::with_capacity(header.len());
        record.push(format_date(row.date));
        record.push(row.symbol.clone());
        record.extend(
            row.values
                .iter()
                .map(|v| v.map(|x| x.to_string()).unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }
    writer.flush()?;
    log::info!(
        "Wrote factor panel ({} rows, {} columns) to {}",
        panel.len(),
        panel.columns().len(),
        path.display()
    );
    Ok(())
}

pub fn read_panel(path: &Path) -> Result<MasterPanel> {
    let mut reader = open_reader(path)?;
    let headers = reader.headers()?.clone();
    let date_idx = find_column(&headers, "panel", "date")?;
    let symbol_idx = find_column(&headers, "panel", "Ticker")?;

    let value_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != date_idx && *i != symbol_idx)
        .map(|(i, h)| (i, h.to_string()))
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let values = value_columns
            .iter()
            .map(|(i, name)| match record.get(*i).unwrap_or("") {
                "" => Ok(None),
                cell => cell
                    .parse::<f64>()
                    .map(|v| Some(v).filter(|v| v.is_finite()))
                    .map_err(|e| {
                        BacktestError::ParseError(format!("panel column {}: '{}': {}", name, cell, e))
                    }),
            })
            .collect::<Result<Vec<_>>>()?;

        rows.push(PanelRow {
            date: parse_date(record.get(date_idx).unwrap_or(""))?,
            symbol: record.get(symbol_idx).unwrap_or("").to_string(),
            values,
        });
    }

    let columns = value_columns.into_iter().map(|(_, name)| name).collect();
    Ok(MasterPanel::from_parts(columns, rows))
}

// Quarterly predictions

#[derive(Debug, Serialize, Deserialize)]
struct PredictionRecord {
    #[serde(rename = "Quarter")]
    quarter: String,
    #[serde(rename = "Period")]
    period: String,
    #[serde(rename = "TopK_Tickers")]
    tickers: String,
    #[serde(rename = "Classes", default)]
    classes: String,
    #[serde(rename = "Probabilities", default)]
    probabilities: String,
}

pub fn write_predictions(path: &Path, predictions: &[QuarterlyPrediction]) -> Result<()> {
    let mut writer = Writer::from_path(path)?;
    for prediction in predictions {
        writer.serialize(PredictionRecord {
            quarter: format_date(prediction.quarter),
            period: prediction.period.to_string(),
            tickers: join_list(prediction.picks.iter().map(|p| p.symbol.as_str())),
            classes: join_list(prediction.picks.iter().map(|p| p.class)),
            probabilities: join_list(
                prediction
                    .picks
                    .iter()
                    .map(|p| format!("{:.6}", p.probability)),
            ),
        })?;
    }
    writer.flush()?;
    log::info!("Wrote {} quarterly predictions to {}", predictions.len(), path.display());
    Ok(())
}

/// Read predictions back. Pick dates are not persisted and are set to the quarter.
pub fn read_predictions(path: &Path) -> Result<Vec<QuarterlyPrediction>> {
    let mut reader = open_reader(path)?;
    let mut predictions = Vec::new();

    for record in reader.deserialize::<PredictionRecord>() {
        let record = record?;
        let quarter = parse_date(&record.quarter)?;
        let symbols: Vec<&str> = split_list(&record.tickers).collect();
        let classes = split_list(&record.classes)
            .map(|c| {
                c.parse::<ClassLabel>()
                    .map_err(|e| BacktestError::ParseError(format!("class '{}': {}", c, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        let probabilities = split_list(&record.probabilities)
            .map(|p| {
                p.parse::<f64>()
                    .map_err(|e| BacktestError::ParseError(format!("probability '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let picks = symbols
            .iter()
            .enumerate()
            .map(|(i, symbol)| Pick {
                symbol: symbol.to_string(),
                date: quarter,
                class: classes.get(i).copied().unwrap_or_default(),
                probability: probabilities.get(i).copied().unwrap_or_default(),
            })
            .collect();

        predictions.push(QuarterlyPrediction {
            quarter,
            period: record.period.parse()?,
            picks,
        });
    }

    predictions.sort_by_key(|p| p.quarter);
    Ok(predictions)
}

// Equity curves

pub fn write_equity(path: &Path, curve: &EquityCurve, value_header: &str) -> Result<()> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record(["QuarterEnd", value_header])?;
    for point in &curve.points {
        writer.write_record([format_date(point.as_of_date), point.equity_value.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_equity(path: &Path, value_header: &str) -> Result<Vec<EquityPoint>> {
    let mut reader = open_reader(path)?;
    let headers = reader.headers()?.clone();
    let date_idx = find_column(&headers, "equity", "QuarterEnd")?;
    let value_idx = find_column(&headers, "equity", value_header)?;

    let mut points = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cell = record.get(value_idx).unwrap_or("");
        let value = cell
            .parse::<f64>()
            .map_err(|e| BacktestError::ParseError(format!("equity '{}': {}", cell, e)))?;
        points.push(EquityPoint::new(
            parse_date(record.get(date_idx).unwrap_or(""))?,
            value,
        ));
    }
    Ok(points)
}

// Inputs

/// Membership events from `date, added, removed`
pub fn read_events(path: &Path) -> Result<Vec<ChangeEvent>> {
    let mut reader = open_reader(path)?;
    reader
        .deserialize::<RawChangeEvent>()
        .map(|raw| -> Result<ChangeEvent> { Ok(ChangeEvent::from_raw(&raw?)) })
        .collect()
}

#[derive(Debug, Deserialize)]
struct PriceRecord {
    date: String,
    symbol: String,
    close: Option<Price>,
}

/// Close prices from `date, symbol, close`; rows without a close are ignored
pub fn read_prices(path: &Path) -> Result<PriceTable> {
    let mut reader = open_reader(path)?;
    let mut table = PriceTable::new();
    for record in reader.deserialize::<PriceRecord>() {
        let record = record?;
        if let Some(close) = record.close.filter(|c| c.is_finite()) {
            table.insert(&record.symbol, parse_date(&record.date)?, close);
        }
    }
    Ok(table)
}

/// Any serializable value as pretty JSON
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PriceLookup;
    use chrono::NaiveDate;
    use std::io::Write;
    use tempfile::TempDir;

    fn d(y: i32, m: u32, day: u32) -> Date {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_panel_missing_cells() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("panel.csv");
        let panel = MasterPanel::from_parts(
            vec!["close".into(), "roe".into()],
            vec![PanelRow {
                date: d(2024, 1, 2),
                symbol: "AAPL".into(),
                values: vec![Some(185.5), None],
            }],
        );
        write_panel(&path, &panel).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("date,Ticker,close,roe"));
        assert!(text.contains("2024-01-02,AAPL,185.5,"));

        assert_eq!(read_panel(&path).unwrap(), panel);
    }

    #[test]
    fn test_events_and_prices_inputs() {
        let dir = TempDir::new().unwrap();
        let events = dir.path().join("events.csv");
        let mut file = File::create(&events).unwrap();
        writeln!(file, "date,added,removed").unwrap();
        writeln!(file, "2005-03-23,AAPL,").unwrap();
        writeln!(file, "2010-01-01,,AAPL").unwrap();
        writeln!(file, "not a date,MSFT,").unwrap();
        drop(file);

        let parsed = read_events(&events).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], ChangeEvent::addition(d(2005, 3, 23), "AAPL"));
        assert_eq!(parsed[1], ChangeEvent::removal(d(2010, 1, 1), "AAPL"));
        assert_eq!(parsed[2].effective_date, NaiveDate::MIN);

        let prices = dir.path().join("prices.csv");
        std::fs::write(&prices, "date,symbol,close\n2024-01-02,^GSPC,4742.83\n2024-01-03,^GSPC,\n")
            .unwrap();
        let table = read_prices(&prices).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.price_on_or_before("^GSPC", d(2024, 1, 3), 10), Some(4742.83));
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("timeline.csv");
        std::fs::write(&path, "date,members\n2024-01-01,AAPL\n").unwrap();
        assert!(matches!(
            read_timeline(&path).unwrap_err(),
            BacktestError::SchemaError { .. }
        ));
    }
}
